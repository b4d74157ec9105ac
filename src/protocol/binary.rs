//! Binary protocol framing
//!
//! Fixed 24-byte header followed by extras, key and value. Requests carry
//! magic 0x80, responses 0x81. The decoder peeks the header, waits until the
//! whole body is buffered, and hands back the parsed header plus the total
//! frame length to drain.

/// Size of the fixed request/response header.
pub const BINARY_HEADER_LEN: usize = 24;

pub const MAGIC_REQUEST: u8 = 0x80;
pub const MAGIC_RESPONSE: u8 = 0x81;

pub const OP_GET: u8 = 0x00;
pub const OP_SET: u8 = 0x01;
pub const OP_DELETE: u8 = 0x04;
pub const OP_SASL_AUTH: u8 = 0x21;

/// Extras on a SET request: 4 bytes flags + 4 bytes expiry, both zero.
const SET_EXTRAS_LEN: usize = 8;

/// Parsed response header fields the client cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryHeader {
    pub magic: u8,
    pub opcode: u8,
    pub key_len: u16,
    pub extras_len: u8,
    pub status: u16,
    pub body_len: u32,
}

impl BinaryHeader {
    /// Decode the fixed header from the front of `data`.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < BINARY_HEADER_LEN {
            return None;
        }
        Some(Self {
            magic: data[0],
            opcode: data[1],
            key_len: u16::from_be_bytes([data[2], data[3]]),
            extras_len: data[4],
            status: u16::from_be_bytes([data[6], data[7]]),
            body_len: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        })
    }

    /// Total frame length including the header.
    pub fn frame_len(&self) -> usize {
        BINARY_HEADER_LEN + self.body_len as usize
    }
}

/// Try to recognize one complete response at the front of `data`.
///
/// Returns the header and the frame length to drain, or `None` while the
/// buffer holds less than a whole response.
pub fn peek_response(data: &[u8]) -> Option<(BinaryHeader, usize)> {
    let header = BinaryHeader::parse(data)?;
    let total = header.frame_len();
    if data.len() < total {
        return None;
    }
    Some((header, total))
}

fn put_header(buf: &mut Vec<u8>, opcode: u8, key_len: usize, extras_len: usize, body_len: usize) {
    buf.push(MAGIC_REQUEST);
    buf.push(opcode);
    buf.extend_from_slice(&(key_len as u16).to_be_bytes());
    buf.push(extras_len as u8);
    buf.push(0x00); // data type
    buf.extend_from_slice(&0u16.to_be_bytes()); // vbucket
    buf.extend_from_slice(&(body_len as u32).to_be_bytes());
    buf.extend_from_slice(&0u32.to_be_bytes()); // opaque
    buf.extend_from_slice(&0u64.to_be_bytes()); // cas
}

/// Append a binary GET request to `buf`.
pub fn encode_get(buf: &mut Vec<u8>, key: &str) {
    let key = key.as_bytes();
    put_header(buf, OP_GET, key.len(), 0, key.len());
    buf.extend_from_slice(key);
}

/// Append a binary SET request (zero flags, no expiry) to `buf`.
pub fn encode_set(buf: &mut Vec<u8>, key: &str, value: &[u8]) {
    let key = key.as_bytes();
    put_header(
        buf,
        OP_SET,
        key.len(),
        SET_EXTRAS_LEN,
        key.len() + SET_EXTRAS_LEN + value.len(),
    );
    buf.extend_from_slice(&[0u8; SET_EXTRAS_LEN]);
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
}

/// Append a binary DELETE request to `buf`.
pub fn encode_delete(buf: &mut Vec<u8>, key: &str) {
    let key = key.as_bytes();
    put_header(buf, OP_DELETE, key.len(), 0, key.len());
    buf.extend_from_slice(key);
}

/// Append a SASL PLAIN authentication request to `buf`.
///
/// Key is the mechanism name `PLAIN`; the value is
/// `\0<username>\0<password>`.
pub fn encode_sasl_plain(buf: &mut Vec<u8>, username: &str, password: &str) {
    const MECH: &[u8] = b"PLAIN";
    let body_len = MECH.len() + 1 + username.len() + 1 + password.len();
    put_header(buf, OP_SASL_AUTH, MECH.len(), 0, body_len);
    buf.extend_from_slice(MECH);
    buf.push(0);
    buf.extend_from_slice(username.as_bytes());
    buf.push(0);
    buf.extend_from_slice(password.as_bytes());
}
