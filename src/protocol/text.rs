//! Text protocol framing
//!
//! Requests are CRLF-terminated command lines; GET replies are a `VALUE`
//! header line, the payload, a CRLF, and an `END` line. The decoder here is
//! line-oriented: [`read_line`] yields one complete line at a time and the
//! read state machine tracks where it is inside a multi-line reply.

use crate::utils::error::ProtocolError;

pub const CRLF: &[u8] = b"\r\n";

/// Append `get <key>\r\n` to `buf`.
pub fn encode_get(buf: &mut Vec<u8>, key: &str) {
    buf.extend_from_slice(b"get ");
    buf.extend_from_slice(key.as_bytes());
    buf.extend_from_slice(CRLF);
}

/// Append `set <key> 0 0 <len>\r\n<value>\r\n` to `buf`.
pub fn encode_set(buf: &mut Vec<u8>, key: &str, value: &[u8]) {
    buf.extend_from_slice(b"set ");
    buf.extend_from_slice(key.as_bytes());
    buf.extend_from_slice(b" 0 0 ");
    buf.extend_from_slice(value.len().to_string().as_bytes());
    buf.extend_from_slice(CRLF);
    buf.extend_from_slice(value);
    buf.extend_from_slice(CRLF);
}

/// Append `delete <key>\r\n` to `buf`.
pub fn encode_delete(buf: &mut Vec<u8>, key: &str) {
    buf.extend_from_slice(b"delete ");
    buf.extend_from_slice(key.as_bytes());
    buf.extend_from_slice(CRLF);
}

/// Pop one CRLF-terminated line off the front of `data`.
///
/// Returns the line without its terminator and the total number of bytes
/// consumed (line + CRLF), or `None` if no complete line is buffered yet.
pub fn read_line(data: &[u8]) -> Option<(&[u8], usize)> {
    let at = data.windows(2).position(|w| w == CRLF)?;
    Some((&data[..at], at + 2))
}

/// Parse the payload length out of a `VALUE <key> <flags> <len>` line.
pub fn parse_value_header(line: &[u8]) -> Result<usize, ProtocolError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| ProtocolError::InvalidValueHeader(String::from_utf8_lossy(line).into()))?;
    let mut fields = text.split_ascii_whitespace();
    // VALUE <key> <flags> <len> [cas]
    match (fields.next(), fields.next(), fields.next(), fields.next()) {
        (Some("VALUE"), Some(_key), Some(_flags), Some(len)) => len
            .parse()
            .map_err(|_| ProtocolError::InvalidValueHeader(text.into())),
        _ => Err(ProtocolError::InvalidValueHeader(text.into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_get() {
        let mut buf = Vec::new();
        encode_get(&mut buf, "foo");
        assert_eq!(buf, b"get foo\r\n");
    }

    #[test]
    fn test_encode_set() {
        let mut buf = Vec::new();
        encode_set(&mut buf, "x", b"yy");
        assert_eq!(buf, b"set x 0 0 2\r\nyy\r\n");
    }

    #[test]
    fn test_encode_delete() {
        let mut buf = Vec::new();
        encode_delete(&mut buf, "k9");
        assert_eq!(buf, b"delete k9\r\n");
    }

    #[test]
    fn test_read_line_complete() {
        let (line, used) = read_line(b"STORED\r\nrest").unwrap();
        assert_eq!(line, b"STORED");
        assert_eq!(used, 8);
    }

    #[test]
    fn test_read_line_incomplete() {
        assert!(read_line(b"STORE").is_none());
        assert!(read_line(b"STORED\r").is_none());
        assert!(read_line(b"").is_none());
    }

    #[test]
    fn test_read_line_empty_line() {
        let (line, used) = read_line(b"\r\nmore").unwrap();
        assert!(line.is_empty());
        assert_eq!(used, 2);
    }

    #[test]
    fn test_parse_value_header() {
        assert_eq!(parse_value_header(b"VALUE foo 0 3").unwrap(), 3);
        assert_eq!(parse_value_header(b"VALUE k 42 1048576").unwrap(), 1048576);
        // gets replies carry a trailing cas field
        assert_eq!(parse_value_header(b"VALUE foo 0 3 77").unwrap(), 3);
    }

    #[test]
    fn test_parse_value_header_malformed() {
        assert!(parse_value_header(b"VALUE foo 0").is_err());
        assert!(parse_value_header(b"VALUE foo 0 abc").is_err());
        assert!(parse_value_header(b"SERVER_ERROR oom").is_err());
    }

    // Round-trip: decode the request forms we encode.
    #[test]
    fn test_request_roundtrip() {
        let mut buf = Vec::new();
        encode_set(&mut buf, "somekey", b"payload");
        let (line, used) = read_line(&buf).unwrap();
        let fields: Vec<&str> = std::str::from_utf8(line).unwrap().split(' ').collect();
        assert_eq!(fields, ["set", "somekey", "0", "0", "7"]);
        assert_eq!(&buf[used..used + 7], b"payload");
        assert_eq!(&buf[used + 7..], CRLF);

        buf.clear();
        encode_get(&mut buf, "somekey");
        let (line, _) = read_line(&buf).unwrap();
        assert_eq!(line, b"get somekey");
    }
}
