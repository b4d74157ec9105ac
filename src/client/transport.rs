//! Transport adaptor
//!
//! The state machine above this layer only knows three verbs: append a
//! request frame outbound, drain inbound bytes, arm a timer. This module
//! supplies the two byte movers behind that boundary: a buffered
//! non-blocking TCP stream and a connected UDP socket that wraps every
//! request in its own framed datagram.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use mio::net::{TcpStream as MioTcpStream, UdpSocket as MioUdpSocket};
use mio::{Interest, Registry, Token};

use crate::utils::error::ConnectionError;

/// Datagram framing header: request id, sequence 0, datagram count 1,
/// reserved. Byte 5 is the low byte of the count field.
const UDP_HEADER: [u8; 8] = [0, 0, 0, 0, 0, 1, 0, 0];
const UDP_HEADER_LEN: usize = 8;

const RECV_CHUNK: usize = 64 * 1024;

/// Compacting receive buffer.
///
/// Socket reads append at the tail; the decoder consumes from the head.
/// Consumed space is reclaimed by shifting the remainder down, the same
/// way the event-driven read path compacts after each parse pass.
#[derive(Debug, Default)]
pub struct RecvBuffer {
    buf: Vec<u8>,
    head: usize,
}

impl RecvBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconsumed bytes.
    pub fn data(&self) -> &[u8] {
        &self.buf[self.head..]
    }

    pub fn len(&self) -> usize {
        self.buf.len() - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Mark `n` bytes at the head as consumed.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.len());
        self.head += n;
    }

    /// Shift the unconsumed remainder down to the start of the buffer.
    pub fn compact(&mut self) {
        if self.head == 0 {
            return;
        }
        let len = self.buf.len();
        self.buf.copy_within(self.head..len, 0);
        self.buf.truncate(len - self.head);
        self.head = 0;
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.head = 0;
    }
}

/// Outcome of draining a socket into the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// New bytes were appended.
    Data,
    /// Nothing available right now.
    WouldBlock,
}

/// A connected byte mover, TCP stream or UDP socket.
#[derive(Debug)]
pub enum Transport {
    Tcp {
        stream: MioTcpStream,
        wbuf: Vec<u8>,
        wpos: usize,
    },
    Udp {
        socket: MioUdpSocket,
        scratch: Vec<u8>,
    },
}

impl Transport {
    /// Connect a TCP stream and switch it to non-blocking mode.
    ///
    /// Nagle is disabled here unless the caller opts out; the connect
    /// itself is synchronous so the connection is usable on return.
    pub fn connect_tcp(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        nodelay: bool,
    ) -> Result<Self, ConnectionError> {
        let addr = resolve(host, port)?;
        let stream = std::net::TcpStream::connect_timeout(&addr, connect_timeout).map_err(|e| {
            ConnectionError::ConnectFailed {
                host: host.to_string(),
                port,
                source: e,
            }
        })?;
        if nodelay {
            stream.set_nodelay(true).ok();
        }
        stream
            .set_nonblocking(true)
            .map_err(|e| ConnectionError::ConnectFailed {
                host: host.to_string(),
                port,
                source: e,
            })?;

        Ok(Transport::Tcp {
            stream: MioTcpStream::from_std(stream),
            wbuf: Vec::with_capacity(16 * 1024),
            wpos: 0,
        })
    }

    /// Bind an ephemeral UDP socket and connect it to the server.
    pub fn connect_udp(host: &str, port: u16) -> Result<Self, ConnectionError> {
        let addr = resolve(host, port)?;
        let bind_addr: SocketAddr = if addr.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let wrap = |e: io::Error| ConnectionError::ConnectFailed {
            host: host.to_string(),
            port,
            source: e,
        };
        let socket = std::net::UdpSocket::bind(bind_addr).map_err(wrap)?;
        socket.connect(addr).map_err(wrap)?;
        socket.set_nonblocking(true).map_err(wrap)?;

        Ok(Transport::Udp {
            socket: MioUdpSocket::from_std(socket),
            scratch: Vec::with_capacity(RECV_CHUNK),
        })
    }

    pub fn is_udp(&self) -> bool {
        matches!(self, Transport::Udp { .. })
    }

    /// Register readiness interest with the poll registry.
    pub fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        match self {
            Transport::Tcp { stream, .. } => {
                registry.register(stream, token, Interest::READABLE | Interest::WRITABLE)
            }
            Transport::Udp { socket, .. } => registry.register(socket, token, Interest::READABLE),
        }
    }

    /// Queue (TCP) or immediately send (UDP) one request frame.
    ///
    /// Returns the number of wire bytes the frame accounts for: UDP adds
    /// its framing header, TCP is the frame itself.
    pub fn send_frame(&mut self, frame: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Tcp { wbuf, .. } => {
                wbuf.extend_from_slice(frame);
                Ok(frame.len())
            }
            Transport::Udp { socket, scratch } => {
                scratch.clear();
                scratch.extend_from_slice(&UDP_HEADER);
                scratch.extend_from_slice(frame);
                send_datagram(socket, scratch)?;
                Ok(UDP_HEADER_LEN + frame.len())
            }
        }
    }

    /// Push buffered output toward the socket.
    ///
    /// Returns `true` when the write buffer is fully drained.
    pub fn flush(&mut self) -> io::Result<bool> {
        match self {
            Transport::Tcp { stream, wbuf, wpos } => {
                while *wpos < wbuf.len() {
                    match stream.write(&wbuf[*wpos..]) {
                        Ok(0) => {
                            return Err(io::Error::new(ErrorKind::WriteZero, "connection closed"))
                        }
                        Ok(n) => *wpos += n,
                        Err(ref e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                        Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e),
                    }
                }
                wbuf.clear();
                *wpos = 0;
                Ok(true)
            }
            Transport::Udp { .. } => Ok(true),
        }
    }

    /// Drain whatever the socket has into `rb`.
    ///
    /// UDP datagrams lose their 8-byte framing header on the way in, so the
    /// decoder sees a plain response stream on either transport.
    pub fn fill(&mut self, rb: &mut RecvBuffer) -> io::Result<FillOutcome> {
        let mut got_data = false;
        let mut chunk = [0u8; RECV_CHUNK];
        match self {
            Transport::Tcp { stream, .. } => loop {
                match stream.read(&mut chunk) {
                    Ok(0) => return Err(io::Error::new(ErrorKind::UnexpectedEof, "server closed")),
                    Ok(n) => {
                        rb.extend(&chunk[..n]);
                        got_data = true;
                    }
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            },
            Transport::Udp { socket, .. } => loop {
                match socket.recv(&mut chunk) {
                    Ok(n) if n > UDP_HEADER_LEN => {
                        rb.extend(&chunk[UDP_HEADER_LEN..n]);
                        got_data = true;
                    }
                    Ok(_) => continue, // runt datagram, drop it
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            },
        }
        Ok(if got_data {
            FillOutcome::Data
        } else {
            FillOutcome::WouldBlock
        })
    }
}

fn send_datagram(socket: &MioUdpSocket, payload: &[u8]) -> io::Result<()> {
    loop {
        match socket.send(payload) {
            Ok(_) => return Ok(()),
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            // A full socket buffer drops the datagram, as UDP does anyway.
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, ConnectionError> {
    let wrap = |source: io::Error| ConnectionError::ConnectFailed {
        host: host.to_string(),
        port,
        source,
    };
    (host, port)
        .to_socket_addrs()
        .map_err(wrap)?
        .next()
        .ok_or_else(|| wrap(io::Error::new(ErrorKind::NotFound, "no addresses found")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recv_buffer_consume_and_compact() {
        let mut rb = RecvBuffer::new();
        rb.extend(b"END\r\nVALUE");
        assert_eq!(rb.len(), 10);
        rb.consume(5);
        assert_eq!(rb.data(), b"VALUE");
        rb.compact();
        assert_eq!(rb.data(), b"VALUE");
        rb.consume(5);
        assert!(rb.is_empty());
    }

    #[test]
    fn test_tcp_send_buffers_until_flush() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut t =
            Transport::connect_tcp("127.0.0.1", port, Duration::from_secs(5), true).unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        assert_eq!(t.send_frame(b"get a\r\n").unwrap(), 7);
        assert_eq!(t.send_frame(b"get b\r\n").unwrap(), 7);
        while !t.flush().unwrap() {}

        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut got = [0u8; 14];
        peer.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"get a\r\nget b\r\n");
    }

    #[test]
    fn test_udp_frame_carries_header() {
        let peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = peer.local_addr().unwrap().port();
        let mut t = Transport::connect_udp("127.0.0.1", port).unwrap();
        assert_eq!(t.send_frame(b"get k\r\n").unwrap(), 15);

        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut datagram = [0u8; 64];
        let n = peer.recv(&mut datagram).unwrap();
        assert_eq!(&datagram[..n], b"\x00\x00\x00\x00\x00\x01\x00\x00get k\r\n");
    }

    #[test]
    fn test_udp_fill_strips_header() {
        let peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = peer.local_addr().unwrap().port();
        let mut t = Transport::connect_udp("127.0.0.1", port).unwrap();
        // Learn the client's address by receiving one datagram.
        t.send_frame(b"ping").unwrap();
        let mut buf = [0u8; 64];
        let (_, from) = peer.recv_from(&mut buf).unwrap();

        let mut reply = UDP_HEADER.to_vec();
        reply.extend_from_slice(b"END\r\n");
        peer.send_to(&reply, from).unwrap();

        let mut rb = RecvBuffer::new();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            if t.fill(&mut rb).unwrap() == FillOutcome::Data {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "no datagram arrived");
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(rb.data(), b"END\r\n");
    }
}
