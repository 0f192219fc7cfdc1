//! Blocking socket plumbing shared by the dispatcher and the proxy handler.

use crate::codec::{find, HEAD_TERMINATOR};
use crate::error::{ProxyError, Result};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, SocketAddrV4, TcpStream};
use std::time::Duration;

/// Upper bound on a client request head.
const MAX_HEAD_BYTES: usize = 64 * 1024;

const READ_CHUNK: usize = 4096;

/// Byte stream to a peer. Implemented by `TcpStream` and by in-memory
/// doubles in tests.
pub trait Connection: Read + Write + Send {}

impl<T: Read + Write + Send + ?Sized> Connection for T {}

/// Opens connections to origins.
pub trait Transport: Send + Sync {
    fn connect(&self, addr: SocketAddrV4, timeout: Duration) -> Result<Box<dyn Connection>>;
}

/// Plain TCP, one connection per origin exchange.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransport;

impl Transport for TcpTransport {
    fn connect(&self, addr: SocketAddrV4, timeout: Duration) -> Result<Box<dyn Connection>> {
        match TcpStream::connect_timeout(&SocketAddr::V4(addr), timeout) {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(error = %e, "set_nodelay failed");
                }
                Ok(Box::new(stream))
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Err(ProxyError::Timeout {
                operation: "origin connect",
                after: timeout,
            }),
            Err(e) => Err(ProxyError::OriginUnreachable {
                addr: addr.to_string(),
                source: e,
            }),
        }
    }
}

/// Read until the blank line that ends a request head. Bytes that arrived
/// after the terminator are returned too.
pub fn read_request_head<R: Read + ?Sized>(conn: &mut R) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = match conn.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ProxyError::Io(e)),
        };
        if n == 0 {
            return Err(ProxyError::MalformedRequest(
                "connection closed before end of headers".into(),
            ));
        }

        // Only rescan the tail that could complete a terminator
        let scan_from = data.len().saturating_sub(HEAD_TERMINATOR.len() - 1);
        data.extend_from_slice(&chunk[..n]);
        if find(&data[scan_from..], HEAD_TERMINATOR).is_some() {
            return Ok(data);
        }
        if data.len() > MAX_HEAD_BYTES {
            return Err(ProxyError::MalformedRequest("request head too large".into()));
        }
    }
}

/// Read exactly `len` more bytes.
pub fn read_exact_vec<R: Read + ?Sized>(conn: &mut R, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    conn.read_exact(&mut buf)?;
    Ok(buf)
}

/// Read until the peer closes its side.
pub fn read_all<R: Read + ?Sized>(conn: &mut R) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    conn.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Send the whole buffer and flush.
pub fn write_all<W: Write + ?Sized>(conn: &mut W, data: &[u8]) -> io::Result<()> {
    conn.write_all(data)?;
    conn.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Hands out data in fixed-size pieces to exercise split terminators.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let end = (self.pos + self.step).min(self.data.len()).min(self.pos + buf.len());
            let n = end - self.pos;
            buf[..n].copy_from_slice(&self.data[self.pos..end]);
            self.pos = end;
            Ok(n)
        }
    }

    #[test]
    fn reads_until_terminator() {
        let mut conn = Cursor::new(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n".to_vec());
        let head = read_request_head(&mut conn).unwrap();
        assert!(head.ends_with(b"\r\n\r\n"));
    }

    #[test]
    fn terminator_split_across_reads() {
        let mut conn = Trickle {
            data: b"GET / HTTP/1.1\r\nHost: a\r\n\r\nBODY".to_vec(),
            pos: 0,
            step: 3,
        };
        let head = read_request_head(&mut conn).unwrap();
        assert!(find(&head, HEAD_TERMINATOR).is_some());
    }

    #[test]
    fn eof_before_terminator_is_malformed() {
        let mut conn = Cursor::new(b"GET / HTTP/1.1\r\nHost: a\r\n".to_vec());
        let err = read_request_head(&mut conn).unwrap_err();
        assert!(matches!(err, ProxyError::MalformedRequest(_)));
    }

    #[test]
    fn empty_stream_is_malformed() {
        let mut conn = Cursor::new(Vec::new());
        assert!(matches!(
            read_request_head(&mut conn),
            Err(ProxyError::MalformedRequest(_))
        ));
    }

    #[test]
    fn oversized_head_is_rejected() {
        let mut data = b"GET / HTTP/1.1\r\n".to_vec();
        data.extend(std::iter::repeat(b'a').take(MAX_HEAD_BYTES + 10));
        let mut conn = Cursor::new(data);
        assert!(matches!(
            read_request_head(&mut conn),
            Err(ProxyError::MalformedRequest(_))
        ));
    }

    #[test]
    fn read_all_and_write_all() {
        let mut src = Cursor::new(b"payload".to_vec());
        assert_eq!(read_all(&mut src).unwrap(), b"payload");

        let mut sink = Vec::new();
        write_all(&mut sink, b"abc").unwrap();
        assert_eq!(sink, b"abc");
    }
}
