//! In-memory doubles for the resolver and the origin transport.

use crate::error::{ProxyError, Result};
use crate::resolver::HostLookup;
use crate::transport::{Connection, Transport};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, Cursor, Read, Write};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Resolves every name to one address, or fails every lookup.
pub struct StaticLookup {
    pub answer: Option<Ipv4Addr>,
    pub calls: AtomicUsize,
}

impl StaticLookup {
    pub fn answering(ip: Ipv4Addr) -> Self {
        Self {
            answer: Some(ip),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            answer: None,
            calls: AtomicUsize::new(0),
        }
    }
}

impl HostLookup for StaticLookup {
    fn lookup_ipv4(&self, host: &str, _port: u16) -> io::Result<Ipv4Addr> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no such host {host}")))
    }
}

/// Replays canned origin responses, one per connection, and records what the
/// proxy sent.
#[derive(Default)]
pub struct ScriptedOrigin {
    responses: Mutex<VecDeque<Vec<u8>>>,
    sent: Mutex<Vec<Arc<Mutex<Vec<u8>>>>>,
    addrs: Mutex<Vec<SocketAddrV4>>,
    latency: Option<Duration>,
}

impl ScriptedOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    pub fn respond(&self, raw: impl Into<Vec<u8>>) {
        self.responses.lock().push_back(raw.into());
    }

    pub fn connects(&self) -> usize {
        self.sent.lock().len()
    }

    /// Raw request bytes written on connection `index`.
    pub fn request(&self, index: usize) -> String {
        let sent = self.sent.lock();
        let buf = sent[index].lock();
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn addr(&self, index: usize) -> SocketAddrV4 {
        self.addrs.lock()[index]
    }
}

impl Transport for ScriptedOrigin {
    fn connect(&self, addr: SocketAddrV4, _timeout: Duration) -> Result<Box<dyn Connection>> {
        let Some(response) = self.responses.lock().pop_front() else {
            return Err(ProxyError::OriginUnreachable {
                addr: addr.to_string(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "no scripted response"),
            });
        };
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }
        let sent = Arc::new(Mutex::new(Vec::new()));
        self.sent.lock().push(Arc::clone(&sent));
        self.addrs.lock().push(addr);
        Ok(Box::new(MockStream {
            input: Cursor::new(response),
            output: sent,
        }))
    }
}

/// Read side replays fixed bytes; write side lands in a shared buffer.
pub struct MockStream {
    pub input: Cursor<Vec<u8>>,
    pub output: Arc<Mutex<Vec<u8>>>,
}

impl MockStream {
    pub fn client(request: impl Into<Vec<u8>>) -> Self {
        Self {
            input: Cursor::new(request.into()),
            output: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn written(&self) -> String {
        String::from_utf8_lossy(&self.output.lock()).into_owned()
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
