// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use crate::error::DncError;

// ============================================================================
// Wire Trait
// ============================================================================

/// Byte stream operations needed by the DNC protocol
pub trait Wire: Send {
    /// Non-blocking check for unread bytes
    fn bytes_available(&mut self) -> std::io::Result<bool>;

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    fn shutdown(&mut self) -> std::io::Result<()>;
}

// ============================================================================
// TCP Implementation
// ============================================================================

/// Wire implementation over a TCP connection to the controller
pub struct TcpWire {
    stream: TcpStream,
}

impl TcpWire {
    pub fn connect(host: &str, port: u16, timeout: Duration) -> std::io::Result<Self> {
        let stream = TcpStream::connect((host, port))?;
        TcpWire::from_stream(stream, timeout)
    }

    pub fn from_stream(stream: TcpStream, timeout: Duration) -> std::io::Result<Self> {
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        Ok(TcpWire { stream })
    }
}

impl Wire for TcpWire {
    fn bytes_available(&mut self) -> std::io::Result<bool> {
        let mut byte = [0u8; 1];
        self.stream.set_nonblocking(true)?;
        let peeked = self.stream.peek(&mut byte);
        self.stream.set_nonblocking(false)?;

        // A peek of 0 is end of stream: readable, and the next read returns 0
        match peeked {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(buf)?;
        self.stream.flush()
    }

    fn shutdown(&mut self) -> std::io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != std::io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Shared handle to the session's wire.
///
/// The mutex is the exclusive access guard: every method takes it for the
/// duration of one wire call and drops it before returning.
#[derive(Clone)]
pub struct Transport {
    wire: Arc<Mutex<Box<dyn Wire>>>,
}

impl Transport {
    pub fn new(wire: Box<dyn Wire>) -> Self {
        Transport { wire: Arc::new(Mutex::new(wire)) }
    }

    /// True while some thread holds the guard
    pub fn is_busy(&self) -> bool {
        self.wire.is_locked()
    }

    pub fn bytes_available(&self) -> std::io::Result<bool> {
        self.wire.lock().bytes_available()
    }

    /// Reads up to `max` bytes and decodes them as ASCII
    pub fn read_chunk(&self, max: usize) -> std::io::Result<String> {
        let mut buf = vec![0u8; max];
        let n = self.wire.lock().read(&mut buf)?;
        Ok(decode_ascii(&buf[..n]))
    }

    /// Reads a single byte if one is waiting
    pub fn poll_code(&self) -> Result<Option<u8>, DncError> {
        let mut wire = self.wire.lock();
        if !wire.bytes_available()? {
            return Ok(None);
        }

        let mut buf = [0u8; 1];
        match wire.read(&mut buf)? {
            0 => Err(DncError::ConnectionClosed),
            _ => Ok(Some(buf[0])),
        }
    }

    pub fn send_text(&self, text: &str) -> std::io::Result<()> {
        let bytes = encode_ascii(text);
        self.wire.lock().write_all(&bytes)
    }

    pub fn shutdown(&self) -> std::io::Result<()> {
        self.wire.lock().shutdown()
    }

    #[cfg(test)]
    pub fn hold(&self) -> parking_lot::MutexGuard<'_, Box<dyn Wire>> {
        self.wire.lock()
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

pub fn decode_ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if b.is_ascii() { b as char } else { '?' })
        .collect()
}

pub fn encode_ascii(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
        .collect()
}

// ============================================================================
// Mock Wire for Testing
// ============================================================================

/// Everything a mock wire was asked to do, in order
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireOp {
    Read(Vec<u8>),
    Write(Vec<u8>),
    Shutdown,
}

#[cfg(test)]
#[derive(Clone, Default)]
pub struct MockLog {
    ops: Arc<Mutex<Vec<WireOp>>>,
}

#[cfg(test)]
impl MockLog {
    pub fn ops(&self) -> Vec<WireOp> {
        self.ops.lock().clone()
    }

    pub fn written(&self) -> Vec<u8> {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                WireOp::Write(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

#[cfg(test)]
pub struct MockWire {
    // Data arriving from the controller (None = nothing waiting on this poll)
    arrivals: std::collections::VecDeque<Option<Vec<u8>>>,
    log: MockLog,
}

#[cfg(test)]
impl MockWire {
    pub fn new(arrivals: Vec<Option<Vec<u8>>>) -> Self {
        MockWire {
            arrivals: arrivals.into(),
            log: MockLog::default(),
        }
    }

    pub fn log(&self) -> MockLog {
        self.log.clone()
    }
}

#[cfg(test)]
impl Wire for MockWire {
    fn bytes_available(&mut self) -> std::io::Result<bool> {
        match self.arrivals.front() {
            Some(Some(_)) => Ok(true),
            Some(None) => {
                self.arrivals.pop_front();
                Ok(false)
            }
            None => Ok(false),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let Some(Some(mut bytes)) = self.arrivals.pop_front() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Mock timeout",
            ));
        };

        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        let rest = bytes.split_off(n);
        if !rest.is_empty() {
            self.arrivals.push_front(Some(rest));
        }

        self.log.ops.lock().push(WireOp::Read(bytes));
        Ok(n)
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.log.ops.lock().push(WireOp::Write(buf.to_vec()));
        Ok(())
    }

    fn shutdown(&mut self) -> std::io::Result<()> {
        self.log.ops.lock().push(WireOp::Shutdown);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_ascii_coding() {
        assert_eq!(decode_ascii(b"G01 X1.0\n"), "G01 X1.0\n");
        assert_eq!(decode_ascii(&[b'A', 0xC3, b'B']), "A?B");
        assert_eq!(encode_ascii("O1234 (TEST\u{00e9})"), b"O1234 (TEST?)".to_vec());
    }

    #[test]
    fn test_mock_read_splits_arrivals() {
        let mut wire = MockWire::new(vec![None, Some(b"abcdef".to_vec())]);
        let log = wire.log();

        assert!(!wire.bytes_available().unwrap());
        assert!(wire.bytes_available().unwrap());

        let mut buf = [0u8; 4];
        assert_eq!(wire.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert!(wire.bytes_available().unwrap());
        assert_eq!(wire.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert!(!wire.bytes_available().unwrap());

        assert_eq!(
            log.ops(),
            vec![WireOp::Read(b"abcd".to_vec()), WireOp::Read(b"ef".to_vec())]
        );
    }

    #[test]
    fn test_poll_code() {
        let transport = Transport::new(Box::new(MockWire::new(vec![
            None,
            Some(vec![0x11, b'x']),
        ])));

        assert_eq!(transport.poll_code().unwrap(), None);
        assert_eq!(transport.poll_code().unwrap(), Some(0x11));
        assert_eq!(transport.poll_code().unwrap(), Some(b'x'));
        assert_eq!(transport.poll_code().unwrap(), None);
        assert!(!transport.is_busy());
    }

    #[test]
    fn test_tcp_wire_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Should bind");
        let port = listener.local_addr().unwrap().port();

        let peer = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("Should accept");
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).expect("Should read");
            stream.write_all(b"%\nOK").expect("Should write");
            buf
        });

        let wire = TcpWire::connect("127.0.0.1", port, Duration::from_secs(5))
            .expect("Should connect");
        let transport = Transport::new(Box::new(wire));
        transport.send_text("O0001").expect("Should send");

        let mut available = false;
        for _ in 0..100 {
            if transport.bytes_available().expect("Should poll") {
                available = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(available, "Peer data should arrive");
        std::thread::sleep(Duration::from_millis(20));

        let text = transport.read_chunk(16).expect("Should read");
        assert_eq!(text, "%\nOK");
        assert_eq!(&peer.join().unwrap(), b"O0001");

        transport.shutdown().expect("Should shut down");
    }

    #[test]
    fn test_tcp_peer_close_is_end_of_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Should bind");
        let port = listener.local_addr().unwrap().port();

        let peer = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("Should accept");
            stream.write_all(b"\x13").expect("Should write");
        });

        let wire = TcpWire::connect("127.0.0.1", port, Duration::from_secs(5))
            .expect("Should connect");
        let transport = Transport::new(Box::new(wire));
        peer.join().unwrap();

        let mut codes = Vec::new();
        let mut outcome = None;
        for _ in 0..100 {
            match transport.poll_code() {
                Ok(Some(code)) => codes.push(code),
                Ok(None) => std::thread::sleep(Duration::from_millis(10)),
                Err(e) => {
                    outcome = Some(e);
                    break;
                }
            }
        }

        assert_eq!(codes, vec![0x13]);
        assert!(matches!(outcome, Some(DncError::ConnectionClosed)));
    }

    #[test]
    fn test_poll_code_read_of_zero_is_closed() {
        let transport = Transport::new(Box::new(MockWire::new(vec![Some(vec![])])));
        assert!(matches!(transport.poll_code(), Err(DncError::ConnectionClosed)));
    }
}
