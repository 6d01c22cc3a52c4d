//! The byte-level half-duplex serial endpoint.
//!
//! `SerialTransport` is a deliberately thin boundary: OS port enumeration
//! and the actual read/write syscalls live outside this crate's core.
//! [`RealTransport`] is a thin adapter over the `serialport` crate;
//! [`crate::bus`]'s tests use an in-process fake instead.

use std::io;
use std::time::Duration;

/// A single half-duplex serial endpoint. Implementations are not required
/// to be thread-safe on their own; [`crate::bus::BusArbiter`] serializes all
/// access with a single lock.
pub trait SerialTransport: Send {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Read exactly `buf.len()` bytes, or return `io::ErrorKind::TimedOut`
    /// if they do not arrive within `timeout`.
    fn read_exact_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<()>;

    /// Discard any bytes sitting in the input buffer (used before sending a
    /// new instruction, so a stale reply from a prior timed-out transaction
    /// cannot be mistaken for the next one's).
    fn clear_input(&mut self);
}

/// Adapter over a `Box<dyn serialport::SerialPort>`.
pub struct RealTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl RealTransport {
    pub fn open(path: &str, baud: u32) -> Result<Self, serialport::Error> {
        let port = serialport::new(path, baud)
            .timeout(Duration::from_millis(10))
            .open()?;
        Ok(Self { port })
    }
}

impl SerialTransport for RealTransport {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        io::Write::write_all(&mut self.port, buf)
    }

    fn read_exact_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<()> {
        self.port
            .set_timeout(timeout)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        io::Read::read_exact(&mut self.port, buf)
    }

    fn clear_input(&mut self) {
        let _ = self.port.clear(serialport::ClearBuffer::Input);
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::VecDeque;

    /// An in-process transport that echoes pre-programmed replies and
    /// records every frame written to it, for deterministic Bus Arbiter and
    /// Motion Engine tests.
    pub struct FakeTransport {
        pub written: Vec<Vec<u8>>,
        pub replies: VecDeque<FakeReply>,
    }

    pub enum FakeReply {
        Bytes(Vec<u8>),
        Timeout,
    }

    impl FakeTransport {
        pub fn new() -> Self {
            Self {
                written: Vec::new(),
                replies: VecDeque::new(),
            }
        }

        pub fn push_reply(&mut self, bytes: Vec<u8>) {
            self.replies.push_back(FakeReply::Bytes(bytes));
        }

        pub fn push_timeout(&mut self) {
            self.replies.push_back(FakeReply::Timeout);
        }
    }

    impl SerialTransport for FakeTransport {
        fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            self.written.push(buf.to_vec());
            Ok(())
        }

        fn read_exact_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<()> {
            match self.replies.pop_front() {
                Some(FakeReply::Bytes(bytes)) => {
                    if bytes.len() < buf.len() {
                        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short reply"));
                    }
                    buf.copy_from_slice(&bytes[..buf.len()]);
                    // Put back any trailing bytes for a second read call
                    // within the same transaction (header vs. body reads).
                    if bytes.len() > buf.len() {
                        self.replies
                            .push_front(FakeReply::Bytes(bytes[buf.len()..].to_vec()));
                    }
                    Ok(())
                }
                Some(FakeReply::Timeout) | None => {
                    Err(io::Error::new(io::ErrorKind::TimedOut, "no reply"))
                }
            }
        }

        fn clear_input(&mut self) {}
    }
}
