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

use std::time::Duration;
use serialport::{SerialPort as SerialPortTrait, DataBits, Parity, StopBits};

// ============================================================================
// SerialPort Trait
// ============================================================================

/// Byte channel used by both ends of the xorlink protocol.
///
/// `read_timeout` may return fewer bytes than `buf` holds. A read that sees
/// no data before `timeout` fails with `ErrorKind::TimedOut`.
pub trait SerialPort: Send {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize>;
}

// ============================================================================
// Physical Port
// ============================================================================

/// Host side of the link: a tty or COM device opened through `serialport`.
pub struct RealSerialPort {
    port: Box<dyn SerialPortTrait>,
}

impl RealSerialPort {
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        data_bits: DataBits,
        parity: Parity,
        stop_bits: StopBits,
        timeout: Duration,
    ) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(timeout)
            .open()?;

        Ok(RealSerialPort { port })
    }
}

impl SerialPort for RealSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.port.write_all(buf)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        self.port.set_timeout(timeout)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        self.port.read(buf)
    }
}

// ============================================================================
// Scripted Device for Tests
// ============================================================================

/// Plays back a device's replies and checks everything the host sent.
///
/// `None` in the script is one timed-out read. Reads past the end of the
/// script also time out but are counted, and dropping the port fails if any
/// happened, so tests prove the host stopped reading when it should have.
#[cfg(test)]
pub struct MockSerialPort {
    script: Vec<Option<u8>>,
    script_pos: usize,
    reads_past_script: usize,
    sent: Vec<u8>,
    sent_calls: Vec<usize>,
    expected_sent: Vec<u8>,
    expected_sent_calls: Option<Vec<usize>>,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn new(responses: Vec<Option<u8>>, expected_writes: Vec<u8>) -> Self {
        MockSerialPort {
            script: responses,
            script_pos: 0,
            reads_past_script: 0,
            sent: Vec::new(),
            sent_calls: Vec::new(),
            expected_sent: expected_writes,
            expected_sent_calls: None,
        }
    }

    /// Also check how the host split its bytes across `write_all` calls.
    pub fn with_write_calls(mut self, calls: Vec<usize>) -> Self {
        self.expected_sent_calls = Some(calls);
        self
    }
}

#[cfg(test)]
impl SerialPort for MockSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.sent.extend_from_slice(buf);
        self.sent_calls.push(buf.len());
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> std::io::Result<usize> {
        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "device silent");

        if self.script_pos >= self.script.len() {
            self.reads_past_script += 1;
            return Err(timed_out);
        }

        if self.script[self.script_pos].is_none() {
            self.script_pos += 1;
            return Err(timed_out);
        }

        // Deliver reply bytes up to the next silence or the end of `buf`.
        let mut delivered = 0;
        while delivered < buf.len() {
            match self.script.get(self.script_pos) {
                Some(Some(byte)) => {
                    buf[delivered] = *byte;
                    delivered += 1;
                    self.script_pos += 1;
                }
                _ => break,
            }
        }

        Ok(delivered)
    }
}

#[cfg(test)]
impl Drop for MockSerialPort {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert_eq!(
            self.script_pos,
            self.script.len(),
            "device script not fully consumed: {} of {} replies left",
            self.script.len() - self.script_pos,
            self.script.len()
        );

        assert_eq!(
            self.reads_past_script, 0,
            "host issued {} read(s) after the device script ended",
            self.reads_past_script
        );

        assert_eq!(
            &self.sent,
            &self.expected_sent,
            "host sent the wrong bytes\nexpected {} bytes:\n{:02X?}\ngot {} bytes:\n{:02X?}",
            self.expected_sent.len(),
            self.expected_sent,
            self.sent.len(),
            self.sent
        );

        if let Some(expected) = &self.expected_sent_calls {
            assert_eq!(&self.sent_calls, expected, "host split its writes differently");
        }
    }
}

// ============================================================================
// In-memory Link for Loopback Tests
// ============================================================================

#[cfg(test)]
pub struct PipeSerialPort {
    tx: std::sync::mpsc::Sender<Vec<u8>>,
    rx: std::sync::mpsc::Receiver<Vec<u8>>,
    pending: std::collections::VecDeque<u8>,
}

/// Two connected ports: bytes written to one are read from the other.
#[cfg(test)]
pub fn pipe() -> (PipeSerialPort, PipeSerialPort) {
    let (a_tx, b_rx) = std::sync::mpsc::channel();
    let (b_tx, a_rx) = std::sync::mpsc::channel();
    let a = PipeSerialPort { tx: a_tx, rx: a_rx, pending: Default::default() };
    let b = PipeSerialPort { tx: b_tx, rx: b_rx, pending: Default::default() };
    (a, b)
}

#[cfg(test)]
impl SerialPort for PipeSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.tx.send(buf.to_vec())
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "Pipe closed"))
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        use std::sync::mpsc::RecvTimeoutError;

        if self.pending.is_empty() {
            match self.rx.recv_timeout(timeout) {
                Ok(data) => self.pending.extend(data),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "Pipe timeout"));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "Pipe closed"));
                }
            }
        }

        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}
