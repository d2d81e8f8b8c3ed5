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

use std::fmt;
use std::time::{Duration, Instant};
use crate::serial::SerialPort;
use crate::protocol::{fold_checksum, CHECKSUM_INIT};

// ============================================================================
// Checksum Stream
// ============================================================================

/// Serial wrapper that keeps a running XOR over everything it writes.
///
/// Reads are passed through untouched. The bytes returned by the most recent
/// read are kept so they can be shown after a failed acknowledgment.
pub struct ChecksumStream<'a> {
    serial: &'a mut dyn SerialPort,
    timeout: Duration,
    checksum: u8,
    read_buf: Vec<u8>,
}

impl<'a> ChecksumStream<'a> {
    /// Wrap a port for one transfer. The port stays owned by the caller.
    pub fn new(serial: &'a mut dyn SerialPort, timeout: Duration) -> Self {
        ChecksumStream {
            serial,
            timeout,
            checksum: CHECKSUM_INIT,
            read_buf: Vec::new(),
        }
    }

    /// Start a new checksum epoch.
    pub fn reset_checksum(&mut self) {
        self.checksum = CHECKSUM_INIT;
        self.read_buf.clear();
    }

    pub fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.serial.write_all(data)?;
        self.checksum = fold_checksum(self.checksum, data);
        Ok(())
    }

    /// Read up to `size` bytes, waiting at most the stream timeout in total.
    ///
    /// A timeout ends the read early and returns what arrived so far; only
    /// other transport errors are reported.
    pub fn read(&mut self, size: usize) -> std::io::Result<&[u8]> {
        let mut data = vec![0u8; size];
        let mut filled = 0;
        let deadline = Instant::now() + self.timeout;

        while filled < size {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.serial.read_timeout(&mut data[filled..], remaining) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e),
            }
            if remaining.is_zero() {
                break;
            }
        }

        data.truncate(filled);
        self.read_buf = data;
        Ok(&self.read_buf)
    }

    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    pub fn read_buf(&self) -> &[u8] {
        &self.read_buf
    }

    pub fn diagnostic(&self) -> Diagnostic {
        Diagnostic::split(&self.read_buf)
    }
}

// ============================================================================
// Diagnostic Split
// ============================================================================

/// The last read buffer split into even- and odd-indexed bytes.
///
/// Some links double or interleave bytes; reading every other byte often
/// recovers a readable message from the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostic {
    pub raw: Vec<u8>,
    pub even: Vec<u8>,
    pub odd: Vec<u8>,
}

impl Diagnostic {
    pub fn split(raw: &[u8]) -> Self {
        let even = raw.iter().step_by(2).copied().collect();
        let odd = raw.iter().skip(1).step_by(2).copied().collect();
        Diagnostic { raw: raw.to_vec(), even, odd }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "last read: {:02X?}", self.raw)?;
        writeln!(f, "possible interpretation:")?;
        writeln!(f, "---------")?;
        writeln!(f, "{}", String::from_utf8_lossy(&self.even))?;
        writeln!(f, "---------")?;
        writeln!(f, "{}", String::from_utf8_lossy(&self.odd))?;
        write!(f, "---------")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::MockSerialPort;
    use proptest::prelude::*;

    const TIMEOUT: Duration = Duration::from_millis(50);

    #[test]
    fn test_new_stream_starts_at_seed() {
        let mut mock = MockSerialPort::new(vec![], vec![]);
        let s = ChecksumStream::new(&mut mock, TIMEOUT);
        assert_eq!(s.checksum(), CHECKSUM_INIT);
        assert!(s.read_buf().is_empty());
    }

    #[test]
    fn test_write_forwards_and_folds() {
        let mut mock = MockSerialPort::new(vec![], vec![0x01, 0x02, 0x03]);
        let mut s = ChecksumStream::new(&mut mock, TIMEOUT);
        s.write(&[0x01, 0x02, 0x03]).unwrap();
        assert_eq!(s.checksum(), CHECKSUM_INIT ^ 0x01 ^ 0x02 ^ 0x03);
    }

    #[test]
    fn test_checksum_independent_of_write_boundaries() {
        let mut whole_port = MockSerialPort::new(vec![], vec![0x01, 0x02, 0x03]);
        let mut whole = ChecksumStream::new(&mut whole_port, TIMEOUT);
        whole.write(&[0x01, 0x02, 0x03]).unwrap();

        let mut split_port = MockSerialPort::new(vec![], vec![0x01, 0x02, 0x03]);
        let mut split = ChecksumStream::new(&mut split_port, TIMEOUT);
        split.write(&[0x01]).unwrap();
        split.write(&[0x02, 0x03]).unwrap();

        assert_eq!(whole.checksum(), split.checksum());
    }

    #[test]
    fn test_reset_restores_seed_and_clears_cache() {
        let mut mock = MockSerialPort::new(vec![Some(0xAA)], vec![0x5A, 0x77]);
        let mut s = ChecksumStream::new(&mut mock, TIMEOUT);
        s.write(&[0x5A, 0x77]).unwrap();
        s.read(1).unwrap();
        assert_ne!(s.checksum(), CHECKSUM_INIT);
        assert_eq!(s.read_buf(), &[0xAA]);

        s.reset_checksum();
        assert_eq!(s.checksum(), CHECKSUM_INIT);
        assert!(s.read_buf().is_empty());
    }

    #[test]
    fn test_read_does_not_touch_checksum() {
        let mut mock = MockSerialPort::new(vec![Some(0x10), Some(0x20)], vec![]);
        let mut s = ChecksumStream::new(&mut mock, TIMEOUT);
        assert_eq!(s.read(2).unwrap(), &[0x10, 0x20]);
        assert_eq!(s.checksum(), CHECKSUM_INIT);
    }

    #[test]
    fn test_read_gathers_across_partial_reads() {
        let (mut host, mut device) = crate::serial::pipe();
        device.write_all(&[1, 2]).unwrap();
        device.write_all(&[3, 4]).unwrap();

        let mut s = ChecksumStream::new(&mut host, Duration::from_millis(200));
        assert_eq!(s.read(4).unwrap(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_short_read_on_timeout() {
        let mut mock = MockSerialPort::new(vec![Some(0x05), Some(0x00), None], vec![]);
        let mut s = ChecksumStream::new(&mut mock, TIMEOUT);
        assert_eq!(s.read(4).unwrap(), &[0x05, 0x00]);
        assert_eq!(s.read_buf(), &[0x05, 0x00]);
    }

    #[test]
    fn test_read_replaces_cache() {
        let mut mock = MockSerialPort::new(vec![Some(1), Some(2), Some(3)], vec![]);
        let mut s = ChecksumStream::new(&mut mock, TIMEOUT);
        s.read(2).unwrap();
        s.read(1).unwrap();
        assert_eq!(s.read_buf(), &[3]);
    }

    #[test]
    fn test_stream_leaves_port_with_caller() {
        let mut mock = MockSerialPort::new(vec![], vec![0x11, 0x22]);
        {
            let mut s = ChecksumStream::new(&mut mock, TIMEOUT);
            s.write(&[0x11]).unwrap();
        }
        let mut s = ChecksumStream::new(&mut mock, TIMEOUT);
        s.write(&[0x22]).unwrap();
        assert_eq!(s.checksum(), CHECKSUM_INIT ^ 0x22);
    }

    #[test]
    fn test_diagnostic_split() {
        let d = Diagnostic::split(b"hHeElLlLoO");
        assert_eq!(d.even, b"hello");
        assert_eq!(d.odd, b"HELLO");

        let d = Diagnostic::split(b"abc");
        assert_eq!(d.even, b"ac");
        assert_eq!(d.odd, b"b");

        assert_eq!(Diagnostic::split(&[]), Diagnostic::default());
    }

    proptest! {
        #[test]
        fn test_checksum_matches_xor_of_all_writes(
            chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..32), 0..8)
        ) {
            let all: Vec<u8> = chunks.concat();
            let mut mock = MockSerialPort::new(vec![], all.clone());
            let mut s = ChecksumStream::new(&mut mock, TIMEOUT);
            for chunk in &chunks {
                s.write(chunk).unwrap();
            }
            let expected = all.iter().fold(CHECKSUM_INIT, |acc, &b| acc ^ b);
            prop_assert_eq!(s.checksum(), expected);
        }
    }
}
