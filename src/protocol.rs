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

//! XORLINK protocol constants and field encoding
//!
//! Wire sequence, host to device:
//!
//! ```text
//! host -> device: size      (4 bytes, little-endian)
//! device -> host: size-ack  (1 byte, checksum of the size field)
//! host -> device: data      (size bytes)
//! device -> host: data-ack  (1 byte, checksum of the data field)
//! device -> host: result    (4 bytes, little-endian, 0 = written)
//! ```

/// Seed of the running XOR checksum, restored at the start of every phase
pub const CHECKSUM_INIT: u8 = 0x23;

/// Local read size used while streaming file contents
pub const CHUNK_SIZE: usize = 4096;

/// Width of the size and result fields
pub const INT_FIELD_LEN: usize = 4;

/// Width of a checksum acknowledgment
pub const ACK_LEN: usize = 1;

/// Result code reported by the device when the file was written
pub const RESULT_OK: u32 = 0;

/// Result code: device could not create the output file
pub const RESULT_CREATE_FAILED: u32 = 1;

/// Result code: device failed while writing the output file
pub const RESULT_WRITE_FAILED: u32 = 2;

/// Encode the low 32 bits of `value`, least-significant byte first.
pub fn encode_u32(value: u64) -> [u8; INT_FIELD_LEN] {
    (value as u32).to_le_bytes()
}

/// Decode a little-endian field. Returns `None` unless `data` is exactly
/// four bytes long.
pub fn decode_u32(data: &[u8]) -> Option<u32> {
    let field: [u8; INT_FIELD_LEN] = data.try_into().ok()?;
    Some(u32::from_le_bytes(field))
}

/// Fold `data` into a running checksum.
pub fn fold_checksum(checksum: u8, data: &[u8]) -> u8 {
    data.iter().fold(checksum, |acc, &b| acc ^ b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_little_endian() {
        assert_eq!(encode_u32(0), [0, 0, 0, 0]);
        assert_eq!(encode_u32(10000), [0x10, 0x27, 0x00, 0x00]);
        assert_eq!(encode_u32(0x0403_0201), [0x01, 0x02, 0x03, 0x04]);
        assert_eq!(encode_u32(u32::MAX as u64), [0xFF; 4]);
    }

    #[test]
    fn test_encode_drops_high_bits() {
        assert_eq!(encode_u32(0x1_0000_0005), [0x05, 0, 0, 0]);
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        assert_eq!(decode_u32(&[]), None);
        assert_eq!(decode_u32(&[0x05, 0x00]), None);
        assert_eq!(decode_u32(&[0x05, 0x00, 0x00, 0x00, 0x00]), None);
        assert_eq!(decode_u32(&[0x05, 0x00, 0x00, 0x00]), Some(5));
    }

    #[test]
    fn test_fold_checksum() {
        assert_eq!(fold_checksum(CHECKSUM_INIT, &[]), CHECKSUM_INIT);
        assert_eq!(fold_checksum(CHECKSUM_INIT, &[0x23]), 0);
        assert_eq!(fold_checksum(0, &[0x01, 0x02, 0x03]), 0);
    }

    proptest! {
        #[test]
        fn test_u32_roundtrip(value: u32) {
            prop_assert_eq!(decode_u32(&encode_u32(value as u64)), Some(value));
        }
    }
}
