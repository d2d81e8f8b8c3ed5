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

//! Error types for both ends of the link.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use crate::checksum::Diagnostic;

/// Protocol phase an acknowledgment belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Size,
    Data,
    Result,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Size => write!(f, "size"),
            Phase::Data => write!(f, "data"),
            Phase::Result => write!(f, "result"),
        }
    }
}

/// Errors that end a host-side transfer.
#[derive(Debug, Error)]
pub enum SenderError {
    /// Local file could not be stat'd, opened or read.
    #[error("cannot read {}: {source}", .path.display())]
    LocalFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{phase} checksum mismatch: local 0x{expected:02X} != 0x{received:02X} received")]
    ChecksumMismatch {
        phase: Phase,
        expected: u8,
        received: u8,
        diagnostic: Diagnostic,
    },

    /// Device sent fewer bytes than an ack or result code needs.
    #[error("short read in {phase} phase: expected {expected} bytes, got {}", .diagnostic.raw.len())]
    ShortRead {
        phase: Phase,
        expected: usize,
        diagnostic: Diagnostic,
    },

    #[error("remote file write failed: {code}")]
    RemoteWriteFailure { code: u32 },

    /// Transport failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transfer complete")]
    TransferComplete { bytes_sent: u64 },
}

impl SenderError {
    /// Even/odd split of the last bytes read, for failed acknowledgments.
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            SenderError::ChecksumMismatch { diagnostic, .. } => Some(diagnostic),
            SenderError::ShortRead { diagnostic, .. } => Some(diagnostic),
            _ => None,
        }
    }
}

/// Errors that end a device-side transfer.
#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {received} of {expected} data bytes")]
    Timeout { received: u64, expected: u64 },

    #[error("Transfer complete")]
    TransferComplete { bytes_received: u64, result: u32 },
}
