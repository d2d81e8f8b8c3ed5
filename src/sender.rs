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

use std::marker::PhantomData;
use std::fs::File;
use std::path::PathBuf;
use std::io::Read;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use crate::checksum::ChecksumStream;
use crate::error::{Phase, SenderError};
use crate::progress::Progress;
use crate::serial::SerialPort;
use crate::protocol::*;

// ============================================================================
// States
// ============================================================================

pub struct SendSize;
pub struct WaitSizeAck;
pub struct StreamData;
pub struct WaitDataAck;
pub struct WaitResult;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct SenderFsm<'a, State> {
    state: PhantomData<State>,
    stream: ChecksumStream<'a>,
    path: PathBuf,
    file_size: u64,
    current_file: Option<File>,
    buffer: Vec<u8>,
    bytes_sent: u64,
    progress: Option<Progress>,
    show_progress: bool,
}

// ============================================================================
// Trait
// ============================================================================

pub trait SenderState<'a>: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState<'a> + 'a>, SenderError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<'a, S> SenderFsm<'a, S> {
    fn transition<T>(self) -> Box<SenderFsm<'a, T>> {
        Box::new(SenderFsm {
            state: PhantomData,
            stream: self.stream,
            path: self.path,
            file_size: self.file_size,
            current_file: self.current_file,
            buffer: self.buffer,
            bytes_sent: self.bytes_sent,
            progress: self.progress,
            show_progress: self.show_progress,
        })
    }

    fn io_error(&self, e: std::io::Error) -> SenderError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        SenderError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }

    fn local_error(&self, source: std::io::Error) -> SenderError {
        SenderError::LocalFile { path: self.path.clone(), source }
    }

    /// Read one acknowledgment byte and compare it with the local checksum.
    fn verify_ack(&mut self, phase: Phase) -> Result<(), SenderError> {
        let expected = self.stream.checksum();
        let received = match self.stream.read(ACK_LEN).map(|data| data.first().copied()) {
            Ok(received) => received,
            Err(e) => return Err(self.io_error(e)),
        };

        match received {
            Some(received) if received == expected => {
                debug!("{} ack OK (0x{:02X})", phase, received);
                Ok(())
            }
            Some(received) => {
                error!("{} ack mismatch: local 0x{:02X}, received 0x{:02X}", phase, expected, received);
                Err(SenderError::ChecksumMismatch {
                    phase,
                    expected,
                    received,
                    diagnostic: self.stream.diagnostic(),
                })
            }
            None => {
                error!("{} ack timed out", phase);
                Err(SenderError::ShortRead {
                    phase,
                    expected: ACK_LEN,
                    diagnostic: self.stream.diagnostic(),
                })
            }
        }
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl<'a> SenderState<'a> for SenderFsm<'a, SendSize> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState<'a> + 'a>, SenderError> {
        let mut fsm = *self;

        let metadata = std::fs::metadata(&fsm.path).and_then(|m| {
            if m.is_file() {
                Ok(m)
            } else {
                Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"))
            }
        });

        let metadata = match metadata {
            Ok(m) => m,
            Err(e) => {
                // Zero size tells the device there is no file coming.
                fsm.stream.write(&encode_u32(0)).map_err(|e| fsm.io_error(e))?;
                debug!("Sent: size 0 (no file)");
                return Err(fsm.local_error(e));
            }
        };

        fsm.file_size = metadata.len();
        if fsm.file_size > u32::MAX as u64 {
            warn!("{} bytes does not fit the size field, sending low 32 bits", fsm.file_size);
        }

        info!("writing size: {} ...", fsm.file_size);
        fsm.stream.reset_checksum();
        fsm.stream.write(&encode_u32(fsm.file_size)).map_err(|e| fsm.io_error(e))?;
        debug!("Sent: size field, checksum 0x{:02X}", fsm.stream.checksum());

        let next = fsm.transition::<WaitSizeAck>();
        Ok(next as Box<dyn SenderState<'a> + 'a>)
    }
}

impl<'a> SenderState<'a> for SenderFsm<'a, WaitSizeAck> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState<'a> + 'a>, SenderError> {
        let mut fsm = *self;
        fsm.verify_ack(Phase::Size)?;

        fsm.current_file = Some(File::open(&fsm.path).map_err(|e| fsm.local_error(e))?);
        fsm.stream.reset_checksum();
        if fsm.show_progress {
            fsm.progress = Some(Progress::new(fsm.file_size));
        }

        info!("writing data ...");
        let next = fsm.transition::<StreamData>();
        Ok(next as Box<dyn SenderState<'a> + 'a>)
    }
}

impl<'a> SenderState<'a> for SenderFsm<'a, StreamData> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState<'a> + 'a>, SenderError> {
        let mut fsm = *self;

        let bytes_read = match fsm.current_file {
            Some(ref mut file) => file.read(&mut fsm.buffer),
            None => Ok(0),
        };
        let bytes_read = bytes_read.map_err(|e| fsm.local_error(e))?;

        if bytes_read == 0 {
            fsm.current_file = None;
            if let Some(progress) = fsm.progress.take() {
                progress.finish();
            }
            debug!("Sent: {} data bytes, checksum 0x{:02X}", fsm.bytes_sent, fsm.stream.checksum());
            let next = fsm.transition::<WaitDataAck>();
            return Ok(next as Box<dyn SenderState<'a> + 'a>);
        }

        fsm.stream.write(&fsm.buffer[..bytes_read]).map_err(|e| fsm.io_error(e))?;
        fsm.bytes_sent += bytes_read as u64;
        if let Some(progress) = fsm.progress.as_mut() {
            progress.advance(bytes_read as u64);
        }

        Ok(Box::new(fsm) as Box<dyn SenderState<'a> + 'a>)
    }
}

impl<'a> SenderState<'a> for SenderFsm<'a, WaitDataAck> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState<'a> + 'a>, SenderError> {
        let mut fsm = *self;
        fsm.verify_ack(Phase::Data)?;
        info!("{}/{} bytes written.", fsm.bytes_sent, fsm.file_size);
        let next = fsm.transition::<WaitResult>();
        Ok(next as Box<dyn SenderState<'a> + 'a>)
    }
}

impl<'a> SenderState<'a> for SenderFsm<'a, WaitResult> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState<'a> + 'a>, SenderError> {
        let mut fsm = *self;

        let code = match fsm.stream.read(INT_FIELD_LEN).map(decode_u32) {
            Ok(code) => code,
            Err(e) => return Err(fsm.io_error(e)),
        };

        match code {
            Some(RESULT_OK) => {
                info!("file write succeed");
                Err(SenderError::TransferComplete { bytes_sent: fsm.bytes_sent })
            }
            Some(code) => {
                error!("file write failed: {}", code);
                Err(SenderError::RemoteWriteFailure { code })
            }
            None => {
                error!("result code truncated after {} bytes", fsm.stream.read_buf().len());
                Err(SenderError::ShortRead {
                    phase: Phase::Result,
                    expected: INT_FIELD_LEN,
                    diagnostic: fsm.stream.diagnostic(),
                })
            }
        }
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl<'a> SenderFsm<'a, SendSize> {
    pub fn new(serial: &'a mut dyn SerialPort, path: PathBuf, timeout: Duration, show_progress: bool) -> Box<dyn SenderState<'a> + 'a> {
        Box::new(SenderFsm {
            state: PhantomData::<SendSize>,
            stream: ChecksumStream::new(serial, timeout),
            path,
            file_size: 0,
            current_file: None,
            buffer: vec![0; CHUNK_SIZE],
            bytes_sent: 0,
            progress: None,
            show_progress,
        })
    }
}

/// Send one file and return the number of data bytes written to the link.
///
/// The port is only borrowed, so a failed transfer can be retried on it.
pub fn send_file(serial: &mut dyn SerialPort, path: PathBuf, timeout: Duration, show_progress: bool) -> Result<u64, SenderError> {
    let mut state = SenderFsm::new(serial, path, timeout, show_progress);

    loop {
        match state.step() {
            Ok(next_state) => {
                state = next_state;
            }
            Err(SenderError::TransferComplete { bytes_sent }) => {
                return Ok(bytes_sent);
            }
            Err(e) => {
                return Err(e);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
