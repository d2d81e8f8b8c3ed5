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
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use crate::error::ReceiverError;
use crate::serial::SerialPort;
use crate::protocol::*;

// ============================================================================
// Outcome
// ============================================================================

/// Outcome reported back to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    pub bytes: u64,
    pub result: u32,
}

// ============================================================================
// States
// ============================================================================

pub struct WaitSize;
pub struct ReceiveData;
pub struct SendDataAck;
pub struct SendResult;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct ReceiverFsm<'a, State> {
    state: PhantomData<State>,
    serial: &'a mut dyn SerialPort,
    output: PathBuf,
    timeout: Duration,
    current_file: Option<File>,
    size_buffer: [u8; INT_FIELD_LEN],
    size_idx: usize,
    block_buffer: Vec<u8>,
    file_size: u64,
    bytes_received: u64,
    checksum: u8,
    result: u32,
}

// ============================================================================
// Trait
// ============================================================================

pub trait ReceiverState<'a>: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState<'a> + 'a>, ReceiverError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<'a, S> ReceiverFsm<'a, S> {
    fn transition<T>(self) -> Box<ReceiverFsm<'a, T>> {
        Box::new(ReceiverFsm {
            state: PhantomData,
            serial: self.serial,
            output: self.output,
            timeout: self.timeout,
            current_file: self.current_file,
            size_buffer: self.size_buffer,
            size_idx: self.size_idx,
            block_buffer: self.block_buffer,
            file_size: self.file_size,
            bytes_received: self.bytes_received,
            checksum: self.checksum,
            result: self.result,
        })
    }

    fn io_error(&self, e: std::io::Error) -> ReceiverError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        ReceiverError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl<'a> ReceiverState<'a> for ReceiverFsm<'a, WaitSize> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState<'a> + 'a>, ReceiverError> {
        let mut fsm = *self;

        let idx = fsm.size_idx;
        match fsm.serial.read_timeout(&mut fsm.size_buffer[idx..], fsm.timeout) {
            Ok(n) => fsm.size_idx += n,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                if fsm.size_idx == 0 {
                    debug!("Sender not ready");
                }
            }
            Err(e) => return Err(fsm.io_error(e)),
        }

        if fsm.size_idx < INT_FIELD_LEN {
            return Ok(Box::new(fsm) as Box<dyn ReceiverState<'a> + 'a>);
        }

        fsm.file_size = u64::from(u32::from_le_bytes(fsm.size_buffer));
        let ack = fold_checksum(CHECKSUM_INIT, &fsm.size_buffer);
        fsm.serial.write_all(&[ack]).map_err(|e| fsm.io_error(e))?;
        info!("Receiving {} bytes", fsm.file_size);
        debug!("Sent: size ack 0x{:02X}", ack);

        match File::create(&fsm.output) {
            Ok(file) => {
                debug!("Created: {:?}", fsm.output);
                fsm.current_file = Some(file);
            }
            Err(e) => {
                warn!("Cannot create {:?}: {}", fsm.output, e);
                fsm.result = RESULT_CREATE_FAILED;
            }
        }

        fsm.checksum = CHECKSUM_INIT;
        let next = fsm.transition::<ReceiveData>();
        Ok(next as Box<dyn ReceiverState<'a> + 'a>)
    }
}

impl<'a> ReceiverState<'a> for ReceiverFsm<'a, ReceiveData> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState<'a> + 'a>, ReceiverError> {
        let mut fsm = *self;

        let remaining = fsm.file_size - fsm.bytes_received;
        if remaining == 0 {
            let next = fsm.transition::<SendDataAck>();
            return Ok(next as Box<dyn ReceiverState<'a> + 'a>);
        }

        let want = remaining.min(fsm.block_buffer.len() as u64) as usize;
        let n = match fsm.serial.read_timeout(&mut fsm.block_buffer[..want], fsm.timeout) {
            Ok(0) => 0,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => 0,
            Err(e) => return Err(fsm.io_error(e)),
        };

        if n == 0 {
            return Err(ReceiverError::Timeout {
                received: fsm.bytes_received,
                expected: fsm.file_size,
            });
        }

        let data = &fsm.block_buffer[..n];
        fsm.checksum = fold_checksum(fsm.checksum, data);
        fsm.bytes_received += n as u64;

        // Keep draining the link after a write failure so the acks stay in step.
        let written = match fsm.current_file {
            Some(ref mut file) => file.write_all(data),
            None => Ok(()),
        };
        if let Err(e) = written {
            warn!("Write to {:?} failed: {}", fsm.output, e);
            fsm.current_file = None;
            fsm.result = RESULT_WRITE_FAILED;
        }

        Ok(Box::new(fsm) as Box<dyn ReceiverState<'a> + 'a>)
    }
}

impl<'a> ReceiverState<'a> for ReceiverFsm<'a, SendDataAck> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState<'a> + 'a>, ReceiverError> {
        let mut fsm = *self;

        if let Some(file) = fsm.current_file.take() {
            if let Err(e) = file.sync_all() {
                warn!("Sync of {:?} failed: {}", fsm.output, e);
                fsm.result = RESULT_WRITE_FAILED;
            }
        }

        fsm.serial.write_all(&[fsm.checksum]).map_err(|e| fsm.io_error(e))?;
        debug!("Sent: data ack 0x{:02X}", fsm.checksum);

        let next = fsm.transition::<SendResult>();
        Ok(next as Box<dyn ReceiverState<'a> + 'a>)
    }
}

impl<'a> ReceiverState<'a> for ReceiverFsm<'a, SendResult> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState<'a> + 'a>, ReceiverError> {
        let mut fsm = *self;
        fsm.serial.write_all(&encode_u32(fsm.result as u64)).map_err(|e| fsm.io_error(e))?;
        debug!("Sent: result {}", fsm.result);

        Err(ReceiverError::TransferComplete {
            bytes_received: fsm.bytes_received,
            result: fsm.result,
        })
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl<'a> ReceiverFsm<'a, WaitSize> {
    pub fn new(serial: &'a mut dyn SerialPort, output: PathBuf, timeout: Duration) -> Box<dyn ReceiverState<'a> + 'a> {
        Box::new(ReceiverFsm {
            state: PhantomData::<WaitSize>,
            serial,
            output,
            timeout,
            current_file: None,
            size_buffer: [0; INT_FIELD_LEN],
            size_idx: 0,
            block_buffer: vec![0; CHUNK_SIZE],
            file_size: 0,
            bytes_received: 0,
            checksum: CHECKSUM_INIT,
            result: RESULT_OK,
        })
    }
}

/// Act as the device end of the link and store one file at `output`.
pub fn receive_file(serial: &mut dyn SerialPort, output: PathBuf, timeout: Duration) -> Result<Received, ReceiverError> {
    let mut state = ReceiverFsm::new(serial, output, timeout);

    loop {
        match state.step() {
            Ok(next_state) => {
                state = next_state;
            }
            Err(ReceiverError::TransferComplete { bytes_received, result }) => {
                return Ok(Received { bytes: bytes_received, result });
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SenderError;
    use crate::sender::send_file;
    use crate::serial::{pipe, MockSerialPort};

    const TIMEOUT: Duration = Duration::from_millis(50);

    fn script(bytes: &[u8]) -> Vec<Option<u8>> {
        bytes.iter().map(|&b| Some(b)).collect()
    }

    #[test]
    fn test_receiver_full_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.bin");
        let size_field = encode_u32(2);

        let mut responses = script(&size_field);
        responses.extend(script(b"hi"));

        let mut expected_writes = vec![
            fold_checksum(CHECKSUM_INIT, &size_field),
            fold_checksum(CHECKSUM_INIT, b"hi"),
        ];
        expected_writes.extend_from_slice(&encode_u32(RESULT_OK as u64));

        let mut mock = MockSerialPort::new(responses, expected_writes);
        let received = receive_file(&mut mock, output.clone(), TIMEOUT).unwrap();

        assert_eq!(received, Received { bytes: 2, result: RESULT_OK });
        assert_eq!(std::fs::read(&output).unwrap(), b"hi");
    }

    #[test]
    fn test_receiver_waits_for_sender() {
        let dir = tempfile::tempdir().unwrap();
        let size_field = encode_u32(0);

        let mut responses = vec![None, None];
        responses.extend(script(&size_field));

        let mut expected_writes = vec![
            fold_checksum(CHECKSUM_INIT, &size_field),
            CHECKSUM_INIT,
        ];
        expected_writes.extend_from_slice(&encode_u32(RESULT_OK as u64));

        let mut mock = MockSerialPort::new(responses, expected_writes);
        let received = receive_file(&mut mock, dir.path().join("empty"), TIMEOUT).unwrap();
        assert_eq!(received.bytes, 0);
    }

    #[test]
    fn test_receiver_data_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let size_field = encode_u32(5);

        let mut responses = script(&size_field);
        responses.extend(script(b"ab"));
        responses.push(None);

        let expected_writes = vec![fold_checksum(CHECKSUM_INIT, &size_field)];

        let mut mock = MockSerialPort::new(responses, expected_writes);
        match receive_file(&mut mock, dir.path().join("out"), TIMEOUT) {
            Err(ReceiverError::Timeout { received, expected }) => {
                assert_eq!(received, 2);
                assert_eq!(expected, 5);
            }
            other => panic!("Expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_receiver_reports_create_failure() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("missing").join("out.bin");
        let size_field = encode_u32(3);

        let mut responses = script(&size_field);
        responses.extend(script(b"abc"));

        let mut expected_writes = vec![
            fold_checksum(CHECKSUM_INIT, &size_field),
            fold_checksum(CHECKSUM_INIT, b"abc"),
        ];
        expected_writes.extend_from_slice(&encode_u32(RESULT_CREATE_FAILED as u64));

        let mut mock = MockSerialPort::new(responses, expected_writes);
        let received = receive_file(&mut mock, output, TIMEOUT).unwrap();
        assert_eq!(received.result, RESULT_CREATE_FAILED);
    }

    #[test]
    fn test_loopback_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.bin");
        let output = dir.path().join("out.bin");
        let content: Vec<u8> = (0..10000u32).map(|i| (i * 7 % 256) as u8).collect();
        std::fs::write(&input, &content).unwrap();

        let (mut host, mut device) = pipe();
        let device_output = output.clone();
        let device_thread = std::thread::spawn(move || {
            receive_file(&mut device, device_output, Duration::from_secs(2))
        });

        let sent = send_file(&mut host, input, Duration::from_secs(2), false).unwrap();
        let received = device_thread.join().unwrap().unwrap();

        assert_eq!(sent, 10000);
        assert_eq!(received, Received { bytes: 10000, result: RESULT_OK });
        assert_eq!(std::fs::read(&output).unwrap(), content);
    }

    #[test]
    fn test_loopback_remote_failure() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.bin");
        std::fs::write(&input, b"payload").unwrap();

        let (mut host, mut device) = pipe();
        let device_output = dir.path().join("no").join("such").join("dir");
        let device_thread = std::thread::spawn(move || {
            receive_file(&mut device, device_output, Duration::from_secs(2))
        });

        let err = send_file(&mut host, input, Duration::from_secs(2), false).unwrap_err();
        device_thread.join().unwrap().unwrap();

        assert!(matches!(err, SenderError::RemoteWriteFailure { code: RESULT_CREATE_FAILED }));
    }
}
