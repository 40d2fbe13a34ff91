//! Transaction executor.
//!
//! Sends one command and polls two-stage reads until a response of an
//! expected type arrives or the retry budget runs out. Messages of any
//! other type are handed back to the caller in `deferred` so they can be
//! classified once the comms lock is released.

use log::{debug, trace, warn};

use crate::comms::{Comms, RetryBudget, pause};
use crate::error::{Error, Result};
use crate::port::Transport;
use crate::protocol::command::{DeviceInfo, WriteAck};
use crate::protocol::tlv::{Message, TlvType, append_crc};

/// Extra validation applied to a type-matched response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCheck {
    /// Accept any type-matched response.
    None,
    /// The acknowledgement should report this many bytes written.
    ///
    /// A mismatch is logged, the response is still accepted.
    BytesWritten(u16),
    /// The response must be a device info record with a valid CRC.
    ///
    /// A CRC failure counts as a non-match and the loop continues.
    DeviceInfo,
}

impl<T: Transport> Comms<T> {
    /// Send `command` and wait for a response of one of the `expected` types.
    ///
    /// A trailing CRC is appended to control/config commands when the cached
    /// device info asks for it. A read failure ends the transaction at once;
    /// non-matching responses are pushed to `deferred` and the loop continues
    /// for at most `budget.cycles()` read cycles. A failed transaction pauses
    /// once for [`Timing::backoff`](crate::comms::Timing::backoff) before
    /// returning.
    ///
    /// A device info transaction drops the cached device info first, so a
    /// failed read never leaves a stale protocol version behind.
    pub fn execute(
        &mut self,
        mut command: Vec<u8>,
        expected: &[TlvType],
        check: ResponseCheck,
        budget: RetryBudget,
        deferred: &mut Vec<Message>,
    ) -> Result<Message> {
        let command_type = command
            .first()
            .map_or(TlvType::Null, |&byte| TlvType::from_byte(byte));
        if check == ResponseCheck::DeviceInfo {
            self.device_info = None;
        }
        if self.needs_crc(command_type) {
            append_crc(&mut command);
        }

        self.transport
            .limits()
            .check_write(command.len())?;
        pause(self.timing.before_write(command_type));
        trace!("tx {:02X?}", command);
        self.transport
            .write(&command)?;
        pause(self.timing.write_settle(command_type));

        let cycles = budget.cycles();
        for cycle in 1..=cycles {
            let length = match self.read_cycle() {
                Ok(length) => length,
                Err(e) => {
                    pause(self.timing.backoff(command_type));
                    return Err(e);
                },
            };
            let response = &self.scratch[..length];
            let response_type = TlvType::from_byte(response[0]);

            if expected.contains(&response_type) {
                match check {
                    ResponseCheck::None => {
                        return Ok(Message::from_bytes(response.to_vec()));
                    },
                    ResponseCheck::BytesWritten(sent) => {
                        match WriteAck::parse(response) {
                            Some(ack) if ack.bytes_written == sent => {},
                            Some(ack) => warn!(
                                "{response_type}: device wrote {} bytes, sent {sent}",
                                ack.bytes_written
                            ),
                            None => warn!("{response_type}: acknowledgement without byte count"),
                        }
                        let message = Message::from_bytes(response.to_vec());
                        if matches!(
                            command_type,
                            TlvType::ControlWrite | TlvType::ConfigWrite
                        ) {
                            pause(self.timing.completion_settle);
                        }
                        return Ok(message);
                    },
                    ResponseCheck::DeviceInfo => match DeviceInfo::parse(response) {
                        Ok(info) => {
                            let message = Message::from_bytes(response.to_vec());
                            debug!("Device info: {info}");
                            self.device_info = Some(info);
                            return Ok(message);
                        },
                        Err(e) => debug!("Discarding device info (cycle {cycle}/{cycles}): {e}"),
                    },
                }
            } else {
                debug!(
                    "Deferring {response_type} while waiting for {} (cycle {cycle}/{cycles})",
                    command_type.name()
                );
                deferred.push(Message::from_bytes(response.to_vec()));
            }
        }

        pause(self.timing.backoff(command_type));
        Err(Error::RetryBudgetExhausted { cycles })
    }

    /// Send `command` without waiting for a response.
    pub fn write_no_response(&mut self, mut command: Vec<u8>) -> Result<()> {
        let command_type = command
            .first()
            .map_or(TlvType::Null, |&byte| TlvType::from_byte(byte));
        if self.needs_crc(command_type) {
            append_crc(&mut command);
        }
        self.transport
            .limits()
            .check_write(command.len())?;
        pause(self.timing.before_write(command_type));
        trace!("tx {:02X?} (no response)", command);
        self.transport
            .write(&command)?;
        pause(self.timing.no_response_settle);
        Ok(())
    }

    /// Write raw bytes as-is.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.transport
            .limits()
            .check_write(bytes.len())?;
        trace!("tx {:02X?} (raw)", bytes);
        self.transport
            .write(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::Timing;
    use crate::port::mock::{MockTransport, Op, init_logging};
    use crate::protocol::command::{
        self, Space, control_write, device_info_request, expected_bytes_written,
        tests::DEVICE_INFO_V3,
    };
    use crate::protocol::crc::crc8;
    use std::time::{Duration, Instant};

    fn comms(mock: &MockTransport) -> Comms<MockTransport> {
        Comms::new(mock.clone(), Timing::zero())
    }

    fn read_device_info(
        comms: &mut Comms<MockTransport>,
        deferred: &mut Vec<Message>,
    ) -> Result<Message> {
        comms.execute(
            device_info_request(),
            &[TlvType::DeviceInfo],
            ResponseCheck::DeviceInfo,
            RetryBudget::DEFAULT,
            deferred,
        )
    }

    #[test]
    fn test_device_info_happy_path() {
        let mock = MockTransport::new();
        mock.push_message(&DEVICE_INFO_V3);
        let mut comms = comms(&mock);
        let mut deferred = Vec::new();

        let msg = read_device_info(&mut comms, &mut deferred).unwrap();
        assert_eq!(msg.as_bytes(), &DEVICE_INFO_V3);
        let info = comms.device_info().unwrap();
        assert_eq!(info.product_id, 0x20);
        assert_eq!(info.protocol_version, 3);
        assert!(deferred.is_empty());
        assert_eq!(mock.writes(), vec![vec![0x01, 0x00, 0x00]]);
    }

    #[test]
    fn test_device_info_bad_crc_then_recovery() {
        let mock = MockTransport::new();
        let mut corrupt = DEVICE_INFO_V3;
        corrupt[11] ^= 0x55;
        mock.push_message(&corrupt);
        mock.push_message(&DEVICE_INFO_V3);
        let mut comms = comms(&mock);
        let mut deferred = Vec::new();

        let msg = read_device_info(&mut comms, &mut deferred).unwrap();
        assert_eq!(msg.as_bytes(), &DEVICE_INFO_V3);
        assert!(deferred.is_empty());
        assert_eq!(mock.ops().len(), 5);
    }

    #[test]
    fn test_failed_device_info_read_clears_cache() {
        let mock = MockTransport::new();
        mock.push_message(&DEVICE_INFO_V3);
        let mut corrupt = DEVICE_INFO_V3;
        corrupt[11] ^= 0x55;
        for _ in 0..RetryBudget::DEFAULT.cycles() {
            mock.push_message(&corrupt);
        }
        let mut comms = comms(&mock);
        let mut deferred = Vec::new();
        read_device_info(&mut comms, &mut deferred).unwrap();
        assert!(comms.needs_crc(TlvType::ControlWrite));

        let err = read_device_info(&mut comms, &mut deferred).unwrap_err();
        assert!(matches!(err, Error::RetryBudgetExhausted { cycles: 5 }));
        assert!(comms.device_info().is_none());
        assert!(!comms.needs_crc(TlvType::ControlWrite));
    }

    fn backoff_only(backoff: Duration) -> Timing {
        Timing {
            failure_backoff: backoff,
            ..Timing::zero()
        }
    }

    fn write_gesture(comms: &mut Comms<MockTransport>) -> Result<Message> {
        let command = control_write(Space::Config, 450, 30, &[0x05]).unwrap();
        let sent = expected_bytes_written(&command);
        comms.execute(
            command,
            &[TlvType::ControlWrite, TlvType::ConfigWrite],
            ResponseCheck::BytesWritten(sent),
            RetryBudget::DEFAULT,
            &mut Vec::new(),
        )
    }

    #[test]
    fn test_no_backoff_between_read_cycles() {
        let mock = MockTransport::new();
        for _ in 0..4 {
            mock.push_message(&[0x21, 0x01, 0x00, 0x07]);
        }
        mock.push_message(&[0x0A, 0x02, 0x00, 0x01, 0x00]);
        let mut comms = Comms::new(mock.clone(), backoff_only(Duration::from_millis(40)));

        let started = Instant::now();
        write_gesture(&mut comms).unwrap();
        assert!(started.elapsed() < Duration::from_millis(40));
    }

    #[test]
    fn test_backoff_once_after_exhausted_budget() {
        let mock = MockTransport::new();
        for _ in 0..5 {
            mock.push_message(&[0x21, 0x01, 0x00, 0x07]);
        }
        let mut comms = Comms::new(mock.clone(), backoff_only(Duration::from_millis(40)));

        let started = Instant::now();
        let err = write_gesture(&mut comms).unwrap_err();
        let elapsed = started.elapsed();
        assert!(matches!(err, Error::RetryBudgetExhausted { cycles: 5 }));
        assert!(elapsed >= Duration::from_millis(40));
        assert!(elapsed < Duration::from_millis(120));
    }

    #[test]
    fn test_oversized_write_never_reaches_transport() {
        let mock = MockTransport::new();
        let mut comms = comms(&mock);
        let command = control_write(Space::Config, 1, 0, &[0; 8200]).unwrap();

        let err = comms
            .execute(
                command.clone(),
                &[TlvType::ConfigWrite],
                ResponseCheck::None,
                RetryBudget::DEFAULT,
                &mut Vec::new(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::MessageTooLarge { length: 8207, limit: 8192 }));
        assert!(matches!(
            comms.write_no_response(command.clone()),
            Err(Error::MessageTooLarge { .. })
        ));
        assert!(matches!(
            comms.write_raw(&command),
            Err(Error::MessageTooLarge { .. })
        ));
        assert!(mock.ops().is_empty());
    }

    #[test]
    fn test_non_matching_exhausts_budget_after_budget_plus_one_cycles() {
        init_logging();
        for budget in [0usize, 1, 3, 4] {
            let mock = MockTransport::new();
            for _ in 0..10 {
                mock.push_message(&[0x21, 0x01, 0x00, 0x07]);
            }
            let mut comms = comms(&mock);
            let mut deferred = Vec::new();
            let err = comms
                .execute(
                    device_info_request(),
                    &[TlvType::DeviceInfo],
                    ResponseCheck::DeviceInfo,
                    RetryBudget(budget),
                    &mut deferred,
                )
                .unwrap_err();

            assert!(matches!(err, Error::RetryBudgetExhausted { cycles } if cycles == budget + 1));
            assert_eq!(deferred.len(), budget + 1);
            let reads = mock
                .ops()
                .iter()
                .filter(|op| matches!(op, Op::Read(3)))
                .count();
            assert_eq!(reads, budget + 1);
        }
    }

    #[test]
    fn test_matched_type_is_in_expected_set() {
        let mock = MockTransport::new();
        mock.push_message(&[0x23, 0x01, 0x00, 0x09]);
        mock.push_message(&[0x08, 0x02, 0x00, 0x01, 0x00]);
        let mut comms = comms(&mock);
        let mut deferred = Vec::new();

        let command = control_write(Space::Config, 450, 30, &[0x05]).unwrap();
        let sent = expected_bytes_written(&command);
        let expected = [TlvType::ControlWrite, TlvType::ConfigWrite];
        let msg = comms
            .execute(
                command,
                &expected,
                ResponseCheck::BytesWritten(sent),
                RetryBudget::DEFAULT,
                &mut deferred,
            )
            .unwrap();

        assert!(expected.contains(&msg.tlv_type()));
        assert_eq!(deferred.len(), 1);
        assert_eq!(deferred[0].tlv_type(), TlvType::TouchReport);
    }

    #[test]
    fn test_bytes_written_mismatch_is_accepted() {
        let mock = MockTransport::new();
        mock.push_message(&[0x0A, 0x02, 0x00, 0x09, 0x00]);
        let mut comms = comms(&mock);
        let msg = comms
            .execute(
                control_write(Space::Config, 1, 0, &[1, 2]).unwrap(),
                &[TlvType::ConfigWrite],
                ResponseCheck::BytesWritten(2),
                RetryBudget::DEFAULT,
                &mut Vec::new(),
            )
            .unwrap();
        assert_eq!(msg.tlv_type(), TlvType::ConfigWrite);
    }

    #[test]
    fn test_crc_appended_for_new_protocol() {
        let mock = MockTransport::new();
        mock.push_message(&DEVICE_INFO_V3);
        mock.push_message(&[0x08, 0x02, 0x00, 0x01, 0x00]);
        let mut comms = comms(&mock);
        let mut deferred = Vec::new();
        read_device_info(&mut comms, &mut deferred).unwrap();

        let command = control_write(Space::Control, 0, 0, &[0x01]).unwrap();
        let sent = expected_bytes_written(&command);
        comms
            .execute(
                command,
                &[TlvType::ControlWrite, TlvType::ConfigWrite],
                ResponseCheck::BytesWritten(sent),
                RetryBudget::DEFAULT,
                &mut deferred,
            )
            .unwrap();

        let writes = mock.writes();
        let written = &writes[1];
        assert_eq!(written, &vec![0x08, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0xFA]);
        // Decoding recovers the payload and a valid trailing CRC.
        let header = crate::protocol::tlv::decode_header(written).unwrap();
        assert_eq!(header.len(), written.len());
        assert_eq!(&written[3..8], &[0x00, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(written[8], crc8(&written[..8]));
    }

    #[test]
    fn test_engineering_write_never_gets_crc() {
        let mock = MockTransport::new();
        mock.push_message(&DEVICE_INFO_V3);
        mock.push_message(&[0x80, 0x02, 0x00, 0x02, 0x00]);
        let mut comms = comms(&mock);
        let mut deferred = Vec::new();
        read_device_info(&mut comms, &mut deferred).unwrap();

        let command = command::engineering_write(0xFEFE, 0, &[0xAA, 0xBB]).unwrap();
        let expected_len = command.len();
        comms
            .execute(
                command,
                &[TlvType::EngineeringWrite],
                ResponseCheck::BytesWritten(2),
                RetryBudget::DEFAULT,
                &mut deferred,
            )
            .unwrap();
        assert_eq!(mock.writes()[1].len(), expected_len);
    }

    #[test]
    fn test_read_failure_is_immediate() {
        let mock = MockTransport::new();
        mock.push_read_error();
        mock.push_message(&DEVICE_INFO_V3);
        let mut comms = comms(&mock);
        let err = read_device_info(&mut comms, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(mock.reads_pending(), 2);
    }

    #[test]
    fn test_write_failure_propagates() {
        let mock = MockTransport::new();
        mock.fail_writes(1);
        let mut comms = comms(&mock);
        assert!(matches!(
            read_device_info(&mut comms, &mut Vec::new()),
            Err(Error::Transport(_))
        ));
        assert_eq!(mock.ops().len(), 1);
    }

    #[test]
    fn test_write_no_response_does_not_read() {
        let mock = MockTransport::new();
        let mut comms = comms(&mock);
        comms
            .write_no_response(control_write(Space::Control, 0, 0, &[0x01]).unwrap())
            .unwrap();
        assert_eq!(mock.ops(), vec![Op::Write(vec![0x08, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01])]);
    }
}
