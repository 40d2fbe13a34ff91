//! Two-stage reads.
//!
//! The device answers a read with whatever it has queued, from the first
//! byte. A header-sized read learns the length, and a second read of the
//! full length (from offset zero, not a continuation) fetches the message.

use log::{debug, trace};

use crate::comms::{Comms, pause};
use crate::error::{Error, Result};
use crate::port::Transport;
use crate::protocol::tlv::{HEADER_SIZE, Message, decode_header, is_not_ready};

impl<T: Transport> Comms<T> {
    /// Read one complete message.
    pub fn two_stage_read(&mut self) -> Result<Message> {
        let length = self.read_cycle()?;
        Ok(Message::from_bytes(self.scratch[..length].to_vec()))
    }

    /// Read one complete message into the scratch buffer.
    ///
    /// Returns the message length; the message is `scratch[..length]`.
    pub(crate) fn read_cycle(&mut self) -> Result<usize> {
        self.read_stage(HEADER_SIZE)?;
        let Some(header) = decode_header(&self.scratch) else {
            return Err(Error::DataNotReady { type_byte: 0 });
        };
        let length = header.len();
        self.transport
            .limits()
            .check_read(length)?;

        pause(self.timing.header_settle);
        self.read_stage(length)?;
        trace!("rx {:02X?}", &self.scratch[..length]);
        Ok(length)
    }

    /// Read `length` bytes, retrying once if the device was not ready.
    fn read_stage(&mut self, length: usize) -> Result<()> {
        for attempt in 1..=2 {
            self.scratch.clear();
            self.scratch.resize(length, 0);
            self.transport
                .read(&mut self.scratch)?;
            if !is_not_ready(&self.scratch) {
                return Ok(());
            }
            if attempt == 1 {
                debug!("Device not ready for {length}-byte read, retrying");
                pause(self.timing.not_ready_retry);
            }
        }
        Err(Error::DataNotReady {
            type_byte: self.scratch.first().copied().unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::comms::{Comms, Timing};
    use crate::error::Error;
    use crate::port::mock::{MockTransport, Op};

    fn comms(mock: &MockTransport) -> Comms<MockTransport> {
        Comms::new(mock.clone(), Timing::zero())
    }

    #[test]
    fn test_full_length_reread_from_zero() {
        let mock = MockTransport::new();
        mock.push_message(&[0x50, 0x01, 0x00, 0x03]);
        let msg = comms(&mock).two_stage_read().unwrap();
        assert_eq!(msg.as_bytes(), &[0x50, 0x01, 0x00, 0x03]);
        assert_eq!(mock.ops(), vec![Op::Read(3), Op::Read(4)]);
    }

    #[test]
    fn test_null_report_retried_exactly_once() {
        let mock = MockTransport::new();
        mock.push_not_ready();
        mock.push_message(&[0x22, 0x03, 0x00, 0x01, 0x00, 0x00]);
        let msg = comms(&mock).two_stage_read().unwrap();
        assert_eq!(msg.tlv_type().as_byte(), 0x22);
        assert_eq!(mock.ops(), vec![Op::Read(3), Op::Read(3), Op::Read(6)]);
    }

    #[test]
    fn test_null_twice_is_data_not_ready() {
        let mock = MockTransport::new();
        mock.push_not_ready();
        mock.push_not_ready();
        mock.push_message(&[0x50, 0x01, 0x00, 0x03]);
        let err = comms(&mock).two_stage_read().unwrap_err();
        assert!(matches!(err, Error::DataNotReady { type_byte: 0 }));
        assert_eq!(mock.ops().len(), 2);
    }

    #[test]
    fn test_reserved_sentinel_on_full_read() {
        let mock = MockTransport::new();
        mock.push_chunk(&[0x23, 0x02, 0x00]);
        mock.push_chunk(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        mock.push_chunk(&[0x23, 0x02, 0x00, 0xAA, 0xBB]);
        let msg = comms(&mock).two_stage_read().unwrap();
        assert_eq!(msg.payload(), &[0xAA, 0xBB]);
    }

    #[test]
    fn test_stale_bytes_cleared_between_reads() {
        let mock = MockTransport::new();
        mock.push_message(&[0x21, 0x03, 0x00, 0x01, 0x02, 0x03]);
        mock.push_chunk(&[0x22, 0x02, 0x00]);
        // Short answer: the tail must read as zero, not the old payload.
        mock.push_chunk(&[0x22, 0x02, 0x00]);
        let mut comms = comms(&mock);
        comms.two_stage_read().unwrap();
        let msg = comms.two_stage_read().unwrap();
        assert_eq!(msg.as_bytes(), &[0x22, 0x02, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_oversized_header_rejected_before_full_read() {
        let mock = MockTransport::new();
        mock.push_chunk(&[0x21, 0x00, 0x10]);
        let err = comms(&mock).two_stage_read().unwrap_err();
        assert!(matches!(err, Error::MessageTooLarge { length: 4099, limit: 3072 }));
        assert_eq!(mock.ops(), vec![Op::Read(3)]);
    }

    #[test]
    fn test_transport_error_propagates() {
        let mock = MockTransport::new();
        mock.push_read_error();
        assert!(matches!(
            comms(&mock).two_stage_read(),
            Err(Error::Transport(_))
        ));
    }
}
