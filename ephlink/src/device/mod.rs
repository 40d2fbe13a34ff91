//! Device facade.
//!
//! [`Device`] owns the two lock domains of the engine:
//!
//! - the comms lock (`Mutex<Comms<T>>`) serialising every write and
//!   two-stage read on the link;
//! - the report slot lock inside [`ReportRouter`], so a consumer draining
//!   buffered reports never waits on an in-flight command.
//!
//! Messages that arrive out of turn are collected while the comms lock is
//! held and classified after it is dropped.
//!
//! ## Example
//!
//! ```rust,no_run
//! use ephlink::{Device, Space};
//!
//! # #[cfg(all(feature = "native", target_os = "linux"))]
//! fn main() -> ephlink::Result<()> {
//!     let transport = ephlink::port::open_spi("/dev/spidev0.0", 1_000_000)?;
//!     let device = Device::new(transport);
//!
//!     let info = device.read_device_info()?;
//!     println!("{info}");
//!
//!     device.write_control_config(Space::Config, 450, 30, &[0x05])?;
//!     Ok(())
//! }
//! # #[cfg(not(all(feature = "native", target_os = "linux")))]
//! # fn main() {}
//! ```

mod settings;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::bootloader::Bootloader;
use crate::comms::{Comms, ResponseCheck, RetryBudget, Timing, pause};
use crate::error::{Error, Result};
use crate::port::{AlwaysReady, ReadyLine, Transport};
use crate::protocol::command::{
    self, DeviceInfo, Space, bootloader_unlock, control_write, expected_bytes_written,
    read_command,
};
use crate::protocol::tlv::{Message, TlvType};
use crate::report::{EventSink, REPORT_CAPACITY, ReportRouter};

/// Component of the device's command processor.
const COMMAND_PROCESSOR: u16 = 0x0000;

/// Component triggering a baseline recalibration.
const BASELINE_COMPONENT: u16 = 0x00F0;

/// Component of the fingerprint controller.
const FINGERPRINT_COMPONENT: u16 = 0x000B;

/// Config component holding the gesture mode.
const GESTURE_COMPONENT: u16 = 450;

/// Offset of the gesture mode in its component.
const GESTURE_OFFSET: u16 = 30;

/// Offset of the engineering mode flag in the command processor.
const ENGINEERING_MODE_OFFSET: u16 = 0x16;

const FORCE_BOOTLOADER: u8 = 0x01;
const TRIGGER_BASELINE: u8 = 0x01;
const BACKUP_TO_NVM: u8 = 0x02;
const ENGINEERING_MODE_ON: u8 = 0x80;
const FINGERPRINT_MODE_ON: u8 = 0x08;

/// Acknowledgement types of a control/config write.
const WRITE_ACKS: [TlvType; 2] = [TlvType::ControlWrite, TlvType::ConfigWrite];

/// Response types of a control/config read.
const READ_RESPONSES: [TlvType; 2] = [TlvType::ControlRead, TlvType::ConfigRead];

/// A touch controller reachable over a [`Transport`].
pub struct Device<T, R = AlwaysReady> {
    comms: Mutex<Comms<T>>,
    ready: Mutex<R>,
    reports: ReportRouter,
    timing: Timing,
    budget: RetryBudget,
}

impl<T: Transport> Device<T> {
    /// Create a device without a ready line.
    pub fn new(transport: T) -> Self {
        let timing = Timing::default();
        Self {
            comms: Mutex::new(Comms::new(transport, timing)),
            ready: Mutex::new(AlwaysReady),
            reports: ReportRouter::new(REPORT_CAPACITY).with_settle(timing.report_settle),
            timing,
            budget: RetryBudget::DEFAULT,
        }
    }
}

impl<T: Transport, R: ReadyLine> Device<T, R> {
    /// Attach a ready (CHG) line.
    #[must_use]
    pub fn with_ready_line<R2: ReadyLine>(self, ready: R2) -> Device<T, R2> {
        Device {
            comms: self.comms,
            ready: Mutex::new(ready),
            reports: self.reports,
            timing: self.timing,
            budget: self.budget,
        }
    }

    /// Replace every link delay.
    #[must_use]
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.comms
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .set_timing(timing);
        self.reports = self
            .reports
            .with_settle(timing.report_settle);
        self.timing = timing;
        self
    }

    /// Set the retry budget of every response wait loop.
    #[must_use]
    pub fn with_retry_budget(mut self, budget: RetryBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Forward touch and screen-off reports to `sink`.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.reports = self
            .reports
            .with_event_sink(sink);
        self
    }

    /// Resize the report slot. Any buffered report is dropped.
    #[must_use]
    pub fn with_report_capacity(mut self, capacity: usize) -> Self {
        let mut reports = ReportRouter::new(capacity).with_settle(self.timing.report_settle);
        if let Some(sink) = self.reports.take_sink() {
            reports = reports.with_event_sink(sink);
        }
        self.reports = reports;
        self
    }

    /// Active timing.
    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Active retry budget.
    pub fn retry_budget(&self) -> RetryBudget {
        self.budget
    }

    /// Report classifier and slot.
    pub fn reports(&self) -> &ReportRouter {
        &self.reports
    }

    /// Name of the underlying link.
    pub fn link_name(&self) -> String {
        self.comms()
            .transport()
            .name()
            .to_string()
    }

    /// Bootloader flasher bound to this device.
    pub fn bootloader(&self) -> Bootloader<'_, T, R> {
        Bootloader::new(self)
    }

    fn comms(&self) -> MutexGuard<'_, Comms<T>> {
        self.comms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one transaction under the comms lock, then classify whatever
    /// arrived out of turn.
    fn transact(
        &self,
        command: Vec<u8>,
        expected: &[TlvType],
        check: ResponseCheck,
    ) -> Result<Message> {
        let mut deferred = Vec::new();
        let result = self
            .comms()
            .execute(command, expected, check, self.budget, &mut deferred);
        self.classify_deferred(deferred);
        result
    }

    fn classify_deferred(&self, deferred: Vec<Message>) {
        for message in deferred {
            if let Err(e) = self
                .reports
                .classify_and_buffer(message.as_bytes())
            {
                warn!("Dropped report {}: {e}", message.tlv_type());
            }
        }
    }

    /// Read and verify the device info record.
    ///
    /// The record is cached; its protocol version decides whether later
    /// control/config commands carry a CRC.
    pub fn read_device_info(&self) -> Result<DeviceInfo> {
        let message = self.transact(
            command::device_info_request(),
            &[TlvType::DeviceInfo],
            ResponseCheck::DeviceInfo,
        )?;
        DeviceInfo::parse(message.as_bytes())
    }

    /// Last device info read from the device.
    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.comms()
            .device_info()
            .copied()
    }

    /// Read `length` bytes of a control/config component.
    ///
    /// Returns the whole response message; its payload is the data.
    pub fn read_control_config(
        &self,
        space: Space,
        component: u16,
        offset: u16,
        length: u16,
    ) -> Result<Message> {
        self.transact(
            read_command(space, component, offset, length),
            &READ_RESPONSES,
            ResponseCheck::None,
        )
    }

    /// Write `value` into a control/config component.
    pub fn write_control_config(
        &self,
        space: Space,
        component: u16,
        offset: u16,
        value: &[u8],
    ) -> Result<Message> {
        let command = control_write(space, component, offset, value)?;
        self.write_command(command)
    }

    /// Send a pre-encoded control/config write record.
    pub fn write_command(&self, command: Vec<u8>) -> Result<Message> {
        let tlv_type = command
            .first()
            .map_or(TlvType::Null, |&byte| TlvType::from_byte(byte));
        if Space::from_write_type(tlv_type).is_none() {
            return Err(Error::Unsupported(format!(
                "{tlv_type} is not a control/config write"
            )));
        }
        let sent = expected_bytes_written(&command);
        self.transact(command, &WRITE_ACKS, ResponseCheck::BytesWritten(sent))
    }

    /// Send an engineering data write.
    pub fn write_engineering_data(&self, component: u16, data_id: u8, data: &[u8]) -> Result<Message> {
        let command = command::engineering_write(component, data_id, data)?;
        let sent = expected_bytes_written(&command);
        self.transact(
            command,
            &[TlvType::EngineeringWrite],
            ResponseCheck::BytesWritten(sent),
        )
    }

    /// Write into a control/config component without waiting for a reply.
    pub fn write_control_config_no_response(
        &self,
        space: Space,
        component: u16,
        offset: u16,
        value: &[u8],
    ) -> Result<()> {
        let command = control_write(space, component, offset, value)?;
        self.comms()
            .write_no_response(command)
    }

    /// Send the bootloader unlock sequence.
    pub fn unlock_bootloader(&self) -> Result<()> {
        let command = bootloader_unlock()?;
        let sent = expected_bytes_written(&command);
        self.transact(command, &WRITE_ACKS, ResponseCheck::BytesWritten(sent))?;
        Ok(())
    }

    /// Reset the device into its bootloader.
    ///
    /// The device stops answering while it restarts, so no reply is read.
    pub fn force_bootloader_mode(&self) -> Result<()> {
        info!("Forcing bootloader mode");
        self.write_control_config_no_response(
            Space::Control,
            COMMAND_PROCESSOR,
            0,
            &[FORCE_BOOTLOADER],
        )
    }

    /// Recalibrate the touch baseline.
    pub fn trigger_baseline(&self) -> Result<()> {
        self.write_control_config(Space::Control, BASELINE_COMPONENT, 0, &[TRIGGER_BASELINE])?;
        Ok(())
    }

    /// Persist the config space to non-volatile memory.
    pub fn backup_to_nvm(&self) -> Result<()> {
        self.write_control_config(Space::Control, COMMAND_PROCESSOR, 0, &[BACKUP_TO_NVM])?;
        Ok(())
    }

    /// Enter or leave engineering mode.
    pub fn set_engineering_mode(&self, enabled: bool) -> Result<()> {
        let value = if enabled { ENGINEERING_MODE_ON } else { 0 };
        self.write_control_config(
            Space::Control,
            COMMAND_PROCESSOR,
            ENGINEERING_MODE_OFFSET,
            &[value],
        )?;
        Ok(())
    }

    /// Enable or disable fingerprint mode.
    pub fn set_fingerprint_mode(&self, enabled: bool) -> Result<()> {
        let value = if enabled { FINGERPRINT_MODE_ON } else { 0 };
        self.write_control_config(Space::Control, FINGERPRINT_COMPONENT, 0, &[value])?;
        Ok(())
    }

    /// Select the gesture mode (low nibble only).
    pub fn set_gesture_mode(&self, mode: u8) -> Result<()> {
        if mode & 0xF0 != 0 {
            return Err(Error::Unsupported(format!(
                "gesture mode 0x{mode:02X} (only 0x0-0xF)"
            )));
        }
        self.write_control_config(Space::Config, GESTURE_COMPONENT, GESTURE_OFFSET, &[mode & 0x0F])?;
        Ok(())
    }

    /// Write raw bytes under the comms lock.
    pub fn write_raw(&self, bytes: &[u8]) -> Result<()> {
        self.comms()
            .write_raw(bytes)
    }

    /// Perform one two-stage read under the comms lock.
    ///
    /// The message is returned as-is, without classification.
    pub fn read_message(&self) -> Result<Message> {
        self.comms()
            .two_stage_read()
    }

    /// Take the buffered report; an empty slot yields the null message.
    pub fn read_report(&self) -> Message {
        self.reports
            .slot()
            .take()
            .map_or_else(Message::null, Message::from_bytes)
    }

    /// Service a data-ready interrupt: read one message and classify it.
    ///
    /// Returns `None` if the device had nothing queued.
    pub fn service_interrupt(&self) -> Result<Option<Message>> {
        let read = self
            .comms()
            .two_stage_read();
        let message = match read {
            Ok(message) => message,
            Err(Error::DataNotReady { .. }) => {
                debug!("Interrupt with no data queued");
                return Ok(None);
            },
            Err(e) => return Err(e),
        };
        self.reports
            .classify_and_buffer(message.as_bytes())?;
        Ok(Some(message))
    }

    /// Re-arm the reset-completed event before an operation that resets.
    pub fn arm_reset(&self) {
        self.reports
            .reset_signal()
            .clear();
    }

    /// Wait until a device status report with the reset bit is classified.
    pub fn wait_for_reset(&self, timeout: Duration) -> Result<()> {
        if self
            .reports
            .reset_signal()
            .wait(timeout)
        {
            Ok(())
        } else {
            Err(Error::Timeout(format!(
                "no reset report within {} ms",
                timeout.as_millis()
            )))
        }
    }

    /// Wait for the ready line to assert, up to the configured timeout.
    pub fn wait_ready(&self) -> Result<()> {
        let deadline = Instant::now() + self.timing.ready_timeout;
        let mut ready = self
            .ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            if ready.is_ready()? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "ready line not asserted within {} ms",
                    self.timing.ready_timeout.as_millis()
                )));
            }
            pause(self.timing.ready_poll);
        }
    }

    /// Hand the ready line back to the device.
    pub fn release_ready_line(&self) -> Result<()> {
        self.ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release()
    }
}
