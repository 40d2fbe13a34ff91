//! Reliable request/response channel over a [`Transport`].
//!
//! [`Comms`] owns everything the comms lock protects: the transport, the
//! receive scratch buffer and the cached device info. It is only ever
//! reached through `Mutex<Comms<T>>` in [`crate::device::Device`], so
//! exactly one write or two-stage read is in flight at a time.

mod executor;
mod reader;

use std::thread;
use std::time::Duration;

use crate::port::Transport;
use crate::protocol::command::DeviceInfo;
use crate::protocol::tlv::TlvType;

pub use executor::ResponseCheck;

/// Every delay the engine inserts on the link.
///
/// These are hardware settling constraints of the controller. Tests use
/// [`Timing::zero`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Between the header read and the full-length read.
    pub header_settle: Duration,
    /// Before re-reading after a null or reserved answer.
    pub not_ready_retry: Duration,
    /// Before writing a write-type command.
    pub pre_write: Duration,
    /// After writing a header-only command.
    pub query_settle: Duration,
    /// After writing a control/config command.
    pub control_settle: Duration,
    /// After writing an engineering (bulk) command.
    pub bulk_settle: Duration,
    /// After a control/config write was acknowledged.
    pub completion_settle: Duration,
    /// Once after a transaction failed, before reporting the failure.
    pub failure_backoff: Duration,
    /// Before taking the report slot lock.
    pub report_settle: Duration,
    /// Before and after each bootloader frame.
    pub frame_gap: Duration,
    /// Longest wait for the ready line.
    pub ready_timeout: Duration,
    /// Ready line polling interval.
    pub ready_poll: Duration,
    /// After a write that expects no response.
    pub no_response_settle: Duration,
    /// Between whole flash attempts.
    pub flash_retry_backoff: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            header_settle: Duration::from_micros(50),
            not_ready_retry: Duration::from_micros(200),
            pre_write: Duration::from_micros(50),
            query_settle: Duration::from_micros(100),
            control_settle: Duration::from_micros(200),
            bulk_settle: Duration::from_millis(4),
            completion_settle: Duration::from_micros(200),
            failure_backoff: Duration::from_millis(10),
            report_settle: Duration::from_micros(200),
            frame_gap: Duration::from_micros(1300),
            ready_timeout: Duration::from_millis(500),
            ready_poll: Duration::from_micros(20),
            no_response_settle: Duration::from_micros(100),
            flash_retry_backoff: Duration::from_millis(500),
        }
    }
}

impl Timing {
    /// No delays at all.
    pub const fn zero() -> Self {
        Self {
            header_settle: Duration::ZERO,
            not_ready_retry: Duration::ZERO,
            pre_write: Duration::ZERO,
            query_settle: Duration::ZERO,
            control_settle: Duration::ZERO,
            bulk_settle: Duration::ZERO,
            completion_settle: Duration::ZERO,
            failure_backoff: Duration::ZERO,
            report_settle: Duration::ZERO,
            frame_gap: Duration::ZERO,
            ready_timeout: Duration::ZERO,
            ready_poll: Duration::ZERO,
            no_response_settle: Duration::ZERO,
            flash_retry_backoff: Duration::ZERO,
        }
    }

    /// Settle time after writing a command of `tlv_type`.
    ///
    /// Scales with how much work the device does for the command.
    pub fn write_settle(&self, tlv_type: TlvType) -> Duration {
        match tlv_type {
            TlvType::ControlWrite
            | TlvType::ConfigWrite
            | TlvType::ControlRead
            | TlvType::ConfigRead => self.control_settle,
            TlvType::EngineeringWrite => self.bulk_settle,
            _ => self.query_settle,
        }
    }

    /// Pause before writing a command of `tlv_type`.
    pub fn before_write(&self, tlv_type: TlvType) -> Duration {
        if is_write_type(tlv_type) {
            self.pre_write
        } else {
            Duration::ZERO
        }
    }

    /// Pause after a failed transaction of a command of `tlv_type`.
    ///
    /// Device info reads fail without waiting.
    pub fn backoff(&self, tlv_type: TlvType) -> Duration {
        if tlv_type == TlvType::DeviceInfo {
            Duration::ZERO
        } else {
            self.failure_backoff
        }
    }
}

fn is_write_type(tlv_type: TlvType) -> bool {
    matches!(
        tlv_type,
        TlvType::ControlWrite | TlvType::ConfigWrite | TlvType::EngineeringWrite
    )
}

/// Bounded retry counter of a response wait loop.
///
/// A budget of `n` allows `n + 1` read cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget(pub usize);

impl RetryBudget {
    /// Default budget: five read cycles.
    pub const DEFAULT: Self = Self(4);

    /// Number of read cycles this budget allows.
    pub fn cycles(self) -> usize {
        self.0.saturating_add(1)
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// State owned by the comms lock.
pub struct Comms<T> {
    transport: T,
    timing: Timing,
    scratch: Vec<u8>,
    device_info: Option<DeviceInfo>,
}

impl<T: Transport> Comms<T> {
    /// Wrap a transport.
    pub fn new(transport: T, timing: Timing) -> Self {
        let capacity = transport.limits().read;
        Self {
            transport,
            timing,
            scratch: Vec::with_capacity(capacity),
            device_info: None,
        }
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Underlying transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consume and return the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Active timing.
    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Replace the timing.
    pub fn set_timing(&mut self, timing: Timing) {
        self.timing = timing;
    }

    /// Last verified device info.
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.device_info.as_ref()
    }

    /// Whether a command of `tlv_type` gets a trailing TLV CRC.
    pub fn needs_crc(&self, tlv_type: TlvType) -> bool {
        matches!(
            tlv_type,
            TlvType::ControlWrite
                | TlvType::ConfigWrite
                | TlvType::ControlRead
                | TlvType::ConfigRead
        ) && self
            .device_info
            .is_some_and(|info| info.requires_command_crc())
    }

    #[cfg(test)]
    pub(crate) fn set_device_info(&mut self, info: Option<DeviceInfo>) {
        self.device_info = info;
    }
}

/// Sleep unless `duration` is zero.
pub(crate) fn pause(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}
