//! Unsolicited report classification and buffering.
//!
//! Reports that arrive while no command is waiting for them (or that
//! interleave with a command's response) are classified here. Recognised
//! reports land in a single-slot, overwrite-on-write [`ReportSlot`] that a
//! separate consumer drains; a device-status report with the reset bit set
//! also fires the [`ResetSignal`].
//!
//! The slot has its own lock. Callers must release the comms lock before
//! classifying, so the lock order is always comms, then slot, never nested.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::comms::pause;
use crate::error::{Error, Result};
use crate::protocol::command::DeviceStatus;
use crate::protocol::tlv::{TlvType, decode_header};

/// Default slot capacity (one page).
pub const REPORT_CAPACITY: usize = 4096;

/// Receiver of touch-event and screen-off reports.
///
/// Decoding the touch events is up to the implementor.
pub trait EventSink: Send + Sync {
    /// Called with the raw report, header included.
    fn on_touch_report(&self, message: &[u8]);
}

/// Single-slot report buffer, last write wins.
#[derive(Debug)]
pub struct ReportSlot {
    slot: Mutex<Option<Vec<u8>>>,
    capacity: usize,
}

impl ReportSlot {
    /// Create an empty slot holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            slot: Mutex::new(None),
            capacity,
        }
    }

    /// Slot capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Overwrite the slot with `message`.
    ///
    /// A message whose decoded length exceeds the capacity is rejected and
    /// the slot is left unchanged.
    pub fn store(&self, message: &[u8]) -> Result<()> {
        let length = decode_header(message).map_or(message.len(), |h| h.len());
        if length > self.capacity {
            return Err(Error::CapacityExceeded {
                length,
                capacity: self.capacity,
            });
        }
        let stored = &message[..length.min(message.len())];
        *self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(stored.to_vec());
        Ok(())
    }

    /// Take the buffered report, leaving the slot empty.
    pub fn take(&self) -> Option<Vec<u8>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Copy of the buffered report.
    pub fn peek(&self) -> Option<Vec<u8>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the slot is empty.
    pub fn is_empty(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl Default for ReportSlot {
    fn default() -> Self {
        Self::new(REPORT_CAPACITY)
    }
}

/// One-shot "device reset completed" event.
#[derive(Debug, Default)]
pub struct ResetSignal {
    fired: Mutex<bool>,
    cond: Condvar,
}

impl ResetSignal {
    /// Fire the event and wake all waiters.
    pub fn signal(&self) {
        *self
            .fired
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = true;
        self.cond
            .notify_all();
    }

    /// Re-arm the event.
    pub fn clear(&self) {
        *self
            .fired
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = false;
    }

    /// Whether the event has fired since the last [`ResetSignal::clear`].
    pub fn is_set(&self) -> bool {
        *self
            .fired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait up to `timeout` for the event. Returns whether it fired.
    ///
    /// Consumes the event on success.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut fired = self
            .fired
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while !*fired {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            fired = self
                .cond
                .wait_timeout(fired, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *fired = false;
        true
    }
}

/// Routes classified reports to the slot, the reset signal and the sink.
pub struct ReportRouter {
    slot: ReportSlot,
    reset: ResetSignal,
    sink: Option<Arc<dyn EventSink>>,
    settle: Duration,
}

impl ReportRouter {
    /// Create a router with an empty slot of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            slot: ReportSlot::new(capacity),
            reset: ResetSignal::default(),
            sink: None,
            settle: Duration::ZERO,
        }
    }

    /// Install the touch-report sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Settle time before taking the slot lock.
    #[must_use]
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub(crate) fn take_sink(&mut self) -> Option<Arc<dyn EventSink>> {
        self.sink
            .take()
    }

    /// The report slot.
    pub fn slot(&self) -> &ReportSlot {
        &self.slot
    }

    /// The reset-completed event.
    pub fn reset_signal(&self) -> &ResetSignal {
        &self.reset
    }

    /// Classify `message` and buffer it if it is a known report.
    ///
    /// Returns `Ok(true)` if the message was buffered and `Ok(false)` if its
    /// type is not buffered. Unknown types are dropped silently so they can
    /// never occupy the slot. Touch reports reach the event sink only once
    /// they have been buffered.
    pub fn classify_and_buffer(&self, message: &[u8]) -> Result<bool> {
        let Some(header) = decode_header(message) else {
            return Ok(false);
        };
        let mut forward = false;
        match header.tlv_type {
            TlvType::TouchReport | TlvType::ScreenOffReport => forward = true,
            TlvType::DeviceStatus => match DeviceStatus::parse(message) {
                Some(status) => {
                    debug!(
                        "Device status flags 0x{:02X} component 0x{:04X}",
                        status.flags, status.component
                    );
                    if status.is_reset() {
                        self.reset
                            .signal();
                    }
                },
                None => warn!("Truncated device status report"),
            },
            TlvType::PacketisedData | TlvType::EngineeringData => {},
            other => {
                trace!("Ignoring report {other}");
                return Ok(false);
            },
        }

        pause(self.settle);
        self.slot
            .store(message)?;
        trace!("Buffered {} ({} bytes)", header.tlv_type, header.len());
        if forward {
            if let Some(sink) = &self.sink {
                sink.on_touch_report(message);
            }
        }
        Ok(true)
    }
}

impl Default for ReportRouter {
    fn default() -> Self {
        Self::new(REPORT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[derive(Default)]
    struct Collect(Mutex<Vec<Vec<u8>>>);

    impl EventSink for Collect {
        fn on_touch_report(&self, message: &[u8]) {
            self.0
                .lock()
                .unwrap()
                .push(message.to_vec());
        }
    }

    #[test]
    fn test_unknown_type_not_buffered_slot_unchanged() {
        let router = ReportRouter::default();
        assert!(router.classify_and_buffer(&[0x21, 0x01, 0x00, 0x42]).unwrap());
        assert!(!router.classify_and_buffer(&[0x33, 0x01, 0x00, 0x99]).unwrap());
        assert!(!router.classify_and_buffer(&[0x50, 0x01, 0x00, 0x03]).unwrap());
        assert_eq!(router.slot().peek().unwrap(), vec![0x21, 0x01, 0x00, 0x42]);
    }

    #[test]
    fn test_oversized_rejected_slot_unchanged() {
        let router = ReportRouter::new(8);
        router.classify_and_buffer(&[0x81, 0x01, 0x00, 0x01]).unwrap();

        let big = [0x21, 0x06, 0x00, 1, 2, 3, 4, 5, 6];
        assert!(matches!(
            router.classify_and_buffer(&big),
            Err(Error::CapacityExceeded { length: 9, capacity: 8 })
        ));
        assert_eq!(router.slot().peek().unwrap(), vec![0x81, 0x01, 0x00, 0x01]);
    }

    #[test]
    fn test_last_write_wins() {
        let router = ReportRouter::default();
        router.classify_and_buffer(&[0x21, 0x01, 0x00, 0x01]).unwrap();
        router.classify_and_buffer(&[0x81, 0x01, 0x00, 0x02]).unwrap();
        assert_eq!(router.slot().take().unwrap(), vec![0x81, 0x01, 0x00, 0x02]);
        assert!(router.slot().is_empty());
    }

    #[test]
    fn test_touch_reports_forwarded_and_buffered() {
        let sink = Arc::new(Collect::default());
        let router = ReportRouter::default().with_event_sink(sink.clone());
        assert!(router.classify_and_buffer(&[0x23, 0x02, 0x00, 0x10, 0x20]).unwrap());
        assert!(router.classify_and_buffer(&[0x25, 0x00, 0x00]).unwrap());
        assert_eq!(sink.0.lock().unwrap().len(), 2);
        assert_eq!(router.slot().peek().unwrap(), vec![0x25, 0x00, 0x00]);
    }

    #[test]
    fn test_oversized_touch_report_not_forwarded() {
        let sink = Arc::new(Collect::default());
        let router = ReportRouter::new(8).with_event_sink(sink.clone());
        let big = [0x23, 0x06, 0x00, 1, 2, 3, 4, 5, 6];
        assert!(matches!(
            router.classify_and_buffer(&big),
            Err(Error::CapacityExceeded { length: 9, capacity: 8 })
        ));
        assert!(sink.0.lock().unwrap().is_empty());
        assert!(router.slot().is_empty());
    }

    #[test]
    fn test_reset_status_signals() {
        let router = ReportRouter::default();
        router
            .classify_and_buffer(&[0x22, 0x03, 0x00, 0x04, 0x00, 0x00])
            .unwrap();
        assert!(!router.reset_signal().is_set());
        router
            .classify_and_buffer(&[0x22, 0x03, 0x00, 0x01, 0x00, 0x00])
            .unwrap();
        assert!(router.reset_signal().wait(Duration::ZERO));
        assert!(!router.reset_signal().is_set());
    }

    #[test]
    fn test_reset_wait_wakes_from_other_thread() {
        let router = Arc::new(ReportRouter::default());
        let signaller = Arc::clone(&router);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            signaller
                .classify_and_buffer(&[0x22, 0x03, 0x00, 0x01, 0x00, 0x00])
                .unwrap();
        });
        assert!(router.reset_signal().wait(Duration::from_secs(5)));
        handle.join().unwrap();
    }

    #[test]
    fn test_reset_wait_times_out() {
        let signal = ResetSignal::default();
        assert!(!signal.wait(Duration::from_millis(5)));
    }
}
