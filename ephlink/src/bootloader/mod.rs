//! Bootloader flasher.
//!
//! ## Sequence
//!
//! ```text
//! check(WaitingStartCommand) --ready--------> unlock --> release ready line
//!            |                                             |
//!            +--already unlocked--------------+------------+
//!                                             v
//!                       +--> check(WaitingFrameData)
//!                       |            |
//!                       |     engineering write (frame, last flag)
//!                       |            |
//!                       +----- more frames?
//! ```
//!
//! The device's own status report is authoritative: the flasher reads it
//! before the unlock and before every frame, and aborts on any state it
//! does not expect. A failed flash is never resumed; it restarts from the
//! first frame.

use log::{debug, error, info, warn};

use crate::comms::pause;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::image::FirmwareImage;
use crate::port::{ReadyLine, Transport};
use crate::protocol::command::{BOOTLOADER_COMPONENT_ID, BootloaderStatus, LAST_FRAME_DATA_ID};

/// Default number of whole flash attempts.
pub const DEFAULT_FLASH_ATTEMPTS: usize = 5;

/// Re-reads allowed when the device reports an application CRC failure.
pub const DEFAULT_APP_CRC_RECHECKS: usize = 1;

/// Result of a successful bootloader state check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The device is in the expected state.
    Ready,
    /// `WaitingStartCommand` was expected but the device already waits for
    /// frame data.
    AlreadyUnlocked,
}

/// Flashes firmware through the device's bootloader.
pub struct Bootloader<'d, T, R> {
    device: &'d Device<T, R>,
    app_crc_rechecks: usize,
}

impl<'d, T: Transport, R: ReadyLine> Bootloader<'d, T, R> {
    /// Bind to a device.
    pub fn new(device: &'d Device<T, R>) -> Self {
        Self {
            device,
            app_crc_rechecks: DEFAULT_APP_CRC_RECHECKS,
        }
    }

    /// Set how many times an application CRC failure is re-read.
    #[must_use]
    pub fn with_app_crc_rechecks(mut self, rechecks: usize) -> Self {
        self.app_crc_rechecks = rechecks;
        self
    }

    /// Check that the bootloader reports `expected`.
    pub fn check_bootloader(&self, expected: BootloaderStatus) -> Result<CheckOutcome> {
        self.check_bootloader_with(expected, self.app_crc_rechecks)
    }

    /// Check that the bootloader reports `expected`, re-reading up to
    /// `app_crc_rechecks` times while it reports an application CRC failure.
    ///
    /// Only `WaitingStartCommand` and `WaitingFrameData` can be expected.
    pub fn check_bootloader_with(
        &self,
        expected: BootloaderStatus,
        app_crc_rechecks: usize,
    ) -> Result<CheckOutcome> {
        if !matches!(
            expected,
            BootloaderStatus::WaitingStartCommand | BootloaderStatus::WaitingFrameData
        ) {
            return Err(Error::Unsupported(format!(
                "cannot wait for bootloader state '{expected}'"
            )));
        }

        let mut rechecks = 0;
        loop {
            if let Err(e) = self.device.wait_ready() {
                warn!("{e}, reading bootloader status anyway");
            }
            let report = self.device.read_message()?;
            let actual = BootloaderStatus::from_report(report.as_bytes());
            debug!("Bootloader status: {actual}");

            if actual == expected {
                return Ok(CheckOutcome::Ready);
            }
            match (expected, actual) {
                (BootloaderStatus::WaitingStartCommand, BootloaderStatus::AppCrcFailed)
                    if rechecks < app_crc_rechecks =>
                {
                    rechecks += 1;
                    debug!("Application CRC failed, re-reading status ({rechecks}/{app_crc_rechecks})");
                },
                (BootloaderStatus::WaitingStartCommand, BootloaderStatus::WaitingFrameData) => {
                    return Ok(CheckOutcome::AlreadyUnlocked);
                },
                _ => {
                    error!("Bootloader is '{actual}', expected '{expected}'");
                    return Err(Error::ProtocolState { expected, actual });
                },
            }
        }
    }

    /// Send every frame of `image`.
    ///
    /// `progress` is called after each frame with
    /// `(frame_index, bytes_sent, total_bytes)`.
    pub fn send_frames<F>(&self, image: &FirmwareImage, mut progress: F) -> Result<()>
    where
        F: FnMut(usize, usize, usize),
    {
        match self.check_bootloader(BootloaderStatus::WaitingStartCommand)? {
            CheckOutcome::Ready => {
                info!("Unlocking bootloader");
                let unlocked = self.device.unlock_bootloader();
                if let Err(e) = self.device.release_ready_line() {
                    warn!("Could not release ready line: {e}");
                }
                unlocked?;
                info!("Bootloader unlocked");
            },
            CheckOutcome::AlreadyUnlocked => info!("Bootloader already unlocked"),
        }

        let timing = *self.device.timing();
        let total = image.payload_len();
        let mut sent = 0;
        info!("Flashing {} frames ({total} bytes)", image.frame_count());

        for frame in image.frames() {
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }
            self.check_bootloader(BootloaderStatus::WaitingFrameData)?;

            let data_id = if frame.is_last { LAST_FRAME_DATA_ID } else { 0 };
            pause(timing.frame_gap);
            if let Err(e) = self
                .device
                .write_engineering_data(BOOTLOADER_COMPONENT_ID, data_id, frame.data)
            {
                warn!("Frame {} write failed ({e}), retrying once", frame.index);
                self.device
                    .write_engineering_data(BOOTLOADER_COMPONENT_ID, data_id, frame.data)?;
            }
            pause(timing.frame_gap);

            sent += frame.data.len();
            debug!("Frame {} sent ({sent}/{total})", frame.index);
            progress(frame.index, sent, total);
        }

        info!("Sent {} frames, {sent} bytes", image.frame_count());
        Ok(())
    }

    /// Flash `image`, restarting from the unlock up to `attempts` times.
    pub fn flash<F>(&self, image: &FirmwareImage, attempts: usize, mut progress: F) -> Result<()>
    where
        F: FnMut(usize, usize, usize),
    {
        let attempts = attempts.max(1);
        for attempt in 1..=attempts {
            match self.send_frames(image, &mut progress) {
                Ok(()) => {
                    info!("Flashing complete!");
                    return Ok(());
                },
                Err(Error::Interrupted) => return Err(Error::Interrupted),
                Err(e) if attempt < attempts => {
                    warn!("Flash failed (attempt {attempt}/{attempts}): {e}");
                    pause(self.device.timing().flash_retry_backoff);
                },
                Err(e) => return Err(e),
            }
        }
        Err(Error::Unsupported("no flash attempt made".into()))
    }
}
