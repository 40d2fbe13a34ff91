//! # ephlink
//!
//! A library for talking to EPH861x touch controllers.
//!
//! This crate turns a raw, half-duplex, host-clocked SPI or I2C link into a
//! reliable TLV request/response channel, including:
//!
//! - TLV framing and the legacy CRC8 checksum
//! - Two-stage reads with not-ready suppression
//! - A retry-bounded transaction executor
//! - Classification and buffering of unsolicited reports
//! - Bootloader flashing of encrypted firmware images
//! - Device settings download
//!
//! ## Supported Platforms
//!
//! - **Native** (default): Linux `spidev`, `i2c-dev` and GPIO character
//!   devices via `linux-embedded-hal` and `gpio-cdev`
//! - Any other platform through the `embedded-hal` 1.0 bus traits
//!
//! ## Features
//!
//! - `native` (default): Linux device node support
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use ephlink::{Device, FirmwareImage};
//!
//! # #[cfg(all(feature = "native", target_os = "linux"))]
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = FirmwareImage::with_info_header(std::fs::read("eph861x.bin")?)?;
//!
//!     let transport = ephlink::port::open_spi("/dev/spidev0.0", 1_000_000)?;
//!     let ready = ephlink::port::CdevReadyLine::open("/dev/gpiochip0", 17)?;
//!     let device = Device::new(transport).with_ready_line(ready);
//!
//!     let info = device.read_device_info()?;
//!     if image.info().map_or(Ok(true), |fw| fw.needs_update(&info))? {
//!         device.force_bootloader_mode()?;
//!         device.bootloader().flash(&image, 5, |frame, sent, total| {
//!             println!("frame {frame}: {sent}/{total}");
//!         })?;
//!     }
//!
//!     Ok(())
//! }
//! # #[cfg(not(all(feature = "native", target_os = "linux")))]
//! # fn main() {}
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod bootloader;
pub mod comms;
pub mod device;
pub mod error;
pub mod host;
pub mod image;
pub mod port;
pub mod protocol;
pub mod report;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Loops consult
/// it between transactions, never inside one.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    test_interrupted()
        || INTERRUPT_CHECKER
            .get()
            .is_some_and(|checker| checker())
}

// Per test thread, so parallel tests never see each other's interruption.
#[cfg(test)]
thread_local! {
    static TEST_INTERRUPTED: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

#[cfg(test)]
fn test_interrupted() -> bool {
    TEST_INTERRUPTED.with(std::cell::Cell::get)
}

#[cfg(not(test))]
fn test_interrupted() -> bool {
    false
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    TEST_INTERRUPTED.with(|flag| flag.set(value));
}

// Re-exports for convenience
#[cfg(all(feature = "native", target_os = "linux"))]
pub use port::{CdevReadyLine, open_i2c, open_spi};
pub use {
    bootloader::{Bootloader, CheckOutcome, DEFAULT_FLASH_ATTEMPTS},
    comms::{Comms, ResponseCheck, RetryBudget, Timing},
    device::Device,
    error::{Error, Result},
    host::{BusInfo, discover_buses},
    image::{FirmwareImage, FirmwareInfo, Frame, SettingsEntry, SettingsFile},
    port::{
        AlwaysReady, I2cTransport, LinkKind, LinkLimits, PinReadyLine, ReadyLine, SpiTransport,
        Transport,
    },
    protocol::{
        BootloaderStatus, DeviceInfo, DeviceStatus, TlvHeader, TlvType, WriteAck,
        command::Space,
        crc::crc8,
        decode_header, encode_header,
        tlv::Message,
    },
    report::{EventSink, REPORT_CAPACITY, ReportRouter, ReportSlot, ResetSignal},
};
