//! Port abstraction over the controller's physical link.
//!
//! The protocol engine only needs two primitives from the link: write a
//! buffer, and read a given number of bytes from whatever the device
//! currently has queued. Both link flavours are half-duplex and
//! host-clocked, so a read always returns the queued message from its
//! first byte.
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------+
//! |   Device / Bootloader (commands, flashing) |
//! +----------------------+---------------------+
//!                        |
//!                        v
//! +----------------------+---------------------+
//! |   Comms (two-stage reader, executor)       |
//! +----------------------+---------------------+
//!                        |
//!            +-----------+-----------+
//!            v                       v
//! +----------+---------+   +---------+----------+
//! | Transport trait    |   | ReadyLine trait    |
//! +----------+---------+   +---------+----------+
//!            |                       |
//!     +------+------+                v
//!     v             v         embedded-hal
//!  SpiTransport  I2cTransport  InputPin / gpio-cdev
//!  (SpiDevice)   (I2c)
//! ```

pub mod gpio;
pub mod i2c;
pub mod spi;

#[cfg(all(feature = "native", target_os = "linux"))]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::fmt;

use crate::error::{Error, Result};

/// Link flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum LinkKind {
    /// Block SPI link.
    Spi,
    /// Register/byte-stream I2C link.
    I2c,
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spi => write!(f, "spi"),
            Self::I2c => write!(f, "i2c"),
        }
    }
}

/// Fixed buffer ceilings of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkLimits {
    /// Largest single write.
    pub write: usize,
    /// Largest single read.
    pub read: usize,
}

impl LinkLimits {
    /// Ceilings of the SPI link.
    pub const SPI: Self = Self {
        write: 8192,
        read: 3072,
    };

    /// Ceilings of the I2C link.
    pub const I2C: Self = Self {
        write: 8192,
        read: 3072,
    };

    /// Fail if a write of `length` bytes exceeds the ceiling.
    pub fn check_write(&self, length: usize) -> Result<()> {
        if length > self.write {
            return Err(Error::MessageTooLarge {
                length,
                limit: self.write,
            });
        }
        Ok(())
    }

    /// Fail if a read of `length` bytes exceeds the ceiling.
    pub fn check_read(&self, length: usize) -> Result<()> {
        if length > self.read {
            return Err(Error::MessageTooLarge {
                length,
                limit: self.read,
            });
        }
        Ok(())
    }
}

/// Byte transport to the controller.
///
/// Implementations exist for:
///
/// - SPI buses via [`spi::SpiTransport`]
/// - I2C buses via [`i2c::I2cTransport`]
pub trait Transport: Send {
    /// Transfer exactly `buf.len()` bytes to the device.
    fn write(&mut self, buf: &[u8]) -> Result<()>;

    /// Fill exactly `out.len()` bytes from the device's output queue.
    fn read(&mut self, out: &mut [u8]) -> Result<()>;

    /// Buffer ceilings of this link.
    fn limits(&self) -> LinkLimits;

    /// Short description of the link (device node, bus address).
    fn name(&self) -> &str;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        (**self).write(buf)
    }

    fn read(&mut self, out: &mut [u8]) -> Result<()> {
        (**self).read(out)
    }

    fn limits(&self) -> LinkLimits {
        (**self).limits()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// The device's data-ready (CHG) line.
///
/// The device asserts it when it has a message queued. During flashing the
/// host may also hold the line, so it can be released back to an input.
pub trait ReadyLine: Send {
    /// Whether the device currently signals data ready.
    fn is_ready(&mut self) -> Result<bool>;

    /// Return the line to input mode after the host held it.
    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<R: ReadyLine + ?Sized> ReadyLine for Box<R> {
    fn is_ready(&mut self) -> Result<bool> {
        (**self).is_ready()
    }

    fn release(&mut self) -> Result<()> {
        (**self).release()
    }
}

/// Ready line for setups without a wired CHG signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReady;

impl ReadyLine for AlwaysReady {
    fn is_ready(&mut self) -> Result<bool> {
        Ok(true)
    }
}

pub use gpio::PinReadyLine;
pub use i2c::I2cTransport;
pub use spi::SpiTransport;

#[cfg(all(feature = "native", target_os = "linux"))]
pub use native::{CdevReadyLine, open_i2c, open_spi};
