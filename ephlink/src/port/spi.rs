//! SPI transport over an `embedded-hal` [`SpiDevice`].

use {
    crate::{
        error::{Error, Result},
        port::{LinkLimits, Transport},
    },
    embedded_hal::spi::SpiDevice,
    log::trace,
};

/// Filler clocked out while reading.
pub const DUMMY_BYTE: u8 = 0xFF;

/// SPI link to the controller.
///
/// The device is driven in SPI mode 3; chip select is owned by the
/// [`SpiDevice`] implementation.
pub struct SpiTransport<D> {
    device: D,
    name: String,
}

impl<D: SpiDevice> SpiTransport<D> {
    /// Wrap an SPI device.
    pub fn new(device: D, name: impl Into<String>) -> Self {
        Self {
            device,
            name: name.into(),
        }
    }

    /// Release the underlying device.
    pub fn into_inner(self) -> D {
        self.device
    }
}

impl<D: SpiDevice + Send> Transport for SpiTransport<D> {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.limits()
            .check_write(buf.len())?;
        trace!("spi write {} bytes: {:02X?}", buf.len(), buf);
        self.device
            .write(buf)
            .map_err(|e| Error::Transport(format!("{}: SPI write failed: {e:?}", self.name)))
    }

    fn read(&mut self, out: &mut [u8]) -> Result<()> {
        self.limits()
            .check_read(out.len())?;
        out.fill(DUMMY_BYTE);
        self.device
            .transfer_in_place(out)
            .map_err(|e| Error::Transport(format!("{}: SPI read failed: {e:?}", self.name)))?;
        trace!("spi read {} bytes: {:02X?}", out.len(), out);
        Ok(())
    }

    fn limits(&self) -> LinkLimits {
        LinkLimits::SPI
    }

    fn name(&self) -> &str {
        &self.name
    }
}
