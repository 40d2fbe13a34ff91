//! I2C transport over an `embedded-hal` [`I2c`] bus.

use {
    crate::{
        error::{Error, Result},
        port::{LinkLimits, Transport},
    },
    embedded_hal::i2c::I2c,
    log::trace,
};

/// I2C link to the controller at a fixed 7-bit address.
pub struct I2cTransport<I> {
    bus: I,
    address: u8,
    name: String,
}

impl<I: I2c> I2cTransport<I> {
    /// Wrap an I2C bus and target address.
    pub fn new(bus: I, address: u8, name: impl Into<String>) -> Self {
        Self {
            bus,
            address,
            name: name.into(),
        }
    }

    /// Target address.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Release the underlying bus.
    pub fn into_inner(self) -> I {
        self.bus
    }
}

impl<I: I2c + Send> Transport for I2cTransport<I> {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.limits()
            .check_write(buf.len())?;
        trace!("i2c 0x{:02X} write {} bytes: {:02X?}", self.address, buf.len(), buf);
        self.bus
            .write(self.address, buf)
            .map_err(|e| Error::Transport(format!("{}: I2C write failed: {e:?}", self.name)))
    }

    fn read(&mut self, out: &mut [u8]) -> Result<()> {
        self.limits()
            .check_read(out.len())?;
        self.bus
            .read(self.address, out)
            .map_err(|e| Error::Transport(format!("{}: I2C read failed: {e:?}", self.name)))?;
        trace!("i2c 0x{:02X} read {} bytes: {:02X?}", self.address, out.len(), out);
        Ok(())
    }

    fn limits(&self) -> LinkLimits {
        LinkLimits::I2C
    }

    fn name(&self) -> &str {
        &self.name
    }
}
