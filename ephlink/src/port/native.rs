//! Linux device-node adapters (`spidev`, `i2c-dev`, GPIO character device).

use {
    crate::{
        error::{Error, Result},
        port::{I2cTransport, ReadyLine, SpiTransport},
    },
    gpio_cdev::{Chip, LineHandle, LineRequestFlags},
    linux_embedded_hal::{
        I2cdev, SpidevDevice,
        spidev::{SpiModeFlags, SpidevOptions},
    },
    log::{debug, trace},
};

/// Consumer label used when requesting GPIO lines.
const GPIO_CONSUMER: &str = "ephlink";

/// Open an SPI device node in mode 3 at `speed_hz`.
pub fn open_spi(path: &str, speed_hz: u32) -> Result<SpiTransport<SpidevDevice>> {
    let mut device = SpidevDevice::open(path)
        .map_err(|e| Error::Transport(format!("{path}: cannot open SPI device: {e:?}")))?;
    let options = SpidevOptions::new()
        .bits_per_word(8)
        .max_speed_hz(speed_hz)
        .mode(SpiModeFlags::SPI_MODE_3)
        .build();
    device
        .configure(&options)
        .map_err(|e| Error::Transport(format!("{path}: cannot configure SPI: {e:?}")))?;
    debug!("Opened {path} at {speed_hz} Hz, mode 3");
    Ok(SpiTransport::new(device, path))
}

/// Open an I2C bus node targeting `address`.
pub fn open_i2c(path: &str, address: u8) -> Result<I2cTransport<I2cdev>> {
    let bus = I2cdev::new(path)
        .map_err(|e| Error::Transport(format!("{path}: cannot open I2C bus: {e:?}")))?;
    debug!("Opened {path}, address 0x{address:02X}");
    Ok(I2cTransport::new(bus, address, format!("{path}@0x{address:02X}")))
}

/// Active-low CHG line requested through the GPIO character device.
pub struct CdevReadyLine {
    handle: LineHandle,
    label: String,
}

impl CdevReadyLine {
    /// Request `line` on `chip` (for example `/dev/gpiochip0`) as an input.
    pub fn open(chip: &str, line: u32) -> Result<Self> {
        let mut chip_handle = Chip::new(chip)
            .map_err(|e| Error::Transport(format!("{chip}: cannot open GPIO chip: {e}")))?;
        let handle = chip_handle
            .get_line(line)
            .and_then(|l| l.request(LineRequestFlags::INPUT, 0, GPIO_CONSUMER))
            .map_err(|e| Error::Transport(format!("{chip} line {line}: cannot request: {e}")))?;
        debug!("Requested ready line {chip}:{line}");
        Ok(Self {
            handle,
            label: format!("{chip}:{line}"),
        })
    }
}

impl ReadyLine for CdevReadyLine {
    fn is_ready(&mut self) -> Result<bool> {
        let value = self
            .handle
            .get_value()
            .map_err(|e| Error::Transport(format!("{}: read failed: {e}", self.label)))?;
        trace!("{} = {value}", self.label);
        Ok(value == 0)
    }
}
