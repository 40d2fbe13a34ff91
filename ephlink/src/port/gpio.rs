//! Ready line over an `embedded-hal` input pin.

use {
    crate::{
        error::{Error, Result},
        port::ReadyLine,
    },
    embedded_hal::digital::InputPin,
    log::trace,
};

/// Active-low CHG line read through an [`InputPin`].
pub struct PinReadyLine<P> {
    pin: P,
}

impl<P: InputPin> PinReadyLine<P> {
    /// Wrap an input pin.
    pub fn new(pin: P) -> Self {
        Self { pin }
    }
}

impl<P: InputPin + Send> ReadyLine for PinReadyLine<P> {
    fn is_ready(&mut self) -> Result<bool> {
        let low = self
            .pin
            .is_low()
            .map_err(|e| Error::Transport(format!("ready line read failed: {e:?}")))?;
        trace!("ready line {}", if low { "asserted" } else { "idle" });
        Ok(low)
    }
}
