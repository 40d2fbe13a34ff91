//! Image formats consumed by the engine.
//!
//! - [`firmware`] - encrypted bootloader images (length-prefixed frames)
//! - [`settings`] - device settings files (control/config write records)

pub mod firmware;
pub mod settings;

pub use firmware::{FirmwareImage, FirmwareInfo, Frame};
pub use settings::{SettingsEntry, SettingsFile};
