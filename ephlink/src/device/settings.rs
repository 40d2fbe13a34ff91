//! Device settings download.

use log::{debug, error, info, warn};

use crate::device::Device;
use crate::error::{Error, Result};
use crate::image::{SettingsEntry, SettingsFile};
use crate::port::{ReadyLine, Transport};

/// Attempts per settings record (one try plus ten retries).
const SETTINGS_ATTEMPTS: usize = 11;

impl<T: Transport, R: ReadyLine> Device<T, R> {
    /// Write every record of a settings file to the device.
    ///
    /// Engineering mode is held while writing. On success the config space
    /// is backed up to NVM and a baseline is triggered; failures of those
    /// follow-up commands are only logged. Returns the number of records
    /// written.
    pub fn update_settings(&self, file: &SettingsFile) -> Result<usize> {
        if let Err(e) = self.set_engineering_mode(true) {
            warn!("Could not enable engineering mode: {e}");
        }

        let written = self.write_settings_entries(file);

        if let Err(e) = self.set_engineering_mode(false) {
            warn!("Could not disable engineering mode: {e}");
        }
        let count = written?;

        if let Err(e) = self.backup_to_nvm() {
            warn!("Backup to NVM failed: {e}");
        }
        if let Err(e) = self.trigger_baseline() {
            warn!("Baseline trigger failed: {e}");
        }
        info!("Applied {count} settings records");
        Ok(count)
    }

    fn write_settings_entries(&self, file: &SettingsFile) -> Result<usize> {
        for (i, entry) in file
            .entries()
            .iter()
            .enumerate()
        {
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }
            self.write_settings_entry(i + 1, entry)?;
        }
        Ok(file.len())
    }

    fn write_settings_entry(&self, number: usize, entry: &SettingsEntry) -> Result<()> {
        debug!(
            "Settings record {number}: {} component {} offset {} ({} bytes)",
            entry.space,
            entry.component,
            entry.offset,
            entry.raw.len()
        );
        let mut last_error = String::new();
        for attempt in 1..=SETTINGS_ATTEMPTS {
            match self.write_command(entry.raw.clone()) {
                Ok(_) => return Ok(()),
                Err(e) => {
                    if attempt < SETTINGS_ATTEMPTS {
                        warn!("Settings record {number} failed ({e}), retrying ({attempt}/{SETTINGS_ATTEMPTS})");
                    }
                    last_error = e.to_string();
                },
            }
        }
        error!("Settings record {number} rejected after {SETTINGS_ATTEMPTS} attempts");
        Err(Error::InvalidSettings(format!(
            "record {number} ({} component {}, offset {}) failed: {last_error}",
            entry.space, entry.component, entry.offset
        )))
    }
}
