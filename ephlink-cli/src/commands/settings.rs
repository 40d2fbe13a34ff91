//! Settings download and device mode command implementations.

use {
    crate::{Cli, config::Config, connect::open_app_device},
    anyhow::{Context, Result},
    console::style,
    ephlink::SettingsFile,
    std::{fs, path::Path},
};

/// Read and parse a device settings file.
pub(crate) fn load_settings(path: &Path) -> Result<SettingsFile> {
    let bytes = fs::read(path)
        .with_context(|| format!("Failed to read settings file {}", path.display()))?;
    SettingsFile::parse(&bytes)
        .with_context(|| format!("Failed to parse settings file {}", path.display()))
}

/// Apply a settings file.
pub(crate) fn cmd_settings(cli: &Cli, config: &Config, path: &Path) -> Result<()> {
    let file = load_settings(path)?;
    if file.is_empty() {
        if !cli.quiet {
            eprintln!(
                "{} {} contains no settings records",
                style("⚠").yellow(),
                path.display()
            );
        }
        return Ok(());
    }
    if !cli.quiet {
        eprintln!(
            "{} Applying {} records from {}",
            style("📦").cyan(),
            file.len(),
            path.display()
        );
    }

    let device = open_app_device(cli, config)?;
    let written = device
        .update_settings(&file)
        .context("Settings update failed")?;

    if !cli.quiet {
        eprintln!(
            "{} {written} records written, backed up and baselined",
            style("✓").green()
        );
    }
    Ok(())
}

fn done(cli: &Cli, what: &str) {
    if !cli.quiet {
        eprintln!("{} {what}", style("✓").green());
    }
}

/// Recalibrate the touch baseline.
pub(crate) fn cmd_baseline(cli: &Cli, config: &Config) -> Result<()> {
    open_app_device(cli, config)?
        .trigger_baseline()
        .context("Baseline failed")?;
    done(cli, "Baseline triggered");
    Ok(())
}

/// Back up the configuration to NVM.
pub(crate) fn cmd_backup(cli: &Cli, config: &Config) -> Result<()> {
    open_app_device(cli, config)?
        .backup_to_nvm()
        .context("Backup failed")?;
    done(cli, "Configuration backed up to NVM");
    Ok(())
}

/// Set the gesture mode.
pub(crate) fn cmd_gesture(cli: &Cli, config: &Config, mode: u8) -> Result<()> {
    open_app_device(cli, config)?
        .set_gesture_mode(mode)
        .context("Setting gesture mode failed")?;
    done(cli, &format!("Gesture mode set to {mode}"));
    Ok(())
}

/// Switch engineering mode.
pub(crate) fn cmd_engineering(cli: &Cli, config: &Config, enabled: bool) -> Result<()> {
    open_app_device(cli, config)?
        .set_engineering_mode(enabled)
        .context("Switching engineering mode failed")?;
    done(
        cli,
        if enabled {
            "Engineering mode on"
        } else {
            "Engineering mode off"
        },
    );
    Ok(())
}
