//! Component access and raw message command implementations.
//!
//! Data read from the device goes to stdout as one hex line; status goes to
//! stderr.

use {
    crate::{
        Access, Cli, RawAction,
        config::Config,
        connect::{open_app_device, open_device},
        hex_line,
    },
    anyhow::{Context, Result},
    console::style,
    ephlink::Space,
};

/// Read or write a control/config component.
pub(crate) fn cmd_access(cli: &Cli, config: &Config, space: Space, action: &Access) -> Result<()> {
    let device = open_app_device(cli, config)?;

    match action {
        Access::Read {
            component,
            offset,
            length,
        } => {
            let response = device
                .read_control_config(space, *component, *offset, *length)
                .with_context(|| format!("Failed to read {space} component {component}"))?;
            println!("{}", hex_line(response.payload()));
        },
        Access::Write {
            component,
            value,
            offset,
        } => {
            device
                .write_control_config(space, *component, *offset, &value.0)
                .with_context(|| format!("Failed to write {space} component {component}"))?;
            if !cli.quiet {
                eprintln!(
                    "{} Wrote {} bytes to {space} component {component} offset {offset}",
                    style("✓").green(),
                    value.0.len()
                );
            }
        },
    }
    Ok(())
}

/// Raw message access.
pub(crate) fn cmd_raw(cli: &Cli, config: &Config, action: &RawAction) -> Result<()> {
    let device = open_device(cli, config)?;
    match action {
        RawAction::Write { bytes } => {
            device
                .write_raw(&bytes.0)
                .context("Raw write failed")?;
            if !cli.quiet {
                eprintln!("{} Wrote {} bytes", style("✓").green(), bytes.0.len());
            }
        },
        RawAction::Read => {
            let message = device
                .read_message()
                .context("Raw read failed")?;
            println!("{}", hex_line(message.as_bytes()));
        },
    }
    Ok(())
}
