//! Flash command implementation.

use {
    super::ensure_not_interrupted,
    crate::{
        Cli, CliError,
        config::Config,
        connect::{ensure_interactive_terminal, map_prompt_error, open_device},
        use_fancy_output,
    },
    anyhow::{Context, Result},
    console::style,
    dialoguer::{Confirm, theme::ColorfulTheme},
    ephlink::FirmwareImage,
    indicatif::{ProgressBar, ProgressStyle},
    log::{info, warn},
    std::{
        fs,
        path::{Path, PathBuf},
        thread,
        time::Duration,
    },
};

/// Time the controller needs to come back after a reset.
const RESET_TIME: Duration = Duration::from_millis(200);

/// Options of the flash command after merging CLI and config.
#[derive(Debug, Clone)]
pub(crate) struct FlashOptions {
    pub image: PathBuf,
    pub info_header: bool,
    pub attempts: usize,
    pub force: bool,
    pub yes: bool,
}

/// Read and validate a firmware image file.
pub(crate) fn load_image(path: &Path, info_header: bool) -> Result<FirmwareImage> {
    let data = fs::read(path)
        .with_context(|| format!("Failed to read firmware image {}", path.display()))?;
    let image = if info_header {
        FirmwareImage::with_info_header(data)
    } else {
        FirmwareImage::new(data)
    };
    image.with_context(|| format!("Failed to load firmware image {}", path.display()))
}

fn confirm_flash(cli: &Cli, options: &FlashOptions) -> Result<()> {
    if options.yes {
        return Ok(());
    }
    if cli.non_interactive {
        return Err(CliError::Usage(
            "flashing in non-interactive mode needs --yes".to_string(),
        )
        .into());
    }
    ensure_interactive_terminal()?;
    let proceed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!(
            "Flash {} to the controller?",
            options.image.display()
        ))
        .default(false)
        .interact()
        .map_err(map_prompt_error)?;
    if proceed {
        Ok(())
    } else {
        Err(CliError::Cancelled("flash cancelled".to_string()).into())
    }
}

/// Flash command implementation.
pub(crate) fn cmd_flash(cli: &Cli, config: &Config, options: &FlashOptions) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Loading firmware: {}",
            style("📦").cyan(),
            options.image.display()
        );
    }
    let image = load_image(&options.image, options.info_header)?;
    if !cli.quiet {
        eprintln!(
            "{} {} frames, {} bytes",
            style("ℹ").blue(),
            image.frame_count(),
            image.payload_len()
        );
    }

    let device = open_device(cli, config)?;
    if !cli.quiet {
        eprintln!("{} Using {}", style("🔌").cyan(), device.link_name());
    }

    // A device that answers the info request is running its application.
    let running = match device.read_device_info() {
        Ok(running) => {
            info!("Device: {running}");
            Some(running)
        },
        Err(e) => {
            warn!("No device info ({e}), assuming the bootloader is active");
            None
        },
    };

    if let (Some(fw), Some(running), false) = (image.info(), running.as_ref(), options.force) {
        if !fw.needs_update(running)? {
            if !cli.quiet {
                eprintln!(
                    "{} Device already runs {} (use --force to flash anyway)",
                    style("✓").green(),
                    running.application_version()
                );
            }
            return Ok(());
        }
    }

    confirm_flash(cli, options)?;
    ensure_not_interrupted()?;

    if running.is_some() {
        device
            .force_bootloader_mode()
            .context("Failed to enter bootloader mode")?;
        thread::sleep(RESET_TIME);
    }

    // Create progress bar
    let pb = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(image.payload_len() as u64);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    let frame_count = image.frame_count();
    let result = device
        .bootloader()
        .flash(&image, options.attempts, |frame, sent, _total| {
            pb.set_message(format!("frame {frame}/{frame_count}"));
            pb.set_position(sent as u64);
        });

    if let Err(e) = result {
        pb.abandon();
        return Err(e).context("Flashing failed");
    }
    pb.finish_with_message("complete");

    if !cli.quiet {
        eprintln!("{} Waiting for the application to start", style("🔄").cyan());
    }
    thread::sleep(RESET_TIME);
    match device.read_device_info() {
        Ok(updated) => {
            if !cli.quiet {
                eprintln!(
                    "\n{} Flashing completed, application {}",
                    style("🎉").green().bold(),
                    updated.application_version()
                );
            }
        },
        Err(e) => {
            warn!("Flashed, but the device did not answer afterwards: {e}");
            if !cli.quiet {
                eprintln!("\n{} Flashing completed", style("🎉").green().bold());
            }
        },
    }

    Ok(())
}
