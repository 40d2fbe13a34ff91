//! ephlink CLI - Command-line tool for EPH861x touch controllers.
//!
//! ## Features
//!
//! - Read device information
//! - Flash encrypted firmware images through the bootloader
//! - Download device settings files
//! - Read and write control/config components
//! - Monitor unsolicited reports
//! - Shell completion generation
//! - Environment variable support

use {
    anyhow::Result,
    clap::{Parser, Subcommand, ValueEnum},
    clap_complete::Shell,
    console::style,
    env_logger::Env,
    ephlink::LinkKind,
    log::debug,
    std::{
        env,
        path::PathBuf,
        sync::atomic::{AtomicBool, Ordering},
    },
};

mod commands;
mod config;
mod connect;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if progress bars and colors should be used.
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// CLI-level errors with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or missing setup.
    #[error("{0}")]
    Usage(String),
    /// Invalid configuration.
    #[error("{0}")]
    Config(String),
    /// Cancelled by the user.
    #[error("{0}")]
    Cancelled(String),
}

/// Map an error to the process exit code.
///
/// 0 success, 1 generic failure, 2 usage, 3 config, 4 device/transport,
/// 130 cancelled.
pub(crate) fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Config(_) => 3,
            CliError::Cancelled(_) => 130,
        };
    }
    if let Some(lib_err) = err.downcast_ref::<ephlink::Error>() {
        return match lib_err {
            ephlink::Error::Interrupted => 130,
            ephlink::Error::Config(_) => 3,
            ephlink::Error::Io(_)
            | ephlink::Error::Transport(_)
            | ephlink::Error::MessageTooLarge { .. }
            | ephlink::Error::DataNotReady { .. }
            | ephlink::Error::TypeMismatch { .. }
            | ephlink::Error::Integrity(_)
            | ephlink::Error::RetryBudgetExhausted { .. }
            | ephlink::Error::CapacityExceeded { .. }
            | ephlink::Error::ProtocolState { .. }
            | ephlink::Error::Timeout(_) => 4,
            ephlink::Error::InvalidImage(_)
            | ephlink::Error::InvalidSettings(_)
            | ephlink::Error::Unsupported(_) => 1,
        };
    }
    1
}

/// ephlink - Talk to and flash EPH861x touch controllers.
///
/// Environment variables:
///   EPHLINK_BUS               - Link flavour (spi, i2c)
///   EPHLINK_DEVICE            - Bus device node
///   EPHLINK_SPEED             - SPI clock in Hz
///   EPHLINK_ADDRESS           - I2C target address
///   EPHLINK_READY_CHIP        - GPIO chip of the ready line
///   EPHLINK_READY_LINE        - Ready line offset
///   EPHLINK_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "ephlink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Link flavour (guessed from the device node if not specified).
    #[arg(long, global = true, env = "EPHLINK_BUS")]
    bus: Option<Bus>,

    /// Bus device node (auto-detected if not specified).
    #[arg(short, long, global = true, env = "EPHLINK_DEVICE")]
    device: Option<String>,

    /// SPI clock in Hz.
    #[arg(long, global = true, env = "EPHLINK_SPEED")]
    speed: Option<u32>,

    /// I2C target address (decimal or 0x-prefixed hex).
    #[arg(long, global = true, env = "EPHLINK_ADDRESS", value_parser = parse_u8)]
    address: Option<u8>,

    /// GPIO chip carrying the ready (CHG) line.
    #[arg(long, global = true, env = "EPHLINK_READY_CHIP")]
    ready_chip: Option<String>,

    /// Ready (CHG) line offset on the GPIO chip.
    #[arg(long, global = true, env = "EPHLINK_READY_LINE")]
    ready_line: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "EPHLINK_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Link flavours.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum Bus {
    /// SPI (spidev).
    Spi,
    /// I2C (i2c-dev).
    I2c,
}

impl From<Bus> for LinkKind {
    fn from(bus: Bus) -> Self {
        match bus {
            Bus::Spi => LinkKind::Spi,
            Bus::I2c => LinkKind::I2c,
        }
    }
}

/// On/off switch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum Switch {
    /// Enable.
    On,
    /// Disable.
    Off,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Read and print the device information record.
    Info {
        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Flash an encrypted firmware image through the bootloader.
    Flash {
        /// Path to the firmware image.
        image: PathBuf,

        /// The image starts with the 8-byte firmware info header.
        #[arg(long)]
        info_header: bool,

        /// Whole-image attempts before giving up.
        #[arg(long)]
        attempts: Option<usize>,

        /// Flash even if the device already runs this version.
        #[arg(long)]
        force: bool,

        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// Show the frame layout of a firmware image (no device needed).
    ImageInfo {
        /// Path to the firmware image.
        image: PathBuf,

        /// The image starts with the 8-byte firmware info header.
        #[arg(long)]
        info_header: bool,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Apply a device settings file.
    Settings {
        /// Path to the settings file.
        file: PathBuf,
    },

    /// Access a control component.
    Control {
        #[command(subcommand)]
        action: Access,
    },

    /// Access a config component.
    Config {
        #[command(subcommand)]
        action: Access,
    },

    /// Recalibrate the touch baseline.
    Baseline,

    /// Back up the configuration to non-volatile memory.
    Backup,

    /// Set the gesture mode (low nibble only).
    Gesture {
        /// Gesture mode, 0 to 15.
        #[arg(value_parser = parse_u8)]
        mode: u8,
    },

    /// Switch engineering mode on or off.
    Engineering {
        /// New state.
        #[arg(value_enum)]
        state: Switch,
    },

    /// Poll the device and print reports as hex lines.
    Monitor {
        /// Stop after this many reports.
        #[arg(long)]
        count: Option<usize>,
    },

    /// Raw message access.
    Raw {
        #[command(subcommand)]
        action: RawAction,
    },

    /// List SPI and I2C bus nodes on this host.
    ListBuses {
        /// Output bus list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Component access.
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub(crate) enum Access {
    /// Read bytes from a component.
    Read {
        /// Component id.
        #[arg(value_parser = parse_u16)]
        component: u16,

        /// Offset within the component.
        #[arg(long, default_value = "0", value_parser = parse_u16)]
        offset: u16,

        /// Number of bytes to read.
        #[arg(long, default_value = "1", value_parser = parse_u16)]
        length: u16,
    },
    /// Write bytes into a component.
    Write {
        /// Component id.
        #[arg(value_parser = parse_u16)]
        component: u16,

        /// Value as hex bytes (e.g., "01 02" or "0102").
        #[arg(value_parser = parse_hex_arg)]
        value: HexBytes,

        /// Offset within the component.
        #[arg(long, default_value = "0", value_parser = parse_u16)]
        offset: u16,
    },
}

/// Raw message access.
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub(crate) enum RawAction {
    /// Write a raw message.
    Write {
        /// Message as hex bytes.
        #[arg(value_parser = parse_hex_arg)]
        bytes: HexBytes,
    },
    /// Read one message.
    Read,
}

/// Bytes given as one hex argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct HexBytes(pub Vec<u8>);

/// Parse a number in decimal or 0x-prefixed hex.
fn parse_u64(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let parsed = match s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => s
            .replace('_', "")
            .parse(),
    };
    parsed.map_err(|e| format!("Invalid number '{s}': {e}"))
}

fn parse_u16(s: &str) -> Result<u16, String> {
    u16::try_from(parse_u64(s)?).map_err(|_| format!("'{s}' does not fit in 16 bits"))
}

fn parse_u8(s: &str) -> Result<u8, String> {
    u8::try_from(parse_u64(s)?).map_err(|_| format!("'{s}' does not fit in 8 bits"))
}

/// Parse hex bytes, ignoring whitespace, `:` and `,` separators and `0x` prefixes.
fn parse_hex_bytes(s: &str) -> Result<Vec<u8>, String> {
    let digits: String = s
        .split(|c: char| c.is_whitespace() || c == ':' || c == ',')
        .map(|token| {
            token
                .strip_prefix("0x")
                .or_else(|| token.strip_prefix("0X"))
                .unwrap_or(token)
        })
        .collect();
    if digits.is_empty() {
        return Err("no bytes given".to_string());
    }
    if !digits.is_ascii() {
        return Err(format!("Invalid hex in '{s}'"));
    }
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in '{s}'"));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|e| format!("Invalid hex byte '{}': {e}", &digits[i..i + 2]))
        })
        .collect()
}

fn parse_hex_arg(s: &str) -> Result<HexBytes, String> {
    parse_hex_bytes(s).map(HexBytes)
}

/// Format bytes as space-separated hex.
pub(crate) fn hex_line(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn install_interrupt_handler() {
    if let Err(e) = ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::Relaxed) {
            // Second Ctrl-C: stop waiting for the current transaction.
            std::process::exit(130);
        }
        eprintln!("\nInterrupted, stopping after the current transaction...");
    }) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    ephlink::set_interrupt_checker(was_interrupted);
}

fn main() {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);
    install_interrupt_handler();

    debug!(
        "ephlink v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code_for(&err));
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        if !path.exists() {
            return Err(CliError::Config(format!(
                "config file {} does not exist",
                path.display()
            ))
            .into());
        }
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Info { json } => commands::info::cmd_info(cli, &config, *json),
        Commands::Flash {
            image,
            info_header,
            attempts,
            force,
            yes,
        } => commands::flash::cmd_flash(
            cli,
            &config,
            &commands::flash::FlashOptions {
                image: image.clone(),
                info_header: *info_header || config.flash.info_header,
                attempts: attempts
                    .or(config.flash.attempts)
                    .unwrap_or(ephlink::DEFAULT_FLASH_ATTEMPTS),
                force: *force,
                yes: *yes,
            },
        ),
        Commands::ImageInfo {
            image,
            info_header,
            json,
        } => commands::info::cmd_image_info(image, *info_header || config.flash.info_header, *json),
        Commands::Settings { file } => commands::settings::cmd_settings(cli, &config, file),
        Commands::Control { action } => {
            commands::raw::cmd_access(cli, &config, ephlink::Space::Control, action)
        },
        Commands::Config { action } => {
            commands::raw::cmd_access(cli, &config, ephlink::Space::Config, action)
        },
        Commands::Baseline => commands::settings::cmd_baseline(cli, &config),
        Commands::Backup => commands::settings::cmd_backup(cli, &config),
        Commands::Gesture { mode } => commands::settings::cmd_gesture(cli, &config, *mode),
        Commands::Engineering { state } => {
            commands::settings::cmd_engineering(cli, &config, *state == Switch::On)
        },
        Commands::Monitor { count } => commands::monitor::cmd_monitor(cli, &config, *count),
        Commands::Raw { action } => commands::raw::cmd_raw(cli, &config, action),
        Commands::ListBuses { json } => commands::info::cmd_list_buses(*json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_flash_with_all_options() {
        let cli = Cli::try_parse_from([
            "ephlink",
            "--device",
            "/dev/spidev0.0",
            "flash",
            "fw.bin",
            "--info-header",
            "--attempts",
            "3",
            "--force",
            "--yes",
        ])
        .unwrap();
        assert_eq!(cli.device.as_deref(), Some("/dev/spidev0.0"));
        if let Commands::Flash {
            image,
            info_header,
            attempts,
            force,
            yes,
        } = cli.command
        {
            assert_eq!(image.to_str().unwrap(), "fw.bin");
            assert!(info_header);
            assert_eq!(attempts, Some(3));
            assert!(force);
            assert!(yes);
        } else {
            panic!("Expected Flash command");
        }
    }

    #[test]
    fn test_cli_parse_control_read() {
        let cli = Cli::try_parse_from([
            "ephlink", "control", "read", "0x1C2", "--offset", "30", "--length", "4",
        ])
        .unwrap();
        if let Commands::Control { action } = cli.command {
            assert_eq!(
                action,
                Access::Read {
                    component: 0x1C2,
                    offset: 30,
                    length: 4
                }
            );
        } else {
            panic!("Expected Control command");
        }
    }

    #[test]
    fn test_cli_parse_config_write() {
        let cli = Cli::try_parse_from(["ephlink", "config", "write", "450", "0x05"]).unwrap();
        if let Commands::Config { action } = cli.command {
            assert_eq!(
                action,
                Access::Write {
                    component: 450,
                    value: HexBytes(vec![0x05]),
                    offset: 0
                }
            );
        } else {
            panic!("Expected Config command");
        }
    }

    #[test]
    fn test_cli_parse_raw_write() {
        let cli = Cli::try_parse_from(["ephlink", "raw", "write", "01 00 00"]).unwrap();
        if let Commands::Raw { action } = cli.command {
            assert_eq!(
                action,
                RawAction::Write {
                    bytes: HexBytes(vec![0x01, 0x00, 0x00])
                }
            );
        } else {
            panic!("Expected Raw command");
        }
    }

    #[test]
    fn test_cli_parse_engineering() {
        let cli = Cli::try_parse_from(["ephlink", "engineering", "off"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Engineering { state: Switch::Off }
        ));
        assert!(Cli::try_parse_from(["ephlink", "engineering", "maybe"]).is_err());
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "ephlink",
            "--bus",
            "i2c",
            "--device",
            "/dev/i2c-1",
            "--address",
            "0x4a",
            "--ready-chip",
            "/dev/gpiochip0",
            "--ready-line",
            "17",
            "-vv",
            "--quiet",
            "--non-interactive",
            "--config",
            "/tmp/ephlink.toml",
            "list-buses",
        ])
        .unwrap();
        assert_eq!(cli.bus, Some(Bus::I2c));
        assert_eq!(cli.address, Some(0x4A));
        assert_eq!(cli.ready_chip.as_deref(), Some("/dev/gpiochip0"));
        assert_eq!(cli.ready_line, Some(17));
        assert_eq!(cli.verbose, 2);
        assert!(cli.quiet);
        assert!(cli.non_interactive);
        assert!(cli.config_path.is_some());
    }

    #[test]
    fn test_cli_missing_subcommand() {
        assert!(Cli::try_parse_from(["ephlink"]).is_err());
    }

    #[test]
    fn test_cli_invalid_bus() {
        assert!(Cli::try_parse_from(["ephlink", "--bus", "uart", "list-buses"]).is_err());
    }

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_u16("450"), Ok(450));
        assert_eq!(parse_u16("0x01C2"), Ok(0x1C2));
        assert_eq!(parse_u16("0xFE_FE"), Ok(0xFEFE));
        assert!(parse_u16("0x10000").is_err());
        assert!(parse_u8("256").is_err());
        assert!(parse_u8("zz").is_err());
    }

    #[test]
    fn test_parse_hex_bytes() {
        assert_eq!(parse_hex_bytes("0102"), Ok(vec![1, 2]));
        assert_eq!(parse_hex_bytes("01 02 ff"), Ok(vec![1, 2, 0xFF]));
        assert_eq!(parse_hex_bytes("0x08,0x06"), Ok(vec![8, 6]));
        assert_eq!(parse_hex_bytes("de:ad"), Ok(vec![0xDE, 0xAD]));
        assert!(parse_hex_bytes("123").is_err());
        assert!(parse_hex_bytes("").is_err());
        assert!(parse_hex_bytes("gg").is_err());
    }

    #[test]
    fn test_hex_line() {
        assert_eq!(hex_line(&[0x01, 0x09, 0xAB]), "01 09 AB");
        assert_eq!(hex_line(&[]), "");
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code_for(&CliError::Usage("x".into()).into()), 2);
        assert_eq!(exit_code_for(&CliError::Config("x".into()).into()), 3);
        assert_eq!(exit_code_for(&CliError::Cancelled("x".into()).into()), 130);
        assert_eq!(exit_code_for(&ephlink::Error::Interrupted.into()), 130);
        assert_eq!(
            exit_code_for(&ephlink::Error::RetryBudgetExhausted { cycles: 5 }.into()),
            4
        );
        assert_eq!(
            exit_code_for(&ephlink::Error::Transport("gone".into()).into()),
            4
        );
        assert_eq!(
            exit_code_for(&ephlink::Error::InvalidImage("empty".into()).into()),
            1
        );
        assert_eq!(exit_code_for(&anyhow::anyhow!("other")), 1);
    }

    #[test]
    fn test_exit_code_through_context() {
        let err = anyhow::Error::from(ephlink::Error::Timeout("ready".into()))
            .context("Failed to read device info");
        assert_eq!(exit_code_for(&err), 4);
    }
}
