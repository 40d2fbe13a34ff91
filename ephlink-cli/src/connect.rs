//! Opening a device from command-line options and configuration.
//!
//! Bus selection follows the same rules as the rest of the CLI: an explicit
//! `--device` wins, then the config file, then host discovery. Discovery with
//! more than one candidate prompts unless `--non-interactive` is set.

use {
    crate::{Cli, CliError, config::Config},
    anyhow::Result,
    dialoguer::{Error as DialoguerError, Select, theme::ColorfulTheme},
    ephlink::{BusInfo, Device, LinkKind, ReadyLine, Timing, Transport, discover_buses},
    log::{debug, info, warn},
    std::io::IsTerminal,
};

/// Device type used by every command.
pub(crate) type CliDevice = Device<Box<dyn Transport>, Box<dyn ReadyLine>>;

/// Default SPI clock (the bootloader accepts up to 2 MHz).
pub(crate) const DEFAULT_SPI_SPEED_HZ: u32 = 2_000_000;

/// Everything needed to open a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LinkSettings {
    pub kind: LinkKind,
    pub path: String,
    pub speed_hz: u32,
    pub address: Option<u8>,
    pub ready: Option<(String, u32)>,
    pub timing: Timing,
}

impl LinkSettings {
    /// Resolve the link from CLI options, then config, then discovery.
    pub(crate) fn resolve(cli: &Cli, config: &Config) -> Result<Self> {
        let explicit_kind = cli
            .bus
            .map(LinkKind::from)
            .or(config.bus.kind);

        let (kind, path) = match cli
            .device
            .clone()
            .or_else(|| config.bus.path.clone())
        {
            Some(path) => {
                let kind = explicit_kind
                    .or_else(|| guess_kind(&path))
                    .unwrap_or(LinkKind::Spi);
                (kind, path)
            },
            None => {
                let bus = select_bus(discover_buses(), explicit_kind, cli.non_interactive)?;
                (bus.kind, bus.path.display().to_string())
            },
        };

        let address = cli.address.or(config.bus.address);
        if kind == LinkKind::I2c && address.is_none() {
            return Err(CliError::Usage(
                "an I2C link needs a target address (--address or [bus] address)".to_string(),
            )
            .into());
        }

        let ready_chip = cli
            .ready_chip
            .clone()
            .or_else(|| config.ready.chip.clone());
        let ready_line = cli.ready_line.or(config.ready.line);
        let ready = match (ready_chip, ready_line) {
            (Some(chip), Some(line)) => Some((chip, line)),
            (None, None) => None,
            _ => {
                return Err(CliError::Usage(
                    "the ready line needs both a GPIO chip and a line offset".to_string(),
                )
                .into());
            },
        };

        Ok(Self {
            kind,
            path,
            speed_hz: cli
                .speed
                .or(config.bus.speed_hz)
                .unwrap_or(DEFAULT_SPI_SPEED_HZ),
            address,
            ready,
            timing: config
                .timing
                .to_timing(),
        })
    }
}

/// Guess the link flavour from a device node name.
fn guess_kind(path: &str) -> Option<LinkKind> {
    let name = path
        .rsplit('/')
        .next()
        .unwrap_or(path);
    ephlink::host::classify_node(name)
}

/// Pick one bus out of the discovered candidates.
fn select_bus(
    buses: Vec<BusInfo>,
    kind: Option<LinkKind>,
    non_interactive: bool,
) -> Result<BusInfo> {
    let mut candidates: Vec<BusInfo> = buses
        .into_iter()
        .filter(|bus| kind.is_none_or(|k| bus.kind == k))
        .collect();

    match candidates.len() {
        0 => Err(CliError::Usage(
            "no SPI or I2C bus found; pass --device or set [bus] path".to_string(),
        )
        .into()),
        1 => {
            let bus = candidates.remove(0);
            info!("Using {} ({})", bus.path.display(), bus.kind);
            Ok(bus)
        },
        _ if non_interactive => Err(CliError::Usage(format!(
            "multiple buses found ({}); pass --device",
            candidates
                .iter()
                .map(|bus| bus.path.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .into()),
        _ => {
            ensure_interactive_terminal()?;
            let items: Vec<String> = candidates
                .iter()
                .map(|bus| format!("{} ({})", bus.path.display(), bus.kind))
                .collect();
            let index = Select::with_theme(&ColorfulTheme::default())
                .with_prompt("Select the controller bus")
                .items(&items)
                .default(0)
                .interact_opt()
                .map_err(map_prompt_error)?
                .ok_or_else(|| CliError::Cancelled("bus selection cancelled".to_string()))?;
            Ok(candidates.swap_remove(index))
        },
    }
}

pub(crate) fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(CliError::Usage(
            "interactive prompt requires a terminal; use --non-interactive with explicit options"
                .to_string(),
        )
        .into())
    }
}

pub(crate) fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("prompt cancelled".to_string()).into()
            } else {
                CliError::Usage(format!("prompt failed: {io_err}")).into()
            }
        },
    }
}

/// Open the device described by the CLI options and config.
pub(crate) fn open_device(cli: &Cli, config: &Config) -> Result<CliDevice> {
    let settings = LinkSettings::resolve(cli, config)?;
    debug!("Link settings: {settings:?}");

    let transport = open_transport(&settings)?;
    let ready = open_ready_line(&settings)?;
    Ok(Device::new(transport)
        .with_timing(settings.timing)
        .with_ready_line(ready))
}

/// Open the device and cache its info record.
///
/// Control/config commands to protocol v3+ devices carry a CRC, which the
/// library only adds once it knows the protocol version.
pub(crate) fn open_app_device(cli: &Cli, config: &Config) -> Result<CliDevice> {
    let device = open_device(cli, config)?;
    match device.read_device_info() {
        Ok(info) => debug!("Device: {info}"),
        Err(e) => warn!("Device info unavailable, sending commands without CRC: {e}"),
    }
    Ok(device)
}

#[cfg(target_os = "linux")]
fn open_transport(settings: &LinkSettings) -> Result<Box<dyn Transport>> {
    Ok(match settings.kind {
        LinkKind::Spi => Box::new(ephlink::open_spi(&settings.path, settings.speed_hz)?),
        LinkKind::I2c => {
            let address = settings
                .address
                .ok_or_else(|| CliError::Usage("missing I2C address".to_string()))?;
            Box::new(ephlink::open_i2c(&settings.path, address)?)
        },
    })
}

#[cfg(target_os = "linux")]
fn open_ready_line(settings: &LinkSettings) -> Result<Box<dyn ReadyLine>> {
    Ok(match &settings.ready {
        Some((chip, line)) => Box::new(ephlink::CdevReadyLine::open(chip, *line)?),
        None => {
            debug!("No ready line configured, polling the bus");
            Box::new(ephlink::AlwaysReady)
        },
    })
}

#[cfg(not(target_os = "linux"))]
fn open_transport(settings: &LinkSettings) -> Result<Box<dyn Transport>> {
    Err(ephlink::Error::Unsupported(format!(
        "opening {} needs Linux spidev/i2c-dev support",
        settings.path
    ))
    .into())
}

#[cfg(not(target_os = "linux"))]
fn open_ready_line(_settings: &LinkSettings) -> Result<Box<dyn ReadyLine>> {
    Ok(Box::new(ephlink::AlwaysReady))
}
