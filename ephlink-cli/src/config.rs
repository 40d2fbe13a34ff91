//! Configuration file support for ephlink.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (EPHLINK_*)
//! 3. Local config file (./ephlink.toml)
//! 4. Global config file (~/.config/ephlink/config.toml)

use {
    directories::ProjectDirs,
    ephlink::{LinkKind, Timing},
    log::{debug, warn},
    serde::{Deserialize, Serialize},
    std::{
        fs,
        path::{Path, PathBuf},
        time::Duration,
    },
};

/// Local config file name, looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "ephlink.toml";

/// Bus connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusConfig {
    /// Link flavour ("spi" or "i2c").
    pub kind: Option<LinkKind>,
    /// Device node (e.g., "/dev/spidev0.0" or "/dev/i2c-1").
    pub path: Option<String>,
    /// SPI clock in Hz.
    pub speed_hz: Option<u32>,
    /// I2C target address.
    pub address: Option<u8>,
}

/// Ready (CHG) line configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadyConfig {
    /// GPIO chip device (e.g., "/dev/gpiochip0").
    pub chip: Option<String>,
    /// Line offset on the chip.
    pub line: Option<u32>,
}

/// Timing overrides, all in microseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimingConfig {
    pub header_settle: Option<u64>,
    pub not_ready_retry: Option<u64>,
    pub pre_write: Option<u64>,
    pub query_settle: Option<u64>,
    pub control_settle: Option<u64>,
    pub bulk_settle: Option<u64>,
    pub completion_settle: Option<u64>,
    pub failure_backoff: Option<u64>,
    pub report_settle: Option<u64>,
    pub frame_gap: Option<u64>,
    pub ready_timeout: Option<u64>,
    pub ready_poll: Option<u64>,
    pub no_response_settle: Option<u64>,
    pub flash_retry_backoff: Option<u64>,
}

impl TimingConfig {
    /// Apply the overrides on top of the default timing.
    pub fn to_timing(&self) -> Timing {
        let mut timing = Timing::default();
        let fields = [
            (self.header_settle, &mut timing.header_settle),
            (self.not_ready_retry, &mut timing.not_ready_retry),
            (self.pre_write, &mut timing.pre_write),
            (self.query_settle, &mut timing.query_settle),
            (self.control_settle, &mut timing.control_settle),
            (self.bulk_settle, &mut timing.bulk_settle),
            (self.completion_settle, &mut timing.completion_settle),
            (self.failure_backoff, &mut timing.failure_backoff),
            (self.report_settle, &mut timing.report_settle),
            (self.frame_gap, &mut timing.frame_gap),
            (self.ready_timeout, &mut timing.ready_timeout),
            (self.ready_poll, &mut timing.ready_poll),
            (self.no_response_settle, &mut timing.no_response_settle),
            (self.flash_retry_backoff, &mut timing.flash_retry_backoff),
        ];
        for (value, field) in fields {
            if let Some(us) = value {
                *field = Duration::from_micros(us);
            }
        }
        timing
    }

    fn merge(&mut self, other: Self) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() {
                    self.$field = other.$field;
                })*
            };
        }
        take!(
            header_settle,
            not_ready_retry,
            pre_write,
            query_settle,
            control_settle,
            bulk_settle,
            completion_settle,
            failure_backoff,
            report_settle,
            frame_gap,
            ready_timeout,
            ready_poll,
            no_response_settle,
            flash_retry_backoff
        );
    }
}

/// Flash configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Whole-image attempts.
    pub attempts: Option<usize>,
    /// Images carry the 8-byte firmware info header by default.
    #[serde(default)]
    pub info_header: bool,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Bus configuration.
    #[serde(default)]
    pub bus: BusConfig,
    /// Ready line configuration.
    #[serde(default)]
    pub ready: ReadyConfig,
    /// Timing overrides.
    #[serde(default)]
    pub timing: TimingConfig,
    /// Flash configuration.
    #[serde(default)]
    pub flash: FlashConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Invalid TOML in config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "ephlink").map(|dirs| {
            dirs.config_dir()
                .to_path_buf()
        })
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        // Bus config
        if other.bus.kind.is_some() {
            self.bus.kind = other.bus.kind;
        }
        if other.bus.path.is_some() {
            self.bus.path = other.bus.path;
        }
        if other.bus.speed_hz.is_some() {
            self.bus.speed_hz = other.bus.speed_hz;
        }
        if other.bus.address.is_some() {
            self.bus.address = other.bus.address;
        }

        // Ready line config
        if other.ready.chip.is_some() {
            self.ready.chip = other.ready.chip;
        }
        if other.ready.line.is_some() {
            self.ready.line = other.ready.line;
        }

        self.timing.merge(other.timing);

        // Flash config
        if other.flash.attempts.is_some() {
            self.flash.attempts = other.flash.attempts;
        }
        if other.flash.info_header {
            self.flash.info_header = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.bus.kind.is_none());
        assert!(config.bus.path.is_none());
        assert!(config.ready.chip.is_none());
        assert!(config.flash.attempts.is_none());
        assert!(!config.flash.info_header);
    }

    #[test]
    fn test_config_merge_bus() {
        let mut config = Config::default();
        config.bus.path = Some("/dev/spidev0.0".to_string());
        config.bus.speed_hz = Some(1_000_000);

        let mut other = Config::default();
        other.bus.kind = Some(LinkKind::I2c);
        other.bus.path = Some("/dev/i2c-1".to_string());
        config.merge(other);

        assert_eq!(config.bus.kind, Some(LinkKind::I2c));
        assert_eq!(config.bus.path.as_deref(), Some("/dev/i2c-1"));
        assert_eq!(config.bus.speed_hz, Some(1_000_000));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut config = Config::default();
        config.ready.chip = Some("/dev/gpiochip0".to_string());
        config.ready.line = Some(17);
        config.flash.attempts = Some(3);

        config.merge(Config::default());
        assert_eq!(config.ready.chip.as_deref(), Some("/dev/gpiochip0"));
        assert_eq!(config.ready.line, Some(17));
        assert_eq!(config.flash.attempts, Some(3));
    }

    #[test]
    fn test_config_merge_timing_per_field() {
        let mut config = Config::default();
        config.timing.frame_gap = Some(2000);
        config.timing.bulk_settle = Some(5000);

        let mut other = Config::default();
        other.timing.frame_gap = Some(1500);
        config.merge(other);

        assert_eq!(config.timing.frame_gap, Some(1500));
        assert_eq!(config.timing.bulk_settle, Some(5000));
    }

    #[test]
    fn test_timing_overrides_applied() {
        let overrides = TimingConfig {
            frame_gap: Some(2000),
            ready_timeout: Some(1_000_000),
            ..TimingConfig::default()
        };
        let timing = overrides.to_timing();
        assert_eq!(timing.frame_gap, Duration::from_millis(2));
        assert_eq!(timing.ready_timeout, Duration::from_secs(1));
        assert_eq!(timing.header_settle, Timing::default().header_settle);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[bus]
kind = "spi"
path = "/dev/spidev1.0"
speed_hz = 2000000

[ready]
chip = "/dev/gpiochip0"
line = 17

[timing]
frame_gap = 1500

[flash]
attempts = 3
info_header = true
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.bus.kind, Some(LinkKind::Spi));
        assert_eq!(config.bus.path.as_deref(), Some("/dev/spidev1.0"));
        assert_eq!(config.bus.speed_hz, Some(2_000_000));
        assert_eq!(config.ready.line, Some(17));
        assert_eq!(config.timing.frame_gap, Some(1500));
        assert_eq!(config.flash.attempts, Some(3));
        assert!(config.flash.info_header);
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.bus.kind.is_none());
        assert!(config.timing.frame_gap.is_none());
    }

    #[test]
    fn test_config_rejects_unknown_bus_kind() {
        let result: Result<Config, _> = toml::from_str("[bus]\nkind = \"uart\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ephlink.toml");
        fs::write(
            &path,
            r#"
[bus]
kind = "i2c"
path = "/dev/i2c-3"
address = 74
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.bus.kind, Some(LinkKind::I2c));
        assert_eq!(config.bus.path.as_deref(), Some("/dev/i2c-3"));
        assert_eq!(config.bus.address, Some(0x4A));
    }

    #[test]
    fn test_load_from_path_invalid_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "invalid toml [[[").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.bus.path.is_none());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert!(config.bus.kind.is_none());
    }

    #[test]
    fn test_global_config_path() {
        if let Some(p) = Config::global_config_path() {
            assert!(p.to_str().unwrap().contains("ephlink"));
            assert!(p.to_str().unwrap().ends_with("config.toml"));
        }
    }
}
