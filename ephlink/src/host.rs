//! Host-side discovery of candidate bus device nodes.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, trace};

use crate::port::LinkKind;

/// Directory holding the bus device nodes.
const DEV_DIR: &str = "/dev";

/// A bus device node found on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BusInfo {
    /// Device node path.
    pub path: PathBuf,
    /// Link flavour.
    pub kind: LinkKind,
}

/// Classify a device node name.
pub fn classify_node(name: &str) -> Option<LinkKind> {
    if name.starts_with("spidev") {
        Some(LinkKind::Spi)
    } else if name
        .strip_prefix("i2c-")
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
    {
        Some(LinkKind::I2c)
    } else {
        None
    }
}

/// List `spidev*` and `i2c-*` nodes under `/dev`, sorted by path.
#[must_use]
pub fn discover_buses() -> Vec<BusInfo> {
    discover_buses_in(Path::new(DEV_DIR))
}

/// List bus nodes under `dir`, sorted by path.
#[must_use]
pub fn discover_buses_in(dir: &Path) -> Vec<BusInfo> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot list {}: {e}", dir.display());
            return Vec::new();
        },
    };

    let mut buses: Vec<BusInfo> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name();
            let kind = classify_node(&name.to_string_lossy())?;
            trace!("Found {kind} node {}", entry.path().display());
            Some(BusInfo {
                path: entry.path(),
                kind,
            })
        })
        .collect();
    buses.sort_by(|a, b| a.path.cmp(&b.path));
    buses
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_node() {
        assert_eq!(classify_node("spidev0.0"), Some(LinkKind::Spi));
        assert_eq!(classify_node("i2c-1"), Some(LinkKind::I2c));
        assert_eq!(classify_node("i2c-dev"), None);
        assert_eq!(classify_node("ttyUSB0"), None);
    }

    #[test]
    fn test_discover_in_dir() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["spidev1.0", "i2c-3", "spidev0.0", "tty0"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        let buses = discover_buses_in(dir.path());
        let names: Vec<_> = buses
            .iter()
            .map(|b| b.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["i2c-3", "spidev0.0", "spidev1.0"]);
        assert_eq!(buses[0].kind, LinkKind::I2c);
    }

    #[test]
    fn test_missing_dir_is_empty() {
        assert!(discover_buses_in(Path::new("/nonexistent/ephlink")).is_empty());
    }
}
