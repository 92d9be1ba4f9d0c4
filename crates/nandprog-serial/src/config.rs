//! Host-side configuration file

use std::path::Path;

use nandprog_core::protocol::OperationOptions;
use serde::Deserialize;

use crate::error::{Result, SerialError};

/// Wire protocol the host speaks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireProtocol {
    /// Checksummed binary frames
    #[default]
    Framed,
    /// Newline-terminated text commands
    Legacy,
}

/// Defaults for a host session, usually read from `nandprog.toml`
///
/// ```toml
/// port = "/dev/ttyACM0"
/// baud = 921600
/// chip = "Samsung K9F1G08U0A"
/// compress = true
/// skip_blank = true
/// protocol = "legacy"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Serial device or `host:port`
    pub port: Option<String>,
    /// Serial baud rate
    pub baud: u32,
    /// Chip to select when detection fails
    pub chip: Option<String>,
    /// Ask for run-length encoding
    pub compress: bool,
    /// Ask for blank-page elision
    pub skip_blank: bool,
    /// Read back after program/erase
    pub verify: bool,
    /// Wire protocol
    pub protocol: WireProtocol,
    /// Longest silence tolerated from the device, in milliseconds
    pub timeout_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud: crate::transport::serial::DEFAULT_BAUD,
            chip: None,
            compress: true,
            skip_blank: true,
            verify: true,
            protocol: WireProtocol::Framed,
            timeout_ms: 10_000,
        }
    }
}

impl HostConfig {
    /// Parse TOML text; missing keys keep their defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| SerialError::Config(e.to_string()))
    }

    /// Load a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        log::debug!("Loaded host configuration from {}", path.display());
        Ok(config)
    }

    /// Per-operation switches implied by this configuration
    pub fn options(&self) -> OperationOptions {
        OperationOptions {
            compress: self.compress,
            skip_blank: self.skip_blank,
            verify: self.verify,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(HostConfig::from_toml_str("").unwrap(), HostConfig::default());
    }

    #[test]
    fn test_partial_file() {
        let config = HostConfig::from_toml_str("protocol = \"legacy\"\ncompress = false\nchip = \"Hynix H27UBG8T2A\"\n").unwrap();
        assert_eq!(config.protocol, WireProtocol::Legacy);
        assert!(!config.options().compress);
        assert!(config.options().skip_blank);
        assert_eq!(config.chip.as_deref(), Some("Hynix H27UBG8T2A"));
        assert_eq!(config.baud, 115_200);
    }

    #[test]
    fn test_bad_value_is_reported() {
        let err = HostConfig::from_toml_str("baud = \"fast\"").unwrap_err();
        assert!(matches!(err, SerialError::Config(_)));
    }
}
