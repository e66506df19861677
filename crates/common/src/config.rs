//! Driver configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use wire::SampleFormat;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Defaults for the synchronous stream interface
    #[serde(default)]
    pub stream: StreamSettings,
    /// USB device selection
    #[serde(default)]
    pub usb: UsbSettings,
    /// Default log level when RUST_LOG is unset
    #[serde(default = "DriverConfig::default_log_level")]
    pub log_level: String,
}

/// Stream geometry defaults
///
/// These mirror the arguments of the sync configuration call: a pool of
/// `num_buffers` buffers of `buffer_size` samples each, with `num_transfers`
/// of them in flight at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    #[serde(default = "StreamSettings::default_num_buffers")]
    pub num_buffers: usize,
    /// Samples per buffer; must be a multiple of 1024
    #[serde(default = "StreamSettings::default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "StreamSettings::default_num_transfers")]
    pub num_transfers: usize,
    /// Transfer completion timeout in milliseconds
    #[serde(default = "StreamSettings::default_timeout_ms")]
    pub timeout_ms: u64,
    /// Sample format ("sc16q11" or "sc16q11meta")
    #[serde(default = "StreamSettings::default_format")]
    pub format: SampleFormat,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            num_buffers: Self::default_num_buffers(),
            buffer_size: Self::default_buffer_size(),
            num_transfers: Self::default_num_transfers(),
            timeout_ms: Self::default_timeout_ms(),
            format: Self::default_format(),
        }
    }
}

impl StreamSettings {
    fn default_num_buffers() -> usize {
        16
    }

    fn default_buffer_size() -> usize {
        8192
    }

    fn default_num_transfers() -> usize {
        8
    }

    fn default_timeout_ms() -> u64 {
        3500
    }

    fn default_format() -> SampleFormat {
        SampleFormat::Sc16Q11
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UsbSettings {
    /// Device filters (VID:PID patterns, e.g. "0x2cf0:*"); empty = all known ids
    #[serde(default)]
    pub filters: Vec<String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            stream: StreamSettings::default(),
            usb: UsbSettings::default(),
            log_level: Self::default_log_level(),
        }
    }
}

impl DriverConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }

    /// Load configuration from the specified path, or the default location
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => {
                let default = Self::default_path();
                if !default.exists() {
                    return Err(anyhow!("No configuration file found, using defaults"));
                }
                default
            }
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: DriverConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Falling back to default config: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("rfstream").join("config.toml")
        } else {
            PathBuf::from(".config/rfstream/config.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            ));
        }

        let s = &self.stream;
        if s.num_transfers == 0 {
            return Err(anyhow!("num_transfers must be at least 1"));
        }
        if s.num_buffers < s.num_transfers {
            return Err(anyhow!(
                "num_buffers ({}) must be >= num_transfers ({})",
                s.num_buffers,
                s.num_transfers
            ));
        }
        if s.buffer_size == 0 || s.buffer_size % 1024 != 0 {
            return Err(anyhow!(
                "buffer_size ({}) must be a non-zero multiple of 1024 samples",
                s.buffer_size
            ));
        }
        if s.timeout_ms == 0 {
            return Err(anyhow!("timeout_ms must be non-zero"));
        }

        for filter in &self.usb.filters {
            Self::validate_filter(filter)?;
        }

        Ok(())
    }

    /// Validate a USB device filter pattern (VID:PID)
    pub fn validate_filter(filter: &str) -> Result<()> {
        let parts: Vec<&str> = filter.split(':').collect();
        if parts.len() != 2 {
            return Err(anyhow!(
                "Invalid filter format '{}', expected VID:PID (e.g., '0x2cf0:0x5246' or '0x2cf0:*')",
                filter
            ));
        }

        for (id, name) in [(parts[0], "VID"), (parts[1], "PID")] {
            if id != "*" {
                Self::validate_hex_id(id, name)?;
            }
        }

        Ok(())
    }

    fn validate_hex_id(id: &str, name: &str) -> Result<()> {
        if !id.starts_with("0x") && !id.starts_with("0X") {
            return Err(anyhow!(
                "Invalid {} '{}', must start with '0x' (e.g., '0x2cf0')",
                name,
                id
            ));
        }

        let hex_part = &id[2..];
        if hex_part.is_empty() || hex_part.len() > 4 {
            return Err(anyhow!(
                "Invalid {} '{}', hex part must be 1-4 digits",
                name,
                id
            ));
        }

        u16::from_str_radix(hex_part, 16)
            .map_err(|_| anyhow!("Invalid {} '{}', not a valid hex number", name, id))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DriverConfig::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.stream.num_buffers, 16);
        assert_eq!(config.stream.buffer_size, 8192);
        assert_eq!(config.stream.num_transfers, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_filter_valid() {
        assert!(DriverConfig::validate_filter("0x2cf0:0x5246").is_ok());
        assert!(DriverConfig::validate_filter("0x2cf0:*").is_ok());
        assert!(DriverConfig::validate_filter("*:0x5246").is_ok());
        assert!(DriverConfig::validate_filter("*:*").is_ok());
    }

    #[test]
    fn test_validate_filter_invalid() {
        assert!(DriverConfig::validate_filter("2cf0:5246").is_err());
        assert!(DriverConfig::validate_filter("0x2cf0").is_err());
        assert!(DriverConfig::validate_filter("0x2cf0:0x5246:0x1").is_err());
        assert!(DriverConfig::validate_filter("0xZZZZ:0x5246").is_err());
        assert!(DriverConfig::validate_filter("0x12345:0x5246").is_err());
    }

    #[test]
    fn test_validate_stream_geometry() {
        let mut config = DriverConfig::default();
        config.stream.num_transfers = 0;
        assert!(config.validate().is_err());

        config.stream.num_transfers = 32;
        config.stream.num_buffers = 16;
        assert!(config.validate().is_err());

        config.stream.num_transfers = 8;
        config.stream.buffer_size = 1000;
        assert!(config.validate().is_err());

        config.stream.buffer_size = 2048;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = DriverConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: DriverConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.log_level, parsed.log_level);
        assert_eq!(config.stream.num_buffers, parsed.stream.num_buffers);
        assert_eq!(config.stream.format, parsed.stream.format);
    }
}
