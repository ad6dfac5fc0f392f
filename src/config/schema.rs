//! Configuration file layout.
//!
//! Every section has defaults, so an empty or partial file is valid.

use super::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub serial: SerialConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Reject values that parse but cannot work.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.serial.default_baud == 0 {
            return Err(ConfigError::validation("serial.default_baud", "must be positive"));
        }
        if self.serial.read_buffer_size == 0 {
            return Err(ConfigError::validation(
                "serial.read_buffer_size",
                "must be at least one byte",
            ));
        }
        if self.serial.read_timeout_ms == 0 {
            return Err(ConfigError::validation(
                "serial.read_timeout_ms",
                "a zero read timeout would spin the reader",
            ));
        }
        Ok(())
    }
}

/// `[serial]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Baud rate used when a port is opened before `setPortParameters`
    pub default_baud: u32,
    /// How long one background read may block
    pub read_timeout_ms: u64,
    /// How long a write may block before it is reported as timed out
    pub write_timeout_ms: u64,
    pub read_buffer_size: usize,
    /// Short names for device paths
    #[serde(default)]
    pub port_aliases: HashMap<String, String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            default_baud: 115200,
            read_timeout_ms: 10,
            write_timeout_ms: 2,
            read_buffer_size: 4096,
            port_aliases: HashMap::new(),
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Resolve a port name through aliases
    pub fn resolve_port(&self, name: &str) -> String {
        self.port_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset, e.g. "info" or
    /// "usb_serial_bridge=debug"
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(ConfigError::validation(
                "logging.format",
                format!("unknown format '{other}'"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.serial.default_baud, 115200);
        assert_eq!(config.serial.read_timeout(), Duration::from_millis(10));
        assert_eq!(config.serial.write_timeout(), Duration::from_millis(2));
        assert_eq!(config.serial.read_buffer_size, 4096);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_port_alias_resolution() {
        let mut config = SerialConfig::default();
        config
            .port_aliases
            .insert("cp2102".to_string(), "/dev/ttyUSB0".to_string());

        assert_eq!(config.resolve_port("cp2102"), "/dev/ttyUSB0");
        assert_eq!(config.resolve_port("/dev/ttyACM1"), "/dev/ttyACM1");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let toml_str = r#"
            [serial]
            write_timeout_ms = 50

            [logging]
            format = "json"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.serial.write_timeout_ms, 50);
        assert_eq!(config.serial.read_timeout_ms, 10);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validation_rejects_zero_buffer() {
        let mut config = Config::default();
        config.serial.read_buffer_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("serial.read_buffer_size"));
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
