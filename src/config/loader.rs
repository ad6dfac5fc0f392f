//! Config file resolution and environment overrides.

use super::error::{ConfigError, ConfigResult};
use super::schema::{Config, LogFormat};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "USB_SERIAL_BRIDGE";

const CONFIG_FILE_NAME: &str = "config.toml";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "USB_SERIAL_BRIDGE_CONFIG";

const APP_DIR_NAME: &str = "usb-serial-bridge";

/// Loaded configuration plus the file it came from.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    pub config_path: Option<PathBuf>,
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `USB_SERIAL_BRIDGE_CONFIG` environment variable (explicit path)
    /// 2. `./config.toml`
    /// 3. `$XDG_CONFIG_HOME/usb-serial-bridge/config.toml` or
    ///    `%APPDATA%\usb-serial-bridge\config.toml`
    /// 4. Built-in defaults
    ///
    /// Environment overrides are applied on top, then the result is validated.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = match config_path {
            Some(ref path) => load_from_file(path)?,
            None => Config::default(),
        };
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Load from an explicit path. A missing file is an error here.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }
}

/// Find the config file, if any, using the standard locations.
fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    let cwd_config = PathBuf::from(CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    get_config_dir()
        .map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
        .filter(|path| path.exists())
}

fn get_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}

fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(ConfigError::ParseError)
}

/// Read `USB_SERIAL_BRIDGE_<key>` and parse it, if set.
fn env_value<T: FromStr>(key: &str, what: &str) -> ConfigResult<Option<T>> {
    let var = format!("{ENV_PREFIX}_{key}");
    match std::env::var(&var) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::env_parse(var, format!("Invalid {what}"))),
        Err(_) => Ok(None),
    }
}

/// Apply `USB_SERIAL_BRIDGE_<SECTION>_<KEY>` overrides, e.g.
/// `USB_SERIAL_BRIDGE_SERIAL_WRITE_TIMEOUT_MS=50`.
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    if let Some(baud) = env_value("SERIAL_DEFAULT_BAUD", "baud rate")? {
        config.serial.default_baud = baud;
    }
    if let Some(ms) = env_value("SERIAL_READ_TIMEOUT_MS", "timeout")? {
        config.serial.read_timeout_ms = ms;
    }
    if let Some(ms) = env_value("SERIAL_WRITE_TIMEOUT_MS", "timeout")? {
        config.serial.write_timeout_ms = ms;
    }
    if let Some(size) = env_value("SERIAL_READ_BUFFER_SIZE", "buffer size")? {
        config.serial.read_buffer_size = size;
    }

    if let Some(level) = env_value::<String>("LOGGING_LEVEL", "log level")? {
        config.logging.level = level;
    }
    if let Ok(val) = std::env::var(format!("{ENV_PREFIX}_LOGGING_FORMAT")) {
        config.logging.format = LogFormat::from_str(&val)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::io::Write;

    #[test]
    #[serial]
    fn test_env_override() {
        env::set_var("USB_SERIAL_BRIDGE_SERIAL_WRITE_TIMEOUT_MS", "25");
        env::set_var("USB_SERIAL_BRIDGE_LOGGING_FORMAT", "compact");

        let mut config = Config::default();
        let result = apply_env_overrides(&mut config);

        env::remove_var("USB_SERIAL_BRIDGE_SERIAL_WRITE_TIMEOUT_MS");
        env::remove_var("USB_SERIAL_BRIDGE_LOGGING_FORMAT");

        result.unwrap();
        assert_eq!(config.serial.write_timeout_ms, 25);
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    #[serial]
    fn test_bad_env_value_names_variable() {
        env::set_var("USB_SERIAL_BRIDGE_SERIAL_DEFAULT_BAUD", "fast");

        let mut config = Config::default();
        let result = apply_env_overrides(&mut config);
        env::remove_var("USB_SERIAL_BRIDGE_SERIAL_DEFAULT_BAUD");

        let err = result.unwrap_err();
        assert!(err
            .to_string()
            .contains("USB_SERIAL_BRIDGE_SERIAL_DEFAULT_BAUD"));
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[serial]\nread_buffer_size = 512\n\n[serial.port_aliases]\ndevkit = \"/dev/ttyUSB3\""
        )
        .unwrap();

        let loader = ConfigLoader::load_from(file.path()).unwrap();
        assert_eq!(loader.config_path.as_deref(), Some(file.path()));
        let serial = &loader.config().serial;
        assert_eq!(serial.read_buffer_size, 512);
        assert_eq!(serial.resolve_port("devkit"), "/dev/ttyUSB3");
    }

    #[test]
    #[serial]
    fn test_load_from_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[serial]\nread_timeout_ms = 0").unwrap();

        let err = ConfigLoader::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    #[serial]
    fn test_load_follows_config_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[serial]\ndefault_baud = 9600").unwrap();

        env::set_var(CONFIG_PATH_ENV, file.path());
        let result = ConfigLoader::load();
        env::remove_var(CONFIG_PATH_ENV);

        let loader = result.unwrap();
        assert_eq!(loader.config_path.as_deref(), Some(file.path()));
        assert_eq!(loader.config().serial.default_baud, 9600);
    }

    #[test]
    fn test_load_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigLoader::load_from(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
