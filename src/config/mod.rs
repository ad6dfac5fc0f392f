//! TOML configuration with environment overrides.
//!
//! # Resolution
//!
//! 1. `USB_SERIAL_BRIDGE_CONFIG` environment variable (explicit path)
//! 2. `./config.toml`
//! 3. `~/.config/usb-serial-bridge/config.toml` (`%APPDATA%` on Windows)
//! 4. Built-in defaults
//!
//! # Environment Overrides
//!
//! Scalar values can be overridden with `USB_SERIAL_BRIDGE_<SECTION>_<KEY>`:
//!
//! - `USB_SERIAL_BRIDGE_SERIAL_DEFAULT_BAUD=9600`
//! - `USB_SERIAL_BRIDGE_SERIAL_READ_TIMEOUT_MS=20`
//! - `USB_SERIAL_BRIDGE_LOGGING_FORMAT=json`
//!
//! # Example
//!
//! ```rust,no_run
//! use usb_serial_bridge::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! println!("read timeout: {:?}", loader.config().serial.read_timeout());
//! # Ok::<(), usb_serial_bridge::config::ConfigError>(())
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use schema::{Config, LogFormat, LoggingConfig, SerialConfig};
