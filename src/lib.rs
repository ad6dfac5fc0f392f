//! USB serial port session adapter.
//!
//! One [`PortSession`] per attached USB serial interface exposes the port to
//! a host framework as a command surface (open, close, write, line settings,
//! modem control lines) and a byte event stream fed by a background reader.
//!
//! # Modules
//!
//! - `port`: driver capability trait, line parameter types, real and mock drivers
//! - `session`: session state machine, background reader, event delivery
//! - `dispatch`: named method calls with JSON arguments
//! - `registry`: one session per interface, routing by channel name
//! - `config`: TOML configuration with environment overrides
//! - `logging`: tracing subscriber setup
//! - `error`: adapter error type and wire codes

pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod port;
pub mod registry;
pub mod session;

pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
pub use dispatch::{Method, MethodCall, MethodResult};
pub use error::{BridgeError, BridgeResult};
pub use port::{
    DataBits, FlowControl, LineParameters, MockDriver, Parity, PortError, SerialDriver, StopBits,
    SystemSerialDriver,
};
pub use registry::SessionRegistry;
pub use session::{
    DeliveryContext, EventSink, PortSession, SessionMetrics, SessionOptions, SessionStatus,
};
