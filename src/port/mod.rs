//! Driver abstraction layer for USB serial devices.
//!
//! Provides the `SerialDriver` capability trait, the line parameter types it
//! speaks, a real backend over the `serialport` crate, and a mock for tests.

pub mod error;
pub mod mock;
pub mod system;
pub mod traits;

pub use error::PortError;
pub use mock::{DriverCall, DriverIo, DriverOp, MockDriver};
pub use system::SystemSerialDriver;
pub use traits::*;
