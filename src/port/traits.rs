//! Driver capability trait and line parameter types.
//!
//! `SerialDriver` is the seam between the session adapter and whatever
//! actually moves bytes over USB. The parameter enums carry the integer codes
//! used on the command surface (`dataBits`, `stopBits`, `parity`,
//! `flowControl`), so conversion from the wire happens in exactly one place.

use super::error::PortError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl DataBits {
    /// Decode the wire value (5 through 8).
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            5 => Some(Self::Five),
            6 => Some(Self::Six),
            7 => Some(Self::Seven),
            8 => Some(Self::Eight),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Five => 5,
            Self::Six => 6,
            Self::Seven => 7,
            Self::Eight => 8,
        }
    }
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

/// Number of stop bits.
///
/// Wire codes follow the USB CDC driver convention: `1`, `2`, and `3` for 1.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StopBits {
    One,
    OnePointFive,
    Two,
}

impl StopBits {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::One),
            2 => Some(Self::Two),
            3 => Some(Self::OnePointFive),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::OnePointFive => 3,
        }
    }
}

impl TryFrom<StopBits> for serialport::StopBits {
    type Error = PortError;

    fn try_from(bits: StopBits) -> Result<Self, Self::Error> {
        match bits {
            StopBits::One => Ok(serialport::StopBits::One),
            StopBits::Two => Ok(serialport::StopBits::Two),
            StopBits::OnePointFive => Err(PortError::config(
                "1.5 stop bits are not supported by the system serial driver",
            )),
        }
    }
}

/// Parity checking modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Parity {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl Parity {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::Odd),
            2 => Some(Self::Even),
            3 => Some(Self::Mark),
            4 => Some(Self::Space),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::None => 0,
            Self::Odd => 1,
            Self::Even => 2,
            Self::Mark => 3,
            Self::Space => 4,
        }
    }
}

impl TryFrom<Parity> for serialport::Parity {
    type Error = PortError;

    fn try_from(parity: Parity) -> Result<Self, Self::Error> {
        match parity {
            Parity::None => Ok(serialport::Parity::None),
            Parity::Odd => Ok(serialport::Parity::Odd),
            Parity::Even => Ok(serialport::Parity::Even),
            Parity::Mark | Parity::Space => Err(PortError::config(format!(
                "{parity:?} parity is not supported by the system serial driver"
            ))),
        }
    }
}

/// Flow control modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowControl {
    Off,
    RtsCts,
    DsrDtr,
    XonXoff,
}

impl FlowControl {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Off),
            1 => Some(Self::RtsCts),
            2 => Some(Self::DsrDtr),
            3 => Some(Self::XonXoff),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Off => 0,
            Self::RtsCts => 1,
            Self::DsrDtr => 2,
            Self::XonXoff => 3,
        }
    }
}

impl TryFrom<FlowControl> for serialport::FlowControl {
    type Error = PortError;

    fn try_from(flow: FlowControl) -> Result<Self, Self::Error> {
        match flow {
            FlowControl::Off => Ok(serialport::FlowControl::None),
            FlowControl::RtsCts => Ok(serialport::FlowControl::Hardware),
            FlowControl::XonXoff => Ok(serialport::FlowControl::Software),
            FlowControl::DsrDtr => Err(PortError::config(
                "DSR/DTR flow control is not supported by the system serial driver",
            )),
        }
    }
}

/// The four line parameters sent together by `setPortParameters`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineParameters {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
}

impl Default for LineParameters {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
        }
    }
}

impl fmt::Display for LineParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        };
        let stop = match self.stop_bits {
            StopBits::One => "1",
            StopBits::OnePointFive => "1.5",
            StopBits::Two => "2",
        };
        write!(
            f,
            "{} {}{}{}",
            self.baud_rate,
            self.data_bits.code(),
            parity,
            stop
        )
    }
}

/// Capability set of the wrapped USB serial driver.
///
/// Implementations own the device handle: `open` acquires it and `close`
/// releases it. The session guarantees `read` is never called concurrently
/// with any other method and is never called after `close` returns.
pub trait SerialDriver: Send + fmt::Debug {
    /// Acquire the device handle.
    fn open(&mut self) -> Result<(), PortError>;

    /// Release the device handle.
    fn close(&mut self) -> Result<(), PortError>;

    /// Whether the handle is currently held.
    fn is_open(&self) -> bool;

    /// Read whatever is available into `buffer`, waiting at most `timeout`.
    ///
    /// Returns `Ok(0)` when the timeout elapses without data.
    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, PortError>;

    /// Write `data`, blocking at most `timeout`.
    ///
    /// Returns the number of bytes the device accepted.
    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize, PortError>;

    fn set_parameters(&mut self, parameters: &LineParameters) -> Result<(), PortError>;

    fn set_flow_control(&mut self, flow_control: FlowControl) -> Result<(), PortError>;

    fn set_dtr(&mut self, value: bool) -> Result<(), PortError>;

    fn set_rts(&mut self, value: bool) -> Result<(), PortError>;

    /// Device path or other identifier, used in log output.
    fn name(&self) -> &str;
}

impl<D: SerialDriver + ?Sized> SerialDriver for Box<D> {
    fn open(&mut self) -> Result<(), PortError> {
        (**self).open()
    }

    fn close(&mut self) -> Result<(), PortError> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, PortError> {
        (**self).read(buffer, timeout)
    }

    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize, PortError> {
        (**self).write(data, timeout)
    }

    fn set_parameters(&mut self, parameters: &LineParameters) -> Result<(), PortError> {
        (**self).set_parameters(parameters)
    }

    fn set_flow_control(&mut self, flow_control: FlowControl) -> Result<(), PortError> {
        (**self).set_flow_control(flow_control)
    }

    fn set_dtr(&mut self, value: bool) -> Result<(), PortError> {
        (**self).set_dtr(value)
    }

    fn set_rts(&mut self, value: bool) -> Result<(), PortError> {
        (**self).set_rts(value)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
