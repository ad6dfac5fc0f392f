//! Driver backed by the operating system's serial stack.
//!
//! Wraps the `serialport` crate behind `SerialDriver` so a session can drive a
//! real USB CDC/FTDI/CP210x device exposed as `/dev/ttyUSB*`, `/dev/ttyACM*`
//! or `COM*`.

use super::error::PortError;
use super::traits::{FlowControl, LineParameters, SerialDriver};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

/// Serial driver for a device path known to the OS.
///
/// Line parameters and flow control set while closed are kept and applied when
/// the handle is acquired.
pub struct SystemSerialDriver {
    /// The OS handle, present only while open.
    port: Option<Box<dyn serialport::SerialPort>>,
    /// The port name/path for identification.
    name: String,
    parameters: LineParameters,
    flow_control: FlowControl,
    /// Timeout last pushed to the OS handle, to skip redundant syscalls.
    timeout: Duration,
}

impl SystemSerialDriver {
    /// Create a driver for `port_name` with the given initial parameters.
    ///
    /// # Example
    /// ```no_run
    /// use usb_serial_bridge::port::{LineParameters, SerialDriver, SystemSerialDriver};
    ///
    /// let mut driver = SystemSerialDriver::new("/dev/ttyUSB0", LineParameters::default());
    /// driver.open()?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn new(port_name: impl Into<String>, parameters: LineParameters) -> Self {
        Self {
            port: None,
            name: port_name.into(),
            parameters,
            flow_control: FlowControl::Off,
            timeout: Duration::from_millis(0),
        }
    }

    /// Get a reference to the underlying serialport implementation, if open.
    pub fn as_raw(&self) -> Option<&dyn serialport::SerialPort> {
        self.port.as_deref()
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>, PortError> {
        self.port.as_mut().ok_or(PortError::NotOpen)
    }

    fn ensure_timeout(&mut self, timeout: Duration) -> Result<(), PortError> {
        if self.timeout != timeout {
            self.port_mut()?.set_timeout(timeout)?;
            self.timeout = timeout;
        }
        Ok(())
    }
}

impl SerialDriver for SystemSerialDriver {
    fn open(&mut self) -> Result<(), PortError> {
        if self.port.is_some() {
            return Err(PortError::AlreadyOpen);
        }

        let port = serialport::new(&self.name, self.parameters.baud_rate)
            .data_bits(self.parameters.data_bits.into())
            .stop_bits(self.parameters.stop_bits.try_into()?)
            .parity(self.parameters.parity.try_into()?)
            .flow_control(self.flow_control.try_into()?)
            .timeout(self.timeout)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => PortError::not_found(&self.name),
                serialport::ErrorKind::InvalidInput => PortError::config(e.to_string()),
                _ => PortError::Serial(e),
            })?;

        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> Result<(), PortError> {
        // Dropping the handle releases the device; flush pending output first.
        if let Some(mut port) = self.port.take() {
            port.flush()?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, PortError> {
        self.ensure_timeout(timeout)?;
        match self.port_mut()?.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(PortError::Io(e)),
        }
    }

    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize, PortError> {
        self.ensure_timeout(timeout)?;
        let port = self.port_mut()?;

        let mut written = 0;
        while written < data.len() {
            match port.write(&data[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::TimedOut => {
                    if written == 0 {
                        return Err(PortError::timeout(timeout));
                    }
                    break;
                }
                Err(e) => return Err(PortError::Io(e)),
            }
        }
        Ok(written)
    }

    fn set_parameters(&mut self, parameters: &LineParameters) -> Result<(), PortError> {
        let stop_bits: serialport::StopBits = parameters.stop_bits.try_into()?;
        let parity: serialport::Parity = parameters.parity.try_into()?;

        if let Some(port) = self.port.as_mut() {
            port.set_baud_rate(parameters.baud_rate)?;
            port.set_data_bits(parameters.data_bits.into())?;
            port.set_stop_bits(stop_bits)?;
            port.set_parity(parity)?;
        }
        self.parameters = *parameters;
        Ok(())
    }

    fn set_flow_control(&mut self, flow_control: FlowControl) -> Result<(), PortError> {
        let flow: serialport::FlowControl = flow_control.try_into()?;
        if let Some(port) = self.port.as_mut() {
            port.set_flow_control(flow)?;
        }
        self.flow_control = flow_control;
        Ok(())
    }

    fn set_dtr(&mut self, value: bool) -> Result<(), PortError> {
        self.port_mut()?.write_data_terminal_ready(value)?;
        Ok(())
    }

    fn set_rts(&mut self, value: bool) -> Result<(), PortError> {
        self.port_mut()?.write_request_to_send(value)?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for SystemSerialDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemSerialDriver")
            .field("name", &self.name)
            .field("open", &self.port.is_some())
            .field("parameters", &self.parameters)
            .finish()
    }
}
