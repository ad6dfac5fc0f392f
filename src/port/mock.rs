//! Mock serial driver for testing.
//!
//! Provides a `MockDriver` that behaves like a USB serial device without
//! requiring hardware. Clones share state, so a test can hand one clone to a
//! session and keep another to feed inbound data and inspect calls.

use super::error::PortError;
use super::traits::{FlowControl, LineParameters, SerialDriver};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// A control call observed by the mock, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Open,
    Close,
    Write(Vec<u8>),
    SetParameters(LineParameters),
    SetFlowControl(FlowControl),
    SetDtr(bool),
    SetRts(bool),
}

/// Handle lifecycle and read activity, in order. Consecutive reads are
/// logged once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverIo {
    Open,
    Read,
    Close,
}

/// Driver operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverOp {
    Open,
    Close,
    Read,
    Write,
    SetParameters,
    SetFlowControl,
    SetDtr,
    SetRts,
}

#[derive(Debug, Default)]
struct MockDriverState {
    open: bool,
    /// Echo written bytes back as inbound data.
    loopback: bool,
    /// Chunks to be returned by read operations.
    read_queue: VecDeque<Vec<u8>>,
    /// Log of all control calls.
    calls: Vec<DriverCall>,
    /// One-shot failures armed per operation.
    fail_next: HashSet<DriverOp>,
    parameters: Option<LineParameters>,
    dtr: bool,
    rts: bool,
    read_count: usize,
    reads_while_closed: usize,
    io_log: Vec<DriverIo>,
}

impl MockDriverState {
    fn log_io(&mut self, io: DriverIo) {
        if io == DriverIo::Read && self.io_log.last() == Some(&DriverIo::Read) {
            return;
        }
        self.io_log.push(io);
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<MockDriverState>,
    data_ready: Condvar,
}

/// Mock serial driver.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use usb_serial_bridge::port::{DriverCall, MockDriver, SerialDriver};
///
/// let mut driver = MockDriver::new("MOCK0");
/// driver.open().unwrap();
/// driver.push_read(b"hello");
///
/// let mut buffer = [0u8; 16];
/// let n = driver.read(&mut buffer, Duration::from_millis(5)).unwrap();
/// assert_eq!(&buffer[..n], b"hello");
///
/// driver.write(b"ping", Duration::from_millis(2)).unwrap();
/// assert_eq!(driver.calls(), vec![DriverCall::Open, DriverCall::Write(b"ping".to_vec())]);
/// ```
#[derive(Clone)]
pub struct MockDriver {
    name: String,
    shared: Arc<Shared>,
}

impl MockDriver {
    /// Create a new mock driver with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(Shared::default()),
        }
    }

    /// Create a mock whose writes come back as inbound data.
    pub fn loopback(name: impl Into<String>) -> Self {
        let driver = Self::new(name);
        driver.shared.state.lock().loopback = true;
        driver
    }

    /// Queue a chunk to be returned by a subsequent read.
    pub fn push_read(&self, data: &[u8]) {
        let mut state = self.shared.state.lock();
        state.read_queue.push_back(data.to_vec());
        self.shared.data_ready.notify_all();
    }

    /// Make the next call of `op` fail.
    ///
    /// Writes fail with a timeout, everything else with an I/O error.
    pub fn fail_next(&self, op: DriverOp) {
        let mut state = self.shared.state.lock();
        state.fail_next.insert(op);
        if op == DriverOp::Read {
            // Wake a reader blocked on an empty queue so it sees the fault.
            self.shared.data_ready.notify_all();
        }
    }

    /// All control calls so far.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.shared.state.lock().calls.clone()
    }

    /// Opens, reads and closes in the order they happened.
    pub fn io_log(&self) -> Vec<DriverIo> {
        self.shared.state.lock().io_log.clone()
    }

    pub fn clear_calls(&self) {
        self.shared.state.lock().calls.clear();
    }

    pub fn is_handle_open(&self) -> bool {
        self.shared.state.lock().open
    }

    /// Parameters last accepted by `set_parameters`.
    pub fn parameters(&self) -> Option<LineParameters> {
        self.shared.state.lock().parameters
    }

    pub fn dtr(&self) -> bool {
        self.shared.state.lock().dtr
    }

    pub fn rts(&self) -> bool {
        self.shared.state.lock().rts
    }

    /// Chunks queued but not yet read.
    pub fn pending_reads(&self) -> usize {
        self.shared.state.lock().read_queue.len()
    }

    /// Number of read calls made while the handle was open.
    pub fn read_count(&self) -> usize {
        self.shared.state.lock().read_count
    }

    /// Number of read calls made after the handle was released.
    pub fn reads_while_closed(&self) -> usize {
        self.shared.state.lock().reads_while_closed
    }

    fn take_failure(state: &mut MockDriverState, op: DriverOp) -> Result<(), PortError> {
        if state.fail_next.remove(&op) {
            return Err(PortError::io(format!("simulated {op:?} failure")));
        }
        Ok(())
    }
}

impl SerialDriver for MockDriver {
    fn open(&mut self) -> Result<(), PortError> {
        let mut state = self.shared.state.lock();
        state.calls.push(DriverCall::Open);
        Self::take_failure(&mut state, DriverOp::Open)?;
        if state.open {
            return Err(PortError::AlreadyOpen);
        }
        state.open = true;
        state.log_io(DriverIo::Open);
        Ok(())
    }

    fn close(&mut self) -> Result<(), PortError> {
        let mut state = self.shared.state.lock();
        state.calls.push(DriverCall::Close);
        state.log_io(DriverIo::Close);
        // The handle is gone even when the release itself reports a failure.
        state.open = false;
        Self::take_failure(&mut state, DriverOp::Close)
    }

    fn is_open(&self) -> bool {
        self.shared.state.lock().open
    }

    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, PortError> {
        let mut state = self.shared.state.lock();
        state.log_io(DriverIo::Read);
        if !state.open {
            state.reads_while_closed += 1;
            return Err(PortError::NotOpen);
        }
        state.read_count += 1;

        if state.read_queue.is_empty() && !state.fail_next.contains(&DriverOp::Read) {
            self.shared.data_ready.wait_for(&mut state, timeout);
        }
        Self::take_failure(&mut state, DriverOp::Read)?;

        let Some(mut chunk) = state.read_queue.pop_front() else {
            return Ok(0);
        };
        let n = chunk.len().min(buffer.len());
        buffer[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            state.read_queue.push_front(chunk.split_off(n));
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize, PortError> {
        let mut state = self.shared.state.lock();
        state.calls.push(DriverCall::Write(data.to_vec()));
        if !state.open {
            return Err(PortError::NotOpen);
        }
        if state.fail_next.remove(&DriverOp::Write) {
            return Err(PortError::timeout(timeout));
        }
        if state.loopback && !data.is_empty() {
            state.read_queue.push_back(data.to_vec());
            self.shared.data_ready.notify_all();
        }
        Ok(data.len())
    }

    fn set_parameters(&mut self, parameters: &LineParameters) -> Result<(), PortError> {
        let mut state = self.shared.state.lock();
        state.calls.push(DriverCall::SetParameters(*parameters));
        Self::take_failure(&mut state, DriverOp::SetParameters)?;
        state.parameters = Some(*parameters);
        Ok(())
    }

    fn set_flow_control(&mut self, flow_control: FlowControl) -> Result<(), PortError> {
        let mut state = self.shared.state.lock();
        state.calls.push(DriverCall::SetFlowControl(flow_control));
        Self::take_failure(&mut state, DriverOp::SetFlowControl)
    }

    fn set_dtr(&mut self, value: bool) -> Result<(), PortError> {
        let mut state = self.shared.state.lock();
        state.calls.push(DriverCall::SetDtr(value));
        Self::take_failure(&mut state, DriverOp::SetDtr)?;
        state.dtr = value;
        Ok(())
    }

    fn set_rts(&mut self, value: bool) -> Result<(), PortError> {
        let mut state = self.shared.state.lock();
        state.calls.push(DriverCall::SetRts(value));
        Self::take_failure(&mut state, DriverOp::SetRts)?;
        state.rts = value;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for MockDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDriver")
            .field("name", &self.name)
            .field("open", &self.is_handle_open())
            .field("pending_reads", &self.pending_reads())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_millis(5);

    fn opened() -> MockDriver {
        let mut driver = MockDriver::new("MOCK0");
        driver.open().unwrap();
        driver
    }

    #[test]
    fn test_read_returns_queued_chunks_in_order() {
        let mut driver = opened();
        driver.push_read(b"one");
        driver.push_read(b"two");

        let mut buffer = [0u8; 16];
        let n = driver.read(&mut buffer, T).unwrap();
        assert_eq!(&buffer[..n], b"one");
        let n = driver.read(&mut buffer, T).unwrap();
        assert_eq!(&buffer[..n], b"two");
        assert_eq!(driver.read(&mut buffer, T).unwrap(), 0);
    }

    #[test]
    fn test_partial_read_keeps_remainder() {
        let mut driver = opened();
        driver.push_read(b"Hello, World!");

        let mut buffer = [0u8; 5];
        let n = driver.read(&mut buffer, T).unwrap();
        assert_eq!(&buffer[..n], b"Hello");
        assert_eq!(driver.pending_reads(), 1);

        let mut rest = [0u8; 16];
        let n = driver.read(&mut rest, T).unwrap();
        assert_eq!(&rest[..n], b", World!");
    }

    #[test]
    fn test_read_while_closed_is_counted() {
        let mut driver = MockDriver::new("MOCK0");
        let mut buffer = [0u8; 4];
        assert!(matches!(driver.read(&mut buffer, T), Err(PortError::NotOpen)));
        assert_eq!(driver.reads_while_closed(), 1);
        assert_eq!(driver.read_count(), 0);
    }

    #[test]
    fn test_io_log_collapses_consecutive_reads() {
        let mut driver = opened();
        let mut buffer = [0u8; 4];
        driver.read(&mut buffer, T).unwrap();
        driver.read(&mut buffer, T).unwrap();
        driver.close().unwrap();
        let _ = driver.read(&mut buffer, T);

        assert_eq!(
            driver.io_log(),
            vec![DriverIo::Open, DriverIo::Read, DriverIo::Close, DriverIo::Read]
        );
    }

    #[test]
    fn test_write_failure_is_timeout() {
        let mut driver = opened();
        driver.fail_next(DriverOp::Write);
        assert!(matches!(driver.write(b"x", T), Err(PortError::Timeout(d)) if d == T));
        // One-shot: the next write succeeds.
        assert_eq!(driver.write(b"x", T).unwrap(), 1);
    }

    #[test]
    fn test_open_failure_leaves_handle_closed() {
        let mut driver = MockDriver::new("MOCK0");
        driver.fail_next(DriverOp::Open);
        assert!(driver.open().is_err());
        assert!(!driver.is_handle_open());
        assert_eq!(driver.calls(), vec![DriverCall::Open]);
    }

    #[test]
    fn test_loopback_echoes_writes() {
        let mut driver = MockDriver::loopback("LOOP0");
        driver.open().unwrap();
        driver.write(b"echo", T).unwrap();

        let mut buffer = [0u8; 8];
        let n = driver.read(&mut buffer, T).unwrap();
        assert_eq!(&buffer[..n], b"echo");
    }

    #[test]
    fn test_signal_lines_and_parameters_recorded() {
        let mut driver = opened();
        driver.set_dtr(true).unwrap();
        driver.set_rts(true).unwrap();
        driver.fail_next(DriverOp::SetRts);
        assert!(driver.set_rts(false).is_err());

        let params = LineParameters::default();
        driver.set_parameters(&params).unwrap();

        assert!(driver.dtr());
        assert!(driver.rts(), "failed call must not change the line");
        assert_eq!(driver.parameters(), Some(params));
    }
}
