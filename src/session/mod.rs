//! Port session adapter.
//!
//! A `PortSession` owns the lifecycle of one USB serial interface: it opens
//! and closes the driver handle, runs control commands one at a time, and
//! relays inbound bytes from its background reader to a single subscriber
//! through a `DeliveryContext`.
//!
//! # Architecture
//!
//! ```text
//! command caller ──> PortSession ──(command lock, then driver lock)──> SerialDriver
//!                                                                        ^
//! BackgroundReader thread ──(driver lock only)──────────────────────────┘
//!        │ on_new_data / on_run_error
//!        v
//! DeliveryContext task ──> SubscriberSlot ──> EventSink
//! ```
//!
//! # Error policy
//!
//! Every driver failure is returned to the caller as `BridgeError::Io`,
//! including failures while releasing the handle in `close` and while
//! applying line parameters. `close` always completes the transition to
//! Closed before reporting. Commands other than `open` and `close` require an
//! open session and never reach the driver otherwise.
//!
//! A reader failure closes the session at once: commands see it as closed
//! and the first one to run releases the handle. The handle is also released
//! on the blocking pool, after which the subscriber gets `on_error` followed
//! by `on_end_of_stream`, unless the caller has closed or reopened the
//! session in the meantime.

pub mod delivery;
pub(crate) mod reader;
pub mod subscriber;

pub use delivery::DeliveryContext;
pub use subscriber::EventSink;

use crate::config::SerialConfig;
use crate::error::{BridgeError, BridgeResult, IO_ERROR_CODE};
use crate::port::{FlowControl, LineParameters, PortError, SerialDriver};
use parking_lot::Mutex;
use reader::{BackgroundReader, ReaderConfig, ReaderListener, SharedDriver};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use subscriber::SubscriberSlot;
use tracing::{debug, info, trace, warn};

/// Prefix of the per-interface method channel name.
pub const METHOD_CHANNEL_PREFIX: &str = "usb_serial/UsbSerialPortAdapter";

/// Timeouts and buffer sizing for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// How long one reader poll may block on the driver.
    pub read_timeout: Duration,
    /// How long a write may block. Only bounds the call; nothing is retried.
    pub write_timeout: Duration,
    pub read_buffer_size: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(10),
            write_timeout: Duration::from_millis(2),
            read_buffer_size: 4096,
        }
    }
}

impl From<&SerialConfig> for SessionOptions {
    fn from(config: &SerialConfig) -> Self {
        Self {
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            read_buffer_size: config.read_buffer_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Closed,
    Open,
}

/// Snapshot of a session's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionMetrics {
    pub interface_id: u32,
    pub status: SessionStatus,
    pub bytes_received_total: u64,
    pub bytes_written_total: u64,
    pub chunks_delivered: u64,
    /// Chunks that arrived with no subscriber, or whose subscriber went away.
    pub chunks_dropped: u64,
    pub open_count: u64,
}

#[derive(Debug, Default)]
struct Counters {
    bytes_received: AtomicU64,
    bytes_written: AtomicU64,
    chunks_delivered: AtomicU64,
    chunks_dropped: AtomicU64,
    open_count: AtomicU64,
}

#[derive(Debug)]
enum Phase {
    Closed,
    Open {
        reader: BackgroundReader,
        generation: u64,
        /// Set by the reader when the driver failed under it.
        faulted: Arc<AtomicBool>,
    },
}

/// Everything guarded by the command lock.
#[derive(Debug)]
struct CommandState {
    phase: Phase,
    /// Bumped on every successful open; tags reader faults.
    generation: u64,
    parameters: Option<LineParameters>,
    flow_control: Option<FlowControl>,
    dtr: Option<bool>,
    rts: Option<bool>,
}

impl CommandState {
    /// Open with a live reader. A faulted generation counts as closed.
    fn is_open(&self) -> bool {
        matches!(&self.phase, Phase::Open { faulted, .. } if !faulted.load(Ordering::Acquire))
    }

    fn faulted_generation(&self) -> Option<u64> {
        match &self.phase {
            Phase::Open {
                generation,
                faulted,
                ..
            } if faulted.load(Ordering::Acquire) => Some(*generation),
            _ => None,
        }
    }

    /// Move to Closed and hand back the reader, optionally only if it belongs
    /// to `generation`.
    fn take_reader(&mut self, generation: Option<u64>) -> Option<BackgroundReader> {
        match &self.phase {
            Phase::Open { generation: g, .. } if generation.map_or(true, |want| want == *g) => {}
            _ => return None,
        }
        match std::mem::replace(&mut self.phase, Phase::Closed) {
            Phase::Open { reader, .. } => Some(reader),
            Phase::Closed => None,
        }
    }
}

/// The part of a session the reader and the delivery context can reach.
struct EventRelay {
    interface_id: u32,
    slot: SubscriberSlot,
    delivery: DeliveryContext,
    counters: Counters,
    /// Generation of the open/close cycle fault reports belong to; 0 once
    /// the caller closed explicitly.
    live_generation: AtomicU64,
    session: Weak<SessionInner>,
}

impl EventRelay {
    fn drop_chunk(&self, reason: &str) {
        self.counters.chunks_dropped.fetch_add(1, Ordering::Relaxed);
        trace!(interface_id = self.interface_id, reason, "chunk dropped");
    }
}

/// Listener bound to one reader generation.
struct ReaderHook {
    relay: Arc<EventRelay>,
    generation: u64,
    faulted: Arc<AtomicBool>,
}

impl ReaderListener for ReaderHook {
    fn on_new_data(&self, data: Vec<u8>) {
        let relay = &self.relay;
        relay
            .counters
            .bytes_received
            .fetch_add(data.len() as u64, Ordering::Relaxed);

        // No buffering: data with nobody listening is gone.
        let Some(epoch) = relay.slot.active_epoch() else {
            relay.drop_chunk("no subscriber");
            return;
        };

        let job_relay = Arc::clone(relay);
        let posted = relay.delivery.post(move || {
            if job_relay.slot.deliver(epoch, |sink| sink.on_data(&data)) {
                job_relay
                    .counters
                    .chunks_delivered
                    .fetch_add(1, Ordering::Relaxed);
            } else {
                job_relay.drop_chunk("subscription changed before delivery");
            }
        });
        if !posted {
            relay.drop_chunk("delivery context closed");
        }
    }

    fn on_run_error(&self, error: PortError) {
        // Commands treat the session as closed from here on.
        self.faulted.store(true, Ordering::Release);

        let relay = Arc::clone(&self.relay);
        let generation = self.generation;
        let message = error.to_string();
        warn!(interface_id = relay.interface_id, error = %message, "background reader failed");

        let epoch = relay.slot.active_epoch();
        // Teardown joins the reader and may block in the driver, so it stays
        // off the delivery task.
        let started = self.relay.delivery.run_blocking(move || {
            if let Some(inner) = relay.session.upgrade() {
                inner.finish_after_fault(generation);
            }
            let Some(epoch) = epoch else {
                return;
            };
            let job_relay = Arc::clone(&relay);
            relay.delivery.post(move || {
                if job_relay.live_generation.load(Ordering::Acquire) != generation {
                    debug!(
                        interface_id = job_relay.interface_id,
                        generation, "fault report dropped, cycle already ended"
                    );
                    return;
                }
                job_relay.slot.deliver(epoch, |sink| {
                    sink.on_error(IO_ERROR_CODE, &message);
                    sink.on_end_of_stream();
                });
            });
        });
        if !started {
            warn!(
                interface_id = self.relay.interface_id,
                "delivery context closed; reader failure not reported, next command reaps it"
            );
        }
    }
}

struct SessionInner {
    interface_id: u32,
    method_channel: String,
    driver: SharedDriver,
    state: Mutex<CommandState>,
    relay: Arc<EventRelay>,
    live_readers: Arc<AtomicUsize>,
    options: SessionOptions,
}

impl SessionInner {
    /// Tear down after the reader of `generation` died. Runs on the blocking
    /// pool. A no-op if a command already reaped that generation.
    fn finish_after_fault(&self, generation: u64) -> bool {
        let mut state = self.state.lock();
        if state.faulted_generation() != Some(generation) {
            return false;
        }
        self.reap_faulted(&mut state)
    }

    /// Release a generation whose reader died on its own.
    fn reap_faulted(&self, state: &mut CommandState) -> bool {
        let Some(generation) = state.faulted_generation() else {
            return false;
        };
        let Some(mut reader) = state.take_reader(Some(generation)) else {
            return false;
        };
        // The thread is already past its loop; this only reaps it.
        reader.stop();
        if let Err(e) = self.driver.lock().close() {
            warn!(interface_id = self.interface_id, error = %e, "releasing handle after reader failure");
        }
        info!(interface_id = self.interface_id, generation, "session closed after reader failure");
        true
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(mut reader) = state.take_reader(None) {
            reader.stop();
            if let Err(e) = self.driver.lock().close() {
                warn!(interface_id = self.interface_id, error = %e, "releasing handle on drop");
            }
            debug!(interface_id = self.interface_id, "session dropped while open");
        }
    }
}

/// One USB serial interface as seen by the framework.
///
/// Cloning is cheap and shares the same session.
#[derive(Clone)]
pub struct PortSession {
    inner: Arc<SessionInner>,
}

impl PortSession {
    /// Create a closed session for `interface_id` around `driver`.
    pub fn new<D>(
        interface_id: u32,
        driver: D,
        delivery: DeliveryContext,
        options: SessionOptions,
    ) -> Self
    where
        D: SerialDriver + 'static,
    {
        let driver: Box<dyn SerialDriver> = Box::new(driver);
        let inner = Arc::new_cyclic(|weak| SessionInner {
            interface_id,
            method_channel: format!("{METHOD_CHANNEL_PREFIX}/{interface_id}"),
            driver: Arc::new(Mutex::new(driver)),
            state: Mutex::new(CommandState {
                phase: Phase::Closed,
                generation: 0,
                parameters: None,
                flow_control: None,
                dtr: None,
                rts: None,
            }),
            relay: Arc::new(EventRelay {
                interface_id,
                slot: SubscriberSlot::new(),
                delivery,
                counters: Counters::default(),
                live_generation: AtomicU64::new(0),
                session: weak.clone(),
            }),
            live_readers: Arc::new(AtomicUsize::new(0)),
            options,
        });
        Self { inner }
    }

    pub fn interface_id(&self) -> u32 {
        self.inner.interface_id
    }

    /// Name of the command channel, `usb_serial/UsbSerialPortAdapter/<id>`.
    pub fn method_channel_name(&self) -> &str {
        &self.inner.method_channel
    }

    /// Name of the data event channel, `<method channel>/stream`.
    pub fn event_channel_name(&self) -> String {
        format!("{}/stream", self.inner.method_channel)
    }

    pub fn is_open(&self) -> bool {
        self.inner.state.lock().is_open()
    }

    /// Number of live background reader threads (0 or 1).
    pub fn active_readers(&self) -> usize {
        self.inner.live_readers.load(Ordering::Acquire)
    }

    /// Line parameters last accepted by the driver.
    pub fn line_parameters(&self) -> Option<LineParameters> {
        self.inner.state.lock().parameters
    }

    pub fn flow_control(&self) -> Option<FlowControl> {
        self.inner.state.lock().flow_control
    }

    /// Last DTR value the driver accepted.
    pub fn dtr(&self) -> Option<bool> {
        self.inner.state.lock().dtr
    }

    pub fn rts(&self) -> Option<bool> {
        self.inner.state.lock().rts
    }

    pub fn metrics(&self) -> SessionMetrics {
        let status = if self.is_open() {
            SessionStatus::Open
        } else {
            SessionStatus::Closed
        };
        let c = &self.inner.relay.counters;
        SessionMetrics {
            interface_id: self.inner.interface_id,
            status,
            bytes_received_total: c.bytes_received.load(Ordering::Relaxed),
            bytes_written_total: c.bytes_written.load(Ordering::Relaxed),
            chunks_delivered: c.chunks_delivered.load(Ordering::Relaxed),
            chunks_dropped: c.chunks_dropped.load(Ordering::Relaxed),
            open_count: c.open_count.load(Ordering::Relaxed),
        }
    }

    /// Acquire the device handle and start the background reader.
    ///
    /// # Errors
    ///
    /// - `BridgeError::AlreadyOpen` if the session is open
    /// - `BridgeError::Io` if the driver rejects the open
    /// - `BridgeError::ReaderSpawn` if the reader thread cannot start; the
    ///   handle is released again
    pub fn open(&self) -> BridgeResult<()> {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if state.is_open() {
            return Err(BridgeError::AlreadyOpen);
        }
        inner.reap_faulted(&mut state);

        let device = {
            let mut driver = inner.driver.lock();
            driver.open().map_err(|e| {
                warn!(interface_id = inner.interface_id, error = %e, "driver rejected open");
                BridgeError::Io(e)
            })?;
            driver.name().to_owned()
        };

        let generation = state.generation + 1;
        let faulted = Arc::new(AtomicBool::new(false));
        let listener = Arc::new(ReaderHook {
            relay: Arc::clone(&inner.relay),
            generation,
            faulted: Arc::clone(&faulted),
        });
        let config = ReaderConfig {
            read_timeout: inner.options.read_timeout,
            buffer_size: inner.options.read_buffer_size,
        };

        match BackgroundReader::spawn(
            inner.interface_id,
            Arc::clone(&inner.driver),
            listener,
            config,
            Arc::clone(&inner.live_readers),
        ) {
            Ok(reader) => {
                state.generation = generation;
                state.phase = Phase::Open {
                    reader,
                    generation,
                    faulted,
                };
                inner.relay.live_generation.store(generation, Ordering::Release);
                inner.relay.counters.open_count.fetch_add(1, Ordering::Relaxed);
                info!(interface_id = inner.interface_id, %device, "session opened");
                Ok(())
            }
            Err(e) => {
                if let Err(close_err) = inner.driver.lock().close() {
                    warn!(interface_id = inner.interface_id, error = %close_err, "releasing handle after failed reader start");
                }
                Err(BridgeError::ReaderSpawn(e))
            }
        }
    }

    /// Stop the reader, then release the device handle.
    ///
    /// A no-op on a closed session. The session is Closed when this returns,
    /// even if the driver reported a failure while releasing. A reader
    /// failure not yet reported to the subscriber is dropped.
    pub fn close(&self) -> BridgeResult<()> {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        let Some(mut reader) = state.take_reader(None) else {
            debug!(interface_id = inner.interface_id, "close on closed session");
            return Ok(());
        };
        inner.relay.live_generation.store(0, Ordering::Release);

        // The reader must be fully gone before the handle is released.
        reader.stop();
        drop(reader);

        let result = inner.driver.lock().close();
        info!(interface_id = inner.interface_id, "session closed");
        result.map_err(|e| {
            warn!(interface_id = inner.interface_id, error = %e, "driver failed to release handle");
            BridgeError::Io(e)
        })
    }

    /// Send `data` to the device. Returns the number of bytes it accepted,
    /// which may be short if the write timeout elapsed part way.
    pub fn write(&self, data: &[u8]) -> BridgeResult<usize> {
        let timeout = self.inner.options.write_timeout;
        let written = self.run_open("write", |_, driver| driver.write(data, timeout))?;

        self.inner
            .relay
            .counters
            .bytes_written
            .fetch_add(written as u64, Ordering::Relaxed);
        if written < data.len() {
            debug!(
                interface_id = self.inner.interface_id,
                requested = data.len(),
                written,
                "short write"
            );
        }
        Ok(written)
    }

    pub fn set_port_parameters(&self, parameters: LineParameters) -> BridgeResult<()> {
        self.run_open("setPortParameters", |state, driver| {
            driver.set_parameters(&parameters)?;
            state.parameters = Some(parameters);
            Ok(())
        })?;
        debug!(interface_id = self.inner.interface_id, %parameters, "line parameters applied");
        Ok(())
    }

    pub fn set_flow_control(&self, flow_control: FlowControl) -> BridgeResult<()> {
        self.run_open("setFlowControl", |state, driver| {
            driver.set_flow_control(flow_control)?;
            state.flow_control = Some(flow_control);
            Ok(())
        })
    }

    pub fn set_dtr(&self, value: bool) -> BridgeResult<()> {
        self.run_open("setDTR", |state, driver| {
            driver.set_dtr(value)?;
            state.dtr = Some(value);
            Ok(())
        })?;
        debug!(interface_id = self.inner.interface_id, value, "DTR set");
        Ok(())
    }

    pub fn set_rts(&self, value: bool) -> BridgeResult<()> {
        self.run_open("setRTS", |state, driver| {
            driver.set_rts(value)?;
            state.rts = Some(value);
            Ok(())
        })?;
        debug!(interface_id = self.inner.interface_id, value, "RTS set");
        Ok(())
    }

    /// Make `sink` the only subscriber, replacing any previous one.
    ///
    /// The session keeps a weak reference; the caller keeps the sink alive.
    /// Data that arrived before this call is never delivered to it.
    pub fn subscribe(&self, sink: &Arc<dyn EventSink>) {
        let epoch = self.inner.relay.slot.set(sink);
        debug!(interface_id = self.inner.interface_id, epoch, "subscriber registered");
    }

    /// Clear the subscriber. Once this returns no callback for the old sink
    /// is running or will start. Returns whether one was registered.
    pub fn unsubscribe(&self) -> bool {
        let had = self.inner.relay.slot.clear();
        debug!(interface_id = self.inner.interface_id, had, "subscriber cleared");
        had
    }

    pub fn has_subscriber(&self) -> bool {
        self.inner.relay.slot.is_set()
    }

    /// Run a driver command under the command lock, requiring an open session.
    fn run_open<T>(
        &self,
        command: &'static str,
        f: impl FnOnce(&mut CommandState, &mut dyn SerialDriver) -> Result<T, PortError>,
    ) -> BridgeResult<T> {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if !state.is_open() {
            inner.reap_faulted(&mut state);
            return Err(BridgeError::NotOpen);
        }

        let mut driver = inner.driver.lock();
        f(&mut state, &mut **driver).map_err(|e| {
            warn!(interface_id = inner.interface_id, command, error = %e, "driver command failed");
            BridgeError::Io(e)
        })
    }
}

impl std::fmt::Debug for PortSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortSession")
            .field("interface_id", &self.inner.interface_id)
            .field("open", &self.is_open())
            .field("subscribed", &self.has_subscriber())
            .finish()
    }
}
