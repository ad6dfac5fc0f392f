//! Shared test utilities.
//!
//! - a multi-threaded runtime hosting the delivery context
//! - a recording `EventSink`
//! - polling helpers for asynchronous delivery

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use usb_serial_bridge::port::MockDriver;
use usb_serial_bridge::{DeliveryContext, EventSink, PortSession, SessionOptions};

/// How long helpers wait for asynchronous effects.
pub const WAIT: Duration = Duration::from_secs(2);

/// Everything a subscriber can observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Data(Vec<u8>),
    Error(String),
    EndOfStream,
}

/// Sink that records events in arrival order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// All data chunks concatenated.
    pub fn data(&self) -> Vec<u8> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Data(d) => Some(d.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn chunks(&self) -> Vec<Vec<u8>> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Data(d) => Some(d.clone()),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn on_data(&self, data: &[u8]) {
        self.events.lock().push(Event::Data(data.to_vec()));
    }

    fn on_error(&self, code: &str, _message: &str) {
        self.events.lock().push(Event::Error(code.to_string()));
    }

    fn on_end_of_stream(&self) {
        self.events.lock().push(Event::EndOfStream);
    }
}

/// Register `sink` on `session`, coercing to the trait object.
pub fn subscribe(session: &PortSession, sink: &Arc<RecordingSink>) -> Arc<dyn EventSink> {
    let sink: Arc<dyn EventSink> = sink.clone();
    session.subscribe(&sink);
    sink
}

pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build runtime")
}

/// Short timeouts so tests stay fast.
pub fn fast_options() -> SessionOptions {
    SessionOptions {
        read_timeout: Duration::from_millis(5),
        write_timeout: Duration::from_millis(2),
        read_buffer_size: 64,
    }
}

/// A closed session around a fresh mock. Returns the mock clone for driving it.
pub fn mock_session(rt: &tokio::runtime::Runtime, interface_id: u32) -> (PortSession, MockDriver) {
    let mock = MockDriver::new(format!("MOCK{interface_id}"));
    let session = PortSession::new(
        interface_id,
        mock.clone(),
        DeliveryContext::spawn(rt.handle()),
        fast_options(),
    );
    (session, mock)
}

/// Poll `condition` until it holds or `WAIT` elapses.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
