//! Per-session background reader.
//!
//! One OS thread per open session pulls bytes from the driver and hands them
//! to a `ReaderListener`. The thread only ever takes the driver lock, never
//! the session's command lock, so `stop` can join it while a command is in
//! progress.

use crate::port::{PortError, SerialDriver};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, trace};

pub(crate) type SharedDriver = Arc<Mutex<Box<dyn SerialDriver>>>;

/// Receiver of everything a reader produces. Called on the reader thread.
pub(crate) trait ReaderListener: Send + Sync + 'static {
    fn on_new_data(&self, data: Vec<u8>);

    /// The driver failed; the reader exits right after this returns.
    fn on_run_error(&self, error: PortError);
}

/// Tuning for the read loop.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReaderConfig {
    pub read_timeout: Duration,
    pub buffer_size: usize,
}

/// Handle to a running reader thread.
#[derive(Debug)]
pub(crate) struct BackgroundReader {
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

/// Decrements the live-reader count when the thread exits, however it exits.
struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl BackgroundReader {
    /// Start a reader thread named after `interface_id`.
    pub(crate) fn spawn(
        interface_id: u32,
        driver: SharedDriver,
        listener: Arc<dyn ReaderListener>,
        config: ReaderConfig,
        live: Arc<AtomicUsize>,
    ) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        live.fetch_add(1, Ordering::AcqRel);
        let guard = LiveGuard(live);

        let thread = thread::Builder::new()
            .name(format!("usb-serial-reader-{interface_id}"))
            .spawn(move || {
                let _guard = guard;
                run(interface_id, &driver, listener.as_ref(), config, &thread_stop);
            })?;

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Ask the reader to stop and wait until it has exited.
    pub(crate) fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("background reader panicked");
            }
        }
    }
}

impl Drop for BackgroundReader {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    interface_id: u32,
    driver: &Mutex<Box<dyn SerialDriver>>,
    listener: &dyn ReaderListener,
    config: ReaderConfig,
    stop: &AtomicBool,
) {
    debug!(interface_id, "background reader started");
    let mut buffer = vec![0u8; config.buffer_size.max(1)];

    while !stop.load(Ordering::Acquire) {
        let result = {
            let mut driver = driver.lock();
            // Re-check under the lock: a stop request may have raced the lock.
            if stop.load(Ordering::Acquire) {
                break;
            }
            driver.read(&mut buffer, config.read_timeout)
        };

        match result {
            Ok(0) => {}
            Ok(n) => {
                trace!(interface_id, bytes = n, "chunk received");
                listener.on_new_data(buffer[..n].to_vec());
            }
            Err(e) => {
                listener.on_run_error(e);
                break;
            }
        }
    }
    debug!(interface_id, "background reader stopped");
}
