//! Single-context event delivery.
//!
//! Background readers never call subscribers directly. They post jobs here,
//! and one tokio task runs the jobs one at a time in the order they were
//! posted. Several sessions may share one context.

use crate::error::{BridgeError, BridgeResult};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::debug;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a delivery task. Cloning shares the same task.
///
/// The task exits once every handle is dropped and the queue is drained.
#[derive(Clone)]
pub struct DeliveryContext {
    tx: mpsc::UnboundedSender<Job>,
    handle: Handle,
}

impl DeliveryContext {
    /// Spawn a delivery task on the given runtime.
    pub fn spawn(handle: &Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        handle.spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
            debug!("delivery context drained, exiting");
        });
        Self {
            tx,
            handle: handle.clone(),
        }
    }

    /// Spawn a delivery task on the runtime the caller is running in.
    pub fn current() -> BridgeResult<Self> {
        let handle = Handle::try_current().map_err(|e| BridgeError::NoRuntime(e.to_string()))?;
        Ok(Self::spawn(&handle))
    }

    /// Queue `job` behind everything posted before it.
    ///
    /// Returns `false` if the delivery task is gone (runtime shut down), in
    /// which case the job is dropped.
    pub fn post<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(Box::new(job)).is_ok()
    }

    /// Run `job` on the runtime's blocking pool, outside the delivery order.
    ///
    /// Returns `false` if the runtime is gone.
    pub fn run_blocking<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tx.is_closed() {
            return false;
        }
        drop(self.handle.spawn_blocking(job));
        true
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl std::fmt::Debug for DeliveryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryContext")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}
