//! Single-slot subscriber registration.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Consumer of a session's inbound data stream.
///
/// Callbacks run on the session's delivery context, never on the reader
/// thread. A sink must not call `subscribe` or `unsubscribe` on the session
/// from inside one of its own callbacks.
pub trait EventSink: Send + Sync {
    /// A chunk of bytes, in driver arrival order.
    fn on_data(&self, data: &[u8]);

    /// The stream failed. `code` is a `BridgeError` wire code.
    fn on_error(&self, code: &str, message: &str) {
        let _ = (code, message);
    }

    /// No more events will follow for this open/close cycle.
    fn on_end_of_stream(&self) {}
}

/// Epoch value meaning "nobody is subscribed".
const NO_SUBSCRIBER: u64 = 0;

/// Holds at most one weak subscriber reference.
///
/// Every `set`/`clear` starts a new epoch. Events are stamped with the epoch
/// seen on arrival and only reach the sink if that epoch is still current at
/// delivery time.
pub(crate) struct SubscriberSlot {
    sink: Mutex<Option<Weak<dyn EventSink>>>,
    /// Current epoch, readable without the lock; `NO_SUBSCRIBER` when empty.
    active: AtomicU64,
    next_epoch: AtomicU64,
}

impl SubscriberSlot {
    pub(crate) fn new() -> Self {
        Self {
            sink: Mutex::new(None),
            active: AtomicU64::new(NO_SUBSCRIBER),
            next_epoch: AtomicU64::new(NO_SUBSCRIBER + 1),
        }
    }

    /// Replace the subscriber. Returns the new epoch.
    pub(crate) fn set(&self, sink: &Arc<dyn EventSink>) -> u64 {
        let mut slot = self.sink.lock();
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        *slot = Some(Arc::downgrade(sink));
        self.active.store(epoch, Ordering::Release);
        epoch
    }

    /// Remove the subscriber. Returns whether one was registered.
    pub(crate) fn clear(&self) -> bool {
        let mut slot = self.sink.lock();
        self.active.store(NO_SUBSCRIBER, Ordering::Release);
        slot.take().is_some()
    }

    /// Epoch of the live subscription, if any. Lock-free.
    pub(crate) fn active_epoch(&self) -> Option<u64> {
        match self.active.load(Ordering::Acquire) {
            NO_SUBSCRIBER => None,
            epoch => Some(epoch),
        }
    }

    pub(crate) fn is_set(&self) -> bool {
        self.active_epoch().is_some()
    }

    /// Run `f` against the sink if the subscription stamped `epoch` is still
    /// current and its sink is still alive. The slot stays locked while `f`
    /// runs, so a concurrent `set`/`clear` waits for the callback to finish.
    pub(crate) fn deliver(&self, epoch: u64, f: impl FnOnce(&dyn EventSink)) -> bool {
        let slot = self.sink.lock();
        if self.active.load(Ordering::Acquire) != epoch {
            return false;
        }
        match slot.as_ref().and_then(Weak::upgrade) {
            Some(sink) => {
                f(sink.as_ref());
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for SubscriberSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberSlot")
            .field("active_epoch", &self.active_epoch())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Vec<u8>>>);

    impl EventSink for Recorder {
        fn on_data(&self, data: &[u8]) {
            self.0.lock().push(data.to_vec());
        }
    }

    #[test]
    fn test_empty_slot_has_no_epoch() {
        let slot = SubscriberSlot::new();
        assert_eq!(slot.active_epoch(), None);
        assert!(!slot.clear());
    }

    #[test]
    fn test_deliver_to_current_subscription() {
        let slot = SubscriberSlot::new();
        let recorder = Arc::new(Recorder::default());
        let sink: Arc<dyn EventSink> = recorder.clone();

        let epoch = slot.set(&sink);
        assert_eq!(slot.active_epoch(), Some(epoch));
        assert!(slot.deliver(epoch, |s| s.on_data(b"abc")));
        assert_eq!(*recorder.0.lock(), vec![b"abc".to_vec()]);
    }

    #[test]
    fn test_stale_epoch_is_not_delivered() {
        let slot = SubscriberSlot::new();
        let first: Arc<dyn EventSink> = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let second_sink: Arc<dyn EventSink> = second.clone();

        let old = slot.set(&first);
        let new = slot.set(&second_sink);
        assert_ne!(old, new);

        assert!(!slot.deliver(old, |s| s.on_data(b"late")));
        assert!(second.0.lock().is_empty());

        assert!(slot.clear());
        assert!(!slot.deliver(new, |s| s.on_data(b"after clear")));
        assert!(second.0.lock().is_empty());
    }

    #[test]
    fn test_dropped_sink_is_not_kept_alive() {
        let slot = SubscriberSlot::new();
        let sink: Arc<dyn EventSink> = Arc::new(Recorder::default());
        let epoch = slot.set(&sink);
        drop(sink);

        assert!(!slot.deliver(epoch, |s| s.on_data(b"x")));
    }
}
