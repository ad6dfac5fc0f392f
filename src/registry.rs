//! Owner of all sessions for one framework instance.
//!
//! The registry creates a session when an interface is discovered, routes
//! calls arriving on a method channel to it, and closes it on release.
//! Sessions never remove themselves.

use crate::dispatch::{MethodCall, MethodResult};
use crate::error::{BridgeError, BridgeResult};
use crate::port::SerialDriver;
use crate::session::{DeliveryContext, PortSession, SessionOptions};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct SessionRegistry {
    delivery: DeliveryContext,
    options: SessionOptions,
    sessions: Mutex<BTreeMap<u32, PortSession>>,
}

impl SessionRegistry {
    /// All sessions created here share `delivery`.
    pub fn new(delivery: DeliveryContext, options: SessionOptions) -> Self {
        Self {
            delivery,
            options,
            sessions: Mutex::new(BTreeMap::new()),
        }
    }

    /// Register a closed session for `interface_id` around `driver`.
    pub fn create<D>(&self, interface_id: u32, driver: D) -> BridgeResult<PortSession>
    where
        D: SerialDriver + 'static,
    {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(&interface_id) {
            return Err(BridgeError::DuplicateInterface(interface_id));
        }

        let session = PortSession::new(interface_id, driver, self.delivery.clone(), self.options);
        info!(
            interface_id,
            channel = session.method_channel_name(),
            "session registered"
        );
        sessions.insert(interface_id, session.clone());
        Ok(session)
    }

    pub fn get(&self, interface_id: u32) -> Option<PortSession> {
        self.sessions.lock().get(&interface_id).cloned()
    }

    /// Look up a session by its method or event channel name.
    pub fn find_by_channel(&self, channel: &str) -> Option<PortSession> {
        let base = channel.strip_suffix("/stream").unwrap_or(channel);
        self.sessions
            .lock()
            .values()
            .find(|s| s.method_channel_name() == base)
            .cloned()
    }

    /// Deliver a call that arrived on `channel`.
    pub fn route(&self, channel: &str, call: &MethodCall) -> MethodResult {
        match self.find_by_channel(channel) {
            Some(session) => session.handle_method_call(call),
            None => {
                debug!(channel, method = %call.method, "no session for channel");
                MethodResult::NotImplemented
            }
        }
    }

    pub fn interface_ids(&self) -> Vec<u32> {
        self.sessions.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Close the session and forget it. The session is forgotten even if the
    /// close reports a driver failure; that failure is returned.
    pub fn release(&self, interface_id: u32) -> BridgeResult<()> {
        let session = self
            .sessions
            .lock()
            .remove(&interface_id)
            .ok_or(BridgeError::UnknownInterface(interface_id))?;
        session.unsubscribe();
        let result = session.close();
        info!(interface_id, "session released");
        result
    }

    /// Release every session, logging rather than returning close failures.
    pub fn release_all(&self) {
        let sessions = std::mem::take(&mut *self.sessions.lock());
        for (interface_id, session) in sessions {
            session.unsubscribe();
            if let Err(e) = session.close() {
                warn!(interface_id, error = %e, "close failed during release");
            }
        }
    }
}
