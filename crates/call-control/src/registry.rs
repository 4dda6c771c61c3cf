//! Call registries
//!
//! Two maps with very different owners. [`ChannelRegistry`] is the
//! process-wide service that knows which call ids are currently live on a
//! switch; the session only asks it yes/no questions during sanity checks.
//! [`ControlRegistry`] is the call-id → control-session map the event
//! producer and bus consumer use to deliver into the right mailbox; it is
//! owned here because the session must rename its key atomically when a
//! transfer or bowout renames the call.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::events::SessionMsg;
use crate::types::CallId;

/// Liveness oracle for call ids, backed by the channel cache.
#[async_trait]
pub trait ChannelRegistry: Send + Sync {
    /// Whether the call id still names a live channel.
    async fn is_live(&self, call_id: &CallId) -> bool;
}

/// Address of one control session's mailbox.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionMsg>,
}

impl SessionHandle {
    pub fn new(tx: mpsc::UnboundedSender<SessionMsg>) -> Self {
        Self { tx }
    }

    /// Deliver a message; `false` means the session is gone.
    pub fn send(&self, msg: SessionMsg) -> bool {
        self.tx.send(msg).is_ok()
    }

    /// Whether the session's mailbox has shut down.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Ask the session for a point-in-time view of its state. `None` when
    /// the session is gone.
    pub async fn snapshot(&self) -> Option<crate::session::state::SessionSnapshot> {
        let (reply, answer) = tokio::sync::oneshot::channel();
        if self.tx.send(SessionMsg::Query(reply)).is_err() {
            return None;
        }
        answer.await.ok()
    }
}

/// The call-id → session map.
///
/// A plain `HashMap` under one lock rather than a sharded map: `rename`
/// must remove the old key and insert the new one without any window in
/// which neither maps to the session, and a single write guard is the
/// whole trick.
#[derive(Debug, Default)]
pub struct ControlRegistry {
    inner: RwLock<HashMap<CallId, SessionHandle>>,
}

impl ControlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under its call id. Returns the previous handle
    /// when one was displaced.
    pub fn register(&self, call_id: CallId, handle: SessionHandle) -> Option<SessionHandle> {
        self.inner.write().insert(call_id, handle)
    }

    /// Remove a session. Returns the handle when the id was mapped.
    pub fn deregister(&self, call_id: &CallId) -> Option<SessionHandle> {
        self.inner.write().remove(call_id)
    }

    /// Look up the session controlling a call.
    pub fn lookup(&self, call_id: &CallId) -> Option<SessionHandle> {
        self.inner.read().get(call_id).cloned()
    }

    /// Atomically re-key a session from `old` to `new`. Events arriving
    /// during a transfer rename are delivered either under the old id
    /// (before) or the new one (after); there is no gap. Returns `false`
    /// when `old` was not registered.
    pub fn rename(&self, old: &CallId, new: CallId) -> bool {
        let mut map = self.inner.write();
        match map.remove(old) {
            Some(handle) => {
                map.insert(new, handle);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
