//! Partially-streamed loader payloads.
//!
//! A loader may return a mix of already-resolved ("critical") values and
//! still-pending ("lazy") ones. [`DeferredResolver::wrap`] hands back an
//! envelope synchronously with the critical portion readable immediately;
//! each lazy entry settles independently and notifies its own subscribers
//! in settlement order. Rejection of one entry never fails its siblings,
//! and superseding the owning generation releases subscribers without a
//! final notification.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::error::EngineError;
use crate::subscription::{Subscribers, Subscription};
use crate::task::CancelHandle;

type LazyFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;

/// Builder for a loader result that mixes resolved and pending values.
pub struct DeferredPayload {
    critical: Map<String, Value>,
    lazy: Vec<(String, LazyFuture)>,
}

impl DeferredPayload {
    pub fn new() -> Self {
        Self {
            critical: Map::new(),
            lazy: Vec::new(),
        }
    }

    /// Add an already-resolved value.
    pub fn critical(mut self, name: impl Into<String>, value: Value) -> Self {
        self.critical.insert(name.into(), value);
        self
    }

    /// Add a pending value. The future starts running when the payload is
    /// wrapped into an envelope.
    pub fn lazy<F>(mut self, name: impl Into<String>, fut: F) -> Self
    where
        F: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.lazy.push((name.into(), Box::pin(fut)));
        self
    }
}

impl Default for DeferredPayload {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DeferredPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lazy_names: Vec<&str> = self.lazy.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("DeferredPayload")
            .field("critical", &self.critical)
            .field("lazy", &lazy_names)
            .finish()
    }
}

/// Current state of one lazy entry. Transitions exactly once from `Pending`
/// to a terminal state.
#[derive(Debug, Clone, PartialEq)]
pub enum DeferredState {
    Pending,
    Resolved(Value),
    Rejected(EngineError),
}

impl DeferredState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeferredState::Pending)
    }
}

struct EntryInner {
    name: String,
    state: Mutex<DeferredState>,
    subscribers: Subscribers<DeferredState>,
}

/// Subscribable handle to one lazy entry.
#[derive(Clone)]
pub struct DeferredHandle {
    inner: Arc<EntryInner>,
}

impl DeferredHandle {
    fn new(name: String) -> Self {
        Self {
            inner: Arc::new(EntryInner {
                name,
                state: Mutex::new(DeferredState::Pending),
                subscribers: Subscribers::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Snapshot of the entry's current state.
    pub fn state(&self) -> DeferredState {
        self.inner.state.lock().clone()
    }

    /// Register a callback fired when the entry settles. Subscribers are
    /// notified in settlement order across entries, not declaration order.
    pub fn subscribe(
        &self,
        callback: impl Fn(&DeferredState) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.subscribers.subscribe(callback)
    }

    fn transition(&self, next: DeferredState) {
        let snapshot = {
            let mut state = self.inner.state.lock();
            if state.is_terminal() {
                // Exactly-once: re-settling a terminal entry is a no-op.
                return;
            }
            *state = next;
            state.clone()
        };
        self.inner.subscribers.notify(&snapshot);
    }

    /// Release subscribers without notifying; the entry stays pending
    /// forever. Used when the owning generation is superseded.
    fn invalidate(&self) {
        self.inner.subscribers.clear();
    }
}

impl fmt::Debug for DeferredHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredHandle")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

/// One loader result that opted into deferred semantics: critical values
/// plus independently-settling lazy entries. Cheap to clone; clones share
/// the same entries.
#[derive(Debug, Clone)]
pub struct DeferredEnvelope {
    critical: Arc<Map<String, Value>>,
    entries: Arc<HashMap<String, DeferredHandle>>,
}

impl DeferredEnvelope {
    pub fn critical(&self, name: &str) -> Option<&Value> {
        self.critical.get(name)
    }

    pub fn critical_values(&self) -> &Map<String, Value> {
        &self.critical
    }

    pub fn entry(&self, name: &str) -> Option<&DeferredHandle> {
        self.entries.get(name)
    }

    pub fn entries(&self) -> impl Iterator<Item = &DeferredHandle> {
        self.entries.values()
    }
}

/// Tracks settlement of lazy entries behind a [`DeferredEnvelope`].
pub struct DeferredResolver;

impl DeferredResolver {
    /// Wrap a payload into an envelope, returned synchronously with the
    /// critical values in hand. Each lazy future is tracked independently;
    /// the resolver never waits for all entries before returning.
    ///
    /// `cancel` is the owning generation's signal: entries that have not
    /// settled when it fires are discarded without notifying.
    pub fn wrap(payload: DeferredPayload, cancel: CancelHandle) -> DeferredEnvelope {
        let DeferredPayload { critical, lazy } = payload;
        let mut entries = HashMap::new();
        for (name, fut) in lazy {
            let handle = DeferredHandle::new(name.clone());
            entries.insert(name, handle.clone());
            let guard = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = guard.cancelled() => {
                        tracing::debug!(entry = %handle.name(), "Deferred entry discarded by supersession");
                        handle.invalidate();
                    }
                    result = fut => {
                        // Re-check at resumption: cancellation may have won
                        // the race after the future completed.
                        if guard.is_cancelled() {
                            handle.invalidate();
                            return;
                        }
                        match result {
                            Ok(value) => handle.transition(DeferredState::Resolved(value)),
                            Err(err) => {
                                let rejection = EngineError::DeferredEntry {
                                    entry: handle.name().to_string(),
                                    message: err.to_string(),
                                };
                                tracing::warn!(entry = %handle.name(), error = %rejection, "Deferred entry rejected");
                                handle.transition(DeferredState::Rejected(rejection));
                            }
                        }
                    }
                }
            });
        }
        DeferredEnvelope {
            critical: Arc::new(critical),
            entries: Arc::new(entries),
        }
    }
}
