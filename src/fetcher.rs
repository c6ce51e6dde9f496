//! Out-of-band background requests.
//!
//! A fetcher is an independently identified load/submit operation outside
//! the main navigation's cancellation scope: navigations do not cancel
//! fetchers and fetchers do not block navigations. Each fetcher id carries
//! its own generation counter, so reusing an in-flight id supersedes that
//! id's previous attempt exactly like main-navigation supersession. A
//! successful fetcher action triggers revalidation of the active loaders.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::deferred::DeferredResolver;
use crate::error::EngineError;
use crate::navigator::{NavigationIntent, RouteData};
use crate::revalidate::RevalidationCoordinator;
use crate::route::{
    ActionContext, FormPayload, Location, LoaderContext, MatchedSegment, Outcome, RouteMatcher,
};
use crate::subscription::{Subscribers, Subscription};
use crate::task::{run_cancellable, CancelHandle, CancelSource, TaskOutcome};

/// Where a fetcher is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetcherPhase {
    Idle,
    Loading,
    Submitting,
}

/// Snapshot of one fetcher. Identity is stable for as long as the caller
/// retains the id; state persists across navigations until disposed.
#[derive(Debug, Clone)]
pub struct Fetcher {
    pub id: String,
    pub phase: FetcherPhase,
    pub data: Option<RouteData>,
    pub pending_form: Option<FormPayload>,
    pub error: Option<EngineError>,
}

impl Fetcher {
    fn idle(id: &str) -> Self {
        Self {
            id: id.to_string(),
            phase: FetcherPhase::Idle,
            data: None,
            pending_form: None,
            error: None,
        }
    }
}

struct FetcherSlot {
    generation: u64,
    cancel: CancelSource,
    state: Fetcher,
    subscribers: Arc<Subscribers<Fetcher>>,
}

impl FetcherSlot {
    fn new(id: &str) -> Self {
        Self {
            generation: 0,
            cancel: CancelSource::new(),
            state: Fetcher::idle(id),
            subscribers: Arc::new(Subscribers::new()),
        }
    }
}

struct RegistryInner {
    matcher: Arc<dyn RouteMatcher>,
    revalidator: RevalidationCoordinator,
    slots: Mutex<HashMap<String, FetcherSlot>>,
    /// Registry-wide attempt counter; per-slot generations draw from it so a
    /// disposed-and-recreated id can never collide with a stale attempt.
    attempts: AtomicU64,
}

/// Manages the set of fetchers; their sole mutator.
#[derive(Clone)]
pub struct FetcherRegistry {
    inner: Arc<RegistryInner>,
}

impl FetcherRegistry {
    pub fn new(matcher: Arc<dyn RouteMatcher>, revalidator: RevalidationCoordinator) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                matcher,
                revalidator,
                slots: Mutex::new(HashMap::new()),
                attempts: AtomicU64::new(0),
            }),
        }
    }

    /// Snapshot of a fetcher's current state, if it exists.
    pub fn get(&self, id: &str) -> Option<Fetcher> {
        self.inner.slots.lock().get(id).map(|slot| slot.state.clone())
    }

    /// Subscribe to a fetcher's transitions, creating it idle if absent.
    pub fn subscribe(
        &self,
        id: &str,
        callback: impl Fn(&Fetcher) + Send + Sync + 'static,
    ) -> Subscription {
        let mut slots = self.inner.slots.lock();
        let slot = slots
            .entry(id.to_string())
            .or_insert_with(|| FetcherSlot::new(id));
        slot.subscribers.subscribe(callback)
    }

    /// Drop a fetcher entirely, cancelling any in-flight attempt. The id may
    /// be reused afterwards for a new logical fetcher.
    pub fn dispose(&self, id: &str) {
        if let Some(slot) = self.inner.slots.lock().remove(id) {
            slot.cancel.cancel();
            tracing::debug!(fetcher = %id, "Fetcher disposed");
        }
    }

    /// Run the deepest matched loader for `location` under this fetcher.
    pub fn load(&self, id: impl Into<String>, location: Location) -> u64 {
        let id = id.into();
        let (generation, cancel) = self.begin(&id, FetcherPhase::Loading, None);
        let target = self.deepest(&location, |m| {
            m.segment.loader().map(|l| (Arc::clone(l), m.params.clone()))
        });
        let registry = self.clone();
        tokio::spawn(async move {
            let Some((loader, params)) = target else {
                registry.settle(&id, generation, |f| {
                    f.phase = FetcherPhase::Idle;
                    f.error = Some(EngineError::NoLoader {
                        path: location.path.clone(),
                    });
                });
                return;
            };
            let ctx = LoaderContext {
                location: location.clone(),
                params,
                cancel: cancel.clone(),
            };
            match run_cancellable(loader.load(ctx), cancel.clone()).await {
                TaskOutcome::Cancelled => {
                    tracing::debug!(fetcher = %id, "Fetcher load superseded");
                }
                TaskOutcome::Settled(Ok(Outcome::Data(value))) => {
                    registry.settle(&id, generation, |f| {
                        f.phase = FetcherPhase::Idle;
                        f.data = Some(RouteData::Value(value));
                    });
                }
                TaskOutcome::Settled(Ok(Outcome::Deferred(payload))) => {
                    let envelope = DeferredResolver::wrap(payload, cancel.clone());
                    registry.settle(&id, generation, |f| {
                        f.phase = FetcherPhase::Idle;
                        f.data = Some(RouteData::Deferred(envelope));
                    });
                }
                TaskOutcome::Settled(Ok(Outcome::Redirect(target))) => {
                    if registry.settle(&id, generation, |f| f.phase = FetcherPhase::Idle) {
                        registry
                            .inner
                            .revalidator
                            .navigator()
                            .navigate(NavigationIntent::load(target));
                    }
                }
                TaskOutcome::Settled(Err(err)) => {
                    registry.settle(&id, generation, |f| {
                        f.phase = FetcherPhase::Idle;
                        f.error = Some(EngineError::Fetcher {
                            id: f.id.clone(),
                            message: err.to_string(),
                        });
                    });
                }
            }
        });
        generation
    }

    /// Run the deepest matched action for `location` under this fetcher.
    /// On success the active loaders are revalidated, unless the action
    /// redirected — the redirect's own loader run supersedes revalidation.
    pub fn submit(&self, id: impl Into<String>, location: Location, payload: FormPayload) -> u64 {
        let id = id.into();
        let (generation, cancel) = self.begin(&id, FetcherPhase::Submitting, Some(payload.clone()));
        let target = self.deepest(&location, |m| {
            m.segment.action().map(|a| (Arc::clone(a), m.params.clone()))
        });
        let registry = self.clone();
        tokio::spawn(async move {
            let Some((action, params)) = target else {
                registry.settle(&id, generation, |f| {
                    f.phase = FetcherPhase::Idle;
                    f.pending_form = None;
                    f.error = Some(EngineError::NoAction {
                        path: location.path.clone(),
                    });
                });
                return;
            };
            let ctx = ActionContext {
                location: location.clone(),
                params,
                payload,
                cancel: cancel.clone(),
            };
            match run_cancellable(action.call(ctx), cancel.clone()).await {
                TaskOutcome::Cancelled => {
                    tracing::debug!(fetcher = %id, "Fetcher submit superseded");
                }
                TaskOutcome::Settled(Ok(Outcome::Data(value))) => {
                    if registry.settle(&id, generation, |f| {
                        f.phase = FetcherPhase::Idle;
                        f.pending_form = None;
                        f.data = Some(RouteData::Value(value));
                    }) {
                        tracing::info!(fetcher = %id, "Fetcher action settled; revalidating");
                        registry.inner.revalidator.revalidate();
                    }
                }
                TaskOutcome::Settled(Ok(Outcome::Deferred(_))) => {
                    registry.settle(&id, generation, |f| {
                        f.phase = FetcherPhase::Idle;
                        f.pending_form = None;
                        f.error = Some(EngineError::Fetcher {
                            id: f.id.clone(),
                            message: "actions cannot return deferred data".into(),
                        });
                    });
                }
                TaskOutcome::Settled(Ok(Outcome::Redirect(target))) => {
                    if registry.settle(&id, generation, |f| {
                        f.phase = FetcherPhase::Idle;
                        f.pending_form = None;
                    }) {
                        registry
                            .inner
                            .revalidator
                            .navigator()
                            .navigate(NavigationIntent::load(target));
                    }
                }
                TaskOutcome::Settled(Err(err)) => {
                    registry.settle(&id, generation, |f| {
                        f.phase = FetcherPhase::Idle;
                        f.pending_form = None;
                        f.error = Some(EngineError::Fetcher {
                            id: f.id.clone(),
                            message: err.to_string(),
                        });
                    });
                }
            }
        });
        generation
    }

    /// Supersede any in-flight attempt for `id` and mark the new phase.
    fn begin(
        &self,
        id: &str,
        phase: FetcherPhase,
        pending_form: Option<FormPayload>,
    ) -> (u64, CancelHandle) {
        let (generation, handle, subscribers, snapshot) = {
            let mut slots = self.inner.slots.lock();
            let slot = slots
                .entry(id.to_string())
                .or_insert_with(|| FetcherSlot::new(id));
            slot.cancel.cancel();
            slot.cancel = CancelSource::new();
            slot.generation = self.inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            slot.state.phase = phase;
            slot.state.pending_form = pending_form;
            slot.state.error = None;
            (
                slot.generation,
                slot.cancel.handle(),
                Arc::clone(&slot.subscribers),
                slot.state.clone(),
            )
        };
        subscribers.notify(&snapshot);
        (generation, handle)
    }

    /// Apply a settlement for attempt `generation`, unless that attempt has
    /// been superseded or the fetcher disposed.
    fn settle(&self, id: &str, generation: u64, f: impl FnOnce(&mut Fetcher)) -> bool {
        let (subscribers, snapshot) = {
            let mut slots = self.inner.slots.lock();
            let Some(slot) = slots.get_mut(id) else {
                return false;
            };
            if slot.generation != generation {
                tracing::debug!(fetcher = %id, generation, "Stale fetcher settlement discarded");
                return false;
            }
            f(&mut slot.state);
            (Arc::clone(&slot.subscribers), slot.state.clone())
        };
        subscribers.notify(&snapshot);
        true
    }

    /// Pick from the deepest matched segment that yields `Some`, so a
    /// missing callable is decided before any task is spawned.
    fn deepest<T>(
        &self,
        location: &Location,
        pick: impl Fn(&MatchedSegment) -> Option<T>,
    ) -> Option<T> {
        self.inner
            .matcher
            .resolve(location)
            .into_iter()
            .rev()
            .find_map(|m| pick(&m))
    }
}
