//! The central navigation state machine.
//!
//! ```text
//! intent ──→ Navigator ──→ action (submit) ──→ loaders (concurrent)
//!                │                                  │
//!                │ supersession: new generation     │ arrival-order updates,
//!                │ cancels prior tasks and          │ failures routed to
//!                │ deferred subscriptions           │ boundaries, siblings
//!                ▼                                  ▼ keep running
//!          NavigationState ←──────────────── commit on full settlement
//! ```
//!
//! Exactly one main navigation is in flight at a time. Starting a new one
//! bumps the generation counter and cancels the previous generation; a
//! superseded generation never mutates the live snapshot, even if its work
//! settles later.

mod intent;
mod state;

pub use intent::{IntentKind, NavigationIntent};
pub use state::{NavPhase, NavigationState, RouteData};

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinSet;

use crate::boundary::{Boundary, ErrorResolver};
use crate::deferred::DeferredResolver;
use crate::error::EngineError;
use crate::route::{
    ActionContext, Location, LoaderContext, MatchedSegment, Outcome, RouteMatcher,
};
use crate::subscription::{Subscribers, Subscription};
use crate::task::{run_cancellable, AsyncTask, CancelHandle, CancelSource, TaskOutcome};

/// Monotonically increasing tag distinguishing the current navigation from
/// superseded ones.
pub type Generation = u64;

pub(crate) struct NavigatorInner {
    matcher: Arc<dyn RouteMatcher>,
    generation: AtomicU64,
    /// Generation of the most recently settled navigation; `settled()` waits
    /// for it to catch up with `generation`.
    settled_generation: AtomicU64,
    cancel: Mutex<CancelSource>,
    state: Mutex<NavigationState>,
    subscribers: Subscribers<NavigationState>,
    /// Segment ids with a loader in flight under the current generation;
    /// revalidation deduplicates against this set.
    pending_loaders: Mutex<HashSet<String>>,
    settled: Notify,
}

impl NavigatorInner {
    fn is_current(&self, generation: Generation) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Apply a mutation and notify subscribers, unless `generation` has been
    /// superseded. This is the single gate enforcing stale-result
    /// suppression: every resumption from a suspension point funnels its
    /// state updates through here.
    fn mutate(&self, generation: Generation, f: impl FnOnce(&mut NavigationState)) -> bool {
        let snapshot = {
            let mut state = self.state.lock();
            if !self.is_current(generation) {
                tracing::debug!(generation, "Stale settlement discarded");
                return false;
            }
            f(&mut state);
            state.clone()
        };
        self.subscribers.notify(&snapshot);
        true
    }

    /// Supersede the previous navigation: bump the generation, signal its
    /// cancellation, and install a fresh signal for the new one.
    fn begin_generation(&self) -> (Generation, CancelHandle) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = {
            let mut cancel = self.cancel.lock();
            cancel.cancel();
            *cancel = CancelSource::new();
            cancel.handle()
        };
        self.pending_loaders.lock().clear();
        tracing::debug!(generation, "Navigation generation started");
        (generation, handle)
    }

    fn attach_error(
        &self,
        generation: Generation,
        matches: &[MatchedSegment],
        origin: usize,
        error: EngineError,
    ) {
        let boundary = ErrorResolver::resolve(matches, origin);
        tracing::warn!(boundary = ?boundary, error = %error, "Error attached to boundary");
        self.mutate(generation, |state| {
            if let Boundary::Segment(id) = &boundary {
                // The boundary replaces whatever the segment would have
                // rendered.
                state.loader_data.remove(id);
            }
            state.errors.insert(boundary.clone(), error);
        });
    }

    /// End the navigation without committing a new location (failed action,
    /// missing action). Marks the generation settled.
    fn finish_idle(&self, generation: Generation) {
        if self.mutate(generation, |state| {
            state.phase = NavPhase::Idle;
            state.pending_location = None;
            state.pending_form = None;
        }) {
            self.settled_generation.store(generation, Ordering::SeqCst);
            self.settled.notify_waiters();
        }
    }
}

/// The engine's single writer of [`NavigationState`]. Cheap to clone; all
/// clones share the same state machine.
#[derive(Clone)]
pub struct Navigator {
    inner: Arc<NavigatorInner>,
}

impl Navigator {
    pub fn new(matcher: Arc<dyn RouteMatcher>, initial: Location) -> Self {
        Self {
            inner: Arc::new(NavigatorInner {
                matcher,
                generation: AtomicU64::new(0),
                settled_generation: AtomicU64::new(0),
                cancel: Mutex::new(CancelSource::new()),
                state: Mutex::new(NavigationState::initial(initial)),
                subscribers: Subscribers::new(),
                pending_loaders: Mutex::new(HashSet::new()),
                settled: Notify::new(),
            }),
        }
    }

    /// Start a navigation, superseding any in-flight one. Progress is
    /// observable through [`Navigator::subscribe`]; the returned generation
    /// identifies this attempt in logs.
    pub fn navigate(&self, intent: NavigationIntent) -> Generation {
        spawn_navigation(&self.inner, intent)
    }

    /// Register a callback invoked on every state transition.
    pub fn subscribe(
        &self,
        callback: impl Fn(&NavigationState) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.subscribers.subscribe(callback)
    }

    /// Clone of the current snapshot.
    pub fn snapshot(&self) -> NavigationState {
        self.inner.state.lock().clone()
    }

    pub fn generation(&self) -> Generation {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Wait until the latest navigation has fully settled and no
    /// revalidation is running.
    pub async fn settled(&self) {
        loop {
            let notified = self.inner.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let caught_up = self.inner.settled_generation.load(Ordering::SeqCst)
                == self.inner.generation.load(Ordering::SeqCst);
            if caught_up && self.snapshot().is_idle() {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn inner(&self) -> &Arc<NavigatorInner> {
        &self.inner
    }
}

pub(crate) fn spawn_navigation(
    inner: &Arc<NavigatorInner>,
    intent: NavigationIntent,
) -> Generation {
    let (generation, cancel) = inner.begin_generation();
    let task_inner = Arc::clone(inner);
    tokio::spawn(async move {
        run_navigation(task_inner, generation, intent, cancel).await;
    });
    generation
}

/// Re-run the loaders of the committed matches under the current generation.
/// Surfaces only as the `revalidating` flag; never a phase transition.
pub(crate) fn spawn_revalidation(inner: &Arc<NavigatorInner>) {
    let generation = inner.generation.load(Ordering::SeqCst);
    let cancel = inner.cancel.lock().handle();
    let location = inner.state.lock().location.clone();
    let matches = inner.matcher.resolve(&location);
    if matches.is_empty() {
        return;
    }
    if !inner.mutate(generation, |state| {
        state.revalidating = true;
    }) {
        return;
    }
    tracing::info!(generation, location = %location, "Revalidation started");
    let task_inner = Arc::clone(inner);
    tokio::spawn(async move {
        run_loaders(&task_inner, generation, &matches, &location, &cancel).await;
        if task_inner.mutate(generation, |state| {
            state.revalidating = false;
        }) {
            tracing::info!(generation, "Revalidation complete");
            task_inner.settled.notify_waiters();
        }
    });
}

enum ActionStep {
    /// Action settled successfully; proceed to the loader phase.
    Proceed(Option<Value>),
    /// Action failed, redirected, or was superseded; loaders do not run.
    Stop,
}

async fn run_navigation(
    inner: Arc<NavigatorInner>,
    generation: Generation,
    intent: NavigationIntent,
    cancel: CancelHandle,
) {
    let matches = inner.matcher.resolve(&intent.location);
    if matches.is_empty() {
        // The previous navigation's boundary errors do not outlive it.
        inner.mutate(generation, |state| {
            state.errors.clear();
            state.action_result = None;
        });
        inner.attach_error(
            generation,
            &matches,
            0,
            EngineError::NoMatch {
                path: intent.location.path.clone(),
            },
        );
        commit(&inner, generation, &intent.location, &matches);
        return;
    }

    let mut action_result = None;
    if intent.kind == IntentKind::Submit {
        if !inner.mutate(generation, |state| {
            state.phase = NavPhase::Submitting;
            state.revalidating = false;
            state.pending_location = Some(intent.location.clone());
            state.pending_form = intent.payload.clone();
            state.errors.clear();
            state.action_result = None;
        }) {
            return;
        }
        match run_action(&inner, generation, &intent, &matches, &cancel).await {
            ActionStep::Proceed(value) => action_result = value,
            ActionStep::Stop => return,
        }
    }

    if !inner.mutate(generation, |state| {
        state.phase = NavPhase::Loading;
        state.revalidating = false;
        state.pending_location = Some(intent.location.clone());
        if intent.kind == IntentKind::Load {
            state.pending_form = None;
            state.errors.clear();
            state.action_result = None;
        }
        if let Some(value) = action_result.take() {
            state.action_result = Some(value);
        }
    }) {
        return;
    }

    if !run_loaders(&inner, generation, &matches, &intent.location, &cancel).await {
        return;
    }
    commit(&inner, generation, &intent.location, &matches);
}

fn commit(
    inner: &Arc<NavigatorInner>,
    generation: Generation,
    location: &Location,
    matches: &[MatchedSegment],
) {
    let keep: HashSet<String> = matches
        .iter()
        .map(|m| m.segment.id().to_string())
        .collect();
    if inner.mutate(generation, |state| {
        state.phase = NavPhase::Idle;
        state.location = location.clone();
        state.pending_location = None;
        state.pending_form = None;
        state.loader_data.retain(|id, _| keep.contains(id));
        // A boundary's error replaces its data even when the data settled
        // after the error arrived.
        for boundary in state.errors.keys() {
            if let Boundary::Segment(id) = boundary {
                state.loader_data.remove(id);
            }
        }
    }) {
        tracing::info!(generation, location = %location, "Navigation committed");
        inner.settled_generation.store(generation, Ordering::SeqCst);
        inner.settled.notify_waiters();
    }
}

async fn run_action(
    inner: &Arc<NavigatorInner>,
    generation: Generation,
    intent: &NavigationIntent,
    matches: &[MatchedSegment],
    cancel: &CancelHandle,
) -> ActionStep {
    let deepest = matches
        .iter()
        .enumerate()
        .rev()
        .find_map(|(index, m)| m.segment.action().map(|action| (index, Arc::clone(action), m)));
    let Some((origin, action, matched)) = deepest else {
        inner.attach_error(
            generation,
            matches,
            matches.len() - 1,
            EngineError::NoAction {
                path: intent.location.path.clone(),
            },
        );
        inner.finish_idle(generation);
        return ActionStep::Stop;
    };

    let segment_id = matched.segment.id().to_string();
    let ctx = ActionContext {
        location: intent.location.clone(),
        params: matched.params.clone(),
        payload: intent.payload.clone().unwrap_or_default(),
        cancel: cancel.clone(),
    };
    let task = AsyncTask::spawn(async move { action.call(ctx).await }, cancel.clone());
    match task.join().await {
        TaskOutcome::Cancelled => {
            tracing::debug!(generation, segment = %segment_id, "Action cancelled by supersession");
            ActionStep::Stop
        }
        TaskOutcome::Settled(Ok(Outcome::Redirect(location))) => {
            if inner.is_current(generation) {
                tracing::info!(generation, location = %location, "Action redirected");
                spawn_navigation(inner, NavigationIntent::load(location));
            }
            ActionStep::Stop
        }
        TaskOutcome::Settled(Ok(Outcome::Data(value))) => ActionStep::Proceed(Some(value)),
        TaskOutcome::Settled(Ok(Outcome::Deferred(_))) => {
            // Deferred data only makes sense for loaders; callers of a
            // mutation need its full result.
            inner.attach_error(
                generation,
                matches,
                origin,
                EngineError::Action {
                    segment: segment_id,
                    message: "actions cannot return deferred data".into(),
                },
            );
            inner.finish_idle(generation);
            ActionStep::Stop
        }
        TaskOutcome::Settled(Err(err)) => {
            inner.attach_error(
                generation,
                matches,
                origin,
                EngineError::Action {
                    segment: segment_id,
                    message: err.to_string(),
                },
            );
            inner.finish_idle(generation);
            ActionStep::Stop
        }
    }
}

/// Run every matched segment's loader concurrently, applying settlements in
/// arrival order keyed by segment id. Returns false if the run ended early
/// because the generation was superseded or a loader redirected.
async fn run_loaders(
    inner: &Arc<NavigatorInner>,
    generation: Generation,
    matches: &[MatchedSegment],
    location: &Location,
    cancel: &CancelHandle,
) -> bool {
    let mut tasks: JoinSet<(usize, TaskOutcome<anyhow::Result<Outcome>>)> = JoinSet::new();
    for (index, m) in matches.iter().enumerate() {
        let Some(loader) = m.segment.loader() else {
            continue;
        };
        {
            let mut pending = inner.pending_loaders.lock();
            // Checked under the set's lock: a superseded run must not seed
            // the set after `begin_generation` cleared it, or the fresh
            // generation would dedup-skip its own loaders.
            if !inner.is_current(generation) {
                return false;
            }
            if !pending.insert(m.segment.id().to_string()) {
                // Already in flight under this generation; deduplicated.
                continue;
            }
        }
        let loader = Arc::clone(loader);
        let ctx = LoaderContext {
            location: location.clone(),
            params: m.params.clone(),
            cancel: cancel.clone(),
        };
        let guard = cancel.clone();
        tasks.spawn(async move {
            let outcome = run_cancellable(loader.load(ctx), guard).await;
            (index, outcome)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let (index, outcome) = match joined {
            Ok(settled) => settled,
            Err(err) => {
                tracing::warn!(generation, error = %err, "Loader task failed to join");
                continue;
            }
        };
        // Re-check at every resumption: a superseded run must not touch the
        // live state, even for settlements that already arrived.
        if !inner.is_current(generation) {
            tracing::debug!(generation, "Loader run superseded; remaining results discarded");
            return false;
        }
        let segment_id = matches[index].segment.id().to_string();
        inner.pending_loaders.lock().remove(&segment_id);
        match outcome {
            TaskOutcome::Cancelled => {}
            TaskOutcome::Settled(Ok(Outcome::Data(value))) => {
                inner.mutate(generation, |state| {
                    state.loader_data.insert(segment_id.clone(), RouteData::Value(value));
                });
            }
            TaskOutcome::Settled(Ok(Outcome::Deferred(payload))) => {
                // Stored as-is; lazy entries settle into the envelope without
                // holding up the navigation.
                let envelope = DeferredResolver::wrap(payload, cancel.clone());
                inner.mutate(generation, |state| {
                    state
                        .loader_data
                        .insert(segment_id.clone(), RouteData::Deferred(envelope));
                });
            }
            TaskOutcome::Settled(Ok(Outcome::Redirect(target))) => {
                tracing::info!(generation, location = %target, "Loader redirected");
                spawn_navigation(inner, NavigationIntent::load(target));
                return false;
            }
            TaskOutcome::Settled(Err(err)) => {
                // Failure isolation: the error goes to this segment's
                // boundary, sibling loaders keep running.
                inner.attach_error(
                    generation,
                    matches,
                    index,
                    EngineError::Load {
                        segment: segment_id,
                        message: err.to_string(),
                    },
                );
            }
        }
    }
    inner.is_current(generation)
}
