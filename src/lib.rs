//! Wayfarer: a client-side navigation and data-orchestration engine.
//!
//! Coordinates route transitions with asynchronous data fetching (loaders),
//! mutations (actions), partially-streamed deferred payloads, and
//! out-of-band background requests (fetchers), independent of any rendering
//! technology. Collaborators supply route matching behind
//! [`route::RouteMatcher`] and consume state snapshots through
//! subscriptions.
//!
//! # Architecture
//!
//! ```text
//! NavigationIntent ──→ Navigator ──→ AsyncTasks (action, then loaders)
//!                         │                │
//!                         │                ├──→ DeferredResolver (lazy entries)
//!                         │                └──→ ErrorResolver (boundaries)
//!                         ▼
//!                  NavigationState ←── RevalidationCoordinator ←── FetcherRegistry
//! ```
//!
//! A generation counter makes supersession explicit: starting a navigation
//! cancels the previous one's tasks and deferred subscriptions, and stale
//! settlements are discarded before they can touch the live snapshot.

pub mod boundary;
pub mod deferred;
pub mod error;
pub mod fetcher;
pub mod navigator;
pub mod revalidate;
pub mod route;
pub mod subscription;
pub mod task;

pub use boundary::{Boundary, ErrorResolver};
pub use deferred::{DeferredEnvelope, DeferredHandle, DeferredPayload, DeferredResolver, DeferredState};
pub use error::EngineError;
pub use fetcher::{Fetcher, FetcherPhase, FetcherRegistry};
pub use navigator::{
    Generation, IntentKind, NavPhase, NavigationIntent, NavigationState, Navigator, RouteData,
};
pub use revalidate::RevalidationCoordinator;
pub use route::{
    action_fn, loader_fn, Action, ActionContext, FormPayload, Loader, LoaderContext, Location,
    MatchedSegment, Outcome, RouteMatcher, RouteSegment,
};
pub use subscription::{Subscribers, Subscription};
pub use task::{run_cancellable, AsyncTask, CancelHandle, CancelSource, TaskOutcome};
