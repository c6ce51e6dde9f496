//! Shared test utilities: a static route matcher, canned loaders/actions,
//! and state recorders.

#![allow(dead_code, unused_imports)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use wayfarer::fetcher::{Fetcher, FetcherRegistry};
use wayfarer::navigator::{NavigationState, Navigator};
use wayfarer::revalidate::RevalidationCoordinator;
use wayfarer::route::{
    action_fn, loader_fn, Action, FormPayload, Loader, Location, MatchedSegment, Outcome,
    RouteMatcher, RouteSegment,
};

/// Opt-in logging for debugging test runs; set RUST_LOG to enable.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Exact-path lookup table standing in for the out-of-scope route matcher.
pub struct StaticMatcher {
    table: HashMap<String, Vec<MatchedSegment>>,
}

impl StaticMatcher {
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    pub fn route(mut self, path: &str, segments: Vec<MatchedSegment>) -> Self {
        self.table.insert(path.to_string(), segments);
        self
    }
}

impl RouteMatcher for StaticMatcher {
    fn resolve(&self, location: &Location) -> Vec<MatchedSegment> {
        self.table.get(&location.path).cloned().unwrap_or_default()
    }
}

pub fn seg(segment: RouteSegment) -> MatchedSegment {
    MatchedSegment::new(Arc::new(segment))
}

/// Wire up a full engine around a matcher, starting at "/".
pub fn engine(matcher: StaticMatcher) -> (Navigator, RevalidationCoordinator, FetcherRegistry) {
    let matcher: Arc<dyn RouteMatcher> = Arc::new(matcher);
    let navigator = Navigator::new(Arc::clone(&matcher), Location::new("/"));
    let revalidator = RevalidationCoordinator::new(navigator.clone());
    let fetchers = FetcherRegistry::new(matcher, revalidator.clone());
    (navigator, revalidator, fetchers)
}

pub fn data_loader(value: Value) -> Arc<dyn Loader> {
    loader_fn(move |_ctx| {
        let value = value.clone();
        async move { Ok(Outcome::Data(value)) }
    })
}

pub fn slow_loader(delay_ms: u64, value: Value) -> Arc<dyn Loader> {
    loader_fn(move |_ctx| {
        let value = value.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(Outcome::Data(value))
        }
    })
}

pub fn failing_loader(message: &str) -> Arc<dyn Loader> {
    let message = message.to_string();
    loader_fn(move |_ctx| {
        let message = message.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(anyhow::anyhow!(message))
        }
    })
}

/// Counts invocations, then returns `value`.
pub fn counting_loader(counter: Arc<AtomicUsize>, value: Value) -> Arc<dyn Loader> {
    loader_fn(move |_ctx| {
        let counter = Arc::clone(&counter);
        let value = value.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Outcome::Data(value))
        }
    })
}

pub fn data_action(value: Value) -> Arc<dyn Action> {
    action_fn(move |_ctx| {
        let value = value.clone();
        async move { Ok(Outcome::Data(value)) }
    })
}

pub fn failing_action(message: &str) -> Arc<dyn Action> {
    let message = message.to_string();
    action_fn(move |_ctx| {
        let message = message.clone();
        async move { Err(anyhow::anyhow!(message)) }
    })
}

pub fn redirect_action(path: &str) -> Arc<dyn Action> {
    let path = path.to_string();
    action_fn(move |_ctx| {
        let path = path.clone();
        async move { Ok(Outcome::Redirect(Location::new(path))) }
    })
}

pub fn payload(entries: &[(&str, Value)]) -> FormPayload {
    entries
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

/// Record every navigation snapshot pushed to subscribers.
pub fn record_states(navigator: &Navigator) -> Arc<Mutex<Vec<NavigationState>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let _sub = navigator.subscribe(move |state| sink.lock().push(state.clone()));
    log
}

/// Record every snapshot of one fetcher.
pub fn record_fetcher(registry: &FetcherRegistry, id: &str) -> Arc<Mutex<Vec<Fetcher>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let _sub = registry.subscribe(id, move |fetcher| sink.lock().push(fetcher.clone()));
    log
}

/// Poll `cond` until it holds, panicking after two seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within 2s");
}
