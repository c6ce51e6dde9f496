//! Fetchers: background load/submit operations outside the main
//! navigation's cancellation scope.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::*;
use serde_json::json;
use wayfarer::fetcher::FetcherPhase;
use wayfarer::navigator::{NavPhase, NavigationIntent};
use wayfarer::route::{action_fn, Location, Outcome, RouteSegment};
use wayfarer::EngineError;

#[tokio::test]
async fn load_settles_into_the_fetcher_without_touching_navigation_state() {
    init_tracing();
    let matcher = StaticMatcher::new().route(
        "/items",
        vec![seg(
            RouteSegment::new("items").with_loader(slow_loader(20, json!(["a", "b"]))),
        )],
    );
    let (navigator, _revalidator, fetchers) = engine(matcher);
    let log = record_fetcher(&fetchers, "list");

    fetchers.load("list", Location::new("/items"));
    let registry = fetchers.clone();
    wait_until(move || {
        registry
            .get("list")
            .is_some_and(|f| f.phase == FetcherPhase::Idle && f.data.is_some())
    })
    .await;

    let fetcher = fetchers.get("list").expect("fetcher exists");
    assert_eq!(
        fetcher.data.as_ref().and_then(|d| d.as_value()),
        Some(&json!(["a", "b"]))
    );
    let phases: Vec<FetcherPhase> = log.lock().iter().map(|f| f.phase).collect();
    assert_eq!(phases, vec![FetcherPhase::Loading, FetcherPhase::Idle]);

    // The main snapshot never left idle and holds no fetcher data.
    let state = navigator.snapshot();
    assert_eq!(state.phase, NavPhase::Idle);
    assert!(state.loader_data.is_empty());
}

#[tokio::test]
async fn settled_fetcher_action_revalidates_active_loaders_exactly_once() {
    init_tracing();
    let loads = Arc::new(AtomicUsize::new(0));
    let matcher = StaticMatcher::new()
        .route(
            "/",
            vec![seg(RouteSegment::new("home")
                .with_loader(counting_loader(Arc::clone(&loads), json!("home"))))],
        )
        .route(
            "/todos",
            vec![seg(
                RouteSegment::new("todos").with_action(data_action(json!({"created": true}))),
            )],
        );
    let (navigator, _revalidator, fetchers) = engine(matcher);

    navigator.navigate(NavigationIntent::load(Location::new("/")));
    navigator.settled().await;
    assert_eq!(loads.load(Ordering::SeqCst), 1);

    let nav_log = record_states(&navigator);
    fetchers.submit("add-todo", Location::new("/todos"), payload(&[("t", json!("x"))]));
    let counter = Arc::clone(&loads);
    wait_until(move || counter.load(Ordering::SeqCst) == 2).await;
    navigator.settled().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Exactly one re-run, surfaced as revalidation, never as a main
    // navigation phase transition.
    assert_eq!(loads.load(Ordering::SeqCst), 2);
    let log = nav_log.lock();
    assert!(log.iter().all(|s| s.phase == NavPhase::Idle));
    assert!(log.iter().any(|s| s.revalidating));
    assert!(!navigator.snapshot().revalidating);
    assert_eq!(
        fetchers
            .get("add-todo")
            .and_then(|f| f.data)
            .and_then(|d| d.as_value().cloned()),
        Some(json!({"created": true}))
    );
}

#[tokio::test]
async fn reusing_an_in_flight_id_supersedes_the_previous_attempt() {
    init_tracing();
    let loads = Arc::new(AtomicUsize::new(0));
    let echo_action = action_fn(|ctx| async move {
        tokio::time::sleep(Duration::from_millis(40)).await;
        let n = ctx.payload.get("n").cloned().unwrap_or(json!(null));
        Ok(Outcome::Data(n))
    });
    let matcher = StaticMatcher::new()
        .route(
            "/",
            vec![seg(RouteSegment::new("home")
                .with_loader(counting_loader(Arc::clone(&loads), json!("home"))))],
        )
        .route(
            "/echo",
            vec![seg(RouteSegment::new("echo").with_action(echo_action))],
        );
    let (navigator, _revalidator, fetchers) = engine(matcher);

    navigator.navigate(NavigationIntent::load(Location::new("/")));
    navigator.settled().await;
    assert_eq!(loads.load(Ordering::SeqCst), 1);

    fetchers.submit("f", Location::new("/echo"), payload(&[("n", json!(1))]));
    tokio::time::sleep(Duration::from_millis(10)).await;
    fetchers.submit("f", Location::new("/echo"), payload(&[("n", json!(2))]));

    let registry = fetchers.clone();
    wait_until(move || {
        registry
            .get("f")
            .is_some_and(|f| f.phase == FetcherPhase::Idle && f.data.is_some())
    })
    .await;
    tokio::time::sleep(Duration::from_millis(80)).await;

    // Only the second attempt settled; only it triggered revalidation.
    assert_eq!(
        fetchers
            .get("f")
            .and_then(|f| f.data)
            .and_then(|d| d.as_value().cloned()),
        Some(json!(2))
    );
    assert_eq!(loads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn fetchers_with_distinct_ids_run_in_parallel() {
    init_tracing();
    let matcher = StaticMatcher::new()
        .route(
            "/a",
            vec![seg(RouteSegment::new("a").with_loader(slow_loader(40, json!("a"))))],
        )
        .route(
            "/b",
            vec![seg(RouteSegment::new("b").with_loader(slow_loader(40, json!("b"))))],
        );
    let (_navigator, _revalidator, fetchers) = engine(matcher);

    let started = std::time::Instant::now();
    fetchers.load("fa", Location::new("/a"));
    fetchers.load("fb", Location::new("/b"));
    let registry = fetchers.clone();
    wait_until(move || {
        let done = |id: &str| registry.get(id).is_some_and(|f| f.data.is_some());
        done("fa") && done("fb")
    })
    .await;

    // Overlapping, not serialized.
    assert!(started.elapsed() < Duration::from_millis(150));
}

#[tokio::test]
async fn fetcher_errors_stay_on_the_fetcher() {
    init_tracing();
    let loads = Arc::new(AtomicUsize::new(0));
    let matcher = StaticMatcher::new()
        .route(
            "/",
            vec![seg(RouteSegment::new("home")
                .with_loader(counting_loader(Arc::clone(&loads), json!("home"))))],
        )
        .route(
            "/bad",
            vec![seg(
                RouteSegment::new("bad").with_action(failing_action("rejected")),
            )],
        );
    let (navigator, _revalidator, fetchers) = engine(matcher);

    navigator.navigate(NavigationIntent::load(Location::new("/")));
    navigator.settled().await;

    fetchers.submit("f", Location::new("/bad"), payload(&[]));
    let registry = fetchers.clone();
    wait_until(move || registry.get("f").is_some_and(|f| f.error.is_some())).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let fetcher = fetchers.get("f").expect("fetcher exists");
    assert!(matches!(
        fetcher.error,
        Some(EngineError::Fetcher { ref id, .. }) if id == "f"
    ));
    // No boundary error and no revalidation on a failed mutation.
    assert!(navigator.snapshot().errors.is_empty());
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn redirecting_fetcher_action_navigates_instead_of_revalidating() {
    init_tracing();
    let loads = Arc::new(AtomicUsize::new(0));
    let matcher = StaticMatcher::new()
        .route(
            "/",
            vec![seg(RouteSegment::new("home")
                .with_loader(counting_loader(Arc::clone(&loads), json!("home"))))],
        )
        .route(
            "/go",
            vec![seg(
                RouteSegment::new("go").with_action(redirect_action("/target")),
            )],
        )
        .route(
            "/target",
            vec![seg(
                RouteSegment::new("target").with_loader(data_loader(json!("landed"))),
            )],
        );
    let (navigator, _revalidator, fetchers) = engine(matcher);

    navigator.navigate(NavigationIntent::load(Location::new("/")));
    navigator.settled().await;
    assert_eq!(loads.load(Ordering::SeqCst), 1);

    fetchers.submit("f", Location::new("/go"), payload(&[]));
    let nav = navigator.clone();
    wait_until(move || nav.snapshot().location == Location::new("/target")).await;
    navigator.settled().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The redirect's own loader run superseded revalidation.
    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert_eq!(
        navigator.snapshot().data("target").and_then(|d| d.as_value()),
        Some(&json!("landed"))
    );
}

#[tokio::test]
async fn load_with_no_loader_anywhere_settles_idle_with_an_error() {
    init_tracing();
    let matcher = StaticMatcher::new().route("/bare", vec![seg(RouteSegment::new("bare"))]);
    let (_navigator, _revalidator, fetchers) = engine(matcher);

    fetchers.load("f", Location::new("/bare"));
    let registry = fetchers.clone();
    wait_until(move || registry.get("f").is_some_and(|f| f.error.is_some())).await;

    let fetcher = fetchers.get("f").expect("fetcher exists");
    assert_eq!(fetcher.phase, FetcherPhase::Idle);
    assert!(fetcher.data.is_none());
    assert!(matches!(
        fetcher.error,
        Some(EngineError::NoLoader { ref path }) if path == "/bare"
    ));
}

#[tokio::test]
async fn submit_with_no_action_anywhere_settles_idle_with_an_error() {
    init_tracing();
    let matcher = StaticMatcher::new().route("/bare", vec![seg(RouteSegment::new("bare"))]);
    let (_navigator, _revalidator, fetchers) = engine(matcher);

    fetchers.submit("f", Location::new("/bare"), payload(&[("k", json!("v"))]));
    let registry = fetchers.clone();
    wait_until(move || registry.get("f").is_some_and(|f| f.error.is_some())).await;

    let fetcher = fetchers.get("f").expect("fetcher exists");
    assert_eq!(fetcher.phase, FetcherPhase::Idle);
    assert!(fetcher.pending_form.is_none());
    assert!(matches!(
        fetcher.error,
        Some(EngineError::NoAction { ref path }) if path == "/bare"
    ));
}

#[tokio::test]
async fn disposing_a_fetcher_discards_its_in_flight_attempt() {
    init_tracing();
    let matcher = StaticMatcher::new().route(
        "/slow",
        vec![seg(
            RouteSegment::new("slow").with_loader(slow_loader(60, json!("late"))),
        )],
    );
    let (_navigator, _revalidator, fetchers) = engine(matcher);

    fetchers.load("doomed", Location::new("/slow"));
    tokio::time::sleep(Duration::from_millis(10)).await;
    fetchers.dispose("doomed");
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(fetchers.get("doomed").is_none());
}
