//! Route segments and the loader/action contracts.
//!
//! URL pattern syntax, route-tree construction, and matching live in an
//! external collaborator behind [`RouteMatcher`]; the engine only ever sees
//! an ordered chain of matched segments, outermost first.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::deferred::DeferredPayload;
use crate::task::CancelHandle;

/// A resolved target location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub path: String,
}

impl Location {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Submitted form payload, as a JSON object.
pub type FormPayload = serde_json::Map<String, Value>;

/// What a loader or action produced.
pub enum Outcome {
    /// Plain data for the owning segment.
    Data(Value),
    /// Mixed payload: critical values available now, lazy values streaming in.
    Deferred(DeferredPayload),
    /// Navigate somewhere else instead of rendering data. The engine turns
    /// this into a fresh load intent.
    Redirect(Location),
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Data(value) => f.debug_tuple("Data").field(value).finish(),
            Outcome::Deferred(payload) => f.debug_tuple("Deferred").field(payload).finish(),
            Outcome::Redirect(location) => f.debug_tuple("Redirect").field(location).finish(),
        }
    }
}

/// Request context handed to a loader.
///
/// The cancel handle is the owning generation's signal: long-running work
/// (timers, network requests) can race against it to abort cooperatively.
pub struct LoaderContext {
    pub location: Location,
    pub params: HashMap<String, String>,
    pub cancel: CancelHandle,
}

/// Request context handed to an action; additionally carries the submitted
/// form payload.
pub struct ActionContext {
    pub location: Location,
    pub params: HashMap<String, String>,
    pub payload: FormPayload,
    pub cancel: CancelHandle,
}

/// Read-side data fetch bound to a route segment.
#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(&self, ctx: LoaderContext) -> anyhow::Result<Outcome>;
}

/// Write-side mutation bound to a route segment, invoked on submission.
#[async_trait]
pub trait Action: Send + Sync {
    async fn call(&self, ctx: ActionContext) -> anyhow::Result<Outcome>;
}

type BoxedOutcome = Pin<Box<dyn Future<Output = anyhow::Result<Outcome>> + Send>>;

struct FnLoader<F>(F);

#[async_trait]
impl<F> Loader for FnLoader<F>
where
    F: Fn(LoaderContext) -> BoxedOutcome + Send + Sync,
{
    async fn load(&self, ctx: LoaderContext) -> anyhow::Result<Outcome> {
        (self.0)(ctx).await
    }
}

struct FnAction<F>(F);

#[async_trait]
impl<F> Action for FnAction<F>
where
    F: Fn(ActionContext) -> BoxedOutcome + Send + Sync,
{
    async fn call(&self, ctx: ActionContext) -> anyhow::Result<Outcome> {
        (self.0)(ctx).await
    }
}

/// Wrap an async closure as a [`Loader`].
pub fn loader_fn<F, Fut>(f: F) -> Arc<dyn Loader>
where
    F: Fn(LoaderContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Outcome>> + Send + 'static,
{
    Arc::new(FnLoader(move |ctx| Box::pin(f(ctx)) as BoxedOutcome))
}

/// Wrap an async closure as an [`Action`].
pub fn action_fn<F, Fut>(f: F) -> Arc<dyn Action>
where
    F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Outcome>> + Send + 'static,
{
    Arc::new(FnAction(move |ctx| Box::pin(f(ctx)) as BoxedOutcome))
}

/// One segment of a route chain: an id plus optional loader, action, and
/// error-boundary capability.
pub struct RouteSegment {
    id: String,
    loader: Option<Arc<dyn Loader>>,
    action: Option<Arc<dyn Action>>,
    boundary: bool,
}

impl RouteSegment {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            loader: None,
            action: None,
            boundary: false,
        }
    }

    pub fn with_loader(mut self, loader: Arc<dyn Loader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn with_action(mut self, action: Arc<dyn Action>) -> Self {
        self.action = Some(action);
        self
    }

    /// Declare this segment able to absorb errors from itself and its
    /// descendants.
    pub fn with_boundary(mut self) -> Self {
        self.boundary = true;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn loader(&self) -> Option<&Arc<dyn Loader>> {
        self.loader.as_ref()
    }

    pub fn action(&self) -> Option<&Arc<dyn Action>> {
        self.action.as_ref()
    }

    pub fn has_boundary(&self) -> bool {
        self.boundary
    }
}

// Loader/action are opaque callables; Debug shows presence flags only.
impl fmt::Debug for RouteSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteSegment")
            .field("id", &self.id)
            .field("loader", &self.loader.is_some())
            .field("action", &self.action.is_some())
            .field("boundary", &self.boundary)
            .finish()
    }
}

/// A segment as matched against a concrete location, with extracted params.
#[derive(Debug, Clone)]
pub struct MatchedSegment {
    pub segment: Arc<RouteSegment>,
    pub params: HashMap<String, String>,
}

impl MatchedSegment {
    pub fn new(segment: Arc<RouteSegment>) -> Self {
        Self {
            segment,
            params: HashMap::new(),
        }
    }

    pub fn with_params(mut self, params: HashMap<String, String>) -> Self {
        self.params = params;
        self
    }
}

/// External collaborator resolving a location to its matched chain,
/// outermost first. Empty means nothing matched.
pub trait RouteMatcher: Send + Sync {
    fn resolve(&self, location: &Location) -> Vec<MatchedSegment>;
}
