//! The single authoritative navigation snapshot.

use std::collections::HashMap;

use serde_json::Value;

use crate::boundary::Boundary;
use crate::deferred::DeferredEnvelope;
use crate::error::EngineError;
use crate::route::{FormPayload, Location};

/// Where the engine is in the navigation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavPhase {
    Idle,
    Loading,
    Submitting,
}

/// Loader output stored per segment: plain data or a deferred envelope kept
/// as-is while its lazy entries settle.
#[derive(Debug, Clone)]
pub enum RouteData {
    Value(Value),
    Deferred(DeferredEnvelope),
}

impl RouteData {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            RouteData::Value(value) => Some(value),
            RouteData::Deferred(_) => None,
        }
    }

    pub fn as_deferred(&self) -> Option<&DeferredEnvelope> {
        match self {
            RouteData::Deferred(envelope) => Some(envelope),
            RouteData::Value(_) => None,
        }
    }
}

/// The live navigation snapshot. Exactly one instance is authoritative at a
/// time; the Navigator is its sole mutator and consumers read it through
/// subscriptions or [`crate::navigator::Navigator::snapshot`].
#[derive(Debug, Clone)]
pub struct NavigationState {
    pub phase: NavPhase,
    /// Loaders re-running after a mutation, without a phase transition.
    pub revalidating: bool,
    /// The committed location; only advances when a navigation fully settles.
    pub location: Location,
    pub pending_location: Option<Location>,
    pub pending_form: Option<FormPayload>,
    /// Result of the most recent successful action, readable by the caller
    /// that triggered it and by revalidated loaders' consumers.
    pub action_result: Option<Value>,
    /// Per-segment loader data, keyed by segment id.
    pub loader_data: HashMap<String, RouteData>,
    /// Errors attached to their resolved boundaries.
    pub errors: HashMap<Boundary, EngineError>,
}

impl NavigationState {
    pub(crate) fn initial(location: Location) -> Self {
        Self {
            phase: NavPhase::Idle,
            revalidating: false,
            location,
            pending_location: None,
            pending_form: None,
            action_result: None,
            loader_data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn data(&self, segment: &str) -> Option<&RouteData> {
        self.loader_data.get(segment)
    }

    pub fn error_at(&self, boundary: &Boundary) -> Option<&EngineError> {
        self.errors.get(boundary)
    }

    pub fn is_idle(&self) -> bool {
        self.phase == NavPhase::Idle && !self.revalidating
    }
}
