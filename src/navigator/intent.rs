//! Navigation intents.

use crate::route::{FormPayload, Location};

/// Whether the intent requires a mutation before loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentKind {
    Load,
    Submit,
}

/// One user- or engine-initiated navigation. Immutable; consumed once by
/// the Navigator.
#[derive(Debug, Clone)]
pub struct NavigationIntent {
    pub location: Location,
    pub payload: Option<FormPayload>,
    pub kind: IntentKind,
}

impl NavigationIntent {
    /// Plain navigation: run loaders for the matched chain.
    pub fn load(location: Location) -> Self {
        Self {
            location,
            payload: None,
            kind: IntentKind::Load,
        }
    }

    /// Submission: run the deepest matched action first, then loaders.
    pub fn submit(location: Location, payload: FormPayload) -> Self {
        Self {
            location,
            payload: Some(payload),
            kind: IntentKind::Submit,
        }
    }
}
