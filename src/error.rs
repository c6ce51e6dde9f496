//! Error types for the orchestration core.
//!
//! Every failure in the engine is recovered at a route boundary or attached
//! to a fetcher; nothing propagates past the engine. Errors are stored inside
//! state snapshots, so all variants are `Clone` and carry plain messages
//! rather than source chains.

use thiserror::Error;

/// Errors attributed to loaders, actions, deferred entries, or fetchers.
///
/// Stale-result discards are deliberately absent: a settlement from a
/// superseded generation is dropped silently (logged at debug level), it is
/// not a user-visible failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// A loader failed; routed to the nearest boundary for its segment.
    /// Sibling loaders keep running.
    #[error("Loader failed for segment '{segment}': {message}")]
    Load { segment: String, message: String },

    /// An action failed; the loader phase for that navigation is skipped
    /// entirely ("don't load the next page on a failed mutation").
    #[error("Action failed for segment '{segment}': {message}")]
    Action { segment: String, message: String },

    /// One lazy deferred value rejected. Isolated to that entry; the owning
    /// envelope and sibling entries are unaffected.
    #[error("Deferred entry '{entry}' rejected: {message}")]
    DeferredEntry { entry: String, message: String },

    /// A fetcher's loader or action failed. Attached to the fetcher itself,
    /// never to the navigation state.
    #[error("Fetcher '{id}' failed: {message}")]
    Fetcher { id: String, message: String },

    /// A submit intent targeted a match chain with no action anywhere.
    #[error("No action is defined on any matched segment for '{path}'")]
    NoAction { path: String },

    /// A fetcher load targeted a match chain with no loader anywhere.
    #[error("No loader is defined on any matched segment for '{path}'")]
    NoLoader { path: String },

    /// Nothing matched the target location.
    #[error("No routes matched '{path}'")]
    NoMatch { path: String },
}
