//! Post-mutation loader refresh.
//!
//! After any action settles successfully (main navigation or fetcher), the
//! data behind the currently active loaders may be stale. Revalidation
//! re-runs those loaders under the current generation without treating the
//! run as a new navigation: the snapshot's phase stays put and only the
//! `revalidating` flag toggles. Loaders already pending from an in-flight
//! navigation are deduplicated, and a redirecting action skips revalidation
//! entirely — the redirect's own loader run supersedes it.

use crate::navigator::{spawn_revalidation, Navigator};

/// Decides when the active loaders must re-run and re-invokes them.
#[derive(Clone)]
pub struct RevalidationCoordinator {
    navigator: Navigator,
}

impl RevalidationCoordinator {
    pub fn new(navigator: Navigator) -> Self {
        Self { navigator }
    }

    /// Re-run the loaders for the currently committed matches. Safe to call
    /// at any time; a no-op when nothing matches the committed location.
    pub fn revalidate(&self) {
        spawn_revalidation(self.navigator.inner());
    }

    pub(crate) fn navigator(&self) -> &Navigator {
        &self.navigator
    }
}
