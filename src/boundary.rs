//! Error-boundary resolution along a matched route chain.

use crate::route::MatchedSegment;

/// Where an error is attached. Segments that declared boundary capability
/// absorb errors from themselves and their descendants; everything else
/// falls through to the implicit root boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Boundary {
    /// Implicit root-level fallback; always present.
    Root,
    /// An explicit boundary declared by a route segment.
    Segment(String),
}

/// Walks a match chain to find the boundary responsible for an error.
pub struct ErrorResolver;

impl ErrorResolver {
    /// Nearest boundary at or above `origin` (an index into `matches`,
    /// outermost first, inclusive of the origin itself).
    pub fn resolve(matches: &[MatchedSegment], origin: usize) -> Boundary {
        if matches.is_empty() {
            return Boundary::Root;
        }
        let end = origin.min(matches.len() - 1);
        matches[..=end]
            .iter()
            .rev()
            .find(|m| m.segment.has_boundary())
            .map(|m| Boundary::Segment(m.segment.id().to_string()))
            .unwrap_or(Boundary::Root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::RouteSegment;
    use std::sync::Arc;

    fn chain(specs: &[(&str, bool)]) -> Vec<MatchedSegment> {
        specs
            .iter()
            .map(|(id, boundary)| {
                let mut segment = RouteSegment::new(*id);
                if *boundary {
                    segment = segment.with_boundary();
                }
                MatchedSegment::new(Arc::new(segment))
            })
            .collect()
    }

    #[test]
    fn origin_with_boundary_absorbs_its_own_error() {
        let matches = chain(&[("root", true), ("leaf", true)]);
        assert_eq!(
            ErrorResolver::resolve(&matches, 1),
            Boundary::Segment("leaf".into())
        );
    }

    #[test]
    fn error_walks_up_to_nearest_ancestor_boundary() {
        let matches = chain(&[("root", true), ("section", false), ("leaf", false)]);
        assert_eq!(
            ErrorResolver::resolve(&matches, 2),
            Boundary::Segment("root".into())
        );
    }

    #[test]
    fn deeper_boundaries_do_not_catch_shallower_errors() {
        let matches = chain(&[("root", false), ("leaf", true)]);
        assert_eq!(ErrorResolver::resolve(&matches, 0), Boundary::Root);
    }

    #[test]
    fn no_boundary_anywhere_falls_back_to_root() {
        let matches = chain(&[("root", false), ("leaf", false)]);
        assert_eq!(ErrorResolver::resolve(&matches, 1), Boundary::Root);
    }

    #[test]
    fn empty_chain_resolves_to_root() {
        assert_eq!(ErrorResolver::resolve(&[], 0), Boundary::Root);
    }
}
