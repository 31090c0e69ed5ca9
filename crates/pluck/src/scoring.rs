//! Wilson lower-bound confidence for crowd-taught mappings.
//!
//! The score is deliberately pessimistic for small vote counts: a fresh
//! mapping with a single upvote ranks far below a mapping that has survived
//! many votes at the same ratio.

use std::cmp::Ordering;

use globset::Glob;

use crate::types::SiteMapping;

/// z for a 95% confidence interval.
pub const WILSON_Z: f64 = 1.96;

/// Confidence assigned to a newly taught (or re-taught) mapping.
pub const SEED_CONFIDENCE: f64 = 0.5;

/// Upvotes a newly taught mapping starts with (the author's own vote).
pub const SEED_UPVOTES: u32 = 1;

/// Wilson score interval lower bound for `up` successes out of `up + down`.
///
/// Returns 0.0 when there are no votes. Always within `[0, 1]`.
pub fn wilson_lower_bound(up: u32, down: u32) -> f64 {
    // With p = 0 the bound is exactly zero; skip the float noise.
    if up == 0 {
        return 0.0;
    }
    let n = f64::from(up) + f64::from(down);
    let p = f64::from(up) / n;
    let z2 = WILSON_Z * WILSON_Z;
    let centre = p + z2 / (2.0 * n);
    let margin = WILSON_Z * ((p * (1.0 - p) + z2 / (4.0 * n)) / n).sqrt();
    let score = (centre - margin) / (1.0 + z2 / n);
    score.clamp(0.0, 1.0)
}

/// Order two mappings best-first: confidence, then total votes, then the
/// most recently verified.
pub fn compare_mappings(a: &SiteMapping, b: &SiteMapping) -> Ordering {
    b.confidence
        .partial_cmp(&a.confidence)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.total_votes().cmp(&a.total_votes()))
        .then_with(|| b.last_verified_at.cmp(&a.last_verified_at))
}

/// Sort mappings best-first in place.
pub fn rank_mappings(mappings: &mut [SiteMapping]) {
    mappings.sort_by(compare_mappings);
}

/// Whether a mapping's glob path pattern covers `path`.
///
/// An invalid pattern matches nothing.
pub fn path_matches(pattern: &str, path: &str) -> bool {
    if pattern == "*" || pattern.is_empty() {
        return true;
    }
    match Glob::new(pattern) {
        Ok(glob) => glob.compile_matcher().is_match(path),
        Err(e) => {
            tracing::debug!(pattern, error = %e, "ignoring invalid path pattern");
            false
        }
    }
}

/// Pick the best-ranked mapping whose path pattern covers `path`.
pub fn best_mapping_for<'a>(mappings: &'a [SiteMapping], path: &str) -> Option<&'a SiteMapping> {
    mappings
        .iter()
        .filter(|m| path_matches(&m.path_pattern, path))
        .min_by(|a, b| compare_mappings(a, b))
}
