//! Site mapping persistence: the store trait and an in-memory implementation.
//!
//! Mappings are unique per `(domain, path_pattern)`. Re-teaching an existing
//! pair replaces its selectors wholesale and resets its votes to the seed; the
//! previous selectors are not merged in.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::scoring::{rank_mappings, wilson_lower_bound, SEED_CONFIDENCE, SEED_UPVOTES};
use crate::types::{
    PluckError, PluckResult, SelectorValue, Selectors, SiteMapping, UpsertOutcome, VoteDirection,
};
use crate::url_gate::validate_bare_domain;

/// Path pattern used when a submission does not name one.
pub const DEFAULT_PATH_PATTERN: &str = "*";

/// Storage for crowd-taught mappings. Implementations must tolerate
/// concurrent callers.
pub trait MappingStore: Send + Sync {
    /// All mappings for a normalized domain, best first.
    fn lookup(&self, domain: &str) -> PluckResult<Vec<SiteMapping>>;

    /// Create the mapping for `(domain, path_pattern)` or replace the
    /// selectors of the existing one.
    fn upsert(
        &self,
        domain: &str,
        path_pattern: &str,
        selectors: Selectors,
        created_by: &str,
    ) -> PluckResult<(SiteMapping, UpsertOutcome)>;

    /// Record a vote and recompute confidence.
    fn vote(&self, id: Uuid, direction: VoteDirection) -> PluckResult<SiteMapping>;

    fn get(&self, id: Uuid) -> PluckResult<Option<SiteMapping>>;
}

/// Reject empty selector maps, empty strings and empty lists.
pub fn validate_selectors(selectors: &Selectors) -> PluckResult<()> {
    if selectors.is_empty() {
        return Err(PluckError::InvalidSelectors("no selectors given".into()));
    }
    for (field, value) in selectors {
        let ok = match value {
            SelectorValue::Single(s) => !s.trim().is_empty(),
            SelectorValue::Multiple(list) => {
                !list.is_empty() && list.iter().all(|s| !s.trim().is_empty())
            }
        };
        if !ok {
            return Err(PluckError::InvalidSelectors(format!(
                "selector for '{field}' must be a non-empty string or array of strings"
            )));
        }
    }
    Ok(())
}

/// Normalize and validate the inputs shared by every `upsert` implementation.
pub fn prepare_upsert(
    domain: &str,
    path_pattern: &str,
    selectors: &Selectors,
) -> PluckResult<(String, String)> {
    let domain = validate_bare_domain(domain)?;
    validate_selectors(selectors)?;
    let pattern = match path_pattern.trim() {
        "" => DEFAULT_PATH_PATTERN.to_string(),
        p => p.to_string(),
    };
    Ok((domain, pattern))
}

/// A freshly taught mapping at seed confidence.
pub fn seed_mapping(
    domain: String,
    path_pattern: String,
    selectors: Selectors,
    created_by: &str,
    now: DateTime<Utc>,
) -> SiteMapping {
    SiteMapping {
        id: Uuid::new_v4(),
        domain,
        path_pattern,
        selectors,
        confidence: SEED_CONFIDENCE,
        upvotes: SEED_UPVOTES,
        downvotes: 0,
        created_by: created_by.to_string(),
        created_at: now,
        last_verified_at: now,
    }
}

/// Replace selectors on an existing mapping and reset it to the seed.
pub fn reseed(
    mapping: &mut SiteMapping,
    selectors: Selectors,
    created_by: &str,
    now: DateTime<Utc>,
) {
    mapping.selectors = selectors;
    mapping.confidence = SEED_CONFIDENCE;
    mapping.upvotes = SEED_UPVOTES;
    mapping.downvotes = 0;
    mapping.created_by = created_by.to_string();
    mapping.last_verified_at = now;
}

/// Apply one vote. An upvote also counts as a fresh verification.
pub fn apply_vote(mapping: &mut SiteMapping, direction: VoteDirection, now: DateTime<Utc>) {
    match direction {
        VoteDirection::Up => {
            mapping.upvotes = mapping.upvotes.saturating_add(1);
            mapping.last_verified_at = now;
        }
        VoteDirection::Down => mapping.downvotes = mapping.downvotes.saturating_add(1),
    }
    mapping.confidence = wilson_lower_bound(mapping.upvotes, mapping.downvotes);
}

/// Process-local store backed by sharded concurrent maps.
#[derive(Debug, Default)]
pub struct MemoryMappingStore {
    mappings: DashMap<Uuid, SiteMapping>,
    index: DashMap<(String, String), Uuid>,
}

impl MemoryMappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

impl MappingStore for MemoryMappingStore {
    fn lookup(&self, domain: &str) -> PluckResult<Vec<SiteMapping>> {
        let domain = crate::url_gate::normalize_domain(domain);
        let mut found: Vec<SiteMapping> = self
            .mappings
            .iter()
            .filter(|m| m.domain == domain)
            .map(|m| m.value().clone())
            .collect();
        rank_mappings(&mut found);
        Ok(found)
    }

    fn upsert(
        &self,
        domain: &str,
        path_pattern: &str,
        selectors: Selectors,
        created_by: &str,
    ) -> PluckResult<(SiteMapping, UpsertOutcome)> {
        let (domain, pattern) = prepare_upsert(domain, path_pattern, &selectors)?;
        let now = Utc::now();

        // The index entry stays locked until the mapping is written, so two
        // concurrent writers of the same key serialize here.
        match self.index.entry((domain.clone(), pattern.clone())) {
            Entry::Occupied(slot) => {
                let id = *slot.get();
                let mut existing = self
                    .mappings
                    .get_mut(&id)
                    .ok_or(PluckError::MappingNotFound(id))?;
                reseed(&mut existing, selectors, created_by, now);
                tracing::info!(%id, domain = %domain, pattern = %pattern, "mapping replaced");
                Ok((existing.clone(), UpsertOutcome::Updated))
            }
            Entry::Vacant(slot) => {
                let mapping = seed_mapping(domain, pattern, selectors, created_by, now);
                slot.insert(mapping.id);
                self.mappings.insert(mapping.id, mapping.clone());
                tracing::info!(id = %mapping.id, domain = %mapping.domain, "mapping created");
                Ok((mapping, UpsertOutcome::Created))
            }
        }
    }

    fn vote(&self, id: Uuid, direction: VoteDirection) -> PluckResult<SiteMapping> {
        let mut mapping = self
            .mappings
            .get_mut(&id)
            .ok_or(PluckError::MappingNotFound(id))?;
        apply_vote(&mut mapping, direction, Utc::now());
        Ok(mapping.clone())
    }

    fn get(&self, id: Uuid) -> PluckResult<Option<SiteMapping>> {
        Ok(self.mappings.get(&id).map(|m| m.value().clone()))
    }
}
