//! Transform memoization across builds.
//!
//! Entries are keyed by unit identity and validated by a digest of the raw
//! content plus the loader chain fingerprint, so a stale entry can never be
//! served even if explicit invalidation was missed.

use super::loader::Transformed;
use super::scan::{Dependency, Site};
use super::unit::UnitId;
use plinth_util::hash::PartsHasher;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use std::sync::Arc;

/// A transformed unit plus everything derived from its output.
#[derive(Debug, Clone)]
pub struct ProcessedUnit {
    pub output: Transformed,
    /// Dependencies in discovery order, duplicates included.
    pub dependencies: Vec<Dependency>,
    /// Rewritable import/export sites (scripts only).
    pub sites: Vec<Site>,
    pub exports: Vec<String>,
}

/// Digest validating a cache entry.
#[must_use]
pub fn cache_key(raw: &[u8], chain_fingerprint: &str) -> String {
    PartsHasher::new()
        .part(raw)
        .part(chain_fingerprint.as_bytes())
        .finish_hex()
}

#[derive(Debug, Clone)]
struct Entry {
    key: String,
    processed: Arc<ProcessedUnit>,
}

/// Persistent transform cache.
#[derive(Debug, Default)]
pub struct TransformCache {
    entries: HashMap<UnitId, Entry>,
}

impl TransformCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached result for `id` if its key still matches.
    #[must_use]
    pub fn get(&self, id: &UnitId, key: &str) -> Option<Arc<ProcessedUnit>> {
        self.entries
            .get(id)
            .filter(|e| e.key == key)
            .map(|e| Arc::clone(&e.processed))
    }

    pub fn insert(&mut self, id: UnitId, key: String, processed: Arc<ProcessedUnit>) {
        self.entries.insert(id, Entry { key, processed });
    }

    /// Drop entries for the given units.
    pub fn invalidate<'a>(&mut self, ids: impl IntoIterator<Item = &'a UnitId>) -> usize {
        ids.into_iter()
            .filter(|id| self.entries.remove(*id).is_some())
            .count()
    }

    /// Drop entries for units no longer in the graph.
    pub fn retain(&mut self, live: &HashSet<UnitId>) {
        self.entries.retain(|id, _| live.contains(id));
    }

    #[must_use]
    pub fn contains(&self, id: &UnitId) -> bool {
        self.entries.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
