//! Snapshot-private cache of materialized elements.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::domain::error::PublishedError;
use crate::published::element::PublishedElement;

use super::keys::SnapshotElementKey;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::snapshot_cache";

/// Elements materialized by one snapshot, so repeated lookups return the same
/// instance (and its Element-level property caches). Cleared on dispose.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    elements: RwLock<HashMap<SnapshotElementKey, Arc<PublishedElement>>>,
    closed: AtomicBool,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &SnapshotElementKey) -> Option<Arc<PublishedElement>> {
        rw_read(&self.elements, SOURCE, "get").get(key).cloned()
    }

    /// Returns the memoized element or builds one. The first builder to finish wins.
    ///
    /// Nothing is memoized once the cache has been closed.
    pub fn get_or_try_insert_with<F>(
        &self,
        key: SnapshotElementKey,
        build: F,
    ) -> Result<Arc<PublishedElement>, PublishedError>
    where
        F: FnOnce() -> Result<PublishedElement, PublishedError>,
    {
        if let Some(existing) = self.get(&key) {
            return Ok(existing);
        }
        let element = Arc::new(build()?);
        if self.closed.load(Ordering::Acquire) {
            return Ok(element);
        }
        let mut elements = rw_write(&self.elements, SOURCE, "insert");
        Ok(Arc::clone(elements.entry(key).or_insert(element)))
    }

    pub fn len(&self) -> usize {
        rw_read(&self.elements, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every memoized element and stops memoizing new ones.
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let mut elements = rw_write(&self.elements, SOURCE, "close");
        let removed = elements.len();
        elements.clear();
        removed
    }
}
