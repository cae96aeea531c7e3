//! Point-in-time snapshots handed to readers.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::debug;

use crate::cache::content_types::ContentTypeCache;
use crate::cache::domains::DomainCache;
use crate::cache::elements::ElementsScope;
use crate::cache::lock::mutex_lock;
use crate::cache::snapshot_cache::SnapshotCache;
use crate::domain::types::{ItemKind, VariationContext};

use super::cache::PublishedCache;
use super::store::ContentStores;

const SOURCE: &str = "published::snapshot";

pub(crate) struct SnapshotInner {
    id: u64,
    previewing: AtomicBool,
    disposed: AtomicBool,
    variation: VariationContext,
    stores: Arc<ContentStores>,
    content_types: Arc<ContentTypeCache>,
    domains: Arc<DomainCache>,
    elements: Arc<ElementsScope>,
    snapshot_cache: SnapshotCache,
    registry: Weak<LiveSnapshots>,
}

/// Shared collaborators a snapshot is built over.
pub(crate) struct SnapshotParts {
    pub previewing: bool,
    pub variation: VariationContext,
    pub stores: Arc<ContentStores>,
    pub content_types: Arc<ContentTypeCache>,
    pub domains: Arc<DomainCache>,
    pub elements: Arc<ElementsScope>,
}

/// A consistent view over content, media, members and domains for one request.
///
/// Cloning is cheap and yields a handle to the same snapshot. Disposing tears
/// down only the snapshot's private cache; the Elements-level scope it holds
/// keeps serving every other snapshot of the same generation.
#[derive(Clone)]
pub struct PublishedSnapshot {
    inner: Arc<SnapshotInner>,
}

/// Non-owning handle elements keep to the snapshot they were drawn from.
#[derive(Clone)]
pub struct SnapshotAccessor(Weak<SnapshotInner>);

impl SnapshotAccessor {
    pub fn upgrade(&self) -> Option<PublishedSnapshot> {
        self.0.upgrade().map(|inner| PublishedSnapshot { inner })
    }
}

impl fmt::Debug for SnapshotAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.upgrade() {
            Some(inner) => write!(f, "SnapshotAccessor({})", inner.id),
            None => f.write_str("SnapshotAccessor(<dropped>)"),
        }
    }
}

impl PublishedSnapshot {
    pub(crate) fn new(parts: SnapshotParts, registry: &Arc<LiveSnapshots>) -> Self {
        let inner = Arc::new(SnapshotInner {
            id: registry.next_id(),
            previewing: AtomicBool::new(parts.previewing),
            disposed: AtomicBool::new(false),
            variation: parts.variation,
            stores: parts.stores,
            content_types: parts.content_types,
            domains: parts.domains,
            elements: parts.elements,
            snapshot_cache: SnapshotCache::new(),
            registry: Arc::downgrade(registry),
        });
        registry.register(&inner);
        debug!(
            target_module = SOURCE,
            snapshot_id = inner.id,
            previewing = parts.previewing,
            "Snapshot created"
        );
        Self { inner }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn previewing(&self) -> bool {
        self.inner.previewing.load(Ordering::Acquire)
    }

    pub fn variation(&self) -> &VariationContext {
        &self.inner.variation
    }

    pub fn accessor(&self) -> SnapshotAccessor {
        SnapshotAccessor(Arc::downgrade(&self.inner))
    }

    pub fn content(&self) -> PublishedCache<'_> {
        PublishedCache::new(self, ItemKind::Document)
    }

    pub fn media(&self) -> PublishedCache<'_> {
        PublishedCache::new(self, ItemKind::Media)
    }

    pub fn members(&self) -> PublishedCache<'_> {
        PublishedCache::new(self, ItemKind::Member)
    }

    pub fn domains(&self) -> &DomainCache {
        &self.inner.domains
    }

    pub fn content_types(&self) -> &ContentTypeCache {
        &self.inner.content_types
    }

    /// Shared values of the generation this snapshot was created in.
    pub fn elements_scope(&self) -> &Arc<ElementsScope> {
        &self.inner.elements
    }

    pub(crate) fn stores(&self) -> &ContentStores {
        &self.inner.stores
    }

    pub(crate) fn snapshot_cache(&self) -> &SnapshotCache {
        &self.inner.snapshot_cache
    }

    /// Reads use `preview` until the returned guard is dropped.
    pub fn force_preview(&self, preview: bool) -> ForcedPreview<'_> {
        let previous = self.inner.previewing.swap(preview, Ordering::AcqRel);
        debug!(
            target_module = SOURCE,
            snapshot_id = self.inner.id,
            preview,
            previous,
            "Preview forced"
        );
        ForcedPreview {
            snapshot: self,
            previous,
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Clears the snapshot-level cache and unregisters the snapshot. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let released = self.inner.snapshot_cache.close();
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.unregister(self.inner.id);
        }
        debug!(
            target_module = SOURCE,
            snapshot_id = self.inner.id,
            released,
            "Snapshot disposed"
        );
    }
}

impl fmt::Debug for PublishedSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishedSnapshot")
            .field("id", &self.inner.id)
            .field("previewing", &self.previewing())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

/// Restores the previous preview flag when dropped.
#[must_use = "the forced preview ends when the guard is dropped"]
pub struct ForcedPreview<'a> {
    snapshot: &'a PublishedSnapshot,
    previous: bool,
}

impl Drop for ForcedPreview<'_> {
    fn drop(&mut self) {
        self.snapshot
            .inner
            .previewing
            .store(self.previous, Ordering::Release);
    }
}

/// Registry of snapshots that have not been disposed, pruned by collection.
#[derive(Default)]
pub(crate) struct LiveSnapshots {
    entries: Mutex<Vec<(u64, Weak<SnapshotInner>)>>,
    next_id: AtomicU64,
}

impl LiveSnapshots {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn register(&self, inner: &Arc<SnapshotInner>) {
        mutex_lock(&self.entries, SOURCE, "register").push((inner.id, Arc::downgrade(inner)));
    }

    fn unregister(&self, id: u64) {
        mutex_lock(&self.entries, SOURCE, "unregister").retain(|(entry, _)| *entry != id);
    }

    /// Forgets snapshots whose last handle was dropped without `dispose`.
    pub(crate) fn prune(&self) -> usize {
        let mut entries = mutex_lock(&self.entries, SOURCE, "prune");
        let before = entries.len();
        entries.retain(|(_, weak)| weak.strong_count() > 0);
        before - entries.len()
    }

    pub(crate) fn live(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "live")
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .count()
    }
}
