//! Elements-level cache: property values shared by every snapshot of one
//! content generation.
//!
//! Values live in an [`ElementsScope`], a map of write-once cells keyed by
//! [`ElementsCacheKey`]. A snapshot holds the scope that was current when it was
//! created. Invalidations never touch a published scope: they install a new
//! one that carries over every unaffected slot, so an element materialized
//! before a change can only refill the scope its own snapshot reads from.
//! Collection does compact the current scope in place.
//!
//! The map shard lock is only held while fetching or inserting a slot; the
//! conversion itself runs inside the slot's `OnceCell`, so concurrent first
//! reads converge on one computed value and a conversion may read other shared
//! properties without deadlocking on the map.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use metrics::counter;
use once_cell::sync::OnceCell;
use tracing::debug;
use uuid::Uuid;

use crate::domain::error::PublishedError;
use crate::domain::types::ItemKind;
use crate::published::value::ObjectValue;

use super::cancel::CancellationFlag;
use super::keys::{ElementsCacheKey, ValueSlot};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::elements";
const METRIC_HIT: &str = "pubcache_elements_hit_total";
const METRIC_MISS: &str = "pubcache_elements_miss_total";
const METRIC_EVICT: &str = "pubcache_elements_evict_total";

/// Where a cached value came from, kept for targeted eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotOrigin {
    pub kind: ItemKind,
    pub data_type_id: i32,
}

#[derive(Debug)]
pub struct ElementsSlot {
    origin: SlotOrigin,
    generation: u64,
    object: OnceCell<ObjectValue>,
    delivery: OnceCell<ObjectValue>,
    delivery_expanded: OnceCell<ObjectValue>,
}

impl ElementsSlot {
    fn new(origin: SlotOrigin, generation: u64) -> Self {
        Self {
            origin,
            generation,
            object: OnceCell::new(),
            delivery: OnceCell::new(),
            delivery_expanded: OnceCell::new(),
        }
    }

    fn cell(&self, slot: ValueSlot) -> &OnceCell<ObjectValue> {
        match slot {
            ValueSlot::Object => &self.object,
            ValueSlot::Delivery => &self.delivery,
            ValueSlot::DeliveryExpanded => &self.delivery_expanded,
        }
    }

    pub fn origin(&self) -> SlotOrigin {
        self.origin
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_empty(&self) -> bool {
        self.object.get().is_none()
            && self.delivery.get().is_none()
            && self.delivery_expanded.get().is_none()
    }
}

/// Shared values visible to the snapshots of one generation.
#[derive(Debug)]
pub struct ElementsScope {
    entries: DashMap<ElementsCacheKey, Arc<ElementsSlot>>,
    generation: Arc<AtomicU64>,
}

impl ElementsScope {
    fn new(generation: Arc<AtomicU64>) -> Self {
        Self {
            entries: DashMap::new(),
            generation,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &ElementsCacheKey, slot: ValueSlot) -> Option<ObjectValue> {
        self.entries
            .get(key)
            .and_then(|entry| entry.cell(slot).get().cloned())
    }

    /// Returns the cached value, computing it with `init` on first access.
    ///
    /// A failing `init` leaves the cell empty, so the next reader retries.
    pub fn get_or_try_init<F>(
        &self,
        key: ElementsCacheKey,
        origin: SlotOrigin,
        slot: ValueSlot,
        init: F,
    ) -> Result<ObjectValue, PublishedError>
    where
        F: FnOnce() -> Result<ObjectValue, PublishedError>,
    {
        let entry = self.slot(key, origin);
        let cell = entry.cell(slot);
        if let Some(value) = cell.get() {
            counter!(METRIC_HIT, "slot" => slot.as_str()).increment(1);
            return Ok(Arc::clone(value));
        }
        counter!(METRIC_MISS, "slot" => slot.as_str()).increment(1);
        cell.get_or_try_init(init).map(Arc::clone)
    }

    fn slot(&self, key: ElementsCacheKey, origin: SlotOrigin) -> Arc<ElementsSlot> {
        if let Some(existing) = self.entries.get(&key) {
            return Arc::clone(existing.value());
        }
        let generation = self.generation.load(Ordering::Acquire);
        let entry = self
            .entries
            .entry(key)
            .or_insert_with(|| Arc::new(ElementsSlot::new(origin, generation)));
        Arc::clone(entry.value())
    }

    /// Copy of this scope without the slots `evict` selects.
    fn successor<P>(&self, evict: P) -> (Self, usize)
    where
        P: Fn(&ElementsCacheKey, &ElementsSlot) -> bool,
    {
        let next = Self::new(Arc::clone(&self.generation));
        let mut removed = 0usize;
        for entry in self.entries.iter() {
            if evict(entry.key(), entry.value()) {
                removed += 1;
            } else {
                next.entries
                    .insert(entry.key().clone(), Arc::clone(entry.value()));
            }
        }
        (next, removed)
    }
}

/// The current [`ElementsScope`] plus the generation counter slots are stamped with.
#[derive(Debug)]
pub struct ElementsCache {
    current: RwLock<Arc<ElementsScope>>,
    generation: Arc<AtomicU64>,
}

impl Default for ElementsCache {
    fn default() -> Self {
        let generation = Arc::new(AtomicU64::new(0));
        Self {
            current: RwLock::new(Arc::new(ElementsScope::new(Arc::clone(&generation)))),
            generation,
        }
    }
}

impl ElementsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope new snapshots read and fill.
    pub fn scope(&self) -> Arc<ElementsScope> {
        Arc::clone(&rw_read(&self.current, SOURCE, "scope"))
    }

    pub fn len(&self) -> usize {
        self.scope().len()
    }

    pub fn is_empty(&self) -> bool {
        self.scope().is_empty()
    }

    /// Content generation new slots are stamped with.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn advance_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn get(&self, key: &ElementsCacheKey, slot: ValueSlot) -> Option<ObjectValue> {
        self.scope().get(key, slot)
    }

    /// [`ElementsScope::get_or_try_init`] on the current scope.
    pub fn get_or_try_init<F>(
        &self,
        key: ElementsCacheKey,
        origin: SlotOrigin,
        slot: ValueSlot,
        init: F,
    ) -> Result<ObjectValue, PublishedError>
    where
        F: FnOnce() -> Result<ObjectValue, PublishedError>,
    {
        self.scope().get_or_try_init(key, origin, slot, init)
    }

    /// Evicts every variant of every property of the given elements.
    pub fn evict_elements(&self, keys: &HashSet<Uuid>) -> usize {
        if keys.is_empty() {
            return 0;
        }
        self.evict_where("element_keys", |key, _| keys.contains(&key.element_key))
    }

    /// Evicts values produced by properties using any of the given data types.
    pub fn evict_data_types(&self, data_type_ids: &HashSet<i32>) -> usize {
        if data_type_ids.is_empty() {
            return 0;
        }
        self.evict_where("data_types", |_, slot| {
            data_type_ids.contains(&slot.origin.data_type_id)
        })
    }

    /// Evicts the whole scope of one item kind.
    ///
    /// Nested elements are owned by items of any kind, so they go too.
    pub fn evict_kind(&self, kind: ItemKind) -> usize {
        self.evict_where(kind.as_str(), |_, slot| {
            slot.origin.kind == kind || slot.origin.kind == ItemKind::Element
        })
    }

    pub fn clear(&self) -> usize {
        self.evict_where("all", |_, _| true)
    }

    /// Installs a successor scope without the selected slots.
    ///
    /// The successor is installed even when nothing matched: elements
    /// materialized before the change may still fill the previous scope, which
    /// is left as is for the snapshots holding it.
    fn evict_where<P>(&self, reason: &'static str, predicate: P) -> usize
    where
        P: Fn(&ElementsCacheKey, &ElementsSlot) -> bool,
    {
        let mut current = rw_write(&self.current, SOURCE, "evict");
        let (next, removed) = current.successor(predicate);
        let remaining = next.len();
        *current = Arc::new(next);
        drop(current);
        if removed > 0 {
            counter!(METRIC_EVICT, "reason" => reason).increment(removed as u64);
        }
        debug!(
            target_module = SOURCE,
            reason,
            removed,
            remaining,
            "Evicted elements cache entries"
        );
        removed
    }

    /// Removes slots left behind by earlier generations from the current scope.
    ///
    /// A slot is collectable once the generation has moved past it and it is
    /// either still empty (an abandoned or failed first read) or belongs to an
    /// element `is_live` no longer knows about. Work is done in batches and the
    /// cancellation flag is checked between them.
    pub fn compact<F>(
        &self,
        is_live: F,
        batch_size: usize,
        cancel: &CancellationFlag,
    ) -> Result<usize, PublishedError>
    where
        F: Fn(&Uuid) -> bool,
    {
        let current = self.generation();
        let scope = self.scope();
        let candidates: Vec<(ElementsCacheKey, Arc<ElementsSlot>)> = scope
            .entries
            .iter()
            .filter(|entry| {
                let slot = entry.value();
                slot.generation < current
                    && (slot.is_empty() || !is_live(&entry.key().element_key))
            })
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut removed = 0usize;
        for batch in candidates.chunks(batch_size.max(1)) {
            cancel.check("collect")?;
            for (key, slot) in batch {
                if scope
                    .entries
                    .remove_if(key, |_, existing| Arc::ptr_eq(existing, slot))
                    .is_some()
                {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            counter!(METRIC_EVICT, "reason" => "collect").increment(removed as u64);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use crate::domain::types::VariantKey;
    use crate::published::value::PublishedValue;

    use super::*;

    fn key(element: Uuid, alias: &str) -> ElementsCacheKey {
        ElementsCacheKey::new(false, element, alias, &VariantKey::invariant())
    }

    fn origin(kind: ItemKind, data_type_id: i32) -> SlotOrigin {
        SlotOrigin { kind, data_type_id }
    }

    fn text(value: &str) -> Result<ObjectValue, PublishedError> {
        Ok(Arc::new(PublishedValue::from(value)))
    }

    #[test]
    fn second_read_returns_first_value() {
        let cache = ElementsCache::new();
        let element = Uuid::new_v4();
        let first = cache
            .get_or_try_init(key(element, "title"), origin(ItemKind::Document, 1), ValueSlot::Object, || text("a"))
            .expect("first");
        let second = cache
            .get_or_try_init(key(element, "title"), origin(ItemKind::Document, 1), ValueSlot::Object, || text("b"))
            .expect("second");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn failures_are_not_cached() {
        let cache = ElementsCache::new();
        let element = Uuid::new_v4();
        let err = cache.get_or_try_init(
            key(element, "title"),
            origin(ItemKind::Document, 1),
            ValueSlot::Object,
            || Err(PublishedError::conversion("title", "boom")),
        );
        assert!(err.is_err());
        let value = cache
            .get_or_try_init(key(element, "title"), origin(ItemKind::Document, 1), ValueSlot::Object, || text("ok"))
            .expect("retry");
        assert_eq!(value.as_text(), Some("ok"));
    }

    #[test]
    fn delivery_slots_are_independent() {
        let cache = ElementsCache::new();
        let element = Uuid::new_v4();
        let calls = AtomicUsize::new(0);
        for slot in [ValueSlot::Object, ValueSlot::Delivery, ValueSlot::DeliveryExpanded] {
            cache
                .get_or_try_init(key(element, "pick"), origin(ItemKind::Document, 1), slot, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    text(slot.as_str())
                })
                .expect("init");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache
                .get(&key(element, "pick"), ValueSlot::DeliveryExpanded)
                .and_then(|value| value.as_text().map(str::to_owned)),
            Some("delivery_expanded".to_string())
        );
    }

    #[test]
    fn targeted_eviction() {
        let cache = ElementsCache::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        cache
            .get_or_try_init(key(first, "title"), origin(ItemKind::Document, 1), ValueSlot::Object, || text("a"))
            .expect("init");
        cache
            .get_or_try_init(key(first, "count"), origin(ItemKind::Document, 42), ValueSlot::Object, || text("b"))
            .expect("init");
        cache
            .get_or_try_init(key(second, "title"), origin(ItemKind::Media, 1), ValueSlot::Object, || text("c"))
            .expect("init");

        assert_eq!(cache.evict_data_types(&HashSet::from([42])), 1);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.evict_kind(ItemKind::Media), 1);
        assert_eq!(cache.evict_elements(&HashSet::from([first])), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.clear(), 0);
    }

    #[test]
    fn eviction_leaves_held_scopes_alone_and_carries_unaffected_slots() {
        let cache = ElementsCache::new();
        let edited = Uuid::new_v4();
        let other = Uuid::new_v4();
        let kept = cache
            .get_or_try_init(key(other, "title"), origin(ItemKind::Document, 1), ValueSlot::Object, || text("other"))
            .expect("init");
        let held = cache.scope();
        held.get_or_try_init(key(edited, "title"), origin(ItemKind::Document, 1), ValueSlot::Object, || text("old"))
            .expect("init");
        assert_eq!(cache.evict_elements(&HashSet::from([edited])), 1);
        assert!(!Arc::ptr_eq(&held, &cache.scope()));

        // a late read through the held scope must not leak into the current one
        held.get_or_try_init(key(edited, "body"), origin(ItemKind::Document, 1), ValueSlot::Object, || text("old"))
            .expect("refill");
        assert_eq!(held.len(), 3);
        assert!(cache.get(&key(edited, "title"), ValueSlot::Object).is_none());
        assert!(cache.get(&key(edited, "body"), ValueSlot::Object).is_none());

        let carried = cache.get(&key(other, "title"), ValueSlot::Object).expect("carried");
        assert!(Arc::ptr_eq(&kept, &carried));
        let fresh = cache
            .get_or_try_init(key(edited, "title"), origin(ItemKind::Document, 1), ValueSlot::Object, || text("new"))
            .expect("init");
        assert_eq!(fresh.as_text(), Some("new"));
    }

    #[test]
    fn eviction_of_uncached_elements_still_retires_the_scope() {
        let cache = ElementsCache::new();
        let edited = Uuid::new_v4();
        let held = cache.scope();

        assert_eq!(cache.evict_elements(&HashSet::from([edited])), 0);
        held.get_or_try_init(key(edited, "title"), origin(ItemKind::Document, 1), ValueSlot::Object, || text("old"))
            .expect("late fill");

        assert!(cache.is_empty());
        assert!(cache.get(&key(edited, "title"), ValueSlot::Object).is_none());
    }

    #[test]
    fn compaction_drops_stale_orphans_only() {
        let cache = ElementsCache::new();
        let live = Uuid::new_v4();
        let gone = Uuid::new_v4();
        for element in [live, gone] {
            cache
                .get_or_try_init(key(element, "title"), origin(ItemKind::Document, 1), ValueSlot::Object, || text("v"))
                .expect("init");
        }

        let flag = CancellationFlag::new();
        assert_eq!(cache.compact(|key| *key == live, 16, &flag).expect("compact"), 0);

        cache.advance_generation();
        assert_eq!(cache.compact(|key| *key == live, 16, &flag).expect("compact"), 1);
        assert!(cache.get(&key(live, "title"), ValueSlot::Object).is_some());
        assert!(cache.get(&key(gone, "title"), ValueSlot::Object).is_none());
    }

    #[test]
    fn compaction_honours_cancellation() {
        let cache = ElementsCache::new();
        cache
            .get_or_try_init(key(Uuid::new_v4(), "t"), origin(ItemKind::Document, 1), ValueSlot::Object, || text("v"))
            .expect("init");
        cache.advance_generation();

        let flag = CancellationFlag::new();
        flag.cancel();
        let err = cache.compact(|_| false, 1, &flag).expect_err("cancelled");
        assert!(matches!(err, PublishedError::Cancelled { .. }));
        assert_eq!(cache.len(), 1);
    }
}
