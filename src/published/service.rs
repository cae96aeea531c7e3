//! Snapshot service: snapshot factory and single entry point for change notifications.
//!
//! Applying a notification:
//! 1. Merge the payloads of the batch (see [`InvalidationPlan`])
//! 2. Update the node stores from the content repository
//! 3. Evict the affected Elements-level entries and advance the generation

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use metrics::histogram;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::application::convert::ConverterRegistry;
use crate::application::repos::{
    ContentRepository, ContentTypeRepository, DomainRepository, DurableCacheStore, RepoError,
};
use crate::cache::cancel::CancellationFlag;
use crate::cache::config::CacheConfig;
use crate::cache::content_types::ContentTypeCache;
use crate::cache::domains::DomainCache;
use crate::cache::elements::ElementsCache;
use crate::cache::events::{
    ContentChangePayload, ContentTypeChange, ContentTypeChangePayload, DataTypeChangePayload,
    DomainChange, DomainChangePayload, MediaChangePayload, NotificationPayload,
    NotificationQueue, TreeChange, TreeChangePayload,
};
use crate::cache::lock::mutex_lock;
use crate::cache::planner::{InvalidationPlan, PlannedChange};
use crate::domain::error::PublishedError;
use crate::domain::nodes::RawNode;
use crate::domain::types::{ItemKind, VariationContext};

use super::snapshot::{LiveSnapshots, PublishedSnapshot, SnapshotParts};
use super::store::{ContentChanges, ContentStore, ContentStores};

const SOURCE: &str = "published::service";
const METRIC_NOTIFY_MS: &str = "pubcache_notify_ms";
const METRIC_COLLECT_MS: &str = "pubcache_collect_ms";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Nothing loaded yet; the first snapshot loads the stores.
    NotBuilt,
    Ready,
    /// The durable side store is being regenerated. Readers keep being served.
    Rebuilding,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildSummary {
    pub content_types: usize,
    pub nodes: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectSummary {
    pub snapshots_pruned: usize,
    pub live_snapshots: usize,
    pub entries_removed: usize,
}

/// Snapshot lifecycle and change notification contract.
pub trait PublishedSnapshotService: Send + Sync {
    /// Creates a snapshot. A preview token yields a previewing snapshot.
    fn create_snapshot(
        &self,
        preview_token: Option<&str>,
    ) -> Result<PublishedSnapshot, PublishedError>;

    /// Regenerates the durable side store for the given type scopes.
    ///
    /// An empty slice means every type of that kind; `None` skips the kind.
    fn rebuild(
        &self,
        content_type_ids: Option<&[i32]>,
        media_type_ids: Option<&[i32]>,
        member_type_ids: Option<&[i32]>,
        cancel: &CancellationFlag,
    ) -> Result<RebuildSummary, PublishedError>;

    fn notify_content(&self, payloads: &[ContentChangePayload]) -> ContentChanges;

    /// Returns whether anything changed.
    fn notify_media(&self, payloads: &[MediaChangePayload]) -> bool;

    fn notify_content_types(&self, payloads: &[ContentTypeChangePayload]);

    fn notify_data_types(&self, payloads: &[DataTypeChangePayload]);

    fn notify_domains(&self, payloads: &[DomainChangePayload]);

    fn collect(&self, cancel: &CancellationFlag) -> Result<CollectSummary, PublishedError>;

    fn state(&self) -> ServiceState;
}

/// External collaborators of [`DefaultSnapshotService`].
#[derive(Clone)]
pub struct ServiceDeps {
    pub content: Arc<dyn ContentRepository>,
    pub content_types: Arc<dyn ContentTypeRepository>,
    pub domains: Arc<dyn DomainRepository>,
    pub side_store: Option<Arc<dyn DurableCacheStore>>,
    pub converters: ConverterRegistry,
}

pub struct DefaultSnapshotService {
    config: CacheConfig,
    content: Arc<dyn ContentRepository>,
    content_type_repo: Arc<dyn ContentTypeRepository>,
    domain_repo: Arc<dyn DomainRepository>,
    side_store: Option<Arc<dyn DurableCacheStore>>,
    stores: Arc<ContentStores>,
    content_types: Arc<ContentTypeCache>,
    domains: Arc<DomainCache>,
    elements: Arc<ElementsCache>,
    live: Arc<LiveSnapshots>,
    queue: NotificationQueue,
    built: AtomicBool,
    rebuilding: AtomicBool,
    build_lock: Mutex<()>,
    rebuild_lock: Mutex<()>,
}

/// Keys and change flags accumulated while applying tree payloads.
#[derive(Default)]
struct TreeOutcome {
    changes: ContentChanges,
    keys: HashSet<Uuid>,
}

impl TreeOutcome {
    fn record(&mut self, previous: Option<&RawNode>, current: Option<&RawNode>) {
        self.changes.merge(ContentChanges::between(previous, current));
        self.keys.extend(previous.map(|node| node.key));
        self.keys.extend(current.map(|node| node.key));
    }
}

impl DefaultSnapshotService {
    pub fn new(config: CacheConfig, deps: ServiceDeps) -> Self {
        let content_types = Arc::new(ContentTypeCache::new(
            Arc::clone(&deps.content_types),
            deps.converters,
        ));
        Self {
            config,
            content: deps.content,
            content_type_repo: deps.content_types,
            domain_repo: deps.domains,
            side_store: deps.side_store,
            stores: Arc::new(ContentStores::new()),
            content_types,
            domains: Arc::new(DomainCache::new()),
            elements: Arc::new(ElementsCache::new()),
            live: Arc::new(LiveSnapshots::default()),
            queue: NotificationQueue::new(),
            built: AtomicBool::new(false),
            rebuilding: AtomicBool::new(false),
            build_lock: Mutex::new(()),
            rebuild_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn content_type_cache(&self) -> &Arc<ContentTypeCache> {
        &self.content_types
    }

    pub fn domain_cache(&self) -> &Arc<DomainCache> {
        &self.domains
    }

    pub fn elements_cache(&self) -> &Arc<ElementsCache> {
        &self.elements
    }

    /// Inbox for a notification transport; applied by [`Self::process_notifications`].
    pub fn queue(&self) -> &NotificationQueue {
        &self.queue
    }

    pub fn live_snapshots(&self) -> usize {
        self.live.live()
    }

    /// Loads the node stores and domains on first use.
    pub fn ensure_built(&self) -> Result<(), PublishedError> {
        if self.built.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = mutex_lock(&self.build_lock, SOURCE, "ensure_built");
        if self.built.load(Ordering::Acquire) {
            return Ok(());
        }
        let started_at = Instant::now();
        for store in self.stores.iter() {
            let nodes = self.content.load_all(store.kind())?;
            store.load_all(nodes);
        }
        self.domains.replace_all(self.domain_repo.load_all()?);
        self.built.store(true, Ordering::Release);
        info!(
            target_module = SOURCE,
            documents = self.store(ItemKind::Document).map_or(0, ContentStore::len),
            media = self.store(ItemKind::Media).map_or(0, ContentStore::len),
            members = self.store(ItemKind::Member).map_or(0, ContentStore::len),
            domains = self.domains.len(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Published caches built"
        );
        Ok(())
    }

    /// Applies up to `notification_batch_limit` queued notifications.
    ///
    /// Adjacent notifications of the same shape are merged and applied as one
    /// batch. Returns how many notifications were consumed.
    #[instrument(skip(self))]
    pub fn process_notifications(&self) -> usize {
        let drained = self
            .queue
            .drain(self.config.notification_batch_limit().get());
        if drained.is_empty() {
            return 0;
        }
        let count = drained.len();
        let first_epoch = drained.first().map(|n| n.epoch);
        let last_epoch = drained.last().map(|n| n.epoch);

        let mut batches: Vec<NotificationPayload> = Vec::new();
        for notification in drained {
            let rejected = match batches.last_mut() {
                Some(last) => last.try_merge(notification.payload),
                None => Some(notification.payload),
            };
            if let Some(payload) = rejected {
                batches.push(payload);
            }
        }

        info!(
            target_module = SOURCE,
            notifications = count,
            batches = batches.len(),
            first_epoch,
            last_epoch,
            "Applying queued notifications"
        );
        for batch in &batches {
            self.apply(batch);
        }
        count
    }

    fn apply(&self, payload: &NotificationPayload) {
        match payload {
            NotificationPayload::Content(items) => {
                self.notify_content(items);
            }
            NotificationPayload::Media(items) => {
                self.notify_media(items);
            }
            NotificationPayload::ContentTypes(items) => self.notify_content_types(items),
            NotificationPayload::DataTypes(items) => self.notify_data_types(items),
            NotificationPayload::Domains(items) => self.notify_domains(items),
        }
    }

    fn store(&self, kind: ItemKind) -> Option<&ContentStore> {
        self.stores.get(kind)
    }

    fn is_built(&self) -> bool {
        self.built.load(Ordering::Acquire)
    }

    fn notify_tree(&self, kind: ItemKind, payloads: &[TreeChangePayload]) -> ContentChanges {
        let started_at = Instant::now();
        for payload in payloads {
            debug!(
                target_module = SOURCE,
                kind = %kind,
                node_id = payload.id,
                change_kind = payload.change.as_str(),
                "Tree notification received"
            );
        }
        let Some(store) = self.store(kind) else {
            return ContentChanges::default();
        };
        if !self.is_built() {
            debug!(
                target_module = SOURCE,
                kind = %kind,
                "Caches not built, notification ignored"
            );
            return ContentChanges::default();
        }

        let plan = InvalidationPlan::from_content_payloads(payloads);
        debug!(target_module = SOURCE, kind = %kind, plan = %plan, "Invalidation plan");

        let mut outcome = TreeOutcome::default();
        if plan.refresh_all {
            self.reload_store(store, &mut outcome);
            let evicted = self.elements.evict_kind(kind);
            debug!(target_module = SOURCE, kind = %kind, evicted, "Refreshed whole store");
        } else {
            for change in &plan.changes {
                self.apply_tree_change(store, change, &mut outcome);
            }
            if !outcome.keys.is_empty() {
                self.elements.evict_elements(&outcome.keys);
            }
        }

        if plan.refresh_all || outcome.changes.any() || !outcome.keys.is_empty() {
            self.elements.advance_generation();
        }
        histogram!(METRIC_NOTIFY_MS, "payload" => kind.as_str())
            .record(started_at.elapsed().as_secs_f64() * 1000.0);
        outcome.changes
    }

    fn reload_store(&self, store: &ContentStore, outcome: &mut TreeOutcome) {
        let kind = store.kind();
        let nodes = match self.content.load_all(kind) {
            Ok(nodes) => nodes,
            Err(err) => {
                warn!(
                    target_module = SOURCE,
                    kind = %kind,
                    error = %err,
                    "Reloading store failed, keeping current nodes"
                );
                return;
            }
        };
        let previous: HashMap<i32, Arc<RawNode>> =
            store.all().into_iter().map(|node| (node.id, node)).collect();
        for node in &nodes {
            outcome.record(previous.get(&node.id).map(Arc::as_ref), Some(node));
        }
        let current: HashSet<i32> = nodes.iter().map(|node| node.id).collect();
        for (id, node) in &previous {
            if !current.contains(id) {
                outcome.record(Some(node), None);
            }
        }
        store.load_all(nodes);
    }

    fn apply_tree_change(
        &self,
        store: &ContentStore,
        change: &PlannedChange,
        outcome: &mut TreeOutcome,
    ) {
        match change.change {
            TreeChange::Remove => self.remove_branch(store, change.id, outcome),
            TreeChange::RefreshNode => {
                self.refresh_node(store, change.id, outcome);
            }
            TreeChange::RefreshBranch => {
                if !self.refresh_node(store, change.id, outcome) {
                    return;
                }
                match &change.descendant_ids {
                    Some(ids) => {
                        for id in ids {
                            self.refresh_node(store, *id, outcome);
                        }
                    }
                    None => self.refresh_descendants(store, change.id, outcome),
                }
            }
            // merged away by the planner
            TreeChange::RefreshAll => {}
        }
    }

    /// Reloads one node. Returns false when the node no longer exists.
    fn refresh_node(&self, store: &ContentStore, id: i32, outcome: &mut TreeOutcome) -> bool {
        match self.content.load(store.kind(), id) {
            Ok(node) => {
                let previous = store.set(node.clone());
                outcome.record(previous.as_deref(), Some(&node));
                true
            }
            Err(RepoError::NotFound) => {
                self.remove_branch(store, id, outcome);
                false
            }
            Err(err) => {
                warn!(
                    target_module = SOURCE,
                    kind = %store.kind(),
                    node_id = id,
                    error = %err,
                    "Reloading node failed"
                );
                false
            }
        }
    }

    fn refresh_descendants(&self, store: &ContentStore, root: i32, outcome: &mut TreeOutcome) {
        let kind = store.kind();
        let mut fetched = Vec::new();
        let mut pending = vec![root];
        while let Some(parent) = pending.pop() {
            match self.content.load_children(kind, parent) {
                Ok(children) => {
                    pending.extend(children.iter().map(|child| child.id));
                    fetched.extend(children);
                }
                Err(err) => {
                    warn!(
                        target_module = SOURCE,
                        kind = %kind,
                        node_id = parent,
                        error = %err,
                        "Loading children failed, branch left as is"
                    );
                    return;
                }
            }
        }

        let fetched_ids: HashSet<i32> = fetched.iter().map(|node| node.id).collect();
        for id in store.descendants(root) {
            if !fetched_ids.contains(&id)
                && let Some(removed) = store.remove(id)
            {
                outcome.record(Some(&removed), None);
            }
        }
        for node in fetched {
            let previous = store.set(node.clone());
            outcome.record(previous.as_deref(), Some(&node));
        }
    }

    fn remove_branch(&self, store: &ContentStore, id: i32, outcome: &mut TreeOutcome) {
        let removed = store.remove_branch(id);
        if removed.is_empty() {
            log_stale(&PublishedError::stale(store.kind().as_str(), id));
            return;
        }
        for node in &removed {
            outcome.record(Some(node), None);
        }
    }

    /// Reloads the stored nodes of one content type. Returns the affected keys.
    fn reload_type_nodes(&self, kind: ItemKind, content_type_id: i32) -> HashSet<Uuid> {
        let mut outcome = TreeOutcome::default();
        let Some(store) = self.store(kind) else {
            return outcome.keys;
        };
        let fresh = match self.content.load_by_content_types(kind, &[content_type_id]) {
            Ok(nodes) => nodes,
            Err(err) => {
                warn!(
                    target_module = SOURCE,
                    kind = %kind,
                    content_type_id,
                    error = %err,
                    "Reloading nodes of content type failed"
                );
                return outcome.keys;
            }
        };
        let fresh_ids: HashSet<i32> = fresh.iter().map(|node| node.id).collect();
        for node in store.nodes_of_types(&HashSet::from([content_type_id])) {
            if !fresh_ids.contains(&node.id)
                && let Some(removed) = store.remove(node.id)
            {
                outcome.record(Some(&removed), None);
            }
        }
        for node in fresh {
            let previous = store.set(node.clone());
            outcome.record(previous.as_deref(), Some(&node));
        }
        outcome.keys
    }

    fn remove_type_nodes(&self, kind: ItemKind, content_type_id: i32) -> HashSet<Uuid> {
        let Some(store) = self.store(kind) else {
            return HashSet::new();
        };
        store
            .nodes_of_types(&HashSet::from([content_type_id]))
            .into_iter()
            .filter_map(|node| store.remove(node.id))
            .map(|node| node.key)
            .collect()
    }

    fn rebuild_kind(
        &self,
        side_store: &dyn DurableCacheStore,
        kind: ItemKind,
        type_ids: &[i32],
        cancel: &CancellationFlag,
        summary: &mut RebuildSummary,
    ) -> Result<(), PublishedError> {
        let ids: Vec<i32> = if type_ids.is_empty() {
            side_store.clear(kind)?;
            self.content_type_repo
                .list(kind)?
                .into_iter()
                .map(|definition| definition.id)
                .collect()
        } else {
            type_ids.to_vec()
        };

        for id in ids {
            cancel.check("rebuild")?;
            let nodes = self.content.load_by_content_types(kind, &[id])?;
            let written = side_store.replace(kind, id, &nodes)?;
            summary.content_types += 1;
            summary.nodes += written;
            debug!(
                target_module = SOURCE,
                kind = %kind,
                content_type_id = id,
                written,
                "Side store content type rebuilt"
            );
        }
        Ok(())
    }
}

impl PublishedSnapshotService for DefaultSnapshotService {
    fn create_snapshot(
        &self,
        preview_token: Option<&str>,
    ) -> Result<PublishedSnapshot, PublishedError> {
        self.ensure_built()?;
        let previewing = self.config.preview_enabled && preview_token.is_some();
        let parts = SnapshotParts {
            previewing,
            variation: VariationContext::new(self.config.default_culture.clone(), ""),
            stores: Arc::clone(&self.stores),
            content_types: Arc::clone(&self.content_types),
            domains: Arc::clone(&self.domains),
            elements: self.elements.scope(),
        };
        Ok(PublishedSnapshot::new(parts, &self.live))
    }

    #[instrument(skip(self, cancel))]
    fn rebuild(
        &self,
        content_type_ids: Option<&[i32]>,
        media_type_ids: Option<&[i32]>,
        member_type_ids: Option<&[i32]>,
        cancel: &CancellationFlag,
    ) -> Result<RebuildSummary, PublishedError> {
        let Some(side_store) = self.side_store.as_deref() else {
            return Err(PublishedError::configuration(
                "rebuild requires a durable side store",
            ));
        };
        let _guard = mutex_lock(&self.rebuild_lock, SOURCE, "rebuild");
        self.rebuilding.store(true, Ordering::Release);
        info!(target_module = SOURCE, "Side store rebuild starting");
        let started_at = Instant::now();

        let mut summary = RebuildSummary::default();
        let scopes = [
            (ItemKind::Document, content_type_ids),
            (ItemKind::Media, media_type_ids),
            (ItemKind::Member, member_type_ids),
        ];
        let mut result = Ok(());
        for (kind, ids) in scopes {
            let Some(ids) = ids else { continue };
            result = self.rebuild_kind(side_store, kind, ids, cancel, &mut summary);
            if result.is_err() {
                break;
            }
        }
        self.rebuilding.store(false, Ordering::Release);

        match result {
            Ok(()) => {
                info!(
                    target_module = SOURCE,
                    content_types = summary.content_types,
                    nodes = summary.nodes,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "Side store rebuild complete"
                );
                Ok(summary)
            }
            Err(err) => {
                warn!(
                    target_module = SOURCE,
                    error = %err,
                    content_types = summary.content_types,
                    "Side store rebuild stopped"
                );
                Err(err)
            }
        }
    }

    fn notify_content(&self, payloads: &[ContentChangePayload]) -> ContentChanges {
        self.notify_tree(ItemKind::Document, payloads)
    }

    fn notify_media(&self, payloads: &[MediaChangePayload]) -> bool {
        self.notify_tree(ItemKind::Media, payloads).any()
    }

    fn notify_content_types(&self, payloads: &[ContentTypeChangePayload]) {
        let started_at = Instant::now();
        let mut keys = HashSet::new();
        let mut nested_changed = false;
        for payload in payloads {
            debug!(
                target_module = SOURCE,
                kind = %payload.kind,
                content_type_id = payload.id,
                change_kind = ?payload.change,
                "Content type notification received"
            );
            match payload.change {
                ContentTypeChange::Create => {}
                ContentTypeChange::RefreshOther => {
                    self.content_types.clear_type(payload.id);
                }
                ContentTypeChange::RefreshMain => {
                    self.content_types.clear_type(payload.id);
                    if payload.kind == ItemKind::Element {
                        nested_changed = true;
                    } else if self.is_built() {
                        keys.extend(self.reload_type_nodes(payload.kind, payload.id));
                    }
                }
                ContentTypeChange::Remove => {
                    self.content_types.clear_type(payload.id);
                    if payload.kind == ItemKind::Element {
                        nested_changed = true;
                    } else if self.is_built() {
                        keys.extend(self.remove_type_nodes(payload.kind, payload.id));
                    }
                }
            }
        }

        if nested_changed {
            self.elements.evict_kind(ItemKind::Element);
        }
        if !keys.is_empty() {
            self.elements.evict_elements(&keys);
        }
        if nested_changed || !keys.is_empty() {
            self.elements.advance_generation();
        }
        histogram!(METRIC_NOTIFY_MS, "payload" => "content_types")
            .record(started_at.elapsed().as_secs_f64() * 1000.0);
    }

    fn notify_data_types(&self, payloads: &[DataTypeChangePayload]) {
        let started_at = Instant::now();
        let mut ids = HashSet::new();
        for payload in payloads {
            let cleared = self.content_types.clear_by_data_type(payload.id);
            debug!(
                target_module = SOURCE,
                data_type_id = payload.id,
                removed = payload.removed,
                content_types = cleared.len(),
                "Data type notification received"
            );
            ids.insert(payload.id);
        }
        if !ids.is_empty() {
            let evicted = self.elements.evict_data_types(&ids);
            if evicted > 0 {
                self.elements.advance_generation();
            }
        }
        histogram!(METRIC_NOTIFY_MS, "payload" => "data_types")
            .record(started_at.elapsed().as_secs_f64() * 1000.0);
    }

    fn notify_domains(&self, payloads: &[DomainChangePayload]) {
        let started_at = Instant::now();
        for payload in payloads {
            debug!(
                target_module = SOURCE,
                domain_id = payload.id,
                change_kind = ?payload.change,
                "Domain notification received"
            );
        }
        if !self.is_built() {
            return;
        }
        for payload in payloads {
            match payload.change {
                DomainChange::RefreshAll => match self.domain_repo.load_all() {
                    Ok(domains) => self.domains.replace_all(domains),
                    Err(err) => warn!(
                        target_module = SOURCE,
                        error = %err,
                        "Reloading domains failed"
                    ),
                },
                DomainChange::Refresh => match self.domain_repo.load(payload.id) {
                    Ok(domain) => self.domains.set(domain),
                    Err(RepoError::NotFound) => {
                        if self.domains.remove(payload.id).is_none() {
                            log_stale(&PublishedError::stale("domain", payload.id));
                        }
                    }
                    Err(err) => warn!(
                        target_module = SOURCE,
                        domain_id = payload.id,
                        error = %err,
                        "Reloading domain failed"
                    ),
                },
                DomainChange::Remove => {
                    if self.domains.remove(payload.id).is_none() {
                        log_stale(&PublishedError::stale("domain", payload.id));
                    }
                }
            }
        }
        histogram!(METRIC_NOTIFY_MS, "payload" => "domains")
            .record(started_at.elapsed().as_secs_f64() * 1000.0);
    }

    #[instrument(skip(self, cancel))]
    fn collect(&self, cancel: &CancellationFlag) -> Result<CollectSummary, PublishedError> {
        let started_at = Instant::now();
        let snapshots_pruned = self.live.prune();
        let stores = Arc::clone(&self.stores);
        let entries_removed = self.elements.compact(
            |key| stores.contains_key(key),
            self.config.collect_batch_size().get(),
            cancel,
        )?;
        let summary = CollectSummary {
            snapshots_pruned,
            live_snapshots: self.live.live(),
            entries_removed,
        };
        histogram!(METRIC_COLLECT_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        info!(
            target_module = SOURCE,
            snapshots_pruned,
            live_snapshots = summary.live_snapshots,
            entries_removed,
            remaining = self.elements.len(),
            "Collection complete"
        );
        Ok(summary)
    }

    fn state(&self) -> ServiceState {
        if self.rebuilding.load(Ordering::Acquire) {
            ServiceState::Rebuilding
        } else if self.is_built() {
            ServiceState::Ready
        } else {
            ServiceState::NotBuilt
        }
    }
}

fn log_stale(error: &PublishedError) {
    debug!(
        target_module = SOURCE,
        error = %error,
        result = "stale_ignored",
        "Notification referenced a missing item"
    );
}
