//! In-memory node stores, one per item kind.
//!
//! Readers go through concurrent maps and never wait on a writer; writers
//! (notification handling, reloads) are serialized by a store-level lock so
//! the key and children indexes stay consistent with the node map.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use uuid::Uuid;

use crate::cache::lock::mutex_lock;
use crate::domain::nodes::RawNode;
use crate::domain::types::ItemKind;

const SOURCE: &str = "published::store";

/// How a stored node changed, by comparing data versions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentChanges {
    pub draft_changed: bool,
    pub published_changed: bool,
}

impl ContentChanges {
    pub fn between(previous: Option<&RawNode>, current: Option<&RawNode>) -> Self {
        let draft = |node: Option<&RawNode>| node.and_then(|n| n.draft.as_ref().map(|d| d.version));
        let published =
            |node: Option<&RawNode>| node.and_then(|n| n.published.as_ref().map(|d| d.version));
        let moved = match (previous, current) {
            (Some(before), Some(after)) => {
                before.parent_id != after.parent_id || before.sort_order != after.sort_order
            }
            _ => false,
        };
        Self {
            draft_changed: draft(previous) != draft(current)
                || (moved && draft(current).is_some()),
            published_changed: published(previous) != published(current)
                || (moved && published(current).is_some()),
        }
    }

    pub fn merge(&mut self, other: ContentChanges) {
        self.draft_changed |= other.draft_changed;
        self.published_changed |= other.published_changed;
    }

    pub fn any(self) -> bool {
        self.draft_changed || self.published_changed
    }
}

#[derive(Debug)]
pub struct ContentStore {
    kind: ItemKind,
    nodes: DashMap<i32, Arc<RawNode>>,
    by_key: DashMap<Uuid, i32>,
    children: DashMap<Option<i32>, Vec<i32>>,
    generation: AtomicU64,
    loaded: AtomicBool,
    writer: Mutex<()>,
}

impl ContentStore {
    pub fn new(kind: ItemKind) -> Self {
        Self {
            kind,
            nodes: DashMap::new(),
            by_key: DashMap::new(),
            children: DashMap::new(),
            generation: AtomicU64::new(0),
            loaded: AtomicBool::new(false),
            writer: Mutex::new(()),
        }
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Bumped on every change.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: i32) -> Option<Arc<RawNode>> {
        self.nodes.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn get_by_key(&self, key: &Uuid) -> Option<Arc<RawNode>> {
        let id = *self.by_key.get(key)?;
        self.get(id)
    }

    pub fn contains_key(&self, key: &Uuid) -> bool {
        self.by_key.contains_key(key)
    }

    /// Children of `parent` (`None` for roots) ordered by sort order.
    pub fn children(&self, parent: Option<i32>) -> Vec<Arc<RawNode>> {
        let ids = self
            .children
            .get(&parent)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        let mut nodes: Vec<Arc<RawNode>> = ids.into_iter().filter_map(|id| self.get(id)).collect();
        nodes.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then(a.id.cmp(&b.id)));
        nodes
    }

    /// Every descendant id of `id`, breadth first.
    pub fn descendants(&self, id: i32) -> Vec<i32> {
        let mut found = Vec::new();
        let mut seen = HashSet::from([id]);
        let mut pending = VecDeque::from([id]);
        while let Some(current) = pending.pop_front() {
            let Some(children) = self.children.get(&Some(current)).map(|e| e.value().clone())
            else {
                continue;
            };
            for child in children {
                if seen.insert(child) {
                    found.push(child);
                    pending.push_back(child);
                }
            }
        }
        found
    }

    pub fn nodes_of_types(&self, content_type_ids: &HashSet<i32>) -> Vec<Arc<RawNode>> {
        self.nodes
            .iter()
            .filter(|entry| content_type_ids.contains(&entry.value().content_type_id))
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<RawNode>> {
        self.nodes
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Replaces the whole store. Returns the keys of every node that was stored before.
    pub fn load_all(&self, nodes: Vec<RawNode>) -> Vec<Uuid> {
        let _writer = mutex_lock(&self.writer, SOURCE, "load_all");
        let previous = self.clear_locked();
        for node in nodes {
            self.insert_locked(node);
        }
        self.loaded.store(true, Ordering::Release);
        self.bump();
        previous
    }

    /// Inserts or replaces one node, returning the node it replaced.
    pub fn set(&self, node: RawNode) -> Option<Arc<RawNode>> {
        let _writer = mutex_lock(&self.writer, SOURCE, "set");
        let previous = self.remove_locked(node.id);
        self.insert_locked(node);
        self.bump();
        previous
    }

    pub fn remove(&self, id: i32) -> Option<Arc<RawNode>> {
        let _writer = mutex_lock(&self.writer, SOURCE, "remove");
        let removed = self.remove_locked(id);
        if removed.is_some() {
            self.bump();
        }
        removed
    }

    /// Removes a node and all of its descendants.
    pub fn remove_branch(&self, id: i32) -> Vec<Arc<RawNode>> {
        let _writer = mutex_lock(&self.writer, SOURCE, "remove_branch");
        let mut ids = vec![id];
        ids.extend(self.descendants(id));
        let removed: Vec<Arc<RawNode>> = ids
            .into_iter()
            .filter_map(|id| self.remove_locked(id))
            .collect();
        if !removed.is_empty() {
            self.bump();
        }
        removed
    }

    /// Removes everything, returning the removed keys.
    pub fn clear(&self) -> Vec<Uuid> {
        let _writer = mutex_lock(&self.writer, SOURCE, "clear");
        let removed = self.clear_locked();
        self.bump();
        removed
    }

    fn clear_locked(&self) -> Vec<Uuid> {
        let keys: Vec<Uuid> = self.by_key.iter().map(|entry| *entry.key()).collect();
        self.nodes.clear();
        self.by_key.clear();
        self.children.clear();
        keys
    }

    fn insert_locked(&self, node: RawNode) {
        self.by_key.insert(node.key, node.id);
        let mut siblings = self.children.entry(node.parent_id).or_default();
        if !siblings.contains(&node.id) {
            siblings.push(node.id);
        }
        drop(siblings);
        self.nodes.insert(node.id, Arc::new(node));
    }

    fn remove_locked(&self, id: i32) -> Option<Arc<RawNode>> {
        let (_, removed) = self.nodes.remove(&id)?;
        self.by_key.remove_if(&removed.key, |_, mapped| *mapped == id);
        if let Some(mut siblings) = self.children.get_mut(&removed.parent_id) {
            siblings.retain(|sibling| *sibling != id);
        }
        Some(removed)
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

/// The document, media and member stores of one service.
#[derive(Debug)]
pub struct ContentStores {
    documents: ContentStore,
    media: ContentStore,
    members: ContentStore,
}

impl ContentStores {
    pub fn new() -> Self {
        Self {
            documents: ContentStore::new(ItemKind::Document),
            media: ContentStore::new(ItemKind::Media),
            members: ContentStore::new(ItemKind::Member),
        }
    }

    /// Store backing `kind`; nested elements have none.
    pub fn get(&self, kind: ItemKind) -> Option<&ContentStore> {
        match kind {
            ItemKind::Document => Some(&self.documents),
            ItemKind::Media => Some(&self.media),
            ItemKind::Member => Some(&self.members),
            ItemKind::Element => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContentStore> {
        [&self.documents, &self.media, &self.members].into_iter()
    }

    /// Whether any store still holds a node with this key.
    pub fn contains_key(&self, key: &Uuid) -> bool {
        self.iter().any(|store| store.contains_key(key))
    }
}

impl Default for ContentStores {
    fn default() -> Self {
        Self::new()
    }
}
