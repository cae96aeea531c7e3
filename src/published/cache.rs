//! Per-kind read views over a snapshot (content, media, members).

use std::sync::Arc;

use uuid::Uuid;

use crate::cache::keys::SnapshotElementKey;
use crate::domain::content_type::ContentTypeRef;
use crate::domain::error::PublishedError;
use crate::domain::nodes::RawNode;
use crate::domain::types::{CacheLevel, ItemKind};

use super::element::{ElementContext, NodeInfo, PublishedElement};
use super::snapshot::PublishedSnapshot;

/// Materializes [`PublishedElement`]s of one kind on demand.
///
/// Draft data is visible when the snapshot is previewing and a draft exists;
/// otherwise only published data is. A node with no visible data is absent.
#[derive(Debug, Clone, Copy)]
pub struct PublishedCache<'a> {
    snapshot: &'a PublishedSnapshot,
    kind: ItemKind,
}

impl<'a> PublishedCache<'a> {
    pub(crate) fn new(snapshot: &'a PublishedSnapshot, kind: ItemKind) -> Self {
        Self { snapshot, kind }
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn get_by_id(&self, id: i32) -> Result<Option<Arc<PublishedElement>>, PublishedError> {
        match self.store_node(|store| store.get(id)) {
            Some(node) => self.materialize(&node),
            None => Ok(None),
        }
    }

    pub fn get_by_key(&self, key: Uuid) -> Result<Option<Arc<PublishedElement>>, PublishedError> {
        match self.store_node(|store| store.get_by_key(&key)) {
            Some(node) => self.materialize(&node),
            None => Ok(None),
        }
    }

    pub fn get_at_root(&self) -> Result<Vec<Arc<PublishedElement>>, PublishedError> {
        self.visible(None)
    }

    pub fn get_children(&self, id: i32) -> Result<Vec<Arc<PublishedElement>>, PublishedError> {
        self.visible(Some(id))
    }

    /// Whether any node of this kind is visible in the snapshot.
    pub fn has_content(&self) -> bool {
        let previewing = self.snapshot.previewing();
        self.snapshot
            .stores()
            .get(self.kind)
            .is_some_and(|store| store.all().iter().any(|node| node.data(previewing).is_some()))
    }

    fn store_node<F>(&self, lookup: F) -> Option<Arc<RawNode>>
    where
        F: FnOnce(&super::store::ContentStore) -> Option<Arc<RawNode>>,
    {
        self.snapshot.stores().get(self.kind).and_then(lookup)
    }

    fn visible(&self, parent: Option<i32>) -> Result<Vec<Arc<PublishedElement>>, PublishedError> {
        let Some(store) = self.snapshot.stores().get(self.kind) else {
            return Ok(Vec::new());
        };
        let mut elements = Vec::new();
        for node in store.children(parent) {
            if let Some(element) = self.materialize(&node)? {
                elements.push(element);
            }
        }
        Ok(elements)
    }

    fn materialize(
        &self,
        node: &RawNode,
    ) -> Result<Option<Arc<PublishedElement>>, PublishedError> {
        let previewing = self.snapshot.previewing();
        let Some(data) = node.data(previewing) else {
            return Ok(None);
        };
        let key = SnapshotElementKey {
            kind: self.kind,
            id: node.id,
            previewing,
        };
        self.snapshot
            .snapshot_cache()
            .get_or_try_insert_with(key, || {
                let content_type = self
                    .snapshot
                    .content_types()
                    .get(self.kind, &ContentTypeRef::Id(node.content_type_id))?;
                let context = ElementContext {
                    snapshot: Some(self.snapshot.accessor()),
                    reference_level: CacheLevel::Elements,
                    variation: self.snapshot.variation().clone(),
                };
                let element = PublishedElement::with_context(
                    content_type,
                    node.key,
                    data.values.clone(),
                    previewing,
                    context,
                )?;
                Ok(element.with_node(NodeInfo {
                    id: node.id,
                    name: data.name.clone(),
                    parent_id: node.parent_id,
                    sort_order: node.sort_order,
                }))
            })
            .map(Some)
    }
}
