//! In-memory repositories backed by a JSON fixture.
//!
//! Used by the CLI and by tests; editorial writes are simulated with the
//! `upsert_*`/`remove_*` helpers and then announced through the snapshot
//! service's notify entry points.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::application::repos::{
    ContentRepository, ContentTypeRepository, DomainRepository, RepoError,
};
use crate::cache::lock::{rw_read, rw_write};
use crate::domain::content_type::{ContentTypeDefinition, ContentTypeRef};
use crate::domain::domains::Domain;
use crate::domain::nodes::RawNode;
use crate::domain::types::ItemKind;

use super::error::InfraError;

const SOURCE: &str = "infra::memory";

/// Serialized repository contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fixture {
    #[serde(default)]
    pub content_types: Vec<ContentTypeDefinition>,
    #[serde(default)]
    pub nodes: Vec<RawNode>,
    #[serde(default)]
    pub domains: Vec<Domain>,
}

impl Fixture {
    pub fn from_json(json: &str) -> Result<Self, InfraError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, InfraError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents).map_err(|err| {
            InfraError::serialization(format!("fixture `{}`: {err}", path.display()))
        })
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRepository {
    nodes: RwLock<BTreeMap<(ItemKind, i32), RawNode>>,
    content_types: RwLock<BTreeMap<i32, ContentTypeDefinition>>,
    domains: RwLock<BTreeMap<i32, Domain>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: Fixture) -> Self {
        let repository = Self::new();
        for definition in fixture.content_types {
            repository.upsert_content_type(definition);
        }
        for node in fixture.nodes {
            repository.upsert_node(node);
        }
        for domain in fixture.domains {
            repository.upsert_domain(domain);
        }
        repository
    }

    pub fn upsert_node(&self, node: RawNode) {
        rw_write(&self.nodes, SOURCE, "upsert_node").insert((node.kind, node.id), node);
    }

    pub fn remove_node(&self, kind: ItemKind, id: i32) -> Option<RawNode> {
        rw_write(&self.nodes, SOURCE, "remove_node").remove(&(kind, id))
    }

    pub fn upsert_content_type(&self, definition: ContentTypeDefinition) {
        rw_write(&self.content_types, SOURCE, "upsert_content_type")
            .insert(definition.id, definition);
    }

    pub fn remove_content_type(&self, id: i32) -> Option<ContentTypeDefinition> {
        rw_write(&self.content_types, SOURCE, "remove_content_type").remove(&id)
    }

    pub fn upsert_domain(&self, domain: Domain) {
        rw_write(&self.domains, SOURCE, "upsert_domain").insert(domain.id, domain);
    }

    pub fn remove_domain(&self, id: i32) -> Option<Domain> {
        rw_write(&self.domains, SOURCE, "remove_domain").remove(&id)
    }

    fn select<F>(&self, kind: ItemKind, filter: F) -> Vec<RawNode>
    where
        F: Fn(&RawNode) -> bool,
    {
        rw_read(&self.nodes, SOURCE, "select")
            .range((kind, i32::MIN)..=(kind, i32::MAX))
            .map(|(_, node)| node)
            .filter(|node| filter(node))
            .cloned()
            .collect()
    }
}

impl ContentRepository for InMemoryRepository {
    fn load(&self, kind: ItemKind, id: i32) -> Result<RawNode, RepoError> {
        rw_read(&self.nodes, SOURCE, "load")
            .get(&(kind, id))
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    fn load_children(&self, kind: ItemKind, parent_id: i32) -> Result<Vec<RawNode>, RepoError> {
        Ok(self.select(kind, |node| node.parent_id == Some(parent_id)))
    }

    fn load_all(&self, kind: ItemKind) -> Result<Vec<RawNode>, RepoError> {
        Ok(self.select(kind, |_| true))
    }

    fn load_by_content_types(
        &self,
        kind: ItemKind,
        content_type_ids: &[i32],
    ) -> Result<Vec<RawNode>, RepoError> {
        Ok(self.select(kind, |node| {
            content_type_ids.is_empty() || content_type_ids.contains(&node.content_type_id)
        }))
    }
}

impl ContentTypeRepository for InMemoryRepository {
    fn resolve(
        &self,
        kind: ItemKind,
        reference: &ContentTypeRef,
    ) -> Result<ContentTypeDefinition, RepoError> {
        rw_read(&self.content_types, SOURCE, "resolve")
            .values()
            .find(|definition| definition.kind == kind && reference.matches(definition))
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    fn list(&self, kind: ItemKind) -> Result<Vec<ContentTypeDefinition>, RepoError> {
        Ok(rw_read(&self.content_types, SOURCE, "list")
            .values()
            .filter(|definition| definition.kind == kind)
            .cloned()
            .collect())
    }
}

impl DomainRepository for InMemoryRepository {
    fn load_all(&self) -> Result<Vec<Domain>, RepoError> {
        Ok(rw_read(&self.domains, SOURCE, "load_all")
            .values()
            .cloned()
            .collect())
    }

    fn load(&self, id: i32) -> Result<Domain, RepoError> {
        rw_read(&self.domains, SOURCE, "load")
            .get(&id)
            .cloned()
            .ok_or(RepoError::NotFound)
    }
}
