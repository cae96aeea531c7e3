//! Repository traits describing the external collaborators of the cache.

use thiserror::Error;

use crate::domain::content_type::{ContentTypeDefinition, ContentTypeRef};
use crate::domain::domains::Domain;
use crate::domain::nodes::RawNode;
use crate::domain::types::ItemKind;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

/// Editorial store for documents, media and members.
pub trait ContentRepository: Send + Sync {
    fn load(&self, kind: ItemKind, id: i32) -> Result<RawNode, RepoError>;

    fn load_children(&self, kind: ItemKind, parent_id: i32) -> Result<Vec<RawNode>, RepoError>;

    fn load_all(&self, kind: ItemKind) -> Result<Vec<RawNode>, RepoError>;

    /// Nodes of the given content types; an empty slice selects every type.
    fn load_by_content_types(
        &self,
        kind: ItemKind,
        content_type_ids: &[i32],
    ) -> Result<Vec<RawNode>, RepoError>;
}

pub trait ContentTypeRepository: Send + Sync {
    fn resolve(
        &self,
        kind: ItemKind,
        reference: &ContentTypeRef,
    ) -> Result<ContentTypeDefinition, RepoError>;

    fn list(&self, kind: ItemKind) -> Result<Vec<ContentTypeDefinition>, RepoError>;
}

pub trait DomainRepository: Send + Sync {
    fn load_all(&self) -> Result<Vec<Domain>, RepoError>;

    fn load(&self, id: i32) -> Result<Domain, RepoError>;
}

/// Durable, serialized copy of the published nodes (the auxiliary cache regenerated by `rebuild`).
pub trait DurableCacheStore: Send + Sync {
    /// Drops every stored node of `kind`.
    fn clear(&self, kind: ItemKind) -> Result<(), RepoError>;

    /// Replaces the stored nodes of one content type, returning how many were written.
    fn replace(
        &self,
        kind: ItemKind,
        content_type_id: i32,
        nodes: &[RawNode],
    ) -> Result<usize, RepoError>;
}
