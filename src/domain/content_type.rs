//! Content type definitions as returned by the content type repository.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{CacheLevel, ItemKind};

/// How a content type is looked up.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentTypeRef {
    Id(i32),
    Key(Uuid),
    Alias(String),
}

impl ContentTypeRef {
    pub fn alias(alias: impl Into<String>) -> Self {
        Self::Alias(alias.into())
    }

    pub fn matches(&self, definition: &ContentTypeDefinition) -> bool {
        match self {
            ContentTypeRef::Id(id) => definition.id == *id,
            ContentTypeRef::Key(key) => definition.key == *key,
            ContentTypeRef::Alias(alias) => definition.alias.eq_ignore_ascii_case(alias),
        }
    }
}

impl std::fmt::Display for ContentTypeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentTypeRef::Id(id) => write!(f, "#{id}"),
            ContentTypeRef::Key(key) => write!(f, "{key}"),
            ContentTypeRef::Alias(alias) => write!(f, "`{alias}`"),
        }
    }
}

/// Unresolved content type: aliases and data type references, no converters yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentTypeDefinition {
    pub id: i32,
    pub key: Uuid,
    pub alias: String,
    pub kind: ItemKind,
    #[serde(default)]
    pub properties: Vec<PropertyTypeDefinition>,
}

impl ContentTypeDefinition {
    pub fn uses_data_type(&self, data_type_id: i32) -> bool {
        self.properties
            .iter()
            .any(|property| property.data_type_id == data_type_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyTypeDefinition {
    pub alias: String,
    pub data_type_id: i32,
    /// Property editor alias used to pick the value converter.
    pub editor_alias: String,
    /// Overrides the converter's declared cache level.
    #[serde(default)]
    pub cache_level: Option<CacheLevel>,
    /// Overrides the converter's declared delivery cache level.
    #[serde(default)]
    pub delivery_cache_level: Option<CacheLevel>,
    #[serde(default)]
    pub varies_by_culture: bool,
    #[serde(default)]
    pub varies_by_segment: bool,
}

impl PropertyTypeDefinition {
    pub fn new(alias: impl Into<String>, data_type_id: i32, editor_alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            data_type_id,
            editor_alias: editor_alias.into(),
            cache_level: None,
            delivery_cache_level: None,
            varies_by_culture: false,
            varies_by_segment: false,
        }
    }

    pub fn with_cache_level(mut self, level: CacheLevel) -> Self {
        self.cache_level = Some(level);
        self
    }

    pub fn with_delivery_cache_level(mut self, level: CacheLevel) -> Self {
        self.delivery_cache_level = Some(level);
        self
    }

    pub fn varying_by_culture(mut self) -> Self {
        self.varies_by_culture = true;
        self
    }
}
