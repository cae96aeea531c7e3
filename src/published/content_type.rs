//! Resolved content types: definitions bound to their converters.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::application::convert::{ConverterRegistry, PropertyValueConverter};
use crate::domain::content_type::{ContentTypeDefinition, PropertyTypeDefinition};
use crate::domain::error::PublishedError;
use crate::domain::types::{CacheLevel, ItemKind, VariantKey};

/// One property of a resolved content type. Immutable once built.
pub struct PropertyTypeDescriptor {
    pub alias: String,
    pub data_type_id: i32,
    pub editor_alias: String,
    pub cache_level: CacheLevel,
    pub delivery_cache_level: CacheLevel,
    pub varies_by_culture: bool,
    pub varies_by_segment: bool,
    converter: Arc<dyn PropertyValueConverter>,
}

impl PropertyTypeDescriptor {
    pub fn resolve(definition: PropertyTypeDefinition, registry: &ConverterRegistry) -> Self {
        let converter = registry.resolve(&definition.editor_alias);
        Self {
            cache_level: definition
                .cache_level
                .unwrap_or_else(|| converter.cache_level()),
            delivery_cache_level: definition
                .delivery_cache_level
                .unwrap_or_else(|| converter.delivery_cache_level()),
            alias: definition.alias,
            data_type_id: definition.data_type_id,
            editor_alias: definition.editor_alias,
            varies_by_culture: definition.varies_by_culture,
            varies_by_segment: definition.varies_by_segment,
            converter,
        }
    }

    pub fn converter(&self) -> &dyn PropertyValueConverter {
        self.converter.as_ref()
    }

    /// Drops the axes this property does not vary by, so invariant properties share one slot.
    pub fn variant_for(&self, mut variant: VariantKey) -> VariantKey {
        if !self.varies_by_culture {
            variant.culture.clear();
        }
        if !self.varies_by_segment {
            variant.segment.clear();
        }
        variant
    }
}

impl fmt::Debug for PropertyTypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyTypeDescriptor")
            .field("alias", &self.alias)
            .field("data_type_id", &self.data_type_id)
            .field("editor_alias", &self.editor_alias)
            .field("cache_level", &self.cache_level)
            .field("delivery_cache_level", &self.delivery_cache_level)
            .finish_non_exhaustive()
    }
}

/// A content type with its property list and alias index.
#[derive(Debug)]
pub struct ContentTypeDescriptor {
    pub id: i32,
    pub key: Uuid,
    pub alias: String,
    pub kind: ItemKind,
    properties: Vec<PropertyTypeDescriptor>,
    index: HashMap<String, usize>,
}

impl ContentTypeDescriptor {
    pub fn build(
        definition: ContentTypeDefinition,
        registry: &ConverterRegistry,
    ) -> Result<Self, PublishedError> {
        let mut index = HashMap::with_capacity(definition.properties.len());
        let mut properties = Vec::with_capacity(definition.properties.len());
        for property in definition.properties {
            let normalized = property.alias.to_lowercase();
            if index.insert(normalized, properties.len()).is_some() {
                return Err(PublishedError::configuration(format!(
                    "content type `{}` declares property `{}` twice",
                    definition.alias, property.alias
                )));
            }
            properties.push(PropertyTypeDescriptor::resolve(property, registry));
        }

        Ok(Self {
            id: definition.id,
            key: definition.key,
            alias: definition.alias,
            kind: definition.kind,
            properties,
            index,
        })
    }

    pub fn properties(&self) -> &[PropertyTypeDescriptor] {
        &self.properties
    }

    pub fn property_index(&self, alias: &str) -> Option<usize> {
        match self.index.get(alias) {
            Some(index) => Some(*index),
            None => self.index.get(&alias.to_lowercase()).copied(),
        }
    }

    pub fn property_type(&self, alias: &str) -> Option<&PropertyTypeDescriptor> {
        self.property_index(alias)
            .and_then(|index| self.properties.get(index))
    }

    pub fn uses_data_type(&self, data_type_id: i32) -> bool {
        self.properties
            .iter()
            .any(|property| property.data_type_id == data_type_id)
    }
}
