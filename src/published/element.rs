//! Materialized, read-only elements.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::cache::keys::ValueSlot;
use crate::domain::error::PublishedError;
use crate::domain::types::{CacheLevel, VariationContext};

use super::cache_level::effective_cache_level;
use super::content_type::{ContentTypeDescriptor, PropertyTypeDescriptor};
use super::property::PublishedProperty;
use super::snapshot::{PublishedSnapshot, SnapshotAccessor};
use super::value::{ObjectValue, PropertySource, PropertyValues};

/// Where a node sits in its tree. Absent for nested elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: i32,
    pub name: String,
    pub parent_id: Option<i32>,
    pub sort_order: i32,
}

/// Runtime context an element reads its properties in.
#[derive(Debug, Clone)]
pub struct ElementContext {
    pub snapshot: Option<SnapshotAccessor>,
    /// Lifetime of the container this element is built inside of.
    pub reference_level: CacheLevel,
    pub variation: VariationContext,
}

impl Default for ElementContext {
    fn default() -> Self {
        Self {
            snapshot: None,
            reference_level: CacheLevel::Elements,
            variation: VariationContext::default(),
        }
    }
}

/// One node (or nested set) at a point in time.
///
/// Properties are index-aligned with the content type's property list. Their
/// values are converted lazily on first read.
pub struct PublishedElement {
    content_type: Arc<ContentTypeDescriptor>,
    key: Uuid,
    previewing: bool,
    reference_level: CacheLevel,
    variation: VariationContext,
    snapshot: Option<SnapshotAccessor>,
    node: Option<NodeInfo>,
    properties: Vec<Option<PublishedProperty>>,
}

impl PublishedElement {
    /// Element without a snapshot; only valid when no property needs one.
    pub fn new(
        content_type: Arc<ContentTypeDescriptor>,
        key: Uuid,
        values: impl Into<PropertyValues>,
        previewing: bool,
    ) -> Result<Self, PublishedError> {
        Self::with_context(
            content_type,
            key,
            values,
            previewing,
            ElementContext::default(),
        )
    }

    pub fn with_context(
        content_type: Arc<ContentTypeDescriptor>,
        key: Uuid,
        values: impl Into<PropertyValues>,
        previewing: bool,
        context: ElementContext,
    ) -> Result<Self, PublishedError> {
        if key.is_nil() {
            return Err(PublishedError::configuration(format!(
                "element of type `{}` has an empty key",
                content_type.alias
            )));
        }
        if context.snapshot.is_none()
            && let Some(property) = content_type.properties().iter().find(|property| {
                effective_cache_level(property.cache_level, context.reference_level).level
                    != CacheLevel::None
            })
        {
            return Err(PublishedError::configuration(format!(
                "property `{}` of `{}` is cached at `{}` but the element has no snapshot accessor",
                property.alias, content_type.alias, property.cache_level
            )));
        }

        let mut values = values.into();
        let properties = content_type
            .properties()
            .iter()
            .enumerate()
            .map(|(index, property)| {
                values
                    .take(&property.alias)
                    .filter(|source| !source.is_empty())
                    .map(|source| PublishedProperty::new(index, source))
            })
            .collect();

        Ok(Self {
            content_type,
            key,
            previewing,
            reference_level: context.reference_level,
            variation: context.variation,
            snapshot: context.snapshot,
            node: None,
            properties,
        })
    }

    pub(crate) fn with_node(mut self, node: NodeInfo) -> Self {
        self.node = Some(node);
        self
    }

    pub fn key(&self) -> Uuid {
        self.key
    }

    pub fn content_type(&self) -> &Arc<ContentTypeDescriptor> {
        &self.content_type
    }

    pub fn previewing(&self) -> bool {
        self.previewing
    }

    pub fn reference_level(&self) -> CacheLevel {
        self.reference_level
    }

    pub fn variation(&self) -> &VariationContext {
        &self.variation
    }

    pub fn node(&self) -> Option<&NodeInfo> {
        self.node.as_ref()
    }

    pub fn id(&self) -> Option<i32> {
        self.node.as_ref().map(|node| node.id)
    }

    pub fn name(&self) -> Option<&str> {
        self.node.as_ref().map(|node| node.name.as_str())
    }

    pub fn snapshot_accessor(&self) -> Option<SnapshotAccessor> {
        self.snapshot.clone()
    }

    /// The snapshot this element was drawn from, while it is alive.
    pub fn snapshot(&self) -> Option<PublishedSnapshot> {
        self.snapshot.as_ref().and_then(SnapshotAccessor::upgrade)
    }

    pub(crate) fn property_type_at(&self, index: usize) -> &PropertyTypeDescriptor {
        &self.content_type.properties()[index]
    }

    /// `None` when the type has no such property or the element has no value for it.
    pub fn get_property(&self, alias: &str) -> Option<PropertyRef<'_>> {
        let index = self.content_type.property_index(alias)?;
        let property = self.properties.get(index)?.as_ref()?;
        Some(PropertyRef {
            element: self,
            property,
        })
    }

    pub fn properties(&self) -> impl Iterator<Item = PropertyRef<'_>> {
        self.properties.iter().flatten().map(move |property| PropertyRef {
            element: self,
            property,
        })
    }

    /// Object value of a property in the element's variation context.
    pub fn value(&self, alias: &str) -> Result<Option<ObjectValue>, PublishedError> {
        self.get_property(alias)
            .map(|property| property.get_value())
            .transpose()
    }

    /// JSON projection of every property. Failed conversions render as `null`.
    pub fn to_json(&self) -> Value {
        let mut properties = Map::new();
        for property in self.properties() {
            let value = property
                .get_value()
                .map(|value| value.to_json())
                .unwrap_or(Value::Null);
            properties.insert(property.alias().to_string(), value);
        }

        let mut object = Map::new();
        object.insert("key".into(), Value::String(self.key.to_string()));
        object.insert(
            "contentType".into(),
            Value::String(self.content_type.alias.clone()),
        );
        if let Some(node) = &self.node {
            object.insert("id".into(), Value::from(node.id));
            object.insert("name".into(), Value::String(node.name.clone()));
        }
        object.insert("properties".into(), Value::Object(properties));
        Value::Object(object)
    }
}

impl fmt::Debug for PublishedElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishedElement")
            .field("key", &self.key)
            .field("content_type", &self.content_type.alias)
            .field("previewing", &self.previewing)
            .field("reference_level", &self.reference_level)
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}

/// A property together with the element that owns it.
#[derive(Clone, Copy)]
pub struct PropertyRef<'a> {
    element: &'a PublishedElement,
    property: &'a PublishedProperty,
}

impl<'a> PropertyRef<'a> {
    pub fn alias(&self) -> &'a str {
        &self.property_type().alias
    }

    pub fn property_type(&self) -> &'a PropertyTypeDescriptor {
        self.element.property_type_at(self.property.index())
    }

    pub fn element(&self) -> &'a PublishedElement {
        self.element
    }

    pub fn source_value(&self) -> &'a PropertySource {
        self.property.source()
    }

    pub fn get_value(&self) -> Result<ObjectValue, PublishedError> {
        self.get_value_for(None, None)
    }

    pub fn get_value_for(
        &self,
        culture: Option<&str>,
        segment: Option<&str>,
    ) -> Result<ObjectValue, PublishedError> {
        let variant = self.element.variation.resolve(culture, segment);
        self.property.value(self.element, variant, ValueSlot::Object)
    }

    pub fn has_value(&self) -> Result<bool, PublishedError> {
        self.has_value_for(None, None)
    }

    pub fn has_value_for(
        &self,
        culture: Option<&str>,
        segment: Option<&str>,
    ) -> Result<bool, PublishedError> {
        let variant = self.element.variation.resolve(culture, segment);
        self.property.has_value(self.element, variant)
    }

    pub fn get_delivery_value(&self, expanding: bool) -> Result<ObjectValue, PublishedError> {
        self.get_delivery_value_for(expanding, None, None)
    }

    pub fn get_delivery_value_for(
        &self,
        expanding: bool,
        culture: Option<&str>,
        segment: Option<&str>,
    ) -> Result<ObjectValue, PublishedError> {
        let variant = self.element.variation.resolve(culture, segment);
        self.property
            .value(self.element, variant, ValueSlot::delivery(expanding))
    }
}

impl fmt::Debug for PropertyRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyRef")
            .field("element", &self.element.key)
            .field("alias", &self.alias())
            .finish()
    }
}
