//! Values flowing through the conversion pipeline.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::types::VariantKey;

use super::element::PublishedElement;

/// Raw stored representation of a property value. Opaque to the cache.
pub type SourceValue = serde_json::Value;

/// A converted value, shared so repeated reads observe the same instance.
pub type ObjectValue = Arc<PublishedValue>;

/// Intermediate or rendering-ready value produced by a converter.
#[derive(Debug, Clone)]
pub enum PublishedValue {
    Null,
    Bool(bool),
    Integer(i64),
    Decimal(f64),
    Text(String),
    Json(serde_json::Value),
    /// Reference to an item by id, typically an intermediate picker value.
    Reference(i32),
    Element(Arc<PublishedElement>),
    Elements(Vec<Arc<PublishedElement>>),
    List(Vec<PublishedValue>),
}

impl PublishedValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PublishedValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PublishedValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            PublishedValue::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_element(&self) -> Option<&Arc<PublishedElement>> {
        match self {
            PublishedValue::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn as_elements(&self) -> Option<&[Arc<PublishedElement>]> {
        match self {
            PublishedValue::Elements(elements) => Some(elements),
            _ => None,
        }
    }

    /// Plain JSON projection, used by the CLI and delivery output.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            PublishedValue::Null => Value::Null,
            PublishedValue::Bool(value) => Value::Bool(*value),
            PublishedValue::Integer(value) => Value::from(*value),
            PublishedValue::Decimal(value) => Value::from(*value),
            PublishedValue::Text(text) => Value::String(text.clone()),
            PublishedValue::Json(json) => json.clone(),
            PublishedValue::Reference(id) => serde_json::json!({ "id": id }),
            PublishedValue::Element(element) => element.to_json(),
            PublishedValue::Elements(elements) => {
                Value::Array(elements.iter().map(|element| element.to_json()).collect())
            }
            PublishedValue::List(items) => {
                Value::Array(items.iter().map(PublishedValue::to_json).collect())
            }
        }
    }
}

impl From<&str> for PublishedValue {
    fn from(value: &str) -> Self {
        PublishedValue::Text(value.to_string())
    }
}

impl From<String> for PublishedValue {
    fn from(value: String) -> Self {
        PublishedValue::Text(value)
    }
}

impl From<i64> for PublishedValue {
    fn from(value: i64) -> Self {
        PublishedValue::Integer(value)
    }
}

/// Stored values of one property: an optional invariant value plus variants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertySource {
    #[serde(default)]
    pub invariant: Option<SourceValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<VariantSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSource {
    #[serde(flatten)]
    pub key: VariantKey,
    pub value: SourceValue,
}

impl PropertySource {
    pub fn invariant(value: SourceValue) -> Self {
        Self {
            invariant: Some(value),
            variants: Vec::new(),
        }
    }

    pub fn with_variant(mut self, key: VariantKey, value: SourceValue) -> Self {
        self.set_variant(key, value);
        self
    }

    pub fn set_variant(&mut self, key: VariantKey, value: SourceValue) {
        if key.is_invariant() {
            self.invariant = Some(value);
            return;
        }
        match self.variants.iter_mut().find(|variant| variant.key == key) {
            Some(existing) => existing.value = value,
            None => self.variants.push(VariantSource { key, value }),
        }
    }

    /// Exact variant when present, otherwise the culture-only variant, otherwise invariant.
    pub fn resolve(&self, key: &VariantKey) -> Option<&SourceValue> {
        if !key.is_invariant() {
            if let Some(found) = self.variants.iter().find(|variant| &variant.key == key) {
                return Some(&found.value);
            }
            if !key.segment.is_empty()
                && let Some(found) = self
                    .variants
                    .iter()
                    .find(|variant| variant.key.culture == key.culture && variant.key.segment.is_empty())
            {
                return Some(&found.value);
            }
        }
        self.invariant.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.invariant.is_none() && self.variants.is_empty()
    }
}

impl From<SourceValue> for PropertySource {
    fn from(value: SourceValue) -> Self {
        PropertySource::invariant(value)
    }
}

/// Property values keyed by alias, looked up case-insensitively.
///
/// Keys are normalized to lowercase on insertion; a map that is already a
/// `PropertyValues` moves into an element without being re-keyed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "HashMap<String, PropertySource>",
    into = "HashMap<String, PropertySource>"
)]
pub struct PropertyValues {
    entries: HashMap<String, PropertySource>,
}

impl PropertyValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, alias: &str, source: impl Into<PropertySource>) {
        self.entries.insert(alias.to_lowercase(), source.into());
    }

    pub fn insert_variant(&mut self, alias: &str, key: VariantKey, value: SourceValue) {
        match self.entries.entry(alias.to_lowercase()) {
            Entry::Occupied(mut entry) => entry.get_mut().set_variant(key, value),
            Entry::Vacant(entry) => {
                entry.insert(PropertySource::default().with_variant(key, value));
            }
        }
    }

    pub fn with(mut self, alias: &str, source: impl Into<PropertySource>) -> Self {
        self.insert(alias, source);
        self
    }

    pub fn get(&self, alias: &str) -> Option<&PropertySource> {
        match self.entries.get(alias) {
            Some(found) => Some(found),
            None => self.entries.get(&alias.to_lowercase()),
        }
    }

    pub(crate) fn take(&mut self, alias: &str) -> Option<PropertySource> {
        self.entries.remove(&alias.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertySource)> {
        self.entries
            .iter()
            .map(|(alias, source)| (alias.as_str(), source))
    }
}

impl From<HashMap<String, PropertySource>> for PropertyValues {
    fn from(map: HashMap<String, PropertySource>) -> Self {
        let entries = map
            .into_iter()
            .map(|(alias, source)| (alias.to_lowercase(), source))
            .collect();
        Self { entries }
    }
}

impl From<PropertyValues> for HashMap<String, PropertySource> {
    fn from(values: PropertyValues) -> Self {
        values.entries
    }
}

impl From<HashMap<String, SourceValue>> for PropertyValues {
    fn from(map: HashMap<String, SourceValue>) -> Self {
        let entries = map
            .into_iter()
            .map(|(alias, value)| (alias.to_lowercase(), PropertySource::invariant(value)))
            .collect();
        Self { entries }
    }
}

impl<const N: usize> From<[(&str, SourceValue); N]> for PropertyValues {
    fn from(pairs: [(&str, SourceValue); N]) -> Self {
        let mut values = PropertyValues::new();
        for (alias, value) in pairs {
            values.insert(alias, value);
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn aliases_are_case_insensitive() {
        let values = PropertyValues::from([("Title", json!("Hi"))]);
        assert!(values.get("title").is_some());
        assert!(values.get("TITLE").is_some());
        assert!(values.get("body").is_none());
    }

    #[test]
    fn variant_resolution_falls_back_to_culture_then_invariant() {
        let source = PropertySource::invariant(json!("neutral"))
            .with_variant(VariantKey::new("da", ""), json!("dansk"))
            .with_variant(VariantKey::new("da", "mobile"), json!("mobil"));

        assert_eq!(
            source.resolve(&VariantKey::new("da", "mobile")),
            Some(&json!("mobil"))
        );
        assert_eq!(
            source.resolve(&VariantKey::new("da", "desktop")),
            Some(&json!("dansk"))
        );
        assert_eq!(
            source.resolve(&VariantKey::new("en", "")),
            Some(&json!("neutral"))
        );
    }

    #[test]
    fn setting_invariant_variant_replaces_invariant_value() {
        let mut source = PropertySource::invariant(json!(1));
        source.set_variant(VariantKey::invariant(), json!(2));
        assert_eq!(source.invariant, Some(json!(2)));
        assert!(source.variants.is_empty());
    }

    #[test]
    fn deserialized_maps_are_normalized() {
        let values: PropertyValues =
            serde_json::from_value(json!({ "BodyText": { "invariant": "hello" } }))
                .expect("deserialize values");
        assert_eq!(
            values.get("bodytext").and_then(|source| source.invariant.clone()),
            Some(json!("hello"))
        );
    }
}
