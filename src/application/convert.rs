//! Property value converters and the registry that binds them to editors.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::domain::error::ConversionError;
use crate::domain::types::{CacheLevel, VariantKey};
use crate::published::content_type::PropertyTypeDescriptor;
use crate::published::element::PublishedElement;
use crate::published::snapshot::PublishedSnapshot;
use crate::published::value::{PublishedValue, SourceValue};

use super::converters;

/// A value at one stage of the conversion pipeline, handed to [`PropertyValueConverter::is_value`].
#[derive(Debug, Clone, Copy)]
pub enum StageValue<'a> {
    Source(Option<&'a SourceValue>),
    Inter(&'a PublishedValue),
    Object(&'a PublishedValue),
}

/// Everything a conversion may depend on, passed explicitly on every call.
pub struct ConversionContext<'a> {
    pub element: &'a PublishedElement,
    pub property_type: &'a PropertyTypeDescriptor,
    /// Reference level to hand to nested elements built by this conversion.
    pub reference_level: CacheLevel,
    pub previewing: bool,
    pub variant: &'a VariantKey,
    /// Snapshot the owning element was drawn from, when it is still alive.
    pub snapshot: Option<PublishedSnapshot>,
}

impl fmt::Debug for ConversionContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionContext")
            .field("element", &self.element.key())
            .field("property", &self.property_type.alias)
            .field("reference_level", &self.reference_level)
            .field("previewing", &self.previewing)
            .field("variant", self.variant)
            .finish()
    }
}

/// Converts one data type's stored values into rendering-ready values.
///
/// Implementations must be pure with respect to (source, culture, segment,
/// previewing) for any level they declare as memoized.
pub trait PropertyValueConverter: Send + Sync {
    /// Scope the object value may be memoized in.
    fn cache_level(&self) -> CacheLevel {
        CacheLevel::Elements
    }

    /// Scope the delivery values may be memoized in.
    fn delivery_cache_level(&self) -> CacheLevel {
        self.cache_level()
    }

    /// `Some` when the value at this stage decides whether the property has a value.
    fn is_value(&self, value: StageValue<'_>) -> Option<bool> {
        default_is_value(value)
    }

    fn source_to_inter(
        &self,
        ctx: &ConversionContext<'_>,
        source: Option<&SourceValue>,
    ) -> Result<PublishedValue, ConversionError>;

    fn inter_to_object(
        &self,
        ctx: &ConversionContext<'_>,
        inter: &PublishedValue,
    ) -> Result<PublishedValue, ConversionError>;

    fn inter_to_delivery_object(
        &self,
        ctx: &ConversionContext<'_>,
        inter: &PublishedValue,
        expanding: bool,
    ) -> Result<PublishedValue, ConversionError> {
        let _ = expanding;
        self.inter_to_object(ctx, inter)
    }
}

/// Missing, null and blank sources have no value; other sources defer to the object.
pub fn default_is_value(value: StageValue<'_>) -> Option<bool> {
    match value {
        StageValue::Source(None) | StageValue::Source(Some(SourceValue::Null)) => Some(false),
        StageValue::Source(Some(SourceValue::String(text))) if text.trim().is_empty() => {
            Some(false)
        }
        StageValue::Source(Some(_)) | StageValue::Inter(_) => None,
        StageValue::Object(object) => Some(match object {
            PublishedValue::Null => false,
            PublishedValue::Text(text) => !text.is_empty(),
            PublishedValue::Elements(items) => !items.is_empty(),
            PublishedValue::List(items) => !items.is_empty(),
            _ => true,
        }),
    }
}

/// Editor alias → converter, consulted once when a content type is resolved.
#[derive(Clone)]
pub struct ConverterRegistry {
    converters: HashMap<String, Arc<dyn PropertyValueConverter>>,
    fallback: Arc<dyn PropertyValueConverter>,
}

impl ConverterRegistry {
    /// Registry with no editor bindings; every editor resolves to the passthrough converter.
    pub fn empty() -> Self {
        Self {
            converters: HashMap::new(),
            fallback: Arc::new(converters::PassthroughConverter),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(converters::TEXT, Arc::new(converters::TextConverter));
        registry.register(converters::INTEGER, Arc::new(converters::IntegerConverter));
        registry.register(converters::JSON, Arc::new(converters::JsonConverter));
        registry.register(
            converters::CONTENT_PICKER,
            Arc::new(converters::ContentPickerConverter),
        );
        registry.register(
            converters::ELEMENT_LIST,
            Arc::new(converters::ElementListConverter),
        );
        registry
    }

    pub fn register(&mut self, editor_alias: &str, converter: Arc<dyn PropertyValueConverter>) {
        self.converters
            .insert(editor_alias.to_ascii_lowercase(), converter);
    }

    pub fn with(mut self, editor_alias: &str, converter: Arc<dyn PropertyValueConverter>) -> Self {
        self.register(editor_alias, converter);
        self
    }

    pub fn resolve(&self, editor_alias: &str) -> Arc<dyn PropertyValueConverter> {
        self.converters
            .get(&editor_alias.to_ascii_lowercase())
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    pub fn contains(&self, editor_alias: &str) -> bool {
        self.converters
            .contains_key(&editor_alias.to_ascii_lowercase())
    }
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut editors: Vec<&str> = self.converters.keys().map(String::as_str).collect();
        editors.sort_unstable();
        f.debug_struct("ConverterRegistry")
            .field("editors", &editors)
            .finish()
    }
}
