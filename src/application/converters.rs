//! Built-in converters for the stock property editors.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;

use crate::domain::content_type::ContentTypeRef;
use crate::domain::error::ConversionError;
use crate::domain::types::{CacheLevel, ItemKind};
use crate::published::element::{ElementContext, PublishedElement};
use crate::published::value::{PropertyValues, PublishedValue, SourceValue};

use super::convert::{ConversionContext, PropertyValueConverter, StageValue, default_is_value};

pub const TEXT: &str = "text";
pub const INTEGER: &str = "integer";
pub const JSON: &str = "json";
pub const CONTENT_PICKER: &str = "content-picker";
pub const ELEMENT_LIST: &str = "element-list";

/// Hands the source through unchanged. Used for editors without a converter.
pub struct PassthroughConverter;

impl PropertyValueConverter for PassthroughConverter {
    fn source_to_inter(
        &self,
        _ctx: &ConversionContext<'_>,
        source: Option<&SourceValue>,
    ) -> Result<PublishedValue, ConversionError> {
        Ok(source.map_or(PublishedValue::Null, |value| {
            PublishedValue::Json(value.clone())
        }))
    }

    fn inter_to_object(
        &self,
        _ctx: &ConversionContext<'_>,
        inter: &PublishedValue,
    ) -> Result<PublishedValue, ConversionError> {
        Ok(inter.clone())
    }
}

pub struct TextConverter;

impl PropertyValueConverter for TextConverter {
    fn source_to_inter(
        &self,
        _ctx: &ConversionContext<'_>,
        source: Option<&SourceValue>,
    ) -> Result<PublishedValue, ConversionError> {
        match source {
            None | Some(SourceValue::Null) => Ok(PublishedValue::Null),
            Some(SourceValue::String(text)) => Ok(PublishedValue::Text(text.clone())),
            Some(SourceValue::Number(number)) => Ok(PublishedValue::Text(number.to_string())),
            Some(SourceValue::Bool(flag)) => Ok(PublishedValue::Text(flag.to_string())),
            Some(other) => Err(ConversionError::new(format!(
                "expected text, found {other}"
            ))),
        }
    }

    fn inter_to_object(
        &self,
        _ctx: &ConversionContext<'_>,
        inter: &PublishedValue,
    ) -> Result<PublishedValue, ConversionError> {
        Ok(inter.clone())
    }
}

pub struct IntegerConverter;

impl PropertyValueConverter for IntegerConverter {
    fn source_to_inter(
        &self,
        _ctx: &ConversionContext<'_>,
        source: Option<&SourceValue>,
    ) -> Result<PublishedValue, ConversionError> {
        match source {
            None | Some(SourceValue::Null) => Ok(PublishedValue::Null),
            Some(SourceValue::Number(number)) => number
                .as_i64()
                .map(PublishedValue::Integer)
                .ok_or_else(|| ConversionError::new(format!("`{number}` is not an integer"))),
            Some(SourceValue::String(text)) if text.trim().is_empty() => Ok(PublishedValue::Null),
            Some(SourceValue::String(text)) => text
                .trim()
                .parse::<i64>()
                .map(PublishedValue::Integer)
                .map_err(|err| ConversionError::new(format!("`{text}` is not an integer: {err}"))),
            Some(other) => Err(ConversionError::new(format!(
                "expected an integer, found {other}"
            ))),
        }
    }

    fn inter_to_object(
        &self,
        _ctx: &ConversionContext<'_>,
        inter: &PublishedValue,
    ) -> Result<PublishedValue, ConversionError> {
        Ok(inter.clone())
    }
}

/// Structured data. Stored either as JSON or as a JSON-encoded string.
pub struct JsonConverter;

impl PropertyValueConverter for JsonConverter {
    fn cache_level(&self) -> CacheLevel {
        CacheLevel::Element
    }

    fn source_to_inter(
        &self,
        _ctx: &ConversionContext<'_>,
        source: Option<&SourceValue>,
    ) -> Result<PublishedValue, ConversionError> {
        match source {
            None | Some(SourceValue::Null) => Ok(PublishedValue::Null),
            Some(SourceValue::String(text)) if text.trim().is_empty() => Ok(PublishedValue::Null),
            Some(SourceValue::String(text)) => serde_json::from_str(text)
                .map(PublishedValue::Json)
                .map_err(|err| ConversionError::new(format!("invalid json: {err}"))),
            Some(value) => Ok(PublishedValue::Json(value.clone())),
        }
    }

    fn inter_to_object(
        &self,
        _ctx: &ConversionContext<'_>,
        inter: &PublishedValue,
    ) -> Result<PublishedValue, ConversionError> {
        Ok(inter.clone())
    }
}

/// Picks another document by id and resolves it through the active snapshot.
///
/// The target can be republished at any time, so the object value is never memoized.
pub struct ContentPickerConverter;

impl PropertyValueConverter for ContentPickerConverter {
    fn cache_level(&self) -> CacheLevel {
        CacheLevel::Snapshot
    }

    fn source_to_inter(
        &self,
        _ctx: &ConversionContext<'_>,
        source: Option<&SourceValue>,
    ) -> Result<PublishedValue, ConversionError> {
        let id = match source {
            None | Some(SourceValue::Null) => return Ok(PublishedValue::Null),
            Some(SourceValue::Number(number)) => number.as_i64(),
            Some(SourceValue::String(text)) if text.trim().is_empty() => {
                return Ok(PublishedValue::Null);
            }
            Some(SourceValue::String(text)) => text.trim().parse::<i64>().ok(),
            Some(_) => None,
        };
        id.and_then(|id| i32::try_from(id).ok())
            .map(PublishedValue::Reference)
            .ok_or_else(|| ConversionError::new("picked value is not a node id"))
    }

    fn inter_to_object(
        &self,
        ctx: &ConversionContext<'_>,
        inter: &PublishedValue,
    ) -> Result<PublishedValue, ConversionError> {
        let PublishedValue::Reference(id) = inter else {
            return Ok(PublishedValue::Null);
        };
        let Some(snapshot) = ctx.snapshot.as_ref() else {
            return Ok(PublishedValue::Null);
        };
        let picked = snapshot
            .content()
            .get_by_id(*id)
            .map_err(|err| ConversionError::new(err.to_string()))?;
        Ok(picked.map_or(PublishedValue::Null, PublishedValue::Element))
    }

    fn inter_to_delivery_object(
        &self,
        ctx: &ConversionContext<'_>,
        inter: &PublishedValue,
        expanding: bool,
    ) -> Result<PublishedValue, ConversionError> {
        if !expanding {
            return Ok(inter.clone());
        }
        let object = self.inter_to_object(ctx, inter)?;
        Ok(match object {
            PublishedValue::Element(element) => PublishedValue::Json(element.to_json()),
            other => other,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ElementItem {
    content_type: String,
    key: Uuid,
    #[serde(default)]
    values: HashMap<String, SourceValue>,
}

/// A list of nested elements ("sets"), each with its own element type.
pub struct ElementListConverter;

impl PropertyValueConverter for ElementListConverter {
    fn cache_level(&self) -> CacheLevel {
        CacheLevel::Element
    }

    fn is_value(&self, value: StageValue<'_>) -> Option<bool> {
        match value {
            StageValue::Source(Some(SourceValue::Array(items))) => Some(!items.is_empty()),
            other => default_is_value(other),
        }
    }

    fn source_to_inter(
        &self,
        _ctx: &ConversionContext<'_>,
        source: Option<&SourceValue>,
    ) -> Result<PublishedValue, ConversionError> {
        let value = match source {
            None | Some(SourceValue::Null) => return Ok(PublishedValue::List(Vec::new())),
            Some(SourceValue::String(text)) => serde_json::from_str::<SourceValue>(text)
                .map_err(|err| ConversionError::new(format!("invalid element list: {err}")))?,
            Some(value) => value.clone(),
        };
        if !value.is_array() {
            return Err(ConversionError::new("element list must be an array"));
        }
        Ok(PublishedValue::Json(value))
    }

    fn inter_to_object(
        &self,
        ctx: &ConversionContext<'_>,
        inter: &PublishedValue,
    ) -> Result<PublishedValue, ConversionError> {
        let PublishedValue::Json(value) = inter else {
            return Ok(PublishedValue::Elements(Vec::new()));
        };
        let items: Vec<ElementItem> = serde_json::from_value(value.clone())
            .map_err(|err| ConversionError::new(format!("invalid element list: {err}")))?;
        let Some(snapshot) = ctx.snapshot.as_ref() else {
            return Err(ConversionError::new(
                "element list needs an active snapshot to resolve element types",
            ));
        };

        let mut elements = Vec::with_capacity(items.len());
        for item in items {
            let content_type = snapshot
                .content_types()
                .get(ItemKind::Element, &ContentTypeRef::Alias(item.content_type))
                .map_err(|err| ConversionError::new(err.to_string()))?;
            let context = ElementContext {
                snapshot: ctx.element.snapshot_accessor(),
                reference_level: ctx.reference_level,
                variation: ctx.element.variation().clone(),
            };
            let element = PublishedElement::with_context(
                content_type,
                item.key,
                PropertyValues::from(item.values),
                ctx.previewing,
                context,
            )
            .map_err(|err| ConversionError::new(err.to_string()))?;
            elements.push(Arc::new(element));
        }
        Ok(PublishedValue::Elements(elements))
    }
}
