//! Shared domain enumerations for published items and cache scopes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of published item a node or content type belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Document,
    Media,
    Member,
    /// Nested structures ("sets") that only exist inside another item's property.
    Element,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Document => "document",
            ItemKind::Media => "media",
            ItemKind::Member => "member",
            ItemKind::Element => "element",
        }
    }

    /// Kinds backed by a node store.
    pub const STORED: [ItemKind; 3] = [ItemKind::Document, ItemKind::Media, ItemKind::Member];
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scope a converted property value may be memoized in.
///
/// Variants are ordered from the scope that outlives everything (`None`, i.e.
/// recomputed) to the scope bound to a single element instance (`Element`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum CacheLevel {
    None,
    Snapshot,
    #[default]
    Elements,
    Element,
}

impl CacheLevel {
    /// `None` and `Snapshot` are never memoized.
    pub fn is_memoized(self) -> bool {
        matches!(self, CacheLevel::Elements | CacheLevel::Element)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CacheLevel::None => "none",
            CacheLevel::Snapshot => "snapshot",
            CacheLevel::Elements => "elements",
            CacheLevel::Element => "element",
        }
    }
}

impl fmt::Display for CacheLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Culture/segment pair identifying one variant of a property value.
///
/// The empty string stands for "invariant" on either axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct VariantKey {
    #[serde(default)]
    pub culture: String,
    #[serde(default)]
    pub segment: String,
}

impl VariantKey {
    pub fn new(culture: impl Into<String>, segment: impl Into<String>) -> Self {
        Self {
            culture: culture.into(),
            segment: segment.into(),
        }
    }

    pub fn invariant() -> Self {
        Self::default()
    }

    pub fn is_invariant(&self) -> bool {
        self.culture.is_empty() && self.segment.is_empty()
    }
}

/// Culture and segment active for reads that do not name one explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VariationContext {
    pub culture: String,
    pub segment: String,
}

impl VariationContext {
    pub fn new(culture: impl Into<String>, segment: impl Into<String>) -> Self {
        Self {
            culture: culture.into(),
            segment: segment.into(),
        }
    }

    pub fn resolve(&self, culture: Option<&str>, segment: Option<&str>) -> VariantKey {
        VariantKey::new(
            culture.unwrap_or(&self.culture),
            segment.unwrap_or(&self.segment),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_levels_order_from_recomputed_to_instance_bound() {
        assert!(CacheLevel::None < CacheLevel::Snapshot);
        assert!(CacheLevel::Snapshot < CacheLevel::Elements);
        assert!(CacheLevel::Elements < CacheLevel::Element);
    }

    #[test]
    fn only_elements_and_element_are_memoized() {
        assert!(!CacheLevel::None.is_memoized());
        assert!(!CacheLevel::Snapshot.is_memoized());
        assert!(CacheLevel::Elements.is_memoized());
        assert!(CacheLevel::Element.is_memoized());
    }

    #[test]
    fn variation_context_fills_missing_axes() {
        let context = VariationContext::new("en-US", "");
        assert_eq!(
            context.resolve(None, Some("mobile")),
            VariantKey::new("en-US", "mobile")
        );
        assert_eq!(context.resolve(Some("da"), None), VariantKey::new("da", ""));
    }

    #[test]
    fn item_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ItemKind::Document).expect("serialize kind");
        assert_eq!(json, "\"document\"");
    }
}
