//! Cache key definitions.

use uuid::Uuid;

use crate::domain::types::{ItemKind, VariantKey};

/// Identifies one shared property value in the Elements-level cache.
///
/// Every culture/segment variant of a property gets its own key, so evicting an
/// element removes all of them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementsCacheKey {
    pub previewing: bool,
    pub element_key: Uuid,
    /// Lowercase property alias.
    pub alias: String,
    pub culture: String,
    pub segment: String,
}

impl ElementsCacheKey {
    pub fn new(previewing: bool, element_key: Uuid, alias: &str, variant: &VariantKey) -> Self {
        Self {
            previewing,
            element_key,
            alias: alias.to_lowercase(),
            culture: variant.culture.clone(),
            segment: variant.segment.clone(),
        }
    }
}

/// Which of a property's outputs a cache slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueSlot {
    Object,
    Delivery,
    DeliveryExpanded,
}

impl ValueSlot {
    pub fn delivery(expanding: bool) -> Self {
        if expanding {
            ValueSlot::DeliveryExpanded
        } else {
            ValueSlot::Delivery
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValueSlot::Object => "object",
            ValueSlot::Delivery => "delivery",
            ValueSlot::DeliveryExpanded => "delivery_expanded",
        }
    }
}

/// Identifies a materialized element in a snapshot's private cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotElementKey {
    pub kind: ItemKind,
    pub id: i32,
    pub previewing: bool,
}
