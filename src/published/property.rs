//! Published properties and the Source → Intermediate → Object pipeline.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use metrics::counter;
use tracing::debug;

use crate::application::convert::{ConversionContext, StageValue};
use crate::cache::elements::SlotOrigin;
use crate::cache::keys::{ElementsCacheKey, ValueSlot};
use crate::cache::lock::mutex_lock;
use crate::domain::error::{ConversionError, PublishedError};
use crate::domain::types::{CacheLevel, VariantKey};

use super::cache_level::effective_cache_level;
use super::content_type::PropertyTypeDescriptor;
use super::element::PublishedElement;
use super::snapshot::PublishedSnapshot;
use super::value::{ObjectValue, PropertySource, PublishedValue};

const SOURCE: &str = "published::property";
const METRIC_CONVERSION: &str = "pubcache_conversion_total";
const METRIC_CONVERSION_ERROR: &str = "pubcache_conversion_error_total";

/// One property of a [`PublishedElement`]: the stored value plus its lazily
/// converted forms.
///
/// The stored value never changes. Everything derived from it is memoized per
/// variant under a single per-property lock, so two readers of the same
/// property never convert twice. Values shared through the Elements-level
/// cache are converted outside that lock.
pub struct PublishedProperty {
    index: usize,
    source: PropertySource,
    state: Mutex<PropertyState>,
}

#[derive(Default)]
struct PropertyState {
    inter: HashMap<VariantKey, ObjectValue>,
    instance: HashMap<VariantKey, InstanceValues>,
    has_value: HashMap<VariantKey, bool>,
}

/// Element-scoped outputs of one variant.
#[derive(Default)]
struct InstanceValues {
    object: Option<ObjectValue>,
    delivery: Option<ObjectValue>,
    delivery_expanded: Option<ObjectValue>,
}

impl InstanceValues {
    fn slot(&mut self, slot: ValueSlot) -> &mut Option<ObjectValue> {
        match slot {
            ValueSlot::Object => &mut self.object,
            ValueSlot::Delivery => &mut self.delivery,
            ValueSlot::DeliveryExpanded => &mut self.delivery_expanded,
        }
    }
}

impl PublishedProperty {
    pub(crate) fn new(index: usize, source: PropertySource) -> Self {
        Self {
            index,
            source,
            state: Mutex::new(PropertyState::default()),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn source(&self) -> &PropertySource {
        &self.source
    }

    /// Reads the object or a delivery value of one variant.
    pub(crate) fn value(
        &self,
        element: &PublishedElement,
        variant: VariantKey,
        slot: ValueSlot,
    ) -> Result<ObjectValue, PublishedError> {
        let property_type = element.property_type_at(self.index);
        let variant = property_type.variant_for(variant);
        let declared = match slot {
            ValueSlot::Object => property_type.cache_level,
            ValueSlot::Delivery | ValueSlot::DeliveryExpanded => {
                property_type.delivery_cache_level
            }
        };
        let effective = effective_cache_level(declared, element.reference_level());

        match effective.level {
            CacheLevel::None | CacheLevel::Snapshot => {
                let inter = self.inter(element, property_type, &variant, effective.reference)?;
                self.convert(
                    element,
                    property_type,
                    &variant,
                    effective.reference,
                    slot,
                    &inter,
                    element.snapshot(),
                )
            }
            CacheLevel::Element => self.instance_value(
                element,
                property_type,
                variant,
                effective.reference,
                slot,
            ),
            CacheLevel::Elements => {
                let Some(snapshot) = element.snapshot() else {
                    debug!(
                        target_module = SOURCE,
                        element_key = %element.key(),
                        property = %property_type.alias,
                        "No live snapshot for a shared value; caching on the element"
                    );
                    return self.instance_value(
                        element,
                        property_type,
                        variant,
                        effective.reference,
                        slot,
                    );
                };
                let key = ElementsCacheKey::new(
                    element.previewing(),
                    element.key(),
                    &property_type.alias,
                    &variant,
                );
                let origin = SlotOrigin {
                    kind: element.content_type().kind,
                    data_type_id: property_type.data_type_id,
                };
                let elements = Arc::clone(snapshot.elements_scope());
                elements.get_or_try_init(key, origin, slot, || {
                    let inter =
                        self.inter(element, property_type, &variant, effective.reference)?;
                    self.convert(
                        element,
                        property_type,
                        &variant,
                        effective.reference,
                        slot,
                        &inter,
                        Some(snapshot),
                    )
                })
            }
        }
    }

    /// Three-stage short circuit: source, then intermediate, then object.
    pub(crate) fn has_value(
        &self,
        element: &PublishedElement,
        variant: VariantKey,
    ) -> Result<bool, PublishedError> {
        let property_type = element.property_type_at(self.index);
        let variant = property_type.variant_for(variant);
        let converter = property_type.converter();
        let effective = effective_cache_level(property_type.cache_level, element.reference_level());

        {
            let mut state = mutex_lock(&self.state, SOURCE, "has_value");
            if let Some(known) = state.has_value.get(&variant) {
                return Ok(*known);
            }
            if let Some(known) = converter.is_value(StageValue::Source(self.source.resolve(&variant)))
            {
                state.has_value.insert(variant, known);
                return Ok(known);
            }
            let inter = self.inter_locked(
                &mut state,
                element,
                property_type,
                &variant,
                effective.reference,
            )?;
            if let Some(known) = converter.is_value(StageValue::Inter(&inter)) {
                state.has_value.insert(variant, known);
                return Ok(known);
            }
        }

        let object = self.value(element, variant.clone(), ValueSlot::Object)?;
        let known = converter
            .is_value(StageValue::Object(&object))
            .unwrap_or(!object.is_null());
        if effective.level.is_memoized() {
            mutex_lock(&self.state, SOURCE, "has_value").has_value.insert(variant, known);
        }
        Ok(known)
    }

    fn instance_value(
        &self,
        element: &PublishedElement,
        property_type: &PropertyTypeDescriptor,
        variant: VariantKey,
        reference: CacheLevel,
        slot: ValueSlot,
    ) -> Result<ObjectValue, PublishedError> {
        let mut state = mutex_lock(&self.state, SOURCE, "instance_value");
        if let Some(cached) = state
            .instance
            .get_mut(&variant)
            .and_then(|values| values.slot(slot).clone())
        {
            return Ok(cached);
        }
        let inter = self.inter_locked(&mut state, element, property_type, &variant, reference)?;
        let value = self.convert(
            element,
            property_type,
            &variant,
            reference,
            slot,
            &inter,
            element.snapshot(),
        )?;
        *state.instance.entry(variant).or_default().slot(slot) = Some(Arc::clone(&value));
        Ok(value)
    }

    fn inter(
        &self,
        element: &PublishedElement,
        property_type: &PropertyTypeDescriptor,
        variant: &VariantKey,
        reference: CacheLevel,
    ) -> Result<ObjectValue, PublishedError> {
        let mut state = mutex_lock(&self.state, SOURCE, "inter");
        self.inter_locked(&mut state, element, property_type, variant, reference)
    }

    fn inter_locked(
        &self,
        state: &mut PropertyState,
        element: &PublishedElement,
        property_type: &PropertyTypeDescriptor,
        variant: &VariantKey,
        reference: CacheLevel,
    ) -> Result<ObjectValue, PublishedError> {
        if let Some(inter) = state.inter.get(variant) {
            return Ok(Arc::clone(inter));
        }
        let ctx = ConversionContext {
            element,
            property_type,
            reference_level: reference,
            previewing: element.previewing(),
            variant,
            snapshot: element.snapshot(),
        };
        let inter = property_type
            .converter()
            .source_to_inter(&ctx, self.source.resolve(variant))
            .map_err(|err| conversion_failed(property_type, "inter", err))?;
        counter!(METRIC_CONVERSION, "stage" => "inter").increment(1);

        let inter = Arc::new(inter);
        state.inter.insert(variant.clone(), Arc::clone(&inter));
        Ok(inter)
    }

    #[allow(clippy::too_many_arguments)]
    fn convert(
        &self,
        element: &PublishedElement,
        property_type: &PropertyTypeDescriptor,
        variant: &VariantKey,
        reference: CacheLevel,
        slot: ValueSlot,
        inter: &PublishedValue,
        snapshot: Option<PublishedSnapshot>,
    ) -> Result<ObjectValue, PublishedError> {
        let ctx = ConversionContext {
            element,
            property_type,
            reference_level: reference,
            previewing: element.previewing(),
            variant,
            snapshot,
        };
        let converter = property_type.converter();
        let converted = match slot {
            ValueSlot::Object => converter.inter_to_object(&ctx, inter),
            ValueSlot::Delivery => converter.inter_to_delivery_object(&ctx, inter, false),
            ValueSlot::DeliveryExpanded => converter.inter_to_delivery_object(&ctx, inter, true),
        };
        match converted {
            Ok(value) => {
                counter!(METRIC_CONVERSION, "stage" => slot.as_str()).increment(1);
                Ok(Arc::new(value))
            }
            Err(err) => Err(conversion_failed(property_type, slot.as_str(), err)),
        }
    }
}

fn conversion_failed(
    property_type: &PropertyTypeDescriptor,
    stage: &'static str,
    err: ConversionError,
) -> PublishedError {
    counter!(METRIC_CONVERSION_ERROR, "stage" => stage).increment(1);
    debug!(
        target_module = SOURCE,
        property = %property_type.alias,
        stage,
        error = %err,
        "Property conversion failed"
    );
    PublishedError::conversion(property_type.alias.clone(), err.message)
}

impl std::fmt::Debug for PublishedProperty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishedProperty")
            .field("index", &self.index)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}
