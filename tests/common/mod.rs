#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use published_cache::application::convert::{
    ConversionContext, ConverterRegistry, PropertyValueConverter, StageValue, default_is_value,
};
use published_cache::application::repos::DurableCacheStore;
use published_cache::cache::CacheConfig;
use published_cache::domain::content_type::{ContentTypeDefinition, PropertyTypeDefinition};
use published_cache::domain::error::ConversionError;
use published_cache::domain::nodes::{ContentData, RawNode};
use published_cache::domain::types::{CacheLevel, ItemKind};
use published_cache::infra::memory::InMemoryRepository;
use published_cache::published::{
    DefaultSnapshotService, PropertyValues, PublishedValue, ServiceDeps, SourceValue,
};
use uuid::Uuid;

pub const PAGE_TYPE: i32 = 10;
pub const ARTICLE_TYPE: i32 = 11;
pub const TEXT_DATA_TYPE: i32 = 1;
pub const SHARED_DATA_TYPE: i32 = 42;

/// Converter with a configurable level that counts every call.
pub struct CountingConverter {
    level: CacheLevel,
    pub inter_calls: AtomicUsize,
    pub object_calls: AtomicUsize,
    /// The next `fail_times` object conversions fail.
    fail_times: AtomicUsize,
    /// A non-null intermediate value settles `has_value` without an object.
    inter_decides: bool,
}

impl CountingConverter {
    pub fn new(level: CacheLevel) -> Arc<Self> {
        Arc::new(Self {
            level,
            inter_calls: AtomicUsize::new(0),
            object_calls: AtomicUsize::new(0),
            fail_times: AtomicUsize::new(0),
            inter_decides: false,
        })
    }

    pub fn deciding_at_inter(level: CacheLevel) -> Arc<Self> {
        Arc::new(Self {
            level,
            inter_calls: AtomicUsize::new(0),
            object_calls: AtomicUsize::new(0),
            fail_times: AtomicUsize::new(0),
            inter_decides: true,
        })
    }

    pub fn failing(level: CacheLevel, times: usize) -> Arc<Self> {
        let converter = Self::new(level);
        converter.fail_times.store(times, Ordering::SeqCst);
        converter
    }

    pub fn inter_calls(&self) -> usize {
        self.inter_calls.load(Ordering::SeqCst)
    }

    pub fn object_calls(&self) -> usize {
        self.object_calls.load(Ordering::SeqCst)
    }
}

impl PropertyValueConverter for CountingConverter {
    fn cache_level(&self) -> CacheLevel {
        self.level
    }

    fn is_value(&self, value: StageValue<'_>) -> Option<bool> {
        match value {
            StageValue::Inter(inter) if self.inter_decides => Some(!inter.is_null()),
            other => default_is_value(other),
        }
    }

    fn source_to_inter(
        &self,
        _ctx: &ConversionContext<'_>,
        source: Option<&SourceValue>,
    ) -> Result<PublishedValue, ConversionError> {
        self.inter_calls.fetch_add(1, Ordering::SeqCst);
        Ok(match source.and_then(SourceValue::as_str) {
            Some(text) => PublishedValue::Text(text.to_string()),
            None => PublishedValue::Null,
        })
    }

    fn inter_to_object(
        &self,
        _ctx: &ConversionContext<'_>,
        inter: &PublishedValue,
    ) -> Result<PublishedValue, ConversionError> {
        self.object_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_times
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ConversionError::new("converter unavailable"));
        }
        Ok(match inter.as_text() {
            Some(text) => PublishedValue::Text(text.to_uppercase()),
            None => PublishedValue::Null,
        })
    }
}

pub fn text_values(pairs: &[(&str, &str)]) -> PropertyValues {
    pairs.iter().fold(PropertyValues::new(), |values, (alias, text)| {
        values.with(alias, SourceValue::from(*text))
    })
}

pub fn published_node(id: i32, content_type_id: i32, name: &str, values: PropertyValues) -> RawNode {
    RawNode::new(id, ItemKind::Document, content_type_id)
        .with_published(ContentData::new(name, 1, values))
}

pub fn definition(id: i32, alias: &str, properties: Vec<PropertyTypeDefinition>) -> ContentTypeDefinition {
    ContentTypeDefinition {
        id,
        key: Uuid::new_v4(),
        alias: alias.to_string(),
        kind: ItemKind::Document,
        properties,
    }
}

/// Service over an in-memory repository with the given converters registered.
pub struct Harness {
    pub repository: Arc<InMemoryRepository>,
    pub service: DefaultSnapshotService,
}

impl Harness {
    pub fn new(repository: InMemoryRepository, converters: ConverterRegistry) -> Self {
        Self::with_side_store(repository, converters, None)
    }

    pub fn with_side_store(
        repository: InMemoryRepository,
        converters: ConverterRegistry,
        side_store: Option<Arc<dyn DurableCacheStore>>,
    ) -> Self {
        let repository = Arc::new(repository);
        let deps = ServiceDeps {
            content: repository.clone(),
            content_types: repository.clone(),
            domains: repository.clone(),
            side_store,
            converters,
        };
        Self {
            repository,
            service: DefaultSnapshotService::new(CacheConfig::default(), deps),
        }
    }
}

/// A "page" type with a `title` on the counting editor and a `body` on the text
/// editor, plus two published pages.
pub fn page_harness(converter: Arc<CountingConverter>) -> Harness {
    let repository = InMemoryRepository::new();
    repository.upsert_content_type(definition(
        PAGE_TYPE,
        "page",
        vec![
            PropertyTypeDefinition::new("title", SHARED_DATA_TYPE, "counting"),
            PropertyTypeDefinition::new("body", TEXT_DATA_TYPE, "text"),
        ],
    ));
    repository.upsert_node(published_node(
        1,
        PAGE_TYPE,
        "Home",
        text_values(&[("title", "home"), ("body", "Welcome")]),
    ));
    repository.upsert_node(published_node(
        2,
        PAGE_TYPE,
        "About",
        text_values(&[("title", "about"), ("body", "About us")]),
    ));
    let converters = ConverterRegistry::with_builtins().with("counting", converter);
    Harness::new(repository, converters)
}
