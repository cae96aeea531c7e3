mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::{CountingConverter, PAGE_TYPE, definition, page_harness, text_values};
use published_cache::application::convert::ConverterRegistry;
use published_cache::domain::content_type::{ContentTypeRef, PropertyTypeDefinition};
use published_cache::domain::error::PublishedError;
use published_cache::domain::types::{CacheLevel, ItemKind, VariationContext};
use published_cache::published::{
    ContentTypeDescriptor, ElementContext, PublishedElement, PublishedSnapshotService,
};
use uuid::Uuid;

#[test]
fn elements_level_values_are_shared_across_element_instances() {
    let converter = CountingConverter::new(CacheLevel::Elements);
    let harness = page_harness(converter.clone());

    let first = harness.service.create_snapshot(None).expect("snapshot");
    let second = harness.service.create_snapshot(None).expect("snapshot");
    let a = first.content().get_by_id(1).expect("read").expect("home");
    let b = second.content().get_by_id(1).expect("read").expect("home");
    assert!(!Arc::ptr_eq(&a, &b), "each snapshot materializes its own element");

    let value_a = a.get_property("title").expect("title").get_value().expect("value");
    let value_b = b.get_property("title").expect("title").get_value().expect("value");

    assert!(Arc::ptr_eq(&value_a, &value_b));
    assert_eq!(value_a.as_text(), Some("HOME"));
    assert_eq!(converter.object_calls(), 1);
}

#[test]
fn later_elements_skip_the_intermediate_stage_once_shared() {
    let converter = CountingConverter::new(CacheLevel::Elements);
    let harness = page_harness(converter.clone());

    let snapshots: Vec<_> = (0..3)
        .map(|_| harness.service.create_snapshot(None).expect("snapshot"))
        .collect();
    for snapshot in &snapshots {
        let home = snapshot.content().get_by_id(1).expect("read").expect("home");
        let title = home.get_property("title").expect("title").get_value().expect("value");
        assert_eq!(title.as_text(), Some("HOME"));
    }

    assert_eq!(converter.inter_calls(), 1);
    assert_eq!(converter.object_calls(), 1);
}

#[test]
fn element_level_values_are_never_shared_between_instances() {
    let converter = CountingConverter::new(CacheLevel::Element);
    let harness = page_harness(converter.clone());

    let first = harness.service.create_snapshot(None).expect("snapshot");
    let second = harness.service.create_snapshot(None).expect("snapshot");
    let a = first.content().get_by_id(1).expect("read").expect("home");
    let b = second.content().get_by_id(1).expect("read").expect("home");

    let value_a = a.get_property("title").expect("title").get_value().expect("value");
    let again_a = a.get_property("title").expect("title").get_value().expect("value");
    let value_b = b.get_property("title").expect("title").get_value().expect("value");

    assert!(Arc::ptr_eq(&value_a, &again_a));
    assert!(!Arc::ptr_eq(&value_a, &value_b));
    assert_eq!(value_a.as_text(), value_b.as_text());
    assert_eq!(converter.object_calls(), 2);
    assert!(harness.service.elements_cache().is_empty());
}

#[test]
fn shared_level_is_clamped_inside_a_short_lived_container() {
    let converter = CountingConverter::new(CacheLevel::Elements);
    let harness = page_harness(converter.clone());
    let snapshot = harness.service.create_snapshot(None).expect("snapshot");
    let content_type = snapshot
        .content_types()
        .get(ItemKind::Document, &ContentTypeRef::Id(PAGE_TYPE))
        .expect("page type");

    let key = Uuid::new_v4();
    let nested = |reference_level| {
        PublishedElement::with_context(
            content_type.clone(),
            key,
            text_values(&[("title", "nested")]),
            false,
            ElementContext {
                snapshot: Some(snapshot.accessor()),
                reference_level,
                variation: VariationContext::default(),
            },
        )
        .expect("nested element")
    };

    let a = nested(CacheLevel::Element);
    let b = nested(CacheLevel::Element);
    let value_a = a.get_property("title").expect("title").get_value().expect("value");
    let value_b = b.get_property("title").expect("title").get_value().expect("value");

    assert!(!Arc::ptr_eq(&value_a, &value_b));
    assert_eq!(converter.object_calls(), 2);
    assert!(
        harness.service.elements_cache().is_empty(),
        "nothing may leak into the shared cache"
    );

    let shared = nested(CacheLevel::Elements);
    shared.get_property("title").expect("title").get_value().expect("value");
    assert_eq!(harness.service.elements_cache().len(), 1);
}

#[test]
fn repeated_reads_reuse_the_first_conversion() {
    let converter = CountingConverter::new(CacheLevel::Elements);
    let harness = page_harness(converter.clone());
    let snapshot = harness.service.create_snapshot(None).expect("snapshot");
    let home = snapshot.content().get_by_id(1).expect("read").expect("home");
    let title = home.get_property("title").expect("title");

    let first = title.get_value().expect("value");
    let second = title.get_value().expect("value");

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(converter.inter_calls(), 1);
    assert_eq!(converter.object_calls(), 1);
}

#[test]
fn concurrent_first_reads_convert_once() {
    const THREADS: usize = 8;
    let converter = CountingConverter::new(CacheLevel::Elements);
    let harness = page_harness(converter.clone());
    let snapshot = harness.service.create_snapshot(None).expect("snapshot");
    let home = snapshot.content().get_by_id(1).expect("read").expect("home");
    let barrier = Barrier::new(THREADS);

    let values: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    home.get_property("title")
                        .expect("title")
                        .get_value()
                        .expect("value")
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("reader thread"))
            .collect()
    });

    assert_eq!(converter.object_calls(), 1);
    assert_eq!(converter.inter_calls(), 1);
    assert!(values.iter().all(|value| Arc::ptr_eq(value, &values[0])));
}

#[test]
fn uncached_properties_convert_on_every_read() {
    let converter = CountingConverter::new(CacheLevel::None);
    let registry = ConverterRegistry::with_builtins().with("counting", converter.clone());
    let content_type = Arc::new(
        ContentTypeDescriptor::build(
            definition(
                20,
                "note",
                vec![PropertyTypeDefinition::new("title", 3, "counting")],
            ),
            &registry,
        )
        .expect("content type"),
    );

    let element = PublishedElement::new(
        content_type,
        Uuid::new_v4(),
        text_values(&[("title", "Hi")]),
        false,
    )
    .expect("element without snapshot");
    let title = element.get_property("title").expect("title");

    assert_eq!(title.get_value().expect("value").as_text(), Some("HI"));
    assert_eq!(title.get_value().expect("value").as_text(), Some("HI"));
    assert_eq!(converter.object_calls(), 2);
    assert_eq!(converter.inter_calls(), 1);
}

#[test]
fn empty_key_is_rejected() {
    let registry = ConverterRegistry::with_builtins();
    let content_type = Arc::new(
        ContentTypeDescriptor::build(definition(20, "note", Vec::new()), &registry)
            .expect("content type"),
    );

    let result = PublishedElement::new(content_type, Uuid::nil(), text_values(&[]), false);
    assert!(matches!(result, Err(PublishedError::Configuration { .. })));
}

#[test]
fn snapshot_level_properties_need_a_snapshot_accessor() {
    let converter = CountingConverter::new(CacheLevel::Snapshot);
    let registry = ConverterRegistry::with_builtins().with("counting", converter);
    let content_type = Arc::new(
        ContentTypeDescriptor::build(
            definition(
                20,
                "note",
                vec![PropertyTypeDefinition::new("title", 3, "counting")],
            ),
            &registry,
        )
        .expect("content type"),
    );

    let result = PublishedElement::new(
        content_type,
        Uuid::new_v4(),
        text_values(&[("title", "Hi")]),
        false,
    );
    assert!(matches!(result, Err(PublishedError::Configuration { .. })));
}

#[test]
fn failed_conversions_are_retried_and_do_not_affect_other_properties() {
    let converter = CountingConverter::failing(CacheLevel::Elements, 1);
    let harness = page_harness(converter.clone());
    let snapshot = harness.service.create_snapshot(None).expect("snapshot");
    let home = snapshot.content().get_by_id(1).expect("read").expect("home");

    let failed = home.get_property("title").expect("title").get_value();
    match failed {
        Err(PublishedError::Conversion { alias, .. }) => assert_eq!(alias, "title"),
        other => panic!("expected conversion error, got {other:?}"),
    }

    let body = home.get_property("body").expect("body").get_value().expect("body");
    assert_eq!(body.as_text(), Some("Welcome"));

    let retried = home.get_property("title").expect("title").get_value().expect("retry");
    assert_eq!(retried.as_text(), Some("HOME"));
    assert_eq!(converter.object_calls(), 2);
}

#[test]
fn has_value_short_circuits_on_blank_sources() {
    let converter = CountingConverter::new(CacheLevel::Elements);
    let harness = page_harness(converter.clone());
    harness.repository.upsert_node(common::published_node(
        3,
        PAGE_TYPE,
        "Blank",
        text_values(&[("title", "   "), ("body", "text")]),
    ));
    let snapshot = harness.service.create_snapshot(None).expect("snapshot");
    let blank = snapshot.content().get_by_id(3).expect("read").expect("blank");

    assert!(!blank.get_property("title").expect("title").has_value().expect("has value"));
    assert!(blank.get_property("body").expect("body").has_value().expect("has value"));
    assert_eq!(converter.inter_calls(), 0);
    assert!(blank.get_property("missing").is_none());
}

#[test]
fn has_value_settles_on_the_intermediate_value_when_the_converter_can() {
    let converter = CountingConverter::deciding_at_inter(CacheLevel::Elements);
    let harness = page_harness(converter.clone());
    let snapshot = harness.service.create_snapshot(None).expect("snapshot");
    let home = snapshot.content().get_by_id(1).expect("read").expect("home");
    let title = home.get_property("title").expect("title");

    assert!(title.has_value().expect("has value"));
    assert_eq!(converter.inter_calls(), 1);
    assert_eq!(converter.object_calls(), 0);

    assert_eq!(title.get_value().expect("value").as_text(), Some("HOME"));
    assert_eq!(converter.inter_calls(), 1);
    assert_eq!(converter.object_calls(), 1);
}

#[test]
fn has_value_falls_back_to_the_shared_object_value() {
    let converter = CountingConverter::new(CacheLevel::Elements);
    let harness = page_harness(converter.clone());
    let first = harness.service.create_snapshot(None).expect("snapshot");
    let home = first.content().get_by_id(1).expect("read").expect("home");

    assert!(home.get_property("title").expect("title").has_value().expect("has value"));
    assert_eq!(converter.inter_calls(), 1);
    assert_eq!(converter.object_calls(), 1);

    let value = home.get_property("title").expect("title").get_value().expect("value");
    let second = harness.service.create_snapshot(None).expect("snapshot");
    let other = second.content().get_by_id(1).expect("read").expect("home");
    let shared = other.get_property("title").expect("title").get_value().expect("value");

    assert!(Arc::ptr_eq(&value, &shared));
    assert_eq!(converter.inter_calls(), 1);
    assert_eq!(converter.object_calls(), 1);
}
