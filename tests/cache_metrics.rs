mod common;

use std::collections::HashSet;

use common::{CountingConverter, page_harness};
use metrics_util::debugging::DebuggingRecorder;
use published_cache::cache::{
    CancellationFlag, DataTypeChangePayload, NotificationPayload, TreeChangePayload,
};
use published_cache::domain::types::CacheLevel;
use published_cache::published::PublishedSnapshotService;
use serial_test::serial;

#[test]
#[serial]
fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let converter = CountingConverter::failing(CacheLevel::Elements, 1);
    let harness = page_harness(converter);
    let snapshot = harness.service.create_snapshot(None).expect("snapshot");
    let home = snapshot.content().get_by_id(1).expect("read").expect("home");

    // conversion error, then miss, then hit
    assert!(home.value("title").is_err());
    home.value("title").expect("converted");
    let second = harness.service.create_snapshot(None).expect("snapshot");
    let shared = second.content().get_by_id(1).expect("read").expect("home");
    shared.value("title").expect("shared");

    // queue length, notify latency, eviction
    harness
        .service
        .queue()
        .publish(NotificationPayload::Content(vec![TreeChangePayload::refresh_all()]));
    harness
        .service
        .queue()
        .publish(NotificationPayload::DataTypes(vec![DataTypeChangePayload::refreshed(1)]));
    assert_eq!(harness.service.process_notifications(), 2);

    harness
        .service
        .collect(&CancellationFlag::new())
        .expect("collect");

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "pubcache_elements_hit_total",
        "pubcache_elements_miss_total",
        "pubcache_elements_evict_total",
        "pubcache_conversion_total",
        "pubcache_conversion_error_total",
        "pubcache_notification_queue_len",
        "pubcache_notify_ms",
        "pubcache_collect_ms",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
