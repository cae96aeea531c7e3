//! Logging and metric descriptions for the pubcache binary.

use std::io;
use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

const COUNTERS: [(&str, &str); 5] = [
    (
        "pubcache_elements_hit_total",
        "Elements-level cache reads served from a memoized value, by slot.",
    ),
    (
        "pubcache_elements_miss_total",
        "Elements-level cache reads that had to convert, by slot.",
    ),
    (
        "pubcache_elements_evict_total",
        "Elements-level cache entries removed, by reason.",
    ),
    (
        "pubcache_conversion_total",
        "Property value conversions performed, by stage.",
    ),
    (
        "pubcache_conversion_error_total",
        "Property value conversions that failed, by stage.",
    ),
];

const HISTOGRAMS: [(&str, &str); 2] = [
    (
        "pubcache_notify_ms",
        "Time spent applying one notification batch, by payload kind.",
    ),
    (
        "pubcache_collect_ms",
        "Time spent in one collection pass.",
    ),
];

/// Install the global subscriber. Log lines go to stderr so command output on
/// stdout stays machine readable.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(io::stderr)
            .with_target(false)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| InfraError::telemetry(format!("tracing subscriber already set: {err}")))
}

/// Register units and help text with whichever metrics recorder is installed.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        for (name, help) in COUNTERS {
            describe_counter!(name, Unit::Count, help);
        }
        describe_gauge!(
            "pubcache_notification_queue_len",
            Unit::Count,
            "Change notifications waiting to be applied."
        );
        for (name, help) in HISTOGRAMS {
            describe_histogram!(name, Unit::Milliseconds, help);
        }
    });
}
