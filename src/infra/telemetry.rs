use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::{
    METRIC_COALESCED_TOTAL, METRIC_EVICT_TOTAL, METRIC_HIT_TOTAL, METRIC_INVALIDATE_TOTAL,
    METRIC_MISS_TOTAL, METRIC_OVERSIZED_TOTAL, METRIC_PRELOAD_MS, METRIC_RESIDENT_BYTES,
    METRIC_SET_TOTAL,
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for every query cache metric with the installed recorder.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_HIT_TOTAL,
            Unit::Count,
            "Total number of query cache hits."
        );
        describe_counter!(
            METRIC_MISS_TOTAL,
            Unit::Count,
            "Total number of query cache misses, including expired entries."
        );
        describe_counter!(
            METRIC_EVICT_TOTAL,
            Unit::Count,
            "Total number of entries evicted to stay within the byte budget."
        );
        describe_counter!(
            METRIC_SET_TOTAL,
            Unit::Count,
            "Total number of results stored in the query cache."
        );
        describe_counter!(
            METRIC_INVALIDATE_TOTAL,
            Unit::Count,
            "Total number of entries removed by invalidation or clear."
        );
        describe_counter!(
            METRIC_COALESCED_TOTAL,
            Unit::Count,
            "Total number of requests that joined an in-flight fetch."
        );
        describe_counter!(
            METRIC_OVERSIZED_TOTAL,
            Unit::Count,
            "Total number of results too large to cache."
        );
        describe_gauge!(
            METRIC_RESIDENT_BYTES,
            Unit::Bytes,
            "Approximate bytes currently held by the query cache."
        );
        describe_histogram!(
            METRIC_PRELOAD_MS,
            Unit::Milliseconds,
            "Cache preload latency in milliseconds."
        );
    });
}
