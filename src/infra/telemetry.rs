use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::{
    METRIC_EVICT_TOTAL, METRIC_HIT_TOTAL, METRIC_MISS_TOTAL, METRIC_REMOTE_ERROR_TOTAL,
    METRIC_RENDER_MS, METRIC_REVALIDATION_TOTAL, METRIC_STALE_HIT_TOTAL,
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
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
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

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_HIT_TOTAL,
            Unit::Count,
            "Total number of requests served from a fresh entry."
        );
        describe_counter!(
            METRIC_STALE_HIT_TOTAL,
            Unit::Count,
            "Total number of requests served from a stale entry."
        );
        describe_counter!(
            METRIC_MISS_TOTAL,
            Unit::Count,
            "Total number of requests rendered synchronously."
        );
        describe_counter!(
            METRIC_REVALIDATION_TOTAL,
            Unit::Count,
            "Total number of finished regenerations, labelled by outcome."
        );
        describe_counter!(
            METRIC_EVICT_TOTAL,
            Unit::Count,
            "Total number of local entries evicted due to capacity."
        );
        describe_counter!(
            METRIC_REMOTE_ERROR_TOTAL,
            Unit::Count,
            "Total number of remote tier operations that failed, labelled by op."
        );
        describe_histogram!(
            METRIC_RENDER_MS,
            Unit::Milliseconds,
            "Render latency in milliseconds, labelled by path."
        );
    });
}
