use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::application::{
    notifications::{METRIC_NOTIFICATIONS_CREATED, METRIC_NOTIFICATIONS_DEDUPLICATED},
    realtime::{METRIC_REALTIME_EVENTS, METRIC_REALTIME_SUBSCRIBERS},
    threads::{METRIC_LIKES_TOGGLED, METRIC_THREADS_CREATED},
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

pub const METRIC_HTTP_REQUEST_MS: &str = "threadline_http_request_ms";

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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_THREADS_CREATED,
            Unit::Count,
            "Threads and replies created, labelled by kind."
        );
        describe_counter!(
            METRIC_LIKES_TOGGLED,
            Unit::Count,
            "Like toggles, labelled by resulting state."
        );
        describe_counter!(
            METRIC_NOTIFICATIONS_CREATED,
            Unit::Count,
            "Notifications persisted, labelled by kind."
        );
        describe_counter!(
            METRIC_NOTIFICATIONS_DEDUPLICATED,
            Unit::Count,
            "Notifications suppressed because an unread duplicate was recent."
        );
        describe_counter!(
            METRIC_REALTIME_EVENTS,
            Unit::Count,
            "Realtime events published to the hub, labelled by channel."
        );
        describe_gauge!(
            METRIC_REALTIME_SUBSCRIBERS,
            Unit::Count,
            "Open realtime event streams."
        );
        describe_histogram!(
            METRIC_HTTP_REQUEST_MS,
            Unit::Milliseconds,
            "HTTP request latency in milliseconds, labelled by status class."
        );
    });
}
