use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install the global subscriber. Logs go to stderr; stdout is left to child
/// processes and command output.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "pageship_prune_deleted_total",
            Unit::Count,
            "Deployments deleted by the pruner, labelled by branch role."
        );
        describe_counter!(
            "pageship_prune_delete_failed_total",
            Unit::Count,
            "Deployment deletions that failed, labelled by branch role."
        );
        describe_counter!(
            "pageship_warm_fetch_total",
            Unit::Count,
            "Warm-up fetches issued, labelled by pass."
        );
        describe_counter!(
            "pageship_warm_fetch_failed_total",
            Unit::Count,
            "Warm-up fetches that failed or returned a non-success status."
        );
        describe_counter!(
            "pageship_run_superseded_total",
            Unit::Count,
            "In-flight runs cancelled by a newer push to the same branch."
        );
        describe_histogram!(
            "pageship_step_ms",
            Unit::Milliseconds,
            "Wall-clock duration of each pipeline step in milliseconds."
        );
    });
}
