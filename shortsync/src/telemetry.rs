use crate::config::{CommonConfig, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use shared::metrics_defs::{MetricDef, describe_all};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

const METRIC_DEFS: &[&[MetricDef]] = &[
    dsc_client::metrics_defs::ALL_METRICS,
    scheduler::metrics_defs::ALL_METRICS,
    notifier::metrics_defs::ALL_METRICS,
    gateway::metrics_defs::ALL_METRICS,
];

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("invalid sentry dsn: {0}")]
    SentryDsn(String),
    #[error("could not install tracing subscriber: {0}")]
    Subscriber(String),
    #[error("could not build statsd recorder: {0}")]
    Statsd(String),
    #[error("a metrics recorder is already installed")]
    RecorderInstalled,
}

/// Keeps the sentry client alive; events are flushed when this is dropped.
pub struct Telemetry {
    _sentry: Option<sentry::ClientInitGuard>,
}

/// Sets up logging, error reporting and metrics for the process.
///
/// Must run before the tokio runtime starts so sentry can hook the panic
/// handler and bind its hub to the main thread.
pub fn init(config: &CommonConfig) -> Result<Telemetry, TelemetryError> {
    let sentry = config.logging.as_ref().map(init_sentry).transpose()?;
    let sentry_layer = sentry
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_layer)
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))?;

    if let Some(metrics) = &config.metrics {
        init_metrics(metrics)?;
    }

    Ok(Telemetry { _sentry: sentry })
}

fn init_sentry(config: &LoggingConfig) -> Result<sentry::ClientInitGuard, TelemetryError> {
    let dsn = config
        .sentry_dsn
        .parse::<sentry::types::Dsn>()
        .map_err(|e| TelemetryError::SentryDsn(e.to_string()))?;

    Ok(sentry::init(sentry::ClientOptions {
        dsn: Some(dsn),
        release: sentry::release_name!(),
        ..Default::default()
    }))
}

fn init_metrics(config: &MetricsConfig) -> Result<(), TelemetryError> {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some(&config.prefix))
        .map_err(|e| TelemetryError::Statsd(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|_| TelemetryError::RecorderInstalled)?;

    for defs in METRIC_DEFS {
        describe_all(defs);
    }
    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "statsd metrics enabled"
    );
    Ok(())
}
