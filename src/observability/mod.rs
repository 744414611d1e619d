//! Observability and telemetry.
//!
//! Installs the `tracing` subscriber (pretty or JSON, stderr or a log file)
//! and, when enabled, the Prometheus recorder behind the `metrics` facade.

mod logging;
mod metrics;

pub use logging::{LOG_ENV, LogFormat, LoggingConfig};
pub use metrics::{MetricsConfig, install_prometheus};

use crate::config::MnemosConfig;
use crate::{Error, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::Subscriber;
use tracing_subscriber::Layer;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

/// Full observability configuration.
#[derive(Debug)]
pub struct ObservabilityConfig {
    /// Logging configuration.
    pub logging: LoggingConfig,
    /// Metrics configuration.
    pub metrics: MetricsConfig,
    /// Whether to expose metrics via HTTP listener.
    pub metrics_expose: bool,
}

/// Options from the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct InitOptions {
    /// Whether verbose output was requested.
    pub verbose: bool,
    /// Whether to expose metrics via HTTP listener.
    pub metrics_expose: bool,
}

/// Keeps observability components alive for the process.
pub struct ObservabilityHandle {
    metrics_handle: Option<PrometheusHandle>,
}

impl ObservabilityHandle {
    /// Renders the current metrics snapshot, if a local recorder is installed.
    #[must_use]
    pub fn render_metrics(&self) -> Option<String> {
        self.metrics_handle.as_ref().map(PrometheusHandle::render)
    }
}

impl Drop for ObservabilityHandle {
    fn drop(&mut self) {
        if let Some(rendered) = self.render_metrics() {
            tracing::debug!(metrics = %rendered, "Final metrics snapshot");
        }
    }
}

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initializes observability from loaded configuration.
///
/// # Errors
///
/// Returns an error if observability has already been initialized or if any
/// component fails to initialize.
pub fn init_from_config(config: &MnemosConfig, options: InitOptions) -> Result<ObservabilityHandle> {
    init(ObservabilityConfig {
        logging: LoggingConfig::from_settings(&config.logging, options.verbose),
        metrics: MetricsConfig::from_settings(&config.metrics),
        metrics_expose: options.metrics_expose,
    })
}

/// Initializes logging and metrics for the process.
///
/// Only the first successful call takes effect.
///
/// # Errors
///
/// Returns an error if observability has already been initialized or if any
/// component fails to initialize.
pub fn init(config: ObservabilityConfig) -> Result<ObservabilityHandle> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return Err(init_error("observability already initialized"));
    }
    let installed = install(config);
    if installed.is_err() {
        INITIALIZED.store(false, Ordering::SeqCst);
    }
    installed
}

fn install(config: ObservabilityConfig) -> Result<ObservabilityHandle> {
    let ObservabilityConfig {
        logging,
        metrics,
        metrics_expose,
    } = config;

    let (writer, ansi) = match &logging.file {
        Some(path) => (BoxMakeWriter::new(open_log_file(path)?), false),
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };
    tracing_subscriber::registry()
        .with(logging.filter)
        .with(fmt_layer(logging.format, writer, ansi))
        .try_init()
        .map_err(|e| init_error(e.to_string()))?;

    let metrics_handle = install_prometheus(&metrics, metrics_expose)?;
    Ok(ObservabilityHandle { metrics_handle })
}

/// Builds the event formatter for `format`.
fn fmt_layer<S>(format: LogFormat, writer: BoxMakeWriter, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_ansi(ansi)
            .with_target(!ansi)
            .with_writer(writer)
            .boxed(),
    }
}

/// Opens `path` for appending, creating its directory first.
fn open_log_file(path: &Path) -> Result<Arc<File>> {
    let log_error = |operation: &str, e: std::io::Error| Error::OperationFailed {
        operation: operation.to_string(),
        cause: format!("{}: {e}", path.display()),
    };
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| log_error("create_log_dir", e))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(Arc::new)
        .map_err(|e| log_error("open_log_file", e))
}

fn init_error(cause: impl Into<String>) -> Error {
    Error::OperationFailed {
        operation: "observability_init".to_string(),
        cause: cause.into(),
    }
}
