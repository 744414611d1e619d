//! Structured logging configuration.

use crate::config::LoggingSettings;
use crate::{Error, Result};
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directive.
pub const LOG_ENV: &str = "MNEMOS_LOG";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, multi-line.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(Error::InvalidInput(format!("Unknown log format: {other}"))),
        }
    }
}

/// Resolved logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Event filter.
    pub filter: EnvFilter,
    /// Log file; stderr when unset.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds the filter from `MNEMOS_LOG`, then `RUST_LOG`, then settings.
    ///
    /// `verbose` lowers the default level to `debug` but never overrides an
    /// explicit environment filter.
    #[must_use]
    pub fn from_settings(settings: &LoggingSettings, verbose: bool) -> Self {
        let default_directive = if verbose { "mnemos=debug,info" } else { "info" };
        let directive = std::env::var(LOG_ENV)
            .ok()
            .or_else(|| std::env::var(EnvFilter::DEFAULT_ENV).ok())
            .filter(|v| !v.trim().is_empty())
            .or_else(|| (!verbose).then(|| settings.filter.clone()).flatten())
            .unwrap_or_else(|| default_directive.to_string());

        let filter = EnvFilter::try_new(&directive).unwrap_or_else(|e| {
            #[allow(clippy::print_stderr)]
            {
                eprintln!("mnemos: invalid log filter {directive:?} ({e}), using {default_directive}");
            }
            EnvFilter::new(default_directive)
        });

        Self {
            format: settings.format,
            filter,
            file: settings.file.clone(),
        }
    }
}
