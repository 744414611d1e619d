//! Prometheus metrics.

use crate::config::MetricsSettings;
use crate::{Error, Result};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Metrics configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsConfig {
    /// Whether metrics are recorded at all.
    pub enabled: bool,
    /// Address of the scrape endpoint.
    pub listen_addr: SocketAddr,
}

impl MetricsConfig {
    /// Builds metrics configuration from settings with env overrides.
    #[must_use]
    pub fn from_settings(settings: &MetricsSettings) -> Self {
        let mut config = Self {
            enabled: settings.enabled,
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), settings.port),
        };

        if let Some(enabled) = parse_bool_env("MNEMOS_METRICS_ENABLED") {
            config.enabled = enabled;
        }
        if let Some(port) = parse_port_env("MNEMOS_METRICS_PORT") {
            config.listen_addr.set_port(port);
        }
        config
    }
}

/// Installs the Prometheus recorder.
///
/// With `expose`, the exporter also serves `/metrics` on
/// `config.listen_addr` from its own background thread, and no render
/// handle is returned. Without it, the returned handle renders the current
/// snapshot on demand.
///
/// # Errors
///
/// Returns an error if a recorder is already installed or the listener
/// cannot bind.
pub fn install_prometheus(config: &MetricsConfig, expose: bool) -> Result<Option<PrometheusHandle>> {
    if !config.enabled {
        return Ok(None);
    }

    let builder = PrometheusBuilder::new();
    let handle = if expose {
        builder
            .with_http_listener(config.listen_addr)
            .install()
            .map_err(|e| install_error(&e))?;
        tracing::info!(addr = %config.listen_addr, "Prometheus listener started");
        None
    } else {
        Some(builder.install_recorder().map_err(|e| install_error(&e))?)
    };
    Ok(handle)
}

fn install_error(e: &BuildError) -> Error {
    Error::OperationFailed {
        operation: "metrics_recorder_install".to_string(),
        cause: e.to_string(),
    }
}

fn parse_bool_env(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|value| {
        let value = value.to_lowercase();
        value == "true" || value == "1" || value == "yes"
    })
}

fn parse_port_env(key: &str) -> Option<u16> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_installs_nothing() {
        let config = MetricsConfig {
            enabled: false,
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        };
        assert!(install_prometheus(&config, false).unwrap().is_none());
    }

    #[test]
    fn test_from_settings_uses_port() {
        let config = MetricsConfig::from_settings(&MetricsSettings {
            enabled: true,
            port: 9464,
        });
        if std::env::var("MNEMOS_METRICS_PORT").is_err() {
            assert_eq!(config.listen_addr.port(), 9464);
        }
    }
}
