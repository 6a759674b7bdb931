//! Tracing and metrics bootstrap for processes embedding the engine.
//! Libraries only emit; installing subscribers and exporters is left to the
//! process entry point.

use anyhow::{anyhow, Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::EngineConfig;

/// Install the global fmt subscriber filtered by `cfg.log_filter`. Fails on
/// a malformed filter or when a subscriber is already installed.
pub fn init_tracing(cfg: &EngineConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&cfg.log_filter).with_context(|| format!("invalid log filter {:?}", cfg.log_filter))?;
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init().map_err(|e| anyhow!(e))
}

/// Install the Prometheus exporter when `cfg.metrics_addr` is set.
/// Returns whether an exporter was installed.
pub fn init_metrics(cfg: &EngineConfig) -> Result<bool> {
    let Some(addr) = cfg.metrics_addr else { return Ok(false) };
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("install metrics exporter on {addr}"))?;
    info!(addr = %addr, "Prometheus metrics exporter listening");
    Ok(true)
}

/// Tracing first, so exporter failures are logged with the configured filter.
pub fn init(cfg: &EngineConfig) -> Result<()> {
    init_tracing(cfg)?;
    init_metrics(cfg)?;
    Ok(())
}
