//! Process-wide logging and metrics installation.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogFormat;

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `default_filter`.
///
/// # Errors
///
/// Returns an error if the filter does not parse or a global subscriber is
/// already installed.
pub fn init_tracing(default_filter: &str, format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_filter))?;
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true).with_span_list(false))
            .try_init()?,
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).try_init()?,
    }
    Ok(())
}

/// Installs the global Prometheus recorder and returns its render handle.
///
/// # Errors
///
/// Returns an error if a global recorder is already installed.
pub fn install_metrics_recorder() -> anyhow::Result<PrometheusHandle> {
    Ok(PrometheusBuilder::new().install_recorder()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_subscriber_install_fails() {
        let _ = init_tracing("debug", LogFormat::Text);
        assert!(init_tracing("debug", LogFormat::Json).is_err());
    }

    #[test]
    fn recorder_renders_context_counters() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!("gridmesh_context_mapped_total", "transport" => "http").increment(2);
        });
        let rendered = handle.render();
        assert!(rendered.contains("gridmesh_context_mapped_total"));
        assert!(rendered.contains("transport=\"http\""));
    }
}
