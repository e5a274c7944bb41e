//! Grid node entry point.

use std::sync::Arc;

use clap::Parser;
use gridmesh_core::NodeContext;
use gridmesh_server::{telemetry, NodeConfig, NodeServer};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = NodeConfig::parse();
    telemetry::init_tracing(&config.log_level, config.log_format)?;

    let node = Arc::new(NodeContext::new(config.descriptor()?));
    info!(
        node_id = %node.node_id(),
        studio_id = %node.studio_id(),
        environment = %node.environment(),
        version = node.version(),
        "starting grid node"
    );

    let mut server = NodeServer::new(Arc::clone(&node), config.network());
    if !config.disable_metrics {
        server = server.with_metrics(telemetry::install_metrics_recorder()?);
    }

    let port = server.start().await?;
    info!(port, "grid node listening");

    if let Err(err) = server.serve(shutdown_signal()).await {
        error!(error = %err, "grid node stopped with an error");
        return Err(err);
    }
    info!(stage = %node.stage(), "grid node stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("shutdown signal received");
}
