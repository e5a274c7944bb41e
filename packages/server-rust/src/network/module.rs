//! Node server with deferred startup lifecycle.
//!
//! Implements the deferred startup pattern: `new()` creates resources,
//! `start()` binds the TCP listener, and `serve()` starts accepting
//! connections. Contributors can be registered on the aggregator between
//! `new()` and `serve()`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use gridmesh_core::NodeContext;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::NetworkConfig;
use super::context_layer::ContextLayer;
use super::handlers::{
    context_handler, health_handler, liveness_handler, metrics_handler, readiness_handler,
    AppState,
};
use super::middleware::build_http_layers;
use crate::lifecycle::{LifecycleAggregator, LifecycleController};

/// Manages the grid node HTTP lifecycle.
///
/// Follows the deferred startup pattern:
/// 1. `new()` -- allocates shared state (aggregator, lifecycle controller)
/// 2. `start()` -- binds TCP listener, moves the node to `Starting`
/// 3. `serve()` -- moves to `Running` and accepts connections until shutdown
///
/// The aggregator and controller are shared via `Arc` so other modules can
/// register contributors or observe the stage after construction.
pub struct NodeServer {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    node: Arc<NodeContext>,
    aggregator: Arc<LifecycleAggregator>,
    controller: Arc<LifecycleController>,
    shutdown: CancellationToken,
    metrics: Option<PrometheusHandle>,
}

impl NodeServer {
    /// Creates a new server without binding any port.
    #[must_use]
    pub fn new(node: Arc<NodeContext>, config: NetworkConfig) -> Self {
        Self {
            config,
            listener: None,
            controller: Arc::new(LifecycleController::new(Arc::clone(&node))),
            node,
            aggregator: Arc::new(LifecycleAggregator::new()),
            shutdown: CancellationToken::new(),
            metrics: None,
        }
    }

    /// Exposes `/metrics` using the given Prometheus handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    #[must_use]
    pub fn aggregator(&self) -> Arc<LifecycleAggregator> {
        Arc::clone(&self.aggregator)
    }

    #[must_use]
    pub fn controller(&self) -> Arc<LifecycleController> {
        Arc::clone(&self.controller)
    }

    /// Assembles the axum router with all routes and middleware.
    ///
    /// Routes:
    /// - `GET /health` -- aggregated health JSON
    /// - `GET /health/live` -- Kubernetes liveness probe
    /// - `GET /health/ready` -- Kubernetes readiness probe
    /// - `GET /metrics` -- Prometheus exposition
    /// - `GET /context` -- resolved request context, run as a unit of work
    pub fn build_router(&self) -> Router {
        let state = AppState {
            node: Arc::clone(&self.node),
            aggregator: Arc::clone(&self.aggregator),
            controller: Arc::clone(&self.controller),
            shutdown: self.shutdown.clone(),
            metrics: self.metrics.clone(),
        };

        let layers = build_http_layers(&self.config);

        let work = Router::new()
            .route("/context", get(context_handler))
            .route_layer(ContextLayer::new(Arc::clone(&self.controller)));

        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .merge(work)
            .layer(layers)
            .with_state(state)
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which may differ from the configured
    /// port when port 0 is used (OS-assigned ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        self.controller.mark_started();

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(err) => {
                self.controller.mark_failed(&err.to_string());
                return Err(err.into());
            }
        };
        let port = listener.local_addr()?.port();

        info!(
            node_id = %self.node.node_id(),
            "TCP listener bound to {}:{}", self.config.host, port
        );

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves requests until the `shutdown` future resolves.
    ///
    /// After the shutdown signal:
    /// 1. The node moves to `Stopping`; new units of work get 503
    /// 2. Background health reconciliation and running checks are cancelled
    /// 3. Waits up to `drain_timeout` for in-flight units of work
    /// 4. The node moves to `Stopped`
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first, or if the server
    /// hits a fatal I/O error (the node is then marked `Failed`).
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let router = self.build_router();
        let Some(listener) = self.listener else {
            anyhow::bail!("start() must be called before serve()");
        };
        let controller = self.controller;
        let token = self.shutdown;

        if let Some(interval) = self.config.health_interval {
            tokio::spawn(reconcile_loop(
                Arc::clone(&self.aggregator),
                Arc::clone(&controller),
                token.clone(),
                interval,
            ));
        }

        controller.mark_running();
        info!(node_id = %self.node.node_id(), "serving HTTP connections");

        let signal = {
            let controller = Arc::clone(&controller);
            let token = token.clone();
            async move {
                shutdown.await;
                controller.begin_shutdown();
                token.cancel();
            }
        };

        if let Err(err) = axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await
        {
            controller.mark_failed(&err.to_string());
            token.cancel();
            return Err(err.into());
        }

        let drained = controller.wait_for_drain(self.config.drain_timeout).await;
        if drained {
            info!("All in-flight work drained");
        } else {
            warn!(
                in_flight = controller.in_flight_count(),
                "Drain timeout expired with in-flight work remaining"
            );
        }
        Ok(())
    }
}

/// Periodically evaluates health and reconciles the node stage until cancelled.
async fn reconcile_loop(
    aggregator: Arc<LifecycleAggregator>,
    controller: Arc<LifecycleController>,
    cancel: CancellationToken,
    every: Duration,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match aggregator.check_health(&cancel).await {
            Ok(report) => {
                controller.reconcile_health(&report);
            }
            Err(err) => debug!(error = %err, "background health evaluation stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use gridmesh_core::{Environment, LifecycleStage, NodeDescriptor, NodeId, StudioId};

    use super::*;

    fn node() -> Arc<NodeContext> {
        Arc::new(NodeContext::new(NodeDescriptor {
            node_id: NodeId::new("node-a").unwrap(),
            studio_id: StudioId::new("studio-1").unwrap(),
            environment: Environment::new("test").unwrap(),
            version: "0.1.0".to_string(),
            host_name: "localhost".to_string(),
            tags: BTreeMap::new(),
        }))
    }

    fn local_config() -> NetworkConfig {
        NetworkConfig {
            host: "127.0.0.1".to_string(),
            health_interval: None,
            drain_timeout: Duration::from_secs(1),
            ..NetworkConfig::default()
        }
    }

    #[test]
    fn new_creates_server_without_binding() {
        let server = NodeServer::new(node(), NetworkConfig::default());
        assert!(server.listener.is_none());
        assert_eq!(server.controller().stage(), LifecycleStage::Initializing);
    }

    #[test]
    fn shared_handles_are_the_same_arc() {
        let server = NodeServer::new(node(), NetworkConfig::default());
        assert!(Arc::ptr_eq(&server.aggregator(), &server.aggregator()));
        assert!(Arc::ptr_eq(&server.controller(), &server.controller()));
    }

    #[test]
    fn build_router_creates_router() {
        let server = NodeServer::new(node(), NetworkConfig::default());
        let _router = server.build_router();
    }

    #[tokio::test]
    async fn start_binds_to_os_assigned_port() {
        let mut server = NodeServer::new(node(), local_config());
        let port = server.start().await.unwrap();
        assert!(port > 0, "OS-assigned port should be > 0");
        assert!(server.listener.is_some());
        assert_eq!(server.controller().stage(), LifecycleStage::Starting);
    }

    #[tokio::test]
    async fn serve_without_start_is_an_error() {
        let server = NodeServer::new(node(), local_config());
        let err = server.serve(std::future::pending::<()>()).await.unwrap_err();
        assert_eq!(err.to_string(), "start() must be called before serve()");
    }

    #[tokio::test]
    async fn serve_runs_until_shutdown_then_stops() {
        let node = node();
        let mut server = NodeServer::new(Arc::clone(&node), local_config());
        server.start().await.unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let mut stages = node.subscribe_stage();
        let handle = tokio::spawn(server.serve(async move {
            let _ = rx.await;
        }));

        while *stages.borrow_and_update() != LifecycleStage::Running {
            stages.changed().await.unwrap();
        }
        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
        assert_eq!(node.stage(), LifecycleStage::Stopped);
    }
}
