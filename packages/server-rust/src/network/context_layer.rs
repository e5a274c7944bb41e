//! Tower middleware that runs each request as a grid unit of work.
//!
//! For every admitted request the layer:
//! 1. maps the inbound headers into a [`GridContext`] for the local node
//! 2. runs the inner service inside [`run_unit_of_work`], which makes the
//!    context ambient and records the operation outcome
//! 3. binds a child context onto the response headers, so callers see the
//!    correlation id and the operation that produced the response
//!
//! Requests arriving while the node is not accepting work get a 503.

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use gridmesh_core::ambient::run_unit_of_work;
use gridmesh_core::{GridContext, OperationContext, UnitOfWorkError};
use serde_json::json;
use tower::{Layer, Service};
use tracing::warn;

use crate::lifecycle::LifecycleController;
use crate::transport::HttpTransport;

// ---------------------------------------------------------------------------
// ContextLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ContextLayer {
    controller: Arc<LifecycleController>,
}

impl ContextLayer {
    #[must_use]
    pub fn new(controller: Arc<LifecycleController>) -> Self {
        Self { controller }
    }
}

impl<S> Layer<S> for ContextLayer {
    type Service = ContextService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ContextService {
            inner,
            controller: Arc::clone(&self.controller),
        }
    }
}

// ---------------------------------------------------------------------------
// ContextService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ContextService<S> {
    inner: S,
    controller: Arc<LifecycleController>,
}

impl<S> Service<Request<Body>> for ContextService<S>
where
    S: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        // The ready service is the one that must handle this request.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let controller = Arc::clone(&self.controller);

        Box::pin(async move {
            if !controller.is_accepting() {
                return Ok(not_accepting(&controller));
            }
            let _in_flight = controller.in_flight_guard();

            let grid = Arc::new(HttpTransport::map_headers(request.headers(), controller.node()));
            request.extensions_mut().insert(Arc::clone(&grid));
            let name = format!("{} {}", request.method(), request.uri().path());

            let outcome = run_unit_of_work(grid, &name, move |operation| async move {
                let mut response = match inner.call(request).await {
                    Ok(response) => response,
                    Err(never) => match never {},
                };
                bind_response(&mut response, &operation);
                if response.status().is_server_error() {
                    Err(ServerError(response))
                } else {
                    Ok(response)
                }
            })
            .await;

            Ok(match outcome {
                Ok(response) | Err(UnitOfWorkError::Failed(ServerError(response))) => response,
                Err(UnitOfWorkError::Context(err)) => {
                    warn!(error = %err, "request context unavailable");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!({ "error": err.to_string() })),
                    )
                        .into_response()
                }
            })
        })
    }
}

/// A 5xx response, carried through the unit of work as its failure.
#[derive(Debug)]
struct ServerError(Response);

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler responded {}", self.0.status())
    }
}

/// Binds the operation's child context so the response names its cause.
fn bind_response(response: &mut Response, operation: &OperationContext) {
    let child = match operation.derive_child() {
        Ok(child) => child,
        Err(err) => {
            warn!(error = %err, "cannot derive response context");
            return;
        }
    };
    if let Err(err) = HttpTransport::bind_headers(response.headers_mut(), &child) {
        warn!(error = %err, "failed to bind response context");
    }
}

fn not_accepting(controller: &LifecycleController) -> Response {
    let stage = controller.stage();
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "error": "node is not accepting work",
            "stage": stage.as_str(),
        })),
    )
        .into_response()
}

/// The request's grid context, inserted into request extensions by [`ContextLayer`].
pub type RequestContext = axum::Extension<Arc<GridContext>>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use gridmesh_core::ambient::current_grid;
    use gridmesh_core::headers;
    use gridmesh_core::{Environment, NodeContext, NodeDescriptor, NodeId, StudioId};
    use tower::ServiceExt;

    use super::*;

    fn controller() -> Arc<LifecycleController> {
        let node = NodeContext::new(NodeDescriptor {
            node_id: NodeId::new("node-a").unwrap(),
            studio_id: StudioId::new("studio-1").unwrap(),
            environment: Environment::new("test").unwrap(),
            version: "0.1.0".to_string(),
            host_name: "localhost".to_string(),
            tags: BTreeMap::new(),
        });
        let controller = Arc::new(LifecycleController::new(Arc::new(node)));
        controller.mark_running();
        controller
    }

    /// Echoes the ambient correlation id in the body.
    async fn echo(_request: Request<Body>) -> Result<Response, Infallible> {
        let correlation = current_grid()
            .and_then(|grid| grid.correlation_id().ok())
            .map(|id| id.to_string())
            .unwrap_or_default();
        Ok(correlation.into_response())
    }

    async fn failing(_request: Request<Body>) -> Result<Response, Infallible> {
        Ok(StatusCode::BAD_GATEWAY.into_response())
    }

    fn request(correlation: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/context");
        if let Some(correlation) = correlation {
            builder = builder.header(headers::CORRELATION_ID, correlation);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn header(response: &Response, name: &str) -> Option<String> {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    #[tokio::test]
    async fn handler_sees_inbound_correlation() {
        let service = ContextLayer::new(controller()).layer(tower::service_fn(echo));
        let response = service.oneshot(request(Some("corr-42"))).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, headers::CORRELATION_ID).as_deref(), Some("corr-42"));
        assert_eq!(header(&response, headers::NODE_ID).as_deref(), Some("node-a"));
        assert!(header(&response, headers::CAUSATION_ID).is_some());

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"corr-42");
    }

    #[tokio::test]
    async fn missing_correlation_is_generated_and_echoed() {
        let service = ContextLayer::new(controller()).layer(tower::service_fn(echo));
        let response = service.oneshot(request(None)).await.unwrap();

        let correlation = header(&response, headers::CORRELATION_ID).unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, correlation.as_bytes());
    }

    #[tokio::test]
    async fn server_errors_pass_through_with_context() {
        let service = ContextLayer::new(controller()).layer(tower::service_fn(failing));
        let response = service.oneshot(request(Some("corr-1"))).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(header(&response, headers::CORRELATION_ID).as_deref(), Some("corr-1"));
    }

    #[tokio::test]
    async fn stopping_node_rejects_work() {
        let controller = controller();
        controller.begin_shutdown();
        let service = ContextLayer::new(Arc::clone(&controller)).layer(tower::service_fn(echo));
        let response = service.oneshot(request(Some("corr-1"))).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(controller.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn in_flight_is_released_after_response() {
        let controller = controller();
        let service = ContextLayer::new(Arc::clone(&controller)).layer(tower::service_fn(echo));
        let _ = service.oneshot(request(None)).await.unwrap();
        assert_eq!(controller.in_flight_count(), 0);
    }
}
