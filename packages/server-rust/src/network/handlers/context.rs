//! Diagnostic endpoint echoing the resolved inbound context.

use axum::http::StatusCode;
use axum::Json;
use gridmesh_core::ambient;
use serde_json::{json, Value};

/// Returns the ambient grid and operation context of this request.
///
/// Baggage is filtered before it is echoed. Responds 500 if the route is
/// mounted without the context layer.
pub async fn context_handler() -> (StatusCode, Json<Value>) {
    let Some(current) = ambient::current() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "no ambient context" })),
        );
    };
    let request = match current.grid.request() {
        Ok(request) => request,
        Err(err) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": err.to_string() })),
            );
        }
    };

    (
        StatusCode::OK,
        Json(json!({
            "tags": current.operation.enrichment_tags(),
            "baggage": request.baggage.filtered(),
            "created_at": request.created_at,
            "operation_started_at": current.operation.started_at(),
        })),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use gridmesh_core::ambient::run_unit_of_work;
    use gridmesh_core::{
        Baggage, CorrelationId, Environment, GridContext, NodeId, RequestData, StudioId,
    };

    use super::*;

    #[tokio::test]
    async fn without_ambient_context_is_500() {
        let (code, _) = context_handler().await;
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn echoes_ambient_context_with_filtered_baggage() {
        let grid = Arc::new(GridContext::new(
            NodeId::new("node-a").unwrap(),
            StudioId::new("studio-1").unwrap(),
            Environment::new("test").unwrap(),
        ));
        let mut baggage = Baggage::new();
        baggage.insert("region", "eu");
        baggage.insert("session-token", "t0k");
        let data = RequestData::new(CorrelationId::new("corr-1").unwrap()).with_baggage(baggage);
        grid.initialize(data).unwrap();

        let (code, Json(body)) = run_unit_of_work(grid, "GET /context", |_| async {
            Ok::<_, String>(context_handler().await)
        })
        .await
        .unwrap();

        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["tags"]["grid.correlation_id"], "corr-1");
        assert_eq!(body["tags"]["operation.name"], "GET /context");
        assert_eq!(body["baggage"]["region"], "eu");
        assert!(body["baggage"].get("session-token").is_none());
    }
}
