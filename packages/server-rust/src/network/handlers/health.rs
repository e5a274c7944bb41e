//! Health, liveness, readiness, and metrics endpoint handlers.
//!
//! These handlers expose node health information for orchestrators
//! (Kubernetes, load balancers) and operational monitoring.

use std::time::SystemTime;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gridmesh_core::NodeContext;
use serde_json::{json, Value};

use super::AppState;
use crate::lifecycle::HealthStatus;

/// Returns aggregated health with per-contributor entries as JSON.
///
/// Responds 503 when the aggregate is `Unhealthy` (or evaluation was
/// cancelled by shutdown), 200 otherwise. Each call also reconciles the
/// node stage between `Running` and `Degraded`.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let report = match state.aggregator.check_health(&state.shutdown.child_token()).await {
        Ok(report) => report,
        Err(err) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "node": node_json(&state.node),
                    "stage": state.controller.stage().as_str(),
                    "error": err.to_string(),
                })),
            );
        }
    };
    let stage = state.controller.reconcile_health(&report);

    let code = if report.status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        code,
        Json(json!({
            "node": node_json(&state.node),
            "stage": stage.as_str(),
            "status": report.status,
            "short_circuited": report.short_circuited,
            "entries": report.entries,
            "in_flight": state.controller.in_flight_count(),
            "uptime_secs": uptime_secs(&state.node),
        })),
    )
}

/// Kubernetes liveness probe -- always returns 200 OK.
///
/// The liveness probe only checks whether the process is running and
/// responsive. It intentionally does not check contributors or stage,
/// because a failed liveness probe triggers a pod restart.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Kubernetes readiness probe -- 200 when ready, 503 otherwise, with details.
///
/// Not ready while the node is not accepting work (before `Running`, or
/// once shutdown has begun) or when a required contributor is not ready.
pub async fn readiness_handler(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let stage = state.controller.stage();
    let report = match state.aggregator.check_readiness(&state.shutdown.child_token()).await {
        Ok(report) => report,
        Err(err) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "ready": false, "stage": stage.as_str(), "error": err.to_string() })),
            );
        }
    };

    let ready = state.controller.is_accepting() && report.ready;
    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(json!({
            "ready": ready,
            "stage": stage.as_str(),
            "entries": report.entries,
        })),
    )
}

/// Prometheus text exposition, or 404 when no recorder is installed.
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn node_json(node: &NodeContext) -> Value {
    json!({
        "node_id": node.node_id(),
        "studio_id": node.studio_id(),
        "environment": node.environment(),
        "version": node.version(),
        "host_name": node.host_name(),
        "process_id": node.process_id(),
        "started_at": node.started_at(),
        "tags": node.tags(),
    })
}

/// Whole seconds since the node context was created.
fn uptime_secs(node: &NodeContext) -> u64 {
    SystemTime::from(node.started_at())
        .elapsed()
        .map_or(0, |elapsed| elapsed.as_secs())
}
