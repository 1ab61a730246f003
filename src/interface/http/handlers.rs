use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::application::{CircuitBreakerStats, DegradationStatus, ProcessSupervisor};
use crate::domain::{HealthState, ProcessStatus};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<ProcessSupervisor>,
}

/// Response for /api/health
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_state: Option<HealthState>,
    pub restart_count: u64,
    pub error_count: u64,
}

/// Response for /api/processes
#[derive(Debug, Serialize)]
pub struct ProcessesResponse {
    pub timestamp: String,
    pub processes: Vec<ProcessStatus>,
}

/// Response for /api/circuits
#[derive(Debug, Serialize)]
pub struct CircuitsResponse {
    pub timestamp: String,
    pub circuits: Vec<CircuitBreakerStats>,
}

fn not_found(message: String) -> Response {
    (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": message }))).into_response()
}

/// Handler for GET /api/health
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let supervisor = &state.supervisor;
    let (code, status) = if supervisor.is_shutting_down() {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting_down")
    } else {
        (StatusCode::OK, "running")
    };

    (
        code,
        Json(HealthResponse {
            status,
            service: "vigil",
            version: env!("CARGO_PKG_VERSION"),
            health_state: supervisor.latest_snapshot().map(|s| s.health_state),
            restart_count: supervisor.restart_count(),
            error_count: supervisor.error_count(),
        }),
    )
}

/// Handler for GET /api/snapshot
pub async fn snapshot_handler(State(state): State<AppState>) -> Response {
    match state.supervisor.latest_snapshot() {
        Some(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        None => not_found("no health snapshot taken yet".to_string()),
    }
}

/// Handler for GET /api/processes
pub async fn processes_handler(State(state): State<AppState>) -> Json<ProcessesResponse> {
    Json(ProcessesResponse {
        timestamp: chrono::Utc::now().to_rfc3339(),
        processes: state.supervisor.list_processes(),
    })
}

/// Handler for GET /api/processes/{name}
pub async fn process_handler(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.supervisor.process_status(&name) {
        Some(status) => (StatusCode::OK, Json(status)).into_response(),
        None => not_found(format!("process '{}' not found", name)),
    }
}

/// Handler for GET /api/circuits
pub async fn circuits_handler(State(state): State<AppState>) -> Json<CircuitsResponse> {
    Json(CircuitsResponse {
        timestamp: chrono::Utc::now().to_rfc3339(),
        circuits: state.supervisor.circuit_stats(),
    })
}

/// Handler for GET /api/degradation
pub async fn degradation_handler(State(state): State<AppState>) -> Json<DegradationStatus> {
    Json(state.supervisor.degradation_status())
}
