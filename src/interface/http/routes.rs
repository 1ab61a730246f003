use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::application::ProcessSupervisor;

use super::handlers::{
    circuits_handler, degradation_handler, health_handler, process_handler, processes_handler,
    snapshot_handler, AppState,
};

pub fn create_router(supervisor: Arc<ProcessSupervisor>) -> Router {
    let state = AppState { supervisor };

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/snapshot", get(snapshot_handler))
        .route("/api/processes", get(processes_handler))
        .route("/api/processes/{name}", get(process_handler))
        .route("/api/circuits", get(circuits_handler))
        .route("/api/degradation", get(degradation_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::application::{ResourceMonitor, SupervisorDeps};
    use crate::config::SupervisorConfig;
    use crate::domain::ProcessSpec;
    use crate::testing::{FakeLauncher, FakeProcessSource, FakeStateStore, FakeSystemSource};

    fn supervisor() -> Arc<ProcessSupervisor> {
        let config = SupervisorConfig::default();
        let processes = Arc::new(FakeProcessSource::new());
        let monitor = ResourceMonitor::new(&config, Arc::new(FakeSystemSource::new()), processes.clone());
        Arc::new(ProcessSupervisor::new(
            config,
            SupervisorDeps {
                launcher: Arc::new(FakeLauncher::new()),
                process_source: processes,
                store: Arc::new(FakeStateStore::new()),
                monitor,
                notifier: None,
            },
        ))
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn health_reports_running() {
        let (status, body) = get_json(create_router(supervisor()), "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "running");
        assert_eq!(body["service"], "vigil");
        assert!(body.get("health_state").is_none());
    }

    #[tokio::test]
    async fn snapshot_is_404_until_first_sample() {
        let supervisor = supervisor();
        let (status, _) = get_json(create_router(supervisor.clone()), "/api/snapshot").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        supervisor.sample_tick().await.unwrap();
        let (status, body) = get_json(create_router(supervisor), "/api/snapshot").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sequence"], 1);
        assert_eq!(body["health_state"], "HEALTHY");
    }

    #[tokio::test]
    async fn processes_lists_registered_workers() {
        let supervisor = supervisor();
        supervisor.start(ProcessSpec::new("web", "/usr/bin/web"), None).await.unwrap();

        let (status, body) = get_json(create_router(supervisor.clone()), "/api/processes").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["processes"][0]["name"], "web");
        assert_eq!(body["processes"][0]["state"], "running");

        let (status, body) = get_json(create_router(supervisor.clone()), "/api/processes/web").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pid"], 1000);

        let (status, _) = get_json(create_router(supervisor), "/api/processes/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn circuits_include_webhook_breaker() {
        let (status, body) = get_json(create_router(supervisor()), "/api/circuits").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["circuits"][0]["name"], "webhook");
        assert_eq!(body["circuits"][0]["state"], "CLOSED");
    }

    #[tokio::test]
    async fn degradation_starts_with_every_step_pending() {
        let (status, body) = get_json(create_router(supervisor()), "/api/degradation").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["applied_steps"].as_array().unwrap().len(), 0);
        assert_eq!(body["pending_steps"][0], "reduce_monitoring_frequency");
        assert_eq!(body["emergency_mode"], false);
    }
}
