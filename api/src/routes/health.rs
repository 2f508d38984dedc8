use axum::extract::State;
use axum::{Json, Router, routing::get};

use crate::HealthResponse;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Liveness plus whether an external auditor is wired in
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let config = state.orchestrator.config();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        mode: config.mode.as_str().to_string(),
        auditor_configured: config.auditor.is_configured(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use dosegate_core::config::LayerConfig;
    use dosegate_runtime::Orchestrator;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_reports_mode_and_auditor() {
        let state = AppState::new(
            Orchestrator::from_config(LayerConfig::default()).expect("orchestrator should build"),
        );
        let response = router()
            .with_state(state)
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should read");
        let body: serde_json::Value = serde_json::from_slice(&bytes).expect("body should be json");
        assert_eq!(body["status"], "ok");
        assert_eq!(body["mode"], "SOFT_MODULATION");
        assert_eq!(body["auditor_configured"], false);
    }
}
