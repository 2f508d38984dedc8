use axum::extract::State;
use axum::{Json, Router, routing::get};
use chrono::Utc;
use dosegate_runtime::AuditSnapshot;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/audit/status", get(audit_status))
}

/// Current audit status, cached verdict and limiter state
#[utoipa::path(
    get,
    path = "/v1/audit/status",
    responses(
        (status = 200, description = "Audit layer snapshot", body = AuditSnapshot)
    ),
    tag = "audit"
)]
pub async fn audit_status(State(state): State<AppState>) -> Json<AuditSnapshot> {
    Json(state.orchestrator.snapshot(Utc::now()))
}
