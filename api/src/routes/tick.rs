use axum::extract::State;
use axum::{Json, Router, routing::post};
use chrono::{DateTime, Utc};
use dosegate_core::context::TickContext;
use dosegate_core::decision::ProposedDose;
use dosegate_runtime::TickOutcome;
use serde::Deserialize;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/tick", post(evaluate_tick))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TickRequest {
    pub proposed: ProposedDose,
    pub context: TickContext,
    /// Evaluation instant; server clock when omitted. Replays pass the
    /// recorded tick time so cooldowns and verdict ages line up.
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
}

/// Evaluate one control-loop tick
///
/// Runs the hypo guard, safety scorer and sentinel, folds in any fresh
/// external verdict and returns the decision for the actuator. Never waits
/// on the external auditor.
#[utoipa::path(
    post,
    path = "/v1/tick",
    request_body = TickRequest,
    responses(
        (status = 200, description = "Modulated decision", body = TickOutcome),
        (status = 400, description = "Malformed proposal", body = dosegate_core::error::ApiError),
        (status = 429, description = "Too many requests", body = dosegate_core::error::ApiError)
    ),
    tag = "tick"
)]
pub async fn evaluate_tick(
    State(state): State<AppState>,
    Json(req): Json<TickRequest>,
) -> Result<Json<TickOutcome>, AppError> {
    let now = req.now.unwrap_or_else(Utc::now);
    let outcome = state
        .orchestrator
        .run_tick(&req.proposed, &req.context, now)?;

    tracing::info!(
        status = %outcome.status.label(),
        smb_u = outcome.decision.smb_u,
        "tick_served"
    );
    Ok(Json(outcome))
}
