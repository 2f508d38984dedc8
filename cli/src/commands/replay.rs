use chrono::{DateTime, Utc};
use dosegate_core::context::TickContext;
use dosegate_core::decision::ProposedDose;
use dosegate_runtime::{CognitiveAuditor, Orchestrator, StatusRecord, TickOutcome};
use serde::{Deserialize, Serialize};

use crate::util::{EXIT_CLIENT_ERROR, EXIT_OK, print_json, read_json_from_file, usage_error};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayTick {
    pub at: DateTime<Utc>,
    pub proposed: ProposedDose,
    pub context: TickContext,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayEntry {
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<TickOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Last terminal audit status once any dispatched call has landed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_status: Option<StatusRecord>,
}

/// Feed ticks through one orchestrator in order, waiting for each dispatched
/// audit before the next tick so the run does not depend on wall time.
pub async fn replay_ticks<A: CognitiveAuditor>(
    orchestrator: &Orchestrator<A>,
    ticks: Vec<ReplayTick>,
) -> Vec<ReplayEntry> {
    let mut entries = Vec::with_capacity(ticks.len());
    for tick in ticks {
        let result = orchestrator.run_tick(&tick.proposed, &tick.context, tick.at);
        orchestrator.settle_pending_audit().await;
        let (outcome, error) = match result {
            Ok(outcome) => (Some(outcome), None),
            Err(e) => {
                tracing::warn!(at = %tick.at, error = %e, "replay_tick_rejected");
                (None, Some(e.to_string()))
            }
        };
        entries.push(ReplayEntry {
            at: tick.at,
            outcome,
            error,
            audit_status: orchestrator.last_status(),
        });
    }
    entries
}

pub async fn run(input: &str, config: dosegate_core::config::LayerConfig) -> i32 {
    let mut ticks: Vec<ReplayTick> = match read_json_from_file(input) {
        Ok(ticks) => ticks,
        Err(e) => {
            return usage_error(
                &e,
                Some("Input is an array of {\"at\": RFC3339, \"proposed\": {...}, \"context\": {...}}"),
            );
        }
    };
    ticks.sort_by_key(|tick| tick.at);

    let orchestrator = match Orchestrator::from_config(config) {
        Ok(o) => o,
        Err(e) => return usage_error(&format!("Cannot build auditor client: {e}"), None),
    };

    let entries = replay_ticks(&orchestrator, ticks).await;
    let rejected = entries.iter().filter(|e| e.error.is_some()).count();
    let code = print_json(&entries);
    if code == EXIT_OK && rejected > 0 {
        EXIT_CLIENT_ERROR
    } else {
        code
    }
}
