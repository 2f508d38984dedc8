use chrono::{DateTime, Utc};
use dosegate_core::context::TickContext;
use dosegate_core::decision::ProposedDose;
use dosegate_runtime::{AuditSnapshot, Orchestrator, TickOutcome};
use serde::{Deserialize, Serialize};

use crate::util::{client_error, print_json, read_json_from_file, usage_error};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickInput {
    pub proposed: ProposedDose,
    pub context: TickContext,
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateOutput {
    outcome: TickOutcome,
    /// Session state after waiting for a dispatched call: failure status or
    /// the cached verdict a following tick would apply
    #[serde(skip_serializing_if = "Option::is_none")]
    audit: Option<AuditSnapshot>,
}

pub async fn run(
    input: &str,
    now: Option<DateTime<Utc>>,
    await_audit: bool,
    config: dosegate_core::config::LayerConfig,
) -> i32 {
    let tick: TickInput = match read_json_from_file(input) {
        Ok(tick) => tick,
        Err(e) => {
            return usage_error(
                &e,
                Some("Input is {\"proposed\": {...}, \"context\": {...}, \"now\"?: RFC3339}"),
            );
        }
    };

    let orchestrator = match Orchestrator::from_config(config) {
        Ok(o) => o,
        Err(e) => return usage_error(&format!("Cannot build auditor client: {e}"), None),
    };

    let now = now.or(tick.now).unwrap_or_else(Utc::now);
    let outcome = match orchestrator.run_tick(&tick.proposed, &tick.context, now) {
        Ok(outcome) => outcome,
        Err(e) => return client_error(&e.to_string(), Some(e.field())),
    };

    let audit = if await_audit {
        orchestrator.settle_pending_audit().await;
        Some(orchestrator.snapshot(now))
    } else {
        None
    };

    print_json(&EvaluateOutput { outcome, audit })
}
