use chrono::{DateTime, Utc};
use dosegate_core::context::TickContext;
use dosegate_core::decision::ProposedDose;
use dosegate_core::safety::SafetyScore;
use dosegate_core::sentinel::SentinelAdvice;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Response contract the auditor must follow. Normalisation of the verdict
/// happens in code after parsing, so nothing here is load-bearing for safety.
const INSTRUCTIONS: &str = "You audit one closed-loop insulin dosing decision. \
You may only confirm it or make it more conservative. \
Reply with a single JSON object and nothing else: \
{\"verdict\": \"CONFIRM\" | \"SOFTEN\" | \"SHIFT_TO_TBR\", \
\"confidence\": 0..1, \"degradedMode\": bool, \
\"riskFlags\": [\"STACKING\" | \"SMB_CHAIN\" | \"DRIFT\" | \"PLATEAU\" | \"VARIABILITY\" | \
\"PREDICTION_MISSING\" | \"DATA_QUALITY\" | \"HYPO_RISK\" | \"OTHER\"], \
\"evidence\": [at most 3 short strings], \
\"boundedAdjustments\": {\"smbFactorClamp\": 0..1, \"intervalAddMin\": 0..6, \
\"preferTbr\": bool, \"tbrFactorClamp\": 0.8..1.2}}.";

/// One auditor call. Serialized as the JSON request body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRequest {
    pub request_id: Uuid,
    pub requested_at: DateTime<Utc>,
    pub model: String,
    pub instructions: &'static str,
    pub proposed: ProposedDose,
    pub context: TickContext,
    pub sentinel: SentinelAdvice,
    pub safety: SafetyScore,
}

impl AuditRequest {
    pub fn new(
        model: &str,
        proposed: ProposedDose,
        context: &TickContext,
        sentinel: &SentinelAdvice,
        safety: &SafetyScore,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            requested_at,
            model: model.to_string(),
            instructions: INSTRUCTIONS,
            proposed,
            context: context.clone(),
            sentinel: sentinel.clone(),
            safety: safety.clone(),
        }
    }

    /// Serialized request body, exactly as sent to the auditor.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// SHA-256 of a serialized request, logged in place of patient data.
pub fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{calm_context, proposal};
    use dosegate_core::sentinel::compute_advice;

    fn safety() -> SafetyScore {
        SafetyScore {
            stop_basal: false,
            bolus_factor: 1.0,
            is_hypo_risk: false,
            reason: "no safety reduction".to_string(),
        }
    }

    #[test]
    fn body_carries_full_context_in_camel_case() {
        let ctx = calm_context();
        let dose = proposal(0.6);
        let advice = compute_advice(&ctx, &dose);
        let request = AuditRequest::new("default", dose, &ctx, &advice, &safety(), Utc::now());
        let bytes = request.to_bytes().expect("request should serialize");
        let body: serde_json::Value = serde_json::from_slice(&bytes).expect("body should be json");
        assert_eq!(body["proposed"]["smbU"], 0.6);
        assert_eq!(body["context"]["glucose"]["bg"], 125.0);
        assert_eq!(body["sentinel"]["tier"], "NONE");
        assert!(body["instructions"].as_str().unwrap().contains("boundedAdjustments"));
    }

    #[test]
    fn digest_is_hex_sha256_of_the_sent_bytes() {
        let ctx = calm_context();
        let dose = proposal(0.6);
        let advice = compute_advice(&ctx, &dose);
        let request = AuditRequest::new("default", dose, &ctx, &advice, &safety(), Utc::now());
        let bytes = request.to_bytes().expect("request should serialize");
        let hash = digest(&bytes);
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, hex::encode(Sha256::digest(&bytes)));
        assert_ne!(hash, digest(b""));
    }
}
