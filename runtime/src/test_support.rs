use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use dosegate_core::context::TickContext;
use dosegate_core::decision::ProposedDose;
use dosegate_core::safety::SafetyScore;
use dosegate_core::sentinel::compute_advice;

use crate::auditor::{AuditError, CognitiveAuditor};
use crate::payload::AuditRequest;

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

/// In-range tick, no active insulin, no recent dosing.
pub fn calm_context() -> TickContext {
    serde_json::from_value(serde_json::json!({
        "glucose": {
            "bg": 125.0,
            "delta": 0.5,
            "shortAvgDelta": 0.4,
            "longAvgDelta": 0.3,
            "combinedDelta": 0.4,
            "noise": 1.0,
            "cgmAgeMin": 2.0,
            "predictedBg": 140.0,
            "eventualBg": 145.0,
            "bgHistory": [120.0, 121.0, 122.0, 123.0, 124.0, 125.0]
        },
        "dose": {
            "iob": 0.4,
            "maxSmb": 2.0,
            "maxIob": 6.0,
            "maxBasal": 3.0,
            "targetBg": 100.0,
            "minBg": 110.0,
            "lastBolusAgeMin": 90.0,
            "pkpdStage": "TAIL",
            "pkpdActivity": 0.1,
            "tdd24h": 40.0,
            "tddLastHour": 1.2,
            "tirHypoPct": 1.0
        }
    }))
    .expect("calm context fixture")
}

pub fn proposal(smb_u: f64) -> ProposedDose {
    ProposedDose {
        smb_u,
        tbr_rate: None,
        tbr_min: None,
        interval_min: 3.0,
    }
}

pub fn verdict_json(confidence: f64, smb_factor_clamp: f64) -> String {
    serde_json::json!({
        "verdict": "SOFTEN",
        "confidence": confidence,
        "degradedMode": false,
        "riskFlags": ["STACKING"],
        "evidence": ["iob at peak activity"],
        "boundedAdjustments": {
            "smbFactorClamp": smb_factor_clamp,
            "intervalAddMin": 2.0,
            "preferTbr": false,
            "tbrFactorClamp": 1.0
        }
    })
    .to_string()
}

pub fn soften_verdict_json(smb_factor_clamp: f64) -> String {
    verdict_json(0.8, smb_factor_clamp)
}

pub fn audit_request() -> AuditRequest {
    let ctx = calm_context();
    let dose = proposal(0.6);
    let advice = compute_advice(&ctx, &dose);
    let safety = SafetyScore {
        stop_basal: false,
        bolus_factor: 1.0,
        is_hypo_risk: false,
        reason: String::new(),
    };
    AuditRequest::new("default", dose, &ctx, &advice, &safety, at(0))
}

/// Replays canned responses in order, optionally after a delay.
pub struct ScriptedAuditor {
    script: Mutex<VecDeque<Result<String, AuditError>>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedAuditor {
    pub fn new(script: Vec<Result<String, AuditError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CognitiveAuditor for ScriptedAuditor {
    async fn request_verdict(&self, _request: &AuditRequest) -> Result<String, AuditError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(AuditError::Internal("script exhausted".into())))
    }
}
