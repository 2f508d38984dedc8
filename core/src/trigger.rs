use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::context::TickContext;
use crate::decision::ProposedDose;

const LARGE_DELTA: f64 = 2.0;
const LARGE_SHORT_AVG_DELTA: f64 = 1.5;
const LOW_BG: f64 = 120.0;
const SMB_SUM_30_MEAL: f64 = 2.5;
const SMB_SUM_30_DEFAULT: f64 = 1.5;
const HIGH_IOB: f64 = 3.0;
const HIGH_IOB_MIN_PROPOSAL: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerReason {
    FastRise,
    LowBgWithDose,
    SmbVolume,
    PredictionMissing,
    HighIob,
}

impl TriggerReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerReason::FastRise => "fast_rise",
            TriggerReason::LowBgWithDose => "low_bg_with_dose",
            TriggerReason::SmbVolume => "smb_volume",
            TriggerReason::PredictionMissing => "prediction_missing",
            TriggerReason::HighIob => "high_iob",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// User pre-bolus in progress; the proposal passes through untouched.
    PrebolusWindow,
    Quiet,
    Fired(Vec<TriggerReason>),
}

pub fn evaluate(ctx: &TickContext, proposed: &ProposedDose) -> Trigger {
    let glucose = &ctx.glucose;
    let dose = &ctx.dose;

    if dose.prebolus_window {
        return Trigger::PrebolusWindow;
    }

    let mut reasons = Vec::new();
    if glucose.delta > LARGE_DELTA || glucose.short_avg_delta > LARGE_SHORT_AVG_DELTA {
        reasons.push(TriggerReason::FastRise);
    }
    if glucose.bg < LOW_BG && proposed.has_smb() {
        reasons.push(TriggerReason::LowBgWithDose);
    }
    let smb_sum_limit = if dose.meal_mode {
        SMB_SUM_30_MEAL
    } else {
        SMB_SUM_30_DEFAULT
    };
    if dose.smb_sum_30min > smb_sum_limit {
        reasons.push(TriggerReason::SmbVolume);
    }
    if !dose.prediction_available && proposed.has_smb() {
        reasons.push(TriggerReason::PredictionMissing);
    }
    if dose.iob > HIGH_IOB && proposed.smb_u > HIGH_IOB_MIN_PROPOSAL {
        reasons.push(TriggerReason::HighIob);
    }

    if reasons.is_empty() {
        Trigger::Quiet
    } else {
        Trigger::Fired(reasons)
    }
}
