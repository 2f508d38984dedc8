use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// CGM readings for one control-loop tick. Produced upstream, read-only here.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GlucoseSnapshot {
    /// Current blood glucose (mg/dL)
    pub bg: f64,
    /// Change over the last 5 minutes (mg/dL)
    pub delta: f64,
    /// Short moving-average delta (~15 min)
    pub short_avg_delta: f64,
    /// Long moving-average delta (~45 min)
    pub long_avg_delta: f64,
    /// Blend of observed and predicted deltas used by the safety scorer
    #[serde(default)]
    pub combined_delta: f64,
    /// CGM noise level (0 = clean, 4 = very noisy)
    #[serde(default)]
    pub noise: f64,
    /// Minutes since the last CGM reading
    #[serde(default)]
    pub cgm_age_min: f64,
    /// Short-horizon predicted BG. Absent when the prediction engine produced nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_bg: Option<f64>,
    /// Eventual BG at the end of the prediction horizon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eventual_bg: Option<f64>,
    /// Recent readings, oldest first, 5-minute spacing
    #[serde(default)]
    pub bg_history: Vec<f64>,
}

impl GlucoseSnapshot {
    /// Data older than this is treated as stale by the sentinel.
    pub const STALE_AFTER_MIN: f64 = 12.0;

    pub fn is_stale(&self) -> bool {
        !self.cgm_age_min.is_finite() || self.cgm_age_min > Self::STALE_AFTER_MIN
    }
}

/// Pharmacokinetic/pharmacodynamic phase of the most recent insulin dose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PkpdStage {
    PreOnset,
    Rising,
    Peak,
    Falling,
    #[default]
    Tail,
}

impl PkpdStage {
    pub fn as_str(self) -> &'static str {
        match self {
            PkpdStage::PreOnset => "pre_onset",
            PkpdStage::Rising => "rising",
            PkpdStage::Peak => "peak",
            PkpdStage::Falling => "falling",
            PkpdStage::Tail => "tail",
        }
    }

    /// Stages in which insulin action is still building or at its maximum.
    pub fn is_active(self) -> bool {
        matches!(self, PkpdStage::Rising | PkpdStage::Peak)
    }
}

/// Insulin state, profile limits and therapy statistics for one tick.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DoseContext {
    /// Insulin on board (U)
    pub iob: f64,
    /// Carbs on board (g)
    #[serde(default)]
    pub cob: f64,
    /// Profile cap on a single SMB (U)
    pub max_smb: f64,
    /// Profile cap on total IOB (U)
    pub max_iob: f64,
    /// Profile cap on temp-basal rate (U/h)
    pub max_basal: f64,
    /// Target glucose (mg/dL)
    pub target_bg: f64,
    /// Lower bound of the target range, used to derive the hypo threshold
    pub min_bg: f64,
    #[serde(default)]
    pub meal_mode: bool,
    #[serde(default)]
    pub autodrive_engaged: bool,
    /// Minutes autodrive has been continuously engaged
    #[serde(default)]
    pub autodrive_engaged_min: f64,
    #[serde(default)]
    pub activity_mode: bool,
    /// Minutes since the last bolus of any kind
    #[serde(default = "DoseContext::no_recent_bolus")]
    pub last_bolus_age_min: f64,
    /// Number of SMBs delivered in the last 30 minutes
    #[serde(default)]
    pub smb_count_30min: u32,
    /// Total SMB insulin delivered in the last 30 minutes (U)
    #[serde(default)]
    pub smb_sum_30min: f64,
    /// Total SMB insulin delivered in the last 60 minutes (U)
    #[serde(default)]
    pub smb_sum_60min: f64,
    #[serde(default = "default_true")]
    pub prediction_available: bool,
    #[serde(default)]
    pub pkpd_stage: PkpdStage,
    /// Relative insulin activity (0..1) at the current PKPD stage
    #[serde(default)]
    pub pkpd_activity: f64,
    #[serde(default = "default_true")]
    pub pump_reachable: bool,
    /// True while a user-initiated pre-bolus is being delivered
    #[serde(default)]
    pub prebolus_window: bool,
    /// Total daily dose averaged over 24h (U)
    #[serde(default)]
    pub tdd_24h: f64,
    /// Insulin delivered in the last hour (U)
    #[serde(default)]
    pub tdd_last_hour: f64,
    /// Percent of recent time spent below range
    #[serde(default)]
    pub tir_hypo_pct: f64,
    /// Minutes of consecutive zero-basal delivery
    #[serde(default)]
    pub zero_basal_min: f64,
}

impl DoseContext {
    fn no_recent_bolus() -> f64 {
        999.0
    }
}

fn default_true() -> bool {
    true
}

/// Everything the decision layer reads for one tick.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TickContext {
    pub glucose: GlucoseSnapshot,
    pub dose: DoseContext,
}

/// Treat missing or non-finite glucose values as +inf so they can never trigger a block.
pub fn finite_or_inf(value: Option<f64>) -> f64 {
    match value {
        Some(v) if v.is_finite() => v,
        _ => f64::INFINITY,
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A calm, in-range tick with no active insulin and no recent dosing.
    pub fn calm_context() -> TickContext {
        TickContext {
            glucose: GlucoseSnapshot {
                bg: 125.0,
                delta: 0.5,
                short_avg_delta: 0.4,
                long_avg_delta: 0.3,
                combined_delta: 0.4,
                noise: 1.0,
                cgm_age_min: 2.0,
                predicted_bg: Some(140.0),
                eventual_bg: Some(145.0),
                bg_history: vec![120.0, 121.0, 122.0, 123.0, 124.0, 125.0],
            },
            dose: DoseContext {
                iob: 0.4,
                cob: 0.0,
                max_smb: 2.0,
                max_iob: 6.0,
                max_basal: 3.0,
                target_bg: 100.0,
                min_bg: 110.0,
                meal_mode: false,
                autodrive_engaged: false,
                autodrive_engaged_min: 0.0,
                activity_mode: false,
                last_bolus_age_min: 90.0,
                smb_count_30min: 0,
                smb_sum_30min: 0.0,
                smb_sum_60min: 0.0,
                prediction_available: true,
                pkpd_stage: PkpdStage::Tail,
                pkpd_activity: 0.1,
                pump_reachable: true,
                prebolus_window: false,
                tdd_24h: 40.0,
                tdd_last_hour: 1.2,
                tir_hypo_pct: 1.0,
                zero_basal_min: 0.0,
            },
        }
    }
}
