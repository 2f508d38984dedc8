//! Local Sentinel: offline, deterministic risk scorer that runs on every
//! triggered tick. Independent heuristics add points to a concern score; the
//! most severe reason that fired selects the bounded advisory.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::context::{PkpdStage, TickContext};
use crate::decision::ProposedDose;

const DRIFT_MARGIN_ABOVE_TARGET: f64 = 30.0;
const DRIFT_MAX_SHORT_DELTA: f64 = 2.0;
const LITTLE_RECENT_SMB_U: f64 = 0.3;
const PLATEAU_BG: f64 = 140.0;
const PLATEAU_MAX_IOB: f64 = 0.5;
const VARIABILITY_STDEV: f64 = 30.0;
const VARIABILITY_WINDOW: usize = 12;
const SIGN_FLIP_WINDOW: usize = 7;
const SIGN_FLIP_MIN: usize = 2;
const SIGN_FLIP_DEADBAND: f64 = 0.5;
const STACKING_IOB: f64 = 2.0;
const STACKING_ACTIVITY: f64 = 0.4;
const SMB_CHAIN_COUNT_30: u32 = 3;
const SMB_CHAIN_SUM_60: f64 = 3.0;
const RECENT_BOLUS_MIN: f64 = 15.0;
const SIZABLE_PROPOSAL_U: f64 = 0.5;
const PRE_ONSET_IOB: f64 = 1.0;
const AUTODRIVE_STUCK_MIN: f64 = 30.0;
const AUTODRIVE_MARGIN_ABOVE_TARGET: f64 = 20.0;
const NOISE_HIGH: f64 = 3.0;
const MAX_SCORE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    None,
    Low,
    Medium,
    High,
}

impl Tier {
    pub fn from_score(score: u32) -> Self {
        match score {
            s if s >= 70 => Tier::High,
            s if s >= 40 => Tier::Medium,
            s if s >= 20 => Tier::Low,
            _ => Tier::None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::None => "none",
            Tier::Low => "low",
            Tier::Medium => "medium",
            Tier::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SentinelReason {
    None,
    DriftPersistent,
    PlateauHigh,
    HighVariability,
    StackingRisk,
    SmbChain,
    PredictionMissing,
    PreOnsetContradiction,
    AutodriveStuck,
    StaleData,
    PumpUnreachable,
}

impl SentinelReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SentinelReason::None => "none",
            SentinelReason::DriftPersistent => "drift_persistent",
            SentinelReason::PlateauHigh => "plateau_high",
            SentinelReason::HighVariability => "high_variability",
            SentinelReason::StackingRisk => "stacking_risk",
            SentinelReason::SmbChain => "smb_chain",
            SentinelReason::PredictionMissing => "prediction_missing",
            SentinelReason::PreOnsetContradiction => "pre_onset_contradiction",
            SentinelReason::AutodriveStuck => "autodrive_stuck",
            SentinelReason::StaleData => "stale_data",
            SentinelReason::PumpUnreachable => "pump_unreachable",
        }
    }

    /// Higher wins when several heuristics fire.
    fn severity(self) -> u8 {
        match self {
            SentinelReason::PumpUnreachable => 100,
            SentinelReason::PredictionMissing => 90,
            SentinelReason::StaleData => 80,
            SentinelReason::StackingRisk => 60,
            SentinelReason::SmbChain => 55,
            SentinelReason::HighVariability => 45,
            SentinelReason::PreOnsetContradiction => 40,
            SentinelReason::DriftPersistent => 35,
            SentinelReason::PlateauHigh => 30,
            SentinelReason::AutodriveStuck => 25,
            SentinelReason::None => 0,
        }
    }

    /// Missing or untrustworthy inputs rather than a physiological pattern.
    pub fn is_data_degradation(self) -> bool {
        matches!(
            self,
            SentinelReason::PredictionMissing
                | SentinelReason::StaleData
                | SentinelReason::PumpUnreachable
        )
    }

    /// Bounded advisory for this reason: (smb factor, extra interval minutes, prefer basal).
    pub fn recommendation(self) -> (f64, u32, bool) {
        match self {
            SentinelReason::StackingRisk | SentinelReason::SmbChain => (0.6, 6, false),
            SentinelReason::PredictionMissing => (0.7, 4, false),
            SentinelReason::DriftPersistent | SentinelReason::PlateauHigh => (0.8, 2, true),
            SentinelReason::HighVariability => (0.75, 3, false),
            SentinelReason::AutodriveStuck => (0.9, 2, true),
            SentinelReason::PreOnsetContradiction => (0.7, 4, false),
            SentinelReason::StaleData => (0.5, 10, false),
            SentinelReason::PumpUnreachable => (0.5, 10, false),
            SentinelReason::None => (1.0, 0, false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SentinelAdvice {
    /// Concern score 0..100
    pub score: u32,
    pub tier: Tier,
    pub reason: SentinelReason,
    /// SMB multiplier 0..1
    pub smb_factor: f64,
    /// Extra minutes before the next SMB, 0..20
    pub extra_interval_min: u32,
    pub prefer_basal: bool,
    pub details: Vec<String>,
}

impl SentinelAdvice {
    pub const MAX_EXTRA_INTERVAL_MIN: u32 = 20;

    pub fn neutral() -> Self {
        Self {
            score: 0,
            tier: Tier::None,
            reason: SentinelReason::None,
            smb_factor: 1.0,
            extra_interval_min: 0,
            prefer_basal: false,
            details: Vec::new(),
        }
    }

    pub fn describe(&self) -> String {
        let mut line = format!(
            "sentinel: score={} tier={} reason={} smb x{:.2} +{}min{}",
            self.score,
            self.tier.as_str(),
            self.reason.as_str(),
            self.smb_factor,
            self.extra_interval_min,
            if self.prefer_basal { " prefer basal" } else { "" }
        );
        if !self.details.is_empty() {
            line.push_str(&format!(" [{}]", self.details.join("; ")));
        }
        line
    }
}

struct Accumulator {
    score: u32,
    reason: SentinelReason,
    details: Vec<String>,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            score: 0,
            reason: SentinelReason::None,
            details: Vec::new(),
        }
    }

    fn add(&mut self, points: u32, detail: String, reason: Option<SentinelReason>) {
        self.score += points;
        self.details.push(format!("+{points} {detail}"));
        if let Some(reason) = reason
            && reason.severity() > self.reason.severity()
        {
            self.reason = reason;
        }
    }
}

fn recent(history: &[f64], window: usize) -> Vec<f64> {
    let start = history.len().saturating_sub(window);
    history[start..].iter().copied().filter(|v| v.is_finite()).collect()
}

/// Population standard deviation of the last hour of readings.
pub fn bg_stdev(history: &[f64]) -> Option<f64> {
    let values = recent(history, VARIABILITY_WINDOW);
    if values.len() < 4 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// Number of direction reversals between consecutive 5-minute deltas.
pub fn delta_sign_flips(history: &[f64]) -> usize {
    let values = recent(history, SIGN_FLIP_WINDOW);
    let signs: Vec<f64> = values
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .filter(|delta| delta.abs() >= SIGN_FLIP_DEADBAND)
        .map(f64::signum)
        .collect();
    signs.windows(2).filter(|pair| pair[0] != pair[1]).count()
}

pub fn compute_advice(ctx: &TickContext, proposed: &ProposedDose) -> SentinelAdvice {
    let glucose = &ctx.glucose;
    let dose = &ctx.dose;
    let mut acc = Accumulator::new();

    // Drift and plateau
    if glucose.bg > dose.target_bg + DRIFT_MARGIN_ABOVE_TARGET
        && glucose.short_avg_delta > 0.0
        && glucose.short_avg_delta <= DRIFT_MAX_SHORT_DELTA
        && glucose.long_avg_delta > 0.0
        && dose.smb_sum_30min < LITTLE_RECENT_SMB_U
        && dose.last_bolus_age_min > 20.0
    {
        acc.add(
            30,
            format!("persistent drift at {:.0} with little action", glucose.bg),
            Some(SentinelReason::DriftPersistent),
        );
    }
    if glucose.bg > PLATEAU_BG
        && dose.smb_sum_30min < 0.1
        && dose.iob < PLATEAU_MAX_IOB
        && glucose.delta > 0.0
        && dose.last_bolus_age_min > 30.0
    {
        acc.add(
            20,
            format!("high plateau at {:.0}, iob {:.2}", glucose.bg, dose.iob),
            Some(SentinelReason::PlateauHigh),
        );
    }

    // Variability
    if let Some(stdev) = bg_stdev(&glucose.bg_history)
        && stdev > VARIABILITY_STDEV
    {
        acc.add(
            25,
            format!("bg stdev {stdev:.0}"),
            Some(SentinelReason::HighVariability),
        );
    }
    let flips = delta_sign_flips(&glucose.bg_history);
    if flips >= SIGN_FLIP_MIN {
        acc.add(
            20,
            format!("{flips} delta sign flips"),
            Some(SentinelReason::HighVariability),
        );
    }

    // Stacking
    if dose.iob > STACKING_IOB || dose.iob > dose.max_iob {
        acc.add(
            35,
            format!("high iob {:.2}", dose.iob),
            Some(SentinelReason::StackingRisk),
        );
    }
    if dose.pkpd_stage.is_active() && dose.pkpd_activity > STACKING_ACTIVITY {
        acc.add(
            35,
            format!(
                "insulin {} at activity {:.2}",
                dose.pkpd_stage.as_str(),
                dose.pkpd_activity
            ),
            Some(SentinelReason::StackingRisk),
        );
    }
    if dose.smb_count_30min >= SMB_CHAIN_COUNT_30 || dose.smb_sum_60min > SMB_CHAIN_SUM_60 {
        acc.add(
            30,
            format!(
                "smb chain {} in 30min, {:.2}U in 60min",
                dose.smb_count_30min, dose.smb_sum_60min
            ),
            Some(SentinelReason::SmbChain),
        );
    }
    if dose.last_bolus_age_min < RECENT_BOLUS_MIN
        && glucose.delta > 0.0
        && proposed.smb_u >= SIZABLE_PROPOSAL_U
    {
        acc.add(
            15,
            format!(
                "bolus {:.0}min ago, proposing {:.2}U",
                dose.last_bolus_age_min, proposed.smb_u
            ),
            Some(SentinelReason::StackingRisk),
        );
    }

    // Contradiction and degradation
    if !dose.prediction_available {
        acc.add(
            40,
            "prediction unavailable".to_string(),
            Some(SentinelReason::PredictionMissing),
        );
    }
    if dose.pkpd_stage == PkpdStage::PreOnset
        && dose.iob > PRE_ONSET_IOB
        && proposed.smb_u >= SIZABLE_PROPOSAL_U
    {
        acc.add(
            25,
            format!("pre-onset insulin with iob {:.2}", dose.iob),
            Some(SentinelReason::PreOnsetContradiction),
        );
    }
    if dose.autodrive_engaged
        && dose.autodrive_engaged_min >= AUTODRIVE_STUCK_MIN
        && dose.smb_sum_30min < 0.05
        && glucose.delta > 1.0
        && glucose.bg > dose.target_bg + AUTODRIVE_MARGIN_ABOVE_TARGET
    {
        acc.add(
            20,
            format!(
                "autodrive engaged {:.0}min without action",
                dose.autodrive_engaged_min
            ),
            Some(SentinelReason::AutodriveStuck),
        );
    }

    // Data quality
    if glucose.noise >= NOISE_HIGH {
        acc.add(15, format!("cgm noise {:.0}", glucose.noise), None);
    }
    if glucose.is_stale() {
        acc.add(
            25,
            format!("cgm data {:.0}min old", glucose.cgm_age_min),
            Some(SentinelReason::StaleData),
        );
    }
    if !dose.pump_reachable {
        acc.add(
            30,
            "pump unreachable".to_string(),
            Some(SentinelReason::PumpUnreachable),
        );
    }

    let score = acc.score.min(MAX_SCORE);
    let tier = Tier::from_score(score);
    let (smb_factor, extra_interval_min, prefer_basal) = if tier == Tier::None {
        SentinelReason::None.recommendation()
    } else {
        acc.reason.recommendation()
    };

    SentinelAdvice {
        score,
        tier,
        reason: acc.reason,
        smb_factor,
        extra_interval_min: extra_interval_min.min(SentinelAdvice::MAX_EXTRA_INTERVAL_MIN),
        prefer_basal,
        details: acc.details,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::fixtures::calm_context;

    fn proposal(smb_u: f64) -> ProposedDose {
        ProposedDose {
            smb_u,
            tbr_rate: None,
            tbr_min: None,
            interval_min: 3.0,
        }
    }

    #[test]
    fn calm_context_scores_zero() {
        let advice = compute_advice(&calm_context(), &proposal(0.3));
        assert_eq!(advice.score, 0);
        assert_eq!(advice.tier, Tier::None);
        assert_eq!(advice.reason, SentinelReason::None);
        assert_eq!(advice.smb_factor, 1.0);
        assert!(advice.details.is_empty());
    }

    #[test]
    fn stacking_at_peak_reaches_high_tier() {
        let mut ctx = calm_context();
        ctx.dose.iob = 2.2;
        ctx.dose.pkpd_stage = PkpdStage::Peak;
        ctx.dose.pkpd_activity = 0.5;
        let advice = compute_advice(&ctx, &proposal(0.9));
        assert_eq!(advice.score, 70);
        assert_eq!(advice.tier, Tier::High);
        assert_eq!(advice.reason, SentinelReason::StackingRisk);
        assert_eq!(advice.smb_factor, 0.6);
        assert_eq!(advice.extra_interval_min, 6);
        assert!(!advice.prefer_basal);
    }

    #[test]
    fn missing_prediction_is_medium_with_dedicated_reason() {
        let mut ctx = calm_context();
        ctx.dose.prediction_available = false;
        let advice = compute_advice(&ctx, &proposal(0.4));
        assert_eq!(advice.score, 40);
        assert_eq!(advice.tier, Tier::Medium);
        assert_eq!(advice.reason, SentinelReason::PredictionMissing);
        assert_eq!(advice.smb_factor, 0.7);
        assert_eq!(advice.extra_interval_min, 4);
    }

    #[test]
    fn prediction_missing_overrides_stacking_reason() {
        let mut ctx = calm_context();
        ctx.dose.iob = 2.5;
        ctx.dose.prediction_available = false;
        let advice = compute_advice(&ctx, &proposal(0.4));
        assert_eq!(advice.reason, SentinelReason::PredictionMissing);
        assert_eq!(advice.score, 75);
        assert_eq!(advice.tier, Tier::High);
    }

    #[test]
    fn pump_unreachable_is_most_severe_reason() {
        let mut ctx = calm_context();
        ctx.dose.prediction_available = false;
        ctx.dose.pump_reachable = false;
        let advice = compute_advice(&ctx, &proposal(0.4));
        assert_eq!(advice.reason, SentinelReason::PumpUnreachable);
        assert_eq!(advice.score, 70);
    }

    #[test]
    fn persistent_drift_prefers_basal() {
        let mut ctx = calm_context();
        ctx.glucose.bg = 165.0;
        ctx.glucose.short_avg_delta = 1.2;
        ctx.glucose.long_avg_delta = 0.8;
        ctx.glucose.delta = 0.0;
        ctx.dose.last_bolus_age_min = 45.0;
        let advice = compute_advice(&ctx, &proposal(0.3));
        assert_eq!(advice.reason, SentinelReason::DriftPersistent);
        assert_eq!(advice.tier, Tier::Low);
        assert_eq!(advice.smb_factor, 0.8);
        assert!(advice.prefer_basal);
    }

    #[test]
    fn variability_signals_detected_from_history() {
        let history = [100.0, 160.0, 95.0, 170.0, 90.0, 165.0, 100.0];
        assert!(bg_stdev(&history).expect("enough samples") > 30.0);
        assert!(delta_sign_flips(&history) >= 2);

        let mut ctx = calm_context();
        ctx.glucose.bg_history = history.to_vec();
        let advice = compute_advice(&ctx, &proposal(0.2));
        assert_eq!(advice.reason, SentinelReason::HighVariability);
        assert_eq!(advice.score, 45);
        assert_eq!(advice.smb_factor, 0.75);
    }

    #[test]
    fn noise_alone_stays_below_low_tier_and_keeps_neutral_advice() {
        let mut ctx = calm_context();
        ctx.glucose.noise = 3.0;
        let advice = compute_advice(&ctx, &proposal(0.2));
        assert_eq!(advice.score, 15);
        assert_eq!(advice.tier, Tier::None);
        assert_eq!(advice.smb_factor, 1.0);
        assert_eq!(advice.details.len(), 1);
    }

    #[test]
    fn smb_chain_detected_from_count_or_volume() {
        let mut ctx = calm_context();
        ctx.dose.smb_count_30min = 3;
        let advice = compute_advice(&ctx, &proposal(0.2));
        assert_eq!(advice.reason, SentinelReason::SmbChain);
        assert_eq!(advice.tier, Tier::Low);

        let mut ctx = calm_context();
        ctx.dose.smb_sum_60min = 3.5;
        assert_eq!(compute_advice(&ctx, &proposal(0.2)).reason, SentinelReason::SmbChain);
    }

    #[test]
    fn high_plateau_without_insulin_prefers_basal() {
        let mut ctx = calm_context();
        ctx.glucose.bg = 150.0;
        ctx.glucose.short_avg_delta = 0.0;
        let advice = compute_advice(&ctx, &proposal(0.3));
        assert_eq!(advice.score, 20);
        assert_eq!(advice.tier, Tier::Low);
        assert_eq!(advice.reason, SentinelReason::PlateauHigh);
        assert_eq!(advice.smb_factor, 0.8);
        assert_eq!(advice.extra_interval_min, 2);
        assert!(advice.prefer_basal);
        assert_eq!(advice.details.len(), 1);
    }

    #[test]
    fn sizable_proposal_before_onset_is_a_contradiction() {
        let mut ctx = calm_context();
        ctx.dose.iob = 1.5;
        ctx.dose.pkpd_stage = PkpdStage::PreOnset;
        let advice = compute_advice(&ctx, &proposal(0.6));
        assert_eq!(advice.score, 25);
        assert_eq!(advice.tier, Tier::Low);
        assert_eq!(advice.reason, SentinelReason::PreOnsetContradiction);
        assert_eq!(advice.smb_factor, 0.7);
        assert_eq!(advice.extra_interval_min, 4);
        assert!(!advice.prefer_basal);

        // A small proposal in the same state is not flagged
        assert_eq!(compute_advice(&ctx, &proposal(0.3)).score, 0);
    }

    #[test]
    fn idle_autodrive_on_rising_bg_is_stuck() {
        let mut ctx = calm_context();
        ctx.dose.autodrive_engaged = true;
        ctx.dose.autodrive_engaged_min = 40.0;
        ctx.glucose.delta = 1.5;
        let advice = compute_advice(&ctx, &proposal(0.3));
        assert_eq!(advice.score, 20);
        assert_eq!(advice.tier, Tier::Low);
        assert_eq!(advice.reason, SentinelReason::AutodriveStuck);
        assert_eq!(advice.smb_factor, 0.9);
        assert_eq!(advice.extra_interval_min, 2);
        assert!(advice.prefer_basal);

        ctx.dose.autodrive_engaged_min = 20.0;
        assert_eq!(compute_advice(&ctx, &proposal(0.3)).reason, SentinelReason::None);
    }

    #[test]
    fn stale_cgm_data_is_flagged_as_degradation() {
        let mut ctx = calm_context();
        ctx.glucose.cgm_age_min = 20.0;
        let advice = compute_advice(&ctx, &proposal(0.3));
        assert_eq!(advice.score, 25);
        assert_eq!(advice.tier, Tier::Low);
        assert_eq!(advice.reason, SentinelReason::StaleData);
        assert!(advice.reason.is_data_degradation());
        assert_eq!(advice.smb_factor, 0.5);
        assert_eq!(advice.extra_interval_min, 10);
        assert!(!advice.prefer_basal);
    }

    #[test]
    fn recent_bolus_adds_stacking_points() {
        let mut ctx = calm_context();
        ctx.dose.last_bolus_age_min = 10.0;
        let advice = compute_advice(&ctx, &proposal(0.6));
        assert_eq!(advice.score, 15);
        assert_eq!(advice.tier, Tier::None);
        assert_eq!(advice.reason, SentinelReason::StackingRisk);
        assert_eq!(advice.smb_factor, 1.0);
        assert_eq!(advice.extra_interval_min, 0);

        // Stacked on high iob the recent bolus lifts the tier to medium
        ctx.dose.iob = 2.2;
        let advice = compute_advice(&ctx, &proposal(0.6));
        assert_eq!(advice.score, 50);
        assert_eq!(advice.tier, Tier::Medium);
        assert_eq!(advice.reason, SentinelReason::StackingRisk);
        assert_eq!(advice.smb_factor, 0.6);
        assert_eq!(advice.extra_interval_min, 6);
        assert_eq!(advice.details.len(), 2);
    }

    #[test]
    fn score_is_capped_at_one_hundred() {
        let mut ctx = calm_context();
        ctx.dose.iob = 3.0;
        ctx.dose.pkpd_stage = PkpdStage::Peak;
        ctx.dose.pkpd_activity = 0.9;
        ctx.dose.smb_count_30min = 4;
        ctx.dose.prediction_available = false;
        ctx.dose.pump_reachable = false;
        ctx.glucose.cgm_age_min = 30.0;
        let advice = compute_advice(&ctx, &proposal(0.2));
        assert_eq!(advice.score, 100);
        assert_eq!(advice.tier, Tier::High);
    }
}
