use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::combiner::CombinedAdvice;
use crate::context::DoseContext;
use crate::decision::{ModulatedDecision, ProposedDose};
use crate::safety::SafetyScore;
use crate::sentinel::{SentinelAdvice, Tier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModulationMode {
    /// Sentinel and auditor are reported but never change the dose
    AuditOnly,
    #[default]
    SoftModulation,
    /// Advice applies only at HIGH tier or when inputs are degraded
    HighRiskOnly,
}

impl ModulationMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "AUDIT_ONLY" => Some(ModulationMode::AuditOnly),
            "SOFT_MODULATION" => Some(ModulationMode::SoftModulation),
            "HIGH_RISK_ONLY" => Some(ModulationMode::HighRiskOnly),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModulationMode::AuditOnly => "AUDIT_ONLY",
            ModulationMode::SoftModulation => "SOFT_MODULATION",
            ModulationMode::HighRiskOnly => "HIGH_RISK_ONLY",
        }
    }

    /// Whether combined advice may change the dose under this mode.
    pub fn applies(self, sentinel: &SentinelAdvice, external_used: bool) -> bool {
        match self {
            ModulationMode::AuditOnly => false,
            ModulationMode::SoftModulation => sentinel.tier >= Tier::Low || external_used,
            ModulationMode::HighRiskOnly => {
                sentinel.tier == Tier::High || sentinel.reason.is_data_degradation()
            }
        }
    }
}

fn unit_factor(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Re-deliver SMB removed by modulation as extra temp basal over the proposed
/// duration. The increase is bounded by the external TBR factor and by max
/// basal; a factor below 1.0 scales the rate down instead.
pub fn redirect_to_basal(
    rate: f64,
    minutes: f64,
    removed_smb_u: f64,
    tbr_factor: f64,
    max_basal: f64,
) -> f64 {
    if tbr_factor < 1.0 {
        return rate * tbr_factor;
    }
    if minutes <= 0.0 || removed_smb_u <= 0.0 {
        return rate;
    }
    let headroom = (rate * (tbr_factor - 1.0)).min((max_basal - rate).max(0.0));
    let extra = (removed_smb_u / (minutes / 60.0)).min(headroom);
    rate + extra.max(0.0)
}

/// Safety factor, optional combined advice, then hard limits.
///
/// Pushes one trail line per stage that changed something and stores the
/// joined trail as the decision reason.
pub fn apply(
    proposed: &ProposedDose,
    dose: &DoseContext,
    safety: &SafetyScore,
    advice: Option<&CombinedAdvice>,
    trail: &mut Vec<String>,
) -> ModulatedDecision {
    let after_safety = proposed.smb_u * unit_factor(safety.bolus_factor);
    let mut smb = after_safety;
    let mut interval_min = proposed.interval_min;
    let mut prefer_tbr = false;
    let mut tbr_rate = proposed.tbr_rate;
    let mut tbr_min = proposed.tbr_min;

    if let Some(advice) = advice {
        smb = after_safety * unit_factor(advice.smb_factor);
        interval_min += advice.extra_interval_min.max(0.0);
        prefer_tbr = advice.prefer_basal;
        trail.push(format!(
            "modulation: smb x{:.2} +{:.0}min{}",
            advice.smb_factor,
            advice.extra_interval_min,
            if prefer_tbr { " prefer basal" } else { "" }
        ));

        if let (Some(rate), Some(minutes)) = (tbr_rate, tbr_min) {
            let removed = if prefer_tbr { after_safety - smb } else { 0.0 };
            let redirected = redirect_to_basal(rate, minutes, removed, advice.tbr_factor, dose.max_basal);
            if (redirected - rate).abs() > f64::EPSILON {
                trail.push(format!("basal: {rate:.2} -> {redirected:.2} U/h"));
            }
            tbr_rate = Some(redirected);
        }
    }

    if safety.stop_basal {
        tbr_rate = Some(0.0);
        tbr_min = Some(tbr_min.unwrap_or(ModulatedDecision::VETO_TBR_MIN));
        trail.push("safety: basal stopped".to_string());
    }

    if let Some(rate) = tbr_rate
        && dose.max_basal.is_finite()
        && rate > dose.max_basal
    {
        let capped = dose.max_basal.max(0.0);
        trail.push(format!("clamp: basal {rate:.2} -> max {capped:.2} U/h"));
        tbr_rate = Some(capped);
    }

    let iob_headroom = (dose.max_iob - dose.iob).max(0.0);
    let limit = proposed.smb_u.min(dose.max_smb.max(0.0)).min(iob_headroom);
    if !smb.is_finite() || smb < 0.0 {
        smb = 0.0;
    }
    if smb > limit {
        trail.push(format!("clamp: smb {smb:.2} -> {limit:.2}"));
        smb = limit.max(0.0);
    }

    let applied_modulation = if proposed.smb_u > 0.0 {
        smb / proposed.smb_u
    } else {
        1.0
    };

    ModulatedDecision {
        smb_u: smb,
        tbr_rate,
        tbr_min,
        interval_min,
        prefer_tbr,
        applied_modulation,
        reason: trail.join(" | "),
    }
}
