use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::sentinel::SentinelAdvice;
use crate::status::AuditImpact;
use crate::verdict::AuditorVerdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdviceSource {
    Sentinel,
    SentinelAndAuditor,
}

/// Final bounded modulation after merging local and external advice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CombinedAdvice {
    pub smb_factor: f64,
    pub extra_interval_min: f64,
    pub prefer_basal: bool,
    /// Temp-basal multiplier. 1.0 unless an external verdict was used.
    pub tbr_factor: f64,
    pub source: AdviceSource,
    /// Set when an external verdict was considered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_impact: Option<AuditImpact>,
}

fn sentinel_only(sentinel: &SentinelAdvice) -> CombinedAdvice {
    CombinedAdvice {
        smb_factor: sentinel.smb_factor.clamp(0.0, 1.0),
        extra_interval_min: f64::from(
            sentinel
                .extra_interval_min
                .min(SentinelAdvice::MAX_EXTRA_INTERVAL_MIN),
        ),
        prefer_basal: sentinel.prefer_basal,
        tbr_factor: 1.0,
        source: AdviceSource::Sentinel,
        external_impact: None,
    }
}

/// Most conservative wins: an external verdict can only tighten the sentinel's advice.
pub fn combine(
    sentinel: &SentinelAdvice,
    external: Option<&AuditorVerdict>,
    confidence_threshold: f64,
) -> CombinedAdvice {
    let local = sentinel_only(sentinel);
    let Some(verdict) = external else {
        return local;
    };

    if verdict.clamped_confidence() < confidence_threshold {
        return CombinedAdvice {
            external_impact: Some(AuditImpact::LowConfidence),
            ..local
        };
    }

    let bounded = verdict.clamped_adjustments();
    let smb_factor = local.smb_factor.min(bounded.smb_factor_clamp);
    let extra_interval_min = local.extra_interval_min.max(bounded.interval_add_min);
    let prefer_basal = local.prefer_basal || bounded.prefer_tbr;

    let impact = if smb_factor < local.smb_factor {
        AuditImpact::SmbSoftened
    } else if extra_interval_min > local.extra_interval_min {
        AuditImpact::IntervalExtended
    } else if prefer_basal && !local.prefer_basal {
        AuditImpact::ShiftedToBasal
    } else {
        AuditImpact::Confirmed
    };

    CombinedAdvice {
        smb_factor,
        extra_interval_min,
        prefer_basal,
        tbr_factor: bounded.tbr_factor_clamp,
        source: AdviceSource::SentinelAndAuditor,
        external_impact: Some(impact),
    }
}
