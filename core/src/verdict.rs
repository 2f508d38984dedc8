//! External auditor verdict: strict parsing, range validation and the
//! post-parse normalisation rules that make the verdict safe to combine.
//!
//! Out-of-range or missing fields are parse failures. Nothing is coerced at
//! parse time; [`AuditorVerdict::clamped_adjustments`] clamps again on use so
//! a verdict constructed any other way still cannot escape its ranges.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

pub const MAX_EVIDENCE: usize = 3;
pub const SMB_FACTOR_RANGE: (f64, f64) = (0.0, 1.0);
pub const INTERVAL_ADD_RANGE: (f64, f64) = (0.0, 6.0);
pub const TBR_FACTOR_RANGE: (f64, f64) = (0.8, 1.2);
pub const CONFIDENCE_RANGE: (f64, f64) = (0.0, 1.0);
/// Confidence ceiling for a verdict the auditor itself marked as degraded.
pub const DEGRADED_CONFIDENCE_CAP: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictKind {
    Confirm,
    Soften,
    ShiftToTbr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskFlag {
    Stacking,
    SmbChain,
    Drift,
    Plateau,
    Variability,
    PredictionMissing,
    DataQuality,
    HypoRisk,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BoundedAdjustments {
    /// Multiplier applied to the SMB, 0..1
    pub smb_factor_clamp: f64,
    /// Minutes added to the SMB interval, 0..6
    pub interval_add_min: f64,
    pub prefer_tbr: bool,
    /// Multiplier applied to the temp-basal rate, 0.8..1.2
    pub tbr_factor_clamp: f64,
}

impl BoundedAdjustments {
    pub const NEUTRAL: BoundedAdjustments = BoundedAdjustments {
        smb_factor_clamp: 1.0,
        interval_add_min: 0.0,
        prefer_tbr: false,
        tbr_factor_clamp: 1.0,
    };

    /// Every numeric field forced into its declared range. Non-finite values
    /// fall to the most conservative end.
    pub fn clamped(&self) -> Self {
        Self {
            smb_factor_clamp: clamp_or(self.smb_factor_clamp, SMB_FACTOR_RANGE, SMB_FACTOR_RANGE.0),
            interval_add_min: clamp_or(
                self.interval_add_min,
                INTERVAL_ADD_RANGE,
                INTERVAL_ADD_RANGE.1,
            ),
            prefer_tbr: self.prefer_tbr,
            tbr_factor_clamp: clamp_or(self.tbr_factor_clamp, TBR_FACTOR_RANGE, TBR_FACTOR_RANGE.0),
        }
    }
}

fn clamp_or(value: f64, (min, max): (f64, f64), fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditorVerdict {
    pub verdict: VerdictKind,
    pub confidence: f64,
    pub degraded_mode: bool,
    pub risk_flags: Vec<RiskFlag>,
    pub evidence: Vec<String>,
    pub bounded_adjustments: BoundedAdjustments,
}

impl AuditorVerdict {
    pub fn clamped_confidence(&self) -> f64 {
        clamp_or(self.confidence, CONFIDENCE_RANGE, 0.0)
    }

    pub fn clamped_adjustments(&self) -> BoundedAdjustments {
        self.bounded_adjustments.clamped()
    }

    /// Code-level replacement for "prefer CONFIRM when uncertain" prompt rules.
    pub fn normalized(mut self) -> Self {
        if self.verdict != VerdictKind::Confirm && self.evidence.is_empty() {
            self.verdict = VerdictKind::Confirm;
        }
        match self.verdict {
            VerdictKind::Confirm => self.bounded_adjustments = BoundedAdjustments::NEUTRAL,
            VerdictKind::ShiftToTbr => self.bounded_adjustments.prefer_tbr = true,
            VerdictKind::Soften => {}
        }
        if self.degraded_mode {
            self.confidence = self.confidence.min(DEGRADED_CONFIDENCE_CAP);
        }
        self
    }

    pub fn describe(&self) -> String {
        let adj = self.clamped_adjustments();
        format!(
            "auditor: {:?} conf={:.2}{} smb x{:.2} +{:.0}min tbr x{:.2}{}",
            self.verdict,
            self.clamped_confidence(),
            if self.degraded_mode { " degraded" } else { "" },
            adj.smb_factor_clamp,
            adj.interval_add_min,
            adj.tbr_factor_clamp,
            if adj.prefer_tbr { " prefer tbr" } else { "" }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VerdictParseError {
    #[error("no JSON object found in auditor response")]
    NoJsonObject,
    #[error("malformed verdict: {0}")]
    Malformed(String),
    #[error("{field} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("evidence has {0} entries, at most {MAX_EVIDENCE} allowed")]
    TooMuchEvidence(usize),
}

/// Slice from the first `{` to the last `}`, tolerating prose or code fences around the object.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

fn require_range(field: &'static str, value: f64, (min, max): (f64, f64)) -> Result<(), VerdictParseError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(VerdictParseError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

/// Strict parse, range validation, then normalisation.
pub fn parse_verdict(raw: &str) -> Result<AuditorVerdict, VerdictParseError> {
    let object = extract_json_object(raw).ok_or(VerdictParseError::NoJsonObject)?;
    let verdict: AuditorVerdict =
        serde_json::from_str(object).map_err(|e| VerdictParseError::Malformed(e.to_string()))?;

    require_range("confidence", verdict.confidence, CONFIDENCE_RANGE)?;
    let adj = &verdict.bounded_adjustments;
    require_range(
        "boundedAdjustments.smbFactorClamp",
        adj.smb_factor_clamp,
        SMB_FACTOR_RANGE,
    )?;
    require_range(
        "boundedAdjustments.intervalAddMin",
        adj.interval_add_min,
        INTERVAL_ADD_RANGE,
    )?;
    require_range(
        "boundedAdjustments.tbrFactorClamp",
        adj.tbr_factor_clamp,
        TBR_FACTOR_RANGE,
    )?;
    if verdict.evidence.len() > MAX_EVIDENCE {
        return Err(VerdictParseError::TooMuchEvidence(verdict.evidence.len()));
    }

    Ok(verdict.normalized())
}
