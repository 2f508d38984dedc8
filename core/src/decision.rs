use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Candidate dose from the upstream prediction engine. Never mutated in place:
/// every stage of the layer produces a new value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProposedDose {
    /// Candidate SMB amount (U)
    pub smb_u: f64,
    /// Candidate temp-basal rate (U/h)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tbr_rate: Option<f64>,
    /// Candidate temp-basal duration (min)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tbr_min: Option<f64>,
    /// Candidate minimum interval before the next SMB (min)
    pub interval_min: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error("{field} must be a finite, non-negative number (got {value})")]
    InvalidAmount { field: &'static str, value: f64 },
    #[error("tbrRate and tbrMin must be provided together")]
    IncompleteTempBasal,
}

impl InputError {
    pub fn field(&self) -> &'static str {
        match self {
            InputError::InvalidAmount { field, .. } => field,
            InputError::IncompleteTempBasal => "proposed.tbrRate",
        }
    }
}

fn require_amount(field: &'static str, value: f64) -> Result<(), InputError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(InputError::InvalidAmount { field, value })
    }
}

impl ProposedDose {
    pub fn validate(&self) -> Result<(), InputError> {
        require_amount("proposed.smbU", self.smb_u)?;
        require_amount("proposed.intervalMin", self.interval_min)?;
        match (self.tbr_rate, self.tbr_min) {
            (Some(rate), Some(minutes)) => {
                require_amount("proposed.tbrRate", rate)?;
                require_amount("proposed.tbrMin", minutes)?;
            }
            (None, None) => {}
            _ => return Err(InputError::IncompleteTempBasal),
        }
        Ok(())
    }

    pub fn has_smb(&self) -> bool {
        self.smb_u > 0.0
    }
}

/// Final output handed to the actuator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModulatedDecision {
    pub smb_u: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tbr_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tbr_min: Option<f64>,
    pub interval_min: f64,
    pub prefer_tbr: bool,
    /// Effective SMB multiplier relative to the proposal (final / proposed)
    pub applied_modulation: f64,
    pub reason: String,
}

impl ModulatedDecision {
    /// Duration of the zero temp basal issued by a hypo veto.
    pub const VETO_TBR_MIN: f64 = 30.0;

    /// Forced-zero decision for the hypo veto path: no SMB, basal at the safe floor.
    pub fn hypo_veto(proposed: &ProposedDose, reason: impl Into<String>) -> Self {
        Self {
            smb_u: 0.0,
            tbr_rate: Some(0.0),
            tbr_min: Some(proposed.tbr_min.unwrap_or(Self::VETO_TBR_MIN)),
            interval_min: proposed.interval_min,
            prefer_tbr: false,
            applied_modulation: 0.0,
            reason: reason.into(),
        }
    }
}
