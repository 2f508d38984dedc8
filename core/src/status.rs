use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Why the audit path did not run this tick. The proposal passes through
/// with only the always-on safety stages applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    NoTrigger,
    PrebolusWindow,
    BelowAuditTier,
    /// Hourly call cap reached
    RateLimited,
    /// Minimum interval since the previous call not yet elapsed
    Cooldown,
    /// A previous audit is still running
    InFlight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfflineReason {
    NoCredentials,
    NoNetwork,
    DnsFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Timeout,
    Parse,
    Http,
    Auth,
    Internal,
}

/// Which bounded field of an applied verdict actually changed the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditImpact {
    Confirmed,
    SmbSoftened,
    IntervalExtended,
    ShiftedToBasal,
    /// Verdict received but below the confidence threshold; ignored
    LowConfidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "status", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Disabled,
    Skipped(SkipReason),
    Offline(OfflineReason),
    Error(ErrorCategory),
    Ok(AuditImpact),
    /// Audit dispatched this tick; its verdict becomes usable on a later tick
    Pending,
    /// Hypo guard veto; outside the degradation taxonomy
    Vetoed,
}

impl AuditStatus {
    /// Terminal statuses describe the outcome of an auditor call.
    pub fn is_terminal_audit_outcome(&self) -> bool {
        matches!(
            self,
            AuditStatus::Offline(_) | AuditStatus::Error(_) | AuditStatus::Ok(_)
        )
    }

    /// Status once the mode gate has kept the advice off the dose: a used
    /// verdict changed nothing, so it can only have confirmed.
    pub fn withheld(self) -> Self {
        match self {
            AuditStatus::Ok(impact) if impact != AuditImpact::LowConfidence => {
                AuditStatus::Ok(AuditImpact::Confirmed)
            }
            other => other,
        }
    }

    pub fn label(&self) -> String {
        fn screaming<T: Serialize>(value: &T) -> String {
            serde_json::to_value(value)
                .ok()
                .and_then(|v| v.as_str().map(str::to_owned))
                .unwrap_or_default()
        }
        match self {
            AuditStatus::Disabled => "DISABLED".to_string(),
            AuditStatus::Skipped(r) => format!("SKIPPED:{}", screaming(r)),
            AuditStatus::Offline(r) => format!("OFFLINE:{}", screaming(r)),
            AuditStatus::Error(c) => format!("ERROR:{}", screaming(c)),
            AuditStatus::Ok(i) => format!("OK:{}", screaming(i)),
            AuditStatus::Pending => "PENDING".to_string(),
            AuditStatus::Vetoed => "VETOED".to_string(),
        }
    }
}
