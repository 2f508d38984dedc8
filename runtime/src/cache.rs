use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use dosegate_core::verdict::AuditorVerdict;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CachedVerdict {
    pub request_id: Uuid,
    pub verdict: AuditorVerdict,
    /// Tick time the audit was requested; age is measured from here
    pub requested_at: DateTime<Utc>,
}

impl CachedVerdict {
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.requested_at).num_seconds()
    }
}

/// Single-slot, last-write-wins verdict store. Written by the audit task,
/// read by ticks and status readers.
#[derive(Debug, Default)]
pub struct VerdictCache {
    slot: RwLock<Option<CachedVerdict>>,
}

impl VerdictCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, entry: CachedVerdict) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(entry);
    }

    pub fn latest(&self) -> Option<CachedVerdict> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The cached verdict if it was requested no more than `validity` before `now`.
    pub fn fresh(&self, now: DateTime<Utc>, validity: Duration) -> Option<CachedVerdict> {
        self.latest().filter(|entry| {
            let age = now - entry.requested_at;
            age >= Duration::zero() && age <= validity
        })
    }
}
