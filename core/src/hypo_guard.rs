//! Hypoglycemia gate with release hysteresis.
//!
//! Once a block fires, delivery stays suspended until the effective minimum BG
//! has been above `threshold + 5` for five continuous minutes. Any dip resets
//! the release timer. Missing predictions are treated as +inf, so absent data
//! alone never blocks.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::context::finite_or_inf;

const FLOOR_MARGIN: f64 = 5.0;
const RELEASE_MARGIN: f64 = 5.0;
const RELEASE_HOLD_MIN: i64 = 5;
const FALLING_DELTA: f64 = -2.0;
const THRESHOLD_ANCHOR: f64 = 40.0;

/// Hysteresis memory. Survives across ticks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HypoState {
    pub last_blocked_at: Option<DateTime<Utc>>,
    pub clear_candidate_since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HypoCause {
    /// Lowest of current/predicted/eventual BG at or below the strict floor
    BelowFloor,
    /// Both predicted and eventual BG at or below the strict floor
    ForecastBelowFloor,
    /// Falling fast with predicted BG at or below threshold
    FallingTowardThreshold,
    /// No trigger this tick, but the release condition has not held long enough
    HysteresisHold,
}

impl HypoCause {
    pub fn as_str(self) -> &'static str {
        match self {
            HypoCause::BelowFloor => "below_floor",
            HypoCause::ForecastBelowFloor => "forecast_below_floor",
            HypoCause::FallingTowardThreshold => "falling_toward_threshold",
            HypoCause::HysteresisHold => "hysteresis_hold",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HypoCheck {
    pub blocked: bool,
    pub cause: Option<HypoCause>,
    pub effective_min_bg: f64,
    pub threshold: f64,
}

impl HypoCheck {
    pub fn describe(&self) -> String {
        match self.cause {
            Some(cause) => format!(
                "hypo guard: BLOCK ({}) minBg={:.0} threshold={:.0}",
                cause.as_str(),
                self.effective_min_bg,
                self.threshold
            ),
            None => format!(
                "hypo guard: clear minBg={:.0} threshold={:.0}",
                self.effective_min_bg, self.threshold
            ),
        }
    }
}

/// `minBg - 0.5 * (minBg - 40)`, raised to the low-glucose-suspend value if that is higher.
pub fn derive_threshold(min_bg: f64, low_glucose_suspend: Option<f64>) -> f64 {
    let derived = min_bg - 0.5 * (min_bg - THRESHOLD_ANCHOR);
    match low_glucose_suspend {
        Some(lgs) if lgs.is_finite() && lgs > derived => lgs,
        _ => derived,
    }
}

#[derive(Debug, Clone, Default)]
pub struct HypoGuard {
    state: HypoState,
}

impl HypoGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: HypoState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &HypoState {
        &self.state
    }

    pub fn evaluate(
        &mut self,
        bg: f64,
        predicted_bg: Option<f64>,
        eventual_bg: Option<f64>,
        threshold: f64,
        delta5: f64,
        now: DateTime<Utc>,
    ) -> HypoCheck {
        let current = finite_or_inf(Some(bg));
        let predicted = finite_or_inf(predicted_bg);
        let eventual = finite_or_inf(eventual_bg);
        let effective_min_bg = current.min(predicted).min(eventual);
        let floor = threshold - FLOOR_MARGIN;

        let trigger = if effective_min_bg <= floor {
            Some(HypoCause::BelowFloor)
        } else if predicted <= floor && eventual <= floor {
            Some(HypoCause::ForecastBelowFloor)
        } else if delta5 <= FALLING_DELTA && predicted <= threshold {
            Some(HypoCause::FallingTowardThreshold)
        } else {
            None
        };

        let check = |blocked: bool, cause: Option<HypoCause>| HypoCheck {
            blocked,
            cause,
            effective_min_bg,
            threshold,
        };

        if let Some(cause) = trigger {
            if self.state.last_blocked_at.is_none() {
                tracing::info!(
                    cause = cause.as_str(),
                    effective_min_bg,
                    threshold,
                    "hypo_guard_block_engaged"
                );
            }
            self.state.last_blocked_at = Some(now);
            self.state.clear_candidate_since = None;
            return check(true, Some(cause));
        }

        if self.state.last_blocked_at.is_none() {
            return check(false, None);
        }

        if effective_min_bg > threshold + RELEASE_MARGIN {
            let since = *self.state.clear_candidate_since.get_or_insert(now);
            if now - since >= Duration::minutes(RELEASE_HOLD_MIN) {
                tracing::info!(effective_min_bg, threshold, "hypo_guard_block_released");
                self.state = HypoState::default();
                return check(false, None);
            }
        } else {
            self.state.clear_candidate_since = None;
        }

        check(true, Some(HypoCause::HysteresisHold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
    }

    fn at(minutes: i64) -> DateTime<Utc> {
        t0() + Duration::minutes(minutes)
    }

    #[test]
    fn derive_threshold_halves_distance_to_forty_and_respects_lgs() {
        assert_eq!(derive_threshold(110.0, None), 75.0);
        assert_eq!(derive_threshold(110.0, Some(70.0)), 75.0);
        assert_eq!(derive_threshold(110.0, Some(80.0)), 80.0);
        assert_eq!(derive_threshold(110.0, Some(f64::NAN)), 75.0);
    }

    #[test]
    fn scenario_blocks_when_prediction_under_strict_floor() {
        let mut guard = HypoGuard::new();
        let check = guard.evaluate(72.0, Some(68.0), Some(70.0), 75.0, -1.0, t0());
        assert!(check.blocked);
        assert_eq!(check.cause, Some(HypoCause::BelowFloor));
        assert_eq!(check.effective_min_bg, 68.0);
        assert_eq!(guard.state().last_blocked_at, Some(t0()));
    }

    #[test]
    fn falling_fast_near_threshold_blocks() {
        let mut guard = HypoGuard::new();
        let check = guard.evaluate(90.0, Some(74.0), Some(85.0), 75.0, -3.0, t0());
        assert!(check.blocked);
        assert_eq!(check.cause, Some(HypoCause::FallingTowardThreshold));
    }

    #[test]
    fn missing_forecasts_never_block_on_their_own() {
        let mut guard = HypoGuard::new();
        let check = guard.evaluate(120.0, None, Some(f64::NAN), 75.0, -3.0, t0());
        assert!(!check.blocked);
        assert!(check.cause.is_none());
    }

    #[test]
    fn no_stickiness_before_first_block() {
        let mut guard = HypoGuard::new();
        // Between floor and release level, but nothing ever blocked.
        let check = guard.evaluate(78.0, Some(77.0), Some(79.0), 75.0, 0.0, t0());
        assert!(!check.blocked);
        assert_eq!(guard.state(), &HypoState::default());
    }

    #[test]
    fn release_requires_five_continuous_minutes_above_release_level() {
        let mut guard = HypoGuard::new();
        assert!(guard.evaluate(65.0, Some(66.0), Some(70.0), 75.0, -1.0, at(0)).blocked);

        for minute in 1..=5 {
            let check = guard.evaluate(90.0, Some(92.0), Some(95.0), 75.0, 1.0, at(minute));
            assert!(check.blocked, "still held at minute {minute}");
            assert_eq!(check.cause, Some(HypoCause::HysteresisHold));
        }

        let released = guard.evaluate(90.0, Some(92.0), Some(95.0), 75.0, 1.0, at(6));
        assert!(!released.blocked);
        assert_eq!(guard.state(), &HypoState::default());
    }

    #[test]
    fn dip_below_release_level_resets_clock() {
        let mut guard = HypoGuard::new();
        assert!(guard.evaluate(65.0, None, None, 75.0, 0.0, at(0)).blocked);
        assert!(guard.evaluate(90.0, None, None, 75.0, 0.0, at(1)).blocked);
        assert!(guard.evaluate(90.0, None, None, 75.0, 0.0, at(4)).blocked);
        // Dip to 79 (below 80 release level, above 70 floor) resets the candidate timer.
        assert!(guard.evaluate(79.0, None, None, 75.0, 0.0, at(5)).blocked);
        assert!(guard.state().clear_candidate_since.is_none());
        assert!(guard.evaluate(90.0, None, None, 75.0, 0.0, at(6)).blocked);
        assert!(guard.evaluate(90.0, None, None, 75.0, 0.0, at(10)).blocked);
        assert!(!guard.evaluate(90.0, None, None, 75.0, 0.0, at(11)).blocked);
    }

    #[test]
    fn retrigger_while_held_refreshes_block_timestamp() {
        let mut guard = HypoGuard::new();
        assert!(guard.evaluate(65.0, None, None, 75.0, 0.0, at(0)).blocked);
        assert!(guard.evaluate(68.0, None, None, 75.0, 0.0, at(3)).blocked);
        assert_eq!(guard.state().last_blocked_at, Some(at(3)));
    }
}
