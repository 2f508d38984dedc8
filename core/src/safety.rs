use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

const HISTORY_WINDOW_MIN: f64 = 30.0;
const SAMPLE_SPACING_MIN: f64 = 5.0;
const RAPID_DROP_PER_HOUR: f64 = 25.0;
const RAPID_DROP_BG_CEILING: f64 = 110.0;
const PLATEAU_BG: f64 = 160.0;
const PLATEAU_FLAT_DELTA: f64 = 2.0;
const HIGH_IOB_RATIO: f64 = 0.85;
const TIR_HYPO_HIGH_PCT: f64 = 8.0;
const NEAR_TARGET_MARGIN: f64 = 10.0;
const SHARP_RISE_DELTA: f64 = 20.0;
const SHARP_RISE_COMBINED: f64 = 15.0;
const ZERO_BASAL_OVERRIDE_MIN: f64 = 60.0;

/// What to do with basal when a dangerous drop rate is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DropPolicy {
    /// Flag hypo risk only; basal keeps running.
    #[default]
    FlagOnly,
    /// Flag hypo risk and request a basal stop.
    StopBasal,
}

impl DropPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "FLAG_ONLY" => Some(DropPolicy::FlagOnly),
            "STOP_BASAL" => Some(DropPolicy::StopBasal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SafetyInput<'a> {
    pub current_bg: f64,
    pub predicted_bg: Option<f64>,
    /// Oldest first, 5-minute spacing
    pub bg_history: &'a [f64],
    pub delta: f64,
    pub combined_delta: f64,
    pub iob: f64,
    pub max_iob: f64,
    pub tdd_24h: f64,
    pub tdd_per_hour: f64,
    pub tir_in_hypo: f64,
    pub target_bg: f64,
    pub zero_basal_minutes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SafetyScore {
    pub stop_basal: bool,
    /// Continuous dose-reduction factor in (0, 1]
    pub bolus_factor: f64,
    pub is_hypo_risk: bool,
    pub reason: String,
}

/// Estimated BG drop over the last 30 minutes of history, in mg/dL per hour.
/// Positive when falling. Zero when there is not enough history.
pub fn drop_per_hour(bg_history: &[f64]) -> f64 {
    let window = (HISTORY_WINDOW_MIN / SAMPLE_SPACING_MIN) as usize + 1;
    let recent: Vec<f64> = bg_history
        .iter()
        .rev()
        .take(window)
        .copied()
        .filter(|v| v.is_finite())
        .collect();
    if recent.len() < 2 {
        return 0.0;
    }
    let newest = recent[0];
    let oldest = recent[recent.len() - 1];
    let span_hours = (recent.len() - 1) as f64 * SAMPLE_SPACING_MIN / 60.0;
    (oldest - newest) / span_hours
}

/// Sigmoid weight for strong rises: close to 1.0 at high BG, easing toward 0.7 lower down.
fn strong_rise_factor(current_bg: f64) -> f64 {
    let sigmoid = 1.0 / (1.0 + (-(current_bg - 180.0) / 30.0).exp());
    (0.7 + 0.3 * sigmoid).clamp(0.7, 1.0)
}

pub fn score(input: &SafetyInput<'_>, policy: DropPolicy) -> SafetyScore {
    let mut factors: Vec<f64> = Vec::new();
    let mut reasons: Vec<String> = Vec::new();
    let mut is_hypo_risk = false;
    let mut stop_basal = false;

    let drop = drop_per_hour(input.bg_history);
    let falling = input.delta < 0.0 || input.combined_delta < 0.0;

    if drop >= RAPID_DROP_PER_HOUR && falling && input.current_bg < RAPID_DROP_BG_CEILING {
        is_hypo_risk = true;
        if policy == DropPolicy::StopBasal {
            stop_basal = true;
        }
        reasons.push(format!("rapid drop {drop:.0} mg/dL/h"));
    }

    let combined = input.combined_delta;
    if (1.0..2.0).contains(&combined) {
        factors.push(0.6);
        reasons.push("weak rise".to_string());
    } else if (2.0..4.0).contains(&combined) {
        factors.push(0.8);
        reasons.push("moderate rise".to_string());
    } else if combined >= 4.0 {
        let factor = strong_rise_factor(input.current_bg);
        factors.push(factor);
        reasons.push(format!("strong rise x{factor:.2}"));
    }

    if input.current_bg > PLATEAU_BG && combined.abs() < PLATEAU_FLAT_DELTA {
        factors.push(0.8);
        reasons.push("high plateau".to_string());
    }

    if input.max_iob > 0.0 && input.iob >= HIGH_IOB_RATIO * input.max_iob {
        factors.push(0.85);
        reasons.push(format!("iob {:.2}/{:.2}", input.iob, input.max_iob));
    }

    if input.tdd_24h > 0.0 && input.tdd_per_hour > input.tdd_24h / 24.0 {
        factors.push(0.8);
        reasons.push("tdd/h above 24h average".to_string());
    }

    if input.tir_in_hypo >= TIR_HYPO_HIGH_PCT {
        factors.push(0.5);
        reasons.push(format!("time in hypo {:.0}%", input.tir_in_hypo));
    }

    if let Some(predicted) = input.predicted_bg
        && predicted.is_finite()
        && predicted < input.target_bg + NEAR_TARGET_MARGIN
    {
        factors.push(0.5);
        reasons.push(format!("predicted {predicted:.0} near target"));
    }

    let mut bolus_factor = if factors.is_empty() {
        1.0
    } else {
        factors.iter().sum::<f64>() / factors.len() as f64
    };

    if input.delta >= SHARP_RISE_DELTA && combined >= SHARP_RISE_COMBINED {
        bolus_factor = 1.0;
        reasons.push("sharp rise override".to_string());
    }

    if input.zero_basal_minutes >= ZERO_BASAL_OVERRIDE_MIN {
        bolus_factor = 1.0;
        stop_basal = false;
        reasons.push(format!(
            "zero basal for {:.0} min, reductions lifted",
            input.zero_basal_minutes
        ));
    }

    let reason = if reasons.is_empty() {
        "no safety reduction".to_string()
    } else {
        reasons.join("; ")
    };

    SafetyScore {
        stop_basal,
        bolus_factor: bolus_factor.clamp(f64::MIN_POSITIVE, 1.0),
        is_hypo_risk,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neutral(history: &[f64]) -> SafetyInput<'_> {
        SafetyInput {
            current_bg: 130.0,
            predicted_bg: Some(150.0),
            bg_history: history,
            delta: 0.5,
            combined_delta: 0.5,
            iob: 0.5,
            max_iob: 6.0,
            tdd_24h: 48.0,
            tdd_per_hour: 1.0,
            tir_in_hypo: 0.0,
            target_bg: 100.0,
            zero_basal_minutes: 0.0,
        }
    }

    #[test]
    fn neutral_inputs_yield_no_reduction() {
        let history = [128.0, 129.0, 130.0];
        let result = score(&neutral(&history), DropPolicy::FlagOnly);
        assert_eq!(result.bolus_factor, 1.0);
        assert!(!result.stop_basal);
        assert!(!result.is_hypo_risk);
    }

    #[test]
    fn drop_per_hour_uses_thirty_minute_window() {
        // 8 samples; only the newest 7 (30 min) count: 130 -> 100 is 60 mg/dL/h.
        let history = [200.0, 130.0, 125.0, 120.0, 115.0, 110.0, 105.0, 100.0];
        assert!((drop_per_hour(&history) - 60.0).abs() < 1e-9);
        assert_eq!(drop_per_hour(&[100.0]), 0.0);
    }

    #[test]
    fn rapid_drop_flags_risk_without_stopping_basal_by_default() {
        let history = [130.0, 125.0, 120.0, 115.0, 110.0, 105.0, 100.0];
        let mut input = neutral(&history);
        input.current_bg = 100.0;
        input.delta = -5.0;
        let result = score(&input, DropPolicy::FlagOnly);
        assert!(result.is_hypo_risk);
        assert!(!result.stop_basal);

        let strict = score(&input, DropPolicy::StopBasal);
        assert!(strict.stop_basal);
    }

    #[test]
    fn factors_are_averaged() {
        let history = [120.0, 121.0];
        let mut input = neutral(&history);
        input.combined_delta = 1.5; // 0.6
        input.tir_in_hypo = 10.0; // 0.5
        let result = score(&input, DropPolicy::FlagOnly);
        assert!((result.bolus_factor - 0.55).abs() < 1e-9);
    }

    #[test]
    fn strong_rise_factor_grows_with_bg() {
        assert!(strong_rise_factor(250.0) > strong_rise_factor(140.0));
        assert!(strong_rise_factor(400.0) <= 1.0);
        assert!(strong_rise_factor(40.0) >= 0.7);
    }

    #[test]
    fn sharp_rise_override_bypasses_reductions() {
        let history = [150.0, 175.0];
        let mut input = neutral(&history);
        input.delta = 22.0;
        input.combined_delta = 16.0;
        input.iob = 5.5;
        let result = score(&input, DropPolicy::FlagOnly);
        assert_eq!(result.bolus_factor, 1.0);
        assert!(result.reason.contains("sharp rise override"));
    }

    #[test]
    fn zero_basal_override_restores_factor_and_cancels_stop() {
        let history = [130.0, 125.0, 120.0, 115.0, 110.0, 105.0, 100.0];
        let mut input = neutral(&history);
        input.current_bg = 100.0;
        input.delta = -5.0;
        input.predicted_bg = Some(95.0);
        input.zero_basal_minutes = 75.0;
        let result = score(&input, DropPolicy::StopBasal);
        assert_eq!(result.bolus_factor, 1.0);
        assert!(!result.stop_basal);
        assert!(result.is_hypo_risk);
    }

    #[test]
    fn prediction_near_target_halves_and_missing_prediction_is_ignored() {
        let history = [120.0, 121.0];
        let mut input = neutral(&history);
        input.predicted_bg = Some(105.0);
        assert_eq!(score(&input, DropPolicy::FlagOnly).bolus_factor, 0.5);
        input.predicted_bg = None;
        assert_eq!(score(&input, DropPolicy::FlagOnly).bolus_factor, 1.0);
    }
}
