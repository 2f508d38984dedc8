use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use utoipa::ToSchema;

use crate::modulation::ModulationMode;
use crate::rate_limit::RateLimitConfig;
use crate::safety::DropPolicy;

pub const MAX_AUDITOR_ATTEMPTS: u32 = 5;
const FIRST_BACKOFF_SECS: u64 = 2;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse '{value}'")]
    InvalidValue { var: &'static str, value: String },
    #[error("{field} {message}")]
    OutOfRange {
        field: &'static str,
        message: &'static str,
    },
    #[error("auditor endpoint is not a valid http(s) URL: {0}")]
    InvalidEndpoint(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct HypoConfig {
    /// Externally configured low-glucose-suspend level; raises the derived threshold
    pub low_glucose_suspend: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditorConfig {
    pub endpoint: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
}

impl Default for AuditorConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: "default".to_string(),
            timeout_secs: 45,
            max_attempts: 3,
        }
    }
}

impl AuditorConfig {
    /// Both endpoint and credentials present.
    pub fn is_configured(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.endpoint) && present(&self.api_key)
    }

    /// Delay before each retry: 2s, 4s, 8s, ...
    pub fn backoff_schedule_secs(&self) -> Vec<u64> {
        (0..self.max_attempts.saturating_sub(1))
            .map(|i| FIRST_BACKOFF_SECS << i)
            .collect()
    }

    /// `attempts * timeout + sum(backoff)`
    pub fn worst_case_secs(&self) -> u64 {
        u64::from(self.max_attempts) * self.timeout_secs
            + self.backoff_schedule_secs().iter().sum::<u64>()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct LayerConfig {
    pub enabled: bool,
    pub mode: ModulationMode,
    /// External verdicts below this confidence are ignored
    pub confidence_threshold: f64,
    pub rate_limit: RateLimitConfig,
    /// Maximum age of a cached verdict, measured from when it was requested
    pub verdict_validity_secs: u64,
    /// Control-loop period; bounds the whole audit attempt
    pub tick_period_secs: u64,
    pub hypo: HypoConfig,
    pub drop_policy: DropPolicy,
    pub auditor: AuditorConfig,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: ModulationMode::default(),
            confidence_threshold: 0.6,
            rate_limit: RateLimitConfig::default(),
            verdict_validity_secs: 300,
            tick_period_secs: 300,
            hypo: HypoConfig::default(),
            drop_policy: DropPolicy::default(),
            auditor: AuditorConfig::default(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        var,
        value: raw.to_string(),
    })
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: raw.to_string(),
        }),
    }
}

impl LayerConfig {
    /// Read `DOSEGATE_*` variables over the defaults, then validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply any `DOSEGATE_*` values present on top of `self`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("DOSEGATE_ENABLED") {
            self.enabled = parse_bool("DOSEGATE_ENABLED", &v)?;
        }
        if let Some(v) = get("DOSEGATE_MODE") {
            self.mode = ModulationMode::parse(&v).ok_or(ConfigError::InvalidValue {
                var: "DOSEGATE_MODE",
                value: v.clone(),
            })?;
        }
        if let Some(v) = get("DOSEGATE_CONFIDENCE_THRESHOLD") {
            self.confidence_threshold = parse_var("DOSEGATE_CONFIDENCE_THRESHOLD", &v)?;
        }
        if let Some(v) = get("DOSEGATE_AUDIT_MIN_INTERVAL_SECS") {
            self.rate_limit.min_interval_secs = parse_var("DOSEGATE_AUDIT_MIN_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("DOSEGATE_AUDIT_MAX_CALLS_PER_HOUR") {
            self.rate_limit.max_calls_per_hour =
                parse_var("DOSEGATE_AUDIT_MAX_CALLS_PER_HOUR", &v)?;
        }
        if let Some(v) = get("DOSEGATE_VERDICT_VALIDITY_SECS") {
            self.verdict_validity_secs = parse_var("DOSEGATE_VERDICT_VALIDITY_SECS", &v)?;
        }
        if let Some(v) = get("DOSEGATE_TICK_PERIOD_SECS") {
            self.tick_period_secs = parse_var("DOSEGATE_TICK_PERIOD_SECS", &v)?;
        }
        if let Some(v) = get("DOSEGATE_LGS_THRESHOLD") {
            self.hypo.low_glucose_suspend = Some(parse_var("DOSEGATE_LGS_THRESHOLD", &v)?);
        }
        if let Some(v) = get("DOSEGATE_DROP_POLICY") {
            self.drop_policy = DropPolicy::parse(&v).ok_or(ConfigError::InvalidValue {
                var: "DOSEGATE_DROP_POLICY",
                value: v.clone(),
            })?;
        }
        if let Some(v) = get("DOSEGATE_AUDITOR_URL") {
            self.auditor.endpoint = Some(v.trim().to_string());
        }
        if let Some(v) = get("DOSEGATE_AUDITOR_API_KEY") {
            self.auditor.api_key = Some(v.trim().to_string());
        }
        if let Some(v) = get("DOSEGATE_AUDITOR_MODEL") {
            self.auditor.model = v.trim().to_string();
        }
        if let Some(v) = get("DOSEGATE_AUDITOR_TIMEOUT_SECS") {
            self.auditor.timeout_secs = parse_var("DOSEGATE_AUDITOR_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("DOSEGATE_AUDITOR_MAX_ATTEMPTS") {
            self.auditor.max_attempts = parse_var("DOSEGATE_AUDITOR_MAX_ATTEMPTS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let out_of_range = |field, message| Err(ConfigError::OutOfRange { field, message });

        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return out_of_range("confidenceThreshold", "must be within [0, 1]");
        }
        if self.rate_limit.max_calls_per_hour == 0 {
            return out_of_range("rateLimit.maxCallsPerHour", "must be at least 1");
        }
        if self.rate_limit.min_interval_secs == 0 {
            return out_of_range("rateLimit.minIntervalSecs", "must be at least 1");
        }
        if self.verdict_validity_secs == 0 {
            return out_of_range("verdictValiditySecs", "must be at least 1");
        }
        if self.tick_period_secs == 0 {
            return out_of_range("tickPeriodSecs", "must be at least 1");
        }
        if self.auditor.timeout_secs == 0 {
            return out_of_range("auditor.timeoutSecs", "must be at least 1");
        }
        if !(1..=MAX_AUDITOR_ATTEMPTS).contains(&self.auditor.max_attempts) {
            return out_of_range("auditor.maxAttempts", "must be within 1..=5");
        }
        if let Some(lgs) = self.hypo.low_glucose_suspend
            && !lgs.is_finite()
        {
            return out_of_range("hypo.lowGlucoseSuspend", "must be a finite number");
        }
        if let Some(endpoint) = &self.auditor.endpoint {
            let url = Url::parse(endpoint)
                .map_err(|_| ConfigError::InvalidEndpoint(endpoint.clone()))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::InvalidEndpoint(endpoint.clone()));
            }
        }

        let worst_case = self.auditor.worst_case_secs();
        if self.auditor.is_configured() && worst_case > self.tick_period_secs {
            tracing::warn!(
                worst_case_secs = worst_case,
                tick_period_secs = self.tick_period_secs,
                "auditor_retry_budget_exceeds_tick_period"
            );
        }
        Ok(())
    }
}
