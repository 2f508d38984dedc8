//! One call per control-loop tick.
//!
//! Order: hypo guard (absolute veto), safety scorer, trigger predicate,
//! sentinel, cached or freshly dispatched external verdict, combiner, mode
//! gate, then hard limits. The tick itself never awaits; auditor calls run
//! on a spawned task and land in the verdict cache for a later tick.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use dosegate_core::combiner::{AdviceSource, CombinedAdvice, combine};
use dosegate_core::config::LayerConfig;
use dosegate_core::context::TickContext;
use dosegate_core::decision::{InputError, ModulatedDecision, ProposedDose};
use dosegate_core::hypo_guard::{HypoCheck, HypoGuard, HypoState, derive_threshold};
use dosegate_core::modulation::{self, ModulationMode};
use dosegate_core::rate_limit::{RateDecision, RateLimitState, RateLimiter};
use dosegate_core::safety::{self, SafetyInput, SafetyScore};
use dosegate_core::sentinel::{SentinelAdvice, Tier, compute_advice};
use dosegate_core::status::{AuditImpact, AuditStatus, ErrorCategory, OfflineReason, SkipReason};
use dosegate_core::trigger::{self, Trigger};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use utoipa::ToSchema;

use crate::auditor::{AuditError, CognitiveAuditor, HttpAuditor};
use crate::cache::{CachedVerdict, VerdictCache};
use crate::payload::AuditRequest;
use crate::retry::{RetryPolicy, run_with_retry};

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TickOutcome {
    pub decision: ModulatedDecision,
    pub status: AuditStatus,
    pub hypo: HypoCheck,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety: Option<SafetyScore>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentinel: Option<SentinelAdvice>,
    pub trail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub status: AuditStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditSnapshot {
    pub enabled: bool,
    pub mode: ModulationMode,
    pub auditor_configured: bool,
    pub audit_in_flight: bool,
    pub last_status: Option<StatusRecord>,
    pub cached_verdict: Option<CachedVerdict>,
    pub verdict_age_secs: Option<i64>,
    pub verdict_fresh: bool,
    pub rate_limit: RateLimitState,
    pub hypo: HypoState,
}

fn record_status(slot: &RwLock<Option<StatusRecord>>, status: AuditStatus, at: DateTime<Utc>) {
    let mut slot = slot.write().unwrap_or_else(PoisonError::into_inner);
    *slot = Some(StatusRecord { status, at });
}

/// Owns all long-lived state for one patient session.
pub struct Orchestrator<A: CognitiveAuditor> {
    config: LayerConfig,
    retry: RetryPolicy,
    hypo: Mutex<HypoGuard>,
    limiter: Mutex<RateLimiter>,
    cache: Arc<VerdictCache>,
    last_status: Arc<RwLock<Option<StatusRecord>>>,
    auditor: Option<Arc<A>>,
    runtime: Option<Handle>,
    in_flight: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator<HttpAuditor> {
    /// HTTP auditor when endpoint and credentials are configured, otherwise sentinel-only.
    pub fn from_config(config: LayerConfig) -> Result<Self, AuditError> {
        let auditor = HttpAuditor::from_config(&config.auditor)?.map(Arc::new);
        Ok(Self::new(config, auditor))
    }
}

impl<A: CognitiveAuditor> Orchestrator<A> {
    /// Captures the current tokio runtime, if any, for dispatching audits.
    pub fn new(config: LayerConfig, auditor: Option<Arc<A>>) -> Self {
        let runtime = Handle::try_current().ok();
        if auditor.is_some() && runtime.is_none() {
            tracing::warn!("orchestrator_created_without_runtime");
        }
        Self {
            retry: RetryPolicy::from_config(&config),
            limiter: Mutex::new(RateLimiter::new(config.rate_limit)),
            config,
            hypo: Mutex::new(HypoGuard::new()),
            cache: Arc::new(VerdictCache::new()),
            last_status: Arc::new(RwLock::new(None)),
            auditor,
            runtime,
            in_flight: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    pub fn run_tick(
        &self,
        proposed: &ProposedDose,
        ctx: &TickContext,
        now: DateTime<Utc>,
    ) -> Result<TickOutcome, InputError> {
        proposed.validate()?;
        let mut trail = Vec::new();

        let threshold = derive_threshold(ctx.dose.min_bg, self.config.hypo.low_glucose_suspend);
        let hypo = self
            .hypo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .evaluate(
                ctx.glucose.bg,
                ctx.glucose.predicted_bg,
                ctx.glucose.eventual_bg,
                threshold,
                ctx.glucose.delta,
                now,
            );
        trail.push(hypo.describe());

        if hypo.blocked {
            let decision = ModulatedDecision::hypo_veto(proposed, trail.join(" | "));
            tracing::info!(
                cause = hypo.cause.map(|c| c.as_str()),
                effective_min_bg = hypo.effective_min_bg,
                threshold,
                "tick_vetoed"
            );
            return Ok(TickOutcome {
                trail: decision.reason.clone(),
                decision,
                status: AuditStatus::Vetoed,
                hypo,
                safety: None,
                sentinel: None,
            });
        }

        let safety = safety::score(
            &SafetyInput {
                current_bg: ctx.glucose.bg,
                predicted_bg: ctx.glucose.predicted_bg,
                bg_history: &ctx.glucose.bg_history,
                delta: ctx.glucose.delta,
                combined_delta: ctx.glucose.combined_delta,
                iob: ctx.dose.iob,
                max_iob: ctx.dose.max_iob,
                tdd_24h: ctx.dose.tdd_24h,
                tdd_per_hour: ctx.dose.tdd_last_hour,
                tir_in_hypo: ctx.dose.tir_hypo_pct,
                target_bg: ctx.dose.target_bg,
                zero_basal_minutes: ctx.dose.zero_basal_min,
            },
            self.config.drop_policy,
        );
        trail.push(format!("safety: x{:.2} ({})", safety.bolus_factor, safety.reason));

        if !self.config.enabled {
            trail.push("audit layer disabled".to_string());
            return Ok(self.finish(
                proposed, ctx, hypo, safety, None, None, AuditStatus::Disabled, trail, now,
            ));
        }

        match trigger::evaluate(ctx, proposed) {
            Trigger::PrebolusWindow => {
                trail.push("pre-bolus window: pass-through".to_string());
                return Ok(self.finish(
                    proposed,
                    ctx,
                    hypo,
                    safety,
                    None,
                    None,
                    AuditStatus::Skipped(SkipReason::PrebolusWindow),
                    trail,
                    now,
                ));
            }
            Trigger::Quiet => {
                trail.push("no trigger".to_string());
                return Ok(self.finish(
                    proposed,
                    ctx,
                    hypo,
                    safety,
                    None,
                    None,
                    AuditStatus::Skipped(SkipReason::NoTrigger),
                    trail,
                    now,
                ));
            }
            Trigger::Fired(reasons) => {
                let names: Vec<&str> = reasons.iter().map(|r| r.as_str()).collect();
                trail.push(format!("trigger: {}", names.join(",")));
            }
        }

        let sentinel = compute_advice(ctx, proposed);
        trail.push(sentinel.describe());

        let validity = Duration::seconds(self.config.verdict_validity_secs as i64);
        let (external, dispatch_status) = match self.cache.fresh(now, validity) {
            Some(cached) => {
                trail.push(format!(
                    "{} (cached {}s)",
                    cached.verdict.describe(),
                    cached.age_secs(now)
                ));
                (Some(cached.verdict), None)
            }
            None if sentinel.tier == Tier::High => (
                None,
                Some(self.dispatch_audit(proposed, ctx, &sentinel, &safety, now, &mut trail)),
            ),
            None => (None, Some(AuditStatus::Skipped(SkipReason::BelowAuditTier))),
        };

        let combined = combine(&sentinel, external.as_ref(), self.config.confidence_threshold);
        let status = dispatch_status.unwrap_or(AuditStatus::Ok(
            combined.external_impact.unwrap_or(AuditImpact::Confirmed),
        ));

        Ok(self.finish(
            proposed,
            ctx,
            hypo,
            safety,
            Some(sentinel),
            Some(combined),
            status,
            trail,
            now,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        proposed: &ProposedDose,
        ctx: &TickContext,
        hypo: HypoCheck,
        safety: SafetyScore,
        sentinel: Option<SentinelAdvice>,
        combined: Option<CombinedAdvice>,
        status: AuditStatus,
        mut trail: Vec<String>,
        now: DateTime<Utc>,
    ) -> TickOutcome {
        let (advice, status) = match (&sentinel, &combined) {
            (Some(sentinel), Some(combined)) => {
                let external_used = combined.source == AdviceSource::SentinelAndAuditor;
                if self.config.mode.applies(sentinel, external_used) {
                    (Some(combined), status)
                } else {
                    trail.push(format!("mode {}: advice not applied", self.config.mode.as_str()));
                    (None, status.withheld())
                }
            }
            _ => (None, status),
        };

        let decision = modulation::apply(proposed, &ctx.dose, &safety, advice, &mut trail);

        if status.is_terminal_audit_outcome() {
            record_status(&self.last_status, status, now);
        }

        tracing::info!(
            status = %status.label(),
            tier = sentinel.as_ref().map(|s| s.tier.as_str()),
            proposed_smb_u = proposed.smb_u,
            final_smb_u = decision.smb_u,
            applied_modulation = decision.applied_modulation,
            "tick_evaluated"
        );

        TickOutcome {
            trail: decision.reason.clone(),
            decision,
            status,
            hypo,
            safety: Some(safety),
            sentinel,
        }
    }

    fn dispatch_audit(
        &self,
        proposed: &ProposedDose,
        ctx: &TickContext,
        sentinel: &SentinelAdvice,
        safety: &SafetyScore,
        now: DateTime<Utc>,
        trail: &mut Vec<String>,
    ) -> AuditStatus {
        let Some(auditor) = &self.auditor else {
            trail.push("auditor: offline (no credentials)".to_string());
            return AuditStatus::Offline(OfflineReason::NoCredentials);
        };
        let Some(runtime) = &self.runtime else {
            tracing::error!("auditor_dispatch_without_runtime");
            trail.push("auditor: no async runtime".to_string());
            return AuditStatus::Error(ErrorCategory::Internal);
        };

        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight.as_ref().is_some_and(|task| !task.is_finished()) {
            trail.push("auditor: previous audit still in flight".to_string());
            return AuditStatus::Skipped(SkipReason::InFlight);
        }

        let decision = self
            .limiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .check_and_update(now);
        match decision {
            RateDecision::Allowed => {}
            RateDecision::Cooldown { retry_after_secs } => {
                trail.push(format!("auditor: cooldown {retry_after_secs}s"));
                return AuditStatus::Skipped(SkipReason::Cooldown);
            }
            RateDecision::HourlyCap {
                window_resets_in_secs,
            } => {
                trail.push(format!(
                    "auditor: hourly cap reached, resets in {window_resets_in_secs}s"
                ));
                return AuditStatus::Skipped(SkipReason::RateLimited);
            }
        }

        let request = AuditRequest::new(
            &self.config.auditor.model,
            *proposed,
            ctx,
            sentinel,
            safety,
            now,
        );
        trail.push(format!("auditor: dispatched {}", request.request_id));
        tracing::info!(
            request_id = %request.request_id,
            reason = sentinel.reason.as_str(),
            score = sentinel.score,
            "auditor_dispatched"
        );

        let auditor = Arc::clone(auditor);
        let cache = Arc::clone(&self.cache);
        let last_status = Arc::clone(&self.last_status);
        let policy = self.retry.clone();
        *in_flight = Some(runtime.spawn(async move {
            match run_with_retry(auditor.as_ref(), &request, &policy).await {
                Ok(verdict) => {
                    tracing::info!(
                        request_id = %request.request_id,
                        verdict = ?verdict.verdict,
                        confidence = verdict.confidence,
                        "auditor_verdict_received"
                    );
                    cache.store(CachedVerdict {
                        request_id: request.request_id,
                        verdict,
                        requested_at: request.requested_at,
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        request_id = %request.request_id,
                        category = err.category(),
                        error = %err,
                        "auditor_audit_failed"
                    );
                    record_status(&last_status, err.status(), request.requested_at);
                }
            }
        }));

        AuditStatus::Pending
    }

    /// Wait for the in-flight audit, if any. Used by replay and tests to make
    /// verdict arrival deterministic.
    pub async fn settle_pending_audit(&self) {
        let task = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task
            && let Err(err) = task.await
        {
            tracing::error!(error = %err, "auditor_task_failed");
            record_status(
                &self.last_status,
                AuditStatus::Error(ErrorCategory::Internal),
                Utc::now(),
            );
        }
    }

    pub fn last_status(&self) -> Option<StatusRecord> {
        *self.last_status.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn hypo_state(&self) -> HypoState {
        self.hypo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state()
            .clone()
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> AuditSnapshot {
        let cached_verdict = self.cache.latest();
        let validity = Duration::seconds(self.config.verdict_validity_secs as i64);
        AuditSnapshot {
            enabled: self.config.enabled,
            mode: self.config.mode,
            auditor_configured: self.auditor.is_some(),
            audit_in_flight: self
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .is_some_and(|task| !task.is_finished()),
            last_status: self.last_status(),
            verdict_age_secs: cached_verdict.as_ref().map(|c| c.age_secs(now)),
            verdict_fresh: self.cache.fresh(now, validity).is_some(),
            cached_verdict,
            rate_limit: self
                .limiter
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .state()
                .clone(),
            hypo: self.hypo_state(),
        }
    }
}
