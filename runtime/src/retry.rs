use std::time::Duration;

use dosegate_core::config::LayerConfig;
use dosegate_core::verdict::{AuditorVerdict, parse_verdict};

use crate::auditor::{AuditError, CognitiveAuditor};
use crate::payload::AuditRequest;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Hard per-attempt wall clock
    pub attempt_timeout: Duration,
    /// Sleep before attempt `i + 2`
    pub backoff: Vec<Duration>,
    /// Upper bound on the whole audit including backoff
    pub overall_budget: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &LayerConfig) -> Self {
        Self {
            max_attempts: config.auditor.max_attempts.max(1),
            attempt_timeout: Duration::from_secs(config.auditor.timeout_secs),
            backoff: config
                .auditor
                .backoff_schedule_secs()
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
            overall_budget: Duration::from_secs(config.tick_period_secs),
        }
    }
}

async fn attempts<A: CognitiveAuditor>(
    auditor: &A,
    request: &AuditRequest,
    policy: &RetryPolicy,
) -> Result<AuditorVerdict, AuditError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let outcome = match tokio::time::timeout(
            policy.attempt_timeout,
            auditor.request_verdict(request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AuditError::Timeout),
        };

        let err = match outcome {
            Ok(raw) => return parse_verdict(&raw).map_err(AuditError::from),
            Err(err) => err,
        };

        let retryable = err.is_retryable();
        tracing::warn!(
            request_id = %request.request_id,
            attempt,
            max_attempts = policy.max_attempts,
            category = err.category(),
            retryable,
            error = %err,
            "auditor_call_failed"
        );
        if !retryable || attempt >= policy.max_attempts {
            return Err(err);
        }

        let delay = policy
            .backoff
            .get((attempt - 1) as usize)
            .copied()
            .unwrap_or_default();
        tokio::time::sleep(delay).await;
    }
}

/// Call the auditor under the retry policy and parse the verdict.
///
/// Timeouts, I/O and DNS failures are retried with backoff; parse, HTTP and
/// auth failures are terminal. The whole sequence is cut off at the overall
/// budget and reported as a timeout.
pub async fn run_with_retry<A: CognitiveAuditor>(
    auditor: &A,
    request: &AuditRequest,
    policy: &RetryPolicy,
) -> Result<AuditorVerdict, AuditError> {
    match tokio::time::timeout(policy.overall_budget, attempts(auditor, request, policy)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                request_id = %request.request_id,
                budget_secs = policy.overall_budget.as_secs(),
                "auditor_budget_exhausted"
            );
            Err(AuditError::Timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedAuditor, audit_request, soften_verdict_json};
    use dosegate_core::verdict::{VerdictKind, VerdictParseError};

    fn policy() -> RetryPolicy {
        RetryPolicy::from_config(&LayerConfig::default())
    }

    #[test]
    fn policy_follows_config() {
        let policy = policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.attempt_timeout, Duration::from_secs(45));
        assert_eq!(
            policy.backoff,
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
        assert_eq!(policy.overall_budget, Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_until_success() {
        let auditor = ScriptedAuditor::new(vec![
            Err(AuditError::Network("connection reset".into())),
            Err(AuditError::Dns("no such host".into())),
            Ok(soften_verdict_json(0.5)),
        ]);
        let started = tokio::time::Instant::now();
        let verdict = run_with_retry(&auditor, &audit_request(), &policy())
            .await
            .unwrap();
        assert_eq!(verdict.verdict, VerdictKind::Soften);
        assert_eq!(auditor.calls(), 3);
        assert!(started.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn parse_failure_is_not_retried() {
        let auditor = ScriptedAuditor::new(vec![Ok("I think the dose is fine.".into())]);
        let err = run_with_retry(&auditor, &audit_request(), &policy())
            .await
            .unwrap_err();
        assert_eq!(err, AuditError::Parse(VerdictParseError::NoJsonObject));
        assert_eq!(auditor.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_is_not_retried() {
        let auditor = ScriptedAuditor::new(vec![
            Err(AuditError::Auth { status: 401 }),
            Ok(soften_verdict_json(0.5)),
        ]);
        let err = run_with_retry(&auditor, &audit_request(), &policy())
            .await
            .unwrap_err();
        assert_eq!(err, AuditError::Auth { status: 401 });
        assert_eq!(auditor.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_auditor_hits_per_attempt_timeout_on_every_attempt() {
        let auditor = ScriptedAuditor::new(vec![]).with_delay(Duration::from_secs(120));
        let err = run_with_retry(&auditor, &audit_request(), &policy())
            .await
            .unwrap_err();
        assert_eq!(err, AuditError::Timeout);
        assert_eq!(auditor.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn overall_budget_bounds_the_whole_sequence() {
        let mut policy = policy();
        policy.overall_budget = Duration::from_secs(60);
        let auditor = ScriptedAuditor::new(vec![]).with_delay(Duration::from_secs(120));
        let started = tokio::time::Instant::now();
        let err = run_with_retry(&auditor, &audit_request(), &policy)
            .await
            .unwrap_err();
        assert_eq!(err, AuditError::Timeout);
        assert!(started.elapsed() <= Duration::from_secs(61));
        assert_eq!(auditor.calls(), 2);
    }
}
