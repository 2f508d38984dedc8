use std::future::Future;
use std::time::Duration;

use dosegate_core::config::AuditorConfig;
use dosegate_core::status::{AuditStatus, ErrorCategory, OfflineReason};
use dosegate_core::verdict::VerdictParseError;
use thiserror::Error;
use url::Url;

use crate::payload::{AuditRequest, digest};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AuditError {
    #[error("auditor call timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("dns lookup failed: {0}")]
    Dns(String),
    #[error("auditor returned HTTP {status}")]
    Http { status: u16 },
    #[error("auditor rejected credentials (HTTP {status})")]
    Auth { status: u16 },
    #[error("unusable verdict: {0}")]
    Parse(#[from] VerdictParseError),
    #[error("internal auditor error: {0}")]
    Internal(String),
}

impl AuditError {
    /// Only transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuditError::Timeout | AuditError::Network(_) | AuditError::Dns(_)
        )
    }

    pub fn status(&self) -> AuditStatus {
        match self {
            AuditError::Timeout => AuditStatus::Error(ErrorCategory::Timeout),
            AuditError::Network(_) => AuditStatus::Offline(OfflineReason::NoNetwork),
            AuditError::Dns(_) => AuditStatus::Offline(OfflineReason::DnsFailure),
            AuditError::Http { .. } => AuditStatus::Error(ErrorCategory::Http),
            AuditError::Auth { .. } => AuditStatus::Error(ErrorCategory::Auth),
            AuditError::Parse(_) => AuditStatus::Error(ErrorCategory::Parse),
            AuditError::Internal(_) => AuditStatus::Error(ErrorCategory::Internal),
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            AuditError::Timeout => "timeout",
            AuditError::Network(_) => "network",
            AuditError::Dns(_) => "dns",
            AuditError::Http { .. } => "http",
            AuditError::Auth { .. } => "auth",
            AuditError::Parse(_) => "parse",
            AuditError::Internal(_) => "internal",
        }
    }
}

/// Remote cognitive audit service. Returns the raw response text; parsing and
/// clamping stay on this side of the seam.
pub trait CognitiveAuditor: Send + Sync + 'static {
    fn request_verdict(
        &self,
        request: &AuditRequest,
    ) -> impl Future<Output = Result<String, AuditError>> + Send;
}

fn classify_transport_error(err: &reqwest::Error) -> AuditError {
    if err.is_timeout() {
        return AuditError::Timeout;
    }
    let message = format!("{err:?}").to_lowercase();
    if message.contains("dns error")
        || message.contains("failed to lookup address")
        || message.contains("name or service not known")
    {
        return AuditError::Dns(err.to_string());
    }
    if err.is_connect() || err.is_request() {
        return AuditError::Network(err.to_string());
    }
    AuditError::Internal(err.to_string())
}

/// JSON-over-HTTPS auditor with bearer credentials. Not `Debug`: it holds the key.
#[derive(Clone)]
pub struct HttpAuditor {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
}

impl HttpAuditor {
    pub fn new(endpoint: Url, api_key: String, timeout: Duration) -> Result<Self, AuditError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuditError::Internal(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    /// `None` when endpoint or credentials are missing.
    pub fn from_config(config: &AuditorConfig) -> Result<Option<Self>, AuditError> {
        if !config.is_configured() {
            return Ok(None);
        }
        let (Some(endpoint), Some(api_key)) = (&config.endpoint, &config.api_key) else {
            return Ok(None);
        };
        let endpoint = Url::parse(endpoint)
            .map_err(|e| AuditError::Internal(format!("invalid auditor endpoint: {e}")))?;
        Self::new(
            endpoint,
            api_key.clone(),
            Duration::from_secs(config.timeout_secs),
        )
        .map(Some)
    }
}

impl CognitiveAuditor for HttpAuditor {
    async fn request_verdict(&self, request: &AuditRequest) -> Result<String, AuditError> {
        let body = request
            .to_bytes()
            .map_err(|e| AuditError::Internal(format!("failed to serialize audit request: {e}")))?;
        tracing::debug!(
            request_id = %request.request_id,
            payload_sha256 = %digest(&body),
            "auditor_request_sent"
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AuditError::Auth {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(AuditError::Http {
                status: status.as_u16(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| classify_transport_error(&e))
    }
}
