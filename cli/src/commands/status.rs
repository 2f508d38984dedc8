use crate::util::api_get;

/// Audit snapshot of the session served by the API: last terminal status,
/// cached verdict and its age, rate-limit window.
pub async fn run(api_url: &str) -> i32 {
    api_get(api_url, "/v1/audit/status").await
}
