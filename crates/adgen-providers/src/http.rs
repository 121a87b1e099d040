//! Shared HTTP plumbing.

use std::time::Duration;

use reqwest::{Client, Response};

use crate::error::{ProviderError, ProviderResult};

/// Default per-request timeout for provider calls.
pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest response body quoted in error messages.
const MAX_ERROR_BODY: usize = 512;

pub(crate) fn build_client(timeout: Duration) -> ProviderResult<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("adgen/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(ProviderError::Network)
}

/// Request timeout from `PROVIDER_TIMEOUT_SECS`.
pub(crate) fn timeout_from_env() -> Duration {
    std::env::var("PROVIDER_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT)
}

/// Required environment variable.
pub(crate) fn required_env(key: &str) -> ProviderResult<String> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ProviderError::config(format!("{key} not set")))
}

/// Status line plus a truncated body, for error messages.
pub(crate) async fn describe_failure(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let body = body.trim();
    if body.is_empty() {
        return status.to_string();
    }
    let mut end = body.len().min(MAX_ERROR_BODY);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}: {}", status, &body[..end])
}

pub(crate) fn trim_base_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}
