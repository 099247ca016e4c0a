//! JSON POST with bounded retry, shared by the embedding and generation
//! backends.
//!
//! Retry strategy:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, ... (capped at 2^5)
//!
//! Exhausted retries surface as [`PortalError::Backend`].

use std::time::Duration;

use crate::error::{PortalError, Result};

pub(crate) fn client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(PortalError::backend)
}

/// How a request authenticates.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Auth<'a> {
    None,
    Bearer(&'a str),
    /// API key sent in a named header (Gemini uses `x-goog-api-key`).
    Header(&'static str, &'a str),
}

pub(crate) async fn post_json(
    client: &reqwest::Client,
    url: &str,
    auth: Auth<'_>,
    body: &serde_json::Value,
    max_retries: u32,
    label: &str,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::warn!(backend = label, attempt, "retrying backend request");
            tokio::time::sleep(delay).await;
        }

        let mut request = client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        match auth {
            Auth::None => {}
            Auth::Bearer(token) => {
                request = request.header("Authorization", format!("Bearer {}", token));
            }
            Auth::Header(name, key) => {
                request = request.header(name, key);
            }
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json()
                        .await
                        .map_err(|e| PortalError::Backend(format!("{} returned invalid JSON: {}", label, e)));
                }

                let body_text = response.text().await.unwrap_or_default();
                let err = PortalError::Backend(format!("{} API error {}: {}", label, status, body_text));

                // Rate limited or server error, retry
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(err);
                    continue;
                }

                return Err(err);
            }
            Err(e) => {
                last_err = Some(PortalError::Backend(format!(
                    "{} connection error ({}): {}",
                    label, url, e
                )));
                continue;
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| PortalError::Backend(format!("{} request failed after retries", label))))
}

/// Read a required API key from the environment.
pub(crate) fn api_key(var: &str) -> Result<String> {
    std::env::var(var).map_err(|_| PortalError::Backend(format!("{} environment variable not set", var)))
}
