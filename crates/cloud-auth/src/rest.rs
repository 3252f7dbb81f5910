//! REST client with gateway-timeout retry.
//!
//! Only `504 Gateway Timeout` is retried. Every other non-success status is
//! returned immediately as [`AuthError::HttpStatus`]; running out of attempts
//! yields [`AuthError::Connectivity`].

use crate::{ApiRequest, ApiTransport, AuthError, AuthResult};
use bridge_config::Tuning;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

const GATEWAY_TIMEOUT: u16 = 504;
const BODY_LOG_LIMIT: usize = 512;

/// Attempt bound and backoff curve for REST calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub backoff_factor: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_factor: Duration::from_secs(3),
            max_backoff: Duration::from_secs(120),
        }
    }
}

impl From<&Tuning> for RetryPolicy {
    fn from(tuning: &Tuning) -> Self {
        Self {
            max_attempts: tuning.http_max_attempts,
            backoff_factor: Duration::from_secs(tuning.http_backoff_factor_secs),
            max_backoff: Duration::from_secs(tuning.http_max_backoff_secs),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-indexed):
    /// `min(factor * 2^(attempt-1), max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.backoff_factor.saturating_mul(1u32 << exponent);
        delay.min(self.max_backoff)
    }
}

/// Shared REST client used by the authenticator and the fleet directory.
pub struct RestClient<T> {
    transport: Arc<T>,
    policy: RetryPolicy,
}

impl<T> Clone for RestClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            policy: self.policy.clone(),
        }
    }
}

impl<T: ApiTransport> RestClient<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self {
            transport: Arc::new(transport),
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send `request`, retrying gateway timeouts, and parse the body as JSON.
    /// An empty success body parses as `null`.
    pub async fn request(&self, request: ApiRequest) -> AuthResult<Value> {
        let attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=attempts {
            let response = self.transport.send(&request).await?;

            if response.is_success() {
                debug!(url = %request.url, status = response.status, "Cloud API request succeeded");
                if response.body.trim().is_empty() {
                    return Ok(Value::Null);
                }
                return Ok(serde_json::from_str(&response.body)?);
            }

            if response.status != GATEWAY_TIMEOUT {
                error!(
                    severity = "critical",
                    url = %request.url,
                    status = response.status,
                    body = %truncate(&response.body),
                    "Cloud API request failed"
                );
                return Err(AuthError::HttpStatus {
                    status: response.status,
                    url: request.url.to_string(),
                    body: response.body,
                });
            }

            if attempt < attempts {
                let delay = self.policy.delay_for_attempt(attempt);
                warn!(
                    url = %request.url,
                    attempt,
                    max_attempts = attempts,
                    delay_secs = delay.as_secs(),
                    "Gateway timeout from cloud API, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }

        error!(
            severity = "critical",
            url = %request.url,
            attempts,
            "No connection to cloud API endpoint, stopping after retries"
        );
        Err(AuthError::Connectivity { attempts })
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(BODY_LOG_LIMIT) {
        Some((index, _)) => &body[..index],
        None => body,
    }
}
