//! Tessera Webhook Delivery
//!
//! POSTs JSON to a single configured endpoint with a shared-secret bearer
//! header. Delivery is retried with exponential backoff on timeouts,
//! connection failures, 408, 429 and 5xx. A 409 means the receiver already
//! has the event and counts as delivered. Any other non-2xx fails at once.

pub mod retry;

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use tessera_types::ErrorClass;

pub use retry::RetryPolicy;

/// Webhook delivery errors
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Webhook rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Webhook delivery failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error("Webhook client error: {0}")]
    Client(String),
}

impl WebhookError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Rejected { .. } => ErrorClass::Validation,
            Self::Exhausted { .. } => ErrorClass::Transient,
            Self::Client(_) => ErrorClass::FatalConfig,
        }
    }
}

pub type Result<T> = std::result::Result<T, WebhookError>;

/// Webhook configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    /// Sent as `Authorization: Bearer <secret>`
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Total attempts, including the first
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    6
}

impl WebhookConfig {
    pub fn send_options(&self) -> SendOptions {
        SendOptions {
            timeout: Duration::from_millis(self.timeout_ms),
            max_retries: self.max_retries,
        }
    }
}

/// Per-call delivery limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    /// Bound on each individual attempt
    pub timeout: Duration,
    /// Total attempts, including the first
    pub max_retries: u32,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(default_timeout_ms()),
            max_retries: default_max_retries(),
        }
    }
}

/// A successful delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub attempts: u32,
    pub status: u16,
}

enum AttemptOutcome {
    Delivered(StatusCode),
    Retry(String),
    Fail(StatusCode, String),
}

/// Webhook sender
#[derive(Clone)]
pub struct WebhookClient {
    client: Client,
    url: String,
    secret: Option<String>,
    policy: RetryPolicy,
}

impl WebhookClient {
    pub fn new(url: impl Into<String>, secret: Option<String>, policy: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| WebhookError::Client(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            secret,
            policy,
        })
    }

    pub fn from_config(config: &WebhookConfig) -> Result<Self> {
        Self::new(config.url.clone(), config.secret.clone(), config.retry.clone())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Deliver `payload`, retrying transient failures per the retry policy
    pub async fn send<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        options: SendOptions,
    ) -> Result<Delivery> {
        let body = serde_json::to_vec(payload).map_err(|e| WebhookError::Client(e.to_string()))?;
        let max_attempts = options.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.attempt(&body, options.timeout).await {
                AttemptOutcome::Delivered(status) => {
                    info!(url = %self.url, attempt, status = status.as_u16(), "Webhook delivered");
                    return Ok(Delivery {
                        attempts: attempt,
                        status: status.as_u16(),
                    });
                }
                AttemptOutcome::Fail(status, body) => {
                    warn!(url = %self.url, attempt, status = status.as_u16(), "Webhook rejected");
                    return Err(WebhookError::Rejected {
                        status: status.as_u16(),
                        body,
                    });
                }
                AttemptOutcome::Retry(reason) => {
                    last_error = reason;
                    if attempt < max_attempts {
                        let delay = self.policy.backoff(attempt);
                        debug!(
                            url = %self.url,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %last_error,
                            "Webhook attempt failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        warn!(url = %self.url, attempts = max_attempts, error = %last_error, "Webhook delivery exhausted");
        Err(WebhookError::Exhausted {
            attempts: max_attempts,
            last_error,
        })
    }

    async fn attempt(&self, body: &[u8], timeout: Duration) -> AttemptOutcome {
        let mut request = self
            .client
            .post(&self.url)
            .timeout(timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec());
        if let Some(secret) = &self.secret {
            request = request.bearer_auth(secret);
        }

        match request.send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() || status == StatusCode::CONFLICT {
                    AttemptOutcome::Delivered(status)
                } else if is_retryable_status(status) {
                    AttemptOutcome::Retry(format!("HTTP {}", status.as_u16()))
                } else {
                    AttemptOutcome::Fail(status, resp.text().await.unwrap_or_default())
                }
            }
            Err(e) if e.is_builder() => AttemptOutcome::Fail(StatusCode::BAD_REQUEST, e.to_string()),
            Err(e) if e.is_timeout() => AttemptOutcome::Retry(format!("timeout: {}", e)),
            Err(e) => AttemptOutcome::Retry(e.to_string()),
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    struct Hook {
        hits: Arc<AtomicUsize>,
        fail_first: usize,
        failure: axum::http::StatusCode,
    }

    async fn hook(State(hook): State<Hook>, headers: HeaderMap) -> axum::http::StatusCode {
        let n = hook.hits.fetch_add(1, Ordering::SeqCst) + 1;
        let authorized = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            == Some("Bearer s3cret");
        if !authorized {
            return axum::http::StatusCode::UNAUTHORIZED;
        }
        if n <= hook.fail_first {
            hook.failure
        } else {
            axum::http::StatusCode::OK
        }
    }

    async fn serve(fail_first: usize, failure: axum::http::StatusCode) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let state = Hook {
            hits: hits.clone(),
            fail_first,
            failure,
        };
        let router = Router::new().route("/hook", post(hook)).with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (format!("http://{}/hook", addr), hits)
    }

    fn client(url: String) -> WebhookClient {
        WebhookClient::new(url, Some("s3cret".to_string()), RetryPolicy::immediate()).unwrap()
    }

    fn options() -> SendOptions {
        SendOptions {
            timeout: Duration::from_secs(2),
            max_retries: 6,
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let (url, hits) = serve(5, axum::http::StatusCode::SERVICE_UNAVAILABLE).await;
        let delivery = client(url)
            .send(&serde_json::json!({"nonce": 1}), options())
            .await
            .unwrap();

        assert_eq!(delivery.attempts, 6);
        assert_eq!(delivery.status, 200);
        assert_eq!(hits.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_not_found_fails_immediately() {
        let (url, hits) = serve(usize::MAX, axum::http::StatusCode::NOT_FOUND).await;
        let err = client(url)
            .send(&serde_json::json!({"nonce": 1}), options())
            .await
            .unwrap_err();

        assert!(matches!(err, WebhookError::Rejected { status: 404, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_conflict_counts_as_delivered() {
        let (url, hits) = serve(usize::MAX, axum::http::StatusCode::CONFLICT).await;
        let delivery = client(url)
            .send(&serde_json::json!({"nonce": 1}), options())
            .await
            .unwrap();

        assert_eq!(delivery.status, 409);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_retries() {
        let (url, hits) = serve(usize::MAX, axum::http::StatusCode::TOO_MANY_REQUESTS).await;
        let err = client(url)
            .send(
                &serde_json::json!({"nonce": 1}),
                SendOptions {
                    timeout: Duration::from_secs(2),
                    max_retries: 3,
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, WebhookError::Exhausted { attempts: 3, .. }));
        assert!(err.class().is_retryable());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_missing_secret_is_rejected() {
        let (url, _) = serve(0, axum::http::StatusCode::OK).await;
        let client = WebhookClient::new(url, None, RetryPolicy::immediate()).unwrap();
        let err = client
            .send(&serde_json::json!({}), options())
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::Rejected { status: 401, .. }));
    }

    #[test]
    fn test_config_defaults() {
        let config: WebhookConfig =
            serde_json::from_str(r#"{"url":"http://hooks.local/bundles"}"#).unwrap();
        assert_eq!(config.send_options(), SendOptions::default());
        assert_eq!(config.retry, RetryPolicy::default());
    }
}
