//! Guarded fetch
//!
//! [`FetchGuard::fetch`] sends one request with a bounded retry loop and
//! classifies the outcome into exactly one terminal path:
//!
//! - 2xx: the decoded body (JSON or text)
//! - 401/403: notify, hand the return path to the [`UnauthorizedHandler`],
//!   fail with [`FetchError::Unauthorized`]
//! - other non-2xx: notify the best-effort server message, fail with
//!   [`FetchError::Http`]
//! - no response at all: notify `Network error`, fail with
//!   [`FetchError::Network`]
//!
//! Only idempotent methods are retried, and only on transport failures or
//! the statuses in [`RetryPolicy::retry_statuses`].

use crate::error::{FetchError, Result};
use crate::notify::{Notification, Notifier, UnauthorizedHandler};
use reqwest::{Client, Method, Request, Response, StatusCode, header};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use teaim_core::REQUEST_ID_HEADER;
use tracing::{debug, warn};

/// Longest server text echoed back to the user
const MAX_TEXT_MESSAGE_CHARS: usize = 200;

/// Retry settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts for idempotent methods
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles for each one after
    pub base_delay: Duration,

    /// Response statuses worth another attempt
    pub retry_statuses: Vec<u16>,

    /// Methods that may be sent more than once
    pub idempotent_methods: Vec<Method>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            retry_statuses: vec![429, 502, 503, 504],
            idempotent_methods: vec![Method::GET, Method::HEAD],
        }
    }
}

impl RetryPolicy {
    pub fn is_idempotent(&self, method: &Method) -> bool {
        self.idempotent_methods.contains(method)
    }

    pub fn should_retry_status(&self, status: StatusCode) -> bool {
        self.retry_statuses.contains(&status.as_u16())
    }

    /// Attempts allowed for a method
    pub fn attempts_for(&self, method: &Method) -> u32 {
        if self.is_idempotent(method) {
            self.max_attempts.max(1)
        } else {
            1
        }
    }

    /// Sleep after `attempt` (1-based) fails: `base * 2^(attempt-1)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Successful response body
#[derive(Debug, Clone, PartialEq)]
pub enum GuardedBody {
    Json(Value),
    Text(String),
}

impl GuardedBody {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            GuardedBody::Json(v) => Some(v),
            GuardedBody::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            GuardedBody::Text(s) => Some(s),
            GuardedBody::Json(_) => None,
        }
    }
}

/// HTTP client wrapper with retries and user-facing failure reporting
#[derive(Clone)]
pub struct FetchGuard {
    client: Client,
    notifier: Arc<dyn Notifier>,
    unauthorized: Arc<dyn UnauthorizedHandler>,
    policy: RetryPolicy,
}

impl FetchGuard {
    pub fn new(
        client: Client,
        notifier: Arc<dyn Notifier>,
        unauthorized: Arc<dyn UnauthorizedHandler>,
    ) -> Self {
        Self {
            client,
            notifier,
            unauthorized,
            policy: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Send `request` and classify the result
    pub async fn fetch(&self, request: Request) -> Result<GuardedBody> {
        let method = request.method().clone();
        let idempotent = self.policy.is_idempotent(&method);
        let return_to = return_path(&request);
        let outgoing_request_id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // Streaming bodies cannot be replayed
        let attempts = if request.try_clone().is_some() {
            self.policy.attempts_for(&method)
        } else {
            1
        };

        let mut pending = Some(request);
        let mut response: Option<Response> = None;
        let mut network_error: Option<reqwest::Error> = None;

        for attempt in 1..=attempts {
            let is_last = attempt == attempts;
            let next = if is_last {
                pending.take()
            } else {
                pending.as_ref().and_then(Request::try_clone)
            };
            let Some(req) = next else {
                break;
            };

            match self.client.execute(req).await {
                Ok(resp) => {
                    let status = resp.status();
                    if !is_last && self.policy.should_retry_status(status) {
                        let delay = self.policy.backoff(attempt);
                        warn!(
                            %method,
                            status = status.as_u16(),
                            attempt,
                            attempts,
                            delay_ms = delay.as_millis() as u64,
                            "Retryable status, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    response = Some(resp);
                    break;
                }
                Err(err) => {
                    if !idempotent {
                        debug!(%method, error = %err, "Network error on non-idempotent request");
                        network_error = Some(err);
                        break;
                    }
                    warn!(%method, error = %err, attempt, attempts, "Network error");
                    network_error = Some(err);
                    if !is_last {
                        tokio::time::sleep(self.policy.backoff(attempt)).await;
                    }
                }
            }
        }

        let Some(response) = response else {
            return Err(match network_error {
                Some(source) => {
                    self.notifier.notify(
                        Notification::error("Network error")
                            .with_request_id(outgoing_request_id.clone()),
                    );
                    FetchError::Network {
                        source,
                        request_id: outgoing_request_id,
                    }
                }
                None => FetchError::Config("request could not be sent".to_string()),
            });
        };

        let status = response.status();

        if status.is_success() {
            return read_success(response).await;
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!(status = status.as_u16(), return_to = %return_to, "Unauthorized response");
            self.notifier
                .notify(Notification::warning("Your session has expired. Please sign in again."));
            self.unauthorized.on_unauthorized(&return_to);
            return Err(FetchError::Unauthorized {
                status: status.as_u16(),
            });
        }

        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let message = error_message(response).await;

        debug!(status = status.as_u16(), message = %message, "Request failed");
        self.notifier
            .notify(Notification::error(message.clone()).with_request_id(request_id.clone()));

        Err(FetchError::Http {
            status: status.as_u16(),
            message,
            request_id,
        })
    }
}

/// Path and query of the request, for the post-sign-in redirect
fn return_path(request: &Request) -> String {
    let url = request.url();
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("application/json"))
}

async fn read_success(response: Response) -> Result<GuardedBody> {
    if is_json(&response) {
        response
            .json::<Value>()
            .await
            .map(GuardedBody::Json)
            .map_err(FetchError::Decode)
    } else {
        response
            .text()
            .await
            .map(GuardedBody::Text)
            .map_err(FetchError::Decode)
    }
}

/// Best-effort message: JSON `error` field, else leading text, else `HTTP <status>`
async fn error_message(response: Response) -> String {
    let fallback = format!("HTTP {}", response.status().as_u16());
    let json = is_json(&response);

    let Ok(text) = response.text().await else {
        return fallback;
    };

    if json {
        return serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| match v.get("error") {
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                _ => None,
            })
            .unwrap_or(fallback);
    }

    let snippet: String = text.chars().take(MAX_TEXT_MESSAGE_CHARS).collect();
    if snippet.trim().is_empty() {
        fallback
    } else {
        snippet
    }
}
