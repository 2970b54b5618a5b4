//! Rate-limited HTTP client shared by the source adapters.
//!
//! Every attempt is charged to the provider's [`CallBudget`] before it is
//! sent. Network errors, timeouts, 408/429 and 5xx responses are retried with
//! exponential backoff; other 4xx responses are fatal for the source.

use crate::core::context::CallBudget;
use crate::domain::source::SourceId;
use crate::utils::error::{EtlError, Result};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, doubling from `base_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// A GET request: endpoint plus query pairs and headers.
#[derive(Debug, Clone, Default)]
pub struct ApiRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }
}

pub struct RateLimitedClient {
    source: SourceId,
    client: Client,
    retry: RetryPolicy,
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimitedClient {
    pub fn new(source: SourceId, timeout: Duration, retry: RetryPolicy, min_interval: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("trade-balance-etl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EtlError::ConfigError {
                message: format!("cannot build HTTP client for {}: {}", source, e),
            })?;

        Ok(Self {
            source,
            client,
            retry,
            min_interval,
            last_call: Mutex::new(None),
        })
    }

    /// Parsed JSON body, or `None` when the provider answers with no content.
    pub async fn get_json(
        &self,
        budget: &mut CallBudget,
        request: &ApiRequest,
    ) -> Result<Option<serde_json::Value>> {
        let name = self.source.name();
        let mut last_error = None;
        let mut next_delay = Duration::ZERO;

        for attempt in 1..=self.retry.max_attempts.max(1) {
            if attempt > 1 {
                tracing::debug!(source = name, attempt, delay_ms = next_delay.as_millis() as u64, "retrying request");
                tokio::time::sleep(next_delay).await;
            }

            budget.try_consume(self.source)?;
            self.pace().await;

            let mut builder = self.client.get(&request.url).query(&request.query);
            for (key, value) in &request.headers {
                builder = builder.header(key.as_str(), value.as_str());
            }

            tracing::debug!(source = name, url = %request.url, attempt, "sending request");

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status == StatusCode::NO_CONTENT {
                        return Ok(None);
                    }

                    if status.is_success() {
                        let body = match response.text().await {
                            Ok(body) => body,
                            Err(e) => {
                                tracing::warn!(source = name, attempt, error = %e, "response body cut off");
                                next_delay = self.retry.backoff(attempt);
                                last_error = Some(EtlError::transient(name, format!("reading body: {}", e)));
                                continue;
                            }
                        };
                        if body.trim().is_empty() {
                            return Ok(None);
                        }
                        return serde_json::from_str(&body)
                            .map(Some)
                            .map_err(|e| EtlError::schema(name, format!("response is not JSON: {}", e)));
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        next_delay = retry_after(response.headers())
                            .unwrap_or_else(|| self.retry.backoff(attempt))
                            .min(self.retry.max_delay);
                        tracing::warn!(source = name, attempt, "rate limited by provider");
                        last_error = Some(EtlError::transient(name, "HTTP 429 Too Many Requests"));
                        continue;
                    }

                    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
                        tracing::warn!(source = name, attempt, status = status.as_u16(), "provider error");
                        next_delay = self.retry.backoff(attempt);
                        last_error = Some(EtlError::transient(name, format!("HTTP {}", status)));
                        continue;
                    }

                    let detail = response.text().await.unwrap_or_default();
                    let detail: String = detail.chars().take(200).collect();
                    return Err(EtlError::fatal(name, format!("HTTP {}: {}", status, detail)));
                }
                Err(e) if e.is_builder() => {
                    return Err(EtlError::fatal(name, format!("malformed request: {}", e)));
                }
                Err(e) => {
                    tracing::warn!(source = name, attempt, error = %e, "request failed");
                    next_delay = self.retry.backoff(attempt);
                    last_error = Some(EtlError::transient(name, e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| EtlError::transient(name, "max retries exceeded")))
    }

    /// Keeps at least `min_interval` between consecutive calls.
    async fn pace(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let wait = {
            let mut last = match self.last_call.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let now = Instant::now();
            let wait = last
                .map(|prev| self.min_interval.saturating_sub(now.duration_since(prev)))
                .unwrap_or(Duration::ZERO);
            *last = Some(now + wait);
            wait
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

/// `Retry-After` given in seconds. The HTTP-date form is ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
