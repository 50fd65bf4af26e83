use crate::config::Config;
use anyhow::Result;
use rand::Rng;
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Raw HTTP response of one attempt, any status.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Why a single attempt did not produce a usable response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptFailure {
    #[error("retryable status {0}")]
    RetryableStatus(u16),
    #[error("status {0}")]
    Status(u16),
    #[error("request timed out")]
    Timeout,
    #[error("connection error: {0}")]
    Connect(String),
    /// Status line arrived but the body could not be read
    #[error("status {status}, body read failed: {message}")]
    Body { status: u16, message: String },
    #[error("request error: {0}")]
    Request(String),
}

impl AttemptFailure {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AttemptFailure::RetryableStatus(_)
                | AttemptFailure::Timeout
                | AttemptFailure::Connect(_)
                | AttemptFailure::Body { .. }
        )
    }

    /// True when the server answered with a status line.
    pub fn got_response(&self) -> bool {
        matches!(
            self,
            AttemptFailure::RetryableStatus(_)
                | AttemptFailure::Status(_)
                | AttemptFailure::Body { .. }
        )
    }
}

/// Terminal result of a logical request whose retry budget ran out, or
/// which hit a non-retryable failure.
#[derive(Debug, Clone, Error)]
#[error("{failure} after {attempts} attempt(s)")]
pub struct TransportError {
    pub failure: AttemptFailure,
    pub attempts: u32,
    /// Whether any attempt got an HTTP response back
    pub saw_response: bool,
}

/// Body of a 2xx response plus the number of attempts it took.
#[derive(Debug, Clone)]
pub struct Delivered {
    pub body: Vec<u8>,
    pub attempts: u32,
}

/// A single, non-retrying POST of an encoded request body.
///
/// Implementations must be safe to share across workers.
pub trait InferenceClient: Send + Sync {
    fn name(&self) -> &'static str;

    fn post<'a>(
        &'a self,
        body: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<RawResponse, AttemptFailure>> + Send + 'a>>;
}

/// Mock client for dry runs (always answers 200 with a fixed score after a delay)
pub struct MockClient {
    delay_ms: u64,
    score: f64,
}

impl MockClient {
    pub fn new(delay_ms: u64, score: f64) -> Self {
        Self { delay_ms, score }
    }
}

impl InferenceClient for MockClient {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn post<'a>(
        &'a self,
        _body: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<RawResponse, AttemptFailure>> + Send + 'a>> {
        Box::pin(async move {
            sleep(Duration::from_millis(self.delay_ms)).await;
            let body = serde_json::json!({
                "outputs": [{
                    "name": "probabilities",
                    "shape": [1, 1],
                    "datatype": "FP32",
                    "data": [self.score],
                }]
            });
            Ok(RawResponse {
                status: 200,
                body: body.to_string().into_bytes(),
            })
        })
    }
}

/// HTTP/JSON client for the V2 inference endpoint over a pooled connection.
pub struct HttpClient {
    client: reqwest::Client,
    url: String,
}

impl HttpClient {
    pub fn new(url: String, timeout: Duration, pool_size: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .tcp_keepalive(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(pool_size)
            .build()?;

        Ok(Self { client, url })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.infer_url(),
            Duration::from_millis(config.target.timeout_ms),
            config.run.concurrency,
        )
    }
}

impl InferenceClient for HttpClient {
    fn name(&self) -> &'static str {
        "http"
    }

    fn post<'a>(
        &'a self,
        body: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<RawResponse, AttemptFailure>> + Send + 'a>> {
        Box::pin(async move {
            let response = self
                .client
                .post(&self.url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.to_vec())
                .send()
                .await
                .map_err(classify_reqwest_error)?;

            let status = response.status().as_u16();
            let body = response
                .bytes()
                .await
                .map_err(|e| match classify_reqwest_error(e) {
                    AttemptFailure::Connect(message) | AttemptFailure::Request(message) => {
                        AttemptFailure::Body { status, message }
                    }
                    other => other,
                })?
                .to_vec();
            Ok(RawResponse { status, body })
        })
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> AttemptFailure {
    if e.is_timeout() {
        AttemptFailure::Timeout
    } else if e.is_connect() || e.is_request() || e.is_body() {
        AttemptFailure::Connect(e.to_string())
    } else {
        AttemptFailure::Request(e.to_string())
    }
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub retry_statuses: BTreeSet<u16>,
    pub attempt_timeout: Duration,
    /// Extra random delay, up to this fraction of the backoff
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        let retry = &config.retry;
        Self {
            max_attempts: if retry.enabled { retry.max_attempts.max(1) } else { 1 },
            backoff_base: Duration::from_millis(retry.backoff_base_ms),
            retry_statuses: retry.retry_statuses.iter().copied().collect(),
            attempt_timeout: Duration::from_millis(config.target.timeout_ms),
            jitter: retry.jitter,
        }
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        let delay = self.backoff_base.saturating_mul(factor);
        if self.jitter > 0.0 {
            let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
            delay.mul_f64(1.0 + extra)
        } else {
            delay
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Issues one logical request, retrying per [`RetryPolicy`].
#[derive(Clone)]
pub struct RetryingTransport {
    client: Arc<dyn InferenceClient>,
    policy: Arc<RetryPolicy>,
}

impl RetryingTransport {
    pub fn new(client: Arc<dyn InferenceClient>, policy: RetryPolicy) -> Self {
        Self {
            client,
            policy: Arc::new(policy),
        }
    }

    pub fn client_name(&self) -> &'static str {
        self.client.name()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn send(&self, body: &[u8]) -> Result<Delivered, TransportError> {
        let mut attempt = 0u32;
        let mut saw_response = false;

        loop {
            attempt += 1;
            let failure = match self.attempt(body).await {
                Ok(response) => {
                    saw_response = true;
                    if (200..300).contains(&response.status) {
                        return Ok(Delivered {
                            body: response.body,
                            attempts: attempt,
                        });
                    }
                    if self.policy.is_retryable_status(response.status) {
                        AttemptFailure::RetryableStatus(response.status)
                    } else {
                        AttemptFailure::Status(response.status)
                    }
                }
                Err(failure) => {
                    saw_response |= failure.got_response();
                    failure
                }
            };

            if !failure.is_retryable() || attempt >= self.policy.max_attempts {
                if failure.is_retryable() {
                    warn!("Retry budget exhausted after {} attempts: {}", attempt, failure);
                }
                return Err(TransportError {
                    failure,
                    attempts: attempt,
                    saw_response,
                });
            }

            let delay = self.policy.backoff(attempt);
            debug!(
                "Attempt {} failed ({}), retrying in {}ms",
                attempt,
                failure,
                delay.as_millis()
            );
            sleep(delay).await;
        }
    }

    async fn attempt(&self, body: &[u8]) -> Result<RawResponse, AttemptFailure> {
        match tokio::time::timeout(self.policy.attempt_timeout, self.client.post(body)).await {
            Ok(result) => result,
            Err(_) => Err(AttemptFailure::Timeout),
        }
    }
}
