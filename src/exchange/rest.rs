//! Rate-limited JSON REST transport with retries.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};

use super::rate_limit::TokenBucket;
use crate::error::ExchangeError;
use crate::metrics;

/// Retry schedule for REST calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Upper bound before jitter.
    pub max_delay: Duration,
    /// Extra random delay as a fraction of the backoff.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_millis(350),
            max_delay: Duration::from_secs(8),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Backoff after failed attempt `attempt` (1-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff plus up to `jitter` of itself.
    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        delay + delay.mul_f64(self.jitter * rand::random::<f64>())
    }
}

/// A fully formed request. Built per attempt so signed timestamps stay fresh.
#[derive(Debug, Clone)]
pub struct RestRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL including any query string.
    pub url: String,
    /// Extra headers.
    pub headers: Vec<(&'static str, String)>,
    /// JSON body, already serialized.
    pub body: Option<String>,
}

impl RestRequest {
    /// Unsigned GET.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Request with an explicit method.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Add headers.
    pub fn with_headers(mut self, headers: Vec<(&'static str, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Attach a JSON body.
    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum RetryMode {
    Idempotent,
    AtMostOnce,
}

impl RetryMode {
    fn should_retry(self, err: &ExchangeError) -> bool {
        match self {
            RetryMode::Idempotent => err.is_retryable(),
            RetryMode::AtMostOnce => err.never_delivered(),
        }
    }
}

/// HTTP client shared by a venue adapter.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    limiter: Arc<TokenBucket>,
    retry: RetryPolicy,
}

impl RestClient {
    /// Create a client with pooled, keep-alive connections.
    pub fn new(limiter: Arc<TokenBucket>, retry: RetryPolicy) -> Result<Self, ExchangeError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(5))
            .tcp_nodelay(true)
            .tcp_keepalive(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self { http, limiter, retry })
    }

    /// Send a read request built by `build`, retrying transient failures.
    ///
    /// `endpoint` labels logs and metrics. Errors from `build` and client
    /// errors other than 429 are returned immediately.
    pub async fn send<F>(&self, endpoint: &str, build: F) -> Result<Value, ExchangeError>
    where
        F: Fn() -> Result<RestRequest, ExchangeError> + Send + Sync,
    {
        self.send_with(endpoint, RetryMode::Idempotent, build).await
    }

    /// Send an order-mutating request. Only failures where the venue never
    /// saw the request are retried, so an order is never placed twice.
    pub async fn send_order<F>(&self, endpoint: &str, build: F) -> Result<Value, ExchangeError>
    where
        F: Fn() -> Result<RestRequest, ExchangeError> + Send + Sync,
    {
        self.send_with(endpoint, RetryMode::AtMostOnce, build).await
    }

    async fn send_with<F>(&self, endpoint: &str, mode: RetryMode, build: F) -> Result<Value, ExchangeError>
    where
        F: Fn() -> Result<RestRequest, ExchangeError> + Send + Sync,
    {
        let mut attempt = 1;
        loop {
            let request = build()?;
            match self.send_once(endpoint, request).await {
                Ok(value) => return Ok(value),
                Err(e) if !mode.should_retry(&e) => {
                    warn!(endpoint, attempt, error = %e, "REST request failed, not retryable");
                    return Err(e);
                }
                Err(e) if attempt >= self.retry.max_attempts => {
                    warn!(endpoint, attempt, error = %e, "REST request failed, giving up");
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.retry.delay_with_jitter(attempt);
                    warn!(
                        endpoint,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "REST request failed, retrying"
                    );
                    metrics::inc_http_retries(endpoint);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn send_once(&self, endpoint: &str, request: RestRequest) -> Result<Value, ExchangeError> {
        self.limiter.acquire(1.0).await;

        let start = Instant::now();
        let mut builder = self.http.request(request.method, &request.url);
        for (key, value) in request.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = request.body {
            builder = builder.header("Content-Type", "application/json").body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        metrics::record_http_latency(start, endpoint);

        if status.as_u16() >= 400 {
            return Err(ExchangeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!(endpoint, status = status.as_u16(), "REST response");

        serde_json::from_str(&body).map_err(|e| ExchangeError::Parse(format!("{endpoint}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_client(max_attempts: u32) -> RestClient {
        let retry = RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: 0.25,
        };
        RestClient::new(Arc::new(TokenBucket::new(1000.0, 100.0)), retry).unwrap()
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(350));
        assert_eq!(policy.backoff(2), Duration::from_millis(700));
        assert_eq!(policy.backoff(6), Duration::from_secs(8));
        let jittered = policy.delay_with_jitter(2);
        assert!(jittered >= Duration::from_millis(700));
        assert!(jittered <= Duration::from_millis(875));
    }

    #[tokio::test]
    async fn returns_json_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
            .mount(&server)
            .await;

        let client = fast_client(3);
        let url = format!("{}/ping", server.uri());
        let value = client.send("/ping", || Ok(RestRequest::get(url.clone()))).await.unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn retries_until_attempts_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fail"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(3)
            .mount(&server)
            .await;

        let client = fast_client(3);
        let url = format!("{}/fail", server.uri());
        let err = client.send("/fail", || Ok(RestRequest::get(url.clone()))).await.unwrap_err();
        match err {
            ExchangeError::Status { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bad"))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"code":-1100}"#))
            .expect(1)
            .mount(&server)
            .await;

        let client = fast_client(6);
        let url = format!("{}/bad", server.uri());
        let err = client.send("/bad", || Ok(RestRequest::get(url.clone()))).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Status { status: 400, .. }));
    }

    #[tokio::test]
    async fn rate_limited_reads_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(429))
            .expect(2)
            .mount(&server)
            .await;

        let client = fast_client(2);
        let url = format!("{}/busy", server.uri());
        let err = client.send("/busy", || Ok(RestRequest::get(url.clone()))).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Status { status: 429, .. }));
    }

    #[tokio::test]
    async fn orders_are_not_resent_after_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/order"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unknown"))
            .expect(1)
            .mount(&server)
            .await;

        let client = fast_client(6);
        let url = format!("{}/order", server.uri());
        let err = client
            .send_order("/order", || Ok(RestRequest::new(Method::POST, url.clone())))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn build_errors_are_not_retried() {
        let client = fast_client(6);
        let err = client
            .send("/signed", || Err(ExchangeError::MissingCredentials("binance")))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::MissingCredentials("binance")));
    }
}
