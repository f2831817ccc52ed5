//! HTTP client with per-call timeout and exponential-backoff retries.

use reqwest::{Client as ReqwestClient, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use super::error::GatewayError;
use crate::config::HttpConfig;

/// Longest `Retry-After` the client will honour before falling back to backoff.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Whether a request may be repeated after it possibly reached the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// Reads, deletes, upserts, and creates carrying a provider-recognised
    /// deduplication key.
    Idempotent,
    /// Non-idempotent creates. Only retried when the provider provably did
    /// not process the request (429, connection refused).
    SingleAttempt,
}

#[derive(Clone)]
pub struct HttpClient {
    client: ReqwestClient,
    max_attempts: usize,
    base_backoff: Duration,
}

impl HttpClient {
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    pub fn from_config(config: &HttpConfig) -> Result<Self, GatewayError> {
        Self::builder()
            .timeout(config.timeout())
            .max_attempts(config.retry_attempts)
            .base_backoff(config.retry_base_delay())
            .build()
    }

    pub fn request<U>(&self, method: Method, url: U) -> RequestBuilder
    where
        U: reqwest::IntoUrl,
    {
        self.client.request(method, url)
    }

    /// Execute with retries; non-success statuses become [`GatewayError`].
    pub async fn send(&self, builder: RequestBuilder, retry: Retry) -> Result<Response, GatewayError> {
        let attempts = self.max_attempts.max(1);

        for attempt in 0..attempts {
            let request = builder
                .try_clone()
                .ok_or_else(|| GatewayError::Transport("request body cannot be cloned".into()))?
                .build()
                .map_err(|err| GatewayError::Transport(err.to_string()))?;

            let method = request.method().clone();
            let url = request.url().clone();
            let last_attempt = attempt + 1 >= attempts;
            debug!(attempt = attempt + 1, %method, %url, "sending HTTP request");

            match self.client.execute(request).await {
                Ok(response) => {
                    let status = response.status();
                    debug!(attempt = attempt + 1, %method, %url, %status, "received HTTP response");

                    if status.is_success() {
                        return Ok(response);
                    }

                    if !last_attempt && should_retry_status(status, retry) {
                        let delay = retry_after(&response)
                            .unwrap_or_else(|| self.backoff_delay(attempt + 1));
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    let body = response.text().await.unwrap_or_default();
                    return Err(GatewayError::from_status(status, body));
                }
                Err(err) => {
                    debug!(attempt = attempt + 1, %method, %url, error = %err, "HTTP request failed");

                    if !last_attempt && should_retry_error(&err, retry) {
                        self.sleep_with_backoff(attempt + 1).await;
                        continue;
                    }

                    return Err(GatewayError::Transport(err.to_string()));
                }
            }
        }

        Err(GatewayError::Transport(
            "http client exhausted retries without producing a result".into(),
        ))
    }

    pub async fn send_json<T>(&self, builder: RequestBuilder, retry: Retry) -> Result<T, GatewayError>
    where
        T: DeserializeOwned,
    {
        let response = self.send(builder, retry).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|err| GatewayError::Decode(err.to_string()))
    }

    /// Execute and discard the body.
    pub async fn send_empty(&self, builder: RequestBuilder, retry: Retry) -> Result<(), GatewayError> {
        self.send(builder, retry).await.map(|_| ())
    }

    fn backoff_delay(&self, retry_number: usize) -> Duration {
        let shift = retry_number.saturating_sub(1).min(8) as u32;
        let multiplier = 1u32 << shift;
        self.base_backoff.saturating_mul(multiplier)
    }

    async fn sleep_with_backoff(&self, retry_number: usize) {
        let delay = self.backoff_delay(retry_number);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Append percent-encoded path segments to `base`.
pub(crate) fn endpoint(base: &str, segments: &[&str]) -> Result<Url, GatewayError> {
    let mut url = Url::parse(base.trim_end_matches('/'))
        .map_err(|err| GatewayError::Transport(format!("invalid endpoint {base}: {err}")))?;
    url.path_segments_mut()
        .map_err(|_| GatewayError::Transport(format!("endpoint {base} cannot be a base")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[derive(Debug)]
pub struct HttpClientBuilder {
    timeout: Duration,
    max_attempts: usize,
    base_backoff: Duration,
    default_headers: Option<reqwest::header::HeaderMap>,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            base_backoff: Duration::from_millis(250),
            default_headers: None,
        }
    }
}

impl HttpClientBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Total number of attempts (initial try + retries).
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn base_backoff(mut self, backoff: Duration) -> Self {
        self.base_backoff = backoff;
        self
    }

    pub fn default_headers(mut self, headers: reqwest::header::HeaderMap) -> Self {
        self.default_headers = Some(headers);
        self
    }

    pub fn build(self) -> Result<HttpClient, GatewayError> {
        let mut builder = ReqwestClient::builder()
            .timeout(self.timeout)
            .user_agent(concat!("meetsync/", env!("CARGO_PKG_VERSION")));

        if let Some(headers) = self.default_headers {
            builder = builder.default_headers(headers);
        }

        let client = builder
            .build()
            .map_err(|err| GatewayError::Transport(format!("failed to build HTTP client: {err}")))?;

        Ok(HttpClient {
            client,
            max_attempts: self.max_attempts,
            base_backoff: self.base_backoff,
        })
    }
}

fn should_retry_status(status: StatusCode, retry: Retry) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    retry == Retry::Idempotent && status.is_server_error()
}

fn should_retry_error(err: &reqwest::Error, retry: Retry) -> bool {
    if err.is_connect() {
        return true;
    }
    retry == Retry::Idempotent && (err.is_timeout() || err.is_request())
}

fn retry_after(response: &Response) -> Option<Duration> {
    let seconds = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()?;
    let delay = Duration::from_secs(seconds);
    (delay <= MAX_RETRY_AFTER).then_some(delay)
}
