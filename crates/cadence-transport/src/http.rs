//! `reqwest`-backed transport.

use std::time::Duration;

use async_trait::async_trait;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use backoff::backoff::Backoff;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use tracing::{debug, warn};

use crate::{RequestBody, Transport, TransportError, TransportResponse};

/// Connection settings for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Base URL of the REST API, e.g. `https://cs.example.com/webconsole/api`.
    pub base_url: String,
    /// Session token sent in the `Authtoken` header.
    pub auth_token: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// First delay between read retries.
    pub retry_initial_interval: Duration,
    /// Total time budget for retrying one idempotent read. Zero disables retries.
    pub retry_budget: Duration,
}

impl HttpConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_token: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            retry_initial_interval: Duration::from_millis(500),
            retry_budget: Duration::from_secs(8),
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

/// Transport over HTTP(S).
///
/// Reads (`GET`) are retried with exponential backoff on connection errors,
/// timeouts and 5xx responses. Writes are sent exactly once.
pub struct HttpTransport {
    http: Client,
    config: HttpConfig,
}

impl HttpTransport {
    /// Create a transport from the given settings.
    pub fn new(config: HttpConfig) -> Result<Self, TransportError> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { http, config })
    }

    /// The configured base URL.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn url_for(&self, endpoint: &str) -> Result<String, TransportError> {
        let url = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );
        reqwest::Url::parse(&url).map_err(|e| TransportError::InvalidUrl {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        Ok(url)
    }

    /// Retry schedule for one read, starting at the configured interval.
    fn read_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.retry_initial_interval)
            .with_max_interval(self.config.retry_budget.max(self.config.retry_initial_interval))
            .with_max_elapsed_time(Some(self.config.retry_budget))
            .build()
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &str,
        endpoint: &str,
        body: &RequestBody,
    ) -> Result<TransportResponse, TransportError> {
        let mut request = self
            .http
            .request(method.clone(), url)
            .header(ACCEPT, "application/json");

        if let Some(token) = &self.config.auth_token {
            request = request.header("Authtoken", token);
        }

        request = match body {
            RequestBody::Empty => request,
            RequestBody::Json(value) => request.json(value),
            RequestBody::Text(text) => request
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(text.clone()),
        };

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(TransportError::RateLimited {
                endpoint: Some(endpoint.to_string()),
                retry_after_secs,
            });
        }

        let text = response.text().await?;
        Ok(TransportResponse::from_text(status.as_u16(), text))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[tracing::instrument(skip(self, method, body), fields(method = %method))]
    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: RequestBody,
    ) -> Result<TransportResponse, TransportError> {
        let url = self.url_for(endpoint)?;

        if let RequestBody::Json(value) = &body {
            debug!(endpoint, body = %value, "sending request");
        }

        let mut backoff = self.read_backoff();

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = self.send_once(&method, &url, endpoint, &body).await;

            let retryable = method == Method::GET
                && match &result {
                    Ok(resp) => resp.status >= 500,
                    Err(e) => e.is_transient(),
                };
            if !retryable {
                return result;
            }

            match backoff.next_backoff() {
                Some(delay) => {
                    warn!(
                        attempt,
                        backoff_ms = delay.as_millis() as u64,
                        endpoint,
                        "transient failure on read, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    return match result {
                        Ok(resp) => Ok(resp),
                        Err(e) => Err(TransportError::RetriesExhausted {
                            endpoint: endpoint.to_string(),
                            last_error: e.to_string(),
                        }),
                    };
                }
            }
        }
    }
}
