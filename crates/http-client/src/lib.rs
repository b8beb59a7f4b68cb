//! Outbound HTTP client for a single upstream API with pooled connections,
//! bounded retries and detection of runs of non-JSON responses.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod tracker;

pub use error::{Error, Result};
pub use reqwest::Method;
pub use tracker::{NonJsonRun, NonJsonTracker};

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Configuration for [`ResilientHttpClient`].
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HttpClientConfig {
    /// Per-request timeout.
    pub timeout: Duration,

    /// Maximum requests in flight across the whole client.
    pub max_connections: usize,

    /// Maximum idle connections kept per host.
    pub max_idle_per_host: usize,

    /// Idle connections are closed after this long.
    pub pool_idle_timeout: Duration,

    /// Total attempts per request, including the first.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub initial_backoff: Duration,

    /// Upper bound for the retry delay.
    pub max_backoff: Duration,

    /// Consecutive non-JSON responses that count as an upstream failure.
    pub non_json_threshold: u32,
}

impl HttpClientConfig {
    /// Settings for calls to services inside the fleet.
    #[must_use]
    pub const fn internal() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_connections: 100,
            max_idle_per_host: 30,
            pool_idle_timeout: Duration::from_secs(30),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            non_json_threshold: 5,
        }
    }

    /// Settings for calls to third-party APIs.
    #[must_use]
    pub const fn external() -> Self {
        Self {
            max_attempts: 5,
            ..Self::internal()
        }
    }
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self::internal()
    }
}

/// Per-request inputs. Everything here is also what gets logged on failure.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    headers: Vec<(String, String)>,
    params: Vec<(String, String)>,
    json: Option<Value>,
    body: Option<String>,
}

impl RequestOptions {
    /// Empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Sets a JSON body. Replaces any raw body.
    #[must_use]
    pub fn json(mut self, json: Value) -> Self {
        self.json = Some(json);
        self.body = None;
        self
    }

    /// Sets a raw body. Replaces any JSON body.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self.json = None;
        self
    }
}

#[derive(Debug)]
struct ResponseSnapshot {
    status: u16,
    headers: HeaderMap,
    content_type: String,
}

impl ResponseSnapshot {
    fn capture(response: &Response) -> Self {
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        Self {
            status: response.status().as_u16(),
            headers: response.headers().clone(),
            content_type,
        }
    }

    fn is_json(&self) -> bool {
        self.content_type.contains("application/json")
    }
}

/// HTTP client with connection reuse, bounded retries and anomaly detection.
///
/// Build one per process and share it; clones share the connection pool, the
/// in-flight limit and the non-JSON run counter.
#[derive(Clone, Debug)]
pub struct ResilientHttpClient {
    client: Client,
    config: HttpClientConfig,
    permits: Arc<Semaphore>,
    tracker: Arc<NonJsonTracker>,
}

impl ResilientHttpClient {
    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Build`] if the TLS backend or resolver cannot be
    /// initialised.
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout)
            .timeout(config.timeout)
            .build()
            .map_err(Error::Build)?;

        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(config.max_connections.max(1))),
            tracker: Arc::new(NonJsonTracker::new(config.non_json_threshold)),
            config,
        })
    }

    /// The non-JSON run counter shared by this client and its clones.
    #[must_use]
    pub fn non_json_tracker(&self) -> &NonJsonTracker {
        &self.tracker
    }

    /// Issues a GET with retries.
    ///
    /// # Errors
    ///
    /// See [`ResilientHttpClient::request`].
    pub async fn get(&self, url: &str, options: RequestOptions) -> Result<Value> {
        self.request(Method::GET, url, options).await
    }

    /// Issues a POST with a JSON body and retries.
    ///
    /// # Errors
    ///
    /// See [`ResilientHttpClient::request`].
    pub async fn post_json(&self, url: &str, json: Value) -> Result<Value> {
        self.request(Method::POST, url, RequestOptions::new().json(json))
            .await
    }

    /// Issues a request with retries and decodes the body into `T`.
    ///
    /// # Errors
    ///
    /// See [`ResilientHttpClient::request`]; additionally
    /// [`Error::Deserialize`] if the body does not match `T`.
    pub async fn request_json<T>(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let value = self.request(method, url, options).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Issues a request, retrying connection failures, timeouts and anomalous
    /// runs of non-JSON responses with exponential backoff.
    ///
    /// # Errors
    ///
    /// Returns the last error once it is not retryable or attempts run out.
    pub async fn request(&self, method: Method, url: &str, options: RequestOptions) -> Result<Value> {
        let mut attempt = 0;
        let mut delay = self.config.initial_backoff;

        loop {
            attempt += 1;

            match self.execute(method.clone(), url, &options).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(%method, url, attempt, "request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if error.is_retryable() && attempt < self.config.max_attempts => {
                    warn!(
                        %method,
                        url,
                        attempt,
                        max_attempts = self.config.max_attempts,
                        delay = ?delay,
                        %error,
                        "request failed, retrying"
                    );
                }
                Err(error) => return Err(error),
            }

            tokio::time::sleep(delay).await;

            // up to 10% jitter on top of doubling
            delay = std::cmp::min(
                delay.mul_f64(fastrand::f64().mul_add(0.1, 2.0)),
                self.config.max_backoff,
            );
        }
    }

    /// Issues a single attempt with no retry.
    ///
    /// # Errors
    ///
    /// - [`Error::Connect`], [`Error::Timeout`], [`Error::Transport`] for
    ///   network failures.
    /// - [`Error::NonJsonResponse`] / [`Error::AnomalousResponse`] for
    ///   non-JSON bodies.
    /// - [`Error::RateLimited`] for status 429.
    /// - [`Error::Api`] / [`Error::Unhandled`] for other error statuses.
    pub async fn execute(&self, method: Method, url: &str, options: &RequestOptions) -> Result<Value> {
        let _permit = self.permits.acquire().await.map_err(|_| Error::Closed)?;

        let mut builder = self.client.request(method.clone(), url);
        for (name, value) in &options.headers {
            builder = builder.header(name, value);
        }
        if !options.params.is_empty() {
            builder = builder.query(&options.params);
        }
        if let Some(json) = &options.json {
            builder = builder.json(json);
        } else if let Some(body) = &options.body {
            builder = builder.body(body.clone());
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(source) => {
                let error = Error::from_send(url, source);
                log_request_failure(&method, url, options, &error, None);
                return Err(error);
            }
        };

        let snapshot = ResponseSnapshot::capture(&response);
        let result = self.interpret(url, response, &snapshot).await;

        if let Err(error) = &result {
            log_request_failure(&method, url, options, error, Some(&snapshot));
        }

        result
    }

    async fn interpret(&self, url: &str, response: Response, snapshot: &ResponseSnapshot) -> Result<Value> {
        if snapshot.status == 429 {
            if snapshot.is_json() {
                self.tracker.reset();
            }
            return Err(Error::RateLimited {
                status: snapshot.status,
            });
        }

        if !snapshot.is_json() {
            let run = self.tracker.record_non_json();
            let body = response.text().await.unwrap_or_default();

            return match run {
                NonJsonRun::Tripped(count) => Err(Error::AnomalousResponse { count }),
                NonJsonRun::Below(count) => {
                    info!(
                        status = snapshot.status,
                        content_type = %snapshot.content_type,
                        body = %truncate(&body, 200),
                        count,
                        "non-JSON response ignored"
                    );
                    Err(Error::NonJsonResponse {
                        status: snapshot.status,
                        content_type: snapshot.content_type.clone(),
                        count,
                    })
                }
            };
        }

        self.tracker.reset();

        let body: Value = response.json().await.map_err(|error| {
            if error.is_timeout() {
                Error::Timeout {
                    url: url.to_string(),
                }
            } else {
                Error::Decode(error)
            }
        })?;

        if snapshot.status >= 400 {
            return Err(classify_error_body(snapshot.status, body));
        }

        Ok(body)
    }
}

fn classify_error_body(status: u16, body: Value) -> Error {
    let code = body.get("code").and_then(|code| {
        code.as_i64()
            .or_else(|| code.as_str().and_then(|code| code.parse().ok()))
    });

    match code {
        Some(code) => Error::Api {
            code,
            message: body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
            status,
        },
        None => Error::Unhandled { status, body },
    }
}

fn truncate(body: &str, max_chars: usize) -> &str {
    body.char_indices()
        .nth(max_chars)
        .map_or(body, |(index, _)| &body[..index])
}

fn log_request_failure(
    method: &Method,
    url: &str,
    options: &RequestOptions,
    error: &Error,
    response: Option<&ResponseSnapshot>,
) {
    match response {
        Some(response) => error!(
            %method,
            url,
            headers = ?options.headers,
            params = ?options.params,
            json = ?options.json,
            body = ?options.body,
            response_status = response.status,
            response_headers = ?response.headers,
            response_content_type = %response.content_type,
            %error,
            "request failed"
        ),
        None => error!(
            %method,
            url,
            headers = ?options.headers,
            params = ?options.params,
            json = ?options.json,
            body = ?options.body,
            %error,
            "request failed"
        ),
    }
}
