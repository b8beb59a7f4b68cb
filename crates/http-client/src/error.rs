use serde_json::Value;
use thiserror::Error;

/// Result type for HTTP client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the resilient HTTP client.
#[derive(Debug, Error)]
pub enum Error {
    /// Five (or the configured threshold of) consecutive non-JSON responses.
    #[error("received {count} consecutive non-JSON responses")]
    AnomalousResponse {
        /// Length of the run that tripped the detector.
        count: u32,
    },

    /// Upstream returned a recognised application error.
    #[error("upstream error {code} (status {status}): {message}")]
    Api {
        /// Application error code from the body.
        code: i64,
        /// Message from the body.
        message: String,
        /// HTTP status.
        status: u16,
    },

    /// The underlying client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    /// The client was shut down while waiting for a connection slot.
    #[error("connection pool closed")]
    Closed,

    /// Could not connect to upstream.
    #[error("connection to {url} failed: {source}")]
    Connect {
        /// Target URL.
        url: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// A JSON response body could not be decoded.
    #[error("failed to decode response body: {0}")]
    Decode(#[source] reqwest::Error),

    /// The response decoded but did not match the requested type.
    #[error("failed to deserialize response: {0}")]
    Deserialize(#[from] serde_json::Error),

    /// A single non-JSON response, below the anomaly threshold.
    #[error("ignored non-JSON response (status {status}, content-type {content_type:?}, run {count})")]
    NonJsonResponse {
        /// HTTP status.
        status: u16,
        /// Content type reported by upstream.
        content_type: String,
        /// Current length of the non-JSON run.
        count: u32,
    },

    /// Upstream signalled that the caller exceeded its rate limit.
    #[error("upstream rate limit exceeded (status {status})")]
    RateLimited {
        /// HTTP status.
        status: u16,
    },

    /// Request timed out.
    #[error("request to {url} timed out")]
    Timeout {
        /// Target URL.
        url: String,
    },

    /// Any other transport failure.
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// Error status without a recognised application code.
    #[error("unhandled upstream error (status {status}): {body}")]
    Unhandled {
        /// HTTP status.
        status: u16,
        /// Decoded body.
        body: Value,
    },
}

impl Error {
    /// Whether the retry loop should try the request again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AnomalousResponse { .. } | Self::Connect { .. } | Self::Timeout { .. }
        )
    }

    /// Whether upstream asked the caller to back off.
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub(crate) fn from_send(url: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else if error.is_connect() {
            Self::Connect {
                url: url.to_string(),
                source: error,
            }
        } else {
            Self::Transport(error)
        }
    }
}
