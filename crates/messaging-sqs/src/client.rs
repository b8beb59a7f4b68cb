use std::error::Error as StdError;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sqs::Client;
use aws_sdk_sqs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use thiserror::Error;
use tracing::{info, warn};

// error codes after which the client is rebuilt
const RECONNECT_CODES: [&str; 3] = ["RequestTimeout", "RequestTimeoutException", "ExpiredToken"];

/// Where and how to reach SQS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SqsClientOptions {
    /// AWS region.
    pub region: String,

    /// Endpoint override, for local emulators.
    pub endpoint_url: Option<String>,

    /// Pause between tearing a client down and building a new one.
    pub reconnect_delay: Duration,
}

impl Default for SqsClientOptions {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint_url: None,
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

/// A failed SQS call.
#[derive(Debug, Error)]
#[error("{operation} failed ({}): {message}", .code.as_deref().unwrap_or("no code"))]
pub struct SdkFailure {
    /// API operation name.
    pub operation: &'static str,

    /// Service error code, if the service answered.
    pub code: Option<String>,

    /// Full error context.
    pub message: String,

    retriable: bool,
}

impl SdkFailure {
    pub(crate) fn from_sdk<E, R>(operation: &'static str, error: SdkError<E, R>) -> Self
    where
        E: ProvideErrorMetadata + StdError + Send + Sync + 'static,
        R: Debug,
    {
        let code = error.code().map(str::to_string);
        let transport = matches!(
            error,
            SdkError::DispatchFailure(_) | SdkError::TimeoutError(_)
        );
        let retriable = transport
            || code
                .as_deref()
                .is_some_and(|code| RECONNECT_CODES.contains(&code));

        Self {
            operation,
            code,
            message: DisplayErrorContext(&error).to_string(),
            retriable,
        }
    }

    /// Whether rebuilding the client is expected to help.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        self.retriable
    }
}

/// Holds the current SQS client and rebuilds it on demand.
#[derive(Debug)]
pub struct SqsConnector {
    options: SqsClientOptions,
    client: ArcSwapOption<Client>,
}

impl SqsConnector {
    /// Creates a disconnected connector.
    #[must_use]
    pub fn new(options: SqsClientOptions) -> Self {
        Self {
            options,
            client: ArcSwapOption::empty(),
        }
    }

    /// Loads credentials and builds a client.
    pub async fn connect(&self) {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(self.options.region.clone()));

        if let Some(endpoint_url) = &self.options.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }

        let config = loader.load().await;
        self.client.store(Some(Arc::new(Client::new(&config))));

        info!(region = %self.options.region, "sqs client connected");
    }

    /// Drops the current client.
    pub fn disconnect(&self) {
        if self.client.swap(None).is_some() {
            info!(region = %self.options.region, "sqs client disconnected");
        }
    }

    /// Tears the client down and builds a fresh one, which also refreshes
    /// credentials.
    pub async fn reconnect(&self) {
        warn!(region = %self.options.region, "reconnecting sqs client");
        self.disconnect();
        tokio::time::sleep(self.options.reconnect_delay).await;
        self.connect().await;
    }

    /// The current client, if connected.
    #[must_use]
    pub fn client(&self) -> Option<Arc<Client>> {
        self.client.load_full()
    }
}
