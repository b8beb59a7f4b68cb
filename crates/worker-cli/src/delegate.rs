use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_http_client::ResilientHttpClient;
use relay_rate_limit::RateLimiter;
use relay_reliable::{EventEnvelope, EventHandler, HandlerError};
use relay_store::Store;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, error, warn};

/// Limiter weight of one candle snapshot request.
const CANDLE_WEIGHT: u64 = 20;

fn default_ttl() -> u64 {
    600
}

/// Settings for [`DelegateHandler`].
#[derive(Clone, Debug)]
pub struct DelegateConfig {
    /// Upstream `info` endpoint.
    pub info_url: String,

    /// Quota kept in reserve for latency-sensitive callers. Below it the
    /// handler backs off.
    pub min_quota: u64,

    /// Leading segment of cache keys.
    pub cache_prefix: String,
}

/// Tasks accepted on the delegate queue, as `{"name": ..., "data": ...}`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "name", content = "data", rename_all = "snake_case")]
pub enum DelegateTask {
    /// Fetch a candle snapshot and cache it.
    FetchCandle(CandleRequest),
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct CandleRequest {
    pub start_ms: i64,
    pub end_ms: i64,
    pub ticker: String,
    pub interval: String,
    /// Cache lifetime in seconds.
    #[serde(default = "default_ttl")]
    pub ttl: u64,
}

/// Runs upstream fetches on behalf of other services, staying inside this
/// process's share of the upstream rate limit.
#[derive(Clone, Debug)]
pub struct DelegateHandler<S> {
    client: ResilientHttpClient,
    limiter: Arc<RateLimiter>,
    store: S,
    config: DelegateConfig,
}

impl<S: Store> DelegateHandler<S> {
    pub const fn new(
        client: ResilientHttpClient,
        limiter: Arc<RateLimiter>,
        store: S,
        config: DelegateConfig,
    ) -> Self {
        Self {
            client,
            limiter,
            store,
            config,
        }
    }

    /// Cache key for a ticker's candles at one interval.
    pub fn candle_key(&self, ticker: &str, interval: &str) -> String {
        format!("{}:candle:{ticker}:{interval}", self.config.cache_prefix)
    }

    async fn fetch_candle(&self, request: CandleRequest) -> Result<(), HandlerError> {
        let CandleRequest {
            start_ms,
            end_ms,
            ticker,
            interval,
            ttl,
        } = request;

        let body = json!({
            "type": "candleSnapshot",
            "req": {
                "coin": ticker,
                "interval": interval,
                "startTime": start_ms,
                "endTime": end_ms,
            },
        });

        let response = self
            .limiter
            .track(CANDLE_WEIGHT, self.client.post_json(&self.config.info_url, body))
            .await;

        let candles = match response {
            Ok(Value::Array(candles)) if !candles.is_empty() => candles,
            Ok(_) => {
                error!(%ticker, %interval, "no candle data returned");
                return Ok(());
            }
            Err(e) if e.is_rate_limited() => {
                warn!(%ticker, %interval, "upstream rate limit hit");
                return Err(HandlerError::rate_limited());
            }
            Err(e) => return Err(HandlerError::failed(e)),
        };

        let key = self.candle_key(&ticker, &interval);
        let encoded = serde_json::to_vec(&candles).map_err(HandlerError::failed)?;

        self.store
            .put(&key, encoded.into(), Some(Duration::from_secs(ttl)))
            .await
            .map_err(HandlerError::failed)?;

        debug!(%key, candles = candles.len(), "cached candle data");
        Ok(())
    }
}

#[async_trait]
impl<S: Store> EventHandler for DelegateHandler<S> {
    async fn handle(&self, event: &EventEnvelope) -> Result<(), HandlerError> {
        let quota = self.limiter.quota();
        if quota < self.config.min_quota {
            warn!(quota, min_quota = self.config.min_quota, "quota below reserve; deferring");
            return Err(HandlerError::rate_limited());
        }

        let task = match DelegateTask::deserialize(&event.payload) {
            Ok(task) => task,
            Err(e) => {
                // nothing to retry
                error!(event_id = %event.event_id, error = %e, "unsupported delegate task");
                return Ok(());
            }
        };

        match task {
            DelegateTask::FetchCandle(request) => self.fetch_candle(request).await,
        }
    }
}
