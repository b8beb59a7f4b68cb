//! Worker binary: runs the delegate consumer or publishes single events over
//! the transport selected by the deployment profile.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod backend;
mod delegate;
mod error;

use backend::Transport;
use delegate::{DelegateConfig, DelegateHandler};
use error::Error;

use std::sync::Arc;
use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand};
use relay_http_client::{HttpClientConfig, ResilientHttpClient};
use relay_locks_redis::{RedisLockManager, RedisLockManagerConfig};
use relay_messaging::{Consumer, Producer, SendOptions};
use relay_rate_limit::{RateLimiter, RateLimiterConfig};
use relay_reliable::{
    ConsumerConfig, EventHandler, ExecutionGuard, GuardConfig, LogStaleEvents, ProducerConfig,
    ReliableConsumer, ReliableProducer, SingleExecution,
};
use relay_store_redis::{RedisStore, RedisStoreConfig};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Deployment profile. `prod` uses SQS, anything else Kafka
    #[arg(long, default_value = "dev", env = "RELAY_PROFILE")]
    profile: String,

    /// AWS region for SQS
    #[arg(long, default_value = "us-east-1", env = "RELAY_REGION_NAME")]
    region: String,

    /// SQS endpoint override, e.g. a local emulator
    #[arg(long, env = "RELAY_SQS_ENDPOINT_URL")]
    sqs_endpoint_url: Option<String>,

    /// Kafka bootstrap servers
    #[arg(long, default_value = "localhost:9092", env = "RELAY_KAFKA_BOOTSTRAP_SERVERS")]
    kafka_bootstrap_servers: String,

    /// Redis holding status records, locks and caches
    #[arg(long, default_value = "redis://127.0.0.1:6379", env = "RELAY_REDIS_URL")]
    redis_url: String,

    /// Identity of this process in status keys and lock tokens
    #[arg(long, env = "RELAY_INSTANCE_ID")]
    instance_id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Run the delegate consumer until interrupted
    Consume(ConsumeArgs),

    /// Publish one JSON payload
    Publish(PublishArgs),
}

#[derive(Clone, Debug, ClapArgs)]
struct ConsumeArgs {
    /// Topic or queue URL
    #[arg(
        long,
        default_value = "relay_common_delegate.fifo",
        env = "RELAY_DELEGATE_DESTINATION"
    )]
    destination: String,

    /// Worker count; each opens its own connection
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Kafka consumer group
    #[arg(long, default_value = "default-group", env = "RELAY_CONSUMER_GROUP")]
    group_id: String,

    /// Upstream API base URL
    #[arg(
        long,
        default_value = "https://api.hyperliquid.xyz",
        env = "RELAY_UPSTREAM_API_URL"
    )]
    upstream_url: Url,

    /// Upstream weight allowed per minute
    #[arg(long, default_value_t = 1200)]
    max_quota: u64,

    /// Quota left for other callers before the consumer backs off
    #[arg(long, default_value_t = 600)]
    min_quota: u64,

    /// Leading segment of cache keys
    #[arg(long, default_value = "relay:data", env = "RELAY_CACHE_PREFIX")]
    cache_prefix: String,

    /// Seconds a rate-limited worker stays paused
    #[arg(long, default_value_t = 60)]
    resume_after_secs: u64,

    /// Lock lifetime in seconds
    #[arg(long, default_value_t = 60)]
    lock_ttl_secs: u64,

    /// Handle duplicates again instead of skipping them
    #[arg(long)]
    no_dedup: bool,
}

#[derive(Clone, Debug, ClapArgs)]
struct PublishArgs {
    /// Topic or queue URL
    destination: String,

    /// JSON payload
    payload: String,

    /// Mark the event safe to run more than once
    #[arg(long)]
    idempotent: bool,

    /// Ordering group (FIFO queues) or record key (Kafka)
    #[arg(long)]
    group_id: Option<String>,

    /// Keep sweeping this producer's status records until interrupted
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutting down");
        signal_shutdown.cancel();
    });

    let transport = Transport::from_profile(
        &args.profile,
        args.kafka_bootstrap_servers.clone(),
        args.region.clone(),
        args.sqs_endpoint_url.clone(),
    );
    info!(profile = %args.profile, transport = transport.name(), "starting relay worker");

    let store = RedisStore::connect(RedisStoreConfig {
        url: args.redis_url.clone(),
    })
    .await?;

    match args.command.clone() {
        Command::Consume(consume) => run_consume(&args, consume, &transport, store, shutdown).await,
        Command::Publish(publish) => run_publish(&args, publish, &transport, store, shutdown).await,
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("received SIGTERM"),
                    _ = sigint.recv() => info!("received SIGINT"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "failed to install signal handlers, falling back to ctrl-c");
            }
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received interrupt signal"),
        Err(e) => error!(error = %e, "failed to listen for ctrl-c"),
    }
}

async fn run_consume(
    args: &Args,
    consume: ConsumeArgs,
    transport: &Transport,
    store: RedisStore,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    let local_identifier = args
        .instance_id
        .clone()
        .unwrap_or_else(|| format!("relay-worker-{}", std::process::id()));

    let guard: Option<Arc<dyn SingleExecution>> = if consume.no_dedup {
        None
    } else {
        let locks = RedisLockManager::connect(RedisLockManagerConfig {
            url: args.redis_url.clone(),
            local_identifier,
            ttl: Duration::from_secs(consume.lock_ttl_secs),
        })
        .await?;

        Some(Arc::new(ExecutionGuard::new(
            store.clone(),
            locks,
            GuardConfig::default(),
        )))
    };

    let handler = DelegateHandler::new(
        ResilientHttpClient::new(HttpClientConfig::external())?,
        Arc::new(RateLimiter::new(RateLimiterConfig {
            max_quota: consume.max_quota,
            ..RateLimiterConfig::default()
        })),
        store,
        DelegateConfig {
            info_url: format!("{}/info", consume.upstream_url.as_str().trim_end_matches('/')),
            min_quota: consume.min_quota,
            cache_prefix: consume.cache_prefix.clone(),
        },
    );

    let config = ConsumerConfig {
        deduplicate: !consume.no_dedup,
        resume_after: Duration::from_secs(consume.resume_after_secs),
        ..ConsumerConfig::default()
    };

    info!(destination = %consume.destination, workers = consume.workers, "consuming");

    match transport {
        Transport::Kafka { bootstrap_servers } => {
            let consumers = backend::kafka_consumers(
                bootstrap_servers,
                &consume.destination,
                &consume.group_id,
                consume.workers,
            )?;
            consume_with(consumers, handler, guard, config, shutdown).await
        }
        Transport::Sqs(client) => {
            let consumers = backend::sqs_consumers(client, &consume.destination, consume.workers);
            consume_with(consumers, handler, guard, config, shutdown).await
        }
    }
}

async fn consume_with<C, H>(
    consumers: Vec<C>,
    handler: H,
    guard: Option<Arc<dyn SingleExecution>>,
    config: ConsumerConfig,
    shutdown: CancellationToken,
) -> Result<(), Error>
where
    C: Consumer,
    H: EventHandler,
    Error: From<C::Error>,
{
    let consumer = ReliableConsumer::new(consumers, handler, guard, config)?;
    consumer.run(shutdown).await?;
    Ok(())
}

async fn run_publish(
    args: &Args,
    publish: PublishArgs,
    transport: &Transport,
    store: RedisStore,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    let payload: Value = serde_json::from_str(&publish.payload)?;
    let config = ProducerConfig {
        instance_id: args.instance_id.clone(),
        ..ProducerConfig::default()
    };

    match transport {
        Transport::Kafka { bootstrap_servers } => {
            let producer = backend::kafka_producer(bootstrap_servers)?;
            publish_with(producer, store, config, publish, payload, shutdown).await
        }
        Transport::Sqs(client) => {
            let producer = backend::sqs_producer(client);
            publish_with(producer, store, config, publish, payload, shutdown).await
        }
    }
}

async fn publish_with<P>(
    producer: P,
    store: RedisStore,
    config: ProducerConfig,
    publish: PublishArgs,
    payload: Value,
    shutdown: CancellationToken,
) -> Result<(), Error>
where
    P: Producer,
    Error: From<P::Error>,
{
    let producer = ReliableProducer::new(producer, store, config).with_stale_handler(LogStaleEvents);
    producer.start().await?;

    let options = SendOptions {
        group_id: publish.group_id,
        key: None,
    };
    let envelope = producer
        .publish(&publish.destination, payload, publish.idempotent, options)
        .await?;
    info!(event_id = %envelope.event_id, status_key = %envelope.status_key, "published");

    if publish.watch {
        producer.monitor(shutdown).await;
    }

    producer.stop().await?;
    Ok(())
}
