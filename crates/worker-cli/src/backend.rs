use std::time::Duration;

use relay_messaging_kafka::{
    KafkaConsumer, KafkaConsumerOptions, KafkaProducer, KafkaProducerOptions,
};
use relay_messaging_sqs::{SqsClientOptions, SqsConsumer, SqsConsumerOptions, SqsProducer};

use crate::error::Error;

/// Which broker the worker talks to, chosen from the deployment profile.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transport {
    /// Partitioned log.
    Kafka {
        /// Comma-separated broker list.
        bootstrap_servers: String,
    },

    /// Managed queue.
    Sqs(SqsClientOptions),
}

impl Transport {
    /// `prod` selects SQS; every other profile uses Kafka.
    pub fn from_profile(
        profile: &str,
        bootstrap_servers: String,
        region: String,
        endpoint_url: Option<String>,
    ) -> Self {
        if profile.eq_ignore_ascii_case("prod") {
            Self::Sqs(SqsClientOptions {
                region,
                endpoint_url,
                reconnect_delay: Duration::from_secs(1),
            })
        } else {
            Self::Kafka { bootstrap_servers }
        }
    }

    /// Short name for logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Kafka { .. } => "kafka",
            Self::Sqs(_) => "sqs",
        }
    }
}

/// One Kafka connection per worker, all in `group_id`.
pub fn kafka_consumers(
    bootstrap_servers: &str,
    topic: &str,
    group_id: &str,
    workers: usize,
) -> Result<Vec<KafkaConsumer>, Error> {
    (0..workers)
        .map(|_| {
            KafkaConsumer::new(KafkaConsumerOptions {
                bootstrap_servers: bootstrap_servers.to_string(),
                topic: topic.to_string(),
                group_id: group_id.to_string(),
                ..KafkaConsumerOptions::default()
            })
            .map_err(Error::from)
        })
        .collect()
}

/// One SQS connection per worker.
pub fn sqs_consumers(
    client: &SqsClientOptions,
    queue_url: &str,
    workers: usize,
) -> Vec<SqsConsumer> {
    (0..workers)
        .map(|_| {
            SqsConsumer::new(SqsConsumerOptions {
                client: client.clone(),
                queue_url: queue_url.to_string(),
                ..SqsConsumerOptions::default()
            })
        })
        .collect()
}

pub fn kafka_producer(bootstrap_servers: &str) -> Result<KafkaProducer, Error> {
    Ok(KafkaProducer::new(KafkaProducerOptions {
        bootstrap_servers: bootstrap_servers.to_string(),
        ..KafkaProducerOptions::default()
    })?)
}

pub fn sqs_producer(client: &SqsClientOptions) -> SqsProducer {
    SqsProducer::new(client.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prod_profile_selects_sqs() {
        let transport = Transport::from_profile(
            "prod",
            "localhost:9092".to_string(),
            "ap-northeast-2".to_string(),
            None,
        );

        assert_eq!(transport.name(), "sqs");
        assert!(matches!(transport, Transport::Sqs(options) if options.region == "ap-northeast-2"));
    }

    #[test]
    fn test_other_profiles_select_kafka() {
        for profile in ["dev", "local", "staging", ""] {
            let transport = Transport::from_profile(
                profile,
                "broker:9092".to_string(),
                "us-east-1".to_string(),
                None,
            );

            assert_eq!(
                transport,
                Transport::Kafka {
                    bootstrap_servers: "broker:9092".to_string()
                }
            );
        }
    }
}
