//! Redpanda producer for the CDC bootstrap subsystem.
//!
//! Implements the [`Producer`] boundary from `cdc-bootstrap-core` on top of
//! rdkafka, so it works against Redpanda or any other Kafka-compatible broker.
//!
//! # Records
//!
//! - **Payload**: the row rendered as JSON (`RowMap::to_json`)
//! - **Key**: `database/table`, so every row of a table lands on one partition
//!   and keeps its push order
//! - **Topic**: a template where `%{database}` and `%{table}` are replaced by the
//!   row's database and table (default: `maxwell`)
//!
//! Bootstrap rows travel through the same topic as live rows; consumers tell them
//! apart by their `type` field.
//!
//! # Example
//!
//! ```no_run
//! use cdc_bootstrap_redpanda::RedpandaProducer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let producer = RedpandaProducer::builder()
//!     .brokers("localhost:9092")
//!     .topic("cdc.%{database}.%{table}")
//!     .producer_acks("all")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use cdc_bootstrap_core::producer::{Producer, ProducerError};
use cdc_bootstrap_core::row::RowMap;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Default topic template.
pub const DEFAULT_TOPIC: &str = "maxwell";

/// Kafka-compatible [`Producer`].
///
/// # Configuration
///
/// - **Broker addresses**: bootstrap servers (required)
/// - **Topic template**: `%{database}` / `%{table}` placeholders
/// - **Producer settings**: acks, compression, timeout
pub struct RedpandaProducer {
    producer: FutureProducer,
    topic: TopicTemplate,
    timeout: Duration,
}

impl RedpandaProducer {
    /// Create a producer with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`ProducerError::ConnectionFailed`] if the client cannot be created.
    pub fn new(brokers: &str) -> Result<Self, ProducerError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the producer.
    #[must_use]
    pub fn builder() -> RedpandaProducerBuilder {
        RedpandaProducerBuilder::default()
    }

    /// Topic a row is published to.
    #[must_use]
    pub fn topic_for(&self, row: &RowMap) -> String {
        self.topic.render(row)
    }
}

/// Builder for configuring a [`RedpandaProducer`].
#[derive(Default)]
pub struct RedpandaProducerBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
}

impl RedpandaProducerBuilder {
    /// Set the broker addresses (comma-separated, e.g. `localhost:9092`).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the topic template.
    ///
    /// Default: `maxwell`
    #[must_use]
    pub fn topic(mut self, template: impl Into<String>) -> Self {
        self.topic = Some(template.into());
        self
    }

    /// Set the producer acknowledgment mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"all"`
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: `none`, `gzip`, `snappy`, `lz4` or `zstd`.
    ///
    /// Default: `"none"`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the [`RedpandaProducer`].
    ///
    /// # Errors
    ///
    /// Returns [`ProducerError::ConnectionFailed`] if brokers are not set or the
    /// client cannot be created.
    pub fn build(self) -> Result<RedpandaProducer, ProducerError> {
        let brokers = self
            .brokers
            .ok_or_else(|| ProducerError::ConnectionFailed("Brokers not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| ProducerError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let topic = TopicTemplate::new(self.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string()));

        tracing::info!(
            brokers = %brokers,
            topic = %topic.0,
            acks = acks,
            compression = compression,
            "RedpandaProducer created"
        );

        Ok(RedpandaProducer {
            producer,
            topic,
            timeout,
        })
    }
}

impl Producer for RedpandaProducer {
    fn push(&self, row: &RowMap) -> Pin<Box<dyn Future<Output = Result<(), ProducerError>> + Send + '_>> {
        let topic = self.topic.render(row);
        let key = partition_key(row);
        let payload = row.to_json();
        let row_type = row.row_type();

        Box::pin(async move {
            let payload = payload.map_err(|e| ProducerError::SerializationFailed(e.to_string()))?;
            let record = FutureRecord::to(&topic).payload(&payload).key(&key);

            let sent = self.producer.send(record, Timeout::After(self.timeout)).await;

            match sent {
                Ok((partition, offset)) => {
                    tracing::trace!(
                        topic = %topic,
                        partition = partition,
                        offset = offset,
                        row_type = %row_type,
                        "Row published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(topic = %topic, key = %key, error = %kafka_error, "Failed to publish row");
                    Err(ProducerError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }
}

/// Topic name with `%{database}` / `%{table}` placeholders.
#[derive(Clone, Debug, PartialEq, Eq)]
struct TopicTemplate(String);

impl TopicTemplate {
    const fn new(template: String) -> Self {
        Self(template)
    }

    fn render(&self, row: &RowMap) -> String {
        self.0
            .replace("%{database}", row.database())
            .replace("%{table}", row.table())
    }
}

fn partition_key(row: &RowMap) -> String {
    format!("{}/{}", row.database(), row.table())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use cdc_bootstrap_core::row::RowType;
    use chrono::Utc;

    fn row() -> RowMap {
        RowMap::new(RowType::BootstrapInsert, "shop", "orders", Utc::now())
    }

    #[test]
    fn redpanda_producer_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaProducer>();
        assert_sync::<RedpandaProducer>();
    }

    #[test]
    fn topic_placeholders_are_replaced() {
        let template = TopicTemplate::new("cdc.%{database}.%{table}".to_string());
        assert_eq!(template.render(&row()), "cdc.shop.orders");

        let fixed = TopicTemplate::new(DEFAULT_TOPIC.to_string());
        assert_eq!(fixed.render(&row()), "maxwell");
    }

    #[test]
    fn rows_are_keyed_by_table() {
        assert_eq!(partition_key(&row()), "shop/orders");
    }

    #[test]
    fn build_requires_brokers() {
        let result = RedpandaProducer::builder().topic("t").build();
        assert!(matches!(result, Err(ProducerError::ConnectionFailed(_))));
    }

    #[test]
    fn producer_renders_its_topic() {
        // Creating the client does not contact the broker
        let producer = RedpandaProducer::builder()
            .brokers("localhost:9092")
            .topic("%{table}")
            .build()
            .unwrap();
        assert_eq!(producer.topic_for(&row()), "orders");
    }
}
