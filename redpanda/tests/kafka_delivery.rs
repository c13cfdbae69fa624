//! Integration tests for [`RedpandaProducer`] against a real Kafka broker.
//!
//! Marked `#[ignore]`: they need Docker and take a while to start Kafka.
//!
//! ```bash
//! cargo test -p cdc-bootstrap-redpanda --test kafka_delivery -- --ignored
//! ```

#![allow(clippy::expect_used)]

use cdc_bootstrap_core::environment::Clock;
use cdc_bootstrap_core::producer::Producer;
use cdc_bootstrap_core::row::{RowMap, RowType};
use cdc_bootstrap_redpanda::RedpandaProducer;
use cdc_bootstrap_testing::helpers::live_row;
use cdc_bootstrap_testing::test_clock;
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use std::time::Duration;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

/// Retry a warmup push until the broker accepts it.
async fn wait_for_kafka_ready(producer: &RedpandaProducer) {
    let warmup = live_row("warmup", "warmup", 0);
    let max_attempts = 60;
    for attempt in 1..=max_attempts {
        if producer.push(&warmup).await.is_ok() {
            tokio::time::sleep(Duration::from_millis(500)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(
            attempt != max_attempts,
            "Kafka failed to become ready after {max_attempts} attempts"
        );
    }
}

#[tokio::test]
#[ignore]
async fn rows_are_published_as_json_keyed_by_table() {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");
    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    let brokers = format!("{host}:{port}");

    let producer = RedpandaProducer::builder()
        .brokers(&brokers)
        .topic("cdc.%{database}")
        .build()
        .expect("Failed to create producer");
    wait_for_kafka_ready(&producer).await;

    let rows = [
        RowMap::new(RowType::BootstrapStart, "shop", "orders", test_clock().now()),
        RowMap::new(RowType::BootstrapInsert, "shop", "orders", test_clock().now())
            .with_field("id", 1),
        RowMap::new(RowType::BootstrapComplete, "shop", "orders", test_clock().now()),
    ];
    for row in &rows {
        producer.push(row).await.expect("Failed to push row");
    }

    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &brokers)
        .set("group.id", "kafka-delivery-test")
        .set("auto.offset.reset", "earliest")
        .create()
        .expect("Failed to create consumer");
    consumer
        .subscribe(&["cdc.shop"])
        .expect("Failed to subscribe");

    let mut received = Vec::new();
    let mut stream = consumer.stream();
    tokio::time::timeout(Duration::from_secs(30), async {
        while received.len() < rows.len() {
            if let Some(message) = stream.next().await {
                let message = message.expect("Failed to receive message");
                let key = message.key().map(|k| String::from_utf8_lossy(k).to_string());
                let payload: serde_json::Value =
                    serde_json::from_slice(message.payload().expect("payload"))
                        .expect("payload is JSON");
                received.push((key, payload));
            }
        }
    })
    .await
    .expect("Timeout waiting for rows");

    let types: Vec<_> = received
        .iter()
        .map(|(_, payload)| payload["type"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(types, vec!["bootstrap-start", "bootstrap-insert", "bootstrap-complete"]);
    assert!(
        received
            .iter()
            .all(|(key, _)| key.as_deref() == Some("shop/orders"))
    );
    assert_eq!(received[1].1["data"]["id"], 1);
}
