//! End-to-end tests for `ReplicationPipeline`
//!
//! The in-memory control store replicates its own writes into the row feed, so
//! the completion update reaches the bootstrapper the same way it would from a
//! real change log.

#![allow(clippy::unwrap_used)]

use cdc_bootstrap_core::config::{BootstrapConfig, BootstrapStrategy, PipelineConfig};
use cdc_bootstrap_core::control::{BootstrapRequest, BootstrapState};
use cdc_bootstrap_core::control_store::ControlStore;
use cdc_bootstrap_core::environment::Clock;
use cdc_bootstrap_core::row::RowType;
use cdc_bootstrap_runtime::{AnyBootstrapper, PipelineError, ReplicationPipeline};
use cdc_bootstrap_testing::helpers::{at, live_row, start_row};
use cdc_bootstrap_testing::{
    InMemoryControlStore, InMemoryPositionStore, InMemoryRowSource, RecordingProducer,
    ReplicationFeed, init_tracing, test_clock,
};
use std::sync::Arc;
use std::time::Duration;

const LOG: &str = "binlog.000001";

struct Setup {
    store: InMemoryControlStore,
    recording: RecordingProducer,
    positions: InMemoryPositionStore,
    pipeline: ReplicationPipeline<AnyBootstrapper>,
    shutdown: tokio::sync::watch::Sender<bool>,
}

fn setup(strategy: BootstrapStrategy, source: InMemoryRowSource) -> Setup {
    init_tracing();
    let store = InMemoryControlStore::new("maxwell");
    let recording = RecordingProducer::new();
    let positions = InMemoryPositionStore::new();
    let config = BootstrapConfig {
        strategy,
        ..BootstrapConfig::default()
    };
    let bootstrapper = AnyBootstrapper::from_config(
        &config,
        Arc::new(store.clone()),
        Arc::new(source),
        Arc::new(test_clock()),
    );
    let (pipeline, shutdown) = ReplicationPipeline::new(
        bootstrapper,
        Arc::new(recording.clone()),
        Arc::new(positions.clone()),
        &PipelineConfig {
            client_id: "maxwell".to_string(),
            checkpoint_interval: 1,
        },
    );

    Setup {
        store,
        recording,
        positions,
        pipeline,
        shutdown,
    }
}

async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

fn committed_offsets(positions: &InMemoryPositionStore) -> Vec<u64> {
    positions.saves().into_iter().map(|(_, p)| p.offset).collect()
}

#[tokio::test]
async fn synchronous_bootstrap_defers_checkpoints_until_complete() {
    let Setup {
        store,
        recording,
        positions,
        mut pipeline,
        shutdown,
    } = setup(
        BootstrapStrategy::Synchronous,
        InMemoryRowSource::new().with_numbered_rows("shop", "orders", 2),
    );
    let request = store
        .request(BootstrapRequest::new("shop", "orders"))
        .await
        .unwrap();
    store.take_changes();

    let (feed, rows) = ReplicationFeed::channel();
    store.replicate_to(&feed);
    feed.send(at(live_row("shop", "customers", 1), LOG, 1));
    feed.send(at(live_row("shop", "customers", 2), LOG, 2));
    feed.send(at(start_row("maxwell", &request), LOG, 3));
    for offset in 4..=6 {
        feed.send(at(live_row("shop", "customers", 3), LOG, offset));
    }

    let task = tokio::spawn(async move { pipeline.run(rows).await });
    let watched = recording.clone();
    wait_until(move || watched.count_of(RowType::BootstrapComplete) == 1).await;
    shutdown.send(true).unwrap();
    task.await.unwrap().unwrap();

    assert_eq!(
        recording.types(),
        vec![
            RowType::Insert,
            RowType::Insert,
            RowType::BootstrapStart,
            RowType::BootstrapInsert,
            RowType::BootstrapInsert,
            RowType::Insert,
            RowType::Insert,
            RowType::Insert,
            RowType::BootstrapComplete,
        ]
    );
    // Nothing is committed between the start row and the completion update
    assert_eq!(committed_offsets(&positions), vec![1, 2, 6]);
    assert_eq!(store.get(request.id).unwrap().state(), BootstrapState::Complete);
}

#[tokio::test]
async fn asynchronous_bootstrap_replays_held_back_rows() {
    let Setup {
        store,
        recording,
        positions,
        mut pipeline,
        shutdown,
    } = setup(
        BootstrapStrategy::Asynchronous,
        InMemoryRowSource::new().with_numbered_rows("shop", "orders", 3),
    );
    let request = store
        .request(BootstrapRequest::new("shop", "orders"))
        .await
        .unwrap();
    store.take_changes();

    let (feed, rows) = ReplicationFeed::channel();
    store.replicate_to(&feed);
    feed.send(at(live_row("shop", "orders", 100), LOG, 1));
    feed.send(at(start_row("maxwell", &request), LOG, 2));
    feed.send(at(live_row("shop", "orders", 101), LOG, 3));
    feed.send(at(live_row("shop", "orders", 102), LOG, 4));

    let task = tokio::spawn(async move { pipeline.run(rows).await });
    let watched = recording.clone();
    wait_until(move || watched.len() == 8).await;
    shutdown.send(true).unwrap();
    task.await.unwrap().unwrap();

    assert_eq!(
        recording.types(),
        vec![
            RowType::Insert,
            RowType::BootstrapStart,
            RowType::BootstrapInsert,
            RowType::BootstrapInsert,
            RowType::BootstrapInsert,
            RowType::BootstrapComplete,
            RowType::Insert,
            RowType::Insert,
        ]
    );
    assert!(!committed_offsets(&positions).iter().any(|offset| (2..4).contains(offset)));
    assert_eq!(committed_offsets(&positions).first(), Some(&1));
}

#[tokio::test]
async fn replayed_start_row_of_finished_request_is_ignored() {
    let Setup {
        store,
        recording,
        mut pipeline,
        ..
    } = setup(
        BootstrapStrategy::Synchronous,
        InMemoryRowSource::new().with_numbered_rows("shop", "orders", 2),
    );
    let request = store
        .request(BootstrapRequest::new("shop", "orders"))
        .await
        .unwrap();
    store.mark_started(request.id, test_clock().now()).await.unwrap();
    store.mark_completed(request.id, test_clock().now(), 2).await.unwrap();

    let (feed, rows) = ReplicationFeed::channel();
    feed.send(at(start_row("maxwell", &request), LOG, 1));
    drop(feed);

    pipeline.run(rows).await.unwrap();

    assert!(recording.is_empty());
}

#[tokio::test]
async fn live_delivery_failure_is_fatal() {
    let Setup {
        recording,
        positions,
        mut pipeline,
        ..
    } = setup(BootstrapStrategy::Disabled, InMemoryRowSource::new());
    recording.fail_after(Some(1));

    let (feed, rows) = ReplicationFeed::channel();
    feed.send(at(live_row("shop", "orders", 1), LOG, 1));
    feed.send(at(live_row("shop", "orders", 2), LOG, 2));
    drop(feed);

    let err = pipeline.run(rows).await.unwrap_err();

    assert!(matches!(err, PipelineError::Delivery(_)));
    assert_eq!(committed_offsets(&positions), vec![1]);
}

#[tokio::test]
async fn interrupted_bootstrap_is_resumed_before_reading_rows() {
    let Setup {
        store,
        recording,
        mut pipeline,
        shutdown,
        ..
    } = setup(
        BootstrapStrategy::Synchronous,
        InMemoryRowSource::new().with_numbered_rows("shop", "orders", 2),
    );
    let request = store
        .request(BootstrapRequest::new("shop", "orders"))
        .await
        .unwrap();
    store.mark_started(request.id, test_clock().now()).await.unwrap();
    store.take_changes();

    let (feed, rows) = ReplicationFeed::channel();
    store.replicate_to(&feed);

    let task = tokio::spawn(async move { pipeline.run(rows).await });
    let watched = recording.clone();
    wait_until(move || watched.count_of(RowType::BootstrapComplete) == 1).await;
    shutdown.send(true).unwrap();
    task.await.unwrap().unwrap();

    assert_eq!(recording.count_of(RowType::BootstrapStart), 1);
    assert_eq!(recording.count_of(RowType::BootstrapInsert), 2);
    assert_eq!(store.get(request.id).unwrap().state(), BootstrapState::Complete);
}
