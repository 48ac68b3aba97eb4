//! End-to-end tests of the aggregation and forwarding pipeline against a
//! real TCP collector.

use chrono::{TimeZone, Utc};
use drone_relay::aggregator::Aggregator;
use drone_relay::buffer::BufferStore;
use drone_relay::config::AggregatorConfig;
use drone_relay::events::EventBus;
use drone_relay::forwarder::{BatchTransport, ForwardingRelay, TcpTransport};
use drone_relay::power::BatteryMonitor;
use drone_relay::protocol::{decode_batch, AnomalyKind, Batch, Reading};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

const IO_TIMEOUT: Duration = Duration::from_secs(1);

/// Collector stand-in: accepts relay connections and forwards every decoded
/// batch to the test.
async fn spawn_collector() -> (SocketAddr, mpsc::Receiver<Batch>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind collector");
    let addr = listener.local_addr().expect("collector addr");
    let (batch_tx, batch_rx) = mpsc::channel(16);

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            let batch_tx = batch_tx.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(socket);
                let mut line = String::new();
                while reader.read_line(&mut line).await.unwrap_or(0) > 0 {
                    if let Ok(batch) = decode_batch(&line) {
                        let _ = batch_tx.send(batch).await;
                    }
                    line.clear();
                }
            });
        }
    });

    (addr, batch_rx)
}

struct Pipeline {
    store: Arc<BufferStore>,
    battery: Arc<BatteryMonitor>,
    relay: Arc<ForwardingRelay>,
    transport: Arc<TcpTransport>,
    aggregator: Aggregator,
}

fn build_pipeline(collector: SocketAddr, initial_level: u8) -> Pipeline {
    let events = EventBus::default();
    let store = Arc::new(BufferStore::new(5));
    let battery =
        Arc::new(BatteryMonitor::new(initial_level, 20, events.clone()).expect("battery"));
    let transport = Arc::new(TcpTransport::new(collector, IO_TIMEOUT, IO_TIMEOUT));
    let relay = Arc::new(ForwardingRelay::new(
        Arc::clone(&transport) as Arc<dyn BatchTransport>,
        battery.subscribe(),
        events.clone(),
    ));
    let aggregator = Aggregator::new(
        &AggregatorConfig::default(),
        "drone-1".to_string(),
        Arc::clone(&store),
        events,
    );

    Pipeline {
        store,
        battery,
        relay,
        transport,
        aggregator,
    }
}

fn tagged_batch(tag: &str) -> Batch {
    Batch {
        drone_id: tag.to_string(),
        timestamp: Utc::now(),
        averages: BTreeMap::new(),
        anomalies: Vec::new(),
    }
}

async fn expect_batch(rx: &mut mpsc::Receiver<Batch>) -> Batch {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a batch")
        .expect("collector channel closed")
}

#[tokio::test]
async fn one_reading_produces_averages_and_a_single_anomaly() {
    let (collector, mut received) = spawn_collector().await;
    let mut pipeline = build_pipeline(collector, 100);

    pipeline.store.record(Reading {
        sensor_id: "s1".to_string(),
        temperature: 55.0,
        humidity: 40.0,
        timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
    });

    let batch = pipeline.aggregator.collect_batch();
    pipeline.relay.submit(batch).await;

    let first = expect_batch(&mut received).await;
    assert_eq!(first.drone_id, "drone-1");
    assert_eq!(first.averages["s1"].avg_temperature, 55.0);
    assert_eq!(first.averages["s1"].avg_humidity, 40.0);
    assert_eq!(first.anomalies.len(), 1);
    assert_eq!(first.anomalies[0].kind, AnomalyKind::TemperatureHigh);
    assert_eq!(first.anomalies[0].value, 55.0);

    // The reading is still buffered on the next cycle: same average, no
    // repeated anomaly.
    let batch = pipeline.aggregator.collect_batch();
    pipeline.relay.submit(batch).await;

    let second = expect_batch(&mut received).await;
    assert_eq!(second.averages["s1"].avg_temperature, 55.0);
    assert!(second.anomalies.is_empty());
}

#[tokio::test]
async fn return_to_base_queues_then_drains_fifo_over_tcp() {
    let (collector, mut received) = spawn_collector().await;
    let pipeline = build_pipeline(collector, 10);

    for tag in ["b1", "b2", "b3"] {
        pipeline.relay.submit(tagged_batch(tag)).await;
    }
    assert_eq!(pipeline.relay.queue_depth(), 3);
    assert!(received.try_recv().is_err());

    pipeline.battery.set_level(50).expect("override");
    let delivered = pipeline.relay.drain_once().await.expect("drain");
    assert_eq!(delivered, 3);

    for expected in ["b1", "b2", "b3"] {
        assert_eq!(expect_batch(&mut received).await.drone_id, expected);
    }
}

#[tokio::test]
async fn unreachable_collector_queues_until_readdressed() {
    // Reserve a port and close it again: connecting there is refused.
    let reserved = TcpListener::bind("127.0.0.1:0").await.expect("reserve");
    let dead_addr = reserved.local_addr().expect("reserved addr");
    drop(reserved);

    let pipeline = build_pipeline(dead_addr, 100);

    pipeline.relay.submit(tagged_batch("b1")).await;
    assert_eq!(pipeline.relay.queue_depth(), 1);

    // A drain against the dead collector fails and keeps the batch.
    assert!(pipeline.relay.drain_once().await.is_err());
    assert_eq!(pipeline.relay.queue_depth(), 1);

    // Re-point the transport at a live collector and drain again.
    let (collector, mut received) = spawn_collector().await;
    pipeline.transport.set_collector_addr(collector);
    let delivered = pipeline.relay.drain_once().await.expect("drain");
    assert_eq!(delivered, 1);
    assert_eq!(expect_batch(&mut received).await.drone_id, "b1");
}
