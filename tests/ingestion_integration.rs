//! Integration tests for the ingestion listener over real TCP connections.

use chrono::{TimeZone, Utc};
use drone_relay::buffer::BufferStore;
use drone_relay::events::EventBus;
use drone_relay::listener::{IngestionListener, ListenerCommand};
use drone_relay::protocol::{encode_frame, Reading};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::sleep;

struct Harness {
    addr: SocketAddr,
    store: Arc<BufferStore>,
    commands: mpsc::Sender<ListenerCommand>,
    _shutdown: watch::Sender<bool>,
}

async fn start_listener() -> Harness {
    let store = Arc::new(BufferStore::new(5));
    let (command_tx, command_rx) = mpsc::channel(4);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = IngestionListener::bind(
        "127.0.0.1:0".parse().expect("static addr"),
        Arc::clone(&store),
        EventBus::default(),
        Duration::from_millis(200),
        command_rx,
    )
    .await
    .expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to read local addr");

    tokio::spawn(listener.run(shutdown_rx));

    Harness {
        addr,
        store,
        commands: command_tx,
        _shutdown: shutdown_tx,
    }
}

fn reading(sensor: &str, temperature: f64, second: u32) -> Reading {
    Reading {
        sensor_id: sensor.to_string(),
        temperature,
        humidity: 50.0,
        timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, second).unwrap(),
    }
}

async fn wait_for_readings(store: &BufferStore, sensor: &str, count: usize) {
    for _ in 0..200 {
        let recorded = store.snapshot().get(sensor).map_or(0, |ring| ring.len());
        if recorded >= count {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {} readings from {}", count, sensor);
}

#[tokio::test]
async fn valid_readings_are_recorded_in_order() {
    let harness = start_listener().await;
    let mut sensor = TcpStream::connect(harness.addr).await.expect("connect");

    for (i, temperature) in [20.0, 21.0, 22.0].iter().enumerate() {
        let frame = encode_frame(&reading("s1", *temperature, i as u32)).expect("encode");
        sensor.write_all(&frame).await.expect("write");
    }

    wait_for_readings(&harness.store, "s1", 3).await;
    let snapshot = harness.store.snapshot();
    let temps: Vec<f64> = snapshot["s1"].iter().map(|r| r.temperature).collect();
    assert_eq!(temps, vec![20.0, 21.0, 22.0]);
}

#[tokio::test]
async fn malformed_frames_do_not_terminate_the_connection() {
    let harness = start_listener().await;
    let mut sensor = TcpStream::connect(harness.addr).await.expect("connect");

    sensor
        .write_all(b"{\"sensor_id\": broken\n")
        .await
        .expect("write garbage");
    let frame = encode_frame(&reading("s1", 25.0, 0)).expect("encode");
    sensor.write_all(&frame).await.expect("write valid");

    // The valid reading after the malformed one still arrives on the same
    // connection.
    wait_for_readings(&harness.store, "s1", 1).await;
    assert_eq!(harness.store.snapshot()["s1"][0].temperature, 25.0);
}

#[tokio::test]
async fn sensors_are_served_concurrently() {
    let harness = start_listener().await;
    let mut first = TcpStream::connect(harness.addr).await.expect("connect");
    let mut second = TcpStream::connect(harness.addr).await.expect("connect");

    let frame_a = encode_frame(&reading("a", 20.0, 0)).expect("encode");
    let frame_b = encode_frame(&reading("b", 30.0, 0)).expect("encode");
    first.write_all(&frame_a).await.expect("write");
    second.write_all(&frame_b).await.expect("write");

    wait_for_readings(&harness.store, "a", 1).await;
    wait_for_readings(&harness.store, "b", 1).await;
    assert_eq!(harness.store.sensor_count(), 2);
}

#[tokio::test]
async fn rebind_to_an_occupied_port_keeps_the_old_listener() {
    let harness = start_listener().await;

    // Occupy a port, then ask the listener to move onto it.
    let blocker = TcpListener::bind("127.0.0.1:0").await.expect("bind blocker");
    let blocked_addr = blocker.local_addr().expect("blocker addr");

    let (respond_to, outcome) = oneshot::channel();
    harness
        .commands
        .send(ListenerCommand::Rebind {
            addr: blocked_addr,
            respond_to,
        })
        .await
        .expect("send rebind");
    assert!(outcome.await.expect("rebind response").is_err());

    // The previous address still accepts sensors.
    let mut sensor = TcpStream::connect(harness.addr).await.expect("connect old addr");
    let frame = encode_frame(&reading("s1", 20.0, 0)).expect("encode");
    sensor.write_all(&frame).await.expect("write");
    wait_for_readings(&harness.store, "s1", 1).await;
}

#[tokio::test]
async fn rebind_moves_the_listener_and_inflight_connections_survive() {
    let harness = start_listener().await;

    // Connect before the rebind; this connection must keep working after.
    let mut old_sensor = TcpStream::connect(harness.addr).await.expect("connect");
    let frame = encode_frame(&reading("early", 20.0, 0)).expect("encode");
    old_sensor.write_all(&frame).await.expect("write");
    wait_for_readings(&harness.store, "early", 1).await;

    // Reserve a free port, release it, and rebind onto it.
    let reserved = TcpListener::bind("127.0.0.1:0").await.expect("reserve");
    let new_addr = reserved.local_addr().expect("reserved addr");
    drop(reserved);

    let (respond_to, outcome) = oneshot::channel();
    harness
        .commands
        .send(ListenerCommand::Rebind {
            addr: new_addr,
            respond_to,
        })
        .await
        .expect("send rebind");
    outcome
        .await
        .expect("rebind response")
        .expect("rebind should succeed");

    // New sensors connect on the new address.
    let mut new_sensor = TcpStream::connect(new_addr).await.expect("connect new addr");
    let frame = encode_frame(&reading("late", 30.0, 0)).expect("encode");
    new_sensor.write_all(&frame).await.expect("write");
    wait_for_readings(&harness.store, "late", 1).await;

    // The pre-rebind connection finishes its work naturally.
    let frame = encode_frame(&reading("early", 21.0, 1)).expect("encode");
    old_sensor.write_all(&frame).await.expect("write on old conn");
    wait_for_readings(&harness.store, "early", 2).await;
}
