//! Simulated leaf sensor.
//!
//! Connects to the relay and pushes one newline-framed JSON reading per
//! interval. Most readings are in-range; every 15-20 seconds one anomalous
//! reading is injected, alternating randomly between a temperature spike
//! and a humidity drop. On connection loss the sensor retries every few
//! seconds - reconnection is the sensor's job, the relay never dials back.

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use drone_relay::logging::{self, TracingConfig};
use drone_relay::protocol::{encode_frame, Reading};
use rand::Rng;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::sleep;
use tracing::{info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(3);

#[derive(Parser)]
#[command(name = "sensor-sim")]
#[command(about = "Simulated leaf sensor pushing readings to the relay", long_about = None)]
struct Cli {
    /// Relay address to connect to.
    #[arg(long, default_value = "127.0.0.1:5050")]
    relay: String,

    /// Sensor identifier stamped into every reading.
    #[arg(long, default_value = "sensor-1")]
    sensor_id: String,

    /// Seconds between readings.
    #[arg(long, default_value_t = 3)]
    interval: u64,
}

/// Generates in-range readings with periodic anomaly injection.
struct PayloadGenerator {
    sensor_id: String,
    last_anomaly: Instant,
    next_anomaly_after: Duration,
}

impl PayloadGenerator {
    fn new(sensor_id: String) -> Self {
        Self {
            sensor_id,
            last_anomaly: Instant::now(),
            next_anomaly_after: anomaly_gap(),
        }
    }

    fn next(&mut self) -> Reading {
        let mut rng = rand::thread_rng();
        let inject = self.last_anomaly.elapsed() > self.next_anomaly_after;

        let (temperature, humidity) = if inject {
            self.last_anomaly = Instant::now();
            self.next_anomaly_after = anomaly_gap();
            if rng.gen_bool(0.5) {
                // Temperature spike, humidity in range.
                (rng.gen_range(51.0..60.0), rng.gen_range(30.0..80.0))
            } else {
                // Humidity drop, temperature in range.
                (rng.gen_range(18.0..35.0), rng.gen_range(1.0..9.0))
            }
        } else {
            (rng.gen_range(18.0..35.0), rng.gen_range(30.0..80.0))
        };

        Reading {
            sensor_id: self.sensor_id.clone(),
            temperature: round2(temperature),
            humidity: round2(humidity),
            timestamp: Utc::now(),
        }
    }
}

fn anomaly_gap() -> Duration {
    Duration::from_secs(rand::thread_rng().gen_range(15..=20))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init(TracingConfig::default())?;

    let cli = Cli::parse();
    let interval = Duration::from_secs(cli.interval);
    let mut generator = PayloadGenerator::new(cli.sensor_id.clone());

    info!(relay = %cli.relay, sensor_id = %cli.sensor_id, "sensor starting");

    loop {
        match TcpStream::connect(&cli.relay).await {
            Ok(mut stream) => {
                info!(relay = %cli.relay, "connected to relay");
                loop {
                    let reading = generator.next();
                    let frame = encode_frame(&reading)?;
                    if let Err(error) = stream.write_all(&frame).await {
                        warn!(%error, "connection lost, reconnecting");
                        break;
                    }
                    info!(
                        temperature = reading.temperature,
                        humidity = reading.humidity,
                        "reading sent"
                    );
                    sleep(interval).await;
                }
            }
            Err(error) => warn!(%error, "relay not available, retrying"),
        }
        sleep(RECONNECT_DELAY).await;
    }
}
