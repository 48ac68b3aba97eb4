//! Minimal collector.
//!
//! Accepts relay connections and logs every received batch. Stands in for
//! the central server during development and manual testing; real
//! presentation of the data is somebody else's job.

use anyhow::Result;
use clap::Parser;
use drone_relay::logging::{self, TracingConfig};
use drone_relay::protocol::decode_batch;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "collector-sink")]
#[command(about = "Minimal collector that logs batches received from a relay", long_about = None)]
struct Cli {
    /// Address to listen on for relay connections.
    #[arg(long, default_value = "127.0.0.1:6000")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init(TracingConfig::default())?;

    let cli = Cli::parse();
    let listener = TcpListener::bind(&cli.bind).await?;
    info!(addr = %listener.local_addr()?, "collector listening");

    loop {
        let (socket, peer) = listener.accept().await?;
        info!(%peer, "relay connected");

        tokio::spawn(async move {
            let mut reader = BufReader::new(socket);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        info!(%peer, "relay disconnected");
                        break;
                    }
                    Ok(_) => match decode_batch(&line) {
                        Ok(batch) => info!(
                            %peer,
                            drone_id = %batch.drone_id,
                            produced_at = %batch.timestamp,
                            sources = batch.averages.len(),
                            anomalies = batch.anomalies.len(),
                            "batch received"
                        ),
                        Err(error) => warn!(%peer, %error, "invalid batch"),
                    },
                    Err(error) => {
                        warn!(%peer, %error, "connection error");
                        break;
                    }
                }
            }
        });
    }
}
