//! TCP ingestion listener for sensor connections.
//!
//! The accept loop runs in a `tokio::select!` over the listening socket and
//! a command receiver, so the listener can be re-bound to a new address at
//! runtime without a restart: the old socket is dropped, in-flight
//! connections finish naturally on their own tasks, and a failed bind
//! leaves the previous listener serving.
//!
//! Each accepted connection gets its own task. Frames are newline-delimited
//! JSON readings; a malformed line is logged and skipped without ending the
//! connection. Reads use a bounded timeout so every connection task stays
//! interruptible by shutdown within one timeout interval. A peer close or
//! connection error ends the task without retry - sensors are expected to
//! reconnect themselves.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::buffer::BufferStore;
use crate::error::RelayResult;
use crate::events::{EventBus, RelayEvent};
use crate::protocol::decode_reading;

/// Runtime control commands for a running listener.
#[derive(Debug)]
pub enum ListenerCommand {
    /// Close the listening socket and re-bind on `addr`.
    Rebind {
        /// The new listening address.
        addr: SocketAddr,
        /// Outcome of the rebind; on failure the old listener stays live.
        respond_to: oneshot::Sender<RelayResult<()>>,
    },
}

/// Accepts sensor connections and routes readings into the buffer store.
pub struct IngestionListener {
    listener: TcpListener,
    store: Arc<BufferStore>,
    events: EventBus,
    read_timeout: Duration,
    commands: mpsc::Receiver<ListenerCommand>,
}

impl IngestionListener {
    /// Bind on `addr` and prepare the accept loop.
    pub async fn bind(
        addr: SocketAddr,
        store: Arc<BufferStore>,
        events: EventBus,
        read_timeout: Duration,
        commands: mpsc::Receiver<ListenerCommand>,
    ) -> RelayResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        let bound = listener.local_addr()?;
        info!(addr = %bound, "ingestion listener bound");
        Ok(Self {
            listener,
            store,
            events,
            read_timeout,
            commands,
        })
    }

    /// The bound address (useful when binding to port 0).
    pub fn local_addr(&self) -> RelayResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop. Runs until the shutdown signal fires.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        let store = Arc::clone(&self.store);
                        let events = self.events.clone();
                        let read_timeout = self.read_timeout;
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            handle_sensor(socket, peer, store, events, read_timeout, shutdown).await;
                        });
                    }
                    Err(error) => error!(%error, "accept failed"),
                },
                Some(command) = self.commands.recv() => match command {
                    ListenerCommand::Rebind { addr, respond_to } => {
                        let outcome = self.rebind(addr).await;
                        let _ = respond_to.send(outcome);
                    }
                },
                _ = shutdown.changed() => {
                    info!("ingestion listener stopping");
                    break;
                }
            }
        }
    }

    async fn rebind(&mut self, addr: SocketAddr) -> RelayResult<()> {
        // Bind the replacement before dropping the old socket so a failure
        // leaves the previous configuration live.
        let next = TcpListener::bind(addr).await?;
        let bound = next.local_addr()?;
        self.listener = next;
        info!(addr = %bound, "ingestion listener re-bound");
        self.events.emit(RelayEvent::ListenerRebound { addr: bound });
        Ok(())
    }
}

/// Receive loop for one sensor connection.
async fn handle_sensor(
    socket: TcpStream,
    peer: SocketAddr,
    store: Arc<BufferStore>,
    events: EventBus,
    read_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let session = Uuid::new_v4().to_string();
    info!(%peer, %session, "sensor connected");
    events.emit(RelayEvent::SensorConnected {
        session: session.clone(),
        peer,
    });

    let mut reader = BufReader::new(socket);
    let mut line = String::new();

    loop {
        line.clear();
        let read = tokio::select! {
            read = timeout(read_timeout, reader.read_line(&mut line)) => read,
            _ = shutdown.changed() => break,
        };

        match read {
            Ok(Ok(0)) => {
                info!(%peer, %session, "sensor disconnected");
                break;
            }
            Ok(Ok(_)) => {
                let frame = line.trim();
                if frame.is_empty() {
                    continue;
                }
                match decode_reading(frame) {
                    Ok(reading) => {
                        debug!(
                            %peer,
                            sensor_id = %reading.sensor_id,
                            temperature = reading.temperature,
                            humidity = reading.humidity,
                            "reading received"
                        );
                        let sensor_id = reading.sensor_id.clone();
                        store.record(reading);
                        events.emit(RelayEvent::ReadingAccepted { sensor_id });
                    }
                    // Malformed frames never terminate the connection.
                    Err(error) => warn!(%peer, %session, %error, "ignoring malformed frame"),
                }
            }
            Ok(Err(error)) => {
                warn!(%peer, %session, %error, "sensor connection error");
                break;
            }
            // Idle past the read timeout: loop again so shutdown is
            // observed within one timeout interval.
            Err(_) => continue,
        }
    }

    events.emit(RelayEvent::SensorDisconnected { session, peer });
}
