//! The relay application context.
//!
//! `RelayApp` owns every piece of shared state - the buffer store, the
//! outgoing queue (inside the forwarding relay), the battery monitor, and
//! the event bus - and passes them explicitly to the components that need
//! them. Starting the app spawns the four background contexts: the
//! ingestion accept loop, the aggregation cycle, the battery drain tick,
//! and the relay drain tick, plus a command loop that services runtime
//! reconfiguration requests.
//!
//! The relay is designed to run indefinitely: downstream unavailability
//! degrades to queuing, never to stopping.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::aggregator::Aggregator;
use crate::buffer::BufferStore;
use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};
use crate::events::EventBus;
use crate::forwarder::{BatchTransport, ForwardingRelay, TcpTransport};
use crate::listener::{IngestionListener, ListenerCommand};
use crate::messages::{closed, RelayCommand};
use crate::power::BatteryMonitor;
use crate::validation;

const COMMAND_CHANNEL_CAPACITY: usize = 32;
const LISTENER_CHANNEL_CAPACITY: usize = 8;

/// A fully wired but not yet started relay.
pub struct RelayApp {
    config: RelayConfig,
    store: Arc<BufferStore>,
    battery: Arc<BatteryMonitor>,
    transport: Arc<TcpTransport>,
    relay: Arc<ForwardingRelay>,
    events: EventBus,
    command_tx: mpsc::Sender<RelayCommand>,
    command_rx: mpsc::Receiver<RelayCommand>,
}

impl RelayApp {
    /// Validate the configuration and wire up the shared state.
    pub fn new(config: RelayConfig) -> RelayResult<Self> {
        config.validate()?;

        let events = EventBus::default();
        let store = Arc::new(BufferStore::new(config.aggregator.buffer_capacity));
        let battery = Arc::new(BatteryMonitor::new(
            config.battery.initial_level,
            config.battery.low_threshold,
            events.clone(),
        )?);
        let transport = Arc::new(TcpTransport::new(
            config.collector_addr()?,
            config.forwarder.connect_timeout,
            config.forwarder.write_timeout,
        ));
        let relay = Arc::new(ForwardingRelay::new(
            Arc::clone(&transport) as Arc<dyn BatchTransport>,
            battery.subscribe(),
            events.clone(),
        ));
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            store,
            battery,
            transport,
            relay,
            events,
            command_tx,
            command_rx,
        })
    }

    /// The relay's event stream.
    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    /// A handle for runtime control of the relay.
    pub fn handle(&self) -> RelayHandle {
        RelayHandle {
            commands: self.command_tx.clone(),
        }
    }

    /// Bind the listener, spawn all background tasks, and return the
    /// running relay.
    pub async fn start(self) -> RelayResult<RunningRelay> {
        let Self {
            config,
            store,
            battery,
            transport,
            relay,
            events,
            command_tx,
            mut command_rx,
        } = self;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (listener_tx, listener_rx) = mpsc::channel(LISTENER_CHANNEL_CAPACITY);

        let listener = IngestionListener::bind(
            config.bind_addr()?,
            Arc::clone(&store),
            events.clone(),
            config.listener.read_timeout,
            listener_rx,
        )
        .await?;
        let listener_addr = listener.local_addr()?;

        tokio::spawn(listener.run(shutdown_rx.clone()));

        let aggregator = Aggregator::new(
            &config.aggregator,
            config.application.drone_id.clone(),
            Arc::clone(&store),
            events.clone(),
        );
        tokio::spawn(aggregator.run(Arc::clone(&relay), shutdown_rx.clone()));

        tokio::spawn(
            Arc::clone(&battery).run(config.battery.drain_interval, shutdown_rx.clone()),
        );
        tokio::spawn(
            Arc::clone(&relay).run_drain(config.forwarder.drain_interval, shutdown_rx.clone()),
        );

        info!(
            listener = %listener_addr,
            collector = %transport.collector_addr(),
            drone_id = %config.application.drone_id,
            "relay running"
        );

        let command_loop = tokio::spawn(async move {
            // The shutdown sender lives in this task: ending the loop (by
            // command or by dropping every handle) stops all background
            // tasks.
            while let Some(command) = command_rx.recv().await {
                match command {
                    RelayCommand::RebindListener { addr, respond_to } => {
                        let forwarded = listener_tx
                            .send(ListenerCommand::Rebind { addr, respond_to })
                            .await;
                        if forwarded.is_err() {
                            warn!("listener task is gone, rebind dropped");
                        }
                    }
                    RelayCommand::SetCollectorAddr { addr, respond_to } => {
                        transport.set_collector_addr(addr);
                        let _ = respond_to.send(Ok(()));
                    }
                    RelayCommand::SetBatteryLevel { level, respond_to } => {
                        let _ = respond_to.send(battery.set_level(level));
                    }
                    RelayCommand::QueueDepth { respond_to } => {
                        let _ = respond_to.send(relay.queue_depth());
                    }
                    RelayCommand::Shutdown { respond_to } => {
                        info!("relay shutting down");
                        let _ = shutdown_tx.send(true);
                        let _ = respond_to.send(());
                        break;
                    }
                }
            }
        });

        Ok(RunningRelay {
            listener_addr,
            handle: RelayHandle {
                commands: command_tx,
            },
            events,
            command_loop,
        })
    }
}

/// A started relay: the spawned command loop plus the handles a caller
/// needs to observe and control it.
pub struct RunningRelay {
    listener_addr: SocketAddr,
    handle: RelayHandle,
    events: EventBus,
    command_loop: JoinHandle<()>,
}

impl RunningRelay {
    /// The address the ingestion listener actually bound.
    pub fn listener_addr(&self) -> SocketAddr {
        self.listener_addr
    }

    /// A handle for runtime control of the relay.
    pub fn handle(&self) -> RelayHandle {
        self.handle.clone()
    }

    /// The relay's event stream.
    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    /// Wait for the command loop to end (i.e. for shutdown).
    pub async fn wait(self) -> RelayResult<()> {
        self.command_loop
            .await
            .map_err(|_| RelayError::CommandChannelClosed)
    }
}

/// Cloneable handle for runtime control of a running relay.
///
/// String inputs are validated before a command is sent, so invalid
/// reconfiguration never reaches the running components.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    commands: mpsc::Sender<RelayCommand>,
}

impl RelayHandle {
    async fn send(&self, command: RelayCommand) -> RelayResult<()> {
        self.commands.send(command).await.map_err(closed)
    }

    /// Re-bind the ingestion listener on a new `host:port` address.
    pub async fn rebind_listener(&self, addr: &str) -> RelayResult<()> {
        let addr = parse_addr(addr)?;
        let (command, rx) = RelayCommand::rebind_listener(addr);
        self.send(command).await?;
        rx.await.map_err(closed)?
    }

    /// Point the forwarder at a new `host:port` collector address.
    pub async fn set_collector_addr(&self, addr: &str) -> RelayResult<()> {
        let addr = parse_addr(addr)?;
        let (command, rx) = RelayCommand::set_collector_addr(addr);
        self.send(command).await?;
        rx.await.map_err(closed)?
    }

    /// Manually override the battery level.
    pub async fn set_battery_level(&self, level: u8) -> RelayResult<()> {
        let (command, rx) = RelayCommand::set_battery_level(level);
        self.send(command).await?;
        rx.await.map_err(closed)?
    }

    /// Current depth of the outgoing batch queue.
    pub async fn queue_depth(&self) -> RelayResult<usize> {
        let (command, rx) = RelayCommand::queue_depth();
        self.send(command).await?;
        rx.await.map_err(closed)
    }

    /// Stop the relay's background tasks.
    pub async fn shutdown(&self) -> RelayResult<()> {
        let (command, rx) = RelayCommand::shutdown();
        self.send(command).await?;
        rx.await.map_err(closed)
    }
}

fn parse_addr(addr: &str) -> RelayResult<SocketAddr> {
    validation::parse_reconfig_addr(addr)
        .map_err(|reason| RelayError::ConfigValidation(format!("'{}': {}", addr, reason)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RelayConfig {
        let mut config = RelayConfig::default();
        config.listener.bind_addr = "127.0.0.1:0".to_string();
        config
    }

    #[tokio::test]
    async fn start_binds_an_ephemeral_listener() {
        let app = RelayApp::new(test_config()).unwrap();
        let running = app.start().await.unwrap();
        assert_ne!(running.listener_addr().port(), 0);

        let handle = running.handle();
        handle.shutdown().await.unwrap();
        running.wait().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_reconfiguration_is_rejected_client_side() {
        let app = RelayApp::new(test_config()).unwrap();
        let running = app.start().await.unwrap();
        let handle = running.handle();

        let err = handle.set_collector_addr("not-an-address").await.unwrap_err();
        assert!(matches!(err, RelayError::ConfigValidation(_)));
        let err = handle.rebind_listener("127.0.0.1:0").await.unwrap_err();
        assert!(matches!(err, RelayError::ConfigValidation(_)));

        handle.shutdown().await.unwrap();
        running.wait().await.unwrap();
    }

    #[tokio::test]
    async fn battery_override_round_trips_through_the_command_loop() {
        let app = RelayApp::new(test_config()).unwrap();
        let running = app.start().await.unwrap();
        let handle = running.handle();

        handle.set_battery_level(10).await.unwrap();
        let err = handle.set_battery_level(200).await.unwrap_err();
        assert!(matches!(err, RelayError::BatteryLevelOutOfRange(200)));
        assert_eq!(handle.queue_depth().await.unwrap(), 0);

        handle.shutdown().await.unwrap();
        running.wait().await.unwrap();
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let mut config = RelayConfig::default();
        config.aggregator.buffer_capacity = 0;
        assert!(RelayApp::new(config).is_err());
    }
}
