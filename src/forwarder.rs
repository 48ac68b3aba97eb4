//! Delivery path from the relay to the collector.
//!
//! [`ForwardingRelay::submit`] applies the mode gate: in return-to-base mode
//! every batch is queued and no delivery is attempted; in normal mode a
//! batch is delivered immediately unless older batches are already queued,
//! in which case it joins the back of the queue so batches always reach the
//! collector in production order. Delivery failures (connection refused,
//! reset, timeout) enqueue the batch - nothing is dropped silently.
//!
//! A periodic drain task flushes the queue strictly FIFO whenever the mode
//! is normal. A failure mid-drain pushes the undelivered batch back at the
//! front and aborts the attempt until the next tick.
//!
//! The actual wire send sits behind the [`BatchTransport`] trait so tests
//! can substitute an in-memory collector; the production implementation is
//! [`TcpTransport`], which opens a connection per batch, writes one
//! newline-framed JSON document under a bounded timeout, and closes.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{interval_at, timeout, Instant};
use tracing::{debug, info, warn};

use crate::error::{RelayError, RelayResult};
use crate::events::{EventBus, RelayEvent};
use crate::power::{Mode, PowerState};
use crate::protocol::{encode_frame, Batch};

/// One delivery attempt of a complete batch to the collector.
#[async_trait]
pub trait BatchTransport: Send + Sync {
    /// Deliver one batch as a single application-level message. A timeout
    /// is reported the same way as any other connection error.
    async fn deliver(&self, batch: &Batch) -> RelayResult<()>;
}

/// TCP transport with a close-per-batch connection policy.
#[derive(Debug)]
pub struct TcpTransport {
    collector_addr: Mutex<SocketAddr>,
    connect_timeout: Duration,
    write_timeout: Duration,
}

impl TcpTransport {
    /// Create a transport targeting `collector_addr`.
    pub fn new(collector_addr: SocketAddr, connect_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            collector_addr: Mutex::new(collector_addr),
            connect_timeout,
            write_timeout,
        }
    }

    /// The current collector address.
    pub fn collector_addr(&self) -> SocketAddr {
        *self.lock_addr()
    }

    /// Point the transport at a new collector address. Takes effect on the
    /// next delivery attempt.
    pub fn set_collector_addr(&self, addr: SocketAddr) {
        info!(%addr, "collector address updated");
        *self.lock_addr() = addr;
    }

    fn lock_addr(&self) -> MutexGuard<'_, SocketAddr> {
        self.collector_addr.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl BatchTransport for TcpTransport {
    async fn deliver(&self, batch: &Batch) -> RelayResult<()> {
        let addr = self.collector_addr();
        let frame = encode_frame(batch)?;

        let mut stream = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| RelayError::Timeout("collector connect"))??;
        timeout(self.write_timeout, stream.write_all(&frame))
            .await
            .map_err(|_| RelayError::Timeout("batch write"))??;
        timeout(self.write_timeout, stream.shutdown())
            .await
            .map_err(|_| RelayError::Timeout("batch write"))??;

        debug!(%addr, produced_at = %batch.timestamp, "batch delivered");
        Ok(())
    }
}

/// Queues and forwards batches according to the mode gate.
pub struct ForwardingRelay {
    transport: Arc<dyn BatchTransport>,
    power: watch::Receiver<PowerState>,
    events: EventBus,
    queue: Mutex<VecDeque<Batch>>,
    // Serializes every delivery so a freshly submitted batch can never
    // overtake a queue drain already in flight.
    send_lock: tokio::sync::Mutex<()>,
}

impl ForwardingRelay {
    /// Create a relay around a transport and the power-state watch.
    pub fn new(
        transport: Arc<dyn BatchTransport>,
        power: watch::Receiver<PowerState>,
        events: EventBus,
    ) -> Self {
        Self {
            transport,
            power,
            events,
            queue: Mutex::new(VecDeque::new()),
            send_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn mode(&self) -> Mode {
        self.power.borrow().mode
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<Batch>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of batches awaiting delivery.
    pub fn queue_depth(&self) -> usize {
        self.lock_queue().len()
    }

    fn enqueue(&self, batch: Batch) {
        let produced_at = batch.timestamp;
        let depth = {
            let mut queue = self.lock_queue();
            queue.push_back(batch);
            queue.len()
        };
        info!(queue_depth = depth, %produced_at, "batch queued for later delivery");
        self.events.emit(RelayEvent::BatchQueued {
            produced_at,
            queue_depth: depth,
        });
    }

    /// Deliver a batch now or queue it, per the mode gate.
    pub async fn submit(&self, batch: Batch) {
        if self.mode() == Mode::ReturnToBase {
            self.enqueue(batch);
            return;
        }

        let _sending = self.send_lock.lock().await;
        if !self.lock_queue().is_empty() {
            // Older batches are pending; keep production order.
            self.enqueue(batch);
            return;
        }

        match self.transport.deliver(&batch).await {
            Ok(()) => self.events.emit(RelayEvent::BatchDelivered {
                produced_at: batch.timestamp,
            }),
            Err(error) => {
                warn!(%error, "batch delivery failed, queuing for retry");
                self.enqueue(batch);
            }
        }
    }

    /// Flush the queue strictly FIFO while the mode stays normal.
    ///
    /// Returns the number of batches delivered. A failure pushes the
    /// undelivered batch back at the front and surfaces the error; the
    /// remaining batches stay queued in their original order.
    pub async fn drain_once(&self) -> RelayResult<usize> {
        let _sending = self.send_lock.lock().await;
        let mut delivered = 0;

        loop {
            if self.mode() != Mode::Normal {
                break;
            }
            // The queue mutex is released before any network I/O happens.
            let Some(batch) = self.lock_queue().pop_front() else {
                break;
            };

            match self.transport.deliver(&batch).await {
                Ok(()) => {
                    delivered += 1;
                    self.events.emit(RelayEvent::BatchDelivered {
                        produced_at: batch.timestamp,
                    });
                }
                Err(error) => {
                    self.lock_queue().push_front(batch);
                    return Err(error);
                }
            }
        }

        Ok(delivered)
    }

    /// Periodic drain loop. Runs until the shutdown signal fires; delivery
    /// failures are logged and retried on the next tick.
    pub async fn run_drain(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.mode() != Mode::Normal || self.queue_depth() == 0 {
                        continue;
                    }
                    match self.drain_once().await {
                        Ok(0) => {}
                        Ok(count) => info!(delivered = count, "flushed outgoing queue"),
                        Err(error) => warn!(
                            %error,
                            queued = self.queue_depth(),
                            "collector unreachable, batches remain queued"
                        ),
                    }
                }
                _ = shutdown.changed() => {
                    debug!("relay drain task stopping");
                    break;
                }
            }
        }
    }
}
