//! The routing daemon.
//!
//! A single long-lived task that moves messages from the inbound endpoint to
//! the outbound endpoint named by each message's destination id. It is a
//! two-state machine:
//!
//! - [`DaemonState::AwaitingInbound`]: poll the inbound endpoint, sleeping a
//!   short random interval whenever it is empty.
//! - [`DaemonState::AwaitingOutboundAccept`]: hold one dequeued message and
//!   poll the destination endpoint's `write` until it is accepted.
//!
//! Shutdown is observed only while waiting for inbound traffic. Once a
//! message has been taken it is delivered even if shutdown arrives, unless
//! the destination stays full for longer than the drain timeout.

use crate::endpoint::EndpointHandle;
use crate::error::{ReadError, StatusCode};
use crate::message::{Message, RECORD_SIZE};
use crate::registry::{BusRegistry, INBOUND_NAME};
use crate::retry::{retry_until_shutdown, Backoff, RandomBackoff, RetryOutcome};
use crate::shutdown::ShutdownSignal;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Where the daemon is in its route cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonState {
    AwaitingInbound,
    /// Holding a message that no outbound endpoint has accepted yet.
    AwaitingOutboundAccept(Box<Message>),
}

/// What happened to the one message handled by [`RoutingDaemon::route_once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Routed { id: u32, destination: u32 },
    /// The destination id named no outbound endpoint; the message was dropped.
    Unresolved { id: u32, destination: u32 },
    /// Shutdown was in progress and the destination stayed full past the
    /// drain timeout.
    DroppedOnShutdown { id: u32, destination: u32 },
    /// The destination refused the message with a non-retryable error.
    WriteFailed { id: u32, destination: u32 },
}

/// Counters returned when the daemon stops.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingStats {
    pub routed: u64,
    pub dropped_unresolved: u64,
    pub dropped_on_shutdown: u64,
    pub write_failures: u64,
    /// Inbound polls that found the queue empty.
    pub inbound_retries: u64,
    /// Outbound writes refused because the destination was full.
    pub outbound_retries: u64,
}

pub struct RoutingDaemon {
    registry: Arc<BusRegistry>,
    inbound: EndpointHandle,
    shutdown: ShutdownSignal,
    backoff: Box<dyn Backoff>,
    drain_timeout: Duration,
    state: DaemonState,
    stats: RoutingStats,
}

impl RoutingDaemon {
    /// Open the inbound session and start in [`DaemonState::AwaitingInbound`].
    pub fn new(registry: Arc<BusRegistry>, shutdown: ShutdownSignal) -> Result<Self> {
        let inbound = registry
            .open(INBOUND_NAME)
            .context("Routing daemon could not open the inbound endpoint")?;

        Ok(Self {
            registry,
            inbound,
            shutdown,
            backoff: Box::new(RandomBackoff::new(
                crate::defaults::POLL_BACKOFF_MIN,
                crate::defaults::POLL_BACKOFF_MAX,
            )),
            drain_timeout: crate::defaults::DRAIN_TIMEOUT,
            state: DaemonState::AwaitingInbound,
            stats: RoutingStats::default(),
        })
    }

    pub fn with_backoff(mut self, backoff: Box<dyn Backoff>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn state(&self) -> &DaemonState {
        &self.state
    }

    pub fn stats(&self) -> &RoutingStats {
        &self.stats
    }

    /// Route until shutdown, then return the counters.
    pub async fn run(mut self) -> RoutingStats {
        info!(
            "Routing daemon started: {} -> {} outbound endpoint(s)",
            self.inbound.name(),
            self.registry.outbound_count()
        );

        while self.route_once().await.is_some() {}

        info!(
            "Routing daemon stopped: {} routed, {} unresolved, {} dropped on shutdown",
            self.stats.routed,
            self.stats.dropped_unresolved,
            self.stats.dropped_on_shutdown
        );
        self.stats
    }

    /// Move exactly one message from inbound to its outbound endpoint.
    ///
    /// Returns `None` when shutdown was observed before a message was taken.
    /// A message left in [`DaemonState::AwaitingOutboundAccept`] by a dropped
    /// future is picked up again by the next call.
    pub async fn route_once(&mut self) -> Option<RouteOutcome> {
        if self.state == DaemonState::AwaitingInbound {
            let message = self.take_inbound().await?;
            self.state = DaemonState::AwaitingOutboundAccept(Box::new(message));
        }
        self.deliver().await
    }

    async fn take_inbound(&mut self) -> Option<Message> {
        loop {
            let inbound = &self.inbound;
            let outcome = retry_until_shutdown(
                &self.shutdown,
                self.backoff.as_mut(),
                |e: &ReadError| e.is_retryable(),
                || inbound.read(),
            )
            .await;

            match outcome {
                RetryOutcome::Completed { value, attempts } => {
                    self.stats.inbound_retries += attempts - 1;
                    return Some(value);
                }
                RetryOutcome::Cancelled { attempts } => {
                    self.stats.inbound_retries += attempts;
                    return None;
                }
                RetryOutcome::Failed(e) => {
                    error!("Inbound read failed on {}: {}", inbound.name(), e);
                    sleep(self.backoff.next_delay()).await;
                }
            }
        }
    }

    async fn deliver(&mut self) -> Option<RouteOutcome> {
        let DaemonState::AwaitingOutboundAccept(message) = &self.state else {
            return None;
        };
        let (id, destination) = (message.id, message.destination_id);

        let outcome = match self.registry.outbound(destination) {
            Err(e) => {
                error!("Dropping message {} from {}: {}", id, message.source_id, e);
                self.stats.dropped_unresolved += 1;
                RouteOutcome::Unresolved { id, destination }
            }
            Ok(endpoint) => {
                let mut shutdown_seen: Option<Instant> = None;
                loop {
                    match endpoint.write(message, RECORD_SIZE) {
                        Ok(()) => {
                            debug!(
                                "Routed message {} ({} -> {}) via {}",
                                id,
                                message.source_id,
                                destination,
                                endpoint.name()
                            );
                            self.stats.routed += 1;
                            break RouteOutcome::Routed { id, destination };
                        }
                        Err(e) if e.is_retryable() => {
                            self.stats.outbound_retries += 1;
                            if self.shutdown.is_triggered() {
                                let since = *shutdown_seen.get_or_insert_with(Instant::now);
                                if since.elapsed() >= self.drain_timeout {
                                    warn!(
                                        "Dropping message {} on shutdown: {} still full after {:?}",
                                        id,
                                        endpoint.name(),
                                        self.drain_timeout
                                    );
                                    self.stats.dropped_on_shutdown += 1;
                                    break RouteOutcome::DroppedOnShutdown { id, destination };
                                }
                            }
                            sleep(self.backoff.next_delay()).await;
                        }
                        Err(e) => {
                            error!(
                                "Dropping message {}: write to {} failed: {}",
                                id,
                                endpoint.name(),
                                e
                            );
                            self.stats.write_failures += 1;
                            break RouteOutcome::WriteFailed { id, destination };
                        }
                    }
                }
            }
        };

        self.state = DaemonState::AwaitingInbound;
        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::message::Payload;
    use crate::registry::outbound_name;

    fn bus(capacity: usize) -> Arc<BusRegistry> {
        Arc::new(BusRegistry::new(capacity, 3, Arc::new(MonotonicClock::new())).unwrap())
    }

    fn fast(daemon: RoutingDaemon) -> RoutingDaemon {
        daemon.with_backoff(Box::new(RandomBackoff::new(
            Duration::from_micros(10),
            Duration::from_micros(50),
        )))
    }

    fn daemon_on(registry: &Arc<BusRegistry>) -> RoutingDaemon {
        fast(RoutingDaemon::new(Arc::clone(registry), ShutdownSignal::new()).unwrap())
    }

    #[tokio::test]
    async fn test_message_reaches_only_its_destination() {
        let registry = bus(10);
        let mut daemon = daemon_on(&registry);

        let msg = Message::new(1, 1, 2, Payload::from_text("hello"));
        registry.open(INBOUND_NAME).unwrap().write(&msg).unwrap();

        assert_eq!(
            daemon.route_once().await,
            Some(RouteOutcome::Routed { id: 1, destination: 2 })
        );
        assert_eq!(daemon.state(), &DaemonState::AwaitingInbound);

        let routed = registry.open(&outbound_name(2)).unwrap().read().unwrap();
        assert_eq!(routed.id, 1);
        assert_eq!(routed.payload.as_text(), "hello");
        assert!(registry.outbound(1).unwrap().is_empty());
        assert!(registry.outbound(3).unwrap().is_empty());
        assert!(registry.inbound().is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_destination_is_dropped_and_routing_continues() {
        let registry = bus(10);
        let mut daemon = daemon_on(&registry);
        let inbound = registry.open(INBOUND_NAME).unwrap();

        inbound.write(&Message::new(1, 1, 7, Payload::zeroed())).unwrap();
        inbound.write(&Message::new(2, 1, 0, Payload::zeroed())).unwrap();
        inbound.write(&Message::new(3, 1, 3, Payload::zeroed())).unwrap();

        assert_eq!(
            daemon.route_once().await,
            Some(RouteOutcome::Unresolved { id: 1, destination: 7 })
        );
        assert_eq!(
            daemon.route_once().await,
            Some(RouteOutcome::Unresolved { id: 2, destination: 0 })
        );
        assert_eq!(
            daemon.route_once().await,
            Some(RouteOutcome::Routed { id: 3, destination: 3 })
        );
        assert_eq!(daemon.stats().dropped_unresolved, 2);
        assert_eq!(daemon.stats().routed, 1);
    }

    #[tokio::test]
    async fn test_queueing_time_accumulates_across_hops() {
        let registry = bus(10);
        let mut daemon = daemon_on(&registry);

        registry
            .open(INBOUND_NAME)
            .unwrap()
            .write(&Message::new(5, 2, 1, Payload::zeroed()))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        daemon.route_once().await;

        let delivered = registry.open(&outbound_name(1)).unwrap().read().unwrap();
        assert!(delivered.queueing_time >= Duration::from_millis(2).as_nanos() as u64);
    }

    #[tokio::test]
    async fn test_shutdown_while_idle_stops_routing() {
        let registry = bus(10);
        let shutdown = ShutdownSignal::new();
        let daemon = fast(RoutingDaemon::new(Arc::clone(&registry), shutdown.clone()).unwrap());

        let task = tokio::spawn(daemon.run());
        tokio::time::sleep(Duration::from_millis(5)).await;
        shutdown.trigger();

        let stats = task.await.unwrap();
        assert_eq!(stats.routed, 0);
        assert!(stats.inbound_retries > 0);
    }

    #[tokio::test]
    async fn test_in_flight_message_completes_after_shutdown() {
        let registry = bus(1);
        let shutdown = ShutdownSignal::new();
        let mut daemon = fast(RoutingDaemon::new(Arc::clone(&registry), shutdown.clone()).unwrap())
            .with_drain_timeout(Duration::from_secs(5));

        let blocker = registry.open(&outbound_name(2)).unwrap();
        blocker.write(&Message::new(100, 9, 2, Payload::zeroed())).unwrap();
        registry
            .open(INBOUND_NAME)
            .unwrap()
            .write(&Message::new(1, 1, 2, Payload::zeroed()))
            .unwrap();

        let reader = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            shutdown.trigger();
            tokio::time::sleep(Duration::from_millis(5)).await;
            blocker.read().unwrap().id
        });

        assert_eq!(
            daemon.route_once().await,
            Some(RouteOutcome::Routed { id: 1, destination: 2 })
        );
        assert_eq!(reader.await.unwrap(), 100);
        assert!(daemon.stats().outbound_retries > 0);
        assert_eq!(daemon.route_once().await, None);
    }

    #[tokio::test]
    async fn test_full_destination_is_abandoned_after_drain_timeout() {
        let registry = bus(1);
        let shutdown = ShutdownSignal::new();
        let mut daemon = fast(RoutingDaemon::new(Arc::clone(&registry), shutdown.clone()).unwrap())
            .with_drain_timeout(Duration::from_millis(5));

        registry
            .open(&outbound_name(3))
            .unwrap()
            .write(&Message::new(100, 9, 3, Payload::zeroed()))
            .unwrap();
        registry
            .open(INBOUND_NAME)
            .unwrap()
            .write(&Message::new(1, 1, 3, Payload::zeroed()))
            .unwrap();

        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2)).await;
            shutdown.trigger();
        });

        assert_eq!(
            daemon.route_once().await,
            Some(RouteOutcome::DroppedOnShutdown { id: 1, destination: 3 })
        );
        trigger.await.unwrap();

        assert_eq!(daemon.stats().dropped_on_shutdown, 1);
        assert_eq!(daemon.stats().routed, 0);
        let resident = registry.open(&outbound_name(3)).unwrap().read().unwrap();
        assert_eq!(resident.id, 100);
        assert_eq!(daemon.route_once().await, None);
    }

    #[tokio::test]
    async fn test_shutdown_before_any_traffic_takes_nothing() {
        let registry = bus(4);
        let shutdown = ShutdownSignal::new();
        let mut daemon = fast(RoutingDaemon::new(Arc::clone(&registry), shutdown.clone()).unwrap());

        registry
            .open(INBOUND_NAME)
            .unwrap()
            .write(&Message::new(1, 1, 1, Payload::zeroed()))
            .unwrap();
        shutdown.trigger();

        assert_eq!(daemon.route_once().await, None);
        assert_eq!(registry.inbound().len(), 1);
    }
}
