//! Synthetic traffic: producers that feed the inbound endpoint and consumers
//! that drain the outbound endpoints.
//!
//! Both sides follow the same contract as the routing daemon. Queue
//! operations never block, so a full or empty endpoint is answered with a
//! backoff sleep and another attempt, and shutdown is only looked at between
//! attempts.

use crate::endpoint::EndpointHandle;
use crate::error::{ReadError, StatusCode, WriteError};
use crate::message::{Message, Payload, PAYLOAD_LEN, RECORD_SIZE};
use crate::metrics::{LatencyCollector, ThroughputCalculator, ThroughputMetrics};
use crate::retry::{retry_until_shutdown, Backoff, RetryOutcome};
use crate::shutdown::ShutdownSignal;
use anyhow::{bail, Result};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Hands out message ids under a dedicated lock.
///
/// Ids start at 0 and increase by one per call across every producer that
/// shares the allocator.
#[derive(Debug, Default)]
pub struct MessageIdAllocator {
    next: Mutex<u32>,
}

impl MessageIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u32 {
        let mut next = self.next.lock();
        let id = *next;
        *next = next.wrapping_add(1);
        id
    }

    /// Number of ids handed out so far.
    pub fn issued(&self) -> u32 {
        *self.next.lock()
    }
}

/// Random printable ASCII text of 1 to `PAYLOAD_LEN - 1` bytes, zero-filled.
pub fn random_payload<R: Rng + ?Sized>(rng: &mut R) -> Payload {
    let len = rng.gen_range(1..PAYLOAD_LEN);
    let text: Vec<u8> = (0..len).map(|_| rng.gen_range(b'0'..=b'~')).collect();
    Payload::from_bytes(&text)
}

/// What one producer did before it stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerReport {
    pub sender_id: u32,
    pub sent: u64,
    /// Writes refused because the inbound endpoint was full.
    pub rejected: u64,
    /// Messages built but abandoned because shutdown arrived first.
    pub abandoned: u64,
    /// Writes refused because bus storage was exhausted.
    #[serde(default)]
    pub failed: u64,
}

/// Writes randomly addressed messages to the inbound endpoint.
pub struct Producer {
    sender_id: u32,
    inbound: EndpointHandle,
    destinations: Vec<u32>,
    ids: Arc<MessageIdAllocator>,
    backoff: Box<dyn Backoff>,
    shutdown: ShutdownSignal,
    limit: Option<u64>,
}

impl Producer {
    pub fn new(
        sender_id: u32,
        inbound: EndpointHandle,
        destinations: Vec<u32>,
        ids: Arc<MessageIdAllocator>,
        backoff: Box<dyn Backoff>,
        shutdown: ShutdownSignal,
    ) -> Result<Self> {
        if destinations.is_empty() {
            bail!("Producer {} has no destinations to address", sender_id);
        }

        Ok(Self {
            sender_id,
            inbound,
            destinations,
            ids,
            backoff,
            shutdown,
            limit: None,
        })
    }

    /// Stop after `limit` messages have been sent instead of running until
    /// shutdown.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    fn build_message(&self) -> Message {
        let mut rng = rand::thread_rng();
        let destination = self.destinations[rng.gen_range(0..self.destinations.len())];
        Message::new(
            self.ids.next_id(),
            self.sender_id,
            destination,
            random_payload(&mut rng),
        )
    }

    pub async fn run(mut self) -> ProducerReport {
        let mut report = ProducerReport {
            sender_id: self.sender_id,
            ..ProducerReport::default()
        };
        debug!("Producer {} started on {}", self.sender_id, self.inbound.name());

        while !self.shutdown.is_triggered() && self.limit.map_or(true, |l| report.sent < l) {
            let message = self.build_message();
            let inbound = &self.inbound;

            let outcome = retry_until_shutdown(
                &self.shutdown,
                self.backoff.as_mut(),
                |e: &WriteError| e.is_retryable(),
                || inbound.write(&message),
            )
            .await;

            match outcome {
                RetryOutcome::Completed { attempts, .. } => {
                    report.sent += 1;
                    report.rejected += attempts - 1;
                    debug!(
                        "Msg sent by {}: id={} src={} dst={}",
                        self.sender_id, message.id, message.source_id, message.destination_id
                    );
                    // Pace the next message the same way a refused write is retried.
                    sleep(self.backoff.next_delay()).await;
                }
                RetryOutcome::Cancelled { attempts } => {
                    report.rejected += attempts;
                    report.abandoned += 1;
                }
                RetryOutcome::Failed(WriteError::AllocationFailure) => {
                    report.failed += 1;
                    debug!("Producer {} out of bus storage, backing off", self.sender_id);
                    sleep(self.backoff.next_delay()).await;
                }
                RetryOutcome::Failed(e) => {
                    warn!("Producer {} stopping: {}", self.sender_id, e);
                    break;
                }
            }
        }

        info!(
            "Producer {} exiting: {} sent, {} rejected, {} failed",
            self.sender_id, report.sent, report.rejected, report.failed
        );
        report
    }
}

/// What one consumer saw before it stopped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsumerReport {
    pub receiver_id: u32,
    pub endpoint: String,
    pub received: u64,
    /// Messages whose destination was not this consumer's endpoint.
    pub misrouted: u64,
    /// Reads that found the endpoint empty.
    pub empty_polls: u64,
    pub throughput: ThroughputMetrics,
}

/// Reads one outbound endpoint and records each message's queueing time.
pub struct Consumer {
    receiver_id: u32,
    outbound: EndpointHandle,
    backoff: Box<dyn Backoff>,
    shutdown: ShutdownSignal,
    latency: LatencyCollector,
    throughput: ThroughputCalculator,
    limit: Option<u64>,
}

impl Consumer {
    pub fn new(
        receiver_id: u32,
        outbound: EndpointHandle,
        backoff: Box<dyn Backoff>,
        shutdown: ShutdownSignal,
    ) -> Result<Self> {
        Ok(Self {
            receiver_id,
            outbound,
            backoff,
            shutdown,
            latency: LatencyCollector::new()?,
            throughput: ThroughputCalculator::new(),
            limit: None,
        })
    }

    /// Stop after `limit` messages have been received.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Read until shutdown (or the limit), returning the report and the raw
    /// latency samples for bus-wide aggregation.
    pub async fn run(mut self) -> Result<(ConsumerReport, LatencyCollector)> {
        let address = self.outbound.endpoint().address();
        let mut report = ConsumerReport {
            receiver_id: self.receiver_id,
            endpoint: self.outbound.name().to_string(),
            ..ConsumerReport::default()
        };
        debug!("Consumer {} started on {}", self.receiver_id, self.outbound.name());

        while self.limit.map_or(true, |l| report.received < l) {
            let outbound = &self.outbound;
            let outcome = retry_until_shutdown(
                &self.shutdown,
                self.backoff.as_mut(),
                |e: &ReadError| e.is_retryable(),
                || outbound.read(),
            )
            .await;

            let message = match outcome {
                RetryOutcome::Completed { value, attempts } => {
                    report.empty_polls += attempts - 1;
                    value
                }
                RetryOutcome::Cancelled { attempts } => {
                    report.empty_polls += attempts;
                    break;
                }
                RetryOutcome::Failed(e) => {
                    warn!("Consumer {} stopping: {}", self.receiver_id, e);
                    break;
                }
            };

            report.received += 1;
            if message.destination_id != address {
                report.misrouted += 1;
                warn!(
                    "Consumer {} on {} got message {} addressed to {}",
                    self.receiver_id,
                    self.outbound.name(),
                    message.id,
                    message.destination_id
                );
            }
            self.latency.record_ns(message.queueing_time)?;
            self.throughput.record_message(RECORD_SIZE);
            debug!(
                "Msg received by {}: id={} src={} dst={} qtime={}ns",
                self.receiver_id,
                message.id,
                message.source_id,
                message.destination_id,
                message.queueing_time
            );
        }

        report.throughput = self.throughput.get_metrics();
        info!(
            "Consumer {} exiting: {} received from {}",
            self.receiver_id, report.received, report.endpoint
        );
        Ok((report, self.latency))
    }
}
