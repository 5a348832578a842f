//! Run orchestration: build the bus, start traffic, stop it, report.
//!
//! [`BusRunner::run`] owns the whole lifecycle of one run:
//!
//! 1. Allocate the registry (fatal on failure).
//! 2. Spawn the consumers, the routing daemon and the producers as tokio tasks.
//! 3. Wait for the configured duration, the shutdown signal, or Ctrl-C when
//!    enabled.
//! 4. Trigger shutdown and join every task.
//! 5. Tear the registry down, releasing anything still queued, then snapshot
//!    the endpoint counters.
//! 6. Assemble a [`RunResults`] report.

use crate::cli::Args;
use crate::clock::{MonotonicClock, SharedClock};
use crate::daemon::{RoutingDaemon, RoutingStats};
use crate::endpoint::StorageBudget;
use crate::metrics::{aggregate_throughput, LatencyCollector};
use crate::registry::{outbound_name, BusRegistry, INBOUND_NAME};
use crate::results::{RunConfiguration, RunResults, RunSummary, SystemInfo};
use crate::retry::RandomBackoff;
use crate::shutdown::ShutdownSignal;
use crate::utils;
use crate::workers::{Consumer, ConsumerReport, MessageIdAllocator, Producer, ProducerReport};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Validated configuration for one bus run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    pub duration: Duration,
    pub senders: usize,
    pub receivers: usize,
    pub outbound_queues: usize,
    pub capacity: usize,
    pub producer_backoff_min: Duration,
    pub producer_backoff_max: Duration,
    pub poll_backoff_min: Duration,
    pub poll_backoff_max: Duration,
    pub drain_timeout: Duration,
    /// Bus-wide cap on stored messages; `None` leaves storage unbounded.
    pub storage_limit: Option<usize>,
    pub percentiles: Vec<f64>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            duration: crate::defaults::DURATION,
            senders: crate::defaults::SENDERS,
            receivers: crate::defaults::RECEIVERS,
            outbound_queues: crate::defaults::OUTBOUND_QUEUES,
            capacity: crate::defaults::QUEUE_CAPACITY,
            producer_backoff_min: crate::defaults::PRODUCER_BACKOFF_MIN,
            producer_backoff_max: crate::defaults::PRODUCER_BACKOFF_MAX,
            poll_backoff_min: crate::defaults::POLL_BACKOFF_MIN,
            poll_backoff_max: crate::defaults::POLL_BACKOFF_MAX,
            drain_timeout: crate::defaults::DRAIN_TIMEOUT,
            storage_limit: None,
            percentiles: crate::defaults::PERCENTILES.to_vec(),
        }
    }
}

impl BusConfig {
    /// Build and validate a configuration from parsed command-line arguments.
    pub fn from_args(args: &Args) -> Result<Self> {
        let config = Self {
            duration: args.duration,
            senders: args.senders,
            receivers: args.receivers,
            outbound_queues: args.outbound_queues,
            capacity: args.capacity,
            producer_backoff_min: args.producer_backoff_min,
            producer_backoff_max: args.producer_backoff_max,
            poll_backoff_min: args.poll_backoff_min,
            poll_backoff_max: args.poll_backoff_max,
            drain_timeout: args.drain_timeout,
            storage_limit: args.storage_limit,
            percentiles: args.percentiles.clone(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        utils::validate_capacity(self.capacity)?;
        utils::validate_workers("senders", self.senders)?;
        utils::validate_workers("receivers", self.receivers)?;
        utils::validate_outbound_queues(self.outbound_queues)?;
        utils::validate_backoff(
            "producer",
            self.producer_backoff_min,
            self.producer_backoff_max,
        )?;
        utils::validate_backoff("poll", self.poll_backoff_min, self.poll_backoff_max)?;
        if let Some(limit) = self.storage_limit {
            utils::validate_storage_limit(limit)?;
        }
        utils::validate_percentiles(&self.percentiles)?;
        Ok(())
    }

    fn producer_backoff(&self) -> RandomBackoff {
        RandomBackoff::new(self.producer_backoff_min, self.producer_backoff_max)
    }

    fn poll_backoff(&self) -> RandomBackoff {
        RandomBackoff::new(self.poll_backoff_min, self.poll_backoff_max)
    }

    /// Outbound address consumer `index` (0-based) reads from.
    pub fn consumer_address(&self, index: usize) -> u32 {
        (index % self.outbound_queues) as u32 + 1
    }

    fn snapshot(&self) -> RunConfiguration {
        RunConfiguration {
            duration: self.duration,
            senders: self.senders,
            receivers: self.receivers,
            outbound_queues: self.outbound_queues,
            capacity: self.capacity,
            producer_backoff: (self.producer_backoff_min, self.producer_backoff_max),
            poll_backoff: (self.poll_backoff_min, self.poll_backoff_max),
            drain_timeout: self.drain_timeout,
            storage_limit: self.storage_limit,
            percentiles: self.percentiles.clone(),
        }
    }
}

type ConsumerTask = JoinHandle<Result<(ConsumerReport, LatencyCollector)>>;

/// Drives one run of the bus.
pub struct BusRunner {
    config: BusConfig,
    clock: SharedClock,
    shutdown: ShutdownSignal,
    handle_ctrl_c: bool,
}

impl BusRunner {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            clock: Arc::new(MonotonicClock::new()),
            shutdown: ShutdownSignal::new(),
            handle_ctrl_c: false,
        }
    }

    /// Stamp and account queueing time with `clock` instead of the monotonic clock.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Stop early on Ctrl-C as well as after the configured duration.
    pub fn with_ctrl_c(mut self, enabled: bool) -> Self {
        self.handle_ctrl_c = enabled;
        self
    }

    /// A handle that stops the run when triggered.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub async fn run(self) -> Result<RunResults> {
        let config = &self.config;
        config.validate()?;

        let budget = Arc::new(match config.storage_limit {
            Some(limit) => StorageBudget::limited(limit),
            None => StorageBudget::unlimited(),
        });
        let registry = Arc::new(
            BusRegistry::with_storage_budget(
                config.capacity,
                config.outbound_queues,
                Arc::clone(&self.clock),
                budget,
            )
            .context("Failed to initialize the bus")?,
        );
        let run_id = utils::generate_run_id();
        info!("Starting bus run {}", run_id);

        let consumers = self.spawn_consumers(&registry)?;
        let daemon = RoutingDaemon::new(Arc::clone(&registry), self.shutdown.clone())?
            .with_backoff(Box::new(config.poll_backoff()))
            .with_drain_timeout(config.drain_timeout);
        let daemon = tokio::spawn(daemon.run());
        let producers = match self.spawn_producers(&registry) {
            Ok(producers) => producers,
            Err(e) => {
                warn!("Producer startup failed, stopping the bus: {:#}", e);
                self.shutdown.trigger();
                let _ = daemon.await;
                let _ = join_all(consumers, "consumer").await;
                registry.teardown();
                return Err(e);
            }
        };

        let started = Instant::now();
        self.wait_for_stop().await;
        self.shutdown.trigger();
        info!("Shutdown requested, waiting for tasks to exit");

        let producers = join_all(producers, "producer").await?;
        let routing: RoutingStats = daemon.await.context("Routing daemon task failed")?;
        let consumer_runs = join_all(consumers, "consumer")
            .await?
            .into_iter()
            .collect::<Result<Vec<_>>>()?;
        let run_duration = started.elapsed();
        info!("All tasks exited");

        let released_at_teardown = registry.teardown();
        let endpoints = registry.stats();

        let mut latency = LatencyCollector::new()?;
        let mut consumer_reports: Vec<ConsumerReport> = Vec::with_capacity(consumer_runs.len());
        for (report, samples) in consumer_runs {
            latency.merge(&samples)?;
            consumer_reports.push(report);
        }
        let throughput = aggregate_throughput(
            &consumer_reports
                .iter()
                .map(|c| c.throughput.clone())
                .collect::<Vec<_>>(),
        );

        let summary =
            RunSummary::from_reports(&producers, &consumer_reports, &routing, released_at_teardown);
        if !summary.conserved {
            warn!("Sent/received/dropped counts do not balance: {:?}", summary);
        }

        Ok(RunResults {
            run_id,
            timestamp: chrono::Utc::now(),
            run_duration,
            config: config.snapshot(),
            endpoints,
            routing,
            producers,
            consumers: consumer_reports,
            queueing_latency: latency.get_metrics(&config.percentiles),
            throughput,
            released_at_teardown,
            summary,
            system_info: SystemInfo::default(),
        })
    }

    /// Every producer is built before any is spawned, so a failure leaves
    /// no producer task behind.
    fn spawn_producers(
        &self,
        registry: &Arc<BusRegistry>,
    ) -> Result<Vec<JoinHandle<ProducerReport>>> {
        let ids = Arc::new(MessageIdAllocator::new());
        let destinations: Vec<u32> = registry.destinations().collect();

        let producers = (1..=self.config.senders)
            .map(|sender| -> Result<Producer> {
                Producer::new(
                    sender as u32,
                    registry.open(INBOUND_NAME)?,
                    destinations.clone(),
                    Arc::clone(&ids),
                    Box::new(self.config.producer_backoff()),
                    self.shutdown.clone(),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(producers
            .into_iter()
            .map(|producer| tokio::spawn(producer.run()))
            .collect())
    }

    fn spawn_consumers(&self, registry: &Arc<BusRegistry>) -> Result<Vec<ConsumerTask>> {
        (0..self.config.receivers)
            .map(|index| -> Result<ConsumerTask> {
                let name = outbound_name(self.config.consumer_address(index));
                debug!("Consumer {} bound to {}", index + 1, name);
                let consumer = Consumer::new(
                    index as u32 + 1,
                    registry.open(&name)?,
                    Box::new(self.config.poll_backoff()),
                    self.shutdown.clone(),
                )?;
                Ok(tokio::spawn(consumer.run()))
            })
            .collect()
    }

    /// Return when the run duration elapses, the shutdown signal fires, or
    /// (when enabled) Ctrl-C arrives, whichever comes first.
    async fn wait_for_stop(&self) {
        let handle_ctrl_c = self.handle_ctrl_c;
        let ctrl_c = async move {
            if !handle_ctrl_c {
                return std::future::pending::<()>().await;
            }
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Ctrl-C received"),
                Err(e) => {
                    warn!("Could not listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await
                }
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(self.config.duration) => debug!("Run duration elapsed"),
            _ = self.shutdown.triggered() => {
                info!("Shutdown signalled before the run duration elapsed")
            }
            _ = ctrl_c => {}
        }
    }
}

async fn join_all<T>(handles: Vec<JoinHandle<T>>, role: &str) -> Result<Vec<T>> {
    let mut out = Vec::with_capacity(handles.len());
    for handle in handles {
        out.push(
            handle
                .await
                .with_context(|| format!("A {} task panicked", role))?,
        );
    }
    Ok(out)
}
