use crate::daemon::RoutingStats;
use crate::endpoint::EndpointStats;
use crate::metrics::{LatencyMetrics, ThroughputMetrics};
use crate::utils::{format_duration, format_duration_ns, format_message_rate};
use crate::workers::{ConsumerReport, ProducerReport};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Complete report of one bus run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResults {
    pub run_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub run_duration: Duration,
    pub config: RunConfiguration,
    pub endpoints: Vec<EndpointStats>,
    pub routing: RoutingStats,
    pub producers: Vec<ProducerReport>,
    pub consumers: Vec<ConsumerReport>,
    /// Queueing time over every delivered message
    pub queueing_latency: LatencyMetrics,
    pub throughput: ThroughputMetrics,
    /// Messages still resident in some queue when the bus was torn down
    pub released_at_teardown: usize,
    pub summary: RunSummary,
    pub system_info: SystemInfo,
}

/// Configuration the run was started with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfiguration {
    pub duration: Duration,
    pub senders: usize,
    pub receivers: usize,
    pub outbound_queues: usize,
    pub capacity: usize,
    pub producer_backoff: (Duration, Duration),
    pub poll_backoff: (Duration, Duration),
    pub drain_timeout: Duration,
    pub percentiles: Vec<f64>,
    /// Bus-wide cap on stored messages, if one was set
    #[serde(default)]
    pub storage_limit: Option<usize>,
}

/// Totals derived from the per-component reports
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_sent: u64,
    pub total_routed: u64,
    pub total_received: u64,
    pub total_rejected: u64,
    pub total_dropped: u64,
    pub total_misrouted: u64,
    /// Every sent message was received, dropped, or released at teardown
    pub conserved: bool,
}

impl RunSummary {
    pub fn from_reports(
        producers: &[ProducerReport],
        consumers: &[ConsumerReport],
        routing: &RoutingStats,
        released_at_teardown: usize,
    ) -> Self {
        let total_sent: u64 = producers.iter().map(|p| p.sent).sum();
        let total_rejected: u64 = producers.iter().map(|p| p.rejected).sum();
        let total_received: u64 = consumers.iter().map(|c| c.received).sum();
        let total_misrouted: u64 = consumers.iter().map(|c| c.misrouted).sum();
        let total_dropped =
            routing.dropped_unresolved + routing.dropped_on_shutdown + routing.write_failures;

        Self {
            total_sent,
            total_routed: routing.routed,
            total_received,
            total_rejected,
            total_dropped,
            total_misrouted,
            conserved: total_sent == total_received + total_dropped + released_at_teardown as u64,
        }
    }
}

/// System information for reproducibility
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: usize,
    pub rust_version: String,
    pub bus_version: String,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_cores: crate::utils::get_cpu_cores(),
            rust_version: env!("CARGO_PKG_RUST_VERSION").to_string(),
            bus_version: crate::VERSION.to_string(),
        }
    }
}

/// Writes run reports to disk and to the log
pub struct ResultsManager {
    output_file: PathBuf,
}

impl ResultsManager {
    pub fn new(output_file: &Path) -> Self {
        Self {
            output_file: output_file.to_path_buf(),
        }
    }

    pub fn output_file(&self) -> &Path {
        &self.output_file
    }

    /// Write the report as pretty-printed JSON, creating parent directories.
    pub fn write(&self, results: &RunResults) -> Result<()> {
        if let Some(parent) = self.output_file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {:?}", parent))?;
            }
        }

        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&self.output_file, json)
            .with_context(|| format!("Failed to write results to {:?}", self.output_file))?;

        info!("Results written to: {:?}", self.output_file);
        Ok(())
    }

    /// Read a report previously written by [`ResultsManager::write`].
    pub fn load(path: &Path) -> Result<RunResults> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read results from {:?}", path))?;
        let results = serde_json::from_str(&json)
            .with_context(|| format!("Malformed results file {:?}", path))?;
        Ok(results)
    }

    pub fn print_summary(results: &RunResults) {
        let summary = &results.summary;
        info!("===== Bus run {} =====", results.run_id);
        info!(
            "Ran {} with {} sender(s), {} receiver(s), {} outbound queue(s) of capacity {}",
            format_duration(results.run_duration),
            results.config.senders,
            results.config.receivers,
            results.config.outbound_queues,
            results.config.capacity
        );
        info!(
            "Sent {} (rejected {}), routed {}, received {}, dropped {}, left in queues {}",
            summary.total_sent,
            summary.total_rejected,
            summary.total_routed,
            summary.total_received,
            summary.total_dropped,
            results.released_at_teardown
        );
        info!(
            "Throughput: {}",
            format_message_rate(results.throughput.messages_per_second)
        );

        let latency = &results.queueing_latency;
        if latency.total_samples > 0 {
            info!(
                "Queueing time: min {} / mean {} / max {}",
                format_duration_ns(latency.min_ns),
                format_duration_ns(latency.mean_ns as u64),
                format_duration_ns(latency.max_ns)
            );
            for p in &latency.percentiles {
                info!("  p{}: {}", p.percentile, format_duration_ns(p.value_ns));
            }
        }

        for endpoint in &results.endpoints {
            info!(
                "  {:<12} writes {:>8}  reads {:>8}  full {:>8}  empty {:>10}",
                endpoint.name,
                endpoint.writes,
                endpoint.reads,
                endpoint.rejected_full,
                endpoint.empty_reads
            );
        }

        let allocation_failures: u64 =
            results.endpoints.iter().map(|e| e.allocation_failures).sum();
        if allocation_failures > 0 {
            tracing::warn!(
                "{} write(s) refused for lack of storage (limit {:?})",
                allocation_failures,
                results.config.storage_limit
            );
        }

        if summary.total_misrouted > 0 {
            tracing::warn!("{} message(s) reached the wrong consumer", summary.total_misrouted);
        }
        if !summary.conserved {
            tracing::warn!("Message accounting does not balance");
        }
    }
}
