//! # SQueue Bus Library
//!
//! A small fixed-capacity message bus: a set of named, bounded queues reached
//! through a read/write session interface, plus a routing daemon that drains
//! one inbound queue and redistributes each message to the outbound queue its
//! destination field names.
//!
//! ## Data Flow
//!
//! ```text
//! Producer -> bus_in_q -> RoutingDaemon -> bus_out_qN -> Consumer
//! ```
//!
//! Every queue is a bounded circular buffer that never blocks: a write to a
//! full queue and a read from an empty one fail immediately, and callers
//! answer with a backoff sleep and another attempt. Each message carries the
//! total time it has spent waiting inside queues.
//!
//! ## Architecture Overview
//!
//! - `queue`: the circular buffer and its index arithmetic
//! - `endpoint`: one locked queue per address, with the session API and status codes
//! - `registry`: construction, lookup and teardown of every endpoint of a bus
//! - `daemon`: the inbound-to-outbound routing loop
//! - `workers`: synthetic producers and consumers
//! - `runner`: wiring for a complete timed run
//! - `metrics` and `results`: queueing-latency statistics and the JSON report
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use squeue_bus::{BusConfig, BusRunner};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BusConfig {
//!         duration: Duration::from_secs(2),
//!         ..BusConfig::default()
//!     };
//!
//!     let results = BusRunner::new(config).run().await?;
//!     println!("Received {} messages", results.summary.total_received);
//!     Ok(())
//! }
//! ```

/// Command-line interface
///
/// Argument parsing using clap, with human-readable durations ("10s",
/// "500ms") for the run length and every backoff bound.
pub mod cli;

/// Time sources for stamping and accounting queueing time
pub mod clock;

/// Routing daemon
///
/// The two-state loop that moves each message from the inbound endpoint to
/// the outbound endpoint selected by its destination id, dropping messages
/// whose destination does not resolve.
pub mod daemon;

/// Queue endpoints and caller sessions
///
/// Wraps one bounded queue with its own mutex, stamps and accounts queueing
/// time, and maps failures to errno-style status codes at the byte boundary.
pub mod endpoint;

/// Error types for queue, endpoint, routing and bus-construction failures
pub mod error;

/// Logging setup
///
/// Colorized console output and an optional non-blocking log file.
pub mod logging;

/// The message record and its fixed-width wire encoding
pub mod message;

/// Performance measurement
///
/// HDR-histogram queueing-latency collection and throughput calculation,
/// with aggregation across consumers.
pub mod metrics;

/// Fixed-capacity FIFO circular buffer
pub mod queue;

/// Endpoint registry built once per bus
pub mod registry;

/// Result collection and output
///
/// The JSON run report and its console summary.
pub mod results;

/// Backoff policies and the shutdown-aware retry loop
pub mod retry;

/// Timed run orchestration
pub mod runner;

/// Process-wide stop flag
pub mod shutdown;

pub mod utils;

/// Synthetic producers and consumers
pub mod workers;

// Re-export key types for convenient library usage

/// Main run engine
pub use runner::{BusConfig, BusRunner};

/// Command-line arguments
pub use cli::Args;

/// Core bus building blocks
pub use endpoint::{EndpointHandle, EndpointStats, QueueEndpoint, StorageBudget};
pub use message::{Message, Payload, PAYLOAD_LEN, RECORD_SIZE};
pub use queue::{BoundedQueue, MessageQueue};
pub use registry::BusRegistry;

/// Error types and status-code mapping
pub use error::{BusError, QueueError, ReadError, RouteError, StatusCode, WriteError};

/// Routing and traffic
pub use daemon::{DaemonState, RouteOutcome, RoutingDaemon, RoutingStats};
pub use shutdown::ShutdownSignal;

/// Performance measurement and reporting types
pub use metrics::{LatencyMetrics, ThroughputMetrics};
pub use results::{ResultsManager, RunResults};

/// The current version of the bus
///
/// Populated from Cargo.toml and recorded in every results file.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
///
/// The defaults reproduce the reference bus: three producers, three
/// consumers, three outbound queues of ten messages each, running for ten
/// seconds.
pub mod defaults {
    use std::time::Duration;

    /// Default capacity of every queue, in messages
    pub const QUEUE_CAPACITY: usize = 10;

    /// Default number of producer tasks
    pub const SENDERS: usize = 3;

    /// Default number of consumer tasks
    pub const RECEIVERS: usize = 3;

    /// Default number of outbound queues
    ///
    /// Destination ids run from 1 to this value; id 0 is the inbound queue.
    pub const OUTBOUND_QUEUES: usize = 3;

    /// Default run length
    pub const DURATION: Duration = Duration::from_secs(10);

    /// Producer pacing window
    ///
    /// Producers sleep for a random interval in this window after every write
    /// attempt, successful or not.
    pub const PRODUCER_BACKOFF_MIN: Duration = Duration::from_millis(10);
    pub const PRODUCER_BACKOFF_MAX: Duration = Duration::from_millis(100);

    /// Poll window of the routing daemon and the consumers
    ///
    /// Used whenever a queue they poll is empty, or a queue the daemon writes
    /// to is full.
    pub const POLL_BACKOFF_MIN: Duration = Duration::from_millis(1);
    pub const POLL_BACKOFF_MAX: Duration = Duration::from_millis(10);

    /// How long the daemon keeps trying to place an in-flight message after
    /// shutdown before dropping it
    pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

    /// Default output file name
    pub const OUTPUT_FILE: &str = "bus_results.json";

    /// Queueing-latency percentiles reported by default
    pub const PERCENTILES: &[f64] = &[50.0, 95.0, 99.0, 99.9];
}
