use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

/// squeue-bus - bounded message bus with a routing daemon and synthetic traffic
#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// How long to run traffic before shutting down (e.g. 10s, 500ms, 2m)
    #[clap(short = 'd', long, value_parser = parse_duration, default_value = "10s", help_heading = "Core Options")]
    pub duration: Duration,

    /// Number of producer tasks writing to the inbound queue
    #[clap(short = 's', long, default_value_t = crate::defaults::SENDERS, help_heading = "Core Options")]
    pub senders: usize,

    /// Number of consumer tasks reading the outbound queues
    #[clap(short = 'r', long, default_value_t = crate::defaults::RECEIVERS, help_heading = "Core Options")]
    pub receivers: usize,

    /// Number of outbound queues (destination ids 1..=N)
    #[clap(short = 'q', long, default_value_t = crate::defaults::OUTBOUND_QUEUES, help_heading = "Core Options")]
    pub outbound_queues: usize,

    /// Capacity of every queue, in messages
    #[clap(short = 'c', long, default_value_t = crate::defaults::QUEUE_CAPACITY, help_heading = "Core Options")]
    pub capacity: usize,

    /// Shortest pause a producer takes between writes
    #[clap(long, value_parser = parse_duration, default_value = "10ms", help_heading = "Timing")]
    pub producer_backoff_min: Duration,

    /// Longest pause a producer takes between writes
    #[clap(long, value_parser = parse_duration, default_value = "100ms", help_heading = "Timing")]
    pub producer_backoff_max: Duration,

    /// Shortest sleep of the daemon and consumers when a queue is empty or full
    #[clap(long, value_parser = parse_duration, default_value = "1ms", help_heading = "Timing")]
    pub poll_backoff_min: Duration,

    /// Longest sleep of the daemon and consumers when a queue is empty or full
    #[clap(long, value_parser = parse_duration, default_value = "10ms", help_heading = "Timing")]
    pub poll_backoff_max: Duration,

    /// How long the daemon keeps retrying an in-flight message after shutdown
    #[clap(long, value_parser = parse_duration, default_value = "1s", help_heading = "Timing")]
    pub drain_timeout: Duration,

    /// Cap on messages held in queue storage across the whole bus (unbounded if unset)
    #[clap(long, help_heading = "Core Options")]
    pub storage_limit: Option<usize>,

    /// Output file for results (JSON format)
    #[clap(short = 'o', long, default_value = crate::defaults::OUTPUT_FILE, help_heading = "Output")]
    pub output_file: PathBuf,

    /// Percentiles to calculate for queueing latency
    #[clap(long, default_values_t = crate::defaults::PERCENTILES.to_vec(), help_heading = "Output")]
    pub percentiles: Vec<f64>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[clap(short = 'v', long, action = ArgAction::Count, help_heading = "Logging")]
    pub verbose: u8,

    /// Only log warnings and errors, without colors
    #[clap(long, default_value_t = false, help_heading = "Logging")]
    pub quiet: bool,

    /// Also write logs to this file
    #[clap(long, help_heading = "Logging")]
    pub log_file: Option<PathBuf>,
}

/// Parse duration from string (e.g., "10s", "500ms", "250us", "5m", "1h")
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix("us") {
        (stripped, "us")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;

    if !num.is_finite() || num < 0.0 {
        return Err(format!("Duration must be a non-negative number: {}", s));
    }

    let nanos_per_unit = match unit {
        "us" => 1e3,
        "ms" => 1e6,
        "s" => 1e9,
        "m" => 60.0 * 1e9,
        "h" => 3600.0 * 1e9,
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Ok(Duration::from_nanos((num * nanos_per_unit).round() as u64))
}
