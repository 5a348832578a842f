//! Helpers shared by the runner, the results report and the command line.
//!
//! Formatting turns raw nanosecond counts and rates into console text, and
//! the `validate_*` functions reject bus configurations before any endpoint
//! is allocated.
//!
//! ```rust
//! use squeue_bus::utils::{format_duration, validate_capacity};
//! use std::time::Duration;
//!
//! assert_eq!(format_duration(Duration::from_micros(1500)), "1.50ms");
//! assert!(validate_capacity(10).is_ok());
//! assert!(validate_capacity(0).is_err());
//! ```

use anyhow::{bail, Result};
use std::time::Duration;
use uuid::Uuid;

/// Largest queue capacity accepted from the command line.
///
/// Every slot holds at most one boxed message, so this bounds the resident
/// memory of a single endpoint.
pub const MAX_CAPACITY: usize = 1 << 20;

/// Largest number of producer or consumer tasks accepted from the command line.
pub const MAX_WORKERS: usize = 1024;

/// Largest number of outbound queues accepted from the command line.
pub const MAX_OUTBOUND_QUEUES: usize = 1024;

/// Random v4 UUID identifying one run in its results file.
pub fn generate_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// [`format_duration`] for the raw nanosecond counts carried on messages.
///
/// ```rust
/// # use squeue_bus::utils::format_duration_ns;
/// assert_eq!(format_duration_ns(500), "500ns");
/// assert_eq!(format_duration_ns(1500), "1.50μs");
/// assert_eq!(format_duration_ns(1500000), "1.50ms");
/// ```
pub fn format_duration_ns(ns: u64) -> String {
    format_duration(Duration::from_nanos(ns))
}

/// Render a duration in the largest unit that keeps it above one, with two
/// decimals below a minute and whole `h`/`m`/`s` components above.
///
/// ```rust
/// # use squeue_bus::utils::format_duration;
/// # use std::time::Duration;
/// assert_eq!(format_duration(Duration::from_nanos(750)), "750ns");
/// assert_eq!(format_duration(Duration::from_micros(2500)), "2.50ms");
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_ns = duration.as_nanos();

    if total_ns < 1_000 {
        format!("{}ns", total_ns)
    } else if total_ns < 1_000_000 {
        format!("{:.2}μs", total_ns as f64 / 1_000.0)
    } else if total_ns < 1_000_000_000 {
        format!("{:.2}ms", total_ns as f64 / 1_000_000.0)
    } else if total_ns < 60_000_000_000 {
        format!("{:.2}s", total_ns as f64 / 1_000_000_000.0)
    } else {
        let seconds = duration.as_secs();
        let minutes = seconds / 60;
        let remaining_seconds = seconds % 60;

        if minutes < 60 {
            format!("{}m {}s", minutes, remaining_seconds)
        } else {
            let hours = minutes / 60;
            let remaining_minutes = minutes % 60;
            format!("{}h {}m {}s", hours, remaining_minutes, remaining_seconds)
        }
    }
}

/// Format a message rate for display
///
/// ```rust
/// # use squeue_bus::utils::format_message_rate;
/// assert_eq!(format_message_rate(750.0), "750 msg/s");
/// assert_eq!(format_message_rate(15500.0), "15.50K msg/s");
/// ```
pub fn format_message_rate(messages_per_second: f64) -> String {
    if messages_per_second < 1000.0 {
        format!("{:.0} msg/s", messages_per_second)
    } else if messages_per_second < 1_000_000.0 {
        format!("{:.2}K msg/s", messages_per_second / 1000.0)
    } else {
        format!("{:.2}M msg/s", messages_per_second / 1_000_000.0)
    }
}

/// Validate the capacity shared by every queue
///
/// A zero-capacity queue could never accept a message, and the registry
/// refuses to build one; rejecting it here gives the user a clearer message
/// before anything is allocated.
pub fn validate_capacity(capacity: usize) -> Result<()> {
    if capacity == 0 {
        bail!("Queue capacity cannot be zero");
    }
    if capacity > MAX_CAPACITY {
        bail!(
            "Queue capacity {} is too large (maximum {})",
            capacity,
            MAX_CAPACITY
        );
    }
    Ok(())
}

/// Validate a producer or consumer count
///
/// `role` names the workers in the error message ("senders", "receivers").
pub fn validate_workers(role: &str, count: usize) -> Result<()> {
    if count == 0 {
        bail!("Number of {} cannot be zero", role);
    }
    if count > MAX_WORKERS {
        bail!(
            "Number of {} {} is too high (maximum {})",
            role,
            count,
            MAX_WORKERS
        );
    }
    Ok(())
}

/// Validate the number of outbound queues
///
/// Destination ids run from 1 to this count, so at least one outbound queue
/// must exist for any message to be routable.
pub fn validate_outbound_queues(count: usize) -> Result<()> {
    if count == 0 {
        bail!("At least one outbound queue is required");
    }
    if count > MAX_OUTBOUND_QUEUES {
        bail!(
            "Number of outbound queues {} is too high (maximum {})",
            count,
            MAX_OUTBOUND_QUEUES
        );
    }
    Ok(())
}

/// Validate a `[min, max]` backoff window
pub fn validate_backoff(name: &str, min: Duration, max: Duration) -> Result<()> {
    if min > max {
        bail!(
            "{} backoff minimum {} exceeds maximum {}",
            name,
            format_duration(min),
            format_duration(max)
        );
    }
    if max.is_zero() {
        bail!("{} backoff maximum cannot be zero", name);
    }
    Ok(())
}

/// Validate a bus-wide storage limit
///
/// A limit of zero would refuse every write on every endpoint.
pub fn validate_storage_limit(limit: usize) -> Result<()> {
    if limit == 0 {
        bail!("Storage limit cannot be zero");
    }
    Ok(())
}

/// Validate the latency percentiles requested for the report
pub fn validate_percentiles(percentiles: &[f64]) -> Result<()> {
    for &p in percentiles {
        if !(0.0..=100.0).contains(&p) {
            bail!("Percentile {} is outside 0..=100", p);
        }
    }
    Ok(())
}

/// Logical CPUs visible to the process, as recorded in the results file.
pub fn get_cpu_cores() -> usize {
    num_cpus::get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration_ns() {
        assert_eq!(format_duration_ns(500), "500ns");
        assert_eq!(format_duration_ns(1500), "1.50μs");
        assert_eq!(format_duration_ns(1_500_000), "1.50ms");
        assert_eq!(format_duration_ns(1_500_000_000), "1.50s");
    }

    #[test]
    fn test_format_duration_compound() {
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }

    #[test]
    fn test_format_message_rate() {
        assert_eq!(format_message_rate(500.0), "500 msg/s");
        assert_eq!(format_message_rate(1500.0), "1.50K msg/s");
        assert_eq!(format_message_rate(1500000.0), "1.50M msg/s");
    }

    #[test]
    fn test_validate_capacity() {
        assert!(validate_capacity(1).is_ok());
        assert!(validate_capacity(10).is_ok());
        assert!(validate_capacity(0).is_err());
        assert!(validate_capacity(MAX_CAPACITY + 1).is_err());
    }

    #[test]
    fn test_validate_workers() {
        assert!(validate_workers("senders", 3).is_ok());
        let err = validate_workers("receivers", 0).unwrap_err();
        assert!(err.to_string().contains("receivers"));
        assert!(validate_workers("senders", MAX_WORKERS + 1).is_err());
    }

    #[test]
    fn test_validate_outbound_queues() {
        assert!(validate_outbound_queues(3).is_ok());
        assert!(validate_outbound_queues(0).is_err());
    }

    #[test]
    fn test_validate_backoff() {
        let ms = Duration::from_millis;
        assert!(validate_backoff("poll", ms(1), ms(10)).is_ok());
        assert!(validate_backoff("poll", ms(5), ms(5)).is_ok());
        assert!(validate_backoff("poll", ms(10), ms(1)).is_err());
        assert!(validate_backoff("poll", Duration::ZERO, Duration::ZERO).is_err());
    }

    #[test]
    fn test_validate_storage_limit() {
        assert!(validate_storage_limit(1).is_ok());
        assert!(validate_storage_limit(0).is_err());
    }

    #[test]
    fn test_validate_percentiles() {
        assert!(validate_percentiles(&[50.0, 99.9]).is_ok());
        assert!(validate_percentiles(&[]).is_ok());
        assert!(validate_percentiles(&[101.0]).is_err());
    }

    #[test]
    fn test_generate_run_id_is_unique() {
        assert_ne!(generate_run_id(), generate_run_id());
    }

    #[test]
    fn test_get_cpu_cores() {
        assert!(get_cpu_cores() > 0);
    }
}
