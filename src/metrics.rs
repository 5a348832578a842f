use anyhow::Result;
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Queueing-latency statistics for a set of delivered messages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyMetrics {
    pub min_ns: u64,
    pub max_ns: u64,
    pub mean_ns: f64,
    pub median_ns: f64,
    pub std_dev_ns: f64,
    pub percentiles: Vec<PercentileValue>,
    pub total_samples: u64,
}

/// Percentile value pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentileValue {
    pub percentile: f64,
    pub value_ns: u64,
}

/// Message rate and bandwidth over a measured interval
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThroughputMetrics {
    pub messages_per_second: f64,
    pub bytes_per_second: f64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub duration_ns: u64,
}

/// Collects queueing times in an HDR histogram.
///
/// Values are nanoseconds as accumulated on the message by the endpoints it
/// passed through.
pub struct LatencyCollector {
    histogram: Histogram<u64>,
}

impl std::fmt::Debug for LatencyCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatencyCollector")
            .field("samples", &self.histogram.len())
            .finish()
    }
}

impl LatencyCollector {
    pub fn new() -> Result<Self> {
        // 3 significant figures, auto-resizing upper bound
        let histogram = Histogram::<u64>::new(3)?;
        Ok(Self { histogram })
    }

    pub fn record_ns(&mut self, latency_ns: u64) -> Result<()> {
        self.histogram.record(latency_ns)?;
        Ok(())
    }

    pub fn record(&mut self, latency: Duration) -> Result<()> {
        self.record_ns(latency.as_nanos() as u64)
    }

    pub fn len(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    /// Fold another collector's samples into this one.
    pub fn merge(&mut self, other: &LatencyCollector) -> Result<()> {
        self.histogram.add(&other.histogram)?;
        Ok(())
    }

    /// Summarize the recorded samples. An empty collector yields all zeros.
    pub fn get_metrics(&self, percentiles: &[f64]) -> LatencyMetrics {
        if self.histogram.is_empty() {
            return LatencyMetrics {
                percentiles: percentiles
                    .iter()
                    .map(|&p| PercentileValue {
                        percentile: p,
                        value_ns: 0,
                    })
                    .collect(),
                ..LatencyMetrics::default()
            };
        }

        let percentile_values = percentiles
            .iter()
            .map(|&p| PercentileValue {
                percentile: p,
                value_ns: self.histogram.value_at_percentile(p),
            })
            .collect();

        LatencyMetrics {
            min_ns: self.histogram.min(),
            max_ns: self.histogram.max(),
            mean_ns: self.histogram.mean(),
            median_ns: self.histogram.value_at_percentile(50.0) as f64,
            std_dev_ns: self.histogram.stdev(),
            percentiles: percentile_values,
            total_samples: self.histogram.len(),
        }
    }

    pub fn reset(&mut self) {
        self.histogram.reset();
    }
}

/// Throughput calculator for measuring message and data rates
#[derive(Debug, Clone)]
pub struct ThroughputCalculator {
    start_time: Instant,
    message_count: u64,
    byte_count: u64,
}

impl Default for ThroughputCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl ThroughputCalculator {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            message_count: 0,
            byte_count: 0,
        }
    }

    pub fn record_message(&mut self, message_size: usize) {
        self.message_count += 1;
        self.byte_count += message_size as u64;
    }

    /// Rates since construction or the last reset.
    pub fn get_metrics(&self) -> ThroughputMetrics {
        self.get_metrics_over(self.start_time.elapsed())
    }

    /// Rates over an externally measured interval.
    pub fn get_metrics_over(&self, elapsed: Duration) -> ThroughputMetrics {
        let duration_secs = elapsed.as_secs_f64();
        let rate = |count: u64| {
            if duration_secs > 0.0 {
                count as f64 / duration_secs
            } else {
                0.0
            }
        };

        ThroughputMetrics {
            messages_per_second: rate(self.message_count),
            bytes_per_second: rate(self.byte_count),
            total_messages: self.message_count,
            total_bytes: self.byte_count,
            duration_ns: elapsed.as_nanos() as u64,
        }
    }

    pub fn reset(&mut self) {
        self.start_time = Instant::now();
        self.message_count = 0;
        self.byte_count = 0;
    }
}

/// Combine per-consumer throughput into a bus-wide figure.
///
/// Consumers run concurrently, so totals are summed and rates are taken over
/// the longest individual interval.
pub fn aggregate_throughput(metrics: &[ThroughputMetrics]) -> ThroughputMetrics {
    let total_messages: u64 = metrics.iter().map(|m| m.total_messages).sum();
    let total_bytes: u64 = metrics.iter().map(|m| m.total_bytes).sum();
    let max_duration_ns = metrics.iter().map(|m| m.duration_ns).max().unwrap_or(0);

    let duration_secs = max_duration_ns as f64 / 1_000_000_000.0;
    let (messages_per_second, bytes_per_second) = if duration_secs > 0.0 {
        (
            total_messages as f64 / duration_secs,
            total_bytes as f64 / duration_secs,
        )
    } else {
        (0.0, 0.0)
    };

    ThroughputMetrics {
        messages_per_second,
        bytes_per_second,
        total_messages,
        total_bytes,
        duration_ns: max_duration_ns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_collector() {
        let mut collector = LatencyCollector::new().unwrap();

        collector.record(Duration::from_millis(1)).unwrap();
        collector.record(Duration::from_millis(2)).unwrap();
        collector.record(Duration::from_millis(3)).unwrap();

        let metrics = collector.get_metrics(&[50.0, 99.0]);
        assert_eq!(metrics.total_samples, 3);
        assert_eq!(metrics.percentiles.len(), 2);
        assert!(metrics.min_ns <= 1_000_000 && metrics.max_ns >= 2_990_000);
        assert!(metrics.mean_ns > 0.0);
    }

    #[test]
    fn test_zero_queueing_time_is_recordable() {
        let mut collector = LatencyCollector::new().unwrap();
        collector.record_ns(0).unwrap();
        assert_eq!(collector.get_metrics(&[50.0]).max_ns, 0);
    }

    #[test]
    fn test_empty_collector_reports_zeros() {
        let collector = LatencyCollector::new().unwrap();
        let metrics = collector.get_metrics(&[50.0, 95.0]);
        assert_eq!(metrics.total_samples, 0);
        assert_eq!(metrics.min_ns, 0);
        assert!(metrics.percentiles.iter().all(|p| p.value_ns == 0));
    }

    #[test]
    fn test_merge_combines_samples() {
        let mut a = LatencyCollector::new().unwrap();
        let mut b = LatencyCollector::new().unwrap();
        a.record_ns(100).unwrap();
        b.record_ns(5_000).unwrap();
        b.record_ns(7_000).unwrap();

        a.merge(&b).unwrap();
        let metrics = a.get_metrics(&[]);
        assert_eq!(metrics.total_samples, 3);
        assert_eq!(metrics.min_ns, 100);
        assert!(metrics.max_ns >= 7_000);
    }

    #[test]
    fn test_throughput_calculator() {
        let mut calculator = ThroughputCalculator::new();
        calculator.record_message(108);
        calculator.record_message(108);

        let metrics = calculator.get_metrics_over(Duration::from_secs(2));
        assert_eq!(metrics.total_messages, 2);
        assert_eq!(metrics.total_bytes, 216);
        assert_eq!(metrics.messages_per_second, 1.0);
        assert_eq!(metrics.bytes_per_second, 108.0);
    }

    #[test]
    fn test_aggregate_throughput_uses_longest_interval() {
        let mut fast = ThroughputCalculator::new();
        let mut slow = ThroughputCalculator::new();
        for _ in 0..4 {
            fast.record_message(100);
        }
        for _ in 0..6 {
            slow.record_message(100);
        }

        let combined = aggregate_throughput(&[
            fast.get_metrics_over(Duration::from_secs(1)),
            slow.get_metrics_over(Duration::from_secs(2)),
        ]);
        assert_eq!(combined.total_messages, 10);
        assert_eq!(combined.messages_per_second, 5.0);
        assert_eq!(aggregate_throughput(&[]).messages_per_second, 0.0);
    }
}
