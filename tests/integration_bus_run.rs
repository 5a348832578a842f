use anyhow::Result;
use clap::Parser;
use squeue_bus::{Args, BusConfig, BusRunner, ResultsManager};
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn fast_args(extra: &[&str]) -> Args {
    let mut argv = vec![
        "squeue-bus",
        "--duration",
        "300ms",
        "--producer-backoff-min",
        "200us",
        "--producer-backoff-max",
        "1ms",
        "--poll-backoff-min",
        "100us",
        "--poll-backoff-max",
        "500us",
        "--drain-timeout",
        "100ms",
    ];
    argv.extend_from_slice(extra);
    Args::parse_from(argv)
}

/// Full run of the reference layout: every message sent is accounted for and
/// the report survives a round trip through the results file.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reference_run_writes_balanced_report() -> Result<()> {
    let dir = TempDir::new()?;
    let output = dir.path().join("results.json");
    let args = fast_args(&["--output-file", output.to_str().unwrap_or_default()]);

    let config = BusConfig::from_args(&args)?;
    let results = BusRunner::new(config).run().await?;

    let summary = &results.summary;
    assert!(summary.total_sent > 0);
    assert!(summary.total_received > 0);
    assert!(summary.conserved, "{:?}", summary);
    assert_eq!(summary.total_misrouted, 0);
    assert_eq!(results.routing.dropped_unresolved, 0);
    assert_eq!(
        results.queueing_latency.total_samples,
        summary.total_received
    );

    let names: Vec<&str> = results.endpoints.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["bus_in_q", "bus_out_q1", "bus_out_q2", "bus_out_q3"]);
    for endpoint in &results.endpoints {
        assert_eq!(endpoint.size_mismatches, 0);
        assert!(endpoint.writes >= endpoint.reads);
    }

    let manager = ResultsManager::new(&args.output_file);
    manager.write(&results)?;
    let loaded = ResultsManager::load(&output)?;
    assert_eq!(loaded.run_id, results.run_id);
    assert_eq!(loaded.summary, results.summary);
    assert_eq!(loaded.config.capacity, 10);
    Ok(())
}

/// More consumers than outbound queues share queues round-robin, and a small
/// capacity forces producers to see rejected writes.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn crowded_run_with_tiny_queues() -> Result<()> {
    let args = fast_args(&["-s", "6", "-r", "4", "-q", "2", "-c", "2"]);
    let results = BusRunner::new(BusConfig::from_args(&args)?).run().await?;

    let endpoints: Vec<&str> = results.consumers.iter().map(|c| c.endpoint.as_str()).collect();
    assert_eq!(endpoints, ["bus_out_q1", "bus_out_q2", "bus_out_q1", "bus_out_q2"]);
    assert!(results.summary.conserved, "{:?}", results.summary);
    assert!(results.endpoints.iter().all(|e| e.capacity == 2));
    Ok(())
}

/// Triggering the runner's shutdown signal ends the run long before the
/// configured duration.
#[tokio::test]
async fn external_shutdown_ends_run_early() -> Result<()> {
    let config = BusConfig {
        duration: Duration::from_secs(10),
        ..BusConfig::default()
    };
    let runner = BusRunner::new(config);
    let stop = runner.shutdown_signal();

    let started = Instant::now();
    let run = tokio::spawn(runner.run());
    tokio::time::sleep(Duration::from_millis(100)).await;
    stop.trigger();

    let results = run.await??;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(results.summary.conserved, "{:?}", results.summary);
    Ok(())
}
