//! # SQueue Bus - Main Entry Point
//!
//! Runs the reference bus workload: producers write randomly addressed
//! messages to `bus_in_q`, the routing daemon moves each one to the
//! `bus_out_qN` its destination names, and consumers drain the outbound
//! queues while recording how long every message waited.
//!
//! The main function:
//! 1. **Parses arguments** and builds a validated [`BusConfig`]
//! 2. **Initializes logging** (colorized console, optional log file)
//! 3. **Runs the bus** until the configured duration elapses or Ctrl-C
//! 4. **Reports** a console summary and writes the JSON results file
//!
//! Configuration and startup errors abort with a non-zero exit status;
//! everything that goes wrong inside a running bus is recovered where it
//! happens and shows up in the report instead.

use anyhow::Result;
use clap::Parser;
use squeue_bus::{
    cli::Args,
    logging,
    results::ResultsManager,
    runner::{BusConfig, BusRunner},
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Held until exit so buffered file logs are flushed
    let _log_guard = logging::init_logging(args.verbose, args.quiet, args.log_file.as_deref())?;

    info!("Starting SQueue Bus v{}", squeue_bus::VERSION);

    let config = match BusConfig::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {:#}", e);
            return Err(e);
        }
    };
    info!("Configuration: {:?}", config);

    let results = BusRunner::new(config).with_ctrl_c(true).run().await?;

    ResultsManager::print_summary(&results);
    ResultsManager::new(&args.output_file).write(&results)?;

    info!("SQueue Bus exited cleanly");
    Ok(())
}
