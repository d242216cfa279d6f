//! # Skier Load - Main Entry Point
//!
//! 1. **Parse arguments** and install logging (console plus optional file)
//! 2. **Resolve configuration** from the arguments and validate it
//! 3. **Build the sender**: the pooled HTTP client, or the in-process mock
//!    for `--dry-run`
//! 4. **Run** the configured topology; Ctrl-C cancels the run, which still
//!    produces a report for whatever completed
//! 5. **Write results**: console summary, CSV records, optional JSON

use anyhow::{Context, Result};
use clap::Parser;
use skier_load::{
    cancel::CancelToken,
    cli::Args,
    logging::init_logging,
    results::ResultsManager,
    runner::{LoadTestConfig, LoadTestRunner},
    sender::{MockSender, RequestSender},
    transport::HttpSender,
};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(args.verbose, args.quiet, args.log_file.as_deref())?;

    info!("Starting Skier Load v{}", skier_load::VERSION);

    let config = LoadTestConfig::from_args(&args).context("Invalid configuration")?;
    config.validate().context("Invalid configuration")?;

    let sender: Arc<dyn RequestSender> = if args.dry_run {
        warn!("Dry run: requests go to an in-process mock, not {}", config.transport.base_url);
        Arc::new(MockSender::new(args.mock_latency))
    } else {
        Arc::new(HttpSender::new(&config.transport).context("Failed to build the HTTP client")?)
    };

    let cancel = CancelToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping workers");
            ctrl_c.cancel();
        }
    });

    let target = config.transport.base_url.clone();
    let runner = LoadTestRunner::new(config, sender).with_cancel(cancel);
    let results = match runner.run().await {
        Ok(results) => results,
        Err(e) => {
            error!("Load test failed: {:#}", e);
            return Err(e);
        }
    };

    let results_manager =
        ResultsManager::new(&args.output_csv).with_json_output(args.output_json.as_deref());
    results_manager.finalize(&results.report, &results.records, &target)?;

    info!("Load test completed");
    Ok(())
}
