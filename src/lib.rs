//! # Skier Load
//!
//! A phased, closed-loop HTTP load generator for a lift-ride ingestion
//! endpoint. Workers post synthetic rides, wait for each response, retry
//! failures up to a fixed limit and record the latency of every success.
//! After the run the records are sorted and summarized into mean, median,
//! p99, min, max and throughput.
//!
//! ## Topologies
//!
//! - **Phased** (default): an ordered list of phases, each a fixed number of
//!   workers sending a fixed number of requests. A phase starts only after
//!   every worker of the previous one has finished.
//! - **Pipeline**: one producer fills a bounded queue that a pool of
//!   consumers drains.
//! - **Calibrate**: single-worker baseline runs used to predict the
//!   throughput of the configured phases.
//!
//! ## Usage
//!
//! ```bash
//! # Two phases against a local server
//! skier-load --base-url http://localhost:8080/Server_war/skiers --phase 32x1000 --phase 64x2625
//!
//! # Exercise the harness without a server
//! skier-load --dry-run --mock-latency 2ms --phase 8x100
//!
//! # Bounded-queue pipeline with a JSON results document
//! skier-load --topology pipeline --pipeline-total 50000 --output-json results.json
//! ```
//!
//! The core (`phase`, `pipeline`, `sender`, `statistics`) never touches the
//! network directly; it drives an injected [`sender::RequestSender`], which
//! is [`transport::HttpSender`] in production and [`sender::MockSender`] in
//! dry runs and tests.

/// Completion barrier and drop-released worker guards
pub mod barrier;

/// Single-worker baseline runs and per-phase throughput predictions
pub mod calibration;

pub mod cancel;

/// Command-line interface
///
/// Argument parsing with clap. Phases are given as repeatable
/// `WORKERSxREQUESTS` values; durations accept human-readable forms such as
/// `250ms` or `10s`.
pub mod cli;

pub mod context;
pub mod counters;
pub mod error;
pub mod latency_log;
pub mod logging;
pub mod payload;

/// Phase specification and the worker pool that runs one phase
pub mod phase;

pub mod pipeline;

/// Console summary, CSV record dump and JSON results document
pub mod results;

/// Run driver
///
/// Turns a [`runner::LoadTestConfig`] into phases (or a pipeline or a
/// calibration), runs them on a shared context and assembles the
/// [`runner::RunReport`].
pub mod runner;

pub mod sender;
pub mod statistics;

/// Pooled HTTP client implementing [`sender::RequestSender`]
pub mod transport;

pub mod utils;

pub use cli::{Args, Topology};
pub use error::{HarnessError, SendError};
pub use phase::{PhaseRunner, PhaseSpec};
pub use results::ResultsManager;
pub use runner::{LoadTestConfig, LoadTestRunner, RunReport};
pub use sender::{MockSender, RequestSender, RetryingSender};
pub use statistics::{LatencyReport, StatisticsEngine};

/// The crate version, recorded in the JSON results document
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Endpoint the rides are posted under
    pub const BASE_URL: &str = "http://localhost:8080/Server_war/skiers";

    /// Default phase schedule, in run order
    ///
    /// A short warm-up phase followed by the main load phase; together they
    /// send 200,000 requests.
    pub const PHASES: &[&str] = &["32x1000", "64x2625"];

    /// Connections the shared pool may hold open at once
    pub const MAX_CONNECTIONS: usize = 50;

    /// Per-attempt bound on the full request exchange
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

    /// Idle pooled connections are closed after this long
    pub const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

    /// Attempts per logical request, the first one included
    pub const RETRY_LIMIT: u32 = 5;

    pub const SEASON_ID: &str = "2024";

    pub const PIPELINE_TOTAL: usize = 200_000;
    pub const PIPELINE_CAPACITY: usize = 10_000;
    pub const PIPELINE_CONSUMERS: usize = 64;

    pub const CALIBRATION_REQUESTS: usize = 10_000;
    pub const CALIBRATION_RUNS: usize = 1;

    /// Per-request CSV dump
    pub const OUTPUT_CSV: &str = "output.csv";
}
