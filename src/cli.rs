use crate::phase::PhaseSpec;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Skier Load - phased, closed-loop load generator for the lift-ride endpoint
#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Base URL of the skiers resource; rides are posted under it
    #[clap(
        short = 'u',
        long,
        default_value = crate::defaults::BASE_URL,
        help_heading = "Core Options"
    )]
    pub base_url: String,

    /// Phase shape as WORKERSxREQUESTS; repeat for more phases, run in order
    #[clap(
        short = 'p',
        long = "phase",
        default_values_t = default_phases(),
        help_heading = "Core Options"
    )]
    pub phases: Vec<PhaseShape>,

    /// How work is distributed across workers
    #[clap(
        short = 't',
        long,
        value_enum,
        default_value_t = Topology::Phased,
        help_heading = "Core Options"
    )]
    pub topology: Topology,

    /// Rides produced in pipeline mode
    #[clap(long, default_value_t = crate::defaults::PIPELINE_TOTAL, help_heading = "Pipeline")]
    pub pipeline_total: usize,

    /// Bounded queue capacity in pipeline mode
    #[clap(long, default_value_t = crate::defaults::PIPELINE_CAPACITY, help_heading = "Pipeline")]
    pub pipeline_capacity: usize,

    /// Consumer tasks in pipeline mode
    #[clap(long, default_value_t = crate::defaults::PIPELINE_CONSUMERS, help_heading = "Pipeline")]
    pub pipeline_consumers: usize,

    /// Requests per calibration run
    #[clap(
        long,
        default_value_t = crate::defaults::CALIBRATION_REQUESTS,
        help_heading = "Calibration"
    )]
    pub calibration_requests: usize,

    /// Number of calibration runs to average
    #[clap(long, default_value_t = crate::defaults::CALIBRATION_RUNS, help_heading = "Calibration")]
    pub calibration_runs: usize,

    /// Maximum concurrent connections to the endpoint
    #[clap(
        short = 'c',
        long,
        default_value_t = crate::defaults::MAX_CONNECTIONS,
        help_heading = "Transport"
    )]
    pub max_connections: usize,

    /// Per-attempt request timeout (e.g. 500ms, 10s)
    #[clap(long, value_parser = parse_duration, default_value = "10s", help_heading = "Transport")]
    pub timeout: Duration,

    /// TCP connect timeout
    #[clap(long, value_parser = parse_duration, default_value = "3s", help_heading = "Transport")]
    pub connect_timeout: Duration,

    /// Attempts per logical request before it counts as a failure
    #[clap(long, default_value_t = crate::defaults::RETRY_LIMIT, help_heading = "Transport")]
    pub retry_limit: u32,

    /// CSV file receiving one row per successful request
    #[clap(short = 'o', long, default_value = crate::defaults::OUTPUT_CSV, help_heading = "Output")]
    pub output_csv: PathBuf,

    /// Optional JSON results document
    #[clap(long, help_heading = "Output")]
    pub output_json: Option<PathBuf>,

    /// Seed for payload generation; unseeded runs draw from OS entropy
    #[clap(long)]
    pub seed: Option<u64>,

    /// Season identifier placed in every request path
    #[clap(long, default_value = crate::defaults::SEASON_ID)]
    pub season_id: String,

    /// Send to an in-process mock instead of the network
    #[clap(long, default_value_t = false)]
    pub dry_run: bool,

    /// Simulated response time of the dry-run mock
    #[clap(long, value_parser = parse_duration, default_value = "0ms")]
    pub mock_latency: Duration,

    /// Increase console verbosity (-v debug, -vv trace)
    #[clap(short = 'v', long, action = clap::ArgAction::Count, help_heading = "Logging")]
    pub verbose: u8,

    /// Only log warnings and errors to the console
    #[clap(
        short = 'q',
        long,
        default_value_t = false,
        conflicts_with = "verbose",
        help_heading = "Logging"
    )]
    pub quiet: bool,

    /// Also write a plain-text log to this file
    #[clap(long, help_heading = "Logging")]
    pub log_file: Option<PathBuf>,
}

impl Args {
    /// Phase specs in run order, named `phase1`, `phase2`, ...
    pub fn phase_specs(&self) -> Vec<PhaseSpec> {
        self.phases
            .iter()
            .enumerate()
            .map(|(i, shape)| {
                PhaseSpec::new(format!("phase{}", i + 1), shape.workers, shape.requests)
            })
            .collect()
    }
}

fn default_phases() -> Vec<PhaseShape> {
    crate::defaults::PHASES
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect()
}

/// Work distribution strategy for a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// Fixed phases of workers, each behind a completion barrier
    Phased,
    /// One producer feeding a consumer pool through a bounded queue
    Pipeline,
    /// Single-worker baseline runs that predict phase throughput
    Calibrate,
}

impl std::fmt::Display for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topology::Phased => write!(f, "Phased"),
            Topology::Pipeline => write!(f, "Pipeline"),
            Topology::Calibrate => write!(f, "Calibrate"),
        }
    }
}

/// Worker count and per-worker request count of one phase, parsed from `32x1000`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseShape {
    pub workers: usize,
    pub requests: usize,
}

impl FromStr for PhaseShape {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (workers, requests) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("Invalid phase '{}', expected WORKERSxREQUESTS", s))?;

        let workers: usize = workers
            .trim()
            .parse()
            .map_err(|_| format!("Invalid worker count in phase: {}", workers))?;
        let requests: usize = requests
            .trim()
            .parse()
            .map_err(|_| format!("Invalid request count in phase: {}", requests))?;

        Ok(Self { workers, requests })
    }
}

impl std::fmt::Display for PhaseShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.workers, self.requests)
    }
}

/// Parse duration string (e.g., "10s", "250ms", "1m")
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;
    if !num.is_finite() {
        return Err(format!("Duration must be a finite number: {}", s));
    }
    if num < 0.0 {
        return Err(format!("Duration cannot be negative: {}", s));
    }

    let seconds = match unit {
        "ms" => return Ok(Duration::from_millis(num as u64)),
        "m" => num * 60.0,
        _ => num,
    };
    let duration = Duration::try_from_secs_f64(seconds)
        .map_err(|e| format!("Invalid duration {}: {}", s, e))?;

    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_phase_shape() {
        assert_eq!(
            "32x1000".parse::<PhaseShape>().unwrap(),
            PhaseShape { workers: 32, requests: 1000 }
        );
        assert_eq!(
            " 64X2625 ".parse::<PhaseShape>().unwrap(),
            PhaseShape { workers: 64, requests: 2625 }
        );
        assert!("32".parse::<PhaseShape>().is_err());
        assert!("ax10".parse::<PhaseShape>().is_err());
        assert_eq!(PhaseShape { workers: 8, requests: 5 }.to_string(), "8x5");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("7").unwrap(), Duration::from_secs(7));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("-1s").is_err());
    }

    #[test]
    fn test_parse_duration_rejects_non_finite() {
        assert!(parse_duration("NaN").is_err());
        assert!(parse_duration("inf").is_err());
        assert!(parse_duration("infms").is_err());
        assert!(parse_duration("1e30s").is_err());
        assert!(Args::try_parse_from(["skier-load", "--timeout", "inf"]).is_err());
        assert!(Args::try_parse_from(["skier-load", "--mock-latency", "NaN"]).is_err());
    }

    #[test]
    fn test_default_args() {
        let args = Args::parse_from(["skier-load"]);
        assert_eq!(args.base_url, crate::defaults::BASE_URL);
        assert_eq!(args.topology, Topology::Phased);
        assert_eq!(args.retry_limit, 5);
        assert_eq!(args.timeout, Duration::from_secs(10));

        let specs = args.phase_specs();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0], PhaseSpec::new("phase1", 32, 1000));
        assert_eq!(specs[1], PhaseSpec::new("phase2", 64, 2625));
    }

    #[test]
    fn test_repeated_phase_flags_replace_defaults() {
        let args = Args::parse_from([
            "skier-load",
            "--phase",
            "4x10",
            "--phase",
            "8x20",
            "--phase",
            "2x5",
            "--topology",
            "pipeline",
            "-vv",
        ]);
        let specs = args.phase_specs();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[2].name, "phase3");
        assert_eq!(specs[2].total_requests(), 10);
        assert_eq!(args.topology, Topology::Pipeline);
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Args::try_parse_from(["skier-load", "-q", "-v"]).is_err());
    }
}
