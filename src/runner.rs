use crate::calibration::{calibrate, CalibrationReport, CalibrationSpec};
use crate::cancel::CancelToken;
use crate::cli::{Args, Topology};
use crate::context::SharedContext;
use crate::counters::CounterSnapshot;
use crate::error::HarnessError;
use crate::latency_log::LatencyRecord;
use crate::phase::{PhaseReport, PhaseRunner, PhaseSpec};
use crate::pipeline::{BoundedQueuePipeline, PipelineReport, PipelineSpec};
use crate::sender::{RequestSender, RetryingSender};
use crate::statistics::{LatencyReport, StatisticsEngine};
use crate::transport::{validate_base_url, TransportConfig};
use crate::utils::{requests_per_second, validate_max_connections, validate_worker_count};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Everything a run needs, resolved from the command line.
#[derive(Debug, Clone)]
pub struct LoadTestConfig {
    /// Phases in run order; also the prediction targets in calibration mode
    pub phases: Vec<PhaseSpec>,
    pub topology: Topology,
    pub pipeline: PipelineSpec,
    pub calibration: CalibrationSpec,
    pub transport: TransportConfig,
    /// Attempts per logical request
    pub retry_limit: u32,
    pub seed: Option<u64>,
    pub season_id: String,
}

impl LoadTestConfig {
    pub fn from_args(args: &Args) -> Result<Self> {
        let base_url = validate_base_url(&args.base_url)?;

        Ok(Self {
            phases: args.phase_specs(),
            topology: args.topology,
            pipeline: PipelineSpec {
                target: args.pipeline_total,
                capacity: args.pipeline_capacity,
                consumers: args.pipeline_consumers,
            },
            calibration: CalibrationSpec {
                requests_per_run: args.calibration_requests,
                runs: args.calibration_runs,
            },
            transport: TransportConfig {
                base_url,
                max_connections: args.max_connections,
                request_timeout: args.timeout,
                connect_timeout: args.connect_timeout,
                idle_timeout: crate::defaults::IDLE_TIMEOUT,
            },
            retry_limit: args.retry_limit,
            seed: args.seed,
            season_id: args.season_id.clone(),
        })
    }

    /// Check the whole configuration up front, so that a bad phase late in
    /// the schedule fails the run before any request is sent.
    pub fn validate(&self) -> Result<()> {
        if self.retry_limit == 0 {
            anyhow::bail!("Retry limit must be at least 1 attempt");
        }
        if self.season_id.trim().is_empty() {
            anyhow::bail!("Season id cannot be empty");
        }
        validate_max_connections(self.transport.max_connections)?;

        match self.topology {
            Topology::Phased => {
                if self.phases.is_empty() {
                    return Err(HarnessError::Config("no phases configured".to_string()).into());
                }
                self.validate_phases()?;
            }
            Topology::Pipeline => {
                self.pipeline.validate()?;
                if self.pipeline.consumers > 0 {
                    validate_worker_count(self.pipeline.consumers)?;
                }
            }
            Topology::Calibrate => {
                self.calibration.validate()?;
                self.validate_phases()?;
            }
        }
        Ok(())
    }

    fn validate_phases(&self) -> Result<()> {
        for phase in &self.phases {
            phase.validate()?;
            if phase.worker_count > 0 {
                validate_worker_count(phase.worker_count)?;
            }
        }
        Ok(())
    }

    /// Logical requests the run issues if nothing is cancelled.
    pub fn expected_total(&self) -> u64 {
        match self.topology {
            Topology::Phased => self
                .phases
                .iter()
                .map(PhaseSpec::total_requests)
                .fold(0u64, u64::saturating_add),
            Topology::Pipeline => self.pipeline.target as u64,
            Topology::Calibrate => (self.calibration.requests_per_run as u64)
                .saturating_mul(self.calibration.runs as u64),
        }
    }
}

impl fmt::Display for LoadTestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Load test configuration:")?;
        writeln!(f, "  Target: {}", self.transport.base_url)?;
        writeln!(f, "  Topology: {}", self.topology)?;
        match self.topology {
            Topology::Phased | Topology::Calibrate => {
                for phase in &self.phases {
                    writeln!(
                        f,
                        "  {}: {} workers x {} requests",
                        phase.name, phase.worker_count, phase.requests_per_worker
                    )?;
                }
            }
            Topology::Pipeline => {
                writeln!(
                    f,
                    "  Pipeline: {} rides, queue {}, {} consumers",
                    self.pipeline.target, self.pipeline.capacity, self.pipeline.consumers
                )?;
            }
        }
        if self.topology == Topology::Calibrate {
            writeln!(
                f,
                "  Calibration: {} runs x {} requests",
                self.calibration.runs, self.calibration.requests_per_run
            )?;
        }
        writeln!(f, "  Max connections: {}", self.transport.max_connections)?;
        writeln!(f, "  Request timeout: {:?}", self.transport.request_timeout)?;
        write!(f, "  Retry limit: {}", self.retry_limit)
    }
}

/// Summary of a finished (or cancelled) run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub topology: Topology,
    pub transport: String,
    pub phases: Vec<PhaseReport>,
    pub pipeline: Option<PipelineReport>,
    pub calibration: Option<CalibrationReport>,
    pub counters: CounterSnapshot,
    pub expected_total: u64,
    pub wall_time_ms: u64,
    /// Attempted (success plus failure) requests per second of wall time
    pub attempted_throughput_per_sec: f64,
    /// `None` when no request succeeded
    pub latency: Option<LatencyReport>,
    pub cancelled: bool,
    pub worker_faults: u64,
}

/// A run's report plus its latency records, sorted ascending by latency.
#[derive(Debug)]
pub struct RunResults {
    pub report: RunReport,
    pub records: Vec<LatencyRecord>,
}

pub struct LoadTestRunner {
    config: LoadTestConfig,
    sender: Arc<dyn RequestSender>,
    cancel: CancelToken,
}

impl LoadTestRunner {
    pub fn new(config: LoadTestConfig, sender: Arc<dyn RequestSender>) -> Self {
        Self {
            config,
            sender,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the configured topology to completion and summarize it.
    ///
    /// A report is produced even when every request failed; only an invalid
    /// configuration is an error.
    pub async fn run(&self) -> Result<RunResults> {
        self.config.validate()?;
        info!("{}", self.config);

        let context = SharedContext::new(
            RetryingSender::new(Arc::clone(&self.sender), self.config.retry_limit),
            self.cancel.clone(),
        )
        .with_seed(self.config.seed)
        .with_season(&self.config.season_id);

        let mut phases = Vec::new();
        let mut pipeline = None;
        let mut calibration = None;
        let mut records = Vec::new();

        let start = Instant::now();
        match self.config.topology {
            Topology::Phased => {
                let runner = PhaseRunner::new(context.clone());
                for (index, spec) in self.config.phases.iter().enumerate() {
                    if self.cancel.is_cancelled() {
                        warn!("Run cancelled, skipping {} and later phases", spec.name);
                        break;
                    }
                    let (_, report) = runner.run_with_report(index, spec).await?;
                    phases.push(report);
                }
            }
            Topology::Pipeline => {
                let (_, report) = BoundedQueuePipeline::new(context.clone())
                    .run(&self.config.pipeline)
                    .await?;
                pipeline = Some(report);
            }
            Topology::Calibrate => {
                let (report, calibration_records) =
                    calibrate(&context, &self.config.calibration, &self.config.phases).await?;
                records = calibration_records;
                calibration = Some(report);
            }
        }
        // Throughput divides by wall time; a sub-millisecond run counts as 1 ms.
        let wall_time_ms = (start.elapsed().as_millis() as u64).max(1);

        let counters = match &calibration {
            Some(report) => CounterSnapshot {
                success: report.total_success(),
                failure: report.total_failure(),
            },
            None => context.counters.snapshot(),
        };
        records.extend(context.latency_log.drain());

        let latency = match StatisticsEngine::compute(&mut records, wall_time_ms) {
            Ok(report) => Some(report),
            Err(HarnessError::NoData) => {
                warn!("No successful requests, latency statistics unavailable");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let cancelled = self.cancel.is_cancelled();
        let worker_faults = context.worker_faults();
        let expected_total = self.config.expected_total();
        if !cancelled && worker_faults == 0 && counters.total() != expected_total {
            warn!(
                "Counted {} outcomes but expected {}",
                counters.total(),
                expected_total
            );
        }

        let report = RunReport {
            topology: self.config.topology,
            transport: self.sender.name().to_string(),
            phases,
            pipeline,
            calibration,
            counters,
            expected_total,
            wall_time_ms,
            attempted_throughput_per_sec: requests_per_second(counters.total(), wall_time_ms),
            latency,
            cancelled,
            worker_faults,
        };
        Ok(RunResults { report, records })
    }
}
