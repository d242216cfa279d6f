//! # Calibration
//!
//! Measures what one worker can do against the endpoint and extrapolates to
//! the configured phases. Each run is a single-worker phase on a fresh set of
//! counters; the per-run throughputs are averaged and multiplied by each
//! phase's worker count to predict that phase's throughput and duration.
//!
//! The prediction assumes the server scales linearly with concurrent
//! clients. It is an upper bound for sizing phases, not a measurement.

use crate::context::SharedContext;
use crate::error::HarnessError;
use crate::latency_log::LatencyRecord;
use crate::phase::{PhaseRunner, PhaseSpec};
use crate::utils::{format_request_rate, requests_per_second};
use serde::{Deserialize, Serialize};
use tracing::info;

/// How many baseline runs to make and how long each one is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationSpec {
    pub requests_per_run: usize,
    pub runs: usize,
}

impl CalibrationSpec {
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.requests_per_run == 0 || self.runs == 0 {
            return Err(HarnessError::Config(format!(
                "calibration needs at least one run of at least one request, got {} x {}",
                self.runs, self.requests_per_run
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationRun {
    pub success: u64,
    pub failure: u64,
    pub elapsed_ms: u64,
    /// Successful requests per second for this run
    pub throughput_per_sec: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhasePrediction {
    pub name: String,
    pub worker_count: usize,
    pub total_requests: u64,
    pub predicted_throughput_per_sec: f64,
    /// `None` when the baseline saw no successful requests
    pub predicted_duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub requests_per_run: usize,
    pub runs: Vec<CalibrationRun>,
    pub single_worker_throughput: f64,
    pub predictions: Vec<PhasePrediction>,
}

impl CalibrationReport {
    pub fn total_success(&self) -> u64 {
        self.runs.iter().map(|r| r.success).sum()
    }

    pub fn total_failure(&self) -> u64 {
        self.runs.iter().map(|r| r.failure).sum()
    }
}

/// Predict throughput and duration of each phase from a single-worker baseline.
pub fn predict(single_worker_throughput: f64, phases: &[PhaseSpec]) -> Vec<PhasePrediction> {
    phases
        .iter()
        .map(|phase| {
            let throughput = single_worker_throughput * phase.worker_count as f64;
            let predicted_duration_ms = (throughput > 0.0)
                .then(|| (1000.0 * phase.total_requests() as f64 / throughput).round() as u64);
            PhasePrediction {
                name: phase.name.clone(),
                worker_count: phase.worker_count,
                total_requests: phase.total_requests(),
                predicted_throughput_per_sec: throughput,
                predicted_duration_ms,
            }
        })
        .collect()
}

/// Run the baseline and predict `phases`.
///
/// `template` supplies the sender, cancellation and seed; every run gets its
/// own fresh counters. Returns the report together with the latency records
/// of all runs.
pub async fn calibrate(
    template: &SharedContext,
    spec: &CalibrationSpec,
    phases: &[PhaseSpec],
) -> Result<(CalibrationReport, Vec<LatencyRecord>), HarnessError> {
    spec.validate()?;

    let mut runs = Vec::with_capacity(spec.runs);
    let mut records = Vec::new();
    for run_index in 0..spec.runs {
        if template.cancel.is_cancelled() {
            break;
        }
        let context = template.fresh();
        let phase = PhaseSpec::new(
            format!("calibration{}", run_index + 1),
            1,
            spec.requests_per_run,
        );
        let (_, phase_report) = PhaseRunner::new(context.clone())
            .run_with_report(run_index, &phase)
            .await?;

        let counters = context.counters.snapshot();
        let elapsed_ms = phase_report.elapsed_ms.max(1);
        let run = CalibrationRun {
            success: counters.success,
            failure: counters.failure,
            elapsed_ms,
            throughput_per_sec: requests_per_second(counters.success, elapsed_ms),
        };
        info!(
            "Calibration run {}: {} in {} ms",
            run_index + 1,
            format_request_rate(run.throughput_per_sec),
            run.elapsed_ms
        );
        template.add_worker_faults(context.worker_faults());
        records.extend(context.latency_log.drain());
        runs.push(run);
    }

    let single_worker_throughput = if runs.is_empty() {
        0.0
    } else {
        runs.iter().map(|r| r.throughput_per_sec).sum::<f64>() / runs.len() as f64
    };
    let predictions = predict(single_worker_throughput, phases);
    for prediction in &predictions {
        info!(
            "{}: {} workers predicted at {}",
            prediction.name,
            prediction.worker_count,
            format_request_rate(prediction.predicted_throughput_per_sec)
        );
    }

    Ok((
        CalibrationReport {
            requests_per_run: spec.requests_per_run,
            runs,
            single_worker_throughput,
            predictions,
        },
        records,
    ))
}
