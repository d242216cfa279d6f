//! # Phase Execution
//!
//! A phase is a fixed number of workers, each sending a fixed number of
//! logical requests. [`PhaseRunner::run`] spawns the workers as tasks on the
//! multi-threaded runtime and returns once every one of them has released
//! the phase's [`CompletionBarrier`].
//!
//! ## Worker Loop
//!
//! Each worker owns a [`PayloadFactory`] and repeats, `requests_per_worker`
//! times: generate a ride, deliver it through the shared context (send with
//! retries, then record the outcome). Cancellation is checked before every
//! request. Workers share the context's transport; none of them opens a
//! private connection.
//!
//! ## Sequencing
//!
//! Phases are run back to back behind a hard barrier: the next phase is not
//! started until every worker of the current one has finished.

use crate::barrier::{CompletionBarrier, CompletionGuard};
use crate::context::SharedContext;
use crate::error::HarnessError;
use crate::payload::PayloadFactory;
use crate::utils::format_duration;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Shape of one phase. Immutable once the phase starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSpec {
    pub name: String,
    pub worker_count: usize,
    pub requests_per_worker: usize,
}

impl PhaseSpec {
    pub fn new(name: impl Into<String>, worker_count: usize, requests_per_worker: usize) -> Self {
        Self {
            name: name.into(),
            worker_count,
            requests_per_worker,
        }
    }

    /// Logical requests this phase issues when it runs to completion.
    ///
    /// Saturates instead of overflowing; [`validate`](Self::validate) rejects
    /// phases whose total does not fit.
    pub fn total_requests(&self) -> u64 {
        (self.worker_count as u64).saturating_mul(self.requests_per_worker as u64)
    }

    /// A phase with no workers cannot serve a non-zero request budget, and
    /// the phase total must fit in a `u64`.
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.worker_count == 0 && self.requests_per_worker > 0 {
            return Err(HarnessError::Config(format!(
                "{}: {} requests per worker requested with zero workers",
                self.name, self.requests_per_worker
            )));
        }
        if (self.worker_count as u64)
            .checked_mul(self.requests_per_worker as u64)
            .is_none()
        {
            return Err(HarnessError::Config(format!(
                "{}: {} workers x {} requests overflows the request counter",
                self.name, self.worker_count, self.requests_per_worker
            )));
        }
        Ok(())
    }
}

/// Timing of a finished phase, as reported at the end of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseReport {
    pub name: String,
    pub worker_count: usize,
    pub requests_per_worker: usize,
    pub elapsed_ms: u64,
    pub worker_faults: usize,
}

/// Spawns and awaits the workers of one phase.
pub struct PhaseRunner {
    context: SharedContext,
}

impl PhaseRunner {
    pub fn new(context: SharedContext) -> Self {
        Self { context }
    }

    /// Run one phase to completion and return its elapsed wall time.
    ///
    /// `phase_index` only feeds the per-worker seed derivation.
    ///
    /// ## Errors
    /// - `HarnessError::Config` if `spec` is invalid; no worker is spawned.
    pub async fn run(
        &self,
        phase_index: usize,
        spec: &PhaseSpec,
    ) -> Result<Duration, HarnessError> {
        Ok(self.run_with_report(phase_index, spec).await?.0)
    }

    /// Same as [`run`](Self::run), also returning the phase report.
    pub async fn run_with_report(
        &self,
        phase_index: usize,
        spec: &PhaseSpec,
    ) -> Result<(Duration, PhaseReport), HarnessError> {
        spec.validate()?;

        let mut report = PhaseReport {
            name: spec.name.clone(),
            worker_count: spec.worker_count,
            requests_per_worker: spec.requests_per_worker,
            elapsed_ms: 0,
            worker_faults: 0,
        };
        if spec.worker_count == 0 {
            return Ok((Duration::ZERO, report));
        }

        info!(
            "{} is starting: {} workers x {} requests",
            spec.name, spec.worker_count, spec.requests_per_worker
        );

        let barrier = CompletionBarrier::new();
        let start = Instant::now();
        for worker_index in 0..spec.worker_count {
            let guard = barrier.register();
            let context = self.context.clone();
            let factory = PayloadFactory::for_worker(
                context.seed,
                phase_index,
                worker_index,
                &context.season_id,
            );
            tokio::spawn(run_worker(
                context,
                factory,
                spec.requests_per_worker,
                guard,
            ));
        }

        let barrier_report = barrier.wait().await;
        let elapsed = start.elapsed();

        if barrier_report.faults > 0 {
            warn!(
                "{}: {} of {} workers exited abnormally",
                spec.name, barrier_report.faults, barrier_report.participants
            );
            self.context.add_worker_faults(barrier_report.faults as u64);
        }
        info!(
            "{} completed {} requests in {}",
            spec.name,
            spec.total_requests(),
            format_duration(elapsed)
        );

        report.elapsed_ms = elapsed.as_millis() as u64;
        report.worker_faults = barrier_report.faults;
        Ok((elapsed, report))
    }
}

async fn run_worker(
    context: SharedContext,
    mut factory: PayloadFactory,
    requests: usize,
    guard: CompletionGuard,
) {
    for sent in 0..requests {
        if context.cancel.is_cancelled() {
            debug!("Worker stopping early after {} of {} requests", sent, requests);
            break;
        }
        let ride = factory.next_ride();
        context.deliver(&ride).await;
    }
    guard.finish();
}
