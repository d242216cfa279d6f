//! # Bounded Queue Pipeline
//!
//! Alternate topology that separates payload generation from sending.
//!
//! One producer task pre-generates `target` rides into a bounded channel and
//! waits whenever the channel is full. A fixed pool of consumer tasks takes
//! rides one at a time and delivers them through the shared context, exactly
//! like phase workers do.
//!
//! ## Termination
//!
//! Before taking a ride, a consumer claims a ticket from a shared counter.
//! Once `target` tickets have been handed out every consumer stops, so the
//! number of rides consumed equals the number produced. If the producer is
//! cancelled early the channel closes and consumers stop on the empty,
//! closed channel.
//!
//! ## Backpressure
//!
//! The producer blocks on a full channel and consumers block on an empty one,
//! so memory stays bounded by `capacity` rides whatever the speed mismatch.
//! Each consumer measures the backlog when it takes a ride, as rides
//! produced minus rides taken, and the deepest one is the high-water mark.
//! The producer count is loaded first, so the measurement never overstates
//! the real queue depth.

use crate::barrier::{CompletionBarrier, CompletionGuard};
use crate::context::SharedContext;
use crate::error::HarnessError;
use crate::payload::{LiftRide, PayloadFactory};
use crate::utils::format_duration;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Shape of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Rides to produce and consume
    pub target: usize,
    /// Channel capacity
    pub capacity: usize,
    pub consumers: usize,
}

impl PipelineSpec {
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.capacity == 0 {
            return Err(HarnessError::Config(
                "pipeline queue capacity must be at least 1".to_string(),
            ));
        }
        if self.consumers == 0 && self.target > 0 {
            return Err(HarnessError::Config(format!(
                "pipeline has {} rides to send but zero consumers",
                self.target
            )));
        }
        Ok(())
    }
}

/// What the pipeline did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub produced: usize,
    pub consumed: usize,
    pub capacity: usize,
    pub consumers: usize,
    pub high_water_mark: usize,
    pub elapsed_ms: u64,
    pub worker_faults: usize,
}

type SharedReceiver = Arc<Mutex<mpsc::Receiver<LiftRide>>>;

/// Progress counters shared by the producer and the consumers.
#[derive(Default)]
struct PipelineProgress {
    produced: AtomicUsize,
    /// Tickets handed out; may run past `target` by one per consumer
    claimed: AtomicUsize,
    /// Rides taken off the queue
    taken: AtomicUsize,
    consumed: AtomicUsize,
    high_water: AtomicUsize,
}

impl PipelineProgress {
    /// Count one ride taken off the queue and record the backlog behind it.
    ///
    /// Called with the receiver locked, so `taken` never lags a receive.
    fn take(&self) {
        let produced = self.produced.load(Ordering::Acquire);
        let taken = self.taken.fetch_add(1, Ordering::AcqRel) + 1;
        // Rides still queued, plus the one just taken.
        let backlog = (produced + 1).saturating_sub(taken);
        self.high_water.fetch_max(backlog, Ordering::AcqRel);
    }
}

/// Producer/consumer runner over a bounded queue.
pub struct BoundedQueuePipeline {
    context: SharedContext,
}

impl BoundedQueuePipeline {
    pub fn new(context: SharedContext) -> Self {
        Self { context }
    }

    pub async fn run(
        &self,
        spec: &PipelineSpec,
    ) -> Result<(Duration, PipelineReport), HarnessError> {
        spec.validate()?;

        info!(
            "Pipeline starting: {} rides, queue capacity {}, {} consumers",
            spec.target, spec.capacity, spec.consumers
        );

        let (tx, rx) = mpsc::channel::<LiftRide>(spec.capacity);
        let rx: SharedReceiver = Arc::new(Mutex::new(rx));
        let progress = Arc::new(PipelineProgress::default());

        let start = Instant::now();
        let producer = tokio::spawn(produce(
            tx,
            PayloadFactory::for_worker(self.context.seed, 0, 0, &self.context.season_id),
            spec.target,
            Arc::clone(&progress),
            self.context.clone(),
        ));

        let barrier = CompletionBarrier::new();
        for consumer_index in 0..spec.consumers {
            let guard = barrier.register();
            tokio::spawn(consume(
                consumer_index,
                self.context.clone(),
                Arc::clone(&rx),
                spec.target,
                Arc::clone(&progress),
                guard,
            ));
        }

        let barrier_report = barrier.wait().await;
        // Closing the receiver side unblocks a producer stuck on a full queue.
        drop(rx);
        if let Err(e) = producer.await {
            warn!("Pipeline producer exited abnormally: {}", e);
        }
        let elapsed = start.elapsed();

        if barrier_report.faults > 0 {
            warn!(
                "Pipeline: {} of {} consumers exited abnormally",
                barrier_report.faults, barrier_report.participants
            );
            self.context.add_worker_faults(barrier_report.faults as u64);
        }

        let report = PipelineReport {
            produced: progress.produced.load(Ordering::Acquire),
            consumed: progress.consumed.load(Ordering::Acquire),
            capacity: spec.capacity,
            consumers: spec.consumers,
            high_water_mark: progress.high_water.load(Ordering::Acquire),
            elapsed_ms: elapsed.as_millis() as u64,
            worker_faults: barrier_report.faults,
        };
        info!(
            "Pipeline completed: produced {}, consumed {} in {} (queue high-water mark {})",
            report.produced,
            report.consumed,
            format_duration(elapsed),
            report.high_water_mark
        );
        Ok((elapsed, report))
    }
}

async fn produce(
    tx: mpsc::Sender<LiftRide>,
    mut factory: PayloadFactory,
    target: usize,
    progress: Arc<PipelineProgress>,
    context: SharedContext,
) {
    for _ in 0..target {
        let ride = factory.next_ride();
        tokio::select! {
            sent = tx.send(ride) => {
                if sent.is_err() {
                    debug!("Pipeline queue closed, producer stopping");
                    return;
                }
            }
            _ = context.cancel.cancelled() => {
                debug!("Run cancelled, producer stopping");
                return;
            }
        }
        progress.produced.fetch_add(1, Ordering::AcqRel);
    }
}

async fn consume(
    consumer_index: usize,
    context: SharedContext,
    rx: SharedReceiver,
    target: usize,
    progress: Arc<PipelineProgress>,
    guard: CompletionGuard,
) {
    loop {
        if context.cancel.is_cancelled() {
            break;
        }
        if progress.claimed.fetch_add(1, Ordering::AcqRel) >= target {
            break;
        }
        let ride = {
            let mut rx = rx.lock().await;
            let ride = rx.recv().await;
            if ride.is_some() {
                progress.take();
            }
            ride
        };
        let Some(ride) = ride else {
            debug!("Consumer {} found the queue closed", consumer_index);
            break;
        };
        context.deliver(&ride).await;
        progress.consumed.fetch_add(1, Ordering::AcqRel);
    }
    guard.finish();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::sender::{MockSender, RetryingSender};

    fn context(delay: Duration) -> (SharedContext, Arc<MockSender>) {
        let mock = Arc::new(MockSender::new(delay));
        let context = SharedContext::new(RetryingSender::new(mock.clone(), 5), CancelToken::new())
            .with_seed(Some(5));
        (context, mock)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_consumed_equals_produced() {
        let (context, mock) = context(Duration::ZERO);
        let pipeline = BoundedQueuePipeline::new(context.clone());
        let spec = PipelineSpec {
            target: 2_000,
            capacity: 64,
            consumers: 12,
        };

        let (_, report) = pipeline.run(&spec).await.unwrap();

        assert_eq!(report.produced, 2_000);
        assert_eq!(report.consumed, 2_000);
        assert_eq!(mock.calls(), 2_000);
        assert_eq!(context.counters.snapshot().success, 2_000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_slow_consumer_never_overfills_queue() {
        let (context, _) = context(Duration::from_millis(2));
        let pipeline = BoundedQueuePipeline::new(context);
        let spec = PipelineSpec {
            target: 200,
            capacity: 8,
            consumers: 2,
        };

        let (_, report) = pipeline.run(&spec).await.unwrap();

        assert_eq!(report.consumed, 200);
        // The producer ran ahead of the consumers until the queue filled up,
        // then stalled instead of growing the backlog.
        assert!(report.high_water_mark <= spec.capacity);
        assert!(report.high_water_mark >= spec.capacity / 2);
    }

    #[test]
    fn test_backlog_tracks_rides_ahead_of_consumers() {
        let progress = PipelineProgress::default();
        progress.produced.store(10, Ordering::Release);
        progress.take();
        assert_eq!(progress.high_water.load(Ordering::Acquire), 10);

        for _ in 0..9 {
            progress.take();
        }
        assert_eq!(progress.taken.load(Ordering::Acquire), 10);
        assert_eq!(progress.high_water.load(Ordering::Acquire), 10);

        // A ride taken before the producer counted it is not a backlog.
        progress.take();
        assert_eq!(progress.high_water.load(Ordering::Acquire), 10);
    }

    #[tokio::test]
    async fn test_zero_capacity_rejected() {
        let (context, _) = context(Duration::ZERO);
        let pipeline = BoundedQueuePipeline::new(context);
        let spec = PipelineSpec {
            target: 10,
            capacity: 0,
            consumers: 1,
        };
        assert!(matches!(
            pipeline.run(&spec).await,
            Err(HarnessError::Config(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancellation_stops_pipeline() {
        let (context, _) = context(Duration::from_millis(5));
        let pipeline = BoundedQueuePipeline::new(context.clone());
        let spec = PipelineSpec {
            target: 100_000,
            capacity: 16,
            consumers: 4,
        };

        let cancel = context.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let (_, report) = tokio::time::timeout(Duration::from_secs(10), pipeline.run(&spec))
            .await
            .expect("cancelled pipeline must stop")
            .unwrap();
        assert!(report.consumed < 100_000);
    }
}
