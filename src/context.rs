use crate::cancel::CancelToken;
use crate::counters::Counters;
use crate::latency_log::{LatencyLog, LatencyRecord, RequestKind};
use crate::payload::LiftRide;
use crate::sender::{Outcome, RetryingSender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Everything workers share during one run.
///
/// Built once per run and cloned (cheaply, all fields are `Arc`s) into every
/// worker of every phase. There is no ambient global state.
#[derive(Clone)]
pub struct SharedContext {
    pub counters: Arc<Counters>,
    pub latency_log: Arc<LatencyLog>,
    pub sender: RetryingSender,
    pub cancel: CancelToken,
    /// Run seed for per-worker payload generators; `None` means unseeded
    pub seed: Option<u64>,
    pub season_id: Arc<str>,
    worker_faults: Arc<AtomicU64>,
}

impl SharedContext {
    pub fn new(sender: RetryingSender, cancel: CancelToken) -> Self {
        Self {
            counters: Arc::new(Counters::new()),
            latency_log: Arc::new(LatencyLog::new()),
            sender,
            cancel,
            seed: None,
            season_id: Arc::from(crate::defaults::SEASON_ID),
            worker_faults: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_season(mut self, season_id: &str) -> Self {
        self.season_id = Arc::from(season_id);
        self
    }

    /// A context with the same sender, cancellation, seed and season but
    /// empty counters, latency log and fault tally.
    pub fn fresh(&self) -> Self {
        Self {
            counters: Arc::new(Counters::new()),
            latency_log: Arc::new(LatencyLog::new()),
            sender: self.sender.clone(),
            cancel: self.cancel.clone(),
            seed: self.seed,
            season_id: Arc::clone(&self.season_id),
            worker_faults: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Send one ride with retries and record its outcome: exactly one counter
    /// increment, plus one latency record on success.
    pub async fn deliver(&self, ride: &LiftRide) -> Outcome {
        let outcome = self.sender.send(ride, &self.cancel).await;
        match outcome {
            Outcome::Success {
                latency,
                status,
                started_at_ms,
            } => {
                self.counters.record_success();
                self.latency_log.append(LatencyRecord {
                    start_time_ms: started_at_ms,
                    kind: RequestKind::Post,
                    latency_ms: latency.as_millis() as u64,
                    status,
                });
            }
            Outcome::Failure { .. } => self.counters.record_failure(),
        }
        outcome
    }

    pub fn add_worker_faults(&self, faults: u64) {
        self.worker_faults.fetch_add(faults, Ordering::Relaxed);
    }

    pub fn worker_faults(&self) -> u64 {
        self.worker_faults.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::PayloadFactory;
    use crate::sender::MockSender;
    use std::time::Duration;

    #[tokio::test]
    async fn test_deliver_records_exactly_once() {
        let ok = SharedContext::new(
            RetryingSender::new(Arc::new(MockSender::new(Duration::ZERO)), 5),
            CancelToken::new(),
        );
        let failing = SharedContext::new(
            RetryingSender::new(
                Arc::new(MockSender::new(Duration::ZERO).failing_when(|_| true)),
                5,
            ),
            CancelToken::new(),
        );
        let mut factory = PayloadFactory::seeded(9, "2024");

        for _ in 0..10 {
            let ride = factory.next_ride();
            assert!(ok.deliver(&ride).await.is_success());
            assert!(!failing.deliver(&ride).await.is_success());
        }

        assert_eq!(ok.counters.snapshot().success, 10);
        assert_eq!(ok.counters.snapshot().failure, 0);
        assert_eq!(ok.latency_log.len(), 10);

        assert_eq!(failing.counters.snapshot().success, 0);
        assert_eq!(failing.counters.snapshot().failure, 10);
        assert!(failing.latency_log.is_empty());
    }
}
