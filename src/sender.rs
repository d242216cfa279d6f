//! # Request Sending and Retry Policy
//!
//! [`RequestSender`] is the narrow capability the harness needs from a
//! transport: deliver one [`LiftRide`] and report the response status.
//! [`RetryingSender`] wraps any sender with the retry policy and turns the
//! attempts into exactly one [`Outcome`] per logical request.
//!
//! ## Retry Policy
//!
//! - Up to `retry_limit` attempts, each timed on its own.
//! - An attempt fails on a transport error, a timeout or a non-2xx status.
//! - The first successful attempt ends the loop; its latency is reported.
//! - Exhausting every attempt yields a single `Failure`.
//! - Cancellation is checked between attempts.
//!
//! The retrying sender holds no shared mutable state; counters and latency
//! records are updated by the caller from the returned outcome.

use crate::cancel::CancelToken;
use crate::error::SendError;
use crate::payload::LiftRide;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Transport capability used by workers.
///
/// Implementations return `Ok(status)` for a response in the 2xx range and an
/// error for everything else.
#[async_trait]
pub trait RequestSender: Send + Sync {
    /// Short name for logs and reports
    fn name(&self) -> &'static str;

    /// Deliver one lift ride.
    async fn send(&self, ride: &LiftRide) -> Result<u16, SendError>;
}

/// Terminal classification of one logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success {
        latency: Duration,
        status: u16,
        /// Start of the successful attempt, milliseconds since the epoch
        started_at_ms: i64,
    },
    Failure {
        attempts: u32,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

fn is_success_status(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Applies the retry policy on top of a shared [`RequestSender`].
#[derive(Clone)]
pub struct RetryingSender {
    inner: Arc<dyn RequestSender>,
    retry_limit: u32,
}

impl RetryingSender {
    /// A limit of zero is treated as one attempt.
    pub fn new(inner: Arc<dyn RequestSender>, retry_limit: u32) -> Self {
        Self {
            inner,
            retry_limit: retry_limit.max(1),
        }
    }

    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    pub async fn send(&self, ride: &LiftRide, cancel: &CancelToken) -> Outcome {
        let mut attempts = 0u32;
        let mut last_error = None;

        while attempts < self.retry_limit {
            if attempts > 0 && cancel.is_cancelled() {
                debug!("Run cancelled, abandoning retries after {} attempts", attempts);
                break;
            }
            attempts += 1;

            let started_at_ms = chrono::Utc::now().timestamp_millis();
            let start = Instant::now();
            let result = match self.inner.send(ride).await {
                Ok(status) if is_success_status(status) => Ok(status),
                Ok(status) => Err(SendError::Protocol { status }),
                Err(e) => Err(e),
            };

            match result {
                Ok(status) => {
                    return Outcome::Success {
                        latency: start.elapsed(),
                        status,
                        started_at_ms,
                    };
                }
                Err(e) => {
                    match e.status() {
                        Some(status) => debug!(
                            "Attempt {}/{} for skier {} rejected with status {}",
                            attempts, self.retry_limit, ride.skier_id, status
                        ),
                        None => debug!(
                            "Attempt {}/{} for skier {} failed: {}",
                            attempts, self.retry_limit, ride.skier_id, e
                        ),
                    }
                    last_error = Some(e);
                }
            }
        }

        if let Some(e) = last_error {
            warn!(
                "Request for skier {} failed after {} attempts: {}",
                ride.skier_id, attempts, e
            );
        }
        Outcome::Failure { attempts }
    }
}

/// In-process sender that never touches the network.
///
/// Used by `--dry-run` and by tests. Every call sleeps for `delay` and then
/// answers with `status`, unless `fail_when` matches the ride, in which case
/// the call fails with a transport error.
pub struct MockSender {
    delay: Duration,
    status: u16,
    fail_when: Option<fn(&LiftRide) -> bool>,
    calls: AtomicU64,
}

impl MockSender {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            status: 201,
            fail_when: None,
            calls: AtomicU64::new(0),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn failing_when(mut self, predicate: fn(&LiftRide) -> bool) -> Self {
        self.fail_when = Some(predicate);
        self
    }

    /// Number of attempts received so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RequestSender for MockSender {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn send(&self, ride: &LiftRide) -> Result<u16, SendError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.fail_when {
            Some(predicate) if predicate(ride) => {
                Err(SendError::Transport("connection refused".to_string()))
            }
            _ => Ok(self.status),
        }
    }
}
