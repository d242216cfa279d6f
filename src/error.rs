//! Error taxonomy for the load harness.
//!
//! Two families, separated by how they propagate:
//!
//! - [`SendError`] describes a single failed attempt. It is retried locally
//!   and finally folded into a `Failure` outcome, so it never escapes a worker.
//! - [`HarnessError`] describes problems with the run itself. `Config` is
//!   raised during validation before any worker is spawned, `NoData` when
//!   statistics are requested over an empty record set.

use std::time::Duration;

/// Failure of one send attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// Connection or IO failure below HTTP.
    #[error("transport error: {0}")]
    Transport(String),

    /// The attempt did not complete within the injected request timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The endpoint answered with a status outside the 2xx range.
    #[error("unexpected response status {status}")]
    Protocol { status: u16 },

    /// The request could not be built from the payload.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl SendError {
    /// Response status carried by the error, if the endpoint answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            SendError::Protocol { status } => Some(*status),
            _ => None,
        }
    }
}

/// Run-level failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HarnessError {
    /// Invalid phase, pipeline or transport configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Statistics were requested over zero records.
    #[error("no latency records to compute statistics from")]
    NoData,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_error_status() {
        assert_eq!(SendError::Protocol { status: 503 }.status(), Some(503));
        assert_eq!(SendError::Transport("reset".into()).status(), None);
        assert_eq!(
            SendError::Timeout(Duration::from_millis(5)).to_string(),
            "request timed out after 5ms"
        );
    }

    #[test]
    fn test_harness_error_display() {
        assert_eq!(
            HarnessError::Config("zero workers".into()).to_string(),
            "configuration error: zero workers"
        );
        assert_eq!(
            HarnessError::NoData.to_string(),
            "no latency records to compute statistics from"
        );
    }
}
