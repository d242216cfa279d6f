use crossbeam::queue::SegQueue;
use serde::{Deserialize, Serialize};
use std::fmt;

/// HTTP method of a recorded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    #[serde(rename = "POST")]
    Post,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Post => write!(f, "POST"),
        }
    }
}

/// Timing of one successful request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyRecord {
    /// Wall-clock start of the successful attempt, milliseconds since the epoch
    pub start_time_ms: i64,
    pub kind: RequestKind,
    pub latency_ms: u64,
    pub status: u16,
}

impl LatencyRecord {
    /// CSV row matching [`CSV_HEADER`].
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{}",
            self.start_time_ms, self.kind, self.latency_ms, self.status
        )
    }
}

pub const CSV_HEADER: &str = "startTime,requestType,latency,responseCode";

/// Append-only collection of [`LatencyRecord`]s.
///
/// Backed by a lock-free segmented queue: workers append without contending
/// on a lock and one reader drains everything after the run. Insertion order
/// is not meaningful, the statistics pass sorts.
#[derive(Debug, Default)]
pub struct LatencyLog {
    records: SegQueue<LatencyRecord>,
}

impl LatencyLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, record: LatencyRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Take every record appended so far.
    pub fn drain(&self) -> Vec<LatencyRecord> {
        let mut out = Vec::with_capacity(self.records.len());
        while let Some(record) = self.records.pop() {
            out.push(record);
        }
        out
    }
}
