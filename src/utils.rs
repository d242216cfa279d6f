//! # Utility Functions
//!
//! Small helpers shared by the runner and the report: run identifiers,
//! host details, human-readable formatting, and validation of the numeric
//! knobs that come in from the command line.
//!
//! ```rust
//! use skier_load::utils::*;
//! use std::time::Duration;
//!
//! # fn main() -> anyhow::Result<()> {
//! assert_eq!(format_duration(Duration::from_micros(1500)), "1.50ms");
//! assert_eq!(format_request_rate(1500.0), "1.50K req/s");
//! validate_worker_count(32)?;
//! # Ok(())
//! # }
//! ```

use anyhow::Result;
use std::time::Duration;
use uuid::Uuid;

/// Upper bound on workers in one phase or pipeline.
pub const MAX_WORKERS: usize = 4096;

/// Unique identifier for a run, used in the JSON results document.
pub fn generate_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Format a duration with the most readable unit.
///
/// Sub-minute values use a single unit with two decimals (`1.50ms`,
/// `2.25s`); longer ones use a compound form (`3m 20s`, `1h 2m 5s`).
pub fn format_duration(duration: Duration) -> String {
    let total_ns = duration.as_nanos();

    if total_ns < 1_000 {
        format!("{}ns", total_ns)
    } else if total_ns < 1_000_000 {
        format!("{:.2}μs", total_ns as f64 / 1_000.0)
    } else if total_ns < 1_000_000_000 {
        format!("{:.2}ms", total_ns as f64 / 1_000_000.0)
    } else if total_ns < 60_000_000_000 {
        format!("{:.2}s", total_ns as f64 / 1_000_000_000.0)
    } else {
        let seconds = duration.as_secs();
        let minutes = seconds / 60;
        let remaining_seconds = seconds % 60;

        if minutes < 60 {
            format!("{}m {}s", minutes, remaining_seconds)
        } else {
            let hours = minutes / 60;
            let remaining_minutes = minutes % 60;
            format!("{}h {}m {}s", hours, remaining_minutes, remaining_seconds)
        }
    }
}

pub fn format_request_rate(requests_per_second: f64) -> String {
    if requests_per_second < 1000.0 {
        format!("{:.0} req/s", requests_per_second)
    } else if requests_per_second < 1_000_000.0 {
        format!("{:.2}K req/s", requests_per_second / 1000.0)
    } else {
        format!("{:.2}M req/s", requests_per_second / 1_000_000.0)
    }
}

/// Requests per second over a wall time in milliseconds; zero when no time elapsed.
pub fn requests_per_second(requests: u64, wall_time_ms: u64) -> f64 {
    if wall_time_ms == 0 {
        return 0.0;
    }
    1000.0 * requests as f64 / wall_time_ms as f64
}

pub fn validate_worker_count(workers: usize) -> Result<()> {
    if workers == 0 {
        anyhow::bail!("Worker count must be at least 1");
    }
    if workers > MAX_WORKERS {
        anyhow::bail!(
            "Worker count {} exceeds the maximum of {}",
            workers,
            MAX_WORKERS
        );
    }
    Ok(())
}

/// Validate the connection pool size.
///
/// The pool bounds in-flight requests, so a pool larger than the busiest
/// phase is allowed but pointless; only zero is rejected.
pub fn validate_max_connections(max_connections: usize) -> Result<()> {
    if max_connections == 0 {
        anyhow::bail!("Connection pool size must be at least 1");
    }
    Ok(())
}

pub fn get_cpu_cores() -> usize {
    num_cpus::get()
}

/// Render one `| a | b |` table row with fixed column widths.
pub fn format_table_row(columns: &[&str], widths: &[usize]) -> String {
    let mut row = String::from("|");
    for (i, column) in columns.iter().enumerate() {
        let width = widths.get(i).copied().unwrap_or(10);
        row.push_str(&format!(" {:width$} |", column, width = width));
    }
    row
}

pub fn format_table_separator(widths: &[usize]) -> String {
    let mut row = String::from("+");
    for &width in widths {
        row.push_str(&"-".repeat(width + 2));
        row.push('+');
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_nanos(500)), "500ns");
        assert_eq!(format_duration(Duration::from_nanos(1500)), "1.50μs");
        assert_eq!(format_duration(Duration::from_micros(1500)), "1.50ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format_duration(Duration::from_secs(200)), "3m 20s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }

    #[test]
    fn test_format_request_rate() {
        assert_eq!(format_request_rate(500.0), "500 req/s");
        assert_eq!(format_request_rate(1500.0), "1.50K req/s");
        assert_eq!(format_request_rate(1_500_000.0), "1.50M req/s");
    }

    #[test]
    fn test_requests_per_second() {
        assert_eq!(requests_per_second(1_000, 2_000), 500.0);
        assert_eq!(requests_per_second(1_000, 0), 0.0);
    }

    #[test]
    fn test_validate_worker_count() {
        assert!(validate_worker_count(1).is_ok());
        assert!(validate_worker_count(112).is_ok());
        assert!(validate_worker_count(0).is_err());
        assert!(validate_worker_count(MAX_WORKERS + 1).is_err());
    }

    #[test]
    fn test_validate_max_connections() {
        assert!(validate_max_connections(50).is_ok());
        assert!(validate_max_connections(0).is_err());
    }

    #[test]
    fn test_table_formatting() {
        assert_eq!(format_table_row(&["a", "bb"], &[3, 2]), "| a   | bb |");
        assert_eq!(format_table_separator(&[3, 2]), "+-----+----+");
    }

    #[test]
    fn test_run_id_is_unique() {
        assert_ne!(generate_run_id(), generate_run_id());
        assert!(get_cpu_cores() > 0);
    }
}
