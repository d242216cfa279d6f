use crate::latency_log::{LatencyRecord, CSV_HEADER};
use crate::runner::RunReport;
use crate::utils::{
    format_duration, format_request_rate, format_table_row, format_table_separator,
    generate_run_id, get_cpu_cores,
};
use anyhow::{Context, Result};
use colored::*;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Host details recorded alongside the results for reproducibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: usize,
    pub rust_version: String,
    pub tool_version: String,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_cores: get_cpu_cores(),
            rust_version: env!("CARGO_PKG_RUST_VERSION").to_string(),
            tool_version: crate::VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub version: String,
    pub run_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub target: String,
    pub system_info: SystemInfo,
}

/// The JSON results document.
#[derive(Debug, Serialize, Deserialize)]
pub struct FinalRunResults {
    pub metadata: RunMetadata,
    pub report: RunReport,
}

/// Writes the outputs of a finished run: console summary, CSV records and
/// the optional JSON document.
pub struct ResultsManager {
    csv_file: PathBuf,
    json_file: Option<PathBuf>,
    run_id: String,
}

impl ResultsManager {
    pub fn new(csv_file: &Path) -> Self {
        Self {
            csv_file: csv_file.to_path_buf(),
            json_file: None,
            run_id: generate_run_id(),
        }
    }

    pub fn with_json_output(mut self, json_file: Option<&Path>) -> Self {
        self.json_file = json_file.map(Path::to_path_buf);
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Write everything for one run. `records` are written in the order given.
    pub fn finalize(
        &self,
        report: &RunReport,
        records: &[LatencyRecord],
        target: &str,
    ) -> Result<()> {
        println!("{}", render_summary(report));

        let written = write_csv(&self.csv_file, records)?;
        info!("{} records written to {:?}", written, self.csv_file);

        if let Some(json_file) = &self.json_file {
            self.write_json(json_file, report, target)?;
            info!("Results written to {:?}", json_file);
        }
        Ok(())
    }

    fn write_json(&self, path: &Path, report: &RunReport, target: &str) -> Result<()> {
        let results = FinalRunResults {
            metadata: RunMetadata {
                version: crate::VERSION.to_string(),
                run_id: self.run_id.clone(),
                timestamp: chrono::Utc::now(),
                target: target.to_string(),
                system_info: SystemInfo::default(),
            },
            report: report.clone(),
        };

        let json = serde_json::to_string_pretty(&results)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?;
        Ok(())
    }
}

/// Write the CSV header and one row per record. Returns the number of rows.
pub fn write_csv(path: &Path, records: &[LatencyRecord]) -> Result<usize> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{}", CSV_HEADER)?;
    for record in records {
        writeln!(writer, "{}", record.to_csv_row())?;
    }
    writer.flush()?;
    Ok(records.len())
}

/// Render the end-of-run console summary.
pub fn render_summary(report: &RunReport) -> String {
    let mut out = String::new();
    let heading = if report.cancelled {
        "Run Summary (cancelled)".yellow().bold()
    } else {
        "Run Summary".green().bold()
    };
    let _ = writeln!(out, "\n{}", heading);
    let _ = writeln!(out, "  Topology:              {}", report.topology);
    let _ = writeln!(out, "  Total requests:        {}", report.counters.total());
    let _ = writeln!(out, "  Successful requests:   {}", report.counters.success);
    let _ = writeln!(out, "  Failed requests:       {}", report.counters.failure);
    let _ = writeln!(out, "  Wall time:             {} ms", report.wall_time_ms);
    let _ = writeln!(
        out,
        "  Attempted throughput:  {}",
        format_request_rate(report.attempted_throughput_per_sec)
    );
    if report.worker_faults > 0 {
        let _ = writeln!(
            out,
            "  {}",
            format!("Worker faults:         {}", report.worker_faults).red()
        );
    }

    if !report.phases.is_empty() {
        let widths = [10, 8, 10, 12];
        let _ = writeln!(out, "\n{}", format_table_separator(&widths));
        let _ = writeln!(
            out,
            "{}",
            format_table_row(&["Phase", "Workers", "Requests", "Elapsed"], &widths)
        );
        let _ = writeln!(out, "{}", format_table_separator(&widths));
        for phase in &report.phases {
            let workers = phase.worker_count.to_string();
            let requests = phase.requests_per_worker.to_string();
            let elapsed = format_duration(Duration::from_millis(phase.elapsed_ms));
            let _ = writeln!(
                out,
                "{}",
                format_table_row(
                    &[phase.name.as_str(), workers.as_str(), requests.as_str(), elapsed.as_str()],
                    &widths
                )
            );
        }
        let _ = writeln!(out, "{}", format_table_separator(&widths));
    }

    if let Some(pipeline) = &report.pipeline {
        let _ = writeln!(
            out,
            "\n  Pipeline: produced {}, consumed {}, queue high-water mark {}/{}",
            pipeline.produced, pipeline.consumed, pipeline.high_water_mark, pipeline.capacity
        );
    }

    if let Some(calibration) = &report.calibration {
        let _ = writeln!(
            out,
            "\n  Single-worker throughput: {}",
            format_request_rate(calibration.single_worker_throughput)
        );
        for prediction in &calibration.predictions {
            let duration = prediction
                .predicted_duration_ms
                .map(|ms| format_duration(Duration::from_millis(ms)))
                .unwrap_or_else(|| "n/a".to_string());
            let _ = writeln!(
                out,
                "  {} ({} workers): {} predicted, {}",
                prediction.name,
                prediction.worker_count,
                format_request_rate(prediction.predicted_throughput_per_sec),
                duration
            );
        }
    }

    match &report.latency {
        Some(latency) => {
            let _ = writeln!(out, "\n{}", "Latency".bold());
            let _ = writeln!(out, "  Mean:        {:.2} ms", latency.mean_ms);
            let _ = writeln!(out, "  Median:      {} ms", latency.median_ms);
            let _ = writeln!(out, "  P99:         {} ms", latency.p99_ms);
            let _ = writeln!(out, "  Min:         {} ms", latency.min_ms);
            let _ = writeln!(out, "  Max:         {} ms", latency.max_ms);
            let _ = writeln!(
                out,
                "  Throughput:  {}",
                format_request_rate(latency.throughput_per_sec)
            );
        }
        None => {
            let _ = writeln!(
                out,
                "\n  {}",
                "No successful requests, no latency statistics".yellow()
            );
        }
    }
    out
}
