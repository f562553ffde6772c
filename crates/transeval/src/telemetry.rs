//! Append-only JSON Lines log of evaluation results.
//!
//! Every line is one sample's [`EvaluationResult`] tagged with the run that
//! produced it, so several runs can share a file and be aggregated later.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use evaluation::EvaluationResult;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub run_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub result: EvaluationResult,
}

pub struct TelemetrySink {
    path: PathBuf,
    file: File,
    run_id: Uuid,
    written: usize,
}

impl TelemetrySink {
    /// Open `path` for appending under a fresh run id.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open telemetry file {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            run_id: Uuid::new_v4(),
            written: 0,
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn record(&mut self, result: &EvaluationResult) -> Result<()> {
        let record = TelemetryRecord {
            run_id: self.run_id,
            recorded_at: Utc::now(),
            result: result.clone(),
        };
        let json = serde_json::to_string(&record)?;
        writeln!(self.file, "{json}")
            .and_then(|_| self.file.flush())
            .with_context(|| format!("Failed to append to {}", self.path.display()))?;
        self.written += 1;
        Ok(())
    }
}

impl Drop for TelemetrySink {
    fn drop(&mut self) {
        if self.written > 0 {
            info!(
                path = %self.path.display(),
                run_id = %self.run_id,
                results = self.written,
                "Telemetry written"
            );
        }
    }
}

/// Read every record from a telemetry file. Malformed lines are skipped
/// with a warning.
pub fn read_records(path: &Path) -> Result<Vec<TelemetryRecord>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open results file {}", path.display()))?;
    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TelemetryRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(
                path = %path.display(),
                line = index + 1,
                error = %e,
                "Skipping malformed telemetry line"
            ),
        }
    }
    Ok(records)
}

/// Results from one or more telemetry files.
pub fn read_results(paths: &[PathBuf]) -> Result<Vec<EvaluationResult>> {
    let mut results = Vec::new();
    for path in paths {
        results.extend(read_records(path)?.into_iter().map(|r| r.result));
    }
    Ok(results)
}
