//! Results output.
//!
//! The results file is plain text and append-only: every run contributes a
//! `Run<TAB><name>` header followed by one `<metric><TAB><v1><TAB><v2>...`
//! line per metric per instance. Optionally, a JSON-lines sidecar receives one
//! structured record per instance.

use crate::scraper::Metrics;
use chrono::Utc;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Results output errors.
#[derive(Debug, Error)]
pub enum ResultsError {
    #[error("Failed writing results to {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One instance's outcome, as written to the JSON-lines sidecar.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceRecord<'a> {
    pub run: &'a str,
    pub configuration: &'a str,
    pub cores: &'a [usize],
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub metrics: &'a Metrics,
}

/// A single JSON-lines entry.
#[derive(Serialize)]
struct LogEntry<'a> {
    /// ISO 8601 timestamp.
    timestamp: String,
    #[serde(flatten)]
    record: &'a InstanceRecord<'a>,
}

/// Append-only writer for the results file and its optional sidecar.
#[derive(Debug, Clone)]
pub struct ResultsFile {
    path: PathBuf,
    json_path: Option<PathBuf>,
}

impl ResultsFile {
    #[must_use]
    pub fn new(path: &Path, json_path: Option<&Path>) -> Self {
        Self {
            path: path.to_path_buf(),
            json_path: json_path.map(Path::to_path_buf),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append the header line that opens a run.
    pub fn append_run_header(&self, run: &str) -> Result<(), ResultsError> {
        append(&self.path, &format!("Run\t{run}\n"))
    }

    /// Append one line per metric.
    pub fn append_metrics(&self, metrics: &Metrics) -> Result<(), ResultsError> {
        append(&self.path, &format_metrics(metrics))
    }

    /// Append a record to the sidecar, if one is configured.
    pub fn append_record(&self, record: &InstanceRecord<'_>) -> Result<(), ResultsError> {
        let Some(json_path) = &self.json_path else {
            return Ok(());
        };
        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            record,
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        append(json_path, &line)
    }
}

/// Render metrics as `<name>\t<v1>\t<v2>...` lines.
#[must_use]
pub fn format_metrics(metrics: &Metrics) -> String {
    metrics
        .iter()
        .map(|(name, values)| format!("{name}\t{}\n", values.join("\t")))
        .collect()
}

fn append(path: &Path, text: &str) -> Result<(), ResultsError> {
    let io_err = |source| ResultsError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_err)?;
    file.write_all(text.as_bytes()).map_err(io_err)?;
    file.flush().map_err(io_err)
}
