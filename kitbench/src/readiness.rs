//! Readiness detection for engine instances.
//!
//! The engine only signals that its control port is open through console
//! output, so the default probe inspects the tail of the captured log. The
//! [`ReadinessProbe`] trait leaves room for a handshake-based probe should the
//! engine ever grow one.

use std::io;
use std::path::{Path, PathBuf};

/// What a probe observed about an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The instance accepts client connections.
    Ready,
    /// The instance reported a startup failure.
    Failed,
    /// Nothing conclusive yet.
    Unknown,
}

/// Capability to observe whether an instance finished starting up.
pub trait ReadinessProbe: Send + Sync {
    /// Take one observation. Must not block for long.
    fn probe(&self) -> io::Result<Readiness>;
}

/// Probe backed by the last non-empty line of the captured output log.
#[derive(Debug, Clone)]
pub struct LogTailProbe {
    log: PathBuf,
    ready_marker: String,
    failure_marker: String,
}

impl LogTailProbe {
    #[must_use]
    pub fn new(log: &Path, ready_marker: &str, failure_marker: &str) -> Self {
        Self {
            log: log.to_path_buf(),
            ready_marker: ready_marker.to_string(),
            failure_marker: failure_marker.to_string(),
        }
    }

    /// Log file this probe reads.
    #[must_use]
    pub fn log(&self) -> &Path {
        &self.log
    }
}

impl ReadinessProbe for LogTailProbe {
    fn probe(&self) -> io::Result<Readiness> {
        match std::fs::read(&self.log) {
            Ok(bytes) => Ok(classify_tail(
                &String::from_utf8_lossy(&bytes),
                &self.ready_marker,
                &self.failure_marker,
            )),
            // The engine has not created its output yet.
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Readiness::Unknown),
            Err(e) => Err(e),
        }
    }
}

/// Classify captured output by its last non-empty line.
#[must_use]
pub fn classify_tail(output: &str, ready_marker: &str, failure_marker: &str) -> Readiness {
    let Some(last) = output.lines().rev().find(|l| !l.trim().is_empty()) else {
        return Readiness::Unknown;
    };
    if last.contains(ready_marker) {
        Readiness::Ready
    } else if last.contains(failure_marker) {
        Readiness::Failed
    } else {
        Readiness::Unknown
    }
}
