//! Top-level run sequencing.

use crate::config::HarnessConfig;
use crate::coordinator::{RunCoordinator, RunError, RunSummary};
use crate::registry::InstanceRegistry;
use std::sync::Arc;
use tracing::{error, info};

/// Executes the configured runs in name order, stopping at the first failure.
#[derive(Debug)]
pub struct Driver {
    config: HarnessConfig,
    coordinator: RunCoordinator,
}

impl Driver {
    /// Create a driver for a configuration; instances are tracked in `registry`.
    ///
    /// The configuration is validated again here, so programmatically built
    /// configurations get the same checks as loaded ones.
    pub fn new(config: HarnessConfig, registry: Arc<InstanceRegistry>) -> Result<Self, RunError> {
        config.validate()?;
        let coordinator = RunCoordinator::new(&config, registry)?;
        Ok(Self {
            config,
            coordinator,
        })
    }

    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Log the effective settings.
    pub fn log_settings(&self) {
        let harness = &self.config.harness;
        info!("Running with settings:");
        info!("  Output log file: {}", harness.output.display());
        info!("  Template file: {}", harness.template.display());
        info!("  Engine executable: {}", self.config.engine.path.display());
        info!("  Temporary directory: {}", harness.temp_dir.display());
        info!("  Port range: {}", harness.port_range);
    }

    /// Execute the selected runs (all runs when `only` is empty).
    ///
    /// On failure the instances of the failed run are force-killed; their
    /// working directories are left in place for inspection and no further
    /// runs are attempted.
    pub async fn run(&self, only: &[String]) -> Result<Vec<RunSummary>, RunError> {
        let runs = self.config.selected_runs(only)?;
        let mut summaries = Vec::with_capacity(runs.len());
        for (name, run) in runs {
            match self.coordinator.execute(name, run).await {
                Ok(summary) => summaries.push(summary),
                Err(e) => {
                    error!("Run {} failed: {}", name, e);
                    let killed = self.coordinator.registry().kill_all();
                    for pid in killed {
                        info!("Sent SIGKILL to {}", pid);
                    }
                    return Err(e);
                }
            }
        }
        Ok(summaries)
    }
}
