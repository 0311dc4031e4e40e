//! Multi-instance run coordination.
//!
//! The RunCoordinator drives every instance of a run through the same phases,
//! finishing a phase for all instances before the next one starts:
//!
//! 1. Provision (and register for interrupt handling)
//! 2. Spawn
//! 3. Wait until ready, one instance after the other
//! 4. Connect
//! 5. Send the command script, then stop
//! 6. Write the run header
//! 7. Wait for exit, scrape, record, clean
//!
//! Within a phase instances are handled in affinity-group order. Any error
//! aborts the run; instances left behind stay in the registry so the caller
//! can kill them, and their directories stay on disk for inspection.

use crate::config::{
    AffinityGroup, ConfigError, ConfigurationProfile, EngineSettings, HarnessConfig,
    HarnessSettings, PortRange, RunDefinition,
};
use crate::instance::{Instance, InstanceError, InstanceSpec, ProvisionContext};
use crate::registry::InstanceRegistry;
use crate::results::{InstanceRecord, ResultsError, ResultsFile};
use crate::scraper::{LogScraper, Metrics};
use rand::seq::index;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Run errors.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Instance(#[from] InstanceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Results(#[from] ResultsError),

    #[error("Cannot allocate {needed} distinct ports from range {range}")]
    PortsExhausted { needed: usize, range: PortRange },
}

/// Outcome of one instance of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceOutcome {
    pub affinity: AffinityGroup,
    pub port: u16,
    pub exit_code: Option<i32>,
    pub metrics: Metrics,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run: String,
    pub instances: Vec<InstanceOutcome>,
}

/// Pick `count` distinct ports from `range`, uniformly at random.
pub fn allocate_ports<R: Rng + ?Sized>(
    range: PortRange,
    count: usize,
    rng: &mut R,
) -> Result<Vec<u16>, RunError> {
    if count > range.count() {
        return Err(RunError::PortsExhausted {
            needed: count,
            range,
        });
    }
    index::sample(rng, range.count(), count)
        .into_iter()
        .map(|offset| {
            u16::try_from(offset)
                .ok()
                .and_then(|offset| range.min.checked_add(offset))
                .ok_or(RunError::PortsExhausted {
                    needed: count,
                    range,
                })
        })
        .collect()
}

/// Executes run definitions against a shared registry and results file.
#[derive(Debug, Clone)]
pub struct RunCoordinator {
    harness: HarnessSettings,
    engine: EngineSettings,
    profiles: Arc<BTreeMap<String, ConfigurationProfile>>,
    scraper: LogScraper,
    results: ResultsFile,
    registry: Arc<InstanceRegistry>,
}

impl RunCoordinator {
    /// Create a coordinator from a validated configuration.
    pub fn new(config: &HarnessConfig, registry: Arc<InstanceRegistry>) -> Result<Self, ConfigError> {
        Ok(Self {
            harness: config.harness.clone(),
            engine: config.engine.clone(),
            profiles: Arc::new(config.configurations.clone()),
            scraper: LogScraper::from_rules(&config.scrape_rules)?,
            results: ResultsFile::new(
                &config.harness.output,
                config.harness.results_json.as_deref(),
            ),
            registry,
        })
    }

    /// The registry instances are tracked in.
    #[must_use]
    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    /// Execute one run end to end and append its results.
    pub async fn execute(&self, name: &str, run: &RunDefinition) -> Result<RunSummary, RunError> {
        info!("Run {}", name);
        let groups = run.affinity.groups();
        let ports = allocate_ports(self.harness.port_range, groups.len(), &mut rand::thread_rng())?;

        self.registry.replace(Vec::new());
        let mut instances = self.provision_all(&run.configuration, groups, ports)?;

        for instance in &mut instances {
            info!("Starting server at cores {}...", instance.spec().affinity);
            instance.spawn()?;
        }

        for instance in &mut instances {
            info!(
                "Waiting for server at cores {} to initialize...",
                instance.spec().affinity
            );
            instance
                .wait_ready(self.harness.poll_interval(), self.harness.ready_timeout())
                .await?;
        }

        for instance in &mut instances {
            info!("Connecting to server at cores {}...", instance.spec().affinity);
            instance.connect(self.harness.connect_timeout()).await?;
        }

        info!("Sending commands to servers...");
        for instance in &mut instances {
            for command in &run.commands {
                instance.send(command).await?;
            }
            instance.stop().await?;
        }

        self.results.append_run_header(name)?;

        let mut outcomes = Vec::with_capacity(instances.len());
        for mut instance in instances {
            info!(
                "Waiting for server at cores {} to finish...",
                instance.spec().affinity
            );
            let exit_code = instance.wait_exit().await?;
            if exit_code != 0 {
                warn!(
                    "Server at cores {} exited with code {}",
                    instance.spec().affinity,
                    exit_code
                );
            }

            let metrics = self.scraper.scrape(instance.collect().await?);
            self.results.append_metrics(&metrics)?;
            let spec = instance.spec();
            self.results.append_record(&InstanceRecord {
                run: name,
                configuration: &spec.config_name,
                cores: spec.affinity.cores(),
                port: spec.port,
                exit_code: Some(exit_code),
                metrics: &metrics,
            })?;

            instance.clean()?;
            self.registry.release(instance.slot());

            outcomes.push(InstanceOutcome {
                affinity: instance.spec().affinity.clone(),
                port: instance.spec().port,
                exit_code: Some(exit_code),
                metrics,
            });
        }

        Ok(RunSummary {
            run: name.to_string(),
            instances: outcomes,
        })
    }

    /// Provision one instance per group, tracking each as soon as it exists.
    fn provision_all(
        &self,
        config_name: &str,
        groups: Vec<AffinityGroup>,
        ports: Vec<u16>,
    ) -> Result<Vec<Instance>, RunError> {
        let ctx = ProvisionContext {
            temp_root: &self.harness.temp_dir,
            template: &self.harness.template,
            engine: &self.engine,
            profiles: &self.profiles,
        };
        let mut instances = Vec::with_capacity(groups.len());
        for (affinity, port) in groups.into_iter().zip(ports) {
            let spec = InstanceSpec {
                config_name: config_name.to_string(),
                port,
                affinity,
            };
            let instance = Instance::provision(spec, ctx)?;
            self.registry.track(instance.slot().clone());
            instances.push(instance);
        }
        Ok(instances)
    }
}
