//! End-to-end runs against the stub engine binary.

use kitbench::config::{
    AffinityGroup, AffinityLayout, ConfigurationProfile, HarnessConfig, ParamValue, PortRange,
};
use kitbench::instance::ProvisionContext;
use kitbench::{
    Driver, Instance, InstanceError, InstanceRegistry, InstanceSpec, InstanceState,
    InterruptHandler, RunDefinition, RunError,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const STUB_ENGINE: &str = env!("CARGO_BIN_EXE_kitbench-stub-engine");

struct Fixture {
    work: TempDir,
    scratch: TempDir,
}

impl Fixture {
    fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let work = TempDir::new()?;
        let scratch = TempDir::new()?;
        std::fs::write(
            work.path().join("shore.conf.template"),
            "# engine defaults\ndb-cl-batchsz = 100\n",
        )?;
        Ok(Self { work, scratch })
    }

    fn output(&self) -> PathBuf {
        self.work.path().join("output.log")
    }

    fn config(&self, extra_args: &[&str], instances: usize) -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.harness.output = self.output();
        config.harness.template = self.work.path().join("shore.conf.template");
        config.harness.temp_dir = self.scratch.path().to_path_buf();
        config.harness.port_range = PortRange {
            min: 20000,
            max: 60000,
        };
        config.harness.poll_interval_ms = 50;
        config.harness.ready_timeout_secs = 30;

        config.engine.path = PathBuf::from(STUB_ENGINE);
        config.engine.pin_affinity = false;
        config
            .engine
            .args
            .extend(extra_args.iter().map(|a| (*a).to_string()));

        config.configurations.insert(
            "tpcc-1".to_string(),
            [
                ("bufpoolsize", ParamValue::Integer(1)),
                ("scale", ParamValue::Integer(1)),
            ]
            .into_iter()
            .collect::<ConfigurationProfile>(),
        );
        config.runs.insert(
            "tpcc-1-1".to_string(),
            RunDefinition {
                configuration: "tpcc-1".to_string(),
                affinity: AffinityLayout::Groups(
                    (0..instances).map(|i| AffinityGroup::new(vec![i])).collect(),
                ),
                commands: vec!["warmup".to_string(), "measure 1 1 1 5 1 1".to_string()],
            },
        );
        config
    }
}

fn dir_is_empty(path: &Path) -> Result<bool, std::io::Error> {
    Ok(std::fs::read_dir(path)?.next().is_none())
}

#[tokio::test]
async fn test_run_records_throughput_of_every_instance() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = Fixture::new()?;
    let config = fixture.config(&[], 2);
    let driver = Driver::new(config, Arc::new(InstanceRegistry::new()))?;

    let summaries = driver.run(&[]).await?;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].run, "tpcc-1-1");
    assert_eq!(summaries[0].instances.len(), 2);
    assert!(summaries[0]
        .instances
        .iter()
        .all(|i| i.exit_code == Some(0)));

    let results = std::fs::read_to_string(fixture.output())?;
    assert_eq!(results, "Run\ttpcc-1-1\nTPS\t123.4\nTPS\t123.4\n");
    assert!(dir_is_empty(fixture.scratch.path())?);
    Ok(())
}

/// A core this process may run on, so pinning succeeds on restricted hosts.
fn allowed_core() -> Result<usize, Box<dyn std::error::Error>> {
    use nix::sched::{sched_getaffinity, CpuSet};
    use nix::unistd::Pid;

    let set = sched_getaffinity(Pid::from_raw(0))?;
    for core in 0..CpuSet::count() {
        if set.is_set(core)? {
            return Ok(core);
        }
    }
    Err("no usable core".into())
}

#[tokio::test]
async fn test_pinned_instance_completes() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = Fixture::new()?;
    let mut config = fixture.config(&[], 1);
    config.engine.pin_affinity = true;
    if let Some(run) = config.runs.get_mut("tpcc-1-1") {
        run.affinity = AffinityLayout::Groups(vec![AffinityGroup::new(vec![allowed_core()?])]);
    }
    let driver = Driver::new(config, Arc::new(InstanceRegistry::new()))?;

    driver.run(&["tpcc-1-1".to_string()]).await?;

    let results = std::fs::read_to_string(fixture.output())?;
    assert_eq!(results, "Run\ttpcc-1-1\nTPS\t123.4\n");
    Ok(())
}

#[tokio::test]
async fn test_mqth_report_is_recorded_as_tps() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = Fixture::new()?;
    let config = fixture.config(&["--format", "mqth", "--tps", "9.5"], 1);
    let driver = Driver::new(config, Arc::new(InstanceRegistry::new()))?;

    driver.run(&[]).await?;

    let results = std::fs::read_to_string(fixture.output())?;
    assert_eq!(results, "Run\ttpcc-1-1\nTPS\t9.5\n");
    Ok(())
}

#[tokio::test]
async fn test_failed_startup_aborts_promptly() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = Fixture::new()?;
    let config = fixture.config(&["--fail-startup"], 1);
    let registry = Arc::new(InstanceRegistry::new());
    let driver = Driver::new(config, registry)?;

    let started = Instant::now();
    let result = driver.run(&[]).await;
    assert!(started.elapsed() < Duration::from_secs(10));

    let Err(RunError::Instance(InstanceError::Spawn { log, .. })) = result else {
        panic!("expected a spawn error");
    };
    assert!(log.ends_with("shore.log"));
    let captured = std::fs::read_to_string(&log)?;
    assert!(captured.contains("FAILED"));

    // The working directory is left behind for inspection.
    assert!(!dir_is_empty(fixture.scratch.path())?);
    assert!(!fixture.output().exists());
    Ok(())
}

#[tokio::test]
async fn test_interrupt_kills_ready_instances() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = Fixture::new()?;
    let config = fixture.config(&[], 2);
    let registry = Arc::new(InstanceRegistry::new());
    let ctx = ProvisionContext {
        temp_root: &config.harness.temp_dir,
        template: &config.harness.template,
        engine: &config.engine,
        profiles: &config.configurations,
    };

    let base_port = 20000 + u16::try_from(std::process::id() % 20000)?;
    let mut instances = Vec::new();
    for (port, group) in (base_port..).zip(config.runs["tpcc-1-1"].affinity.groups()) {
        let spec = InstanceSpec {
            config_name: "tpcc-1".to_string(),
            port,
            affinity: group,
        };
        let mut instance = Instance::provision(spec, ctx)?;
        registry.track(instance.slot().clone());
        instance.spawn()?;
        instance
            .wait_ready(Duration::from_millis(50), Duration::from_secs(30))
            .await?;
        instances.push(instance);
    }

    let handler = InterruptHandler::new(registry.clone());
    let mut killed = handler.terminate_all();
    killed.sort_unstable();
    let mut expected: Vec<u32> = instances.iter().filter_map(Instance::pid).collect();
    expected.sort_unstable();
    assert_eq!(killed, expected);
    assert!(handler.terminate_all().is_empty());

    for instance in &mut instances {
        assert_eq!(instance.state(), InstanceState::Ready);
        let code = tokio::time::timeout(Duration::from_secs(10), instance.reap()).await?;
        assert_eq!(code, Some(-1));
    }
    Ok(())
}
