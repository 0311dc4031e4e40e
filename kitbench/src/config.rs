//! Configuration loading and management for the harness.
//!
//! The configuration is stored in TOML format and defines:
//! - Harness settings (results file, template, temp root, port range, timings)
//! - Engine settings (executable, invocation, readiness markers)
//! - Configuration profiles, keyed by name
//! - Run definitions, keyed by run name
//! - Optional scrape rules overriding the built-in throughput patterns

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    ValidationError(String),

    #[error("Unknown configuration profile: {0}")]
    UnknownProfile(String),

    #[error("Failed copying template {} to {}: {source}", .template.display(), .target.display())]
    TemplateCopy {
        template: PathBuf,
        target: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed generating {}: {source}", .path.display())]
    Generate {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid scrape pattern for {metric}: {source}")]
    ScrapePattern {
        metric: String,
        source: regex::Error,
    },
}

/// Inclusive range of TCP ports instances may listen on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[u16; 2]", into = "[u16; 2]")]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

impl PortRange {
    /// Number of ports in the range.
    #[must_use]
    pub fn count(&self) -> usize {
        usize::from(self.max) - usize::from(self.min) + 1
    }

    #[must_use]
    pub fn contains(&self, port: u16) -> bool {
        (self.min..=self.max).contains(&port)
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            min: 5000,
            max: 6000,
        }
    }
}

impl TryFrom<[u16; 2]> for PortRange {
    type Error = String;

    fn try_from([min, max]: [u16; 2]) -> Result<Self, Self::Error> {
        if min > max {
            return Err(format!("port range {min},{max} is inverted"));
        }
        Ok(Self { min, max })
    }
}

impl From<PortRange> for [u16; 2] {
    fn from(range: PortRange) -> Self {
        [range.min, range.max]
    }
}

impl std::str::FromStr for PortRange {
    type Err = String;

    /// Parses the `min,max` form used on the command line.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((min, max)) = s.split_once(',') else {
            return Err(format!("expected MIN,MAX but got '{s}'"));
        };
        let min = min
            .trim()
            .parse::<u16>()
            .map_err(|e| format!("bad port '{min}': {e}"))?;
        let max = max
            .trim()
            .parse::<u16>()
            .map_err(|e| format!("bad port '{max}': {e}"))?;
        Self::try_from([min, max])
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.min, self.max)
    }
}

/// Harness-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessSettings {
    /// Results file; appended to, never truncated.
    #[serde(default = "default_output")]
    pub output: PathBuf,

    /// Optional JSON-lines file receiving one record per instance.
    #[serde(default)]
    pub results_json: Option<PathBuf>,

    /// Template the engine configuration is generated from.
    #[serde(default = "default_template")]
    pub template: PathBuf,

    /// Root under which per-instance working directories are created.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Ports instances may listen on.
    #[serde(default)]
    pub port_range: PortRange,

    /// Interval between readiness polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound on how long a single instance may take to become ready.
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,

    /// Upper bound on establishing the control connection.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_output() -> PathBuf {
    PathBuf::from("output.log")
}

fn default_template() -> PathBuf {
    PathBuf::from("shore.conf.template")
}

fn default_temp_dir() -> PathBuf {
    match std::env::var("USER") {
        Ok(user) if !user.is_empty() => PathBuf::from("/tmpfs").join(user),
        _ => std::env::temp_dir().join("kitbench"),
    }
}

const fn default_poll_interval_ms() -> u64 {
    1000
}

const fn default_ready_timeout_secs() -> u64 {
    600
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            output: default_output(),
            results_json: None,
            template: default_template(),
            temp_dir: default_temp_dir(),
            port_range: PortRange::default(),
            poll_interval_ms: default_poll_interval_ms(),
            ready_timeout_secs: default_ready_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl HarnessSettings {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// How the engine executable is invoked and observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Path to the engine executable.
    #[serde(default = "default_engine_path")]
    pub path: PathBuf,

    /// Arguments; every `{port}` is replaced with the instance port.
    #[serde(default = "default_engine_args")]
    pub args: Vec<String>,

    /// Substring on the last log line that means the engine accepts connections.
    #[serde(default = "default_ready_marker")]
    pub ready_marker: String,

    /// Substring on the last log line that means the engine failed to start.
    #[serde(default = "default_failure_marker")]
    pub failure_marker: String,

    /// Command that asks the engine to shut down.
    #[serde(default = "default_quit_command")]
    pub quit_command: String,

    /// Pin each engine process to its affinity group.
    #[serde(default = "default_pin_affinity")]
    pub pin_affinity: bool,
}

fn default_engine_path() -> PathBuf {
    PathBuf::from("../shore_kits")
}

fn default_engine_args() -> Vec<String> {
    vec!["-n".to_string(), "-p".to_string(), "{port}".to_string()]
}

fn default_ready_marker() -> String {
    "Waiting for client connection".to_string()
}

fn default_failure_marker() -> String {
    "FAILED".to_string()
}

fn default_quit_command() -> String {
    "quit".to_string()
}

const fn default_pin_affinity() -> bool {
    true
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            path: default_engine_path(),
            args: default_engine_args(),
            ready_marker: default_ready_marker(),
            failure_marker: default_failure_marker(),
            quit_command: default_quit_command(),
            pin_affinity: default_pin_affinity(),
        }
    }
}

impl EngineSettings {
    /// Engine arguments with the port substituted in.
    #[must_use]
    pub fn args_for_port(&self, port: u16) -> Vec<String> {
        let port = port.to_string();
        self.args.iter().map(|a| a.replace("{port}", &port)).collect()
    }
}

/// A single tunable value in a configuration profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Integer(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

/// Named set of engine tunables, e.g. scale factor and buffer pool size.
///
/// Keys iterate in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigurationProfile {
    params: BTreeMap<String, ParamValue>,
}

impl ConfigurationProfile {
    /// Iterate over `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.params.get(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, ParamValue)> for ConfigurationProfile {
    fn from_iter<I: IntoIterator<Item = (K, ParamValue)>>(iter: I) -> Self {
        Self {
            params: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// CPU cores one engine instance is pinned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AffinityGroup(Vec<usize>);

impl AffinityGroup {
    #[must_use]
    pub fn new(cores: Vec<usize>) -> Self {
        Self(cores)
    }

    #[must_use]
    pub fn cores(&self) -> &[usize] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for AffinityGroup {
    /// Formats as a `taskset -c` style list, e.g. `0,1,2`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for core in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{core}")?;
            first = false;
        }
        Ok(())
    }
}

/// Affinity groups of a run, either spelled out or generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AffinityLayout {
    /// One explicit core list per instance.
    Groups(Vec<AffinityGroup>),
    /// `instances` consecutive groups of `cores_per_instance` cores each.
    Stride {
        instances: usize,
        cores_per_instance: usize,
        #[serde(default)]
        first_core: usize,
    },
}

impl AffinityLayout {
    /// Number of instances the layout describes, without building the groups.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        match self {
            Self::Groups(groups) => groups.len(),
            Self::Stride { instances, .. } => *instances,
        }
    }

    /// Resolve to one group per instance, in instance order.
    #[must_use]
    pub fn groups(&self) -> Vec<AffinityGroup> {
        match self {
            Self::Groups(groups) => groups.clone(),
            Self::Stride {
                instances,
                cores_per_instance,
                first_core,
            } => (0..*instances)
                .map(|i| {
                    let start = first_core + i * cores_per_instance;
                    AffinityGroup::new((start..start + cores_per_instance).collect())
                })
                .collect(),
        }
    }
}

/// One benchmark run: a profile, the instances to start and the script they receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDefinition {
    /// Name of the configuration profile every instance uses.
    pub configuration: String,

    /// One affinity group per instance.
    pub affinity: AffinityLayout,

    /// Commands sent to every instance, in order.
    #[serde(default)]
    pub commands: Vec<String>,
}

/// A labeled pattern used to pull a metric out of engine output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeRuleConfig {
    /// Metric the captured value is recorded under.
    pub metric: String,
    /// Regular expression with a `data` named group or a first capture group.
    pub pattern: String,
}

fn default_scrape_rules() -> Vec<ScrapeRuleConfig> {
    vec![
        ScrapeRuleConfig {
            metric: "TPS".to_string(),
            pattern: r"MQTh/s:[ ]*\((?P<data>[0-9.]*)\)".to_string(),
        },
        ScrapeRuleConfig {
            metric: "TPS".to_string(),
            pattern: r"TPS:[ ]*\((?P<data>[0-9.]*)\)".to_string(),
        },
    ]
}

/// Complete harness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Harness settings.
    #[serde(default)]
    pub harness: HarnessSettings,

    /// Engine settings.
    #[serde(default)]
    pub engine: EngineSettings,

    /// Configuration profiles by name.
    #[serde(default)]
    pub configurations: BTreeMap<String, ConfigurationProfile>,

    /// Run definitions by run name. Runs execute in name order.
    #[serde(default)]
    pub runs: BTreeMap<String, RunDefinition>,

    /// Scrape rules applied to every instance log, in order.
    #[serde(default = "default_scrape_rules", rename = "scrape")]
    pub scrape_rules: Vec<ScrapeRuleConfig>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            harness: HarnessSettings::default(),
            engine: EngineSettings::default(),
            configurations: BTreeMap::new(),
            runs: BTreeMap::new(),
            scrape_rules: default_scrape_rules(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: HarnessConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Look up a configuration profile by name.
    pub fn profile(&self, name: &str) -> Result<&ConfigurationProfile, ConfigError> {
        self.configurations
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))
    }

    /// Validate the configuration structure without touching the filesystem.
    ///
    /// Prerequisite paths (engine, template, temp root) are checked when an
    /// instance is provisioned, not here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, run) in &self.runs {
            validate_run(name, run, &self.configurations, self.harness.port_range)?;
        }
        for rule in &self.scrape_rules {
            let pattern =
                regex::Regex::new(&rule.pattern).map_err(|source| ConfigError::ScrapePattern {
                    metric: rule.metric.clone(),
                    source,
                })?;
            if pattern.captures_len() < 2 {
                return Err(ConfigError::ValidationError(format!(
                    "Scrape pattern for {} has no capture group",
                    rule.metric
                )));
            }
        }
        if self.harness.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Runs in execution order, optionally restricted to the given names.
    pub fn selected_runs<'a>(
        &'a self,
        only: &[String],
    ) -> Result<Vec<(&'a str, &'a RunDefinition)>, ConfigError> {
        if let Some(missing) = only.iter().find(|name| !self.runs.contains_key(*name)) {
            return Err(ConfigError::ValidationError(format!(
                "Unknown run: {missing}"
            )));
        }
        Ok(self
            .runs
            .iter()
            .filter(|(name, _)| only.is_empty() || only.contains(name))
            .map(|(name, run)| (name.as_str(), run))
            .collect())
    }
}

fn validate_run(
    name: &str,
    run: &RunDefinition,
    profiles: &BTreeMap<String, ConfigurationProfile>,
    ports: PortRange,
) -> Result<(), ConfigError> {
    if !profiles.contains_key(&run.configuration) {
        return Err(ConfigError::ValidationError(format!(
            "Run {name} references unknown configuration {}",
            run.configuration
        )));
    }
    // Checked on the layout itself; groups are only built once it is known to be bounded.
    let instances = run.affinity.instance_count();
    if instances == 0 {
        return Err(ConfigError::ValidationError(format!(
            "Run {name} has no affinity groups"
        )));
    }
    if instances > ports.count() {
        return Err(ConfigError::ValidationError(format!(
            "Run {name} needs {instances} ports but the range {ports} only has {}",
            ports.count()
        )));
    }

    let limit = core_limit();
    match &run.affinity {
        AffinityLayout::Groups(groups) => {
            if let Some(i) = groups.iter().position(AffinityGroup::is_empty) {
                return Err(ConfigError::ValidationError(format!(
                    "Run {name} has an empty affinity group at position {i}"
                )));
            }
            if let Some(core) = groups
                .iter()
                .flat_map(AffinityGroup::cores)
                .find(|&&core| core >= limit)
            {
                return Err(ConfigError::ValidationError(format!(
                    "Run {name} uses core {core}, but only {limit} cores can be addressed"
                )));
            }
        }
        AffinityLayout::Stride {
            instances,
            cores_per_instance,
            first_core,
        } => {
            if *cores_per_instance == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "Run {name} has an empty affinity group at position 0"
                )));
            }
            let end = instances
                .checked_mul(*cores_per_instance)
                .and_then(|n| n.checked_add(*first_core));
            if !matches!(end, Some(end) if end <= limit) {
                return Err(ConfigError::ValidationError(format!(
                    "Run {name} stride layout extends beyond the {limit} addressable cores"
                )));
            }
        }
    }
    Ok(())
}

/// Number of CPU cores an affinity mask can address.
#[must_use]
pub fn core_limit() -> usize {
    nix::sched::CpuSet::count()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[harness]
output = "results.log"
port_range = [7000, 7100]

[engine]
path = "/opt/shore/shore_kits"

[configurations.tpcc-1]
sf = 1
bufpoolsize = 2097152
system = "baseline"

[configurations.tpcc-16]
sf = 16
bufpoolsize = 4194304

[runs.tpcc-1-1]
configuration = "tpcc-1"
affinity = [[0], [1], [2]]
commands = ["sli", "elr", "measure 1 1 1 30 1 3"]

[runs.tpcc-16-16]
configuration = "tpcc-16"
affinity = { instances = 1, cores_per_instance = 16 }
commands = ["measure 16 1 16 30 1 3"]
"#;

    #[test]
    fn test_parse_minimal_config() -> Result<(), Box<dyn std::error::Error>> {
        let config = HarnessConfig::parse("")?;
        assert!(config.runs.is_empty());
        assert_eq!(config.harness.port_range, PortRange::default());
        assert_eq!(config.engine.ready_marker, "Waiting for client connection");
        assert_eq!(config.scrape_rules.len(), 2);
        Ok(())
    }

    #[test]
    fn test_parse_full_config() -> Result<(), Box<dyn std::error::Error>> {
        let config = HarnessConfig::parse(SAMPLE)?;
        assert_eq!(config.harness.output, PathBuf::from("results.log"));
        assert_eq!(config.harness.port_range, PortRange { min: 7000, max: 7100 });
        assert_eq!(config.runs.len(), 2);

        let profile = config.profile("tpcc-1")?;
        assert_eq!(profile.get("sf"), Some(&ParamValue::Integer(1)));
        assert_eq!(
            profile.get("system"),
            Some(&ParamValue::Text("baseline".to_string()))
        );

        let run = &config.runs["tpcc-1-1"];
        assert_eq!(run.affinity.groups().len(), 3);
        assert_eq!(run.commands[2], "measure 1 1 1 30 1 3");
        Ok(())
    }

    #[test]
    fn test_stride_layout() {
        let layout = AffinityLayout::Stride {
            instances: 4,
            cores_per_instance: 2,
            first_core: 8,
        };
        let groups = layout.groups();
        assert_eq!(groups.len(), 4);
        assert_eq!(groups[0].cores(), &[8, 9]);
        assert_eq!(groups[3].cores(), &[14, 15]);
        assert_eq!(groups[3].to_string(), "14,15");
    }

    #[test]
    fn test_unknown_configuration_rejected() {
        let toml = r#"
[runs.orphan]
configuration = "missing"
affinity = [[0]]
"#;
        let Err(err) = HarnessConfig::parse(toml) else {
            panic!("expected unknown configuration to fail");
        };
        assert!(err.to_string().contains("unknown configuration missing"));
    }

    #[test]
    fn test_empty_affinity_group_rejected() {
        let toml = r#"
[configurations.c]
sf = 1

[runs.r]
configuration = "c"
affinity = [[0], []]
"#;
        assert!(HarnessConfig::parse(toml).is_err());
    }

    #[test]
    fn test_port_range_too_small() {
        let toml = r#"
[harness]
port_range = [5000, 5001]

[configurations.c]
sf = 1

[runs.r]
configuration = "c"
affinity = { instances = 3, cores_per_instance = 1 }
"#;
        let Err(err) = HarnessConfig::parse(toml) else {
            panic!("expected port exhaustion to fail");
        };
        assert!(err.to_string().contains("needs 3 ports"));
    }

    #[test]
    fn test_oversized_stride_rejected() {
        for affinity in [
            "{ instances = 5, cores_per_instance = 4611686018427387904 }",
            "{ instances = 2, cores_per_instance = 1, first_core = 9223372036854775807 }",
            "{ instances = 2, cores_per_instance = 0 }",
            "{ instances = 0, cores_per_instance = 1 }",
        ] {
            let toml = format!(
                r#"
[configurations.c]
sf = 1

[runs.r]
configuration = "c"
affinity = {affinity}
"#
            );
            let Err(err) = HarnessConfig::parse(&toml) else {
                panic!("expected stride {affinity} to be rejected");
            };
            assert!(matches!(err, ConfigError::ValidationError(_)), "{err}");
        }
    }

    #[test]
    fn test_stride_within_core_limit_accepted() -> Result<(), Box<dyn std::error::Error>> {
        let layout = AffinityLayout::Stride {
            instances: 2,
            cores_per_instance: core_limit() / 2,
            first_core: 0,
        };
        let run = RunDefinition {
            configuration: "c".to_string(),
            affinity: layout,
            commands: Vec::new(),
        };
        let profiles = BTreeMap::from([("c".to_string(), ConfigurationProfile::default())]);
        validate_run("r", &run, &profiles, PortRange::default())?;

        let mut too_far = run.clone();
        too_far.affinity = AffinityLayout::Groups(vec![AffinityGroup::new(vec![core_limit()])]);
        assert!(validate_run("r", &too_far, &profiles, PortRange::default()).is_err());
        Ok(())
    }

    #[test]
    fn test_inverted_port_range_rejected() {
        let toml = r#"
[harness]
port_range = [6000, 5000]
"#;
        assert!(HarnessConfig::parse(toml).is_err());
    }

    #[test]
    fn test_port_range_from_str() {
        assert_eq!(
            "5000,6000".parse::<PortRange>().ok(),
            Some(PortRange { min: 5000, max: 6000 })
        );
        assert!("6000,5000".parse::<PortRange>().is_err());
        assert!("5000".parse::<PortRange>().is_err());
    }

    #[test]
    fn test_scrape_pattern_without_group_rejected() {
        let toml = r#"
[[scrape]]
metric = "TPS"
pattern = "TPS: [0-9.]+"
"#;
        let Err(err) = HarnessConfig::parse(toml) else {
            panic!("expected pattern without capture group to fail");
        };
        assert!(err.to_string().contains("no capture group"));
    }

    #[test]
    fn test_selected_runs_in_name_order() -> Result<(), Box<dyn std::error::Error>> {
        let config = HarnessConfig::parse(SAMPLE)?;
        let all: Vec<&str> = config.selected_runs(&[])?.into_iter().map(|(n, _)| n).collect();
        assert_eq!(all, vec!["tpcc-1-1", "tpcc-16-16"]);

        let only = config.selected_runs(&["tpcc-16-16".to_string()])?;
        assert_eq!(only.len(), 1);

        assert!(config.selected_runs(&["nope".to_string()]).is_err());
        Ok(())
    }

    #[test]
    fn test_engine_args_substitute_port() {
        let engine = EngineSettings::default();
        assert_eq!(engine.args_for_port(5123), vec!["-n", "-p", "5123"]);
    }

    #[test]
    fn test_bundled_config_parses() -> Result<(), Box<dyn std::error::Error>> {
        let config = HarnessConfig::parse(include_str!("../../kitbench.toml"))?;
        assert_eq!(config.configurations.len(), 4);
        let names: Vec<_> = config.runs.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["tpcc-1-1", "tpcc-16-16", "tpcc-2-2", "tpcc-4-4"]);
        assert_eq!(config.runs["tpcc-2-2"].affinity.groups().len(), 8);
        assert_eq!(
            config.runs["tpcc-4-4"].affinity.groups()[1],
            AffinityGroup::new(vec![4, 5, 6, 7])
        );
        assert_eq!(config.runs["tpcc-16-16"].affinity.groups()[0].len(), 16);
        Ok(())
    }
}
