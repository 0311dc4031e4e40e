//! Generation of per-instance engine configuration files.
//!
//! A generated file is the template verbatim followed by an auto-generated
//! block: worker and loader counts sized to the affinity group, the selected
//! configuration, instance-scoped device and log paths, and every profile
//! entry namespaced by the configuration name.

use crate::config::{AffinityGroup, ConfigError, ConfigurationProfile};
use crate::instance::InstanceLayout;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;

/// Header line that opens the generated block.
pub const GENERATED_HEADER: &str = "# AUTO-GENERATED ENTRIES";

/// Turns a named profile plus a template into an engine configuration file.
#[derive(Debug, Clone, Copy)]
pub struct ConfigMaterializer<'a> {
    template: &'a Path,
    profiles: &'a BTreeMap<String, ConfigurationProfile>,
}

impl<'a> ConfigMaterializer<'a> {
    #[must_use]
    pub fn new(template: &'a Path, profiles: &'a BTreeMap<String, ConfigurationProfile>) -> Self {
        Self { template, profiles }
    }

    /// Render the generated block for one instance.
    pub fn generated_section(
        &self,
        config_name: &str,
        affinity: &AffinityGroup,
        layout: &InstanceLayout,
    ) -> Result<String, ConfigError> {
        let profile = self
            .profiles
            .get(config_name)
            .ok_or_else(|| ConfigError::UnknownProfile(config_name.to_string()))?;
        Ok(render_section(config_name, profile, affinity, layout))
    }

    /// Write the configuration file at `layout.config_file`.
    ///
    /// A failure part way through may leave a truncated file behind.
    pub fn materialize(
        &self,
        config_name: &str,
        affinity: &AffinityGroup,
        layout: &InstanceLayout,
    ) -> Result<(), ConfigError> {
        let section = self.generated_section(config_name, affinity, layout)?;
        let target = &layout.config_file;

        std::fs::copy(self.template, target).map_err(|source| ConfigError::TemplateCopy {
            template: self.template.to_path_buf(),
            target: target.clone(),
            source,
        })?;

        let generate_err = |source| ConfigError::Generate {
            path: target.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .append(true)
            .open(target)
            .map_err(generate_err)?;
        file.write_all(section.as_bytes()).map_err(generate_err)?;
        file.flush().map_err(generate_err)?;
        Ok(())
    }
}

fn render_section(
    config_name: &str,
    profile: &ConfigurationProfile,
    affinity: &AffinityGroup,
    layout: &InstanceLayout,
) -> String {
    let workers = affinity.len();
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write!(out, "\n\n{GENERATED_HEADER}\n");
    let _ = writeln!(out, "db-workers = {workers}");
    let _ = writeln!(out, "db-loaders = {workers}");
    let _ = writeln!(out, "db-config = {config_name}");
    let _ = writeln!(
        out,
        "{config_name}-device = {}/db-{config_name}",
        layout.device_dir.display()
    );
    let _ = writeln!(out, "{config_name}-logdir = {}", layout.log_dir.display());
    for (key, value) in profile.iter() {
        let _ = writeln!(out, "{config_name}-{key} = {value}");
    }
    out
}
