//! kitbench - multi-instance benchmark harness.
//!
//! This is the main entry point, which:
//! - Loads the run table and settings from TOML
//! - Applies command-line overrides
//! - Installs the Ctrl+C handler that kills tracked engine instances
//! - Executes the selected runs in name order

use anyhow::{Context, Result};
use clap::Parser;
use kitbench::config::{HarnessConfig, PortRange};
use kitbench::{Driver, InstanceRegistry, InterruptHandler};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// kitbench - run database engine benchmarks across many pinned instances
#[derive(Parser, Debug)]
#[command(name = "kitbench")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Output log file to use for results
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Template file to use for generating the engine configuration
    #[arg(short, long, value_name = "FILE")]
    template: Option<PathBuf>,

    /// Location of the engine executable
    #[arg(short = 'p', long, value_name = "PATH")]
    engine: Option<PathBuf>,

    /// Temporary directory to use for databases
    #[arg(short = 'T', long, value_name = "DIR")]
    temp_dir: Option<PathBuf>,

    /// Port range to use, comma-separated
    #[arg(short = 'P', long, value_name = "MIN,MAX")]
    ports: Option<PortRange>,

    /// Only execute the named run (repeatable)
    #[arg(short, long = "run", value_name = "NAME")]
    runs: Vec<String>,

    /// List the configured runs and exit
    #[arg(short, long)]
    list: bool,

    /// Run in verbose mode (debug logging)
    #[arg(short, long)]
    verbose: bool,
}

/// Load configuration from the given path or default locations.
fn load_config(path: Option<PathBuf>) -> Result<HarnessConfig> {
    let config_path = path.unwrap_or_else(|| {
        // Check for config in current directory first
        let local = PathBuf::from("kitbench.toml");
        if local.exists() {
            return local;
        }

        // Then check XDG config directory
        if let Some(dirs) = directories::ProjectDirs::from("", "", "kitbench") {
            let xdg_config = dirs.config_dir().join("kitbench.toml");
            if xdg_config.exists() {
                return xdg_config;
            }
        }

        local
    });

    info!("Loading configuration from {}", config_path.display());
    Ok(HarnessConfig::load(&config_path)?)
}

/// Fold command-line overrides into the loaded configuration.
fn apply_overrides(config: &mut HarnessConfig, args: &Args) -> Result<()> {
    if let Some(output) = &args.output {
        config.harness.output.clone_from(output);
    }
    if let Some(template) = &args.template {
        config.harness.template.clone_from(template);
    }
    if let Some(engine) = &args.engine {
        config.engine.path.clone_from(engine);
    }
    if let Some(temp_dir) = &args.temp_dir {
        config.harness.temp_dir.clone_from(temp_dir);
    }
    if let Some(ports) = args.ports {
        config.harness.port_range = ports;
    }
    config
        .validate()
        .context("Configuration invalid after applying overrides")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .init();

    let mut config = load_config(args.config.clone()).context("Failed to load configuration")?;
    apply_overrides(&mut config, &args)?;

    if args.list {
        for (name, run) in &config.runs {
            println!(
                "{}\t{}\t{} instance(s)\t{}",
                name,
                run.configuration,
                run.affinity.groups().len(),
                run.commands.join("; ")
            );
        }
        return Ok(());
    }

    let registry = Arc::new(InstanceRegistry::new());
    let _interrupt = InterruptHandler::new(registry.clone())
        .install()
        .context("Failed to install interrupt handler")?;

    let driver = Driver::new(config, registry)?;
    driver.log_settings();

    match driver.run(&args.runs).await {
        Ok(summaries) => {
            info!(
                "Completed {} run(s); results in {}",
                summaries.len(),
                driver.config().harness.output.display()
            );
            Ok(())
        }
        Err(e) => {
            error!("ERROR: {}", e);
            error!("       (Run with --help to view configuration options.)");
            std::process::exit(1);
        }
    }
}
