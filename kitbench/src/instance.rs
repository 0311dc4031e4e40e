//! Lifecycle of a single engine instance.
//!
//! An [`Instance`] owns one engine process together with everything scoped to
//! it: the working directory tree, the generated configuration, the captured
//! output log and the control socket.
//!
//! # Process ownership
//!
//! The tokio `Child` handle is moved into a background task right after spawn.
//! That task waits for the process, appends the failure marker to the log if
//! the exit was unsuccessful, and reports the exit code over a oneshot
//! channel. The instance itself keeps only the pid, published through its
//! [`ProcessSlot`], which is also how the interrupt handler reaches it.

use crate::config::{AffinityGroup, ConfigError, ConfigurationProfile, EngineSettings};
use crate::materialize::ConfigMaterializer;
use crate::readiness::{LogTailProbe, Readiness, ReadinessProbe};
use crate::registry::ProcessSlot;
use crate::state::InstanceState;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Instance errors.
#[derive(Debug, Error)]
pub enum InstanceError {
    /// A prerequisite is missing, the working directory is unusable, or the
    /// engine configuration could not be generated in it.
    #[error("{0}")]
    Setup(String),

    /// The engine did not come up.
    #[error("{message}. Check {} for details.", .log.display())]
    Spawn { message: String, log: PathBuf },

    /// The control connection could not be established.
    #[error("Failed to connect to instance on port {port}: {source}")]
    Connect { port: u16, source: std::io::Error },

    /// Operation called from a state it is not defined for.
    #[error("Cannot {op} an instance in state {state}")]
    InvalidState {
        op: &'static str,
        state: InstanceState,
    },

    #[error("Failed generating configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// File names inside an instance directory.
const CONFIG_FILE: &str = "shore.conf";
const LOG_FILE: &str = "shore.log";
const DEVICE_DIR: &str = "databases";

/// Paths owned by one instance, all under `<temp-root>/<config>-<port>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceLayout {
    /// The instance working directory.
    pub dir: PathBuf,
    /// Generated engine configuration.
    pub config_file: PathBuf,
    /// Captured stdout and stderr of the engine.
    pub log_file: PathBuf,
    /// Storage files.
    pub device_dir: PathBuf,
    /// Write-ahead log directory.
    pub log_dir: PathBuf,
}

impl InstanceLayout {
    #[must_use]
    pub fn new(temp_root: &Path, config_name: &str, port: u16) -> Self {
        let dir = temp_root.join(format!("{config_name}-{port}"));
        Self {
            config_file: dir.join(CONFIG_FILE),
            log_file: dir.join(LOG_FILE),
            device_dir: dir.join(DEVICE_DIR),
            log_dir: dir.join(format!("log-{config_name}")),
            dir,
        }
    }
}

/// Identity of one instance within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    /// Configuration profile name.
    pub config_name: String,
    /// Port the engine listens on for control commands.
    pub port: u16,
    /// Cores the engine is pinned to.
    pub affinity: AffinityGroup,
}

/// Everything `provision` needs beyond the instance identity.
#[derive(Debug, Clone, Copy)]
pub struct ProvisionContext<'a> {
    pub temp_root: &'a Path,
    pub template: &'a Path,
    pub engine: &'a EngineSettings,
    pub profiles: &'a BTreeMap<String, ConfigurationProfile>,
}

/// One engine process and the resources scoped to it.
#[derive(Debug)]
pub struct Instance {
    spec: InstanceSpec,
    layout: InstanceLayout,
    engine: EngineSettings,
    state: InstanceState,
    slot: Arc<ProcessSlot>,
    socket: Option<TcpStream>,
    exit_rx: Option<oneshot::Receiver<i32>>,
    exit_code: Option<i32>,
    output: Option<String>,
}

impl Instance {
    /// Validate prerequisites, create the directory tree and generate the
    /// engine configuration.
    ///
    /// The working directory may already exist, but only if it is empty.
    pub fn provision(spec: InstanceSpec, ctx: ProvisionContext<'_>) -> Result<Self, InstanceError> {
        if !ctx.temp_root.exists() {
            return Err(InstanceError::Setup(format!(
                "Temporary directory {} does not exist",
                ctx.temp_root.display()
            )));
        }
        if !ctx.engine.path.is_file() {
            return Err(InstanceError::Setup(format!(
                "Cannot find engine executable {}",
                ctx.engine.path.display()
            )));
        }
        if !ctx.template.is_file() {
            return Err(InstanceError::Setup(format!(
                "Cannot find template file {}",
                ctx.template.display()
            )));
        }

        let layout = InstanceLayout::new(ctx.temp_root, &spec.config_name, spec.port);
        if layout.dir.exists() && !layout.dir.is_dir() {
            return Err(InstanceError::Setup(format!(
                "Temporary directory {} exists and is not a directory",
                layout.dir.display()
            )));
        }
        if layout.dir.exists() {
            if std::fs::read_dir(&layout.dir)?.next().is_some() {
                return Err(InstanceError::Setup(format!(
                    "Temporary directory {} is not empty",
                    layout.dir.display()
                )));
            }
        } else {
            std::fs::create_dir_all(&layout.dir)?;
        }
        std::fs::create_dir(&layout.device_dir)?;
        std::fs::create_dir(&layout.log_dir)?;

        ConfigMaterializer::new(ctx.template, ctx.profiles)
            .materialize(&spec.config_name, &spec.affinity, &layout)
            .map_err(|e| match e {
                ConfigError::TemplateCopy { .. } | ConfigError::Generate { .. } => {
                    InstanceError::Setup(e.to_string())
                }
                other => InstanceError::Config(other),
            })?;

        // The engine runs with the instance directory as cwd.
        let mut engine = ctx.engine.clone();
        engine.path = std::fs::canonicalize(&engine.path)?;

        let slot = Arc::new(ProcessSlot::new(format!("{}-{}", spec.config_name, spec.port)));
        debug!("Provisioned {} at {}", slot.label(), layout.dir.display());

        Ok(Self {
            spec,
            layout,
            engine,
            state: InstanceState::Provisioned,
            slot,
            socket: None,
            exit_rx: None,
            exit_code: None,
            output: None,
        })
    }

    #[must_use]
    pub fn spec(&self) -> &InstanceSpec {
        &self.spec
    }

    #[must_use]
    pub fn layout(&self) -> &InstanceLayout {
        &self.layout
    }

    #[must_use]
    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// Shared process handle, as tracked by the registry.
    #[must_use]
    pub fn slot(&self) -> &Arc<ProcessSlot> {
        &self.slot
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.slot.pid()
    }

    /// Exit code of the engine, once it has been waited for.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    fn require(&self, op: &'static str, allowed: &[InstanceState]) -> Result<(), InstanceError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(InstanceError::InvalidState {
                op,
                state: self.state,
            })
        }
    }

    /// Start the engine in the background.
    ///
    /// Output goes to the instance log; the call returns as soon as the child
    /// exists.
    pub fn spawn(&mut self) -> Result<(), InstanceError> {
        self.require("spawn", &[InstanceState::Provisioned])?;

        let log = File::create(&self.layout.log_file)?;
        let mut cmd = Command::new(&self.engine.path);
        cmd.args(self.engine.args_for_port(self.spec.port))
            .current_dir(&self.layout.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log));
        if self.engine.pin_affinity {
            pin_to_cores(&mut cmd, &self.spec.affinity)?;
        }

        let mut child = cmd.spawn().map_err(|e| InstanceError::Spawn {
            message: format!("Failed to start {}: {e}", self.engine.path.display()),
            log: self.layout.log_file.clone(),
        })?;
        let Some(pid) = child.id() else {
            return Err(InstanceError::Spawn {
                message: format!("Engine for {} exited before reporting a pid", self.slot.label()),
                log: self.layout.log_file.clone(),
            });
        };
        self.slot.set_pid(pid);
        info!(
            "Started {} on cores {} (pid: {})",
            self.slot.label(),
            self.spec.affinity,
            pid
        );

        // Monitor the child in a background task; the Child handle lives there.
        let (exit_tx, exit_rx) = oneshot::channel();
        let name = self.slot.label().to_string();
        let log_file = self.layout.log_file.clone();
        let failure_marker = self.engine.failure_marker.clone();
        let slot = self.slot.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            // Reaped (or unwaitable): the pid must not be signalled any more.
            slot.mark_exited();
            let code = match status {
                Ok(status) => {
                    let code = status.code().unwrap_or(-1);
                    if status.success() {
                        debug!("{} exited cleanly (pid: {})", name, pid);
                    } else {
                        warn!("{} exited with {} (pid: {})", name, status, pid);
                        if let Err(e) = append_line(&log_file, &failure_marker) {
                            warn!("Failed to mark {} as failed: {}", log_file.display(), e);
                        }
                    }
                    code
                }
                Err(e) => {
                    warn!("Error waiting for {}: {}", name, e);
                    -1
                }
            };
            let _ = exit_tx.send(code);
        });

        self.exit_rx = Some(exit_rx);
        self.state = InstanceState::Spawned;
        Ok(())
    }

    /// Log-tail probe configured with this instance's markers.
    #[must_use]
    pub fn log_probe(&self) -> LogTailProbe {
        LogTailProbe::new(
            &self.layout.log_file,
            &self.engine.ready_marker,
            &self.engine.failure_marker,
        )
    }

    /// Poll the captured log until the engine is ready, fails, or `budget`
    /// runs out.
    pub async fn wait_ready(
        &mut self,
        poll_interval: Duration,
        budget: Duration,
    ) -> Result<(), InstanceError> {
        let probe = self.log_probe();
        self.wait_ready_with(&probe, poll_interval, budget).await
    }

    /// Like [`Instance::wait_ready`], with a caller-supplied probe.
    pub async fn wait_ready_with(
        &mut self,
        probe: &dyn ReadinessProbe,
        poll_interval: Duration,
        budget: Duration,
    ) -> Result<(), InstanceError> {
        self.require("wait for", &[InstanceState::Spawned])?;

        let deadline = tokio::time::Instant::now() + budget;
        loop {
            tokio::time::sleep(poll_interval).await;
            match probe.probe()? {
                Readiness::Ready => {
                    info!("{} is ready", self.slot.label());
                    self.state = InstanceState::Ready;
                    return Ok(());
                }
                Readiness::Failed => {
                    self.state = InstanceState::Failed;
                    return Err(InstanceError::Spawn {
                        message: "Failed spawning engine instance".to_string(),
                        log: self.layout.log_file.clone(),
                    });
                }
                Readiness::Unknown if self.poll_exit().is_some() => {
                    self.state = InstanceState::Failed;
                    return Err(InstanceError::Spawn {
                        message: format!(
                            "Engine exited with code {} before becoming ready",
                            self.exit_code.unwrap_or(-1)
                        ),
                        log: self.layout.log_file.clone(),
                    });
                }
                Readiness::Unknown if tokio::time::Instant::now() >= deadline => {
                    self.state = InstanceState::Failed;
                    return Err(InstanceError::Spawn {
                        message: format!(
                            "Engine instance not ready after {}s",
                            budget.as_secs_f64()
                        ),
                        log: self.layout.log_file.clone(),
                    });
                }
                Readiness::Unknown => {}
            }
        }
    }

    /// Open the control connection.
    pub async fn connect(&mut self, timeout: Duration) -> Result<(), InstanceError> {
        self.require("connect", &[InstanceState::Ready])?;

        let port = self.spec.port;
        let stream = tokio::time::timeout(timeout, TcpStream::connect((Ipv4Addr::LOCALHOST, port)))
            .await
            .map_err(|_| InstanceError::Connect {
                port,
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
            })?
            .map_err(|source| InstanceError::Connect { port, source })?;
        debug!("Connected to {}", self.slot.label());

        self.socket = Some(stream);
        self.state = InstanceState::Connected;
        Ok(())
    }

    /// Send one command line. Nothing is read back.
    pub async fn send(&mut self, command: &str) -> Result<(), InstanceError> {
        self.require("send to", &[InstanceState::Connected])?;
        self.write_line(command).await
    }

    async fn write_line(&mut self, line: &str) -> Result<(), InstanceError> {
        let Some(socket) = self.socket.as_mut() else {
            return Err(InstanceError::InvalidState {
                op: "write to",
                state: self.state,
            });
        };
        socket.write_all(format!("{line}\n").as_bytes()).await?;
        Ok(())
    }

    /// Ask the engine to shut down and close the socket.
    pub async fn stop(&mut self) -> Result<(), InstanceError> {
        self.require("stop", &[InstanceState::Connected])?;

        let quit = self.engine.quit_command.clone();
        self.write_line(&quit).await?;
        self.write_line("").await?;
        if let Some(mut socket) = self.socket.take() {
            socket.shutdown().await?;
        }
        self.state = InstanceState::Stopping;
        Ok(())
    }

    /// Wait for the engine process to exit. Returns its exit code.
    pub async fn wait_exit(&mut self) -> Result<i32, InstanceError> {
        self.require("wait for exit of", &[InstanceState::Stopping])?;

        let code = match self.exit_rx.take() {
            Some(rx) => rx.await.unwrap_or(-1),
            None => -1,
        };
        info!("{} finished with exit code {}", self.slot.label(), code);
        self.exit_code = Some(code);
        self.state = InstanceState::Stopped;
        Ok(code)
    }

    /// Read the complete captured output.
    pub async fn collect(&mut self) -> Result<&str, InstanceError> {
        self.require("collect", &[InstanceState::Stopped])?;

        let bytes = tokio::fs::read(&self.layout.log_file).await?;
        self.state = InstanceState::Collected;
        Ok(self
            .output
            .insert(String::from_utf8_lossy(&bytes).into_owned())
            .as_str())
    }

    /// Remove the working directory. Removal errors are logged and ignored.
    pub fn clean(&mut self) -> Result<(), InstanceError> {
        self.require("clean", &[InstanceState::Collected, InstanceState::Failed])?;

        if let Err(e) = std::fs::remove_dir_all(&self.layout.dir) {
            debug!("Ignoring failure to remove {}: {}", self.layout.dir.display(), e);
        }
        self.state = InstanceState::Cleaned;
        Ok(())
    }

    /// Force-terminate the engine with SIGKILL.
    ///
    /// Returns the pid when this call delivered the signal.
    pub fn kill(&mut self) -> Result<Option<u32>, InstanceError> {
        if self.state == InstanceState::Cleaned {
            return Err(InstanceError::InvalidState {
                op: "kill",
                state: self.state,
            });
        }
        self.socket = None;
        self.state = InstanceState::Failed;
        Ok(self.slot.kill())
    }

    /// Wait for the engine of a killed or failed instance to be reaped.
    pub async fn reap(&mut self) -> Option<i32> {
        if let Some(rx) = self.exit_rx.take() {
            if let Ok(code) = rx.await {
                self.exit_code = Some(code);
            }
        }
        self.exit_code
    }

    /// Exit code of the engine if the monitor has already reported it.
    fn poll_exit(&mut self) -> Option<i32> {
        let rx = self.exit_rx.as_mut()?;
        let code = match rx.try_recv() {
            Ok(code) => code,
            Err(oneshot::error::TryRecvError::Empty) => return None,
            Err(oneshot::error::TryRecvError::Closed) => -1,
        };
        self.exit_rx = None;
        self.exit_code = Some(code);
        Some(code)
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    write!(file, "\n{line}\n")?;
    file.flush()
}

/// Restrict the child to `affinity` before it execs the engine.
fn pin_to_cores(cmd: &mut Command, affinity: &AffinityGroup) -> Result<(), InstanceError> {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let mut set = CpuSet::new();
    for &core in affinity.cores() {
        set.set(core).map_err(|e| {
            InstanceError::Setup(format!("Cannot pin to core {core}: {e}"))
        })?;
    }
    // SAFETY: the closure only issues the sched_setaffinity syscall, which is
    // async-signal-safe, on a CpuSet built before the fork.
    unsafe {
        cmd.pre_exec(move || {
            sched_setaffinity(Pid::from_raw(0), &set).map_err(std::io::Error::from)
        });
    }
    Ok(())
}
