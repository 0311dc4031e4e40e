//! User interrupt handling.
//!
//! On Ctrl+C every instance currently in the registry is sent SIGKILL and the
//! harness exits. Only the process that installed the handler acts on it.

use crate::registry::InstanceRegistry;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Exit status used after an interrupt, as a shell reports SIGINT.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Force-kills tracked instances on user interrupt.
#[derive(Debug, Clone)]
pub struct InterruptHandler {
    registry: Arc<InstanceRegistry>,
    owner_pid: u32,
}

impl InterruptHandler {
    /// Create a handler owned by the current process.
    #[must_use]
    pub fn new(registry: Arc<InstanceRegistry>) -> Self {
        Self {
            registry,
            owner_pid: std::process::id(),
        }
    }

    /// SIGKILL every tracked instance that has not been killed yet.
    ///
    /// Returns the pids signalled by this call. Does nothing when called from
    /// a process other than the owner.
    pub fn terminate_all(&self) -> Vec<u32> {
        if std::process::id() != self.owner_pid {
            return Vec::new();
        }
        let killed = self.registry.kill_all();
        for pid in &killed {
            warn!("Sent SIGKILL to {}", pid);
        }
        killed
    }

    /// Listen for SIGINT in the background; on delivery, terminate all
    /// tracked instances and exit the process.
    pub fn install(self) -> std::io::Result<JoinHandle<()>> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        Ok(tokio::spawn(async move {
            if sigint.recv().await.is_some() {
                info!("Received SIGINT (Ctrl+C)");
                self.terminate_all();
                std::process::exit(INTERRUPTED_EXIT_CODE);
            }
        }))
    }
}
