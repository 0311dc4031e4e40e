//! Process-wide registry of live engine instances.
//!
//! The coordinator is the only writer; the interrupt handler reads it from an
//! asynchronous signal task. Writers publish a whole new snapshot with an
//! atomic pointer swap, so a reader sees either the old list or the new one,
//! never a list in the middle of being built, and never waits on a lock.

use arc_swap::ArcSwap;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared handle on one instance's engine process.
///
/// The pid is published once the process is spawned. A kill requested before
/// that point is remembered and delivered as soon as the pid appears; either
/// way SIGKILL reaches the process at most once.
#[derive(Debug)]
pub struct ProcessSlot {
    label: String,
    pid: AtomicU32,
    kill_requested: AtomicBool,
    signalled: AtomicBool,
    exited: AtomicBool,
}

impl ProcessSlot {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            pid: AtomicU32::new(0),
            kill_requested: AtomicBool::new(false),
            signalled: AtomicBool::new(false),
            exited: AtomicBool::new(false),
        }
    }

    /// Human-readable name of the instance, e.g. `tpcc-1-5123`.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Process id, once spawned.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Publish the pid of the freshly spawned process.
    pub fn set_pid(&self, pid: u32) {
        self.pid.store(pid, Ordering::SeqCst);
        if self.kill_requested.load(Ordering::SeqCst) {
            self.deliver(pid);
        }
    }

    /// Record that the process has exited and been reaped.
    ///
    /// The pid may be reused by an unrelated process from here on, so no
    /// signal is sent to it afterwards.
    pub fn mark_exited(&self) {
        self.exited.store(true, Ordering::SeqCst);
        self.signalled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// Check if a forced termination was requested.
    #[must_use]
    pub fn is_killed(&self) -> bool {
        self.kill_requested.load(Ordering::SeqCst)
    }

    /// Send SIGKILL to the process.
    ///
    /// Returns the pid when this call delivered the signal, `None` when the
    /// process was already signalled, has exited, or has not been spawned yet.
    pub fn kill(&self) -> Option<u32> {
        self.kill_requested.store(true, Ordering::SeqCst);
        let pid = self.pid()?;
        self.deliver(pid).then_some(pid)
    }

    fn deliver(&self, pid: u32) -> bool {
        if self.signalled.swap(true, Ordering::SeqCst) {
            return false;
        }
        let Ok(raw) = i32::try_from(pid) else {
            warn!("Pid {} of {} does not fit a pid_t", pid, self.label);
            return false;
        };
        if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGKILL) {
            // ESRCH: the process already exited and was reaped.
            warn!("Failed to send SIGKILL to {} (pid: {}): {}", self.label, pid, e);
        }
        true
    }
}

/// Snapshot-swapped list of the instances a run currently owns.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    live: ArcSwap<Vec<Arc<ProcessSlot>>>,
}

impl InstanceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole list, e.g. at the start of a run.
    pub fn replace(&self, slots: Vec<Arc<ProcessSlot>>) {
        self.live.store(Arc::new(slots));
    }

    /// Add one instance to the list.
    pub fn track(&self, slot: Arc<ProcessSlot>) {
        let mut next = Vec::clone(&self.live.load());
        debug!("Tracking {}", slot.label());
        next.push(slot);
        self.live.store(Arc::new(next));
    }

    /// Drop one instance from the list.
    pub fn release(&self, slot: &Arc<ProcessSlot>) {
        let next: Vec<_> = self
            .live
            .load()
            .iter()
            .filter(|s| !Arc::ptr_eq(s, slot))
            .cloned()
            .collect();
        debug!("Released {}", slot.label());
        self.live.store(Arc::new(next));
    }

    /// The current list. Never blocks.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<Arc<ProcessSlot>>> {
        self.live.load_full()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.live.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.load().is_empty()
    }

    /// SIGKILL every tracked process that has not been signalled yet.
    ///
    /// Returns the pids that were signalled by this call.
    pub fn kill_all(&self) -> Vec<u32> {
        self.snapshot().iter().filter_map(|slot| slot.kill()).collect()
    }
}
