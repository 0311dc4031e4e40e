//! Lifecycle states of a benchmark instance.

use serde::{Deserialize, Serialize};

/// The lifecycle state of an engine instance.
///
/// Instances move forward through these states one operation at a time and
/// may drop to `Failed` from anywhere before `Cleaned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Working directory and configuration exist; no process yet.
    Provisioned,
    /// The engine process has been started.
    Spawned,
    /// The engine reported that it accepts client connections.
    Ready,
    /// The control socket is open.
    Connected,
    /// The shutdown command was sent and the socket closed.
    Stopping,
    /// The engine process has exited.
    Stopped,
    /// The captured output has been read back.
    Collected,
    /// The working directory has been removed.
    Cleaned,
    /// Startup failed or the process was killed.
    Failed,
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provisioned => write!(f, "Provisioned"),
            Self::Spawned => write!(f, "Spawned"),
            Self::Ready => write!(f, "Ready"),
            Self::Connected => write!(f, "Connected"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Collected => write!(f, "Collected"),
            Self::Cleaned => write!(f, "Cleaned"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

impl InstanceState {
    /// Check if an engine process may still be alive in this state.
    #[must_use]
    pub fn has_process(&self) -> bool {
        matches!(
            self,
            Self::Spawned | Self::Ready | Self::Connected | Self::Stopping
        )
    }

    /// Check if the working directory can be removed from this state.
    #[must_use]
    pub fn can_clean(&self) -> bool {
        matches!(self, Self::Collected | Self::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_state_display() {
        assert_eq!(InstanceState::Provisioned.to_string(), "Provisioned");
        assert_eq!(InstanceState::Stopping.to_string(), "Stopping");
        assert_eq!(InstanceState::Failed.to_string(), "Failed");
    }

    #[test]
    fn test_instance_state_predicates() {
        assert!(!InstanceState::Provisioned.has_process());
        assert!(InstanceState::Connected.has_process());
        assert!(!InstanceState::Stopped.has_process());

        assert!(InstanceState::Collected.can_clean());
        assert!(InstanceState::Failed.can_clean());
        assert!(!InstanceState::Stopped.can_clean());
        assert!(!InstanceState::Cleaned.can_clean());
    }
}
