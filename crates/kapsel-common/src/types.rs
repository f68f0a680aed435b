//! Domain primitive types used across the kapsel workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::ID_LENGTH;

/// Unique identifier for a container instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a container ID from an existing string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random lowercase alphanumeric ID of fixed length.
    #[must_use]
    pub fn generate() -> Self {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(ID_LENGTH);
        Self(id)
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resource limits enforced through cgroups for one container run.
///
/// `None` means "leave this subsystem alone".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Memory limit as understood by the kernel, e.g. `100m`.
    pub memory_limit: Option<String>,
    /// Relative CPU share value.
    pub cpu_shares: Option<u64>,
    /// CPU quota as a percentage of one CPU.
    pub cpu_quota_percent: Option<u32>,
    /// CPU list, e.g. `0,1` or `0-3`.
    pub cpuset: Option<String>,
}

impl ResourceConfig {
    /// Builds a config from raw CLI-style values, treating empty strings and
    /// zero as unset.
    #[must_use]
    pub fn from_raw(memory: &str, cpu_percent: u32, cpuset: &str) -> Self {
        let non_empty = |s: &str| (!s.trim().is_empty()).then(|| s.trim().to_string());
        Self {
            memory_limit: non_empty(memory),
            cpu_shares: None,
            cpu_quota_percent: (cpu_percent != 0).then_some(cpu_percent),
            cpuset: non_empty(cpuset),
        }
    }
}

/// Lifecycle status of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// The init process is alive.
    Running,
    /// The container was stopped with `stop`.
    Stopped,
    /// The init process exited on its own.
    Exited,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Exited => write!(f, "exited"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_fixed_length_alphanumeric() {
        let id = ContainerId::generate();
        assert_eq!(id.as_str().len(), ID_LENGTH);
        assert!(id.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, ContainerId::generate());
    }

    #[test]
    fn from_raw_treats_empty_as_unset() {
        let cfg = ResourceConfig::from_raw("", 0, " ");
        assert_eq!(cfg, ResourceConfig::default());

        let cfg = ResourceConfig::from_raw("100m", 20, "0,1");
        assert_eq!(cfg.memory_limit.as_deref(), Some("100m"));
        assert_eq!(cfg.cpu_quota_percent, Some(20));
        assert_eq!(cfg.cpuset.as_deref(), Some("0,1"));
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&ContainerStatus::Stopped).unwrap();
        assert_eq!(json, "\"stopped\"");
        let back: ContainerStatus = serde_json::from_str("\"running\"").unwrap();
        assert_eq!(back, ContainerStatus::Running);
    }
}
