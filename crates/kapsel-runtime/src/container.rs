//! The persisted container record.

use std::net::Ipv4Addr;

use kapsel_common::types::{ContainerId, ContainerStatus};
use serde::{Deserialize, Serialize};

/// Timestamp format of [`ContainerRecord::create_time`].
pub const CREATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Everything the runtime remembers about a container.
///
/// Stored as `config.json` in the container's metadata directory and used
/// as the single source of truth for lifecycle queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    /// Host pid of the init process; empty once stopped.
    #[serde(default)]
    pub pid: String,
    /// Container identifier.
    pub id: ContainerId,
    /// Display name, the id unless given.
    pub name: String,
    /// Command line, space separated.
    pub command: String,
    /// Local creation time.
    pub create_time: String,
    /// Lifecycle status.
    pub status: ContainerStatus,
    /// `hostPath:containerPath` volume, or empty.
    #[serde(default)]
    pub volume: String,
    /// Attached network, or empty.
    #[serde(default)]
    pub network_name: String,
    /// Address on the attached network, or empty.
    #[serde(default)]
    pub ip: String,
    /// `hostPort:containerPort` entries.
    #[serde(default)]
    pub port_mapping: Vec<String>,
}

impl ContainerRecord {
    /// Builds the record of a freshly started container.
    #[must_use]
    pub fn running(id: ContainerId, name: Option<&str>, pid: i32, command: &[String]) -> Self {
        let name = name
            .filter(|n| !n.is_empty())
            .map_or_else(|| id.to_string(), str::to_string);
        Self {
            pid: pid.to_string(),
            id,
            name,
            command: command.join(" "),
            create_time: chrono::Local::now().format(CREATE_TIME_FORMAT).to_string(),
            status: ContainerStatus::Running,
            volume: String::new(),
            network_name: String::new(),
            ip: String::new(),
            port_mapping: Vec::new(),
        }
    }

    /// The init pid, if one is recorded.
    #[must_use]
    pub fn pid(&self) -> Option<i32> {
        self.pid.parse().ok().filter(|&p| p > 0)
    }

    /// The network address, if one is recorded.
    #[must_use]
    pub fn ip_addr(&self) -> Option<Ipv4Addr> {
        self.ip.parse().ok()
    }

    /// The network name, if one is recorded.
    #[must_use]
    pub fn network(&self) -> Option<&str> {
        (!self.network_name.is_empty()).then_some(self.network_name.as_str())
    }

    /// Marks the container stopped and forgets its pid.
    pub fn mark_stopped(&mut self) {
        self.pid.clear();
        self.status = ContainerStatus::Stopped;
    }
}
