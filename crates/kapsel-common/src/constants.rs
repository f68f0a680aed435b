//! System-wide constants and default paths.

/// Default base directory for all runtime state.
pub const DEFAULT_ROOT: &str = "/var/lib/kapsel";

/// Environment variable overriding [`DEFAULT_ROOT`].
pub const ROOT_ENV: &str = "KAPSEL_ROOT";

/// Environment variable overriding the union filesystem type.
pub const DRIVER_TYPE_ENV: &str = "KAPSEL_DRIVER_TYPE";

/// Environment variable switching cgroup driver failures from logged to fatal.
pub const CGROUP_STRICT_ENV: &str = "KAPSEL_CGROUP_STRICT";

/// Sentinel variable carrying the target pid for `exec`.
pub const EXEC_PID_ENV: &str = "KAPSEL_PID";

/// Sentinel variable carrying the command line for `exec`.
pub const EXEC_CMD_ENV: &str = "KAPSEL_CMD";

/// Default union filesystem type.
pub const DEFAULT_OVERLAY_DRIVER: &str = "overlay";

/// Name of the container record inside its metadata directory.
pub const CONFIG_NAME: &str = "config.json";

/// Length of generated container identifiers.
pub const ID_LENGTH: usize = 10;

/// Descriptor index at which the init process finds its command pipe.
pub const INIT_PIPE_FD: i32 = 3;

/// Cgroup parent under which every container gets its own group.
pub const CGROUP_PARENT: &str = "kapsel";

/// Default network driver name.
pub const DEFAULT_NETWORK_DRIVER: &str = "bridge";

/// Interface name of the container side of a veth pair once inside the container.
pub const CONTAINER_IFNAME: &str = "eth0";

/// Returns the log file name for a container.
#[must_use]
pub fn log_file_name(container_id: &str) -> String {
    format!("{container_id}-json.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_name_uses_json_suffix() {
        assert_eq!(log_file_name("abc123"), "abc123-json.log");
    }
}
