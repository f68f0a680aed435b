//! Unified error types for the kapsel workspace.
//!
//! Every crate returns [`KapselError`]; the CLI wraps it in `anyhow` at the
//! outermost layer.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum KapselError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value or user-supplied argument is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// An operation was attempted on a container in the wrong status.
    #[error("container {id} is in invalid status {status}: {message}")]
    InvalidState {
        /// Container identifier.
        id: String,
        /// Status the container was found in.
        status: String,
        /// What was attempted.
        message: String,
    },

    /// A finite pool (such as a subnet) has no free entries left.
    #[error("{resource} exhausted: {message}")]
    Exhausted {
        /// Pool that ran out.
        resource: String,
        /// Additional context.
        message: String,
    },

    /// A system call failed.
    #[error("{op} failed: {message}")]
    Syscall {
        /// Name of the failing operation.
        op: &'static str,
        /// Description including the errno text.
        message: String,
    },

    /// An external program exited unsuccessfully or could not be spawned.
    #[error("`{command}` failed: {message}")]
    Command {
        /// Rendered command line.
        command: String,
        /// Captured stderr or spawn error.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl KapselError {
    /// Builds an [`KapselError::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds a [`KapselError::Config`] from any displayable message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Builds a [`KapselError::Syscall`] from an errno-like error.
    pub fn syscall(op: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Syscall {
            op,
            message: err.to_string(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, KapselError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_kind_and_id() {
        let err = KapselError::NotFound {
            kind: "network",
            id: "br0".into(),
        };
        assert_eq!(err.to_string(), "network not found: br0");
    }

    #[test]
    fn io_helper_keeps_path() {
        let err = KapselError::io(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("/tmp/x"));
    }
}
