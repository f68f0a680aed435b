//! # kapsel-runtime
//!
//! Container lifecycle management for the kapsel runtime.
//!
//! Handles:
//! - **Launch**: cloning the namespaced init process and handing it its
//!   command over a pipe.
//! - **Init**: the in-container side that switches root and execs the user
//!   command.
//! - **State**: one JSON record per container.
//! - **Exec**: re-entering a running container's namespaces.
//! - **Engine**: the run, stop, rm, logs, ps, and commit operations.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod container;
pub mod engine;
pub mod exec;
pub mod init;
pub mod logs;
pub mod process;
pub mod state;
