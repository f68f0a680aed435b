//! # kapsel-net
//!
//! Virtual networking for kapsel containers.
//!
//! - **IPAM**: a persisted per-subnet bitmap allocator.
//! - **Drivers**: a registry of network drivers, with a Linux bridge driver
//!   registered by default.
//! - **Endpoints**: veth pairs whose container end is configured from inside
//!   the container's network namespace.
//! - **NAT**: `MASQUERADE` for outbound traffic and `DNAT` port mappings.
//!
//! Kernel state is changed through the `ip` and `iptables` tools via a
//! [`command::CommandRunner`], which tests replace with a recorder.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod bridge;
pub mod command;
pub mod driver;
pub mod endpoint;
pub mod ipam;
pub mod model;
pub mod netns;
pub mod network;
pub mod portmap;
