//! Linux bridge network driver.
//!
//! A network is a bridge device named after the network, holding the
//! gateway address, plus a `MASQUERADE` rule so containers reach the
//! outside world. Containers attach through veth pairs.

use std::sync::Arc;
use std::time::Duration;

use ipnetwork::Ipv4Network;
use kapsel_common::constants::DEFAULT_NETWORK_DRIVER;
use kapsel_common::error::{KapselError, Result};

use crate::command::{CommandRunner, is_missing_device, is_missing_rule};
use crate::driver::NetworkDriver;
use crate::model::{Endpoint, Network, VethPair};

/// Longest interface name the kernel accepts.
pub const MAX_IFNAME_LEN: usize = 15;

/// How often and how patiently to wait for a new bridge link to appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePolicy {
    /// Number of lookups.
    pub attempts: u32,
    /// Delay after a failed lookup.
    pub delay: Duration,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            delay: Duration::from_secs(2),
        }
    }
}

/// The bridge driver.
pub struct BridgeDriver {
    runner: Arc<dyn CommandRunner>,
    probe: ProbePolicy,
}

impl std::fmt::Debug for BridgeDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeDriver")
            .field("probe", &self.probe)
            .finish_non_exhaustive()
    }
}

impl BridgeDriver {
    /// Creates the driver with the default probe policy.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self::with_probe(runner, ProbePolicy::default())
    }

    /// Creates the driver with a custom probe policy.
    #[must_use]
    pub fn with_probe(runner: Arc<dyn CommandRunner>, probe: ProbePolicy) -> Self {
        Self { runner, probe }
    }

    fn ip(&self, args: &[&str]) -> Result<String> {
        self.runner.run("ip", args)
    }

    fn iptables(&self, args: &[&str]) -> Result<String> {
        self.runner.run("iptables", args)
    }

    /// Waits for `name` to be visible, retrying per the probe policy.
    fn probe_link(&self, name: &str) -> Result<()> {
        let mut last_err = None;
        for attempt in 1..=self.probe.attempts.max(1) {
            match self.ip(&["link", "show", name]) {
                Ok(_) => return Ok(()),
                Err(e) => {
                    tracing::debug!(bridge = name, attempt, error = %e, "bridge link not visible yet");
                    last_err = Some(e);
                    std::thread::sleep(self.probe.delay);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| KapselError::NotFound {
            kind: "link",
            id: name.to_string(),
        }))
    }

    fn masquerade(&self, action: &str, subnet: &Ipv4Network, bridge: &str) -> Result<()> {
        let subnet = subnet.to_string();
        let _ = self.iptables(&[
            "-t",
            "nat",
            action,
            "POSTROUTING",
            "-s",
            &subnet,
            "!",
            "-o",
            bridge,
            "-j",
            "MASQUERADE",
        ])?;
        Ok(())
    }

    /// Runs a device removal, treating a missing device as success.
    fn remove_device(&self, args: &[&str]) -> Result<()> {
        match self.ip(args) {
            Ok(_) => Ok(()),
            Err(e) if is_missing_device(&e) => {
                tracing::debug!(error = %e, "device already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Reads the MAC of `device` from `ip -o link show`.
    fn read_mac(&self, device: &str) -> Option<String> {
        let output = self.ip(&["-o", "link", "show", device]).ok()?;
        let mut words = output.split_whitespace();
        words
            .by_ref()
            .find(|w| *w == "link/ether")
            .and_then(|_| words.next())
            .map(str::to_string)
    }
}

impl NetworkDriver for BridgeDriver {
    fn name(&self) -> &str {
        DEFAULT_NETWORK_DRIVER
    }

    fn create(&self, gateway: Ipv4Network, name: &str) -> Result<Network> {
        if name.is_empty() || name.len() > MAX_IFNAME_LEN {
            return Err(KapselError::config(format!(
                "bridge name `{name}` must be 1 to {MAX_IFNAME_LEN} characters"
            )));
        }
        let network = Network {
            name: name.to_string(),
            ip_range: gateway,
            driver: self.name().to_string(),
        };

        let _ = self.ip(&["link", "add", name, "type", "bridge"])?;
        self.probe_link(name)?;
        let _ = self.ip(&["addr", "add", &gateway.to_string(), "dev", name])?;
        let _ = self.ip(&["link", "set", name, "up"])?;
        self.masquerade("-A", &network.subnet(), name)?;

        tracing::info!(bridge = name, gateway = %gateway, "bridge network created");
        Ok(network)
    }

    fn delete(&self, network: &Network) -> Result<()> {
        let name = network.name.as_str();
        let subnet = network.subnet();

        if let Err(e) = self.ip(&["route", "del", &subnet.to_string(), "dev", name]) {
            tracing::warn!(bridge = name, error = %e, "failed to remove subnet route");
        }
        match self.masquerade("-D", &subnet, name) {
            Err(e) if is_missing_rule(&e) => {
                tracing::debug!(bridge = name, error = %e, "masquerade rule already gone");
            }
            other => other?,
        }
        self.remove_device(&["link", "del", name])?;

        tracing::info!(bridge = name, "bridge network deleted");
        Ok(())
    }

    fn connect(&self, network_name: &str, endpoint: &mut Endpoint) -> Result<()> {
        let VethPair { host, peer } = &endpoint.device;
        let _ = self.ip(&["link", "add", host, "type", "veth", "peer", "name", peer])?;
        let _ = self.ip(&["link", "set", host, "master", network_name])?;
        let _ = self.ip(&["link", "set", host, "up"])?;

        endpoint.mac = self.read_mac(host);
        tracing::info!(endpoint = %endpoint.id, bridge = network_name, host = %host, "veth pair attached");
        Ok(())
    }

    fn disconnect(&self, endpoint_id: &str) -> Result<()> {
        let VethPair { host, peer } = VethPair::for_endpoint(endpoint_id);
        if let Err(e) = self.ip(&["link", "set", &host, "nomaster"]) {
            tracing::debug!(host = %host, error = %e, "could not detach host end");
        }
        self.remove_device(&["link", "del", &host])?;
        // Deleting one end normally removes both; a peer that never left
        // the host namespace would block a later connect with the same id.
        self.remove_device(&["link", "del", &peer])?;
        tracing::info!(endpoint = endpoint_id, "veth pair removed");
        Ok(())
    }
}
