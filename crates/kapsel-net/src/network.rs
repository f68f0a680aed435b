//! The network engine: persisted networks and container attachment.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use ipnetwork::Ipv4Network;
use kapsel_common::config::RuntimeConfig;
use kapsel_common::error::{KapselError, Result};

use crate::bridge::BridgeDriver;
use crate::command::{CommandRunner, SystemRunner};
use crate::driver::DriverRegistry;
use crate::endpoint;
use crate::ipam::Ipam;
use crate::model::{Endpoint, Network, endpoint_id};
use crate::netns::{NetnsExec, ThreadNetns};
use crate::portmap;

/// What the engine needs to know about a container to attach it.
#[derive(Debug, Clone, Copy)]
pub struct Attachment<'a> {
    /// Container id.
    pub container_id: &'a str,
    /// Host pid of the container's init process.
    pub pid: i32,
    /// `hostPort:containerPort` entries.
    pub port_mapping: &'a [String],
}

/// Creates, lists, and deletes networks and attaches containers to them.
pub struct NetworkEngine {
    network_dir: PathBuf,
    ipam: Ipam,
    registry: DriverRegistry,
    runner: Arc<dyn CommandRunner>,
    netns: Arc<dyn NetnsExec>,
}

impl std::fmt::Debug for NetworkEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkEngine")
            .field("network_dir", &self.network_dir)
            .field("ipam", &self.ipam)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl NetworkEngine {
    /// Creates the engine for `config` using the real `ip`/`iptables`
    /// tools, with the bridge driver registered.
    #[must_use]
    pub fn new(config: &RuntimeConfig) -> Self {
        Self::with_parts(config, Arc::new(SystemRunner), Arc::new(ThreadNetns))
    }

    /// Creates the engine with injected command and namespace executors
    /// and the bridge driver registered on the same runner.
    #[must_use]
    pub fn with_parts(
        config: &RuntimeConfig,
        runner: Arc<dyn CommandRunner>,
        netns: Arc<dyn NetnsExec>,
    ) -> Self {
        let mut registry = DriverRegistry::new();
        registry.register(Arc::new(BridgeDriver::new(runner.clone())));
        Self::with_registry(
            config.network_dir(),
            Ipam::new(config.ipam_file()),
            registry,
            runner,
            netns,
        )
    }

    /// Creates the engine from fully explicit parts.
    #[must_use]
    pub fn with_registry(
        network_dir: PathBuf,
        ipam: Ipam,
        registry: DriverRegistry,
        runner: Arc<dyn CommandRunner>,
        netns: Arc<dyn NetnsExec>,
    ) -> Self {
        Self {
            network_dir,
            ipam,
            registry,
            runner,
            netns,
        }
    }

    /// Creates network `name` on `subnet` using `driver`. The first free
    /// address of the subnet becomes the gateway.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is taken, the subnet is invalid, the
    /// driver is unknown, or the driver fails.
    pub fn create_network(&self, driver: &str, subnet: &str, name: &str) -> Result<Network> {
        validate_name(name)?;
        if self.record_path(name).exists() {
            return Err(KapselError::config(format!("network {name} already exists")));
        }
        let subnet = Ipv4Network::from_str(subnet)
            .map_err(|e| KapselError::config(format!("invalid subnet `{subnet}`: {e}")))?;
        let driver = self.registry.get(driver)?;

        let gateway = self.ipam.allocate(&subnet)?;
        let gateway_cidr = Ipv4Network::new(gateway, subnet.prefix())
            .map_err(|e| KapselError::config(e.to_string()))?;

        let network = match driver.create(gateway_cidr, name) {
            Ok(network) => network,
            Err(e) => {
                self.release_quietly(&subnet, gateway);
                return Err(e);
            }
        };
        self.save(&network)?;
        tracing::info!(network = name, ip_range = %network.ip_range, driver = %network.driver, "network created");
        Ok(network)
    }

    /// All persisted networks, sorted by name. Unreadable records are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the network directory cannot be read.
    pub fn list_networks(&self) -> Result<Vec<Network>> {
        let entries = match std::fs::read_dir(&self.network_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(KapselError::io(&self.network_dir, e)),
        };

        let mut networks: Vec<Network> = entries
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| match read_record(&entry.path()) {
                Ok(network) => Some(network),
                Err(e) => {
                    tracing::error!(path = %entry.path().display(), error = %e, "skipping unreadable network");
                    None
                }
            })
            .collect();
        networks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(networks)
    }

    /// Loads network `name`.
    ///
    /// # Errors
    ///
    /// Returns [`KapselError::NotFound`] if there is no such network.
    pub fn load_network(&self, name: &str) -> Result<Network> {
        validate_name(name)?;
        let path = self.record_path(name);
        if !path.exists() {
            return Err(KapselError::NotFound {
                kind: "network",
                id: name.to_string(),
            });
        }
        read_record(&path)
    }

    /// Deletes network `name`: lets the driver remove its kernel objects,
    /// releases the gateway, then removes the record.
    ///
    /// The gateway stays allocated until the driver succeeds, so a network
    /// that could not be deleted never hands its gateway to a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the network does not exist or a step fails.
    pub fn delete_network(&self, name: &str) -> Result<()> {
        let network = self.load_network(name)?;
        self.registry.get(&network.driver)?.delete(&network)?;
        self.ipam.release(&network.subnet(), network.gateway())?;
        let path = self.record_path(name);
        std::fs::remove_file(&path).map_err(|e| KapselError::io(&path, e))?;
        tracing::info!(network = name, "network deleted");
        Ok(())
    }

    /// Attaches a running container to `network_name` and returns its
    /// address. On failure every step already taken is undone.
    ///
    /// # Errors
    ///
    /// Returns an error if the network does not exist, the subnet is
    /// exhausted, or configuring the endpoint fails.
    pub fn connect(&self, network_name: &str, container: Attachment<'_>) -> Result<Ipv4Addr> {
        let network = self.load_network(network_name)?;
        let driver = self.registry.get(&network.driver)?;
        let subnet = network.subnet();

        let ip = self.ipam.allocate(&subnet)?;
        let mut ep = Endpoint::new(
            container.container_id,
            &network.name,
            ip,
            container.port_mapping.to_vec(),
        );

        let attached = driver.connect(&network.name, &mut ep).and_then(|()| {
            endpoint::configure(
                self.runner.as_ref(),
                self.netns.as_ref(),
                &ep,
                &network,
                container.pid,
            )?;
            portmap::add(self.runner.as_ref(), &network.name, ip, &ep.port_mapping)
        });

        if let Err(e) = attached {
            tracing::error!(endpoint = %ep.id, error = %e, "connect failed, rolling back");
            portmap::remove(self.runner.as_ref(), &network.name, ip, &ep.port_mapping);
            if let Err(de) = driver.disconnect(&ep.id) {
                tracing::warn!(endpoint = %ep.id, error = %de, "failed to remove endpoint devices");
            }
            self.release_quietly(&subnet, ip);
            return Err(e);
        }

        tracing::info!(endpoint = %ep.id, ip = %ip, mac = ?ep.mac, "container connected");
        Ok(ip)
    }

    /// Detaches a container: removes its devices and port mappings and
    /// returns its address to the pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the network does not exist or the address cannot
    /// be released.
    pub fn disconnect(
        &self,
        network_name: &str,
        container_id: &str,
        ip: Option<Ipv4Addr>,
        port_mapping: &[String],
    ) -> Result<()> {
        let network = self.load_network(network_name)?;
        let id = endpoint_id(container_id, &network.name);

        if let Err(e) = self.registry.get(&network.driver)?.disconnect(&id) {
            tracing::warn!(endpoint = %id, error = %e, "failed to remove endpoint devices");
        }
        if let Some(ip) = ip {
            portmap::remove(self.runner.as_ref(), &network.name, ip, port_mapping);
            self.ipam.release(&network.subnet(), ip)?;
        }
        tracing::info!(endpoint = %id, "container disconnected");
        Ok(())
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.network_dir.join(name)
    }

    fn save(&self, network: &Network) -> Result<()> {
        std::fs::create_dir_all(&self.network_dir)
            .map_err(|e| KapselError::io(&self.network_dir, e))?;
        let path = self.record_path(&network.name);
        let json = serde_json::to_string(network)?;
        std::fs::write(&path, json).map_err(|e| KapselError::io(&path, e))
    }

    fn release_quietly(&self, subnet: &Ipv4Network, ip: Ipv4Addr) {
        if let Err(e) = self.ipam.release(subnet, ip) {
            tracing::warn!(ip = %ip, error = %e, "failed to release address");
        }
    }
}

fn read_record(path: &Path) -> Result<Network> {
    let content = std::fs::read_to_string(path).map_err(|e| KapselError::io(path, e))?;
    Ok(serde_json::from_str(&content)?)
}

/// Network names double as file names and device names.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.starts_with('.') {
        return Err(KapselError::config(format!("invalid network name `{name}`")));
    }
    Ok(())
}
