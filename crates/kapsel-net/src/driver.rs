//! Network driver capability and the registry that holds drivers.

use std::collections::BTreeMap;
use std::sync::Arc;

use ipnetwork::Ipv4Network;
use kapsel_common::error::{KapselError, Result};

use crate::model::{Endpoint, Network};

/// A network implementation such as a Linux bridge.
pub trait NetworkDriver: Send + Sync {
    /// Name under which the driver is registered.
    fn name(&self) -> &str;

    /// Creates the kernel objects for network `name` whose gateway is
    /// `gateway` (address plus subnet prefix).
    ///
    /// # Errors
    ///
    /// Returns an error if the network cannot be created.
    fn create(&self, gateway: Ipv4Network, name: &str) -> Result<Network>;

    /// Removes everything [`NetworkDriver::create`] installed.
    ///
    /// # Errors
    ///
    /// Returns an error if a step fails.
    fn delete(&self, network: &Network) -> Result<()>;

    /// Creates the endpoint's device and attaches it to `network_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be created or attached.
    fn connect(&self, network_name: &str, endpoint: &mut Endpoint) -> Result<()>;

    /// Removes the endpoint's devices. Missing devices are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing device cannot be removed.
    fn disconnect(&self, endpoint_id: &str) -> Result<()>;
}

/// Drivers available to the network engine, by name.
#[derive(Default, Clone)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, Arc<dyn NetworkDriver>>,
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}

impl DriverRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `driver`, replacing any driver registered under the same name.
    pub fn register(&mut self, driver: Arc<dyn NetworkDriver>) {
        let name = driver.name().to_string();
        if self.drivers.insert(name.clone(), driver).is_some() {
            tracing::warn!(driver = %name, "network driver replaced");
        }
    }

    /// Looks up a driver by name.
    ///
    /// # Errors
    ///
    /// Returns [`KapselError::NotFound`] for an unknown driver.
    pub fn get(&self, name: &str) -> Result<Arc<dyn NetworkDriver>> {
        self.drivers
            .get(name)
            .cloned()
            .ok_or_else(|| KapselError::NotFound {
                kind: "network driver",
                id: name.to_string(),
            })
    }

    /// Registered driver names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.drivers.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BridgeDriver;
    use crate::command::RecordingRunner;

    #[test]
    fn lookup_by_name() {
        let mut registry = DriverRegistry::new();
        registry.register(Arc::new(BridgeDriver::new(Arc::new(RecordingRunner::new()))));
        assert_eq!(registry.names(), vec!["bridge"]);
        assert_eq!(registry.get("bridge").unwrap().name(), "bridge");
        assert!(matches!(
            registry.get("macvlan"),
            Err(KapselError::NotFound { kind: "network driver", .. })
        ));
    }
}
