//! Network and endpoint records.

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

/// Number of endpoint id characters used in device names; keeps
/// `veth` + prefix inside the 15-byte interface name limit.
pub const DEVICE_PREFIX_LEN: usize = 5;

/// A named virtual network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    /// Network name, also the bridge device name.
    pub name: String,
    /// Gateway address with the subnet prefix, e.g. `192.168.0.1/24`.
    pub ip_range: Ipv4Network,
    /// Name of the driver that owns the network.
    pub driver: String,
}

impl Network {
    /// The gateway address.
    #[must_use]
    pub fn gateway(&self) -> Ipv4Addr {
        self.ip_range.ip()
    }

    /// The subnet with host bits cleared, e.g. `192.168.0.0/24`.
    #[must_use]
    pub fn subnet(&self) -> Ipv4Network {
        Ipv4Network::new(self.ip_range.network(), self.ip_range.prefix()).unwrap_or(self.ip_range)
    }
}

/// Host and container ends of a veth pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VethPair {
    /// End attached to the bridge in the host namespace.
    pub host: String,
    /// End moved into the container, renamed there.
    pub peer: String,
}

impl VethPair {
    /// Device names derived from an endpoint id.
    #[must_use]
    pub fn for_endpoint(endpoint_id: &str) -> Self {
        let prefix: String = endpoint_id.chars().take(DEVICE_PREFIX_LEN).collect();
        Self {
            host: format!("veth{prefix}"),
            peer: format!("cif{prefix}"),
        }
    }
}

/// A container's attachment to a network. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// `<container id>-<network name>`.
    pub id: String,
    /// The veth pair backing the endpoint.
    pub device: VethPair,
    /// Address assigned inside the container.
    pub ip: Ipv4Addr,
    /// MAC of the host end, when known.
    pub mac: Option<String>,
    /// Name of the network the endpoint belongs to.
    pub network: String,
    /// `hostPort:containerPort` entries.
    pub port_mapping: Vec<String>,
}

impl Endpoint {
    /// Builds the endpoint for `container_id` on `network`.
    #[must_use]
    pub fn new(container_id: &str, network: &str, ip: Ipv4Addr, port_mapping: Vec<String>) -> Self {
        let id = endpoint_id(container_id, network);
        Self {
            device: VethPair::for_endpoint(&id),
            id,
            ip,
            mac: None,
            network: network.to_string(),
            port_mapping,
        }
    }
}

/// Endpoint id for a container on a network.
#[must_use]
pub fn endpoint_id(container_id: &str, network: &str) -> String {
    format!("{container_id}-{network}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_record_uses_camel_case() {
        let network = Network {
            name: "testbr".into(),
            ip_range: "192.168.0.1/24".parse().unwrap(),
            driver: "bridge".into(),
        };
        let json = serde_json::to_string(&network).unwrap();
        assert_eq!(
            json,
            r#"{"name":"testbr","ipRange":"192.168.0.1/24","driver":"bridge"}"#
        );
        let back: Network = serde_json::from_str(&json).unwrap();
        assert_eq!(back.gateway(), Ipv4Addr::new(192, 168, 0, 1));
        assert_eq!(back.subnet().to_string(), "192.168.0.0/24");
    }

    #[test]
    fn device_names_use_id_prefix() {
        let ep = Endpoint::new("a1b2c3d4e5", "testbr", Ipv4Addr::new(10, 0, 0, 2), vec![]);
        assert_eq!(ep.id, "a1b2c3d4e5-testbr");
        assert_eq!(ep.device.host, "vetha1b2c");
        assert_eq!(ep.device.peer, "cifa1b2c");
    }
}
