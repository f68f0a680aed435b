//! Configuring the container end of an endpoint.

use kapsel_common::constants::CONTAINER_IFNAME;
use kapsel_common::error::Result;

use crate::command::CommandRunner;
use crate::model::{Endpoint, Network};
use crate::netns::NetnsExec;

/// Moves the endpoint's peer device into `pid`'s network namespace and,
/// from inside it, renames it to `eth0`, assigns the endpoint address,
/// brings `eth0` and `lo` up, and routes everything via the gateway.
///
/// # Errors
///
/// Returns an error if any step fails. The caller's namespace is restored
/// either way.
pub fn configure(
    runner: &dyn CommandRunner,
    netns: &dyn NetnsExec,
    endpoint: &Endpoint,
    network: &Network,
    pid: i32,
) -> Result<()> {
    let peer = endpoint.device.peer.as_str();
    let _ = runner.run("ip", &["link", "set", peer, "netns", &pid.to_string()])?;

    let address = format!("{}/{}", endpoint.ip, network.ip_range.prefix());
    let gateway = network.gateway().to_string();

    netns.within(pid, &|| {
        let _ = runner.run("ip", &["link", "set", peer, "name", CONTAINER_IFNAME])?;
        let _ = runner.run("ip", &["addr", "add", &address, "dev", CONTAINER_IFNAME])?;
        let _ = runner.run("ip", &["link", "set", CONTAINER_IFNAME, "up"])?;
        let _ = runner.run("ip", &["link", "set", "lo", "up"])?;
        let _ = runner.run(
            "ip",
            &["route", "add", "default", "via", &gateway, "dev", CONTAINER_IFNAME],
        )?;
        Ok(())
    })?;

    tracing::info!(endpoint = %endpoint.id, pid, address = %address, "endpoint configured");
    Ok(())
}
