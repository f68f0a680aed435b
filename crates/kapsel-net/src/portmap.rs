//! Publishing container ports on the host with `DNAT` rules.

use std::net::Ipv4Addr;
use std::str::FromStr;

use kapsel_common::error::{KapselError, Result};

use crate::command::CommandRunner;

/// One `hostPort:containerPort` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    /// Port on the host.
    pub host: u16,
    /// Port inside the container.
    pub container: u16,
}

impl FromStr for PortMapping {
    type Err = KapselError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || {
            KapselError::config(format!("port mapping `{s}` must be hostPort:containerPort"))
        };
        let (host, container) = s.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            host: host.parse().map_err(|_| invalid())?,
            container: container.parse().map_err(|_| invalid())?,
        })
    }
}

fn rule_args(action: &str, bridge: &str, ip: Ipv4Addr, mapping: PortMapping) -> Vec<String> {
    let dport = mapping.host.to_string();
    let destination = format!("{ip}:{}", mapping.container);
    [
        "-t",
        "nat",
        action,
        "PREROUTING",
        "!",
        "-i",
        bridge,
        "-p",
        "tcp",
        "-m",
        "tcp",
        "--dport",
        dport.as_str(),
        "-j",
        "DNAT",
        "--to-destination",
        destination.as_str(),
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

fn parse_valid(mappings: &[String]) -> impl Iterator<Item = PortMapping> + '_ {
    mappings.iter().filter_map(|raw| match raw.parse::<PortMapping>() {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(mapping = %raw, error = %e, "skipping malformed port mapping");
            None
        }
    })
}

fn run_rule(runner: &dyn CommandRunner, args: &[String]) -> Result<()> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let _ = runner.run("iptables", &args)?;
    Ok(())
}

/// Installs one `DNAT` rule per well-formed mapping.
///
/// # Errors
///
/// Returns the first iptables failure.
pub fn add(
    runner: &dyn CommandRunner,
    bridge: &str,
    ip: Ipv4Addr,
    mappings: &[String],
) -> Result<()> {
    for mapping in parse_valid(mappings) {
        run_rule(runner, &rule_args("-A", bridge, ip, mapping))?;
        tracing::info!(host = mapping.host, container = mapping.container, ip = %ip, "port published");
    }
    Ok(())
}

/// Removes the rules installed by [`add`]. Failures are logged only.
pub fn remove(runner: &dyn CommandRunner, bridge: &str, ip: Ipv4Addr, mappings: &[String]) {
    for mapping in parse_valid(mappings) {
        if let Err(e) = run_rule(runner, &rule_args("-D", bridge, ip, mapping)) {
            tracing::warn!(host = mapping.host, error = %e, "failed to remove port mapping");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::RecordingRunner;

    const IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 4);

    #[test]
    fn parses_host_and_container_port() {
        let m: PortMapping = "8080:80".parse().unwrap();
        assert_eq!(m, PortMapping { host: 8080, container: 80 });
        assert!("8080".parse::<PortMapping>().is_err());
        assert!("a:80".parse::<PortMapping>().is_err());
        assert!("1:2:3".parse::<PortMapping>().is_err());
    }

    #[test]
    fn add_skips_malformed_entries() {
        let runner = RecordingRunner::new();
        add(&runner, "testbr", IP, &["8080:80".into(), "oops".into()]).unwrap();
        assert_eq!(
            runner.calls(),
            vec![
                "iptables -t nat -A PREROUTING ! -i testbr -p tcp -m tcp --dport 8080 -j DNAT --to-destination 10.0.0.4:80"
            ]
        );
    }

    #[test]
    fn add_fails_on_iptables_error_but_remove_does_not() {
        let runner = RecordingRunner::new()
            .failing_on("iptables", "iptables: No chain/target/match by that name.");
        assert!(add(&runner, "testbr", IP, &["80:80".into()]).is_err());
        remove(&runner, "testbr", IP, &["80:80".into(), "81:81".into()]);
        assert_eq!(runner.calls().len(), 3);
    }
}
