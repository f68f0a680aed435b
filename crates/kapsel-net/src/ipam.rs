//! Bitmap IP address management.
//!
//! Each subnet maps to one bit per host address; bit `i` set means the
//! `i`-th address of the subnet is taken. The table is reloaded from disk
//! on every call and written back before returning, so separate CLI
//! invocations see each other's allocations.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use ipnetwork::Ipv4Network;
use kapsel_common::error::{KapselError, Result};
use serde::{Deserialize, Serialize};

/// Smallest prefix accepted; larger subnets would need a bitmap of more
/// than 2^24 entries.
pub const MIN_PREFIX: u8 = 8;

/// Allocation state of one subnet.
///
/// Serialized as a string of `'0'` and `'1'` characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Bitmap(Vec<bool>);

impl Bitmap {
    /// An all-free bitmap for `subnet`, with offset 0 reserved when the
    /// network address ends in a zero octet.
    #[must_use]
    pub fn for_subnet(subnet: &Ipv4Network) -> Self {
        let size = 1usize << (32 - u32::from(subnet.prefix()));
        let mut bits = vec![false; size];
        if subnet.network().octets()[3] == 0 {
            bits[0] = true;
        }
        Self(bits)
    }

    /// Index of the first free bit.
    #[must_use]
    pub fn first_free(&self) -> Option<usize> {
        self.0.iter().position(|taken| !taken)
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn set(&mut self, index: usize, value: bool) {
        if let Some(bit) = self.0.get_mut(index) {
            *bit = value;
        }
    }
}

impl From<Bitmap> for String {
    fn from(bitmap: Bitmap) -> Self {
        bitmap.0.iter().map(|&b| if b { '1' } else { '0' }).collect()
    }
}

impl TryFrom<String> for Bitmap {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value
            .chars()
            .map(|c| match c {
                '0' => Ok(false),
                '1' => Ok(true),
                other => Err(format!("invalid bitmap character {other:?}")),
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Self)
    }
}

/// The subnet table as stored on disk.
type SubnetTable = BTreeMap<String, Bitmap>;

/// Allocator over a persisted subnet table.
#[derive(Debug, Clone)]
pub struct Ipam {
    path: PathBuf,
}

impl Ipam {
    /// Creates an allocator backed by the JSON file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Allocates the first free address in `subnet`.
    ///
    /// # Errors
    ///
    /// Returns [`KapselError::Exhausted`] when every address is taken, or an
    /// error if the table cannot be read or written.
    pub fn allocate(&self, subnet: &Ipv4Network) -> Result<Ipv4Addr> {
        let subnet = normalize(subnet)?;
        let key = subnet.to_string();
        let mut table = self.load()?;

        let bitmap = table
            .entry(key.clone())
            .or_insert_with(|| Bitmap::for_subnet(&subnet));
        let index = bitmap.first_free().ok_or_else(|| KapselError::Exhausted {
            resource: format!("subnet {key}"),
            message: "no free address left".into(),
        })?;
        bitmap.set(index, true);

        let offset = u32::try_from(index).map_err(|e| KapselError::config(e.to_string()))?;
        let ip = Ipv4Addr::from(u32::from(subnet.network()) + offset);
        self.dump(&table)?;
        tracing::debug!(subnet = %key, ip = %ip, "address allocated");
        Ok(ip)
    }

    /// Returns `ip` to `subnet`'s pool. Releasing a free address is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the subnet was never allocated from, `ip` lies
    /// outside it, or the table cannot be read or written.
    pub fn release(&self, subnet: &Ipv4Network, ip: Ipv4Addr) -> Result<()> {
        let subnet = normalize(subnet)?;
        let key = subnet.to_string();
        let mut table = self.load()?;

        let bitmap = table.get_mut(&key).ok_or_else(|| KapselError::NotFound {
            kind: "subnet",
            id: key.clone(),
        })?;
        let index = u32::from(ip)
            .checked_sub(u32::from(subnet.network()))
            .and_then(|i| usize::try_from(i).ok())
            .filter(|&i| i < bitmap.len())
            .ok_or_else(|| KapselError::config(format!("{ip} is outside subnet {key}")))?;
        bitmap.set(index, false);

        self.dump(&table)?;
        tracing::debug!(subnet = %key, ip = %ip, "address released");
        Ok(())
    }

    /// Reads the table, treating a missing file as empty.
    fn load(&self) -> Result<SubnetTable> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(SubnetTable::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SubnetTable::new()),
            Err(e) => Err(KapselError::io(&self.path, e)),
        }
    }

    fn dump(&self, table: &SubnetTable) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| KapselError::io(parent, e))?;
        }
        let json = serde_json::to_string(table)?;
        std::fs::write(&self.path, json).map_err(|e| KapselError::io(&self.path, e))
    }
}

/// Strips host bits so `10.0.0.7/24` and `10.0.0.0/24` share one bitmap.
fn normalize(subnet: &Ipv4Network) -> Result<Ipv4Network> {
    if subnet.prefix() < MIN_PREFIX {
        return Err(KapselError::config(format!(
            "subnet {subnet} is too large, prefix must be at least /{MIN_PREFIX}"
        )));
    }
    Ipv4Network::new(subnet.network(), subnet.prefix())
        .map_err(|e| KapselError::config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> Ipv4Network {
        s.parse().unwrap()
    }

    #[test]
    fn allocates_first_fit_and_reuses_released() {
        let dir = tempfile::tempdir().unwrap();
        let ipam = Ipam::new(dir.path().join("ipam/subnet.json"));
        let subnet = net("172.18.0.0/24");

        assert_eq!(ipam.allocate(&subnet).unwrap(), Ipv4Addr::new(172, 18, 0, 1));
        assert_eq!(ipam.allocate(&subnet).unwrap(), Ipv4Addr::new(172, 18, 0, 2));
        ipam.release(&subnet, Ipv4Addr::new(172, 18, 0, 1)).unwrap();
        assert_eq!(ipam.allocate(&subnet).unwrap(), Ipv4Addr::new(172, 18, 0, 1));
    }

    #[test]
    fn state_survives_a_new_allocator() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subnet.json");
        let subnet = net("10.1.0.0/24");
        let _ = Ipam::new(&path).allocate(&subnet).unwrap();

        assert_eq!(
            Ipam::new(&path).allocate(&subnet).unwrap(),
            Ipv4Addr::new(10, 1, 0, 2)
        );
        let raw: BTreeMap<String, String> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let bits = &raw["10.1.0.0/24"];
        assert_eq!(bits.len(), 256);
        assert!(bits.starts_with("1110"));
    }

    #[test]
    fn host_bits_share_the_subnet_bitmap() {
        let dir = tempfile::tempdir().unwrap();
        let ipam = Ipam::new(dir.path().join("subnet.json"));
        let _ = ipam.allocate(&net("192.168.5.0/24")).unwrap();
        assert_eq!(
            ipam.allocate(&net("192.168.5.1/24")).unwrap(),
            Ipv4Addr::new(192, 168, 5, 2)
        );
    }

    #[test]
    fn exhaustion_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let ipam = Ipam::new(dir.path().join("subnet.json"));
        let subnet = net("10.9.9.0/30");
        for last in 1..=3 {
            assert_eq!(ipam.allocate(&subnet).unwrap(), Ipv4Addr::new(10, 9, 9, last));
        }
        assert!(matches!(
            ipam.allocate(&subnet),
            Err(KapselError::Exhausted { .. })
        ));
    }

    #[test]
    fn non_zero_network_octet_keeps_offset_zero() {
        let dir = tempfile::tempdir().unwrap();
        let ipam = Ipam::new(dir.path().join("subnet.json"));
        assert_eq!(
            ipam.allocate(&net("10.0.0.4/30")).unwrap(),
            Ipv4Addr::new(10, 0, 0, 4)
        );
    }

    #[test]
    fn release_errors() {
        let dir = tempfile::tempdir().unwrap();
        let ipam = Ipam::new(dir.path().join("subnet.json"));
        let subnet = net("172.20.0.0/24");
        assert!(matches!(
            ipam.release(&subnet, Ipv4Addr::new(172, 20, 0, 1)),
            Err(KapselError::NotFound { .. })
        ));

        let _ = ipam.allocate(&subnet).unwrap();
        assert!(ipam.release(&subnet, Ipv4Addr::new(172, 21, 0, 1)).is_err());
        // Clearing a bit that is already free is fine.
        ipam.release(&subnet, Ipv4Addr::new(172, 20, 0, 9)).unwrap();
    }

    #[test]
    fn oversized_subnet_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ipam = Ipam::new(dir.path().join("subnet.json"));
        assert!(ipam.allocate(&net("10.0.0.0/4")).is_err());
    }

    #[test]
    fn bitmap_rejects_garbage() {
        assert!(Bitmap::try_from("01x".to_string()).is_err());
        let bm = Bitmap::try_from("010".to_string()).unwrap();
        assert_eq!(bm.first_free(), Some(0));
        assert_eq!(String::from(bm), "010");
    }
}
