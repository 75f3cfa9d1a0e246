//! CIDR-range client IP allow-listing for the `SNI_IpAllow` action.
//!
//! The teacher's `ferron::util::ip_blocklist::IpBlockList` only matches
//! exact addresses (plus a `"localhost"` special case). `SNI_IpAllow` needs
//! range matching, so this reimplements the same "load from config strings,
//! then check membership" shape using the `cidr` crate instead.

use cidr::{Cidr, IpCidr};
use std::net::IpAddr;

#[derive(Debug, Clone, Default)]
pub struct IpAllowList {
  ranges: Vec<IpCidr>,
}

impl IpAllowList {
  pub fn new() -> Self {
    Self::default()
  }

  /// Parses each entry as a CIDR range (a bare address is treated as a /32
  /// or /128). Returns the entries that failed to parse so the caller can
  /// log them without aborting the whole config load.
  pub fn load_from_vec(entries: &[String]) -> (Self, Vec<String>) {
    let mut ranges = Vec::with_capacity(entries.len());
    let mut rejected = Vec::new();
    for entry in entries {
      match entry.parse::<IpCidr>() {
        Ok(cidr) => ranges.push(cidr),
        Err(_) => match entry.parse::<IpAddr>() {
          Ok(addr) => ranges.push(IpCidr::new_host(addr)),
          Err(_) => rejected.push(entry.clone()),
        },
      }
    }
    (Self { ranges }, rejected)
  }

  /// An empty allow list matches nothing set up — callers treat "no
  /// `SNI_IpAllow` action present" as "allow everyone" at a higher layer;
  /// this type only answers "is this address covered by a configured range".
  pub fn contains(&self, addr: IpAddr) -> bool {
    let addr = addr.to_canonical();
    self.ranges.iter().any(|range| range.contains(&addr))
  }

  pub fn is_empty(&self) -> bool {
    self.ranges.is_empty()
  }
}
