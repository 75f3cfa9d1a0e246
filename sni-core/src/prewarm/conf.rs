//! Per-`Dst` pre-warm tuning, grounded on `PreWarm::Conf` in
//! `iocore/net/PreWarm.h`.

use crate::action::{VerifyPolicy, VerifyProperties};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PreWarmConfig {
  /// Floor: the queue never lets the init+open count for a `Dst` drop
  /// below this while the rule is active.
  pub min: u32,
  /// Ceiling: `-1` (modeled as `None`) means unbounded, matching the
  /// original's `int32_t max` where negative means "no cap".
  pub max: Option<u32>,
  /// Fraction of observed demand the adaptive sizing algorithm tries to
  /// keep pre-warmed, in `(0.0, 1.0]`.
  pub rate: f64,
  pub connect_timeout: Duration,
  pub inactive_timeout: Duration,
  pub srv_enabled: bool,
  pub verify_server_policy: VerifyPolicy,
  pub verify_server_properties: VerifyProperties,
  pub sni: String,
}

impl PreWarmConfig {
  pub fn new(
    min: u32,
    max: Option<u32>,
    rate: f64,
    connect_timeout: Duration,
    inactive_timeout: Duration,
    srv_enabled: bool,
    verify_server_policy: VerifyPolicy,
    verify_server_properties: VerifyProperties,
    sni: String,
  ) -> Self {
    Self {
      min,
      max,
      rate,
      connect_timeout,
      inactive_timeout,
      srv_enabled,
      verify_server_policy,
      verify_server_properties,
      sni,
    }
  }

  pub fn within_bounds(&self, desired: u32) -> u32 {
    let desired = desired.max(self.min);
    match self.max {
      Some(max) => desired.min(max),
      None => desired,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn conf(min: u32, max: Option<u32>) -> PreWarmConfig {
    PreWarmConfig::new(
      min,
      max,
      1.0,
      Duration::from_secs(1),
      Duration::from_secs(30),
      false,
      VerifyPolicy::Disabled,
      VerifyProperties::default(),
      String::new(),
    )
  }

  #[test]
  fn within_bounds_enforces_floor_and_ceiling() {
    let c = conf(2, Some(5));
    assert_eq!(c.within_bounds(0), 2);
    assert_eq!(c.within_bounds(10), 5);
    assert_eq!(c.within_bounds(3), 3);
  }

  #[test]
  fn no_max_means_unbounded() {
    let c = conf(0, None);
    assert_eq!(c.within_bounds(1_000), 1_000);
  }
}
