//! The pre-warm registry: the process-global map from `Dst` to
//! `PreWarmConfig` that every thread's [`ThreadQueue`](super::queue::ThreadQueue)
//! is reconfigured against after a rule store reload.
//!
//! Building this from the rule store is grounded on
//! `ferron-common::http_proxy::load_balancer::resolve_upstreams`, which
//! walks a rule's backend list and resolves it into concrete dial targets
//! before the connection pool ever touches them — here the equivalent walk
//! is over every rule's `TunnelDestination` action, expanded with an empty
//! capture set (pre-warm happens before any specific connection's wildcard
//! captures are known, so only destinations with no `$N` placeholders and a
//! literal port can be pre-warmed; see Open Question resolution in
//! DESIGN.md).

use crate::action::{Action, RoutingType, VerifyPolicy, VerifyProperties};
use crate::destination::resolve;
use crate::metrics::DstCounters;
use crate::prewarm::conf::PreWarmConfig;
use crate::prewarm::dst::Dst;
use crate::rule::Rule;
use std::collections::HashMap;
use std::sync::Arc;

/// One entry the registry hands out to each thread's queue.
#[derive(Clone)]
pub struct RegistryEntry {
  pub dst: Arc<Dst>,
  pub conf: Arc<PreWarmConfig>,
  pub counters: Arc<DstCounters>,
}

#[derive(Default)]
pub struct PreWarmRegistry {
  entries: HashMap<Arc<Dst>, RegistryEntry>,
}

impl PreWarmRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn entries(&self) -> impl Iterator<Item = &RegistryEntry> {
    self.entries.values()
  }

  pub fn get(&self, dst: &Dst) -> Option<&RegistryEntry> {
    self.entries.get(dst)
  }

  /// Rebuilds the registry by iterating every rule whose actions include a
  /// `TunnelDestination` with `routing_type` in `{Forward, PartialBlind}`
  /// and pre-warming enabled, and whose destination resolves to a literal
  /// host and port (no `$N` placeholders, no dynamic port — those can't be
  /// pre-warmed since the value isn't known until a specific connection's
  /// ClientHello arrives). Each surviving destination is paired with a
  /// `Conf` built from that same rule's `tunnel_prewarm*` knobs and, if
  /// present, its `OutboundSniPolicy` action's verify settings.
  pub fn rebuild(rules: &[Rule]) -> Self {
    let mut entries = HashMap::new();
    for rule in rules {
      for action in &rule.actions {
        let Action::TunnelDestination {
          template,
          routing_type,
          tunnel_alpn,
          prewarm,
        } = action
        else {
          continue;
        };
        if !matches!(routing_type, RoutingType::Forward | RoutingType::PartialBlind) || !prewarm.enabled {
          continue;
        }
        let Ok(resolved) = resolve(template, &[], 0, None) else {
          continue;
        };
        if resolved.port_is_dynamic {
          continue;
        }
        let (verify_policy, verify_properties, sni) = outbound_sni_policy(rule);
        let dst = Arc::new(Dst::new(resolved.host, resolved.port, *routing_type, alpn_index(tunnel_alpn)));
        let conf = Arc::new(PreWarmConfig::new(
          prewarm.min,
          prewarm.max,
          prewarm.rate,
          prewarm.connect_timeout,
          prewarm.inactive_timeout,
          prewarm.srv_enabled,
          verify_policy,
          verify_properties,
          sni,
        ));
        let counters = Arc::new(DstCounters::default());
        entries.insert(dst.clone(), RegistryEntry { dst, conf, counters });
      }
    }
    Self { entries }
  }
}

fn outbound_sni_policy(rule: &Rule) -> (VerifyPolicy, VerifyProperties, String) {
  rule
    .actions
    .iter()
    .find_map(|action| match action {
      Action::OutboundSniPolicy {
        sni,
        verify_policy,
        verify_properties,
        ..
      } => Some((*verify_policy, *verify_properties, sni.clone())),
      _ => None,
    })
    .unwrap_or((VerifyPolicy::Disabled, VerifyProperties::default(), String::new()))
}

fn alpn_index(tunnel_alpn: &[String]) -> Option<u16> {
  if tunnel_alpn.is_empty() {
    None
  } else {
    Some(0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::action::PreWarmKnobs;

  fn enabled_prewarm(min: u32) -> PreWarmKnobs {
    PreWarmKnobs {
      enabled: true,
      min,
      ..PreWarmKnobs::default()
    }
  }

  #[test]
  fn literal_destination_with_prewarm_enabled_is_registered() {
    let rule = Rule::new(
      "api.example.com".to_string(),
      Vec::new(),
      0,
      vec![Action::TunnelDestination {
        template: "backend.internal:8443".to_string(),
        routing_type: RoutingType::PartialBlind,
        tunnel_alpn: Vec::new(),
        prewarm: enabled_prewarm(2),
      }],
    )
    .unwrap();
    let registry = PreWarmRegistry::rebuild(&[rule]);
    assert_eq!(registry.entries().count(), 1);
    let entry = registry.entries().next().unwrap();
    assert_eq!(entry.conf.min, 2);
  }

  #[test]
  fn prewarm_disabled_by_default_is_not_registered() {
    let rule = Rule::new(
      "api.example.com".to_string(),
      Vec::new(),
      0,
      vec![Action::TunnelDestination {
        template: "backend.internal:8443".to_string(),
        routing_type: RoutingType::PartialBlind,
        tunnel_alpn: Vec::new(),
        prewarm: PreWarmKnobs::default(),
      }],
    )
    .unwrap();
    let registry = PreWarmRegistry::rebuild(&[rule]);
    assert_eq!(registry.entries().count(), 0);
  }

  #[test]
  fn blind_tunnel_routing_is_never_prewarmed() {
    let rule = Rule::new(
      "api.example.com".to_string(),
      Vec::new(),
      0,
      vec![Action::TunnelDestination {
        template: "backend.internal:8443".to_string(),
        routing_type: RoutingType::Tunnel,
        tunnel_alpn: Vec::new(),
        prewarm: enabled_prewarm(2),
      }],
    )
    .unwrap();
    let registry = PreWarmRegistry::rebuild(&[rule]);
    assert_eq!(registry.entries().count(), 0);
  }

  #[test]
  fn dynamic_port_destination_is_skipped() {
    let rule = Rule::new(
      "api.example.com".to_string(),
      Vec::new(),
      0,
      vec![Action::TunnelDestination {
        template: "backend.internal:{inbound_local_port}".to_string(),
        routing_type: RoutingType::Forward,
        tunnel_alpn: Vec::new(),
        prewarm: enabled_prewarm(2),
      }],
    )
    .unwrap();
    let registry = PreWarmRegistry::rebuild(&[rule]);
    assert_eq!(registry.entries().count(), 0);
  }

  #[test]
  fn capture_group_destination_is_skipped() {
    let rule = Rule::new(
      "*.example.com".to_string(),
      Vec::new(),
      0,
      vec![Action::TunnelDestination {
        template: "$1.backend.internal:443".to_string(),
        routing_type: RoutingType::Forward,
        tunnel_alpn: Vec::new(),
        prewarm: enabled_prewarm(2),
      }],
    )
    .unwrap();
    let registry = PreWarmRegistry::rebuild(&[rule]);
    assert_eq!(registry.entries().count(), 0);
  }
}
