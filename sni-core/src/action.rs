//! The per-rule action pipeline: verbs a matched rule hands to the
//! connection, plus the two entry points into it (`apply`, side-effecting,
//! and `probe`, side-effect free).
//!
//! Action kinds and their YAML names follow `YamlSNIConfig::Action` from the
//! originating system (`disable_h2`, `verify_client`, `tunnel_route`,
//! `forward_route`, `partial_blind_route`, `host_sni_policy`, `ip_allow`,
//! `valid_tls_versions_in`, ...). `apply()`'s effect-application shape is
//! grounded on `ferron/src/setup/tls.rs`'s builder functions, which mutate a
//! shared `TlsBuildContext` one decision at a time and bail with an error on
//! the first unrecoverable one.

use crate::util::ip_allow::IpAllowList;
use std::net::IpAddr;
use std::time::Duration;

/// TLS alert codes a fatal action outcome can report, restricted to the
/// ones this core actually has reason to raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDescription {
  UnrecognizedName,
  AccessDenied,
  HandshakeFailure,
  InternalError,
}

/// What applying (or probing) a single action produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
  /// The action had no objection; continue to the next one in the rule.
  Continue,
  /// The action wants the whole pipeline retried from the start (used when
  /// a later rule should take over, e.g. SNI remap after `host_sni_policy`
  /// learns more about the connection).
  Retry,
  /// The connection must be aborted with this alert; no further actions in
  /// the rule run.
  FatalAlert(AlertDescription),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyPolicy {
  Disabled,
  Permissive,
  Enforced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VerifyProperties {
  pub check_signature: bool,
  pub check_name: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSniPolicy {
  Permissive,
  Enforced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutingType {
  /// `tunnel_route`: blind TCP tunnel, no TLS termination here.
  Tunnel,
  /// `forward_route`: decrypt, then blind-tunnel the plaintext.
  Forward,
  /// `partial_blind_route`: decrypt, re-encrypt to the upstream with our
  /// own outbound TLS handshake.
  PartialBlind,
}

/// A single TLS protocol version, for the `valid_tls_version_min_in`/
/// `valid_tls_version_max_in` range form. Ordered oldest to newest so a
/// `min..=max` range can be checked with plain comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
  TlsV1,
  TlsV1_1,
  TlsV1_2,
  TlsV1_3,
}

/// Per-rule pre-warm pool knobs (`tunnel_prewarm*` keys), carried on
/// `TunnelDestination` since the pre-warm registry's `Conf` is built
/// per-rule, not from a single global default.
#[derive(Debug, Clone, PartialEq)]
pub struct PreWarmKnobs {
  pub enabled: bool,
  pub min: u32,
  pub max: Option<u32>,
  pub rate: f64,
  pub connect_timeout: Duration,
  pub inactive_timeout: Duration,
  pub srv_enabled: bool,
}

impl Default for PreWarmKnobs {
  /// `tunnel_prewarm` unset means disabled — pre-warming is opt-in per
  /// rule, never inferred from routing type alone.
  fn default() -> Self {
    Self {
      enabled: false,
      min: 0,
      max: None,
      rate: 1.0,
      connect_timeout: Duration::from_secs(5),
      inactive_timeout: Duration::from_secs(30),
      srv_enabled: false,
    }
  }
}

/// One verb from a matched rule's action list. Construction happens in
/// `config.rs`; application happens here.
#[derive(Debug, Clone)]
pub enum Action {
  ControlH2(bool),
  ControlQuic(bool),
  Http2Tuning {
    buffer_water_mark: Option<u32>,
    initial_window_size_in: Option<u32>,
    max_settings_frames_per_minute: Option<u32>,
    max_ping_frames_per_minute: Option<u32>,
    max_priority_frames_per_minute: Option<u32>,
    max_rst_stream_frames_per_minute: Option<u32>,
    max_continuation_frames_per_minute: Option<u32>,
  },
  VerifyClient {
    policy: VerifyPolicy,
    ca_file: Option<String>,
    ca_dir: Option<String>,
  },
  HostSniPolicy(HostSniPolicy),
  TlsValidProtocols {
    /// Deprecated mask form (`valid_tls_versions_in`): bit 0 = TLSv1.0 ...
    /// bit 3 = TLSv1.3, matching the original's `protocol_mask` bit
    /// layout. Ignored whenever `min`/`max` is set — the range form is
    /// authoritative when present.
    mask: Option<u8>,
    /// Preferred range form (`valid_tls_version_min_in`/`_max_in`).
    min: Option<TlsVersion>,
    max: Option<TlsVersion>,
  },
  SniIpAllow(IpAllowList),
  OutboundSniPolicy {
    sni: String,
    verify_policy: VerifyPolicy,
    verify_properties: VerifyProperties,
    client_cert_file: Option<String>,
    client_key_file: Option<String>,
  },
  ServerMaxEarlyData(u32),
  TunnelDestination {
    template: String,
    routing_type: RoutingType,
    tunnel_alpn: Vec<String>,
    prewarm: PreWarmKnobs,
  },
}

/// Everything an action needs to read about the connection it is being
/// applied to, and everywhere it can record a decision. Library users
/// implement the parts sourced from the TLS collaborator (peer address,
/// offered ALPN, inbound local port, PROXY-protocol port); `sni-core` owns
/// the decision-accumulation fields.
pub trait ConnCtx {
  fn peer_addr(&self) -> IpAddr;
  fn inbound_local_port(&self) -> u16;
  fn proxy_protocol_port(&self) -> Option<u16>;
  fn capture_groups(&self) -> &[String];

  fn set_h2_enabled(&mut self, enabled: bool);
  fn set_quic_enabled(&mut self, enabled: bool);
  #[allow(clippy::too_many_arguments)]
  fn set_http2_tuning(
    &mut self,
    buffer_water_mark: Option<u32>,
    initial_window_size_in: Option<u32>,
    max_settings_frames_per_minute: Option<u32>,
    max_ping_frames_per_minute: Option<u32>,
    max_priority_frames_per_minute: Option<u32>,
    max_rst_stream_frames_per_minute: Option<u32>,
    max_continuation_frames_per_minute: Option<u32>,
  );
  fn set_verify_client(&mut self, policy: VerifyPolicy, ca_file: Option<String>, ca_dir: Option<String>);
  /// Publishes a probed `HostSniPolicy` to the caller. Only ever called
  /// from [`Action::probe`] — `HostSniPolicy` does nothing at `apply()`
  /// time.
  fn set_host_sni_policy(&mut self, policy: HostSniPolicy);
  fn set_tls_valid_protocols(&mut self, mask: Option<u8>, min: Option<TlsVersion>, max: Option<TlsVersion>);
  fn set_outbound_sni_policy(
    &mut self,
    sni: String,
    verify_policy: VerifyPolicy,
    verify_properties: VerifyProperties,
    client_cert_file: Option<String>,
    client_key_file: Option<String>,
  );
  fn set_server_max_early_data(&mut self, bytes: u32);
  fn set_tunnel_destination(&mut self, template: String, routing_type: RoutingType, tunnel_alpn: Vec<String>);
}

impl Action {
  /// `true` for the two actions `probe()` is allowed to run: they must stay
  /// side-effect free since probing happens before a rule is committed to.
  fn is_probe_safe(&self) -> bool {
    matches!(self, Action::SniIpAllow(_) | Action::HostSniPolicy(_))
  }

  /// Applies the action's effect to `ctx`, recording a decision or
  /// returning a retry/fatal outcome.
  pub fn apply(&self, ctx: &mut dyn ConnCtx) -> ApplyOutcome {
    match self {
      Action::ControlH2(enabled) => {
        ctx.set_h2_enabled(*enabled);
        ApplyOutcome::Continue
      }
      Action::ControlQuic(enabled) => {
        ctx.set_quic_enabled(*enabled);
        ApplyOutcome::Continue
      }
      Action::Http2Tuning {
        buffer_water_mark,
        initial_window_size_in,
        max_settings_frames_per_minute,
        max_ping_frames_per_minute,
        max_priority_frames_per_minute,
        max_rst_stream_frames_per_minute,
        max_continuation_frames_per_minute,
      } => {
        ctx.set_http2_tuning(
          *buffer_water_mark,
          *initial_window_size_in,
          *max_settings_frames_per_minute,
          *max_ping_frames_per_minute,
          *max_priority_frames_per_minute,
          *max_rst_stream_frames_per_minute,
          *max_continuation_frames_per_minute,
        );
        ApplyOutcome::Continue
      }
      Action::VerifyClient {
        policy,
        ca_file,
        ca_dir,
      } => {
        ctx.set_verify_client(*policy, ca_file.clone(), ca_dir.clone());
        ApplyOutcome::Continue
      }
      // `HostSniPolicy` does nothing at apply() time — it is published to
      // the caller only during the probe phase (see `probe()` below).
      Action::HostSniPolicy(_) => ApplyOutcome::Continue,
      Action::TlsValidProtocols { mask, min, max } => {
        ctx.set_tls_valid_protocols(*mask, *min, *max);
        ApplyOutcome::Continue
      }
      Action::SniIpAllow(allow_list) => {
        if allow_list.is_empty() || allow_list.contains(ctx.peer_addr()) {
          ApplyOutcome::Continue
        } else {
          ApplyOutcome::FatalAlert(AlertDescription::AccessDenied)
        }
      }
      Action::OutboundSniPolicy {
        sni,
        verify_policy,
        verify_properties,
        client_cert_file,
        client_key_file,
      } => {
        ctx.set_outbound_sni_policy(
          sni.clone(),
          *verify_policy,
          *verify_properties,
          client_cert_file.clone(),
          client_key_file.clone(),
        );
        ApplyOutcome::Continue
      }
      Action::ServerMaxEarlyData(bytes) => {
        ctx.set_server_max_early_data(*bytes);
        ApplyOutcome::Continue
      }
      Action::TunnelDestination {
        template,
        routing_type,
        tunnel_alpn,
        prewarm: _,
      } => {
        ctx.set_tunnel_destination(template.clone(), *routing_type, tunnel_alpn.clone());
        ApplyOutcome::Continue
      }
    }
  }

  /// Side-effect-free pre-check: only `SNI_IpAllow` and `HostSniPolicy` run
  /// here, everything else is a no-op `Continue`. Used before committing to
  /// a rule, to let a client-IP rejection surface without first mutating
  /// connection state that a retry would need to unwind. `HostSniPolicy` is
  /// the one exception to "side-effect free": its whole contract is that it
  /// publishes `policy` to the caller during this phase rather than at
  /// `apply()` time.
  pub fn probe(&self, ctx: &mut dyn ConnCtx) -> ApplyOutcome {
    if !self.is_probe_safe() {
      return ApplyOutcome::Continue;
    }
    match self {
      Action::SniIpAllow(allow_list) => {
        if allow_list.is_empty() || allow_list.contains(ctx.peer_addr()) {
          ApplyOutcome::Continue
        } else {
          ApplyOutcome::FatalAlert(AlertDescription::AccessDenied)
        }
      }
      Action::HostSniPolicy(policy) => {
        ctx.set_host_sni_policy(*policy);
        ApplyOutcome::Continue
      }
      _ => ApplyOutcome::Continue,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::net::Ipv4Addr;

  struct TestCtx {
    peer: IpAddr,
    h2: Option<bool>,
    host_sni_policy: Option<HostSniPolicy>,
  }

  impl ConnCtx for TestCtx {
    fn peer_addr(&self) -> IpAddr {
      self.peer
    }
    fn inbound_local_port(&self) -> u16 {
      443
    }
    fn proxy_protocol_port(&self) -> Option<u16> {
      None
    }
    fn capture_groups(&self) -> &[String] {
      &[]
    }
    fn set_h2_enabled(&mut self, enabled: bool) {
      self.h2 = Some(enabled);
    }
    fn set_quic_enabled(&mut self, _enabled: bool) {}
    fn set_http2_tuning(
      &mut self,
      _buffer_water_mark: Option<u32>,
      _initial_window_size_in: Option<u32>,
      _max_settings: Option<u32>,
      _max_ping: Option<u32>,
      _max_priority: Option<u32>,
      _max_rst_stream: Option<u32>,
      _max_continuation: Option<u32>,
    ) {
    }
    fn set_verify_client(&mut self, _p: VerifyPolicy, _f: Option<String>, _d: Option<String>) {}
    fn set_host_sni_policy(&mut self, policy: HostSniPolicy) {
      self.host_sni_policy = Some(policy);
    }
    fn set_tls_valid_protocols(&mut self, _mask: Option<u8>, _min: Option<TlsVersion>, _max: Option<TlsVersion>) {}
    fn set_outbound_sni_policy(
      &mut self,
      _sni: String,
      _vp: VerifyPolicy,
      _props: VerifyProperties,
      _cert: Option<String>,
      _key: Option<String>,
    ) {
    }
    fn set_server_max_early_data(&mut self, _bytes: u32) {}
    fn set_tunnel_destination(&mut self, _t: String, _rt: RoutingType, _alpn: Vec<String>) {}
  }

  #[test]
  fn control_h2_records_decision() {
    let mut ctx = TestCtx {
      peer: IpAddr::V4(Ipv4Addr::LOCALHOST),
      h2: None,
      host_sni_policy: None,
    };
    let outcome = Action::ControlH2(false).apply(&mut ctx);
    assert_eq!(outcome, ApplyOutcome::Continue);
    assert_eq!(ctx.h2, Some(false));
  }

  #[test]
  fn ip_allow_denies_outside_range() {
    let (list, _) = IpAllowList::load_from_vec(&["10.0.0.0/8".to_string()]);
    let mut ctx = TestCtx {
      peer: "192.168.1.1".parse().unwrap(),
      h2: None,
      host_sni_policy: None,
    };
    let outcome = Action::SniIpAllow(list).apply(&mut ctx);
    assert_eq!(outcome, ApplyOutcome::FatalAlert(AlertDescription::AccessDenied));
  }

  #[test]
  fn non_probe_safe_actions_are_noop_under_probe() {
    let mut ctx = TestCtx {
      peer: IpAddr::V4(Ipv4Addr::LOCALHOST),
      h2: None,
      host_sni_policy: None,
    };
    let outcome = Action::ControlH2(true).probe(&mut ctx);
    assert_eq!(outcome, ApplyOutcome::Continue);
    assert_eq!(ctx.h2, None, "probe must not mutate connection state");
  }

  #[test]
  fn host_sni_policy_is_noop_on_apply_and_published_on_probe() {
    let mut ctx = TestCtx {
      peer: IpAddr::V4(Ipv4Addr::LOCALHOST),
      h2: None,
      host_sni_policy: None,
    };
    let action = Action::HostSniPolicy(HostSniPolicy::Enforced);
    assert_eq!(action.apply(&mut ctx), ApplyOutcome::Continue);
    assert_eq!(ctx.host_sni_policy, None, "apply() must not publish the policy");
    assert_eq!(action.probe(&mut ctx), ApplyOutcome::Continue);
    assert_eq!(ctx.host_sni_policy, Some(HostSniPolicy::Enforced));
  }
}
