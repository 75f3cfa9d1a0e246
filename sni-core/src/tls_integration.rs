//! The seam between the rule store's decisions and an actual TLS library.
//!
//! This core never negotiates a handshake itself — per the rule store's
//! contract, that's delegated to the TLS collaborator. What it does own is
//! turning a ClientHello's contents into a [`ConnectionDecision`] and, for
//! rejections, a clean way to stop before any bytes of a real response are
//! written.
//!
//! Grounded on `ferron::util::tls::CustomSniResolver`, which is the
//! teacher's closest analogue: a `rustls::server::ResolvesServerCert` impl
//! that inspects `ClientHello` (SNI, in that case) before a certificate is
//! handed back. `rustls::server::Acceptor` (used in
//! `ferron/src/server.rs`'s accept loop via `LazyConfigAcceptor`) goes
//! further and exposes the full parsed ClientHello — SNI, ALPN protocols
//! offered, signature schemes — before any `ServerConfig` is committed to,
//! which is the real point in the handshake the rule store's actions need
//! to run at.

use crate::action::{ApplyOutcome, ConnCtx, HostSniPolicy, RoutingType, TlsVersion, VerifyPolicy, VerifyProperties};
use crate::rulestore::RuleStore;
use std::net::IpAddr;

/// Accumulates every decision the action pipeline makes for one connection.
/// Built up by [`ConnCtx`] calls, then handed to whatever builds the final
/// `rustls::ServerConfig` (or declines to, on `FatalAlert`).
#[derive(Debug, Clone, Default)]
pub struct ConnectionDecision {
  pub h2_enabled: Option<bool>,
  pub quic_enabled: Option<bool>,
  pub http2_buffer_water_mark: Option<u32>,
  pub http2_initial_window_size_in: Option<u32>,
  pub http2_max_settings_frames_per_minute: Option<u32>,
  pub http2_max_ping_frames_per_minute: Option<u32>,
  pub http2_max_priority_frames_per_minute: Option<u32>,
  pub http2_max_rst_stream_frames_per_minute: Option<u32>,
  pub http2_max_continuation_frames_per_minute: Option<u32>,
  pub verify_client: Option<(VerifyPolicy, Option<String>, Option<String>)>,
  /// Published during the probe phase, not at apply() time — see
  /// `Action::probe`'s `HostSniPolicy` arm.
  pub host_sni_policy: Option<HostSniPolicy>,
  pub tls_valid_protocols_mask: Option<u8>,
  pub tls_valid_protocol_range: Option<(Option<TlsVersion>, Option<TlsVersion>)>,
  pub outbound_sni_policy: Option<(String, VerifyPolicy, VerifyProperties, Option<String>, Option<String>)>,
  pub server_max_early_data: Option<u32>,
  pub tunnel_destination: Option<(String, RoutingType, Vec<String>)>,
}

/// The read-only connection facts the TLS collaborator supplies, plus the
/// mutable decision the pipeline is building. This is the concrete
/// `ConnCtx` implementation production code hands to `Action::apply`.
pub struct ClientHelloContext {
  peer_addr: IpAddr,
  inbound_local_port: u16,
  proxy_protocol_port: Option<u16>,
  capture_groups: Vec<String>,
  decision: ConnectionDecision,
}

impl ClientHelloContext {
  pub fn new(
    peer_addr: IpAddr,
    inbound_local_port: u16,
    proxy_protocol_port: Option<u16>,
    capture_groups: Vec<String>,
  ) -> Self {
    Self {
      peer_addr,
      inbound_local_port,
      proxy_protocol_port,
      capture_groups,
      decision: ConnectionDecision::default(),
    }
  }

  pub fn into_decision(self) -> ConnectionDecision {
    self.decision
  }
}

impl ConnCtx for ClientHelloContext {
  fn peer_addr(&self) -> IpAddr {
    self.peer_addr
  }
  fn inbound_local_port(&self) -> u16 {
    self.inbound_local_port
  }
  fn proxy_protocol_port(&self) -> Option<u16> {
    self.proxy_protocol_port
  }
  fn capture_groups(&self) -> &[String] {
    &self.capture_groups
  }
  fn set_h2_enabled(&mut self, enabled: bool) {
    self.decision.h2_enabled = Some(enabled);
  }
  fn set_quic_enabled(&mut self, enabled: bool) {
    self.decision.quic_enabled = Some(enabled);
  }
  fn set_http2_tuning(
    &mut self,
    buffer_water_mark: Option<u32>,
    initial_window_size_in: Option<u32>,
    max_settings_frames_per_minute: Option<u32>,
    max_ping_frames_per_minute: Option<u32>,
    max_priority_frames_per_minute: Option<u32>,
    max_rst_stream_frames_per_minute: Option<u32>,
    max_continuation_frames_per_minute: Option<u32>,
  ) {
    self.decision.http2_buffer_water_mark = buffer_water_mark;
    self.decision.http2_initial_window_size_in = initial_window_size_in;
    self.decision.http2_max_settings_frames_per_minute = max_settings_frames_per_minute;
    self.decision.http2_max_ping_frames_per_minute = max_ping_frames_per_minute;
    self.decision.http2_max_priority_frames_per_minute = max_priority_frames_per_minute;
    self.decision.http2_max_rst_stream_frames_per_minute = max_rst_stream_frames_per_minute;
    self.decision.http2_max_continuation_frames_per_minute = max_continuation_frames_per_minute;
  }
  fn set_verify_client(&mut self, policy: VerifyPolicy, ca_file: Option<String>, ca_dir: Option<String>) {
    self.decision.verify_client = Some((policy, ca_file, ca_dir));
  }
  fn set_host_sni_policy(&mut self, policy: HostSniPolicy) {
    self.decision.host_sni_policy = Some(policy);
  }
  fn set_tls_valid_protocols(&mut self, mask: Option<u8>, min: Option<TlsVersion>, max: Option<TlsVersion>) {
    self.decision.tls_valid_protocols_mask = mask;
    self.decision.tls_valid_protocol_range = if min.is_some() || max.is_some() { Some((min, max)) } else { None };
  }
  fn set_outbound_sni_policy(
    &mut self,
    sni: String,
    verify_policy: VerifyPolicy,
    verify_properties: VerifyProperties,
    client_cert_file: Option<String>,
    client_key_file: Option<String>,
  ) {
    self.decision.outbound_sni_policy = Some((sni, verify_policy, verify_properties, client_cert_file, client_key_file));
  }
  fn set_server_max_early_data(&mut self, bytes: u32) {
    self.decision.server_max_early_data = Some(bytes);
  }
  fn set_tunnel_destination(&mut self, template: String, routing_type: RoutingType, tunnel_alpn: Vec<String>) {
    self.decision.tunnel_destination = Some((template, routing_type, tunnel_alpn));
  }
}

/// Runs the full two-phase lookup: `probe()` every action first (so an
/// `SNI_IpAllow`/`host_sni_policy` rejection never touches `ctx`), then, if
/// nothing vetoed it, `apply()` each action in order. Returns the first
/// `FatalAlert` encountered, or `Continue` with `ctx` fully updated.
pub fn decide(store: &RuleStore, hostname: &str, ctx: &mut ClientHelloContext) -> ApplyOutcome {
  let Some(lookup) = store.lookup(hostname, ctx.inbound_local_port()) else {
    return ApplyOutcome::FatalAlert(crate::action::AlertDescription::UnrecognizedName);
  };

  for action in &lookup.rule.actions {
    match action.probe(ctx) {
      ApplyOutcome::Continue => {}
      other => return other,
    }
  }

  for action in &lookup.rule.actions {
    match action.apply(ctx) {
      ApplyOutcome::Continue => {}
      other => return other,
    }
  }
  ApplyOutcome::Continue
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::action::Action;
  use crate::rule::Rule;
  use std::net::Ipv4Addr;

  #[test]
  fn unmatched_hostname_is_fatal() {
    let store = RuleStore::build(Vec::new()).unwrap();
    let mut ctx = ClientHelloContext::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 443, None, Vec::new());
    let outcome = decide(&store, "nope.example.com", &mut ctx);
    assert_eq!(
      outcome,
      ApplyOutcome::FatalAlert(crate::action::AlertDescription::UnrecognizedName)
    );
  }

  #[test]
  fn matched_hostname_records_decisions() {
    let rule = Rule::new(
      "example.com".to_string(),
      Vec::new(),
      0,
      vec![Action::ControlH2(false), Action::ServerMaxEarlyData(4096)],
    )
    .unwrap();
    let store = RuleStore::build(vec![rule]).unwrap();
    let mut ctx = ClientHelloContext::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 443, None, Vec::new());
    let outcome = decide(&store, "example.com", &mut ctx);
    assert_eq!(outcome, ApplyOutcome::Continue);
    let decision = ctx.into_decision();
    assert_eq!(decision.h2_enabled, Some(false));
    assert_eq!(decision.server_max_early_data, Some(4096));
  }

  #[test]
  fn ip_allow_rejection_is_caught_by_probe_before_apply() {
    let (list, _) = crate::util::ip_allow::IpAllowList::load_from_vec(&["10.0.0.0/8".to_string()]);
    let rule = Rule::new(
      "example.com".to_string(),
      Vec::new(),
      0,
      vec![Action::SniIpAllow(list), Action::ControlH2(false)],
    )
    .unwrap();
    let store = RuleStore::build(vec![rule]).unwrap();
    let mut ctx = ClientHelloContext::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)), 443, None, Vec::new());
    let outcome = decide(&store, "example.com", &mut ctx);
    assert_eq!(
      outcome,
      ApplyOutcome::FatalAlert(crate::action::AlertDescription::AccessDenied)
    );
    assert_eq!(ctx.decision.h2_enabled, None, "apply phase must not run after a probe veto");
  }
}
