//! YAML config loading, in the untyped-indexing style of
//! `ferron::util::load_config`/`ferron::config::mod::parse_conditional_data`:
//! no serde, just `Yaml` indexing with `anyhow::anyhow!` on anything
//! missing or mistyped.
//!
//! Top-level shape:
//! ```yaml
//! snimatch:
//!   - fqdn: "*.example.com"
//!     inbound_port_ranges: ["443", "8000-8443"]
//!     disable_h2: true
//!     verify_client: enforced
//!     verify_client_ca_certs: /etc/pki/clients-ca.pem
//!     host_sni_policy: enforced
//!     valid_tls_version_min_in: tlsv1_2
//!     valid_tls_version_max_in: tlsv1_3
//!     http2_buffer_water_mark: 65536
//!     http2_initial_window_size_in: 65536
//!     http2_max_settings_frames_per_minute: 60
//!     ip_allow: ["10.0.0.0/8"]
//!     tunnel_route: "backend.internal:8443"      # or forward_route / partial_blind_route
//!     tunnel_alpn: ["h2", "http/1.1"]
//!     tunnel_prewarm: true
//!     tunnel_prewarm_min: 2
//!     tunnel_prewarm_max: 8
//!     tunnel_prewarm_rate: 1.5
//!     verify_server_policy: enforced
//!     verify_server_properties: [signature, name]
//!     outbound_sni: backend.example.internal
//!     server_max_early_data: 16384
//! prewarm:
//!   sizing_algorithm: adaptive                    # or fixed_min
//! ```
//!
//! Rules are ranked by their position in `snimatch`, not by a config key —
//! the first entry is rank 0 and therefore highest priority. Pre-warm
//! knobs (`tunnel_prewarm*`) are per-rule, since the pre-warm pool's `Conf`
//! is built from the rule that owns each destination; `prewarm:` at the
//! top level only selects the pool sizing algorithm, which is process-wide.

use crate::action::{
  Action, HostSniPolicy, PreWarmKnobs, RoutingType, TlsVersion, VerifyPolicy, VerifyProperties,
};
use crate::log::LogMessage;
use crate::prewarm::SizingAlgorithm;
use crate::rule::Rule;
use crate::util::ip_allow::IpAllowList;
use anyhow::{anyhow, bail, Context, Result};
use std::time::Duration;
use yaml_rust2::{Yaml, YamlLoader};

#[derive(Debug, Clone)]
pub struct PreWarmSettings {
  pub sizing_algorithm: SizingAlgorithm,
}

impl Default for PreWarmSettings {
  fn default() -> Self {
    Self {
      sizing_algorithm: SizingAlgorithm::FixedMin,
    }
  }
}

pub struct LoadedConfig {
  pub rules: Vec<Rule>,
  pub prewarm: PreWarmSettings,
}

/// Parses a YAML document's text into rules and pre-warm settings.
///
/// Per-rule problems (an unparsable wildcard, an unknown enum value) are
/// logged through `logger` and the offending rule is skipped rather than
/// failing the whole load, matching the originating system's
/// `Errata`-accumulating `YamlSNIConfig::loader`. A structurally broken
/// document (not valid YAML, missing `snimatch` entirely) is a hard error.
pub async fn load(yaml_text: &str, logger: &Option<async_channel::Sender<LogMessage>>) -> Result<LoadedConfig> {
  let docs = YamlLoader::load_from_str(yaml_text).context("failed to parse YAML config")?;
  let doc = docs.first().ok_or_else(|| anyhow!("empty YAML document"))?;

  let prewarm = match doc["prewarm"].as_hash() {
    Some(_) => parse_prewarm_settings(&doc["prewarm"])?,
    None => PreWarmSettings::default(),
  };

  let items = doc["snimatch"]
    .as_vec()
    .ok_or_else(|| anyhow!("missing or invalid top-level \"snimatch\" list"))?;

  let mut rules = Vec::with_capacity(items.len());
  for (index, item) in items.iter().enumerate() {
    match parse_rule(item, index) {
      Ok((rule, warnings)) => {
        for warning in warnings {
          crate::log::log_info(logger, warning).await;
        }
        rules.push(rule);
      }
      Err(err) => {
        crate::log::log_error(logger, format!("skipping snimatch entry {index}: {err:#}")).await;
      }
    }
  }

  Ok(LoadedConfig { rules, prewarm })
}

fn parse_prewarm_settings(yaml: &Yaml) -> Result<PreWarmSettings> {
  let mut settings = PreWarmSettings::default();
  if let Some(v) = yaml["sizing_algorithm"].as_str() {
    settings.sizing_algorithm = match v {
      "fixed_min" => SizingAlgorithm::FixedMin,
      "adaptive" => SizingAlgorithm::Adaptive,
      other => bail!("unknown sizing_algorithm {other:?}"),
    };
  }
  Ok(settings)
}

/// Parses a single port or `N-M` range.
fn parse_port_range_entry(value: &str) -> Result<(u16, u16)> {
  if let Some((lo, hi)) = value.split_once('-') {
    let lo: u16 = lo.trim().parse().context("invalid lower bound")?;
    let hi: u16 = hi.trim().parse().context("invalid upper bound")?;
    if lo > hi {
      bail!("lower bound {lo} is greater than upper bound {hi}");
    }
    Ok((lo, hi))
  } else {
    let port: u16 = value.trim().parse().context("invalid port")?;
    Ok((port, port))
  }
}

fn yaml_scalar_to_string(yaml: &Yaml) -> Option<String> {
  match yaml {
    Yaml::String(s) => Some(s.clone()),
    Yaml::Integer(n) => Some(n.to_string()),
    _ => None,
  }
}

/// Parses `inbound_port_ranges`, accepted as a scalar or a sequence of
/// `"N"`/`"N-M"` entries (or bare integers). Absent entirely means "any
/// port", represented as an empty `Vec`.
fn parse_port_ranges(item: &Yaml, index: usize) -> Result<Vec<(u16, u16)>> {
  let yaml = &item["inbound_port_ranges"];
  let scalars: Vec<String> = match yaml {
    Yaml::BadValue | Yaml::Null => Vec::new(),
    Yaml::Array(entries) => entries
      .iter()
      .map(|entry| {
        yaml_scalar_to_string(entry)
          .ok_or_else(|| anyhow!("snimatch[{index}] inbound_port_ranges entries must be strings or integers"))
      })
      .collect::<Result<_>>()?,
    other => vec![yaml_scalar_to_string(other)
      .ok_or_else(|| anyhow!("snimatch[{index}] inbound_port_ranges must be a string, integer, or list"))?],
  };
  scalars
    .iter()
    .map(|s| parse_port_range_entry(s).with_context(|| format!("snimatch[{index}] invalid inbound_port_ranges entry {s:?}")))
    .collect()
}

fn parse_tls_version(value: &str, index: usize) -> Result<TlsVersion> {
  Ok(match value {
    "tlsv1" => TlsVersion::TlsV1,
    "tlsv1_1" => TlsVersion::TlsV1_1,
    "tlsv1_2" => TlsVersion::TlsV1_2,
    "tlsv1_3" => TlsVersion::TlsV1_3,
    other => bail!("snimatch[{index}] unknown TLS version {other:?}"),
  })
}

/// Reads `tunnel_prewarm*` into a per-rule [`PreWarmKnobs`]; absent keys
/// keep `PreWarmKnobs::default()`'s disabled-by-default values.
fn parse_prewarm_knobs(item: &Yaml) -> PreWarmKnobs {
  let mut knobs = PreWarmKnobs::default();
  if let Some(v) = item["tunnel_prewarm"].as_bool() {
    knobs.enabled = v;
  }
  if let Some(v) = item["tunnel_prewarm_min"].as_i64() {
    knobs.min = v.max(0) as u32;
  }
  if let Some(v) = item["tunnel_prewarm_max"].as_i64() {
    knobs.max = if v < 0 { None } else { Some(v as u32) };
  }
  if let Some(v) = item["tunnel_prewarm_rate"].as_f64() {
    knobs.rate = v;
  }
  if let Some(v) = item["tunnel_prewarm_connect_timeout"].as_i64() {
    knobs.connect_timeout = Duration::from_secs(v.max(0) as u64);
  }
  if let Some(v) = item["tunnel_prewarm_inactive_timeout"].as_i64() {
    knobs.inactive_timeout = Duration::from_secs(v.max(0) as u64);
  }
  if let Some(v) = item["tunnel_prewarm_srv"].as_bool() {
    knobs.srv_enabled = v;
  }
  knobs
}

fn parse_rule(item: &Yaml, index: usize) -> Result<(Rule, Vec<String>)> {
  let fqdn = item["fqdn"]
    .as_str()
    .ok_or_else(|| anyhow!("snimatch[{index}] missing or invalid \"fqdn\""))?
    .to_string();
  // Rank is the rule's position in the config file, not a configurable
  // value: the rule store's priority order is "earlier wins".
  let rank = index as u32;
  let inbound_port_ranges = parse_port_ranges(item, index)?;
  let mut warnings = Vec::new();

  let mut actions = Vec::new();

  if let Some(enabled) = item["disable_h2"].as_bool() {
    actions.push(Action::ControlH2(!enabled));
  }
  if let Some(enabled) = item["quic"].as_bool() {
    actions.push(Action::ControlQuic(enabled));
  }

  let buffer_water_mark = item["http2_buffer_water_mark"].as_i64().map(|v| v.max(0) as u32);
  let initial_window_size_in = item["http2_initial_window_size_in"].as_i64().map(|v| v.max(0) as u32);
  let max_settings_frames_per_minute = item["http2_max_settings_frames_per_minute"].as_i64().map(|v| v.max(0) as u32);
  let max_ping_frames_per_minute = item["http2_max_ping_frames_per_minute"].as_i64().map(|v| v.max(0) as u32);
  let max_priority_frames_per_minute = item["http2_max_priority_frames_per_minute"].as_i64().map(|v| v.max(0) as u32);
  let max_rst_stream_frames_per_minute =
    item["http2_max_rst_stream_frames_per_minute"].as_i64().map(|v| v.max(0) as u32);
  let max_continuation_frames_per_minute = item["http2_max_continuation_frames_per_minute"]
    .as_i64()
    .map(|v| v.max(0) as u32);
  if buffer_water_mark.is_some()
    || initial_window_size_in.is_some()
    || max_settings_frames_per_minute.is_some()
    || max_ping_frames_per_minute.is_some()
    || max_priority_frames_per_minute.is_some()
    || max_rst_stream_frames_per_minute.is_some()
    || max_continuation_frames_per_minute.is_some()
  {
    actions.push(Action::Http2Tuning {
      buffer_water_mark,
      initial_window_size_in,
      max_settings_frames_per_minute,
      max_ping_frames_per_minute,
      max_priority_frames_per_minute,
      max_rst_stream_frames_per_minute,
      max_continuation_frames_per_minute,
    });
  }

  if let Some(level) = item["verify_client"].as_str() {
    let policy = parse_verify_policy(level)?;
    let ca_file = item["verify_client_ca_certs"].as_str().map(str::to_string);
    let ca_dir = item["verify_client_ca_dir"].as_str().map(str::to_string);
    actions.push(Action::VerifyClient {
      policy,
      ca_file,
      ca_dir,
    });
  }

  if let Some(policy) = item["host_sni_policy"].as_str() {
    let policy = match policy {
      "permissive" => HostSniPolicy::Permissive,
      "enforced" => HostSniPolicy::Enforced,
      other => bail!("snimatch[{index}] unknown host_sni_policy {other:?}"),
    };
    actions.push(Action::HostSniPolicy(policy));
  }

  let deprecated_mask = if let Some(versions) = item["valid_tls_versions_in"].as_vec() {
    let mut mask = 0u8;
    for v in versions {
      let v = v.as_str().ok_or_else(|| anyhow!("snimatch[{index}] valid_tls_versions_in entries must be strings"))?;
      mask |= 1 << (parse_tls_version(v, index)? as u8);
    }
    Some(mask)
  } else {
    None
  };
  let range_min = item["valid_tls_version_min_in"]
    .as_str()
    .map(|v| parse_tls_version(v, index))
    .transpose()?;
  let range_max = item["valid_tls_version_max_in"]
    .as_str()
    .map(|v| parse_tls_version(v, index))
    .transpose()?;

  if range_min.is_some() || range_max.is_some() {
    // The range form is authoritative whenever present; the deprecated
    // mask is only honored when no range key is set at all.
    if deprecated_mask.is_some() {
      warnings.push(format!(
        "snimatch[{index}] sets both valid_tls_versions_in and valid_tls_version_min_in/max_in; \
         the range form takes precedence and the mask is ignored"
      ));
    }
    actions.push(Action::TlsValidProtocols {
      mask: None,
      min: range_min,
      max: range_max,
    });
  } else if let Some(mask) = deprecated_mask {
    actions.push(Action::TlsValidProtocols {
      mask: Some(mask),
      min: None,
      max: None,
    });
  }

  if let Some(entries) = item["ip_allow"].as_vec() {
    let strings: Vec<String> = entries
      .iter()
      .map(|v| v.as_str().unwrap_or_default().to_string())
      .collect();
    let (list, rejected) = IpAllowList::load_from_vec(&strings);
    if !rejected.is_empty() {
      bail!("snimatch[{index}] ip_allow has unparsable entries: {rejected:?}");
    }
    actions.push(Action::SniIpAllow(list));
  }

  let routing = [
    ("tunnel_route", RoutingType::Tunnel),
    ("forward_route", RoutingType::Forward),
    ("partial_blind_route", RoutingType::PartialBlind),
  ]
  .into_iter()
  .find_map(|(key, routing_type)| item[key].as_str().map(|dest| (dest.to_string(), routing_type)));

  if let Some((template, routing_type)) = routing {
    let tunnel_alpn = item["tunnel_alpn"]
      .as_vec()
      .map(|v| v.iter().filter_map(|e| e.as_str().map(str::to_string)).collect())
      .unwrap_or_default();
    let prewarm = parse_prewarm_knobs(item);
    actions.push(Action::TunnelDestination {
      template,
      routing_type,
      tunnel_alpn,
      prewarm,
    });
  }

  if let Some(sni) = item["outbound_sni"].as_str() {
    let verify_policy = item["verify_server_policy"]
      .as_str()
      .map(parse_verify_policy)
      .transpose()?
      .unwrap_or(VerifyPolicy::Disabled);
    let mut verify_properties = VerifyProperties::default();
    if let Some(props) = item["verify_server_properties"].as_vec() {
      for p in props {
        match p.as_str() {
          Some("signature") => verify_properties.check_signature = true,
          Some("name") => verify_properties.check_name = true,
          Some(other) => bail!("snimatch[{index}] unknown verify_server_properties entry {other:?}"),
          None => {}
        }
      }
    }
    actions.push(Action::OutboundSniPolicy {
      sni: sni.to_string(),
      verify_policy,
      verify_properties,
      client_cert_file: item["client_cert"].as_str().map(str::to_string),
      client_key_file: item["client_key"].as_str().map(str::to_string),
    });
  }

  if let Some(bytes) = item["server_max_early_data"].as_i64() {
    actions.push(Action::ServerMaxEarlyData(bytes.max(0) as u32));
  }

  let rule = Rule::new(fqdn, inbound_port_ranges, rank, actions)?;
  Ok((rule, warnings))
}

fn parse_verify_policy(value: &str) -> Result<VerifyPolicy> {
  Ok(match value {
    "disabled" => VerifyPolicy::Disabled,
    "permissive" => VerifyPolicy::Permissive,
    "enforced" => VerifyPolicy::Enforced,
    other => bail!("unknown verify policy {other:?}"),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLE: &str = r#"
prewarm:
  sizing_algorithm: adaptive
snimatch:
  - fqdn: "*.example.com"
    inbound_port_ranges: ["443", "8000-8443"]
    disable_h2: true
    host_sni_policy: enforced
    ip_allow: ["10.0.0.0/8"]
    tunnel_route: "backend.internal:8443"
    tunnel_alpn: ["h2"]
    tunnel_prewarm: true
    tunnel_prewarm_min: 2
  - fqdn: "bad.example.com"
    ip_allow: ["not-an-ip"]
"#;

  #[tokio::test]
  async fn loads_valid_rules_and_skips_bad_ones() {
    let loaded = load(SAMPLE, &None).await.unwrap();
    assert_eq!(loaded.rules.len(), 1);
    assert_eq!(loaded.prewarm.sizing_algorithm, SizingAlgorithm::Adaptive);
    assert_eq!(loaded.rules[0].rank, 0, "rank is the rule's position, not a config key");
    assert_eq!(loaded.rules[0].inbound_port_ranges, vec![(443, 443), (8000, 8443)]);
    assert_eq!(loaded.rules[0].actions.len(), 4);
    let Action::TunnelDestination { prewarm, .. } = loaded.rules[0]
      .actions
      .iter()
      .find(|a| matches!(a, Action::TunnelDestination { .. }))
      .unwrap()
    else {
      unreachable!()
    };
    assert!(prewarm.enabled);
    assert_eq!(prewarm.min, 2);
  }

  #[tokio::test]
  async fn missing_snimatch_is_a_hard_error() {
    let err = load("prewarm: {}", &None).await.unwrap_err();
    assert!(err.to_string().contains("snimatch"));
  }

  #[tokio::test]
  async fn empty_document_is_a_hard_error() {
    let err = load("", &None).await.unwrap_err();
    assert!(err.to_string().contains("empty"));
  }

  #[tokio::test]
  async fn range_form_takes_precedence_over_mask_and_warns() {
    let yaml = r#"
snimatch:
  - fqdn: "example.com"
    valid_tls_versions_in: [tlsv1]
    valid_tls_version_min_in: tlsv1_2
    valid_tls_version_max_in: tlsv1_3
"#;
    let (logger, receiver) = async_channel::unbounded();
    let loaded = load(yaml, &Some(logger)).await.unwrap();
    let Action::TlsValidProtocols { mask, min, max } = &loaded.rules[0].actions[0] else {
      panic!("expected a TlsValidProtocols action");
    };
    assert_eq!(*mask, None);
    assert_eq!(*min, Some(TlsVersion::TlsV1_2));
    assert_eq!(*max, Some(TlsVersion::TlsV1_3));
    let (message, is_error) = receiver.try_recv().unwrap().get_message();
    assert!(!is_error);
    assert!(message.contains("takes precedence"));
  }

  #[tokio::test]
  async fn port_range_parses_scalar_and_list_forms() {
    let yaml = r#"
snimatch:
  - fqdn: "a.example.com"
    inbound_port_ranges: "443"
  - fqdn: "b.example.com"
    inbound_port_ranges: ["80", "443-8443"]
"#;
    let loaded = load(yaml, &None).await.unwrap();
    assert_eq!(loaded.rules[0].inbound_port_ranges, vec![(443, 443)]);
    assert_eq!(loaded.rules[1].inbound_port_ranges, vec![(80, 80), (443, 8443)]);
  }
}
