//! Tunnel destination template resolution: turns a rule's
//! `tunnel_destination` template plus the connection's capture groups and
//! inbound port knowledge into a concrete `(host, port)` pair.
//!
//! Placeholders: `$1`, `$2`, ... substitute the wildcard rule's capture
//! groups (1-based, matching shell/regex-replacement convention);
//! `{inbound_local_port}` and `{proxy_protocol_port}` substitute the
//! connection's own ports and are mutually exclusive within one template.

use anyhow::{anyhow, bail, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDestination {
  pub host: String,
  pub port: u16,
  /// `true` when the port came from a connection-specific placeholder
  /// rather than a literal in the template — such destinations are never
  /// looked up in the pre-warm pool, since the pool is keyed on a fixed
  /// `Dst` and a per-connection port would defeat sharing.
  pub port_is_dynamic: bool,
}

const PLACEHOLDER_INBOUND_PORT: &str = "{inbound_local_port}";
const PLACEHOLDER_PROXY_PORT: &str = "{proxy_protocol_port}";

/// Resolves `template` against a set of wildcard capture groups and the
/// connection's known ports.
///
/// `template` is `host:port`, where `host` may contain `$N` placeholders
/// and `port` is either a literal or one of the two port placeholders.
pub fn resolve(
  template: &str,
  captures: &[String],
  inbound_local_port: u16,
  proxy_protocol_port: Option<u16>,
) -> Result<ResolvedDestination> {
  let (host_part, port_part) = template
    .rsplit_once(':')
    .ok_or_else(|| anyhow!("tunnel destination template {template:?} is missing a port"))?;

  if host_part.contains(PLACEHOLDER_INBOUND_PORT) || host_part.contains(PLACEHOLDER_PROXY_PORT) {
    bail!("tunnel destination template {template:?} must not use a port placeholder in the host part");
  }

  let host = expand_captures(host_part, captures)?;

  let uses_inbound = port_part.contains(PLACEHOLDER_INBOUND_PORT);
  let uses_proxy = port_part.contains(PLACEHOLDER_PROXY_PORT);
  if uses_inbound && uses_proxy {
    bail!("tunnel destination template {template:?} cannot use both port placeholders");
  }

  let (port, port_is_dynamic) = if uses_inbound {
    (inbound_local_port, true)
  } else if uses_proxy {
    let port = proxy_protocol_port
      .ok_or_else(|| anyhow!("{{proxy_protocol_port}} used but no PROXY protocol header was seen"))?;
    (port, true)
  } else if port_part.contains('$') {
    // A capture index into the port part substitutes the same way it does
    // into the host part, but the resulting port is marked dynamic: its
    // value depends on this connection's wildcard match, not the rule
    // alone, so it can't be pre-warmed.
    let expanded = expand_captures(port_part, captures)?;
    let port: u16 = expanded
      .parse()
      .map_err(|_| anyhow!("capture-group substitution produced invalid port {expanded:?} in template {template:?}"))?;
    (port, true)
  } else {
    let port: u16 = port_part
      .parse()
      .map_err(|_| anyhow!("invalid literal port {port_part:?} in template {template:?}"))?;
    (port, false)
  };

  Ok(ResolvedDestination {
    host,
    port,
    port_is_dynamic,
  })
}

fn expand_captures(part: &str, captures: &[String]) -> Result<String> {
  let mut out = String::with_capacity(part.len());
  let mut chars = part.chars().peekable();
  while let Some(ch) = chars.next() {
    if ch != '$' {
      out.push(ch);
      continue;
    }
    let mut digits = String::new();
    while let Some(d) = chars.peek() {
      if d.is_ascii_digit() {
        digits.push(*d);
        chars.next();
      } else {
        break;
      }
    }
    if digits.is_empty() {
      out.push('$');
      continue;
    }
    let index: usize = digits.parse().unwrap();
    if index == 0 {
      bail!("capture group placeholders are 1-based, found $0");
    }
    let capture = captures
      .get(index - 1)
      .ok_or_else(|| anyhow!("template references ${index} but only {} capture groups were matched", captures.len()))?;
    out.push_str(capture);
  }
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn literal_template_resolves_with_fixed_port() {
    let resolved = resolve("backend.internal:8443", &[], 443, None).unwrap();
    assert_eq!(resolved.host, "backend.internal");
    assert_eq!(resolved.port, 8443);
    assert!(!resolved.port_is_dynamic);
  }

  #[test]
  fn capture_group_expands_into_host() {
    let resolved = resolve("$1.backend.internal:443", &["tenant-a".to_string()], 443, None).unwrap();
    assert_eq!(resolved.host, "tenant-a.backend.internal");
  }

  #[test]
  fn inbound_local_port_placeholder_is_dynamic() {
    let resolved = resolve("backend.internal:{inbound_local_port}", &[], 9443, None).unwrap();
    assert_eq!(resolved.port, 9443);
    assert!(resolved.port_is_dynamic);
  }

  #[test]
  fn proxy_protocol_port_requires_a_value() {
    let err = resolve("backend.internal:{proxy_protocol_port}", &[], 443, None).unwrap_err();
    assert!(err.to_string().contains("PROXY protocol"));
  }

  #[test]
  fn both_port_placeholders_is_an_error() {
    let err = resolve(
      "backend.internal:{inbound_local_port}{proxy_protocol_port}",
      &[],
      443,
      Some(1),
    )
    .unwrap_err();
    assert!(err.to_string().contains("cannot use both"));
  }

  #[test]
  fn capture_group_expands_into_port_and_is_marked_dynamic() {
    let resolved = resolve("backend.internal:$1", &["8443".to_string()], 443, None).unwrap();
    assert_eq!(resolved.port, 8443);
    assert!(resolved.port_is_dynamic, "a port built from a capture group is dynamic");
  }

  #[test]
  fn invalid_capture_group_port_is_an_error() {
    let err = resolve("backend.internal:$1", &["not-a-port".to_string()], 443, None).unwrap_err();
    assert!(err.to_string().contains("invalid port"));
  }

  #[test]
  fn missing_capture_group_is_an_error() {
    let err = resolve("$2.backend.internal:443", &["only-one".to_string()], 443, None).unwrap_err();
    assert!(err.to_string().contains("$2"));
  }
}
