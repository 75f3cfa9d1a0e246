//! A single SNI match rule and the result of matching it against a hostname.
//!
//! Wildcard compilation follows `ferron/src/config/mod.rs`'s regex-building
//! idiom (`fancy_regex::RegexBuilder::new(..).case_insensitive(true).build()`),
//! applied to an anchored glob translation rather than a user-supplied regex.

use crate::action::Action;
use anyhow::{Context, Result};
use fancy_regex::Regex;

/// One `fqdn` entry from the rule config, after compilation.
#[derive(Debug, Clone)]
pub struct Rule {
  /// The literal FQDN (exact rules) or the original glob pattern (wildcard
  /// rules) — kept around for logging and reload diffing.
  pub pattern: String,
  /// Destination ports this rule applies to. Empty means "any port"
  /// (`1..=65535`), matching the config surface's default when
  /// `inbound_port_ranges` is omitted.
  pub inbound_port_ranges: Vec<(u16, u16)>,
  /// Insertion order in the config file; the rule store's sole priority
  /// key. Lower rank wins ties against both other exact rules and
  /// wildcards — this is never a user-configured value.
  pub rank: u32,
  pub actions: Vec<Action>,
  matcher: Matcher,
}

#[derive(Debug, Clone)]
enum Matcher {
  Exact,
  Wildcard(Regex),
}

impl Rule {
  /// Builds a rule from its config pattern. A pattern containing `*` is
  /// compiled to an anchored, case-insensitive regex; a pattern without one
  /// is an exact match, keyed directly into the rule store's hashmap by the
  /// caller.
  pub fn new(pattern: String, inbound_port_ranges: Vec<(u16, u16)>, rank: u32, actions: Vec<Action>) -> Result<Self> {
    let matcher = if pattern.contains('*') {
      Matcher::Wildcard(compile_glob(&pattern)?)
    } else {
      Matcher::Exact
    };
    Ok(Self {
      pattern,
      inbound_port_ranges,
      rank,
      actions,
      matcher,
    })
  }

  pub fn is_wildcard(&self) -> bool {
    matches!(self.matcher, Matcher::Wildcard(_))
  }

  /// `true` if `port` falls in any of this rule's `inbound_port_ranges`, or
  /// if the rule carries no ranges at all (accepts every port).
  pub fn port_matches(&self, port: u16) -> bool {
    self.inbound_port_ranges.is_empty()
      || self.inbound_port_ranges.iter().any(|&(lo, hi)| (lo..=hi).contains(&port))
  }

  /// Matches a lower-cased hostname already stripped of its trailing dot.
  /// Exact rules are matched by the caller via hashmap lookup and never
  /// reach this method with `Matcher::Exact`.
  pub fn matches(&self, hostname: &str) -> Option<MatchResult> {
    match &self.matcher {
      Matcher::Exact => {
        if self.pattern.eq_ignore_ascii_case(hostname) {
          Some(MatchResult {
            captures: Vec::new(),
          })
        } else {
          None
        }
      }
      Matcher::Wildcard(re) => {
        let caps = re.captures(hostname).ok().flatten()?;
        let mut captures = Vec::new();
        for i in 1..caps.len() {
          captures.push(caps.get(i).map(|m| m.as_str().to_string()).unwrap_or_default());
        }
        Some(MatchResult { captures })
      }
    }
  }
}

/// Per-match data the destination template resolver needs: the `$N`
/// capture groups produced by a wildcard's `*` segments, 1-based in the
/// template language but 0-based here (index 0 is `$1`).
#[derive(Debug, Clone)]
pub struct MatchResult {
  pub captures: Vec<String>,
}

/// Translates an anchored glob (`*.example.com`, `api-*.internal`) into a
/// case-insensitive regex: `.` is escaped, `*` becomes a capturing
/// `(.{0,})`, and the whole pattern is anchored with `^`/`$`.
fn compile_glob(pattern: &str) -> Result<Regex> {
  let mut regex_src = String::with_capacity(pattern.len() * 2 + 2);
  regex_src.push('^');
  for ch in pattern.chars() {
    match ch {
      '.' => regex_src.push_str("\\."),
      '*' => regex_src.push_str("(.{0,})"),
      other => {
        if "\\+?()[]{}|^$".contains(other) {
          regex_src.push('\\');
        }
        regex_src.push(other);
      }
    }
  }
  regex_src.push('$');
  fancy_regex::RegexBuilder::new(&regex_src)
    .case_insensitive(true)
    .build()
    .with_context(|| format!("invalid wildcard pattern {pattern:?}"))
}
