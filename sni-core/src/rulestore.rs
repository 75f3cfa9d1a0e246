//! The rule store: an exact-FQDN hashmap plus a rank-ordered list of
//! wildcard rules, behind a reader-preferring lock that swaps the whole
//! store on reload.
//!
//! The swap itself mirrors `ferron::util::tls::CustomSniResolver`, which
//! keeps its resolver table behind an `Arc<RwLock<..>>` and replaces
//! individual entries under a short-lived write lock. We go one step
//! further and replace the *entire* table in one swap, since the spec's
//! semantics require linearizable, all-or-nothing reloads rather than
//! per-host replacement.

use crate::rule::{MatchResult, Rule};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

struct Inner {
  /// Keyed by lowercased FQDN; a multimap since two rules can share an FQDN
  /// while covering disjoint `inbound_port_ranges`.
  exact: HashMap<String, Vec<Arc<Rule>>>,
  /// Ordered by ascending rank (lower rank — i.e. earlier in the config
  /// file — checked first), matching the rank-order invariant.
  wildcards: Vec<Arc<Rule>>,
}

/// The process-global SNI rule table. Cloning is cheap (an `Arc` bump);
/// every clone shares the same underlying swap lock.
#[derive(Clone)]
pub struct RuleStore {
  inner: Arc<RwLock<Arc<Inner>>>,
}

/// A matched rule plus the wildcard capture groups produced by the match,
/// or `None` if no rule applies.
pub struct Lookup {
  pub rule: Arc<Rule>,
  pub captures: Vec<String>,
}

impl RuleStore {
  /// Builds a store from unordered rules, split into the exact map and a
  /// rank-sorted wildcard list.
  pub fn build(rules: Vec<Rule>) -> Result<Self> {
    let mut exact: HashMap<String, Vec<Arc<Rule>>> = HashMap::new();
    let mut wildcards = Vec::new();
    for rule in rules {
      let rule = Arc::new(rule);
      if rule.is_wildcard() {
        wildcards.push(rule);
      } else {
        exact.entry(rule.pattern.to_ascii_lowercase()).or_default().push(rule);
      }
    }
    wildcards.sort_by_key(|rule| rule.rank);
    Ok(Self {
      inner: Arc::new(RwLock::new(Arc::new(Inner { exact, wildcards }))),
    })
  }

  /// Atomically replaces the whole table. Readers already holding a clone
  /// of the old `Arc<Inner>` keep it alive until they finish; the old table
  /// is freed once the last such reader drops its reference.
  pub fn reload(&self, rules: Vec<Rule>) -> Result<()> {
    let replacement = Self::build(rules)?;
    let new_inner = {
      let guard = replacement.inner.read().expect("rule store lock poisoned");
      guard.clone()
    };
    let mut guard = self.inner.write().expect("rule store lock poisoned");
    *guard = new_inner;
    Ok(())
  }

  /// Looks up a hostname+port pair. Among exact rules for this FQDN whose
  /// `inbound_port_ranges` accepts `port`, the lowest-rank one sets
  /// `best_rank`; the wildcard list is then walked in ascending-rank order,
  /// stopping once a candidate's rank reaches `best_rank`, so a wildcard
  /// only overrides an exact match when it was declared earlier in the
  /// config. No match at all returns `None`. Hostnames are matched
  /// case-insensitively with any trailing dot stripped, per the config
  /// surface's FQDN normalization.
  pub fn lookup(&self, hostname: &str, port: u16) -> Option<Lookup> {
    let hostname = hostname.strip_suffix('.').unwrap_or(hostname);
    let lowered = hostname.to_ascii_lowercase();
    let inner = self.inner.read().expect("rule store lock poisoned").clone();

    let best_exact = inner
      .exact
      .get(&lowered)
      .into_iter()
      .flatten()
      .filter(|rule| rule.port_matches(port))
      .min_by_key(|rule| rule.rank);
    let best_rank = best_exact.map(|rule| rule.rank);

    for rule in &inner.wildcards {
      if best_rank.is_some_and(|best_rank| rule.rank >= best_rank) {
        break;
      }
      if !rule.port_matches(port) {
        continue;
      }
      if let Some(MatchResult { captures }) = rule.matches(&lowered) {
        return Some(Lookup {
          rule: rule.clone(),
          captures,
        });
      }
    }

    best_exact.map(|rule| Lookup {
      rule: rule.clone(),
      captures: Vec::new(),
    })
  }

  pub fn rule_count(&self) -> usize {
    let inner = self.inner.read().expect("rule store lock poisoned");
    inner.exact.values().map(Vec::len).sum::<usize>() + inner.wildcards.len()
  }
}
