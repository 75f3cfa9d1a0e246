//! Per-IO-thread pre-warm queue: one `init_list`/`open_list` pair of deques
//! per `Dst`, topped up on a periodic tick. No cross-thread synchronization
//! — each IO thread owns its own [`ThreadQueue`], matching §5's thread-local
//! pool model (no locking on the hot donate/dequeue path, at the cost of no
//! ordering guarantee between threads).

use crate::metrics::DstCounters;
use crate::prewarm::conf::PreWarmConfig;
use crate::prewarm::dst::Dst;
use crate::prewarm::sm::{Dialer, PreWarmConn, State};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Selects how many connections a `Dst` should keep pre-warmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizingAlgorithm {
  /// V1: always keep exactly `conf.min` open, no demand tracking.
  FixedMin,
  /// V2: target `hit_ratio_window * conf.rate` open connections, clamped to
  /// `[conf.min, conf.max]`, nudged toward recent hit/miss history.
  Adaptive,
}

struct PerDst {
  conf: Arc<PreWarmConfig>,
  init_list: VecDeque<PreWarmConn>,
  open_list: VecDeque<PreWarmConn>,
  counters: Arc<DstCounters>,
  recent_hits: u32,
  recent_misses: u32,
}

pub struct ThreadQueue {
  dsts: HashMap<Arc<Dst>, PerDst>,
  algorithm: SizingAlgorithm,
}

impl ThreadQueue {
  pub fn new(algorithm: SizingAlgorithm) -> Self {
    Self {
      dsts: HashMap::new(),
      algorithm,
    }
  }

  /// Registers (or re-tunes) a destination. Called whenever the pre-warm
  /// registry reconfigures this `Dst`; an existing entry keeps its
  /// in-flight connections and only updates `conf`/`counters`.
  pub fn reconfigure(&mut self, dst: Arc<Dst>, conf: Arc<PreWarmConfig>, counters: Arc<DstCounters>) {
    self
      .dsts
      .entry(dst)
      .and_modify(|entry| entry.conf = conf.clone())
      .or_insert_with(|| PerDst {
        conf,
        init_list: VecDeque::new(),
        open_list: VecDeque::new(),
        counters,
        recent_hits: 0,
        recent_misses: 0,
      });
  }

  /// Drops a `Dst` no longer present after a reload. In-flight connections
  /// are simply dropped; nothing is donated to anyone.
  pub fn remove(&mut self, dst: &Dst) {
    self.dsts.remove(dst);
  }

  /// Takes an open connection for `dst` if one is ready, recording a
  /// hit/miss. This is the hot path a real connection's SNI routing calls
  /// into; it never blocks and never drives the state machine itself.
  pub fn take(&mut self, dst: &Dst) -> Option<PreWarmConn> {
    let entry = self.dsts.get_mut(dst)?;
    match entry.open_list.pop_front() {
      Some(conn) => {
        entry.counters.record_hit();
        entry.recent_hits += 1;
        Some(conn)
      }
      None => {
        entry.counters.record_miss();
        entry.recent_misses += 1;
        None
      }
    }
  }

  /// One tick: drive every in-flight connection forward one step, move
  /// freshly-`Open` ones from `init_list` to `open_list`, drop `Closed`
  /// ones, then top up `init_list` up to the target size for each `Dst`.
  pub async fn tick(&mut self, dialer: &dyn Dialer) {
    for (dst, entry) in self.dsts.iter_mut() {
      let mut still_initializing = VecDeque::new();
      while let Some(mut conn) = entry.init_list.pop_front() {
        conn.drive(dialer, &entry.counters).await;
        match conn.state() {
          State::Open => entry.open_list.push_back(conn),
          State::Closed => {}
          _ => still_initializing.push_back(conn),
        }
      }
      entry.init_list = still_initializing;

      entry.open_list.retain(|conn| !conn.is_timed_out());

      let target = target_size(entry, self.algorithm);
      let have = entry.init_list.len() + entry.open_list.len();
      for _ in have..target as usize {
        entry
          .init_list
          .push_back(PreWarmConn::new(dst.clone(), entry.conf.clone()));
      }

      entry
        .counters
        .set_init_list_size(entry.init_list.len() as i64);
      entry.counters.set_open_list_size(entry.open_list.len() as i64);
      entry.recent_hits = 0;
      entry.recent_misses = 0;
    }
  }

  pub fn init_list_len(&self, dst: &Dst) -> usize {
    self.dsts.get(dst).map(|e| e.init_list.len()).unwrap_or(0)
  }

  pub fn open_list_len(&self, dst: &Dst) -> usize {
    self.dsts.get(dst).map(|e| e.open_list.len()).unwrap_or(0)
  }
}

fn target_size(entry: &PerDst, algorithm: SizingAlgorithm) -> u32 {
  match algorithm {
    SizingAlgorithm::FixedMin => entry.conf.within_bounds(entry.conf.min),
    SizingAlgorithm::Adaptive => {
      let total = entry.recent_hits + entry.recent_misses;
      let demand = if total == 0 {
        entry.conf.min as f64
      } else {
        (entry.recent_hits + entry.recent_misses) as f64 * entry.conf.rate
      };
      entry.conf.within_bounds(demand.ceil() as u32)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::action::{RoutingType, VerifyPolicy, VerifyProperties};
  use async_trait::async_trait;
  use std::net::SocketAddr;
  use std::time::Duration;
  use tokio::io::duplex;

  struct AlwaysSucceedsDialer;

  #[async_trait]
  impl Dialer for AlwaysSucceedsDialer {
    async fn resolve(&self, _host: &str, _srv: bool) -> anyhow::Result<Vec<SocketAddr>> {
      Ok(vec!["127.0.0.1:443".parse().unwrap()])
    }
    async fn dial(&self, _addr: SocketAddr) -> anyhow::Result<Box<dyn crate::prewarm::sm::Conn>> {
      let (a, _b) = duplex(64);
      Ok(Box::new(a))
    }
    async fn handshake(
      &self,
      conn: Box<dyn crate::prewarm::sm::Conn>,
      _dst: &Dst,
      _conf: &PreWarmConfig,
    ) -> anyhow::Result<Box<dyn crate::prewarm::sm::Conn>> {
      Ok(conn)
    }
  }

  fn conf(min: u32) -> Arc<PreWarmConfig> {
    Arc::new(PreWarmConfig::new(
      min,
      Some(8),
      1.0,
      Duration::from_secs(5),
      Duration::from_secs(30),
      false,
      VerifyPolicy::Disabled,
      VerifyProperties::default(),
      "example.com".to_string(),
    ))
  }

  fn dst() -> Arc<Dst> {
    Arc::new(Dst::new("example.com".to_string(), 443, RoutingType::PartialBlind, None))
  }

  #[tokio::test]
  async fn fixed_min_tops_up_to_floor_and_hit_succeeds() {
    let mut queue = ThreadQueue::new(SizingAlgorithm::FixedMin);
    let dst = dst();
    queue.reconfigure(dst.clone(), conf(2), Arc::new(DstCounters::default()));
    let dialer = AlwaysSucceedsDialer;
    // First tick only creates the slots (Init); second drives each all the way to Open.
    queue.tick(&dialer).await;
    queue.tick(&dialer).await;
    assert_eq!(queue.open_list_len(&dst), 2);
    assert!(queue.take(&dst).is_some());
    assert_eq!(queue.open_list_len(&dst), 1);
  }

  #[tokio::test]
  async fn miss_recorded_when_pool_empty() {
    let mut queue = ThreadQueue::new(SizingAlgorithm::FixedMin);
    let dst = dst();
    queue.reconfigure(dst.clone(), conf(0), Arc::new(DstCounters::default()));
    assert!(queue.take(&dst).is_none());
  }

  #[tokio::test]
  async fn remove_drops_in_flight_state() {
    let mut queue = ThreadQueue::new(SizingAlgorithm::FixedMin);
    let dst = dst();
    queue.reconfigure(dst.clone(), conf(1), Arc::new(DstCounters::default()));
    queue.tick(&AlwaysSucceedsDialer).await;
    queue.remove(&dst);
    assert_eq!(queue.init_list_len(&dst), 0);
    assert_eq!(queue.open_list_len(&dst), 0);
  }
}
