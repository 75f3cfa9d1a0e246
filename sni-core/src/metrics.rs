//! Minimal metric emission, shaped after the `Metric::new(name, attributes,
//! MetricType, MetricValue, unit, description)` call pattern used throughout
//! `ferron-common::http_proxy`. The concrete `Metric`/`MetricsMultiSender`
//! types that file consumes are not part of this crate's ancestry, so this
//! module defines a small equivalent rather than inventing a dependency.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// The seven stats carried over from the originating system's `PreWarm::Stat`
/// enum, kept in the same order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stat {
  InitListSize,
  OpenListSize,
  Hit,
  Miss,
  HandshakeTimeMicros,
  HandshakeCount,
  Retry,
}

impl Stat {
  pub fn name(&self) -> &'static str {
    match self {
      Stat::InitListSize => "sni.prewarm.init_list_size",
      Stat::OpenListSize => "sni.prewarm.open_list_size",
      Stat::Hit => "sni.prewarm.hit",
      Stat::Miss => "sni.prewarm.miss",
      Stat::HandshakeTimeMicros => "sni.prewarm.handshake_time_micros",
      Stat::HandshakeCount => "sni.prewarm.handshake_count",
      Stat::Retry => "sni.prewarm.retry",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
  Counter,
  Gauge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricValue {
  I64(i64),
  U64(u64),
}

/// One emitted data point, ready to be handed to whatever observability
/// backend the embedding application wires up.
#[derive(Debug, Clone)]
pub struct Metric {
  pub name: &'static str,
  pub attributes: Vec<(&'static str, String)>,
  pub metric_type: MetricType,
  pub value: MetricValue,
  pub unit: Option<&'static str>,
  pub description: Option<&'static str>,
}

impl Metric {
  pub fn new(
    name: &'static str,
    attributes: Vec<(&'static str, String)>,
    metric_type: MetricType,
    value: MetricValue,
    unit: Option<&'static str>,
    description: Option<&'static str>,
  ) -> Self {
    Self {
      name,
      attributes,
      metric_type,
      value,
      unit,
      description,
    }
  }
}

/// Anything that accepts emitted metrics. Implemented by the channel-based
/// default sink below, or by an embedding application's own backend.
pub trait MetricsSink: Send + Sync {
  fn record(&self, metric: Metric);
}

/// A sink that forwards every metric onto an `async_channel`, in the same
/// spirit as the teacher's `ObservabilityBackendChannels`.
#[derive(Clone)]
pub struct ChannelMetricsSink {
  sender: async_channel::Sender<Metric>,
}

impl ChannelMetricsSink {
  pub fn new() -> (Self, async_channel::Receiver<Metric>) {
    let (sender, receiver) = async_channel::unbounded();
    (Self { sender }, receiver)
  }
}

impl MetricsSink for ChannelMetricsSink {
  fn record(&self, metric: Metric) {
    self.sender.try_send(metric).unwrap_or_default();
  }
}

/// Per-`Dst` live counters, updated without locking from the owning IO
/// thread and read by the tick loop when it emits gauges.
#[derive(Debug, Default)]
pub struct DstCounters {
  pub hit: AtomicU64,
  pub miss: AtomicU64,
  pub handshake_count: AtomicU64,
  pub handshake_time_micros_total: AtomicU64,
  pub retry: AtomicU64,
  pub init_list_size: AtomicI64,
  pub open_list_size: AtomicI64,
}

impl DstCounters {
  pub fn record_hit(&self) {
    self.hit.fetch_add(1, Ordering::Relaxed);
  }

  pub fn record_miss(&self) {
    self.miss.fetch_add(1, Ordering::Relaxed);
  }

  pub fn record_handshake(&self, micros: u64) {
    self.handshake_count.fetch_add(1, Ordering::Relaxed);
    self.handshake_time_micros_total.fetch_add(micros, Ordering::Relaxed);
  }

  pub fn record_retry(&self) {
    self.retry.fetch_add(1, Ordering::Relaxed);
  }

  pub fn set_init_list_size(&self, n: i64) {
    self.init_list_size.store(n, Ordering::Relaxed);
  }

  pub fn set_open_list_size(&self, n: i64) {
    self.open_list_size.store(n, Ordering::Relaxed);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stat_names_are_dot_qualified() {
    assert_eq!(Stat::Hit.name(), "sni.prewarm.hit");
    assert_eq!(Stat::InitListSize.name(), "sni.prewarm.init_list_size");
  }

  #[test]
  fn dst_counters_accumulate() {
    let counters = DstCounters::default();
    counters.record_hit();
    counters.record_hit();
    counters.record_miss();
    assert_eq!(counters.hit.load(Ordering::Relaxed), 2);
    assert_eq!(counters.miss.load(Ordering::Relaxed), 1);
  }
}
