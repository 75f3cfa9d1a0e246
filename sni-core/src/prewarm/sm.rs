//! The per-connection pre-warm state machine: `Init -> DnsLookup -> NetOpen
//! -> Open`, with a retry-to-`Init` edge on recoverable failure and a
//! timeout-driven edge to `Closed` from any state.
//!
//! The actual DNS/TCP/TLS work is delegated to a [`Dialer`], grounded on the
//! connect-then-handshake split in
//! `ferron-common::http_proxy::proxy_client::http_proxy_handshake` (resolve
//! and dial happen first, then a handshake future is spawned separately) —
//! here the two are folded into one state each so the tick loop can observe
//! progress between them.

use crate::metrics::DstCounters;
use crate::prewarm::conf::PreWarmConfig;
use crate::prewarm::dst::Dst;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
  Init,
  DnsLookup,
  NetOpen,
  Open,
  Closed,
}

/// Abstraction over "resolve, dial, handshake" so the state machine can be
/// driven in tests without real sockets. Production code implements this
/// against `hickory_resolver` + `tokio::net::TcpStream` + `tokio_rustls`.
#[async_trait]
pub trait Dialer: Send + Sync {
  async fn resolve(&self, host: &str, srv_enabled: bool) -> anyhow::Result<Vec<SocketAddr>>;
  async fn dial(&self, addr: SocketAddr) -> anyhow::Result<Box<dyn Conn>>;
  /// Upstream TLS only runs for `PartialBlind` destinations (see
  /// `PreWarm::Conf`, which carries a verify policy/SNI but is only
  /// consulted by partial-blind routing); `Tunnel`/`Forward` destinations
  /// pass the raw TCP connection straight through.
  async fn handshake(&self, conn: Box<dyn Conn>, dst: &Dst, conf: &PreWarmConfig) -> anyhow::Result<Box<dyn Conn>>;
}

/// A dialed, possibly TLS-wrapped connection, type-erased so [`Dialer`]
/// implementations don't leak their transport type into the state machine.
pub trait Conn: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Conn for T {}

/// Maximum consecutive retries before a connection attempt gives up and
/// transitions straight to `Closed` instead of looping back to `Init`.
const MAX_RETRIES: u32 = 3;

pub struct PreWarmConn {
  pub dst: Arc<Dst>,
  pub conf: Arc<PreWarmConfig>,
  state: State,
  retries: u32,
  last_transition: Instant,
  handshake_started_at: Option<Instant>,
  conn: Option<Box<dyn Conn>>,
}

impl PreWarmConn {
  pub fn new(dst: Arc<Dst>, conf: Arc<PreWarmConfig>) -> Self {
    Self {
      dst,
      conf,
      state: State::Init,
      retries: 0,
      last_transition: Instant::now(),
      handshake_started_at: None,
      conn: None,
    }
  }

  pub fn state(&self) -> State {
    self.state
  }

  /// Has this connection been sitting in its current state longer than the
  /// configured timeout for that phase?
  pub fn is_timed_out(&self) -> bool {
    match self.state {
      State::Init | State::Closed => false,
      State::DnsLookup | State::NetOpen => self.last_transition.elapsed() > self.conf.connect_timeout,
      State::Open => self.last_transition.elapsed() > self.conf.inactive_timeout,
    }
  }

  fn transition(&mut self, next: State) {
    self.state = next;
    self.last_transition = Instant::now();
  }

  /// Drives the connection one step forward. Called from the owning
  /// IO thread's tick loop; never runs concurrently with itself for a
  /// given `PreWarmConn` since the queue is thread-local.
  pub async fn drive(&mut self, dialer: &dyn Dialer, counters: &DstCounters) {
    if self.is_timed_out() {
      counters.record_retry();
      self.transition(State::Closed);
      return;
    }
    if self.state == State::Init {
      self.transition(State::DnsLookup);
    }
    match self.state {
      State::Init => unreachable!("just transitioned out of Init"),
      State::DnsLookup => match dialer.resolve(&self.dst.host, self.conf.srv_enabled).await {
        Ok(addrs) if !addrs.is_empty() => {
          self.transition(State::NetOpen);
          self.net_open(dialer, addrs[0], counters).await;
        }
        _ => self.retry_or_close(counters),
      },
      State::NetOpen | State::Open | State::Closed => {}
    }
  }

  async fn net_open(&mut self, dialer: &dyn Dialer, addr: SocketAddr, counters: &DstCounters) {
    let handshake_start = Instant::now();
    self.handshake_started_at = Some(handshake_start);
    let dialed = match dialer.dial(addr).await {
      Ok(conn) => conn,
      Err(_) => {
        self.retry_or_close(counters);
        return;
      }
    };
    match dialer.handshake(dialed, &self.dst, &self.conf).await {
      Ok(conn) => {
        self.conn = Some(conn);
        self.transition(State::Open);
        counters.record_handshake(handshake_start.elapsed().as_micros() as u64);
      }
      Err(_) => self.retry_or_close(counters),
    }
  }

  fn retry_or_close(&mut self, counters: &DstCounters) {
    self.retries += 1;
    counters.record_retry();
    if self.retries >= MAX_RETRIES {
      self.transition(State::Closed);
    } else {
      self.transition(State::Init);
    }
  }

  /// Hands the underlying connection to a real request, marking this slot
  /// `Closed` so the queue's tick loop removes it from the open list and
  /// spawns a fresh replacement instead of trying to reuse a consumed slot.
  /// Matches the "donation" contract: exactly one winner per connection,
  /// never returned to the pool afterward.
  pub fn donate(mut self) -> Option<Box<dyn Conn>> {
    let conn = self.conn.take();
    self.transition(State::Closed);
    conn
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::action::{RoutingType, VerifyPolicy, VerifyProperties};
  use async_trait::async_trait;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::time::Duration;
  use tokio::io::duplex;

  struct FakeDialer {
    fail_resolve: bool,
    fail_dial: bool,
    fail_handshake: bool,
    resolve_calls: AtomicU32,
  }

  #[async_trait]
  impl Dialer for FakeDialer {
    async fn resolve(&self, _host: &str, _srv: bool) -> anyhow::Result<Vec<SocketAddr>> {
      self.resolve_calls.fetch_add(1, Ordering::SeqCst);
      if self.fail_resolve {
        anyhow::bail!("resolve failed");
      }
      Ok(vec!["127.0.0.1:443".parse().unwrap()])
    }

    async fn dial(&self, _addr: SocketAddr) -> anyhow::Result<Box<dyn Conn>> {
      if self.fail_dial {
        anyhow::bail!("dial failed");
      }
      let (a, _b) = duplex(64);
      Ok(Box::new(a))
    }

    async fn handshake(&self, conn: Box<dyn Conn>, _dst: &Dst, _conf: &PreWarmConfig) -> anyhow::Result<Box<dyn Conn>> {
      if self.fail_handshake {
        anyhow::bail!("handshake failed");
      }
      Ok(conn)
    }
  }

  fn test_conf() -> Arc<PreWarmConfig> {
    Arc::new(PreWarmConfig::new(
      1,
      Some(4),
      1.0,
      Duration::from_secs(5),
      Duration::from_secs(30),
      false,
      VerifyPolicy::Disabled,
      VerifyProperties::default(),
      "example.com".to_string(),
    ))
  }

  fn test_dst() -> Arc<Dst> {
    Arc::new(Dst::new("example.com".to_string(), 443, RoutingType::PartialBlind, None))
  }

  #[tokio::test]
  async fn happy_path_reaches_open() {
    let dialer = FakeDialer {
      fail_resolve: false,
      fail_dial: false,
      fail_handshake: false,
      resolve_calls: AtomicU32::new(0),
    };
    let counters = DstCounters::default();
    let mut conn = PreWarmConn::new(test_dst(), test_conf());
    assert_eq!(conn.state(), State::Init);
    conn.drive(&dialer, &counters).await; // Init -> DnsLookup -> NetOpen -> Open
    assert_eq!(conn.state(), State::Open);
    assert_eq!(counters.handshake_count.load(Ordering::Relaxed), 1);
  }

  #[tokio::test]
  async fn resolve_failure_retries_then_closes() {
    let dialer = FakeDialer {
      fail_resolve: true,
      fail_dial: false,
      fail_handshake: false,
      resolve_calls: AtomicU32::new(0),
    };
    let counters = DstCounters::default();
    let mut conn = PreWarmConn::new(test_dst(), test_conf());
    for _ in 0..MAX_RETRIES {
      conn.drive(&dialer, &counters).await;
    }
    assert_eq!(conn.state(), State::Closed);
    assert_eq!(counters.retry.load(Ordering::Relaxed), MAX_RETRIES as u64);
  }

  #[tokio::test]
  async fn donate_consumes_connection_and_closes_slot() {
    let dialer = FakeDialer {
      fail_resolve: false,
      fail_dial: false,
      fail_handshake: false,
      resolve_calls: AtomicU32::new(0),
    };
    let counters = DstCounters::default();
    let mut conn = PreWarmConn::new(test_dst(), test_conf());
    conn.drive(&dialer, &counters).await;
    assert_eq!(conn.state(), State::Open);
    let donated = conn.donate();
    assert!(donated.is_some());
  }
}
