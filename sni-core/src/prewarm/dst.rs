//! The pre-warm pool key: a destination host/port/routing-type/ALPN tuple.
//!
//! Grounded directly on `PreWarm::Dst` / `DstHash` / `DstKeyEqual` from
//! `iocore/net/PreWarm.h`: the hash and equality there are built from
//! exactly these four fields, and so is `Hash`/`Eq` here (derived instead of
//! hand-rolled, since Rust's derive already produces the same semantics the
//! original computed by hand with a `CryptoContext`).

use crate::action::RoutingType;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dst {
  pub host: String,
  pub port: u16,
  pub routing_type: RoutingType,
  /// `None` is the original's `SessionProtocolNameRegistry::INVALID`
  /// sentinel: "pre-warm without restricting the ALPN offer".
  pub alpn_index: Option<u16>,
}

impl Dst {
  pub fn new(host: String, port: u16, routing_type: RoutingType, alpn_index: Option<u16>) -> Self {
    Self {
      host,
      port,
      routing_type,
      alpn_index,
    }
  }
}
