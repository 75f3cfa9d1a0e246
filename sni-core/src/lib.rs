//! SNI-driven TLS routing rule store and outbound connection pre-warming
//! core: given a TLS ClientHello's SNI, decide what to do with the
//! connection (tunnel, forward, partial-blind-route, reject) and keep a
//! pool of already-connected, already-handshaked upstream connections ready
//! to hand off to whichever one wins.

pub mod action;
pub mod config;
pub mod destination;
pub mod log;
pub mod metrics;
pub mod prewarm;
pub mod rule;
pub mod rulestore;
pub mod tls_integration;
pub mod util;

pub use action::{Action, ApplyOutcome, ConnCtx};
pub use rule::Rule;
pub use rulestore::RuleStore;
