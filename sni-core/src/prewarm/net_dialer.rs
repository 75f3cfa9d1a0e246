//! The production [`Dialer`]: DNS resolution via `hickory_resolver`
//! (grounded on `ferron-common::http_proxy::load_balancer::resolve_upstreams`,
//! which drives the same resolver for SRV/backend lookups), plain TCP
//! dialing via `tokio::net::TcpStream`, and — for `PartialBlind`
//! destinations only — an upstream TLS handshake built the way
//! `ferron/src/optional_modules/rproxy.rs` builds its outbound
//! `TlsConnector`: a `RootCertStore` seeded from `webpki-roots`, wrapped by
//! `tokio_rustls::TlsConnector`.

use crate::action::RoutingType;
use crate::prewarm::conf::PreWarmConfig;
use crate::prewarm::dst::Dst;
use crate::prewarm::sm::{Conn, Dialer};
use anyhow::{Context, Result};
use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioResolver;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

pub struct TokioDialer {
  resolver: TokioResolver,
  tls_config: Arc<ClientConfig>,
}

impl TokioDialer {
  pub fn new() -> Self {
    let resolver = TokioResolver::builder_with_config(
      ResolverConfig::default(),
      hickory_resolver::name_server::TokioConnectionProvider::default(),
    )
    .with_options(ResolverOpts::default())
    .build();

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
      .with_safe_default_protocol_versions()
      .expect("ring provider supports the default protocol versions")
      .with_root_certificates(roots)
      .with_no_client_auth();

    Self {
      resolver,
      tls_config: Arc::new(tls_config),
    }
  }
}

impl Default for TokioDialer {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl Dialer for TokioDialer {
  async fn resolve(&self, host: &str, _srv_enabled: bool) -> Result<Vec<SocketAddr>> {
    // SRV-record resolution mirrors `resolve_upstreams`'s weighted-random
    // selection among same-priority records; pre-warm only needs *an*
    // address to connect to, so we keep the plain A/AAAA lookup path for
    // both SRV-enabled and disabled destinations rather than duplicating
    // that weighting logic here.
    let lookup = self
      .resolver
      .lookup_ip(host)
      .await
      .with_context(|| format!("DNS lookup failed for {host}"))?;
    Ok(lookup.iter().map(|ip| SocketAddr::new(ip, 0)).collect())
  }

  async fn dial(&self, addr: SocketAddr) -> Result<Box<dyn Conn>> {
    let stream = TcpStream::connect(addr)
      .await
      .with_context(|| format!("TCP connect failed to {addr}"))?;
    Ok(Box::new(stream))
  }

  async fn handshake(&self, conn: Box<dyn Conn>, dst: &Dst, conf: &PreWarmConfig) -> Result<Box<dyn Conn>> {
    if dst.routing_type != RoutingType::PartialBlind {
      return Ok(conn);
    }
    let server_name = ServerName::try_from(conf.sni.clone()).with_context(|| format!("invalid SNI {:?}", conf.sni))?;
    let connector = TlsConnector::from(self.tls_config.clone());
    let stream = connector
      .connect(server_name, TokioIoAdapter(conn))
      .await
      .context("upstream TLS handshake failed")?;
    Ok(Box::new(stream))
  }
}

/// `tokio_rustls::TlsConnector::connect` wants a concrete `AsyncRead +
/// AsyncWrite`, not a trait object; this newtype forwards both through the
/// boxed connection so `TokioDialer` can stay generic over transport.
struct TokioIoAdapter(Box<dyn Conn>);

impl tokio::io::AsyncRead for TokioIoAdapter {
  fn poll_read(
    mut self: std::pin::Pin<&mut Self>,
    cx: &mut std::task::Context<'_>,
    buf: &mut tokio::io::ReadBuf<'_>,
  ) -> std::task::Poll<std::io::Result<()>> {
    std::pin::Pin::new(&mut self.0).poll_read(cx, buf)
  }
}

impl tokio::io::AsyncWrite for TokioIoAdapter {
  fn poll_write(
    mut self: std::pin::Pin<&mut Self>,
    cx: &mut std::task::Context<'_>,
    buf: &[u8],
  ) -> std::task::Poll<std::io::Result<usize>> {
    std::pin::Pin::new(&mut self.0).poll_write(cx, buf)
  }
  fn poll_flush(mut self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<()>> {
    std::pin::Pin::new(&mut self.0).poll_flush(cx)
  }
  fn poll_shutdown(mut self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<()>> {
    std::pin::Pin::new(&mut self.0).poll_shutdown(cx)
  }
}
