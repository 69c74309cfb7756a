#![forbid(unsafe_code)]

//! Transport seam for Muti Metroo.
//!
//! The link layer consumes framed, reliable, ordered connections; this crate
//! defines how they are produced. The three production transports (`quic`,
//! `h2`, `ws`) terminate TLS outside the core and plug in through
//! [`TransportProvider`]; the [`tcp`] module supplies a plain length-framed
//! TCP provider used by development wiring and the integration tests.

pub mod tcp;

use async_trait::async_trait;
use metroo_core::config::{ListenerConfig, PeerConfig};
use metroo_core::{Result, TransportKind};
use metroo_link::Connection;
use std::net::SocketAddr;

/// Accept side of a transport.
#[async_trait]
pub trait Listener: Send {
    /// Wait for the next inbound connection, transport handshake (TLS and
    /// framing) already complete.
    async fn accept(&mut self) -> Result<Connection>;

    fn local_addr(&self) -> Option<SocketAddr>;

    fn kind(&self) -> TransportKind;
}

/// Dial side of a transport.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, peer: &PeerConfig) -> Result<Connection>;
}

/// A named transport implementation, resolved from configuration.
#[async_trait]
pub trait TransportProvider: Send + Sync {
    async fn listen(&self, cfg: &ListenerConfig) -> Result<Box<dyn Listener>>;

    fn dialer(&self, kind: TransportKind) -> Box<dyn Dialer>;
}
