//! Length-framed TCP transport. No TLS and no URL path handling, which makes
//! it the development stand-in: the production quic/h2/ws providers terminate
//! TLS themselves and hand the core the same two halves.

use crate::{Dialer, Listener, TransportProvider};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use metroo_core::config::{ListenerConfig, PeerConfig};
use metroo_core::{Error, Result, TransportKind};
use metroo_link::codec::FrameCodec;
use metroo_link::{Connection, Frame, FrameReader, FrameWriter};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite};

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

struct TcpFrameReader {
    inner: FramedRead<OwnedReadHalf, FrameCodec>,
}

#[async_trait]
impl FrameReader for TcpFrameReader {
    async fn read_frame(&mut self) -> Result<Option<Frame>> {
        match self.inner.next().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

struct TcpFrameWriter {
    inner: FramedWrite<OwnedWriteHalf, FrameCodec>,
}

#[async_trait]
impl FrameWriter for TcpFrameWriter {
    async fn write_frame(&mut self, frame: Frame) -> Result<()> {
        self.inner.send(frame).await
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

fn wrap(stream: TcpStream) -> Result<Connection> {
    stream.set_nodelay(true).ok();
    let (read, write) = stream.into_split();
    Ok(Connection {
        reader: Box::new(TcpFrameReader {
            inner: FramedRead::new(read, FrameCodec),
        }),
        writer: Box::new(TcpFrameWriter {
            inner: FramedWrite::new(write, FrameCodec),
        }),
        remote_tls_identity: None,
    })
}

pub struct TcpTransportListener {
    listener: TcpListener,
    kind: TransportKind,
}

impl TcpTransportListener {
    pub async fn bind(address: SocketAddr, kind: TransportKind) -> Result<Self> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| Error::transport(format!("bind {address}: {e}")))?;
        Ok(Self { listener, kind })
    }
}

#[async_trait]
impl Listener for TcpTransportListener {
    async fn accept(&mut self) -> Result<Connection> {
        let (stream, _) = self
            .listener
            .accept()
            .await
            .map_err(|e| Error::transport(format!("accept: {e}")))?;
        wrap(stream)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }
}

pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, peer: &PeerConfig) -> Result<Connection> {
        let stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&peer.address))
            .await
            .map_err(|_| Error::timeout(format!("dial {}", peer.address)))?
            .map_err(|e| Error::transport(format!("dial {}: {e}", peer.address)))?;
        wrap(stream)
    }
}

/// Serves every configured transport name over plain framed TCP. Development
/// wiring only; production deployments register real quic/h2/ws providers.
pub struct TcpProvider;

#[async_trait]
impl TransportProvider for TcpProvider {
    async fn listen(&self, cfg: &ListenerConfig) -> Result<Box<dyn Listener>> {
        let listener = TcpTransportListener::bind(cfg.address, cfg.transport).await?;
        Ok(Box::new(listener))
    }

    fn dialer(&self, _kind: TransportKind) -> Box<dyn Dialer> {
        Box::new(TcpDialer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metroo_link::FrameType;

    #[tokio::test]
    async fn frames_cross_a_tcp_connection() {
        let mut listener =
            TcpTransportListener::bind("127.0.0.1:0".parse().unwrap(), TransportKind::Ws)
                .await
                .unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move { listener.accept().await });
        let peer = PeerConfig {
            id: None,
            address: addr.to_string(),
            transport: TransportKind::Ws,
            proxy_auth: None,
        };
        let mut client = TcpDialer.dial(&peer).await.unwrap();
        let mut server = accept.await.unwrap().unwrap();

        let frame = Frame::new(FrameType::Keepalive, 0, &b"over tcp"[..]);
        client.writer.write_frame(frame.clone()).await.unwrap();
        assert_eq!(server.reader.read_frame().await.unwrap(), Some(frame));

        client.writer.close().await.unwrap();
        assert_eq!(server.reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn dial_failure_is_a_transport_error() {
        let peer = PeerConfig {
            id: None,
            address: "127.0.0.1:1".into(),
            transport: TransportKind::Quic,
            proxy_auth: None,
        };
        assert!(TcpDialer.dial(&peer).await.is_err());
    }
}
