//! The framed-connection abstraction the link layer consumes. Concrete
//! transports (quic/h2/ws, and the development TCP transport) live outside
//! this crate; they only need to produce the two halves below.

use crate::frame::Frame;
use async_trait::async_trait;
use metroo_core::{Error, Result};
use tokio::sync::mpsc;

/// Read half of an established transport connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Next frame, or `None` on clean remote close.
    async fn read_frame(&mut self) -> Result<Option<Frame>>;
}

/// Write half of an established transport connection.
#[async_trait]
pub trait FrameWriter: Send {
    async fn write_frame(&mut self, frame: Frame) -> Result<()>;
    /// Flush and close the underlying transport.
    async fn close(&mut self) -> Result<()>;
}

/// An established, reliable, ordered, bidirectional framed connection.
pub struct Connection {
    pub reader: Box<dyn FrameReader>,
    pub writer: Box<dyn FrameWriter>,
    /// X25519 public key the transport layer authenticated via TLS, when the
    /// transport carries one. The handshake cross-checks it against the
    /// advertised identity.
    pub remote_tls_identity: Option<[u8; 32]>,
}

struct MemoryReader {
    rx: mpsc::Receiver<Frame>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn read_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.rx.recv().await)
    }
}

struct MemoryWriter {
    tx: Option<mpsc::Sender<Frame>>,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn write_frame(&mut self, frame: Frame) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| Error::transport("connection closed"))?;
        tx.send(frame)
            .await
            .map_err(|_| Error::transport("connection closed by peer"))
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

/// An in-process connection pair: frames written on one end are read on the
/// other. Used by unit and integration tests in place of a real transport.
pub fn memory_pair(capacity: usize) -> (Connection, Connection) {
    let (a_tx, b_rx) = mpsc::channel(capacity);
    let (b_tx, a_rx) = mpsc::channel(capacity);
    let a = Connection {
        reader: Box::new(MemoryReader { rx: a_rx }),
        writer: Box::new(MemoryWriter { tx: Some(a_tx) }),
        remote_tls_identity: None,
    };
    let b = Connection {
        reader: Box::new(MemoryReader { rx: b_rx }),
        writer: Box::new(MemoryWriter { tx: Some(b_tx) }),
        remote_tls_identity: None,
    };
    (a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameType;

    #[tokio::test]
    async fn frames_cross_the_pair() {
        let (mut a, mut b) = memory_pair(8);
        let frame = Frame::new(FrameType::Keepalive, 0, &b"ping"[..]);
        a.writer.write_frame(frame.clone()).await.unwrap();
        assert_eq!(b.reader.read_frame().await.unwrap(), Some(frame));
    }

    #[tokio::test]
    async fn close_yields_eof_on_the_other_end() {
        let (mut a, mut b) = memory_pair(8);
        a.writer.close().await.unwrap();
        assert_eq!(b.reader.read_frame().await.unwrap(), None);
        assert!(a
            .writer
            .write_frame(Frame::new(FrameType::Keepalive, 0, Vec::new()))
            .await
            .is_err());
    }
}
