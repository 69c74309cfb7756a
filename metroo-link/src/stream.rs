//! One virtual stream inside a peer link: ordered byte pipe, per-direction
//! close, sliding receive window, optional end-to-end sealing.

use crate::frame::{Frame, FrameType, DATA_CHUNK};
use crate::payload::{reset_frame, window_frame};
use crate::sink::FrameSink;
use bytes::Bytes;
use metroo_core::{Error, ResetReason, Result, StreamKind};
use metroo_crypto::SessionCrypto;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Notify};

/// AEAD tag bytes added to every sealed DATA payload.
const SEAL_OVERHEAD: usize = 16;

/// Hard ceiling for the send window; additive WINDOW deltas past this are a
/// protocol error.
const MAX_WINDOW: u64 = u32::MAX as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// STREAM_OPEN sent, OPEN_ACK not yet received. The open correlator
    /// tracks this phase; handles are only handed out once `Open`.
    Opening,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
    Reset(ResetReason),
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(self, StreamState::Closed | StreamState::Reset(_))
    }

    fn writable(self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }
}

pub(crate) enum StreamItem {
    Data { data: Bytes, wire_len: u32 },
    Eof,
    Reset(ResetReason),
}

struct SendWindow {
    avail: Mutex<u64>,
    notify: Notify,
}

struct RecvState {
    /// Bytes the peer may still send before waiting for a WINDOW grant.
    credit: u64,
    /// Bytes consumed locally since the last grant.
    consumed: u64,
}

/// Everything the dispatch path and the handle both touch.
pub(crate) struct StreamShared {
    id: u64,
    kind: StreamKind,
    sink: FrameSink,
    state: Mutex<StreamState>,
    send: SendWindow,
    recv: Mutex<RecvState>,
    recv_window: u32,
    crypto: Option<Arc<SessionCrypto>>,
    items: mpsc::UnboundedSender<StreamItem>,
    registry: Weak<StreamRegistry>,
    finalized: AtomicBool,
}

/// Per-link stream table plus the process-wide stream counter.
pub(crate) struct StreamRegistry {
    pub streams: Mutex<std::collections::HashMap<u64, Arc<StreamShared>>>,
    pub total: Arc<AtomicUsize>,
}

impl StreamRegistry {
    pub fn new(total: Arc<AtomicUsize>) -> Arc<Self> {
        Arc::new(Self {
            streams: Mutex::new(std::collections::HashMap::new()),
            total,
        })
    }

    pub fn len(&self) -> usize {
        self.streams.lock().len()
    }

    pub fn get(&self, id: u64) -> Option<Arc<StreamShared>> {
        self.streams.lock().get(&id).cloned()
    }

    /// Reset every stream on the link, delivering `reason` to local readers
    /// and optionally notifying the peer.
    pub fn reset_all(&self, reason: ResetReason, notify_peer: bool) {
        let drained: Vec<_> = {
            let mut map = self.streams.lock();
            map.drain().map(|(_, s)| s).collect()
        };
        for shared in drained {
            shared.apply_reset(reason, notify_peer);
        }
    }
}

impl StreamShared {
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        registry: &Arc<StreamRegistry>,
        id: u64,
        kind: StreamKind,
        sink: FrameSink,
        send_window: u32,
        recv_window: u32,
        crypto: Option<Arc<SessionCrypto>>,
    ) -> (Arc<StreamShared>, Stream) {
        let (items_tx, items_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(StreamShared {
            id,
            kind,
            sink,
            state: Mutex::new(StreamState::Open),
            send: SendWindow {
                avail: Mutex::new(send_window as u64),
                notify: Notify::new(),
            },
            recv: Mutex::new(RecvState {
                credit: recv_window as u64,
                consumed: 0,
            }),
            recv_window,
            crypto,
            items: items_tx,
            registry: Arc::downgrade(registry),
            finalized: AtomicBool::new(false),
        });
        registry.streams.lock().insert(id, shared.clone());
        registry.total.fetch_add(1, Ordering::Relaxed);
        let handle = Stream {
            read: StreamReadHalf {
                shared: shared.clone(),
                items: items_rx,
                eof: false,
            },
            write: StreamWriteHalf {
                shared: shared.clone(),
                write_done: false,
            },
        };
        (shared, handle)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> StreamState {
        *self.state.lock()
    }

    /// Peer data arrived. Enforces the receive-window invariant and the
    /// no-data-after-EOF rule; both violations are fatal to the link.
    pub fn on_data(&self, payload: Bytes) -> Result<()> {
        {
            let state = *self.state.lock();
            match state {
                StreamState::HalfClosedRemote | StreamState::Closed => {
                    return Err(Error::protocol("DATA after EOF on stream"));
                }
                StreamState::Reset(_) => return Ok(()), // raced with our reset
                _ => {}
            }
        }
        let wire_len = payload.len() as u32;
        {
            let mut recv = self.recv.lock();
            if (wire_len as u64) > recv.credit {
                return Err(Error::protocol("receive window exceeded"));
            }
            recv.credit -= wire_len as u64;
        }
        let data = match &self.crypto {
            Some(crypto) => match crypto.open(&payload) {
                Ok(plain) => Bytes::from(plain),
                Err(e) => {
                    // AEAD failure resets this stream only.
                    tracing::warn!(stream = self.id, error = %e, "E2E open failed");
                    self.apply_reset(ResetReason::Internal, true);
                    return Ok(());
                }
            },
            None => payload,
        };
        let _ = self.items.send(StreamItem::Data { data, wire_len });
        Ok(())
    }

    /// Peer half-closed its direction.
    pub fn on_eof(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            StreamState::Open => *state = StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => *state = StreamState::Closed,
            StreamState::HalfClosedRemote | StreamState::Closed => {
                return Err(Error::protocol("duplicate EOF on stream"));
            }
            StreamState::Reset(_) | StreamState::Opening => return Ok(()),
        }
        let closed = state.is_terminal();
        drop(state);
        let _ = self.items.send(StreamItem::Eof);
        if closed {
            self.finalize();
        }
        Ok(())
    }

    pub fn on_reset(&self, reason: ResetReason) {
        self.apply_reset(reason, false);
    }

    /// Additive WINDOW grant from the peer. Overflow is a protocol error.
    pub fn on_window(&self, delta: u32) -> Result<()> {
        {
            let mut avail = self.send.avail.lock();
            let next = *avail + delta as u64;
            if next > MAX_WINDOW {
                return Err(Error::protocol("send window overflow"));
            }
            *avail = next;
        }
        self.send.notify.notify_waiters();
        Ok(())
    }

    /// Move to `Reset`, wake everyone, optionally tell the peer.
    pub fn apply_reset(&self, reason: ResetReason, notify_peer: bool) {
        {
            let mut state = self.state.lock();
            if state.is_terminal() {
                return;
            }
            *state = StreamState::Reset(reason);
        }
        if notify_peer {
            self.sink.try_send(reset_frame(self.id, reason));
        }
        let _ = self.items.send(StreamItem::Reset(reason));
        self.send.notify.notify_waiters();
        self.finalize();
    }

    /// Reserve between `min` and `want` bytes of send window.
    async fn reserve_send(&self, min: u64, want: u64) -> Result<u64> {
        loop {
            let notified = self.send.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = *self.state.lock();
                match state {
                    s if s.writable() => {}
                    StreamState::Reset(reason) => return Err(Error::Reset(reason)),
                    _ => return Err(Error::StreamClosed),
                }
                let mut avail = self.send.avail.lock();
                if *avail >= min {
                    let take = (*avail).min(want);
                    *avail -= take;
                    return Ok(take);
                }
            }
            notified.await;
        }
    }

    /// Local consumption: grant more window once half of it has been eaten,
    /// so tiny grants do not chatter.
    fn consume(&self, wire_len: u32) -> Option<u32> {
        let mut recv = self.recv.lock();
        recv.consumed += wire_len as u64;
        if recv.consumed >= (self.recv_window as u64).div_ceil(2) {
            let grant = recv.consumed as u32;
            recv.consumed = 0;
            recv.credit += grant as u64;
            Some(grant)
        } else {
            None
        }
    }

    fn finalize(&self) {
        if self.finalized.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.streams.lock().remove(&self.id);
            registry.total.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

/// Read half: ordered data chunks until EOF or reset.
pub struct StreamReadHalf {
    shared: Arc<StreamShared>,
    items: mpsc::UnboundedReceiver<StreamItem>,
    eof: bool,
}

impl StreamReadHalf {
    /// Next chunk of stream data; `None` is the orderly end-of-stream marker.
    pub async fn read(&mut self) -> Result<Option<Bytes>> {
        if self.eof {
            return Ok(None);
        }
        match self.items.recv().await {
            Some(StreamItem::Data { data, wire_len }) => {
                if let Some(grant) = self.shared.consume(wire_len) {
                    // A failed grant means the link is going down; the reset
                    // will surface on the next read.
                    let _ = self
                        .shared
                        .sink
                        .send(window_frame(self.shared.id, grant))
                        .await;
                }
                Ok(Some(data))
            }
            Some(StreamItem::Eof) => {
                self.eof = true;
                Ok(None)
            }
            Some(StreamItem::Reset(reason)) => {
                self.eof = true;
                Err(Error::Reset(reason))
            }
            None => Err(Error::StreamClosed),
        }
    }
}

/// Write half: windowed writes, half-close, abortive reset.
pub struct StreamWriteHalf {
    shared: Arc<StreamShared>,
    write_done: bool,
}

impl StreamWriteHalf {
    /// Write all of `data`, suspending while the send window is empty or the
    /// link queue is full.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.write_done {
            return Err(Error::StreamClosed);
        }
        let sealed = self.shared.crypto.is_some();
        let (overhead, chunk_max) = if sealed {
            (SEAL_OVERHEAD, DATA_CHUNK - SEAL_OVERHEAD)
        } else {
            (0, DATA_CHUNK)
        };
        let mut off = 0;
        while off < data.len() {
            let want_plain = (data.len() - off).min(chunk_max);
            let granted = self
                .shared
                .reserve_send((overhead + 1) as u64, (want_plain + overhead) as u64)
                .await?;
            let plain_len = (granted as usize - overhead).min(want_plain);
            let chunk = &data[off..off + plain_len];
            let payload = match &self.shared.crypto {
                Some(crypto) => {
                    let ct = crypto.seal(chunk).map_err(metroo_core::Error::from)?;
                    Bytes::from(ct)
                }
                None => Bytes::copy_from_slice(chunk),
            };
            // Return any window we reserved but did not use.
            let used = (plain_len + overhead) as u64;
            if granted > used {
                let mut avail = self.shared.send.avail.lock();
                *avail += granted - used;
            }
            self.shared
                .sink
                .send(Frame::new(FrameType::StreamData, self.shared.id, payload))
                .await?;
            off += plain_len;
        }
        Ok(())
    }

    /// Half-close our direction. The peer may keep sending until it EOFs too.
    pub async fn write_eof(&mut self) -> Result<()> {
        if self.write_done {
            return Err(Error::StreamClosed);
        }
        {
            let mut state = self.shared.state.lock();
            match *state {
                StreamState::Open => *state = StreamState::HalfClosedLocal,
                StreamState::HalfClosedRemote => *state = StreamState::Closed,
                StreamState::Reset(reason) => return Err(Error::Reset(reason)),
                _ => return Err(Error::StreamClosed),
            }
        }
        self.write_done = true;
        self.shared
            .sink
            .send(Frame::new(FrameType::StreamEof, self.shared.id, Bytes::new()))
            .await?;
        if self.shared.state().is_terminal() {
            self.shared.finalize();
        }
        Ok(())
    }

    /// Abortive close of both directions.
    pub async fn reset(&mut self, reason: ResetReason) {
        self.write_done = true;
        self.shared.apply_reset(reason, true);
    }
}

impl Drop for StreamWriteHalf {
    fn drop(&mut self) {
        // Dropping the writer without an orderly EOF aborts the stream, the
        // same contract a TCP socket gives.
        if !self.write_done && !self.shared.state().is_terminal() {
            self.shared.apply_reset(ResetReason::PeerClosed, true);
        }
    }
}

/// A bidirectional stream handle.
pub struct Stream {
    read: StreamReadHalf,
    write: StreamWriteHalf,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream").field("id", &self.id()).finish()
    }
}

impl Stream {
    pub fn id(&self) -> u64 {
        self.read.shared.id
    }

    pub fn kind(&self) -> StreamKind {
        self.read.shared.kind
    }

    pub fn state(&self) -> StreamState {
        self.read.shared.state()
    }

    pub async fn read(&mut self) -> Result<Option<Bytes>> {
        self.read.read().await
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.write.write(data).await
    }

    pub async fn write_eof(&mut self) -> Result<()> {
        self.write.write_eof().await
    }

    pub async fn reset(&mut self, reason: ResetReason) {
        self.write.reset(reason).await
    }

    /// Split for concurrent pumps in the two directions.
    pub fn into_split(self) -> (StreamReadHalf, StreamWriteHalf) {
        (self.read, self.write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::FrameSink;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn shared(
        send_window: u32,
        recv_window: u32,
    ) -> (Arc<StreamShared>, Stream, crate::sink::SinkDrain) {
        let registry = StreamRegistry::new(Arc::new(AtomicUsize::new(0)));
        let (sink, drain) = FrameSink::new(
            64,
            1024 * 1024,
            Duration::from_millis(200),
            CancellationToken::new(),
        );
        let (shared, handle) = StreamShared::create(
            &registry,
            1,
            StreamKind::Tcp,
            sink,
            send_window,
            recv_window,
            None,
        );
        (shared, handle, drain)
    }

    #[tokio::test]
    async fn data_after_remote_eof_is_a_protocol_error() {
        let (s, _handle, _drain) = shared(1024, 1024);
        s.on_data(Bytes::from_static(b"ok")).unwrap();
        s.on_eof().unwrap();
        let err = s.on_data(Bytes::from_static(b"late")).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn duplicate_eof_is_a_protocol_error() {
        let (s, _handle, _drain) = shared(1024, 1024);
        s.on_eof().unwrap();
        assert!(s.on_eof().is_err());
    }

    #[tokio::test]
    async fn receive_window_is_enforced_exactly() {
        let (s, _handle, _drain) = shared(1024, 100);
        // Exactly the window is fine.
        s.on_data(Bytes::from(vec![0u8; 100])).unwrap();
        // One more byte violates the invariant.
        let err = s.on_data(Bytes::from_static(b"x")).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn window_grant_waits_for_half_consumption() {
        let (s, mut handle, _drain) = shared(1024, 100);
        s.on_data(Bytes::from(vec![1u8; 30])).unwrap();
        s.on_data(Bytes::from(vec![2u8; 30])).unwrap();
        // First read consumes 30 < 50: no grant yet.
        handle.read().await.unwrap().unwrap();
        assert_eq!(s.recv.lock().consumed, 30);
        // Second read crosses the half-window mark and grants.
        handle.read().await.unwrap().unwrap();
        assert_eq!(s.recv.lock().consumed, 0);
        assert_eq!(s.recv.lock().credit, 100);
    }

    #[tokio::test]
    async fn window_overflow_is_a_protocol_error() {
        let (s, _handle, _drain) = shared(u32::MAX - 10, 1024);
        assert!(s.on_window(100).is_err());
        // A sane delta is fine.
        assert!(s.on_window(5).is_ok());
    }

    #[tokio::test]
    async fn write_blocks_until_window_grant() {
        let (s, handle, _drain) = shared(10, 1024);
        let (_rd, mut wr) = handle.into_split();
        let writer = tokio::spawn(async move {
            wr.write(&[0u8; 30]).await.unwrap();
            wr.write_eof().await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!writer.is_finished(), "writer should be window-blocked");
        s.on_window(100).unwrap();
        tokio::time::timeout(Duration::from_secs(1), writer)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn reset_unblocks_a_window_stalled_writer() {
        let (s, handle, _drain) = shared(0, 1024);
        let (_rd, mut wr) = handle.into_split();
        let writer = tokio::spawn(async move { wr.write(&[0u8; 10]).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        s.on_reset(ResetReason::PeerClosed);
        let result = tokio::time::timeout(Duration::from_secs(1), writer)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(Error::Reset(ResetReason::PeerClosed))));
    }

    #[tokio::test]
    async fn finalize_removes_from_registry_once() {
        let registry = StreamRegistry::new(Arc::new(AtomicUsize::new(0)));
        let (sink, _drain) = FrameSink::new(
            64,
            1024,
            Duration::from_millis(100),
            CancellationToken::new(),
        );
        let (s, _handle) =
            StreamShared::create(&registry, 7, StreamKind::Udp, sink, 10, 10, None);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.total.load(Ordering::Relaxed), 1);
        s.apply_reset(ResetReason::Internal, false);
        s.apply_reset(ResetReason::Internal, false);
        assert_eq!(registry.len(), 0);
        assert_eq!(registry.total.load(Ordering::Relaxed), 0);
    }
}
