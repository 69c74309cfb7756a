//! One authenticated link to a remote agent: a reader task, a single writer
//! task, a keepalive ticker, and the stream multiplexer. Everything the
//! daemon needs to know about arrives as `LinkEvent`s.

use crate::conn::Connection;
use crate::frame::{Frame, FrameType};
use crate::handshake::PeerInfo;
use crate::mux::{Dispatch, Mux, MuxConfig};
use crate::payload::{
    ControlReq, ControlRsp, Keepalive, NodeInfoBlob, RouteAdv, RouteWithdraw, StreamOpen,
};
use crate::sink::{FrameSink, SinkDrain};
use crate::stream::Stream;
use metroo_core::{AgentId, DestAddr, Error, ResetReason, Result, StreamKind, TransportKind};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    Dialer,
    Listener,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Dialing,
    Handshaking,
    Established,
    Closing,
    Closed,
}

#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub keepalive_interval: Duration,
    /// A peer silent on ACKs for this long is closed (3 missed keepalives).
    pub dead_after: Duration,
    pub send_queue_frames: usize,
    pub send_queue_bytes: usize,
    pub send_stall: Duration,
    /// How long shutdown may spend flushing the send queue.
    pub drain_timeout: Duration,
    pub mux: MuxConfig,
    pub max_streams_total: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(30),
            dead_after: Duration::from_secs(90),
            send_queue_frames: 1024,
            send_queue_bytes: 4 * 1024 * 1024,
            send_stall: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(5),
            mux: MuxConfig::default(),
            max_streams_total: 10_000,
        }
    }
}

/// What the link surfaces to the daemon's per-link driver.
#[derive(Debug)]
pub enum LinkEvent {
    /// Incoming STREAM_OPEN awaiting a policy decision.
    Open { stream_id: u64, open: StreamOpen },
    RouteAdv { adv: RouteAdv, skipped: usize },
    RouteWithdraw(RouteWithdraw),
    NodeInfo(NodeInfoBlob),
    ControlReq(ControlReq),
    ControlRsp(ControlRsp),
    /// A stream frame this link does not own locally; forwarder territory.
    Orphan(Frame),
    /// Terminal. The link has left the wire and all its streams are reset.
    Closed,
}

pub struct PeerLink {
    local_id: AgentId,
    info: PeerInfo,
    role: LinkRole,
    transport: TransportKind,
    sink: FrameSink,
    mux: Mux,
    state: Mutex<LinkState>,
    cancel: CancellationToken,
    started: Instant,
    rtt_micros: AtomicU64,
    last_ack_micros: AtomicU64,
    keepalive_nonce: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

impl PeerLink {
    /// Take over an authenticated connection and start the link tasks.
    pub fn spawn(
        conn: Connection,
        local_id: AgentId,
        info: PeerInfo,
        role: LinkRole,
        transport: TransportKind,
        cfg: LinkConfig,
        total_streams: Arc<AtomicUsize>,
    ) -> (Arc<PeerLink>, mpsc::Receiver<LinkEvent>) {
        let cancel = CancellationToken::new();
        let (sink, drain) = FrameSink::new(
            cfg.send_queue_frames,
            cfg.send_queue_bytes,
            cfg.send_stall,
            cancel.clone(),
        );
        // The dialer allocates odd stream ids, the listener even ones, so
        // concurrent opens from the two ends can never collide.
        let first_id = match role {
            LinkRole::Dialer => 1,
            LinkRole::Listener => 2,
        };
        let mux = Mux::new(
            local_id,
            first_id,
            sink.clone(),
            cfg.mux.clone(),
            total_streams,
            cfg.max_streams_total,
        );
        let link = Arc::new(PeerLink {
            local_id,
            info,
            role,
            transport,
            sink,
            mux,
            state: Mutex::new(LinkState::Established),
            cancel,
            started: Instant::now(),
            rtt_micros: AtomicU64::new(0),
            last_ack_micros: AtomicU64::new(0),
            keepalive_nonce: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
        });

        let (events_tx, events_rx) = mpsc::channel(64);
        tokio::spawn(writer_task(
            link.clone(),
            conn.writer,
            drain,
            cfg.drain_timeout,
        ));
        tokio::spawn(reader_task(link.clone(), conn.reader, events_tx));
        tokio::spawn(keepalive_task(link.clone(), cfg.clone()));

        (link, events_rx)
    }

    pub fn local_id(&self) -> AgentId {
        self.local_id
    }

    pub fn remote_id(&self) -> AgentId {
        self.info.agent_id
    }

    pub fn remote_info(&self) -> &PeerInfo {
        &self.info
    }

    pub fn role(&self) -> LinkRole {
        self.role
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn state(&self) -> LinkState {
        *self.state.lock()
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state(), LinkState::Closing | LinkState::Closed)
    }

    /// Smoothed RTT, once at least one keepalive has been acknowledged.
    pub fn rtt(&self) -> Option<Duration> {
        match self.rtt_micros.load(Ordering::Relaxed) {
            0 => None,
            micros => Some(Duration::from_micros(micros)),
        }
    }

    pub fn stream_count(&self) -> usize {
        self.mux.stream_count()
    }

    pub fn bytes_in(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed)
    }

    pub fn bytes_out(&self) -> u64 {
        self.bytes_out.load(Ordering::Relaxed)
    }

    /// The `(initiator, responder)` tuple both ends agree on; when two links
    /// to the same peer establish, the one with the lower tuple survives.
    pub fn dedup_key(&self) -> (AgentId, AgentId) {
        match self.role {
            LinkRole::Dialer => (self.local_id, self.info.agent_id),
            LinkRole::Listener => (self.info.agent_id, self.local_id),
        }
    }

    /// Enqueue a frame onto this link's wire.
    pub async fn send_frame(&self, frame: Frame) -> Result<()> {
        self.sink.send(frame).await
    }

    /// Best-effort enqueue, for shutdown and error replies.
    pub fn try_send_frame(&self, frame: Frame) -> bool {
        self.sink.try_send(frame)
    }

    /// Resolves once the link has begun shutting down for any reason.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }

    /// Allocate a stream id for a forwarded pairing. Shares the parity pool
    /// with locally-opened streams, so the ids never collide.
    pub fn allocate_forward_id(&self) -> u64 {
        self.mux.allocate_id()
    }

    pub async fn open_stream(
        &self,
        dest: AgentId,
        kind: StreamKind,
        addr: Option<DestAddr>,
        e2e: bool,
    ) -> Result<Stream> {
        if self.is_closed() {
            return Err(Error::transport("link closed"));
        }
        self.mux.open(dest, kind, addr, e2e).await
    }

    /// Accept an incoming OPEN (dest = self) and send the success ACK.
    pub async fn accept_stream(&self, stream_id: u64, open: &StreamOpen) -> Result<Stream> {
        self.mux.accept(stream_id, open).await
    }

    /// Refuse an incoming OPEN with a mapped reason.
    pub async fn reject_stream(&self, stream_id: u64, reason: ResetReason) {
        self.mux.reject(stream_id, reason).await
    }

    /// Graceful shutdown: reset all streams (telling the peer), then let the
    /// writer drain and the transport close.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if matches!(*state, LinkState::Closing | LinkState::Closed) {
                return;
            }
            *state = LinkState::Closing;
        }
        debug!(peer = %self.remote_id().short(), "closing link");
        self.mux.shutdown(ResetReason::PeerClosed, true);
        self.cancel.cancel();
    }

    fn now_micros(&self) -> u64 {
        self.started.elapsed().as_micros() as u64
    }

    fn on_keepalive_ack(&self, ka: &Keepalive) {
        let now = self.now_micros();
        self.last_ack_micros.store(now, Ordering::Relaxed);
        let sample = now.saturating_sub(ka.timestamp_micros);
        let old = self.rtt_micros.load(Ordering::Relaxed);
        // EWMA with alpha = 0.25; the first sample seeds it.
        let smoothed = if old == 0 { sample } else { (sample + 3 * old) / 4 };
        self.rtt_micros.store(smoothed.max(1), Ordering::Relaxed);
    }

    async fn handle_frame(&self, frame: Frame, events: &mpsc::Sender<LinkEvent>) -> Result<()> {
        self.bytes_in
            .fetch_add(frame.wire_size() as u64, Ordering::Relaxed);
        match frame.frame_type {
            FrameType::PeerHello | FrameType::PeerWelcome => {
                Err(Error::protocol("handshake frame on established link"))
            }
            FrameType::Keepalive => {
                let ka = Keepalive::decode(&frame.payload)?;
                self.sink
                    .send(Frame::new(FrameType::KeepaliveAck, 0, ka.encode()))
                    .await
            }
            FrameType::KeepaliveAck => {
                let ka = Keepalive::decode(&frame.payload)?;
                self.on_keepalive_ack(&ka);
                Ok(())
            }
            FrameType::StreamOpen
            | FrameType::StreamOpenAck
            | FrameType::StreamData
            | FrameType::StreamEof
            | FrameType::StreamReset
            | FrameType::StreamWindow => match self.mux.dispatch(frame)? {
                Dispatch::Handled => Ok(()),
                Dispatch::Open { stream_id, open } => {
                    emit(events, LinkEvent::Open { stream_id, open }).await
                }
                Dispatch::Orphan(frame) => emit(events, LinkEvent::Orphan(frame)).await,
            },
            FrameType::RouteAdv => {
                let (adv, skipped) = RouteAdv::decode(&frame.payload)?;
                if skipped > 0 {
                    warn!(
                        peer = %self.remote_id().short(),
                        skipped, "dropped malformed route advertisement entries"
                    );
                }
                emit(events, LinkEvent::RouteAdv { adv, skipped }).await
            }
            FrameType::RouteWithdraw => {
                let withdraw = RouteWithdraw::decode(&frame.payload)?;
                emit(events, LinkEvent::RouteWithdraw(withdraw)).await
            }
            FrameType::NodeInfo => {
                let blob = NodeInfoBlob::decode(&frame.payload, frame.flags)?;
                emit(events, LinkEvent::NodeInfo(blob)).await
            }
            FrameType::ControlReq => {
                let req = ControlReq::decode(&frame.payload, frame.flags)?;
                emit(events, LinkEvent::ControlReq(req)).await
            }
            FrameType::ControlRsp => {
                let rsp = ControlRsp::decode(&frame.payload, frame.flags)?;
                emit(events, LinkEvent::ControlRsp(rsp)).await
            }
        }
    }
}

async fn emit(events: &mpsc::Sender<LinkEvent>, event: LinkEvent) -> Result<()> {
    events
        .send(event)
        .await
        .map_err(|_| Error::internal("link event channel closed"))
}

async fn writer_task(
    link: Arc<PeerLink>,
    mut writer: Box<dyn crate::conn::FrameWriter>,
    mut drain: SinkDrain,
    drain_timeout: Duration,
) {
    loop {
        tokio::select! {
            _ = link.cancel.cancelled() => break,
            frame = drain.rx.recv() => match frame {
                Some(frame) => {
                    let size = frame.wire_size();
                    if let Err(e) = writer.write_frame(frame).await {
                        debug!(peer = %link.remote_id().short(), error = %e, "link write failed");
                        link.cancel.cancel();
                        break;
                    }
                    link.bytes_out.fetch_add(size as u64, Ordering::Relaxed);
                    drain.bytes.add_permits(size);
                }
                None => break,
            }
        }
    }
    // Flush whatever shutdown queued (stream RESETs included), bounded.
    let _ = tokio::time::timeout(drain_timeout, async {
        while let Ok(frame) = drain.rx.try_recv() {
            let size = frame.wire_size();
            if writer.write_frame(frame).await.is_err() {
                break;
            }
            link.bytes_out.fetch_add(size as u64, Ordering::Relaxed);
            drain.bytes.add_permits(size);
        }
        let _ = writer.close().await;
    })
    .await;
}

async fn reader_task(
    link: Arc<PeerLink>,
    mut reader: Box<dyn crate::conn::FrameReader>,
    events: mpsc::Sender<LinkEvent>,
) {
    loop {
        tokio::select! {
            _ = link.cancel.cancelled() => break,
            result = reader.read_frame() => match result {
                Ok(Some(frame)) => {
                    if let Err(e) = link.handle_frame(frame, &events).await {
                        // Frame-level protocol errors are fatal to the link.
                        warn!(peer = %link.remote_id().short(), error = %e, "link protocol error");
                        break;
                    }
                }
                Ok(None) => {
                    debug!(peer = %link.remote_id().short(), "peer closed transport");
                    break;
                }
                Err(e) => {
                    debug!(peer = %link.remote_id().short(), error = %e, "link read failed");
                    break;
                }
            }
        }
    }
    link.cancel.cancel();
    link.mux.shutdown(ResetReason::PeerClosed, false);
    *link.state.lock() = LinkState::Closed;
    let _ = events.send(LinkEvent::Closed).await;
}

async fn keepalive_task(link: Arc<PeerLink>, cfg: LinkConfig) {
    let mut interval = tokio::time::interval(cfg.keepalive_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The immediate first tick doubles as the initial RTT probe.
    loop {
        tokio::select! {
            _ = link.cancel.cancelled() => return,
            _ = interval.tick() => {}
        }
        let now = link.now_micros();
        let last_ack = link.last_ack_micros.load(Ordering::Relaxed);
        let silent = Duration::from_micros(now.saturating_sub(last_ack));
        if last_ack > 0 && silent > cfg.dead_after {
            warn!(
                peer = %link.remote_id().short(),
                silent_for = ?silent,
                "peer stopped acknowledging keepalives"
            );
            link.close();
            return;
        }
        if now > cfg.dead_after.as_micros() as u64 && last_ack == 0 {
            // Never acked a single keepalive since establishment.
            warn!(peer = %link.remote_id().short(), "peer never acknowledged keepalives");
            link.close();
            return;
        }
        let ka = Keepalive {
            nonce: link.keepalive_nonce.fetch_add(1, Ordering::Relaxed) + 1,
            timestamp_micros: now,
        };
        if link
            .sink
            .send(Frame::new(FrameType::Keepalive, 0, ka.encode()))
            .await
            .is_err()
        {
            return;
        }
    }
}
