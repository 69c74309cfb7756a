//! Stream table for one peer link: id allocation, the OPEN correlator
//! (pending tag → oneshot, the no-callbacks rule), incoming frame dispatch,
//! and the per-peer / process-wide stream caps.

use crate::frame::{Frame, FrameType};
use crate::payload::{reset_frame, OpenStatus, StreamOpen, StreamOpenAck};
use crate::sink::FrameSink;
use crate::stream::{Stream, StreamRegistry, StreamShared};
use metroo_core::{AgentId, DestAddr, Error, ResetReason, Result, StreamKind};
use metroo_crypto::session::{ephemeral, public_key_from_bytes, SessionCrypto, SessionRole};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Receive window granted to the peer on every stream we participate in.
    pub initial_window: u32,
    /// Active-stream cap on this link.
    pub max_streams: usize,
    pub open_timeout: Duration,
    /// Hop budget stamped into outgoing STREAM_OPENs.
    pub max_hops: u8,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            initial_window: 256 * 1024,
            max_streams: 1000,
            open_timeout: Duration::from_secs(30),
            max_hops: 16,
        }
    }
}

/// What a dispatched stream frame turned into.
pub(crate) enum Dispatch {
    Handled,
    /// STREAM_OPEN needs a policy decision (accept / forward / reject).
    Open { stream_id: u64, open: StreamOpen },
    /// Frame for a stream this link does not own locally; the forwarder may.
    Orphan(Frame),
}

pub(crate) struct Mux {
    local_id: AgentId,
    registry: Arc<StreamRegistry>,
    pending: Mutex<HashMap<u64, oneshot::Sender<StreamOpenAck>>>,
    next_id: AtomicU64,
    sink: FrameSink,
    cfg: MuxConfig,
    total_cap: usize,
}

impl Mux {
    pub fn new(
        local_id: AgentId,
        first_stream_id: u64,
        sink: FrameSink,
        cfg: MuxConfig,
        total: Arc<AtomicUsize>,
        total_cap: usize,
    ) -> Self {
        Self {
            local_id,
            registry: StreamRegistry::new(total),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(first_stream_id),
            sink,
            cfg,
            total_cap,
        }
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    pub fn stream_count(&self) -> usize {
        self.registry.len()
    }

    /// Hand out a stream id without creating a local stream; the forwarder
    /// numbers relayed streams from the same odd/even pool.
    pub fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(2, Ordering::Relaxed)
    }

    fn check_capacity(&self, pending: usize) -> Result<()> {
        if self.registry.len() + pending >= self.cfg.max_streams {
            return Err(Error::LimitExceeded(format!(
                "stream cap {} reached on link",
                self.cfg.max_streams
            )));
        }
        if self.registry.total.load(Ordering::Relaxed) >= self.total_cap {
            return Err(Error::LimitExceeded(format!(
                "process stream cap {} reached",
                self.total_cap
            )));
        }
        Ok(())
    }

    /// Open a stream towards `dest` through this link.
    pub async fn open(
        &self,
        dest: AgentId,
        kind: StreamKind,
        addr: Option<DestAddr>,
        e2e: bool,
    ) -> Result<Stream> {
        self.check_capacity(self.pending.lock().len())?;

        let id = self.next_id.fetch_add(2, Ordering::Relaxed);
        let secret = if e2e { Some(ephemeral()) } else { None };
        let open = StreamOpen {
            dest,
            origin: self.local_id,
            origin_stream_id: id,
            kind,
            ttl: self.cfg.max_hops,
            initial_window: self.cfg.initial_window,
            addr,
            e2e_public: secret.as_ref().map(|(_, p)| *p.as_bytes()),
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        self.pending.lock().insert(id, ack_tx);
        if let Err(e) = self.sink.send(open.clone().into_frame(id)).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        let ack = match tokio::time::timeout(self.cfg.open_timeout, ack_rx).await {
            Ok(Ok(ack)) => ack,
            Ok(Err(_)) => {
                // Link went down and dropped the correlator.
                self.pending.lock().remove(&id);
                return Err(Error::StreamClosed);
            }
            Err(_) => {
                // A late ACK now finds no waiter and is answered with RESET.
                self.pending.lock().remove(&id);
                return Err(Error::timeout(format!("stream open to {}", dest.short())));
            }
        };

        match ack.status {
            OpenStatus::Ok => {}
            OpenStatus::Err(reason) => return Err(open_failure(reason, &dest, open.addr.as_ref())),
        }

        let crypto = match secret {
            Some((sec, _)) => {
                let Some(their_pub) = ack.e2e_public else {
                    self.sink.try_send(reset_frame(id, ResetReason::Internal));
                    return Err(Error::protocol("OPEN_ACK missing E2E key"));
                };
                let their_pub = public_key_from_bytes(&their_pub).map_err(metroo_core::Error::from)?;
                Some(Arc::new(SessionCrypto::derive(
                    sec,
                    &their_pub,
                    SessionRole::Initiator,
                    self.local_id,
                    dest,
                    id,
                )))
            }
            None => None,
        };

        let (_, stream) = StreamShared::create(
            &self.registry,
            id,
            kind,
            self.sink.clone(),
            ack.initial_window,
            self.cfg.initial_window,
            crypto,
        );
        Ok(stream)
    }

    /// Accept an incoming STREAM_OPEN addressed to this agent and answer it.
    /// On capacity or key errors the failure ACK is sent here as well.
    pub async fn accept(&self, stream_id: u64, open: &StreamOpen) -> Result<Stream> {
        if let Err(e) = self.check_capacity(0) {
            self.reject(stream_id, ResetReason::LimitExceeded).await;
            return Err(e);
        }

        let (crypto, responder_pub) = match &open.e2e_public {
            Some(raw) => {
                let their_pub = match public_key_from_bytes(raw) {
                    Ok(p) => p,
                    Err(e) => {
                        self.reject(stream_id, ResetReason::Internal).await;
                        return Err(metroo_core::Error::from(e));
                    }
                };
                let (sec, public) = ephemeral();
                let crypto = SessionCrypto::derive(
                    sec,
                    &their_pub,
                    SessionRole::Responder,
                    open.origin,
                    self.local_id,
                    open.origin_stream_id,
                );
                (Some(Arc::new(crypto)), Some(*public.as_bytes()))
            }
            None => (None, None),
        };

        let (_, stream) = StreamShared::create(
            &self.registry,
            stream_id,
            open.kind,
            self.sink.clone(),
            open.initial_window,
            self.cfg.initial_window,
            crypto,
        );
        let ack = StreamOpenAck {
            status: OpenStatus::Ok,
            initial_window: self.cfg.initial_window,
            e2e_public: responder_pub,
        };
        self.sink.send(ack.into_frame(stream_id)).await?;
        Ok(stream)
    }

    /// Refuse an incoming STREAM_OPEN with a mapped reason.
    pub async fn reject(&self, stream_id: u64, reason: ResetReason) {
        let _ = self
            .sink
            .send(StreamOpenAck::failure(reason).into_frame(stream_id))
            .await;
    }

    /// Route one stream frame. Protocol violations bubble up and are fatal to
    /// the link.
    pub fn dispatch(&self, frame: Frame) -> Result<Dispatch> {
        match frame.frame_type {
            FrameType::StreamOpen => {
                let open = StreamOpen::decode(&frame.payload, frame.flags)?;
                Ok(Dispatch::Open {
                    stream_id: frame.stream_id,
                    open,
                })
            }
            FrameType::StreamOpenAck => {
                let waiter = self.pending.lock().remove(&frame.stream_id);
                match waiter {
                    Some(tx) => {
                        let ack = StreamOpenAck::decode(&frame.payload, frame.flags)?;
                        if tx.send(ack).is_err() {
                            // Opener cancelled while the ACK was in flight.
                            self.sink
                                .try_send(reset_frame(frame.stream_id, ResetReason::PeerClosed));
                        }
                        Ok(Dispatch::Handled)
                    }
                    None => Ok(Dispatch::Orphan(frame)),
                }
            }
            FrameType::StreamData => match self.registry.get(frame.stream_id) {
                Some(shared) => {
                    shared.on_data(frame.payload)?;
                    Ok(Dispatch::Handled)
                }
                None => Ok(Dispatch::Orphan(frame)),
            },
            FrameType::StreamEof => match self.registry.get(frame.stream_id) {
                Some(shared) => {
                    shared.on_eof()?;
                    Ok(Dispatch::Handled)
                }
                None => Ok(Dispatch::Orphan(frame)),
            },
            FrameType::StreamReset => match self.registry.get(frame.stream_id) {
                Some(shared) => {
                    let reason = crate::payload::decode_reset(&frame.payload)
                        .unwrap_or(ResetReason::Internal);
                    shared.on_reset(reason);
                    Ok(Dispatch::Handled)
                }
                None => Ok(Dispatch::Orphan(frame)),
            },
            FrameType::StreamWindow => match self.registry.get(frame.stream_id) {
                Some(shared) => {
                    let delta = crate::payload::decode_window(&frame.payload)?;
                    shared.on_window(delta)?;
                    Ok(Dispatch::Handled)
                }
                None => Ok(Dispatch::Orphan(frame)),
            },
            _ => Err(Error::protocol("non-stream frame dispatched to mux")),
        }
    }

    /// Drop every correlator and stream; used when the link dies.
    pub fn shutdown(&self, reason: ResetReason, notify_peer: bool) {
        self.pending.lock().clear();
        self.registry.reset_all(reason, notify_peer);
    }
}

fn open_failure(reason: ResetReason, dest: &AgentId, addr: Option<&DestAddr>) -> Error {
    let target = addr
        .map(|a| a.to_string())
        .unwrap_or_else(|| dest.short());
    match reason {
        ResetReason::NoRoute => Error::NoRoute(target),
        ResetReason::TtlExceeded => Error::TtlExceeded,
        ResetReason::LimitExceeded => Error::LimitExceeded("remote stream cap".into()),
        ResetReason::Timeout => Error::timeout(format!("open of {target}")),
        ResetReason::HostUnreachable => Error::ExitDial {
            kind: metroo_core::DialFailure::HostUnreachable,
            detail: format!("{target} unreachable"),
        },
        ResetReason::ConnectionRefused => Error::ExitDial {
            kind: metroo_core::DialFailure::Refused,
            detail: format!("{target} refused connection"),
        },
        other => Error::Reset(other),
    }
}
