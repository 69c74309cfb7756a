//! Transit relay. Streams whose destination is another agent are paired
//! across two links and their frames copied without touching payloads;
//! end-to-end ciphertext passes through opaque.

use crate::supervisor::Supervisor;
use dashmap::DashMap;
use metroo_core::{AgentId, ResetReason};
use metroo_link::frame::{Frame, FrameType};
use metroo_link::payload::{reset_frame, OpenStatus, StreamOpen, StreamOpenAck};
use metroo_link::peer::PeerLink;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// One end of a forwarded pairing: which peer the frames arrive from, and the
/// stream id they carry on that link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairKey {
    pub peer: AgentId,
    pub stream_id: u64,
}

struct PairState {
    inbound: PairKey,
    outbound: PairKey,
    bytes_forward: AtomicU64,
    bytes_reverse: AtomicU64,
    eof_forward: AtomicBool,
    eof_reverse: AtomicBool,
    last_activity: Mutex<Instant>,
}

impl PairState {
    fn other(&self, from: PairKey) -> PairKey {
        if from == self.inbound {
            self.outbound
        } else {
            self.inbound
        }
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }
}

pub struct Forwarder {
    pairs: DashMap<PairKey, Arc<PairState>>,
    max_pairs: usize,
    idle_threshold: Duration,
}

impl Forwarder {
    pub fn new(max_pairs: usize, idle_threshold: Duration) -> Self {
        Self {
            pairs: DashMap::new(),
            max_pairs,
            idle_threshold,
        }
    }

    /// Live forwarded streams (pairings, not endpoints).
    pub fn active_pairs(&self) -> usize {
        self.pairs.len() / 2
    }

    pub fn bytes_relayed(&self) -> u64 {
        // Each pair is registered under both keys; count one side.
        self.pairs
            .iter()
            .filter(|e| *e.key() == e.value().inbound)
            .map(|e| {
                e.value().bytes_forward.load(Ordering::Relaxed)
                    + e.value().bytes_reverse.load(Ordering::Relaxed)
            })
            .sum()
    }

    /// STREAM_OPEN for another agent: decrement the hop budget, pick the next
    /// hop, allocate an outbound stream id, remember the pairing.
    pub async fn forward_open(
        &self,
        sup: &Arc<Supervisor>,
        in_link: &Arc<PeerLink>,
        in_stream_id: u64,
        mut open: StreamOpen,
    ) {
        if self.active_pairs() >= self.max_pairs {
            in_link
                .reject_stream(in_stream_id, ResetReason::LimitExceeded)
                .await;
            return;
        }
        if open.ttl <= 1 {
            debug!(dest = %open.dest.short(), "hop budget exhausted");
            in_link
                .reject_stream(in_stream_id, ResetReason::TtlExceeded)
                .await;
            return;
        }
        open.ttl -= 1;

        let next_hop = match sup.router().next_hop_for_agent(open.dest) {
            // Sending it back where it came from would loop.
            Some(hop) if hop != in_link.remote_id() => hop,
            _ => {
                in_link
                    .reject_stream(in_stream_id, ResetReason::NoRoute)
                    .await;
                return;
            }
        };
        let Some(out_link) = sup.peer(next_hop) else {
            in_link
                .reject_stream(in_stream_id, ResetReason::NoRoute)
                .await;
            return;
        };

        let out_stream_id = out_link.allocate_forward_id();
        let in_key = PairKey {
            peer: in_link.remote_id(),
            stream_id: in_stream_id,
        };
        let out_key = PairKey {
            peer: out_link.remote_id(),
            stream_id: out_stream_id,
        };
        let state = Arc::new(PairState {
            inbound: in_key,
            outbound: out_key,
            bytes_forward: AtomicU64::new(0),
            bytes_reverse: AtomicU64::new(0),
            eof_forward: AtomicBool::new(false),
            eof_reverse: AtomicBool::new(false),
            last_activity: Mutex::new(Instant::now()),
        });
        self.pairs.insert(in_key, state.clone());
        self.pairs.insert(out_key, state);

        trace!(
            dest = %open.dest.short(),
            via = %next_hop.short(),
            in_stream = in_stream_id,
            out_stream = out_stream_id,
            "forwarding stream open"
        );
        if out_link
            .send_frame(open.into_frame(out_stream_id))
            .await
            .is_err()
        {
            self.remove_pair(in_key, out_key);
            in_link
                .reject_stream(in_stream_id, ResetReason::Internal)
                .await;
        }
    }

    /// A stream frame neither side of the mux owns: ours if a pairing exists,
    /// otherwise answered with RESET so the sender stops.
    pub async fn handle_orphan(&self, sup: &Arc<Supervisor>, from_link: &Arc<PeerLink>, frame: Frame) {
        let key = PairKey {
            peer: from_link.remote_id(),
            stream_id: frame.stream_id,
        };
        let Some(state) = self.pairs.get(&key).map(|e| e.value().clone()) else {
            match frame.frame_type {
                FrameType::StreamReset => {}
                _ => {
                    from_link.try_send_frame(reset_frame(frame.stream_id, ResetReason::PeerClosed));
                }
            }
            return;
        };
        state.touch();
        let other = state.other(key);
        let Some(out_link) = sup.peer(other.peer) else {
            self.teardown(sup, &state, ResetReason::PeerClosed);
            return;
        };

        match frame.frame_type {
            FrameType::StreamOpenAck => {
                // Failure ACKs end the pairing after they are relayed.
                let failed = !matches!(
                    StreamOpenAck::decode(&frame.payload, frame.flags).map(|a| a.status),
                    Ok(OpenStatus::Ok)
                );
                self.relay(sup, &state, &out_link, frame, other).await;
                if failed {
                    self.remove_pair(state.inbound, state.outbound);
                }
            }
            FrameType::StreamData => {
                let len = frame.payload.len() as u64;
                if key == state.inbound {
                    state.bytes_forward.fetch_add(len, Ordering::Relaxed);
                } else {
                    state.bytes_reverse.fetch_add(len, Ordering::Relaxed);
                }
                self.relay(sup, &state, &out_link, frame, other).await;
            }
            FrameType::StreamEof => {
                if key == state.inbound {
                    state.eof_forward.store(true, Ordering::Relaxed);
                } else {
                    state.eof_reverse.store(true, Ordering::Relaxed);
                }
                self.relay(sup, &state, &out_link, frame, other).await;
                if state.eof_forward.load(Ordering::Relaxed)
                    && state.eof_reverse.load(Ordering::Relaxed)
                {
                    self.remove_pair(state.inbound, state.outbound);
                }
            }
            FrameType::StreamReset => {
                self.relay(sup, &state, &out_link, frame, other).await;
                self.remove_pair(state.inbound, state.outbound);
            }
            FrameType::StreamWindow => {
                self.relay(sup, &state, &out_link, frame, other).await;
            }
            _ => {
                warn!(frame = ?frame.frame_type, "unexpected frame on forwarded stream");
                self.teardown(sup, &state, ResetReason::Internal);
            }
        }
    }

    async fn relay(
        &self,
        sup: &Arc<Supervisor>,
        state: &Arc<PairState>,
        out_link: &Arc<PeerLink>,
        frame: Frame,
        to: PairKey,
    ) {
        let relayed = Frame {
            frame_type: frame.frame_type,
            flags: frame.flags,
            stream_id: to.stream_id,
            payload: frame.payload,
        };
        if out_link.send_frame(relayed).await.is_err() {
            self.teardown(sup, state, ResetReason::PeerClosed);
        }
    }

    fn remove_pair(&self, a: PairKey, b: PairKey) {
        self.pairs.remove(&a);
        self.pairs.remove(&b);
    }

    /// Reset both sides of a pairing and forget it.
    fn teardown(&self, sup: &Arc<Supervisor>, state: &Arc<PairState>, reason: ResetReason) {
        for key in [state.inbound, state.outbound] {
            if let Some(link) = sup.peer(key.peer) {
                link.try_send_frame(reset_frame(key.stream_id, reason));
            }
        }
        self.remove_pair(state.inbound, state.outbound);
    }

    /// A link died: kill every pairing that touched it.
    pub fn on_link_closed(&self, sup: &Arc<Supervisor>, peer: AgentId) {
        let affected: Vec<Arc<PairState>> = self
            .pairs
            .iter()
            .filter(|e| e.key().peer == peer)
            .map(|e| e.value().clone())
            .collect();
        for state in affected {
            let survivor = if state.inbound.peer == peer {
                state.outbound
            } else {
                state.inbound
            };
            if let Some(link) = sup.peer(survivor.peer) {
                link.try_send_frame(reset_frame(survivor.stream_id, ResetReason::PeerClosed));
            }
            self.remove_pair(state.inbound, state.outbound);
        }
    }

    /// Reap pairings idle past the threshold.
    pub fn reap_idle(&self, sup: &Arc<Supervisor>) -> usize {
        let now = Instant::now();
        let stale: Vec<Arc<PairState>> = self
            .pairs
            .iter()
            .filter(|e| *e.key() == e.value().inbound)
            .filter(|e| now.duration_since(*e.value().last_activity.lock()) > self.idle_threshold)
            .map(|e| e.value().clone())
            .collect();
        let count = stale.len();
        for state in stale {
            debug!(
                in_peer = %state.inbound.peer.short(),
                out_peer = %state.outbound.peer.short(),
                "reaping idle forwarded pair"
            );
            self.teardown(sup, &state, ResetReason::Timeout);
        }
        count
    }
}
