//! The supervisor owns everything with a lifetime: peer links, listener and
//! dial loops, the advertisement and sweep timers, and orderly shutdown. All
//! other daemon modules reach shared state through it.

use crate::control::{self, ControlPlane};
use crate::exit::{self, ExitRuntime};
use crate::forwarder::Forwarder;
use crate::socks5;
use async_trait::async_trait;
use dashmap::DashMap;
use metroo_core::config::{Config, PeerConfig};
use metroo_core::node_info::{self, Capabilities, ListenerInfo, NodeInfo, PeerSummary};
use metroo_core::{AgentId, Error, ResetReason, Result, StreamKind};
use metroo_crypto::{Identity, SealedKey};
use metroo_link::handshake::{self, HandshakeConfig};
use metroo_link::payload::{NodeInfoBlob, RouteWithdraw, StreamOpen};
use metroo_link::peer::{LinkConfig, LinkEvent, LinkRole, PeerLink};
use metroo_link::{Connection, MuxConfig, Stream};
use metroo_route::Router;
use metroo_transport::TransportProvider;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Handler for stream kinds with pluggable payload semantics (shell and file
/// transfer). Nothing is registered by default; unhandled kinds are refused.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn handle(&self, stream: Stream, open: StreamOpen);
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub status: &'static str,
    pub agent_id: String,
    pub short_id: String,
    pub display_name: Option<String>,
    pub running: bool,
    pub peer_count: usize,
    pub stream_count: usize,
    pub forwarded_count: usize,
    pub route_count: usize,
    pub socks5_running: bool,
    pub exit_handler_running: bool,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerStatus {
    pub id: String,
    pub short_id: String,
    pub transport: String,
    pub role: &'static str,
    pub state: String,
    pub rtt_ms: Option<u64>,
    pub streams: usize,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

struct CachedNodeInfo {
    updated_at_ms: u64,
    decoded: Option<NodeInfo>,
}

pub struct Supervisor {
    identity: Identity,
    cfg: Config,
    router: Router,
    exit: ExitRuntime,
    control: ControlPlane,
    forwarder: Forwarder,
    peers: DashMap<AgentId, Arc<PeerLink>>,
    node_infos: DashMap<AgentId, CachedNodeInfo>,
    handlers: parking_lot::RwLock<HashMap<StreamKind, Arc<dyn StreamHandler>>>,
    total_streams: Arc<AtomicUsize>,
    provider: Arc<dyn TransportProvider>,
    link_cfg: LinkConfig,
    mgmt: Option<SealedKey>,
    cancel: CancellationToken,
    running: AtomicBool,
    socks5_running: AtomicBool,
    bound_listeners: parking_lot::Mutex<Vec<std::net::SocketAddr>>,
    socks5_bound: parking_lot::Mutex<Option<std::net::SocketAddr>>,
    started: Instant,
    boot_time_ms: u64,
}

impl Supervisor {
    pub fn new(
        cfg: Config,
        identity: Identity,
        provider: Arc<dyn TransportProvider>,
    ) -> Result<Arc<Self>> {
        let mgmt = match &cfg.management.public_key {
            Some(public) => Some(
                SealedKey::from_hex(public, cfg.management.private_key.as_deref())
                    .map_err(metroo_core::Error::from)?,
            ),
            None => None,
        };
        let exit = ExitRuntime::from_config(&cfg)?;
        let mut router = Router::new(
            identity.agent_id(),
            cfg.routing.max_hops,
            cfg.routing.route_ttl,
        );
        if exit.enabled {
            router.set_local_exit(exit.routes().to_vec(), exit.domains().to_vec());
        }
        let link_cfg = LinkConfig {
            mux: MuxConfig {
                initial_window: cfg.limits.buffer_size,
                max_streams: cfg.limits.max_streams_per_peer,
                open_timeout: cfg.connections.timeout,
                max_hops: cfg.routing.max_hops,
            },
            max_streams_total: cfg.limits.max_streams_total,
            ..LinkConfig::default()
        };
        let control = ControlPlane::new(cfg.connections.timeout, mgmt.clone());
        let forwarder = Forwarder::new(cfg.limits.max_streams_total, cfg.connections.idle_threshold);
        Ok(Arc::new(Self {
            identity,
            router,
            exit,
            control,
            forwarder,
            peers: DashMap::new(),
            node_infos: DashMap::new(),
            handlers: parking_lot::RwLock::new(HashMap::new()),
            total_streams: Arc::new(AtomicUsize::new(0)),
            provider,
            link_cfg,
            mgmt,
            cancel: CancellationToken::new(),
            running: AtomicBool::new(false),
            socks5_running: AtomicBool::new(false),
            bound_listeners: parking_lot::Mutex::new(Vec::new()),
            socks5_bound: parking_lot::Mutex::new(None),
            started: Instant::now(),
            boot_time_ms: node_info::unix_millis(),
            cfg,
        }))
    }

    // ------------------------------------------------------------ accessors

    pub fn agent_id(&self) -> AgentId {
        self.identity.agent_id()
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn exit(&self) -> &ExitRuntime {
        &self.exit
    }

    pub fn control(&self) -> &ControlPlane {
        &self.control
    }

    pub fn forwarder(&self) -> &Forwarder {
        &self.forwarder
    }

    pub fn peer(&self, id: AgentId) -> Option<Arc<PeerLink>> {
        self.peers.get(&id).map(|e| e.value().clone())
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn set_socks5_running(&self, on: bool) {
        self.socks5_running.store(on, Ordering::Relaxed);
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub fn register_handler(&self, kind: StreamKind, handler: Arc<dyn StreamHandler>) {
        self.handlers.write().insert(kind, handler);
    }

    /// Whether remote topology may be revealed over the control plane: true
    /// unless a management key is configured whose private half we lack.
    pub fn topology_visible(&self) -> bool {
        self.control.can_open()
    }

    /// Addresses the transport listeners actually bound (resolves port 0).
    pub fn bound_listeners(&self) -> Vec<std::net::SocketAddr> {
        self.bound_listeners.lock().clone()
    }

    pub fn set_socks5_bound(&self, addr: std::net::SocketAddr) {
        *self.socks5_bound.lock() = Some(addr);
    }

    pub fn socks5_bound(&self) -> Option<std::net::SocketAddr> {
        *self.socks5_bound.lock()
    }

    // ------------------------------------------------------------ lifecycle

    /// Bind listeners, start dial loops, timers, and the SOCKS5 front-end.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        for listener_cfg in self.cfg.listeners.clone() {
            let mut listener = self.provider.listen(&listener_cfg).await?;
            let bound = listener.local_addr();
            if let Some(addr) = bound {
                self.bound_listeners.lock().push(addr);
            }
            info!(
                transport = %listener_cfg.transport,
                address = ?bound,
                "listener up"
            );
            let sup = self.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = sup.cancel.cancelled() => break,
                        accepted = listener.accept() => match accepted {
                            Ok(conn) => {
                                let sup = sup.clone();
                                let kind = listener.kind();
                                tokio::spawn(async move {
                                    if let Err(e) = sup.establish(conn, None, LinkRole::Listener, kind).await {
                                        debug!(error = %e, "inbound link failed");
                                    }
                                });
                            }
                            Err(e) => {
                                warn!(error = %e, "accept failed");
                                tokio::time::sleep(Duration::from_millis(100)).await;
                            }
                        }
                    }
                }
            });
        }

        for peer_cfg in self.cfg.peers.clone() {
            let sup = self.clone();
            tokio::spawn(async move { sup.dial_loop(peer_cfg).await });
        }

        {
            let sup = self.clone();
            tokio::spawn(async move { sup.advertise_loop().await });
        }
        {
            let sup = self.clone();
            tokio::spawn(async move { sup.sweep_loop().await });
        }

        if self.cfg.socks5.enabled {
            let sup = self.clone();
            tokio::spawn(async move {
                if let Err(e) = socks5::run(sup).await {
                    warn!(error = %e, "SOCKS5 server exited");
                }
            });
        }

        self.running.store(true, Ordering::Relaxed);
        info!(agent = %self.agent_id().short(), "agent running");
        Ok(())
    }

    /// Orderly shutdown: stop accepting and dialing, close every link (which
    /// resets their streams and drains their queues), then let tasks finish.
    pub async fn shutdown(&self) {
        info!("shutting down");
        self.running.store(false, Ordering::Relaxed);
        self.cancel.cancel();
        for entry in self.peers.iter() {
            entry.value().close();
        }
        // Give writers a moment to drain RESETs before the process exits.
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.peers.clear();
    }

    // ------------------------------------------------------------ dialing

    async fn dial_loop(self: &Arc<Self>, peer_cfg: PeerConfig) {
        let reconnect = self.cfg.connections.reconnect.clone();
        let mut delay = reconnect.initial_delay;
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            match self.dial_once(&peer_cfg).await {
                Ok(link) => {
                    delay = reconnect.initial_delay;
                    link.closed().await;
                    if self.cancel.is_cancelled() {
                        return;
                    }
                    debug!(peer = %peer_cfg.address, "link lost, reconnecting");
                }
                Err(e) => {
                    debug!(peer = %peer_cfg.address, error = %e, "dial failed");
                }
            }
            // Exponential backoff, 1 s doubling to the cap, with ±25% jitter.
            let jitter = 0.75 + fastrand::f64() * 0.5;
            let sleep_for = delay.mul_f64(jitter);
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(sleep_for) => {}
            }
            delay = (delay * 2).min(reconnect.max_delay);
        }
    }

    async fn dial_once(self: &Arc<Self>, peer_cfg: &PeerConfig) -> Result<Arc<PeerLink>> {
        let dialer = self.provider.dialer(peer_cfg.transport);
        let conn = dialer.dial(peer_cfg).await?;
        self.establish(conn, peer_cfg.id, LinkRole::Dialer, peer_cfg.transport)
            .await
    }

    /// Handshake a fresh connection and register the resulting link.
    async fn establish(
        self: &Arc<Self>,
        mut conn: Connection,
        expected_peer: Option<AgentId>,
        role: LinkRole,
        transport: metroo_core::TransportKind,
    ) -> Result<Arc<PeerLink>> {
        let hs_cfg = HandshakeConfig {
            deadline: self.cfg.connections.timeout,
            expected_peer,
            display_name: self.cfg.agent.display_name.clone().unwrap_or_default(),
            ..HandshakeConfig::default()
        };
        let info = handshake::handshake(&mut conn, &self.identity, &hs_cfg).await?;
        let remote = info.agent_id;
        let (link, events) = PeerLink::spawn(
            conn,
            self.agent_id(),
            info,
            role,
            transport,
            self.link_cfg.clone(),
            self.total_streams.clone(),
        );

        // At most one link per (local, remote) pair: on a duplicate the lower
        // (initiator, responder) tuple survives. The entry API keeps the
        // check-and-swap atomic against a simultaneous dial from the peer.
        match self.peers.entry(remote) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let existing = occupied.get().clone();
                if existing.is_closed() || link.dedup_key() < existing.dedup_key() {
                    info!(peer = %remote.short(), "duplicate link, replacing the higher tuple");
                    existing.close();
                    occupied.insert(link.clone());
                } else {
                    info!(peer = %remote.short(), "duplicate link, keeping the established one");
                    drop(occupied);
                    link.close();
                    // Drain its events so its tasks wind down.
                    tokio::spawn(async move {
                        let mut events = events;
                        while events.recv().await.is_some() {}
                    });
                    // Hand the survivor back so a dial loop parks on it
                    // instead of redialing an already-linked peer.
                    return Ok(existing);
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(link.clone());
            }
        }
        info!(peer = %remote.short(), role = ?role, %transport, "peer link established");

        {
            let sup = self.clone();
            let link = link.clone();
            tokio::spawn(async move { sup.link_driver(link, events).await });
        }

        // Tell the newcomer what we know right away rather than waiting for
        // the next timer tick.
        let _ = link.send_frame(self.router.snapshot_adv().into_frame()).await;
        let _ = link.send_frame(self.node_info_blob().into_frame()).await;
        Ok(link)
    }

    // ------------------------------------------------------------ events

    async fn link_driver(self: Arc<Self>, link: Arc<PeerLink>, mut events: mpsc::Receiver<LinkEvent>) {
        let remote = link.remote_id();
        while let Some(event) = events.recv().await {
            match event {
                LinkEvent::Open { stream_id, open } => {
                    let sup = self.clone();
                    let link = link.clone();
                    // Opens dispatch on their own tasks; dial time must not
                    // stall this link's frame processing.
                    tokio::spawn(async move {
                        sup.handle_open(&link, stream_id, open).await;
                    });
                }
                LinkEvent::RouteAdv { adv, .. } => {
                    let outcome = self.router.apply_adv(remote, &adv);
                    if outcome.installed > 0 {
                        debug!(
                            peer = %remote.short(),
                            installed = outcome.installed,
                            loops = outcome.rejected_loops,
                            "advertisement applied"
                        );
                    }
                }
                LinkEvent::RouteWithdraw(withdraw) => {
                    self.router.apply_withdraw(remote, &withdraw.keys);
                }
                LinkEvent::NodeInfo(blob) => self.handle_node_info(&link, blob).await,
                LinkEvent::ControlReq(req) => control::on_request(&self, &link, req).await,
                LinkEvent::ControlRsp(rsp) => control::on_response(&self, rsp).await,
                LinkEvent::Orphan(frame) => {
                    self.forwarder.handle_orphan(&self, &link, frame).await;
                }
                LinkEvent::Closed => break,
            }
        }
        self.cleanup_link(&link).await;
    }

    async fn cleanup_link(self: &Arc<Self>, link: &Arc<PeerLink>) {
        let remote = link.remote_id();
        let removed = self
            .peers
            .remove_if(&remote, |_, v| Arc::ptr_eq(v, link))
            .is_some();
        if !removed {
            // A replacement link already took the slot; nothing to withdraw.
            return;
        }
        info!(peer = %remote.short(), "peer link closed");
        self.forwarder.on_link_closed(self, remote);
        let withdrawn = self.router.peer_down(remote);
        if !withdrawn.is_empty() {
            let frame = RouteWithdraw { keys: withdrawn }.into_frame();
            for entry in self.peers.iter() {
                let _ = entry.value().send_frame(frame.clone()).await;
            }
        }
    }

    /// Incoming STREAM_OPEN: forward it, or terminate it here.
    async fn handle_open(self: &Arc<Self>, link: &Arc<PeerLink>, stream_id: u64, open: StreamOpen) {
        if open.dest != self.agent_id() {
            self.forwarder
                .forward_open(self, link, stream_id, open)
                .await;
            return;
        }
        if open.ttl == 0 {
            link.reject_stream(stream_id, ResetReason::TtlExceeded).await;
            return;
        }
        match open.kind {
            StreamKind::Tcp => exit::handle_tcp(self, link, stream_id, open).await,
            StreamKind::Udp => exit::handle_udp(self, link, stream_id, open).await,
            StreamKind::Icmp => exit::handle_icmp(self, link, stream_id, open).await,
            StreamKind::Control => {
                // The control plane rides CONTROL_REQ frames, not streams.
                link.reject_stream(stream_id, ResetReason::Forbidden).await;
            }
            kind @ (StreamKind::Shell | StreamKind::FileXfer) => {
                let handler = self.handlers.read().get(&kind).cloned();
                match handler {
                    Some(handler) => match link.accept_stream(stream_id, &open).await {
                        Ok(stream) => handler.handle(stream, open).await,
                        Err(e) => debug!(error = %e, "handler stream accept failed"),
                    },
                    None => {
                        link.reject_stream(stream_id, ResetReason::Forbidden).await;
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------ streams

    /// Open a stream to a (possibly multi-hop distant) agent.
    pub async fn open_mesh_stream(
        &self,
        dest: AgentId,
        kind: StreamKind,
        addr: Option<metroo_core::DestAddr>,
        e2e: bool,
    ) -> Result<Stream> {
        if dest == self.agent_id() {
            return Err(Error::internal("local destinations do not ride the mesh"));
        }
        let next_hop = self
            .router
            .next_hop_for_agent(dest)
            .ok_or_else(|| Error::no_route(dest.short()))?;
        let link = self
            .peer(next_hop)
            .ok_or_else(|| Error::no_route(dest.short()))?;
        link.open_stream(dest, kind, addr, e2e).await
    }

    /// Where a destination address leads, if anywhere.
    pub fn resolve_dest(&self, addr: &metroo_core::DestAddr) -> Option<metroo_route::Resolution> {
        match addr {
            metroo_core::DestAddr::Name { host, .. } => self
                .router
                .resolve_domain(host)
                .or_else(|| self.router.default_route()),
            metroo_core::DestAddr::Ip(sa) => self.router.resolve_ip(sa.ip()),
        }
    }

    // ------------------------------------------------------------ flooding

    async fn advertise_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.cfg.routing.advertise_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = interval.tick() => {}
            }
            self.advertise_now().await;
        }
    }

    /// Flood the current advertisement and node info to every peer. Returns
    /// how many peers were reached.
    pub async fn advertise_now(&self) -> usize {
        let adv = self.router.snapshot_adv().into_frame();
        let blob = self.node_info_blob().into_frame();
        let mut reached = 0;
        for entry in self.peers.iter() {
            let link = entry.value();
            if link.send_frame(adv.clone()).await.is_ok() {
                reached += 1;
            }
            let _ = link.send_frame(blob.clone()).await;
        }
        debug!(peers = reached, "advertisement flooded");
        reached
    }

    async fn sweep_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = interval.tick() => {}
            }
            let swept = self.router.sweep();
            if swept > 0 {
                debug!(swept, "expired routes removed");
            }
            self.forwarder.reap_idle(&self);
        }
    }

    async fn handle_node_info(&self, from: &Arc<PeerLink>, blob: NodeInfoBlob) {
        if blob.agent_id == self.agent_id() {
            return;
        }
        let newer = self
            .node_infos
            .get(&blob.agent_id)
            .map(|cached| blob.updated_at_ms > cached.updated_at_ms)
            .unwrap_or(true);
        if !newer {
            return;
        }
        let decoded = if blob.sealed {
            self.mgmt
                .as_ref()
                .filter(|k| k.can_open())
                .and_then(|k| k.open(&blob.body).ok())
                .and_then(|raw| serde_json::from_slice(&raw).ok())
        } else {
            serde_json::from_slice(&blob.body).ok()
        };
        self.node_infos.insert(
            blob.agent_id,
            CachedNodeInfo {
                updated_at_ms: blob.updated_at_ms,
                decoded,
            },
        );
        // Re-flood to everyone except where it came from; the version check
        // above keeps this from echoing forever.
        let frame = blob.clone().into_frame();
        for entry in self.peers.iter() {
            if *entry.key() == from.remote_id() {
                continue;
            }
            let _ = entry.value().send_frame(frame.clone()).await;
        }
    }

    // ------------------------------------------------------------ snapshots

    pub fn build_node_info(&self) -> NodeInfo {
        let peers = self
            .peers
            .iter()
            .map(|e| PeerSummary {
                id: *e.key(),
                transport: e.value().transport(),
                rtt_ms: e.value().rtt().map(|d| d.as_millis() as u64),
            })
            .collect();
        NodeInfo {
            agent_id: self.agent_id(),
            display_name: self.cfg.agent.display_name.clone(),
            hostname: gethostname::gethostname().to_string_lossy().into_owned(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            boot_time_ms: self.boot_time_ms,
            listeners: self
                .cfg
                .listeners
                .iter()
                .map(|l| ListenerInfo {
                    transport: l.transport,
                    address: l.address.to_string(),
                })
                .collect(),
            capabilities: Capabilities {
                udp: self.cfg.udp.enabled,
                icmp: self.cfg.icmp.enabled,
                socks5: self.cfg.socks5.enabled,
                exit_routes: self.cfg.exit.routes.clone(),
                exit_domains: self.cfg.exit.domains.clone(),
            },
            peers,
            updated_at_ms: node_info::unix_millis(),
        }
    }

    fn node_info_blob(&self) -> NodeInfoBlob {
        let info = self.build_node_info();
        let raw = serde_json::to_vec(&info).unwrap_or_default();
        let (body, sealed) = match &self.mgmt {
            Some(key) => (key.seal(&raw), true),
            None => (raw, false),
        };
        NodeInfoBlob {
            agent_id: self.agent_id(),
            updated_at_ms: info.updated_at_ms,
            body: body.into(),
            sealed,
        }
    }

    pub fn status(&self) -> Status {
        Status {
            status: "ok",
            agent_id: self.agent_id().to_string(),
            short_id: self.agent_id().short(),
            display_name: self.cfg.agent.display_name.clone(),
            running: self.is_running(),
            peer_count: self.peers.len(),
            stream_count: self.total_streams.load(Ordering::Relaxed),
            forwarded_count: self.forwarder.active_pairs(),
            route_count: self.router.route_count(),
            socks5_running: self.socks5_running.load(Ordering::Relaxed),
            exit_handler_running: self.exit.enabled,
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    pub fn peers_snapshot(&self) -> Vec<PeerStatus> {
        let mut out: Vec<PeerStatus> = self
            .peers
            .iter()
            .map(|e| {
                let link = e.value();
                PeerStatus {
                    id: link.remote_id().to_string(),
                    short_id: link.remote_id().short(),
                    transport: link.transport().to_string(),
                    role: match link.role() {
                        LinkRole::Dialer => "dialer",
                        LinkRole::Listener => "listener",
                    },
                    state: format!("{:?}", link.state()),
                    rtt_ms: link.rtt().map(|d| d.as_millis() as u64),
                    streams: link.stream_count(),
                    bytes_in: link.bytes_in(),
                    bytes_out: link.bytes_out(),
                }
            })
            .collect();
        out.sort_by(|a, b| a.short_id.cmp(&b.short_id));
        out
    }

    /// Known agents for the HTTP listing: self, routed agents, and anyone
    /// whose node info we cached.
    pub fn agents_snapshot(&self) -> Vec<serde_json::Value> {
        let mut ids = self.router.known_agents();
        for entry in self.node_infos.iter() {
            if !ids.contains(entry.key()) {
                ids.push(*entry.key());
            }
        }
        ids.sort();
        ids.dedup();
        ids.into_iter()
            .map(|id| {
                let display_name = if id == self.agent_id() {
                    self.cfg.agent.display_name.clone()
                } else {
                    self.node_infos
                        .get(&id)
                        .and_then(|c| c.decoded.as_ref().and_then(|i| i.display_name.clone()))
                };
                serde_json::json!({
                    "id": id.to_string(),
                    "short_id": id.short(),
                    "display_name": display_name,
                    "local": id == self.agent_id(),
                })
            })
            .collect()
    }

    pub fn cached_node_info(&self, id: AgentId) -> Option<NodeInfo> {
        self.node_infos.get(&id).and_then(|c| c.decoded.clone())
    }
}
