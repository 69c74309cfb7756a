//! Exit side of the mesh: terminate streams by dialing the requested TCP
//! target, relaying UDP datagrams, or issuing ICMP echoes, all subject to the
//! configured allow-lists.

use crate::msg::{frame_message, IcmpMsg, MessageReader, ICMP_MSG_ECHO, ICMP_MSG_REPLY};
use crate::relay;
use crate::socks5::{encode_udp_packet, parse_udp_packet};
use crate::supervisor::Supervisor;
use metroo_core::config::Config;
use metroo_core::{Cidr, DestAddr, DomainPattern, Error, ResetReason, Result};
use metroo_link::payload::StreamOpen;
use metroo_link::peer::PeerLink;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tracing::{debug, warn};

mod ping;

pub use ping::ping_once;

const ICMP_TIMEOUT: Duration = Duration::from_secs(5);

/// Parsed allow-lists and switches for this agent's exit role.
pub struct ExitRuntime {
    pub enabled: bool,
    routes: Vec<Cidr>,
    domains: Vec<DomainPattern>,
    pub udp_enabled: bool,
    udp_allowed: Vec<Cidr>,
    pub icmp_enabled: bool,
    icmp_allowed: Vec<Cidr>,
    dial_timeout: Duration,
    udp_idle: Duration,
}

fn parse_cidrs(raw: &[String], what: &str) -> Result<Vec<Cidr>> {
    raw.iter()
        .map(|s| {
            s.parse()
                .map_err(|_| Error::config(format!("{what}: bad CIDR {s:?}")))
        })
        .collect()
}

impl ExitRuntime {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let domains = cfg
            .exit
            .domains
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<DomainPattern>>>()?;
        Ok(Self {
            enabled: cfg.exit.enabled,
            routes: parse_cidrs(&cfg.exit.routes, "exit.routes")?,
            domains,
            udp_enabled: cfg.udp.enabled,
            udp_allowed: parse_cidrs(&cfg.udp.allowed_cidrs, "udp.allowed_cidrs")?,
            icmp_enabled: cfg.icmp.enabled,
            icmp_allowed: parse_cidrs(&cfg.icmp.allowed_cidrs, "icmp.allowed_cidrs")?,
            dial_timeout: cfg.connections.timeout,
            udp_idle: cfg.connections.idle_threshold,
        })
    }

    pub fn routes(&self) -> &[Cidr] {
        &self.routes
    }

    pub fn domains(&self) -> &[DomainPattern] {
        &self.domains
    }

    fn ip_allowed(&self, ip: IpAddr) -> bool {
        self.routes.iter().any(|c| c.contains(ip))
    }

    fn name_allowed(&self, host: &str) -> bool {
        self.domains.iter().any(|p| p.matches(host))
    }

    /// An empty allow-list permits nothing; `0.0.0.0/0` permits everything.
    fn datagram_allowed(allowed: &[Cidr], ip: IpAddr) -> bool {
        allowed.iter().any(|c| c.contains(ip))
    }

    /// Dial a TCP target on behalf of the mesh, enforcing the allow-list.
    pub async fn dial_tcp(&self, addr: &DestAddr) -> Result<TcpStream> {
        if !self.enabled {
            return Err(Error::Reset(ResetReason::Forbidden));
        }
        let candidates: Vec<SocketAddr> = match addr {
            DestAddr::Ip(sa) => {
                if !self.ip_allowed(sa.ip()) {
                    return Err(Error::Reset(ResetReason::Forbidden));
                }
                vec![*sa]
            }
            DestAddr::Name { host, port } => {
                let resolved: Vec<SocketAddr> = lookup_host((host.as_str(), *port))
                    .await
                    .map_err(|e| Error::exit_dial(&e))?
                    .collect();
                if resolved.is_empty() {
                    return Err(Error::ExitDial {
                        kind: metroo_core::DialFailure::HostUnreachable,
                        detail: format!("{host}: no addresses"),
                    });
                }
                if self.name_allowed(host) {
                    resolved
                } else {
                    // Fall back to the CIDR allow-list against the resolved
                    // addresses.
                    let permitted: Vec<SocketAddr> = resolved
                        .into_iter()
                        .filter(|sa| self.ip_allowed(sa.ip()))
                        .collect();
                    if permitted.is_empty() {
                        return Err(Error::Reset(ResetReason::Forbidden));
                    }
                    permitted
                }
            }
        };
        let mut last = None;
        for candidate in candidates {
            match tokio::time::timeout(self.dial_timeout, TcpStream::connect(candidate)).await {
                Ok(Ok(socket)) => {
                    socket.set_nodelay(true).ok();
                    return Ok(socket);
                }
                Ok(Err(e)) => last = Some(Error::exit_dial(&e)),
                Err(_) => {
                    last = Some(Error::ExitDial {
                        kind: metroo_core::DialFailure::Timeout,
                        detail: format!("connect to {candidate} timed out"),
                    })
                }
            }
        }
        Err(last.unwrap_or_else(|| Error::internal("no dial candidates")))
    }

    pub fn udp_target_allowed(&self, ip: IpAddr) -> bool {
        self.udp_enabled && Self::datagram_allowed(&self.udp_allowed, ip)
    }

    pub fn icmp_target_allowed(&self, ip: IpAddr) -> bool {
        self.icmp_enabled && Self::datagram_allowed(&self.icmp_allowed, ip)
    }
}

/// Terminate a kind=TCP stream: dial first so the OPEN_ACK carries the real
/// outcome, then relay with half-close semantics.
pub async fn handle_tcp(
    sup: &Arc<Supervisor>,
    link: &Arc<PeerLink>,
    stream_id: u64,
    open: StreamOpen,
) {
    let exit = sup.exit();
    let Some(addr) = open.addr.clone() else {
        link.reject_stream(stream_id, ResetReason::Internal).await;
        return;
    };
    match exit.dial_tcp(&addr).await {
        Ok(socket) => {
            debug!(target = %addr, origin = %open.origin.short(), "exit dial succeeded");
            match link.accept_stream(stream_id, &open).await {
                Ok(stream) => relay::tcp_stream(socket, stream).await,
                Err(e) => debug!(error = %e, "stream vanished before exit accept"),
            }
        }
        Err(e) => {
            debug!(target = %addr, error = %e, "exit dial failed");
            link.reject_stream(stream_id, e.reset_reason()).await;
        }
    }
}

/// Terminate a kind=UDP stream: a bound relay socket, one length-prefixed
/// SOCKS5 UDP packet per message, idle timeout on the association.
pub async fn handle_udp(
    sup: &Arc<Supervisor>,
    link: &Arc<PeerLink>,
    stream_id: u64,
    open: StreamOpen,
) {
    let exit = sup.exit();
    if !exit.udp_enabled {
        link.reject_stream(stream_id, ResetReason::Forbidden).await;
        return;
    }
    let socket = match UdpSocket::bind(("0.0.0.0", 0)).await {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "udp relay bind failed");
            link.reject_stream(stream_id, ResetReason::Internal).await;
            return;
        }
    };
    let stream = match link.accept_stream(stream_id, &open).await {
        Ok(s) => s,
        Err(_) => return,
    };
    let (read_half, mut write_half) = stream.into_split();
    let mut messages = MessageReader::new(read_half);
    let mut buf = vec![0u8; 65535];
    let idle = exit.udp_idle;
    let deadline = tokio::time::sleep(idle);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            inbound = messages.next() => match inbound {
                Ok(Some(raw)) => {
                    deadline.as_mut().reset(tokio::time::Instant::now() + idle);
                    match parse_udp_packet(&raw) {
                        Ok((dest, payload)) => {
                            if let Err(e) = send_datagram(&exit, &socket, &dest, payload).await {
                                debug!(error = %e, "udp datagram dropped");
                            }
                        }
                        Err(e) => debug!(error = %e, "malformed udp packet from ingress"),
                    }
                }
                Ok(None) => break,
                Err(_) => break,
            },
            reply = socket.recv_from(&mut buf) => match reply {
                Ok((n, from)) => {
                    deadline.as_mut().reset(tokio::time::Instant::now() + idle);
                    let packet = encode_udp_packet(&from, &buf[..n]);
                    let Ok(framed) = frame_message(&packet) else { continue };
                    if write_half.write(&framed).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "udp relay socket failed");
                    break;
                }
            },
            _ = &mut deadline => {
                debug!("udp association idle timeout");
                write_half.reset(ResetReason::Timeout).await;
                return;
            }
        }
    }
    let _ = write_half.write_eof().await;
}

async fn send_datagram(
    exit: &ExitRuntime,
    socket: &UdpSocket,
    dest: &DestAddr,
    payload: &[u8],
) -> Result<()> {
    let target: SocketAddr = match dest {
        DestAddr::Ip(sa) => *sa,
        DestAddr::Name { host, port } => lookup_host((host.as_str(), *port))
            .await
            .map_err(|e| Error::exit_dial(&e))?
            .next()
            .ok_or_else(|| Error::no_route(host.clone()))?,
    };
    if !exit.udp_target_allowed(target.ip()) {
        return Err(Error::Reset(ResetReason::Forbidden));
    }
    socket
        .send_to(payload, target)
        .await
        .map_err(|e| Error::exit_dial(&e))?;
    Ok(())
}

/// Terminate a kind=ICMP stream: each echo message becomes a real ICMP echo,
/// replies matched by identifier/sequence travel back as reply messages.
pub async fn handle_icmp(
    sup: &Arc<Supervisor>,
    link: &Arc<PeerLink>,
    stream_id: u64,
    open: StreamOpen,
) {
    let exit = sup.exit();
    if !exit.icmp_enabled {
        link.reject_stream(stream_id, ResetReason::Forbidden).await;
        return;
    }
    let target = match resolve_icmp_target(&open).await {
        Ok(ip) => ip,
        Err(e) => {
            link.reject_stream(stream_id, e.reset_reason()).await;
            return;
        }
    };
    if !exit.icmp_target_allowed(target) {
        link.reject_stream(stream_id, ResetReason::Forbidden).await;
        return;
    }
    let stream = match link.accept_stream(stream_id, &open).await {
        Ok(s) => s,
        Err(_) => return,
    };
    let (read_half, mut write_half) = stream.into_split();
    let mut messages = MessageReader::new(read_half);
    while let Ok(Some(raw)) = messages.next().await {
        let Ok(echo) = IcmpMsg::decode(&raw) else { continue };
        if echo.msg_type != ICMP_MSG_ECHO {
            continue;
        }
        let (ident, seq) = (echo.ident, echo.seq);
        let payload = echo.payload.clone();
        let reply = tokio::task::spawn_blocking(move || {
            ping_once(target, ident, seq, &payload, ICMP_TIMEOUT)
        })
        .await;
        let out = match reply {
            Ok(Ok(data)) => IcmpMsg {
                msg_type: ICMP_MSG_REPLY,
                ident,
                seq,
                payload: data.into(),
            },
            Ok(Err(e)) => IcmpMsg::error(ident, seq, &e.to_string()),
            Err(_) => IcmpMsg::error(ident, seq, "ping task failed"),
        };
        let Ok(framed) = frame_message(&out.encode()) else { continue };
        if write_half.write(&framed).await.is_err() {
            break;
        }
    }
    let _ = write_half.write_eof().await;
}

async fn resolve_icmp_target(open: &StreamOpen) -> Result<IpAddr> {
    match &open.addr {
        Some(DestAddr::Ip(sa)) => Ok(sa.ip()),
        Some(DestAddr::Name { host, .. }) => lookup_host((host.as_str(), 0))
            .await
            .map_err(|e| Error::exit_dial(&e))?
            .next()
            .map(|sa| sa.ip())
            .ok_or_else(|| Error::no_route(host.clone())),
        None => Err(Error::protocol("icmp stream without target")),
    }
}
