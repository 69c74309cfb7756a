//! SOCKS5 front-end (RFC 1928/1929) with one extension: command 0x04 runs an
//! ICMP echo pump. Destinations resolve to an exit agent through the RIB;
//! traffic then rides an end-to-end encrypted mesh stream.

use crate::exit;
use crate::msg::{frame_message, IcmpMsg, ICMP_MSG_ECHO, ICMP_MSG_REPLY};
use crate::relay;
use crate::supervisor::Supervisor;
use bytes::{BufMut, BytesMut};
use metroo_core::{DestAddr, DialFailure, Error, ResetReason, Result};
use metroo_core::StreamKind;
use metroo_crypto::password;
use metroo_route::Resolution;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, info, warn};

const SOCKS_VERSION: u8 = 5;
const AUTH_VERSION: u8 = 1;

const METHOD_NONE: u8 = 0x00;
const METHOD_USERPASS: u8 = 0x02;
const METHOD_UNACCEPTABLE: u8 = 0xff;

const CMD_CONNECT: u8 = 0x01;
const CMD_UDP_ASSOCIATE: u8 = 0x03;
/// Custom command: the connection becomes an ICMP echo message pump.
const CMD_ICMP_ECHO: u8 = 0x04;

const ATYP_V4: u8 = 0x01;
const ATYP_NAME: u8 = 0x03;
const ATYP_V6: u8 = 0x04;

const REP_SUCCESS: u8 = 0x00;
const REP_GENERAL_FAILURE: u8 = 0x01;
const REP_NOT_ALLOWED: u8 = 0x02;
const REP_HOST_UNREACHABLE: u8 = 0x04;
const REP_CONNECTION_REFUSED: u8 = 0x05;
const REP_TTL_EXPIRED: u8 = 0x06;
const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
const REP_ADDR_NOT_SUPPORTED: u8 = 0x08;

/// Accept loop. Runs until the supervisor shuts down.
pub async fn run(sup: Arc<Supervisor>) -> Result<()> {
    let cfg = sup.config().socks5.clone();
    let listener = TcpListener::bind(cfg.address).await?;
    let bound = listener.local_addr()?;
    info!(address = %bound, "SOCKS5 listening");
    sup.set_socks5_bound(bound);
    sup.set_socks5_running(true);
    loop {
        tokio::select! {
            _ = sup.cancelled() => break,
            accepted = listener.accept() => {
                let (socket, from) = accepted?;
                let sup = sup.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(sup, socket).await {
                        debug!(client = %from, error = %e, "SOCKS5 session ended with error");
                    }
                });
            }
        }
    }
    sup.set_socks5_running(false);
    Ok(())
}

async fn handle_client(sup: Arc<Supervisor>, mut socket: TcpStream) -> Result<()> {
    socket.set_nodelay(true).ok();
    authenticate(&sup, &mut socket).await?;

    let mut head = [0u8; 4];
    socket.read_exact(&mut head).await?;
    if head[0] != SOCKS_VERSION {
        return Err(Error::protocol("bad SOCKS request version"));
    }
    let cmd = head[1];
    let addr = match read_addr(&mut socket, head[3]).await {
        Ok(addr) => addr,
        Err(e) => {
            reply(&mut socket, REP_ADDR_NOT_SUPPORTED, None).await?;
            return Err(e);
        }
    };

    match cmd {
        CMD_CONNECT => connect(sup, socket, addr).await,
        CMD_UDP_ASSOCIATE => udp_associate(sup, socket).await,
        CMD_ICMP_ECHO => icmp_pump(sup, socket, addr).await,
        other => {
            reply(&mut socket, REP_COMMAND_NOT_SUPPORTED, None).await?;
            Err(Error::protocol(format!("unsupported SOCKS command {other}")))
        }
    }
}

async fn authenticate(sup: &Arc<Supervisor>, socket: &mut TcpStream) -> Result<()> {
    let auth = &sup.config().socks5.auth;
    let mut head = [0u8; 2];
    socket.read_exact(&mut head).await?;
    if head[0] != SOCKS_VERSION {
        return Err(Error::protocol("bad SOCKS greeting version"));
    }
    let mut methods = vec![0u8; head[1] as usize];
    socket.read_exact(&mut methods).await?;

    let userpass_offered = methods.contains(&METHOD_USERPASS);
    let none_offered = methods.contains(&METHOD_NONE);
    let chosen = if auth.required {
        if userpass_offered {
            METHOD_USERPASS
        } else {
            METHOD_UNACCEPTABLE
        }
    } else if none_offered {
        METHOD_NONE
    } else if userpass_offered && !auth.users.is_empty() {
        METHOD_USERPASS
    } else {
        METHOD_UNACCEPTABLE
    };
    socket.write_all(&[SOCKS_VERSION, chosen]).await?;
    if chosen == METHOD_UNACCEPTABLE {
        return Err(Error::AuthFailed);
    }
    if chosen == METHOD_NONE {
        return Ok(());
    }

    // RFC 1929 subnegotiation.
    let mut head = [0u8; 2];
    socket.read_exact(&mut head).await?;
    if head[0] != AUTH_VERSION {
        return Err(Error::protocol("bad auth subnegotiation version"));
    }
    let mut username = vec![0u8; head[1] as usize];
    socket.read_exact(&mut username).await?;
    let mut len = [0u8; 1];
    socket.read_exact(&mut len).await?;
    let mut passwd = vec![0u8; len[0] as usize];
    socket.read_exact(&mut passwd).await?;

    let username = String::from_utf8(username).map_err(|_| Error::AuthFailed)?;
    let passwd = String::from_utf8(passwd).map_err(|_| Error::AuthFailed)?;
    if password::verify(&auth.users, &username, &passwd) {
        socket.write_all(&[AUTH_VERSION, 0x00]).await?;
        Ok(())
    } else {
        warn!(user = %username, "SOCKS5 authentication failed");
        socket.write_all(&[AUTH_VERSION, 0x01]).await?;
        Err(Error::AuthFailed)
    }
}

async fn read_addr(socket: &mut TcpStream, atyp: u8) -> Result<DestAddr> {
    match atyp {
        ATYP_V4 => {
            let mut raw = [0u8; 6];
            socket.read_exact(&mut raw).await?;
            let ip = Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]);
            let port = u16::from_be_bytes([raw[4], raw[5]]);
            Ok(DestAddr::Ip(SocketAddr::new(IpAddr::V4(ip), port)))
        }
        ATYP_V6 => {
            let mut raw = [0u8; 18];
            socket.read_exact(&mut raw).await?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&raw[..16]);
            let port = u16::from_be_bytes([raw[16], raw[17]]);
            Ok(DestAddr::Ip(SocketAddr::new(
                IpAddr::V6(Ipv6Addr::from(octets)),
                port,
            )))
        }
        ATYP_NAME => {
            let mut len = [0u8; 1];
            socket.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            socket.read_exact(&mut name).await?;
            let mut port = [0u8; 2];
            socket.read_exact(&mut port).await?;
            let host = String::from_utf8(name)
                .map_err(|_| Error::protocol("domain name is not UTF-8"))?;
            Ok(DestAddr::name(host, u16::from_be_bytes(port)))
        }
        other => Err(Error::protocol(format!("unsupported address type {other}"))),
    }
}

async fn reply(socket: &mut TcpStream, code: u8, bound: Option<SocketAddr>) -> Result<()> {
    let mut out = BytesMut::with_capacity(22);
    out.put_u8(SOCKS_VERSION);
    out.put_u8(code);
    out.put_u8(0);
    match bound {
        Some(SocketAddr::V4(sa)) => {
            out.put_u8(ATYP_V4);
            out.put_slice(&sa.ip().octets());
            out.put_u16(sa.port());
        }
        Some(SocketAddr::V6(sa)) => {
            out.put_u8(ATYP_V6);
            out.put_slice(&sa.ip().octets());
            out.put_u16(sa.port());
        }
        None => {
            out.put_u8(ATYP_V4);
            out.put_slice(&[0, 0, 0, 0]);
            out.put_u16(0);
        }
    }
    socket.write_all(&out).await?;
    Ok(())
}

/// Map internal errors to SOCKS5 reply codes.
fn reply_code(e: &Error) -> u8 {
    match e {
        Error::NoRoute(_) => REP_HOST_UNREACHABLE,
        Error::ExitDial { kind, .. } => match kind {
            DialFailure::HostUnreachable => REP_HOST_UNREACHABLE,
            DialFailure::Refused => REP_CONNECTION_REFUSED,
            DialFailure::Timeout => REP_TTL_EXPIRED,
            DialFailure::Other => REP_GENERAL_FAILURE,
        },
        Error::Timeout(_) | Error::TtlExceeded => REP_TTL_EXPIRED,
        Error::AuthFailed | Error::Reset(ResetReason::Forbidden) => REP_NOT_ALLOWED,
        Error::Reset(ResetReason::HostUnreachable) => REP_HOST_UNREACHABLE,
        Error::Reset(ResetReason::ConnectionRefused) => REP_CONNECTION_REFUSED,
        Error::Reset(ResetReason::Timeout) => REP_TTL_EXPIRED,
        _ => REP_GENERAL_FAILURE,
    }
}

async fn connect(sup: Arc<Supervisor>, mut socket: TcpStream, addr: DestAddr) -> Result<()> {
    match sup.resolve_dest(&addr) {
        None => {
            reply(&mut socket, REP_HOST_UNREACHABLE, None).await?;
            Err(Error::no_route(&addr))
        }
        Some(Resolution::LocalExit) => {
            // Ingress and exit are the same agent; dial directly.
            match sup.exit().dial_tcp(&addr).await {
                Ok(mut target) => {
                    reply(&mut socket, REP_SUCCESS, None).await?;
                    let _ = tokio::io::copy_bidirectional(&mut socket, &mut target).await;
                    Ok(())
                }
                Err(e) => {
                    reply(&mut socket, reply_code(&e), None).await?;
                    Err(e)
                }
            }
        }
        Some(Resolution::Remote { origin, .. }) => {
            match sup
                .open_mesh_stream(origin, StreamKind::Tcp, Some(addr.clone()), true)
                .await
            {
                Ok(stream) => {
                    debug!(target = %addr, exit = %origin.short(), "CONNECT established");
                    reply(&mut socket, REP_SUCCESS, None).await?;
                    relay::tcp_stream(socket, stream).await;
                    Ok(())
                }
                Err(e) => {
                    reply(&mut socket, reply_code(&e), None).await?;
                    Err(e)
                }
            }
        }
    }
}

// ------------------------------------------------------------------- UDP

/// Parse a SOCKS5 UDP request packet: RSV(2) FRAG(1) ATYP ADDR PORT DATA.
pub fn parse_udp_packet(raw: &[u8]) -> Result<(DestAddr, &[u8])> {
    if raw.len() < 4 {
        return Err(Error::protocol("udp packet too short"));
    }
    if raw[2] != 0 {
        return Err(Error::protocol("udp fragmentation not supported"));
    }
    let atyp = raw[3];
    let rest = &raw[4..];
    match atyp {
        ATYP_V4 => {
            if rest.len() < 6 {
                return Err(Error::protocol("udp packet truncated"));
            }
            let ip = Ipv4Addr::new(rest[0], rest[1], rest[2], rest[3]);
            let port = u16::from_be_bytes([rest[4], rest[5]]);
            Ok((
                DestAddr::Ip(SocketAddr::new(IpAddr::V4(ip), port)),
                &rest[6..],
            ))
        }
        ATYP_V6 => {
            if rest.len() < 18 {
                return Err(Error::protocol("udp packet truncated"));
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&rest[..16]);
            let port = u16::from_be_bytes([rest[16], rest[17]]);
            Ok((
                DestAddr::Ip(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port)),
                &rest[18..],
            ))
        }
        ATYP_NAME => {
            if rest.is_empty() {
                return Err(Error::protocol("udp packet truncated"));
            }
            let len = rest[0] as usize;
            if rest.len() < 1 + len + 2 {
                return Err(Error::protocol("udp packet truncated"));
            }
            let host = std::str::from_utf8(&rest[1..1 + len])
                .map_err(|_| Error::protocol("udp domain not UTF-8"))?;
            let port = u16::from_be_bytes([rest[1 + len], rest[2 + len]]);
            Ok((DestAddr::name(host, port), &rest[3 + len..]))
        }
        other => Err(Error::protocol(format!("udp address type {other}"))),
    }
}

/// Wrap a datagram in the SOCKS5 UDP header, addressed from/to `addr`.
pub fn encode_udp_packet(addr: &SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(22 + payload.len());
    out.extend_from_slice(&[0, 0, 0]);
    match addr {
        SocketAddr::V4(sa) => {
            out.push(ATYP_V4);
            out.extend_from_slice(&sa.ip().octets());
            out.extend_from_slice(&sa.port().to_be_bytes());
        }
        SocketAddr::V6(sa) => {
            out.push(ATYP_V6);
            out.extend_from_slice(&sa.ip().octets());
            out.extend_from_slice(&sa.port().to_be_bytes());
        }
    }
    out.extend_from_slice(payload);
    out
}

async fn udp_associate(sup: Arc<Supervisor>, mut socket: TcpStream) -> Result<()> {
    let bind_ip = sup.config().socks5.address.ip();
    let udp = UdpSocket::bind(SocketAddr::new(bind_ip, 0)).await?;
    let bound = udp.local_addr()?;
    reply(&mut socket, REP_SUCCESS, Some(bound)).await?;
    debug!(relay = %bound, "UDP association open");

    let sup2 = sup.clone();
    let relay_task = tokio::spawn(async move { udp_relay(sup2, udp).await });

    // The association lives exactly as long as the TCP control connection.
    let mut scratch = [0u8; 64];
    loop {
        match socket.read(&mut scratch).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
    relay_task.abort();
    let _ = relay_task.await;
    Ok(())
}

async fn udp_relay(sup: Arc<Supervisor>, udp: UdpSocket) {
    let udp = Arc::new(udp);
    let mut buf = vec![0u8; 65535];
    let mut client: Option<SocketAddr> = None;
    let mut path: Option<UdpPath> = None;

    loop {
        let Ok((n, from)) = udp.recv_from(&mut buf).await else { break };
        let client_addr = *client.get_or_insert(from);
        if from != client_addr {
            continue;
        }
        let raw = &buf[..n];
        let Ok((dest, payload)) = parse_udp_packet(raw) else { continue };
        if path.is_none() {
            path = match open_udp_path(&sup, &dest, udp.clone(), client_addr).await {
                Ok(p) => Some(p),
                Err(e) => {
                    debug!(dest = %dest, error = %e, "udp associate open failed");
                    continue;
                }
            };
        }
        let done = match path.as_mut() {
            Some(UdpPath::Mesh(writer, _)) => match frame_message(raw) {
                Ok(framed) => writer.write(&framed).await.is_err(),
                Err(_) => false,
            },
            Some(UdpPath::Local(outbound, _)) => {
                if let Err(e) = local_udp_send(&sup, outbound, &dest, payload).await {
                    debug!(dest = %dest, error = %e, "local udp send dropped");
                }
                false
            }
            None => false,
        };
        if done {
            break;
        }
    }
    if let Some(UdpPath::Mesh(mut writer, _guard)) = path {
        let _ = writer.write_eof().await;
    }
}

enum UdpPath {
    /// Datagrams ride a mesh stream to a remote exit.
    Mesh(metroo_link::stream::StreamWriteHalf, PumpGuard),
    /// This agent is the exit; datagrams go straight out a local socket.
    Local(Arc<UdpSocket>, PumpGuard),
}

/// Kills the reply pump when the association goes away.
struct PumpGuard(tokio::task::JoinHandle<()>);

impl Drop for PumpGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Resolve the association's exit from the first datagram's destination.
/// Later datagrams ride the same path and carry their own headers.
async fn open_udp_path(
    sup: &Arc<Supervisor>,
    dest: &DestAddr,
    client_sock: Arc<UdpSocket>,
    client_addr: SocketAddr,
) -> Result<UdpPath> {
    match sup.resolve_dest(dest) {
        None => Err(Error::no_route(dest)),
        Some(Resolution::LocalExit) => {
            let outbound = Arc::new(UdpSocket::bind(("0.0.0.0", 0)).await?);
            // Reply pump: responses from anywhere come back wrapped for the
            // client.
            let pump_out = outbound.clone();
            let pump = tokio::spawn(async move {
                let mut buf = vec![0u8; 65535];
                while let Ok((n, from)) = pump_out.recv_from(&mut buf).await {
                    let packet = encode_udp_packet(&from, &buf[..n]);
                    if client_sock.send_to(&packet, client_addr).await.is_err() {
                        break;
                    }
                }
            });
            Ok(UdpPath::Local(outbound, PumpGuard(pump)))
        }
        Some(Resolution::Remote { origin, .. }) => {
            let stream = sup
                .open_mesh_stream(origin, StreamKind::Udp, Some(dest.clone()), true)
                .await?;
            let (rd, wr) = stream.into_split();
            // Reply pump: unwrap stream messages back onto the client socket.
            let pump = tokio::spawn(async move {
                let mut messages = crate::msg::MessageReader::new(rd);
                while let Ok(Some(packet)) = messages.next().await {
                    if client_sock.send_to(&packet, client_addr).await.is_err() {
                        break;
                    }
                }
            });
            Ok(UdpPath::Mesh(wr, PumpGuard(pump)))
        }
    }
}

async fn local_udp_send(
    sup: &Arc<Supervisor>,
    outbound: &UdpSocket,
    dest: &DestAddr,
    payload: &[u8],
) -> Result<()> {
    let target: SocketAddr = match dest {
        DestAddr::Ip(sa) => *sa,
        DestAddr::Name { host, port } => tokio::net::lookup_host((host.as_str(), *port))
            .await
            .map_err(|e| Error::exit_dial(&e))?
            .next()
            .ok_or_else(|| Error::no_route(host.clone()))?,
    };
    if !sup.exit().udp_target_allowed(target.ip()) {
        return Err(Error::Reset(ResetReason::Forbidden));
    }
    outbound
        .send_to(payload, target)
        .await
        .map_err(|e| Error::exit_dial(&e))?;
    Ok(())
}

// ------------------------------------------------------------------- ICMP

async fn icmp_pump(sup: Arc<Supervisor>, mut socket: TcpStream, target: DestAddr) -> Result<()> {
    match sup.resolve_dest(&target) {
        None => {
            reply(&mut socket, REP_HOST_UNREACHABLE, None).await?;
            Err(Error::no_route(&target))
        }
        Some(Resolution::LocalExit) => {
            reply(&mut socket, REP_SUCCESS, None).await?;
            local_icmp_pump(sup, socket, target).await
        }
        Some(Resolution::Remote { origin, .. }) => {
            match sup
                .open_mesh_stream(origin, StreamKind::Icmp, Some(target.clone()), true)
                .await
            {
                Ok(stream) => {
                    reply(&mut socket, REP_SUCCESS, None).await?;
                    // Both sides speak length-prefixed messages, so the pump
                    // is a plain byte relay.
                    relay::tcp_stream(socket, stream).await;
                    Ok(())
                }
                Err(e) => {
                    reply(&mut socket, reply_code(&e), None).await?;
                    Err(e)
                }
            }
        }
    }
}

/// Ingress and exit on the same agent: answer echo messages with local pings.
async fn local_icmp_pump(
    sup: Arc<Supervisor>,
    socket: TcpStream,
    target: DestAddr,
) -> Result<()> {
    let Some(ip) = target.ip() else {
        return Err(Error::protocol("icmp target must be an address"));
    };
    if !sup.exit().icmp_target_allowed(ip) {
        return Err(Error::Reset(ResetReason::Forbidden));
    }
    let (read_half, mut write_half) = socket.into_split();
    let mut messages = TcpMessageReader::new(read_half);
    while let Some(raw) = messages.next().await? {
        let Ok(echo) = IcmpMsg::decode(&raw) else { continue };
        if echo.msg_type != ICMP_MSG_ECHO {
            continue;
        }
        let (ident, seq) = (echo.ident, echo.seq);
        let payload = echo.payload.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            exit::ping_once(ip, ident, seq, &payload, Duration::from_secs(5))
        })
        .await;
        let msg = match outcome {
            Ok(Ok(data)) => IcmpMsg {
                msg_type: ICMP_MSG_REPLY,
                ident,
                seq,
                payload: data.into(),
            },
            Ok(Err(e)) => IcmpMsg::error(ident, seq, &e.to_string()),
            Err(_) => IcmpMsg::error(ident, seq, "ping task failed"),
        };
        let framed = frame_message(&msg.encode())?;
        write_half.write_all(&framed).await?;
    }
    Ok(())
}

/// Length-prefixed message reassembly straight off a TCP read half.
struct TcpMessageReader {
    inner: OwnedReadHalf,
    buf: BytesMut,
}

impl TcpMessageReader {
    fn new(inner: OwnedReadHalf) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
        }
    }

    async fn next(&mut self) -> Result<Option<bytes::Bytes>> {
        use bytes::Buf;
        loop {
            if self.buf.len() >= 2 {
                let len = u16::from_be_bytes([self.buf[0], self.buf[1]]) as usize;
                if self.buf.len() >= 2 + len {
                    self.buf.advance(2);
                    return Ok(Some(self.buf.split_to(len).freeze()));
                }
            }
            let mut chunk = [0u8; 4096];
            match self.inner.read(&mut chunk).await? {
                0 => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    return Err(Error::protocol("connection ended mid-message"));
                }
                n => self.buf.extend_from_slice(&chunk[..n]),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udp_packet_round_trip_v4() {
        let addr: SocketAddr = "10.0.0.9:5353".parse().unwrap();
        let packet = encode_udp_packet(&addr, b"query");
        let (dest, payload) = parse_udp_packet(&packet).unwrap();
        assert_eq!(dest, DestAddr::Ip(addr));
        assert_eq!(payload, b"query");
    }

    #[test]
    fn udp_packet_parses_names() {
        let host = b"dns.internal.example";
        let mut packet = vec![0, 0, 0, ATYP_NAME, host.len() as u8];
        packet.extend_from_slice(host);
        packet.extend_from_slice(&53u16.to_be_bytes());
        packet.extend_from_slice(b"xyz");
        let (dest, payload) = parse_udp_packet(&packet).unwrap();
        assert_eq!(dest.port(), 53);
        assert_eq!(dest.host_name(), Some("dns.internal.example"));
        assert_eq!(payload, b"xyz");
    }

    #[test]
    fn udp_packet_rejects_fragments() {
        let addr: SocketAddr = "10.0.0.9:53".parse().unwrap();
        let mut packet = encode_udp_packet(&addr, b"x");
        packet[2] = 1;
        assert!(parse_udp_packet(&packet).is_err());
    }

    #[test]
    fn udp_packet_rejects_truncation() {
        assert!(parse_udp_packet(&[0, 0]).is_err());
        assert!(parse_udp_packet(&[0, 0, 0, ATYP_V4, 1, 2]).is_err());
    }

    #[test]
    fn reply_codes_match_error_kinds() {
        assert_eq!(reply_code(&Error::no_route("x")), REP_HOST_UNREACHABLE);
        assert_eq!(
            reply_code(&Error::ExitDial {
                kind: DialFailure::Refused,
                detail: String::new()
            }),
            REP_CONNECTION_REFUSED
        );
        assert_eq!(reply_code(&Error::timeout("x")), REP_TTL_EXPIRED);
        assert_eq!(reply_code(&Error::AuthFailed), REP_NOT_ALLOWED);
        assert_eq!(
            reply_code(&Error::internal("x")),
            REP_GENERAL_FAILURE
        );
    }
}
