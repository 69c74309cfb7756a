//! Typed frame payloads. Fixed-width big-endian integers, u16
//! length-prefixed strings, `nom` on the parse side.

use crate::frame::{Frame, FrameType, FLAG_E2E};
use bytes::{BufMut, Bytes, BytesMut};
use metroo_core::{AgentId, Cidr, DestAddr, DomainPattern, Error, ResetReason, Result, RouteKey, StreamKind};
use nom::{
    bytes::complete::take,
    combinator::{map, map_res},
    multi::length_data,
    number::complete::{be_u16, be_u32, be_u64, u8 as nom_u8},
    IResult,
};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

pub const PROTOCOL_VERSION: u8 = 1;

type PResult<'a, T> = IResult<&'a [u8], T>;

fn bad(what: &str) -> Error {
    Error::protocol(format!("malformed {what} payload"))
}

fn finish<T>(what: &str, res: PResult<'_, T>) -> Result<T> {
    match res {
        Ok((rest, value)) if rest.is_empty() => Ok(value),
        Ok(_) => Err(Error::protocol(format!("trailing bytes in {what} payload"))),
        Err(_) => Err(bad(what)),
    }
}

fn p_agent_id(i: &[u8]) -> PResult<'_, AgentId> {
    map(take(16usize), |b: &[u8]| {
        let mut id = [0u8; 16];
        id.copy_from_slice(b);
        AgentId::from_bytes(id)
    })(i)
}

fn p_key32(i: &[u8]) -> PResult<'_, [u8; 32]> {
    map(take(32usize), |b: &[u8]| {
        let mut k = [0u8; 32];
        k.copy_from_slice(b);
        k
    })(i)
}

fn p_string(i: &[u8]) -> PResult<'_, String> {
    map_res(length_data(be_u16), |b: &[u8]| {
        std::str::from_utf8(b).map(str::to_owned)
    })(i)
}

fn put_string(dst: &mut BytesMut, s: &str) {
    debug_assert!(s.len() <= u16::MAX as usize);
    dst.put_u16(s.len() as u16);
    dst.put_slice(s.as_bytes());
}

// ---------------------------------------------------------------- handshake

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub version: u8,
    pub agent_id: AgentId,
    pub public_key: [u8; 32],
    pub features: u32,
    pub nonce: [u8; 32],
    pub display_name: String,
}

impl Hello {
    pub fn encode(&self) -> Bytes {
        let mut b = BytesMut::with_capacity(1 + 16 + 32 + 4 + 32 + 2 + self.display_name.len());
        b.put_u8(self.version);
        b.put_slice(self.agent_id.as_bytes());
        b.put_slice(&self.public_key);
        b.put_u32(self.features);
        b.put_slice(&self.nonce);
        put_string(&mut b, &self.display_name);
        b.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        finish("PEER_HELLO", Self::parse(payload))
    }

    fn parse(i: &[u8]) -> PResult<'_, Self> {
        let (i, version) = nom_u8(i)?;
        let (i, agent_id) = p_agent_id(i)?;
        let (i, public_key) = p_key32(i)?;
        let (i, features) = be_u32(i)?;
        let (i, nonce) = p_key32(i)?;
        let (i, display_name) = p_string(i)?;
        Ok((
            i,
            Hello {
                version,
                agent_id,
                public_key,
                features,
                nonce,
                display_name,
            },
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Welcome {
    pub agent_id: AgentId,
    pub auth_tag: [u8; 32],
}

impl Welcome {
    pub fn encode(&self) -> Bytes {
        let mut b = BytesMut::with_capacity(16 + 32);
        b.put_slice(self.agent_id.as_bytes());
        b.put_slice(&self.auth_tag);
        b.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        finish("PEER_WELCOME", Self::parse(payload))
    }

    fn parse(i: &[u8]) -> PResult<'_, Self> {
        let (i, agent_id) = p_agent_id(i)?;
        let (i, auth_tag) = p_key32(i)?;
        Ok((i, Welcome { agent_id, auth_tag }))
    }
}

// ---------------------------------------------------------------- keepalive

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    pub nonce: u64,
    /// Sender's monotonic clock in microseconds; echoed verbatim in the ACK
    /// so the sender computes RTT without per-nonce state.
    pub timestamp_micros: u64,
}

impl Keepalive {
    pub fn encode(&self) -> Bytes {
        let mut b = BytesMut::with_capacity(16);
        b.put_u64(self.nonce);
        b.put_u64(self.timestamp_micros);
        b.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        finish("KEEPALIVE", Self::parse(payload))
    }

    fn parse(i: &[u8]) -> PResult<'_, Self> {
        let (i, nonce) = be_u64(i)?;
        let (i, timestamp_micros) = be_u64(i)?;
        Ok((
            i,
            Keepalive {
                nonce,
                timestamp_micros,
            },
        ))
    }
}

// ---------------------------------------------------------------- streams

fn put_dest_addr(dst: &mut BytesMut, addr: &Option<DestAddr>) {
    match addr {
        None => dst.put_u8(0),
        Some(DestAddr::Ip(SocketAddr::V4(sa))) => {
            dst.put_u8(1);
            dst.put_slice(&sa.ip().octets());
            dst.put_u16(sa.port());
        }
        Some(DestAddr::Ip(SocketAddr::V6(sa))) => {
            dst.put_u8(2);
            dst.put_slice(&sa.ip().octets());
            dst.put_u16(sa.port());
        }
        Some(DestAddr::Name { host, port }) => {
            dst.put_u8(3);
            put_string(dst, host);
            dst.put_u16(*port);
        }
    }
}

fn p_dest_addr(i: &[u8]) -> PResult<'_, Option<DestAddr>> {
    let (i, tag) = nom_u8(i)?;
    match tag {
        0 => Ok((i, None)),
        1 => {
            let (i, raw) = take(4usize)(i)?;
            let (i, port) = be_u16(i)?;
            let octets: [u8; 4] = raw.try_into().unwrap_or_default();
            let ip = IpAddr::V4(Ipv4Addr::from(octets));
            Ok((i, Some(DestAddr::Ip(SocketAddr::new(ip, port)))))
        }
        2 => {
            let (i, raw) = take(16usize)(i)?;
            let (i, port) = be_u16(i)?;
            let octets: [u8; 16] = raw.try_into().unwrap_or_default();
            let ip = IpAddr::V6(Ipv6Addr::from(octets));
            Ok((i, Some(DestAddr::Ip(SocketAddr::new(ip, port)))))
        }
        3 => {
            let (i, host) = p_string(i)?;
            let (i, port) = be_u16(i)?;
            Ok((i, Some(DestAddr::Name { host, port })))
        }
        _ => Err(nom::Err::Failure(nom::error::Error::new(
            i,
            nom::error::ErrorKind::Tag,
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOpen {
    pub dest: AgentId,
    /// The agent that opened the stream (the ingress for proxied traffic).
    pub origin: AgentId,
    /// Stream id the origin allocated on its first-hop link. Stable across
    /// hops even though each link re-numbers frames, so both ends of an E2E
    /// session fold the same id into key derivation.
    pub origin_stream_id: u64,
    pub kind: StreamKind,
    /// Remaining forwarding hops; decremented at every transit agent.
    pub ttl: u8,
    /// Receive window the opener grants for exit→ingress data.
    pub initial_window: u32,
    pub addr: Option<DestAddr>,
    pub e2e_public: Option<[u8; 32]>,
}

impl StreamOpen {
    pub fn into_frame(self, stream_id: u64) -> Frame {
        let flags = if self.e2e_public.is_some() { FLAG_E2E } else { 0 };
        Frame::new(FrameType::StreamOpen, stream_id, self.encode()).with_flags(flags)
    }

    pub fn encode(&self) -> Bytes {
        let mut b = BytesMut::with_capacity(96);
        b.put_slice(self.dest.as_bytes());
        b.put_slice(self.origin.as_bytes());
        b.put_u64(self.origin_stream_id);
        b.put_u8(self.kind.to_wire());
        b.put_u8(self.ttl);
        b.put_u32(self.initial_window);
        put_dest_addr(&mut b, &self.addr);
        if let Some(pk) = &self.e2e_public {
            b.put_slice(pk);
        }
        b.freeze()
    }

    pub fn decode(payload: &[u8], flags: u8) -> Result<Self> {
        let (payload, e2e_public) = split_e2e(payload, flags)?;
        finish("STREAM_OPEN", Self::parse(payload, e2e_public))
    }

    fn parse(i: &[u8], e2e_public: Option<[u8; 32]>) -> PResult<'_, Self> {
        let (i, dest) = p_agent_id(i)?;
        let (i, origin) = p_agent_id(i)?;
        let (i, origin_stream_id) = be_u64(i)?;
        let (i, kind) = map_res(nom_u8, |v| StreamKind::from_wire(v).ok_or(()))(i)?;
        let (i, ttl) = nom_u8(i)?;
        let (i, initial_window) = be_u32(i)?;
        let (i, addr) = p_dest_addr(i)?;
        Ok((
            i,
            StreamOpen {
                dest,
                origin,
                origin_stream_id,
                kind,
                ttl,
                initial_window,
                addr,
                e2e_public,
            },
        ))
    }
}

/// When FLAG_E2E is set the payload ends with a 32-byte ephemeral key.
fn split_e2e(payload: &[u8], flags: u8) -> Result<(&[u8], Option<[u8; 32]>)> {
    if flags & FLAG_E2E == 0 {
        return Ok((payload, None));
    }
    if payload.len() < 32 {
        return Err(Error::protocol("E2E flag set but payload too short"));
    }
    let (head, tail) = payload.split_at(payload.len() - 32);
    let mut pk = [0u8; 32];
    pk.copy_from_slice(tail);
    Ok((head, Some(pk)))
}

/// STREAM_OPEN_ACK status byte: zero for success, a reset reason otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenStatus {
    Ok,
    Err(ResetReason),
}

impl OpenStatus {
    fn to_wire(self) -> u8 {
        match self {
            OpenStatus::Ok => 0,
            OpenStatus::Err(reason) => reason.to_wire(),
        }
    }

    fn from_wire(v: u8) -> Option<Self> {
        if v == 0 {
            Some(OpenStatus::Ok)
        } else {
            ResetReason::from_wire(v).map(OpenStatus::Err)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOpenAck {
    pub status: OpenStatus,
    /// Receive window the acceptor grants for ingress→exit data.
    pub initial_window: u32,
    pub e2e_public: Option<[u8; 32]>,
}

impl StreamOpenAck {
    pub fn failure(reason: ResetReason) -> Self {
        Self {
            status: OpenStatus::Err(reason),
            initial_window: 0,
            e2e_public: None,
        }
    }

    pub fn into_frame(self, stream_id: u64) -> Frame {
        let flags = if self.e2e_public.is_some() { FLAG_E2E } else { 0 };
        Frame::new(FrameType::StreamOpenAck, stream_id, self.encode()).with_flags(flags)
    }

    pub fn encode(&self) -> Bytes {
        let mut b = BytesMut::with_capacity(5 + 32);
        b.put_u8(self.status.to_wire());
        b.put_u32(self.initial_window);
        if let Some(pk) = &self.e2e_public {
            b.put_slice(pk);
        }
        b.freeze()
    }

    pub fn decode(payload: &[u8], flags: u8) -> Result<Self> {
        let (payload, e2e_public) = split_e2e(payload, flags)?;
        finish("STREAM_OPEN_ACK", Self::parse(payload, e2e_public))
    }

    fn parse(i: &[u8], e2e_public: Option<[u8; 32]>) -> PResult<'_, Self> {
        let (i, status) = map_res(nom_u8, |v| OpenStatus::from_wire(v).ok_or(()))(i)?;
        let (i, initial_window) = be_u32(i)?;
        Ok((
            i,
            StreamOpenAck {
                status,
                initial_window,
                e2e_public,
            },
        ))
    }
}

pub fn reset_frame(stream_id: u64, reason: ResetReason) -> Frame {
    Frame::new(
        FrameType::StreamReset,
        stream_id,
        Bytes::copy_from_slice(&[reason.to_wire()]),
    )
}

pub fn decode_reset(payload: &[u8]) -> Result<ResetReason> {
    finish(
        "STREAM_RESET",
        map_res(nom_u8, |v| ResetReason::from_wire(v).ok_or(()))(payload),
    )
}

pub fn window_frame(stream_id: u64, delta: u32) -> Frame {
    Frame::new(
        FrameType::StreamWindow,
        stream_id,
        Bytes::copy_from_slice(&delta.to_be_bytes()),
    )
}

pub fn decode_window(payload: &[u8]) -> Result<u32> {
    finish("STREAM_WINDOW", be_u32(payload))
}

// ---------------------------------------------------------------- routing

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteAdvEntry {
    pub key: RouteKey,
    pub metric: u16,
    pub ttl_secs: u32,
    pub path: Vec<AgentId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteAdv {
    pub entries: Vec<RouteAdvEntry>,
}

fn put_route_key(dst: &mut BytesMut, key: &RouteKey) {
    match key {
        RouteKey::Agent(id) => {
            dst.put_u8(0);
            dst.put_slice(id.as_bytes());
        }
        RouteKey::Cidr(c) => match c.addr() {
            IpAddr::V4(a) => {
                dst.put_u8(1);
                dst.put_slice(&a.octets());
                dst.put_u8(c.prefix());
            }
            IpAddr::V6(a) => {
                dst.put_u8(2);
                dst.put_slice(&a.octets());
                dst.put_u8(c.prefix());
            }
        },
        RouteKey::Domain(d) => {
            dst.put_u8(3);
            put_string(dst, &d.to_string());
        }
    }
}

fn p_route_key(i: &[u8]) -> PResult<'_, RouteKey> {
    let (i, tag) = nom_u8(i)?;
    let fail = |i| nom::Err::Failure(nom::error::Error::new(i, nom::error::ErrorKind::Verify));
    match tag {
        0 => map(p_agent_id, RouteKey::Agent)(i),
        1 => {
            let (i, raw) = take(4usize)(i)?;
            let (i, prefix) = nom_u8(i)?;
            let octets: [u8; 4] = raw.try_into().unwrap_or_default();
            let cidr = Cidr::new(IpAddr::V4(Ipv4Addr::from(octets)), prefix)
                .map_err(|_| fail(i))?;
            Ok((i, RouteKey::Cidr(cidr)))
        }
        2 => {
            let (i, raw) = take(16usize)(i)?;
            let (i, prefix) = nom_u8(i)?;
            let octets: [u8; 16] = raw.try_into().unwrap_or_default();
            let cidr = Cidr::new(IpAddr::V6(Ipv6Addr::from(octets)), prefix)
                .map_err(|_| fail(i))?;
            Ok((i, RouteKey::Cidr(cidr)))
        }
        3 => {
            let (i, text) = p_string(i)?;
            let pattern: DomainPattern = text.parse().map_err(|_| fail(i))?;
            Ok((i, RouteKey::Domain(pattern)))
        }
        _ => Err(fail(i)),
    }
}

impl RouteAdvEntry {
    fn encode_into(&self, dst: &mut BytesMut) {
        let mut body = BytesMut::with_capacity(32 + self.path.len() * 16);
        put_route_key(&mut body, &self.key);
        body.put_u16(self.metric);
        body.put_u32(self.ttl_secs);
        debug_assert!(self.path.len() <= u8::MAX as usize);
        body.put_u8(self.path.len() as u8);
        for hop in &self.path {
            body.put_slice(hop.as_bytes());
        }
        debug_assert!(body.len() <= u16::MAX as usize);
        dst.put_u16(body.len() as u16);
        dst.put_slice(&body);
    }

    fn parse(i: &[u8]) -> PResult<'_, Self> {
        let (i, key) = p_route_key(i)?;
        let (i, metric) = be_u16(i)?;
        let (i, ttl_secs) = be_u32(i)?;
        let (i, path_len) = nom_u8(i)?;
        let mut path = Vec::with_capacity(path_len as usize);
        let mut cursor = i;
        for _ in 0..path_len {
            let (next, hop) = p_agent_id(cursor)?;
            path.push(hop);
            cursor = next;
        }
        Ok((cursor, RouteAdvEntry { key, metric, ttl_secs, path }))
    }
}

impl RouteAdv {
    pub fn into_frame(self) -> Frame {
        Frame::new(FrameType::RouteAdv, 0, self.encode())
    }

    /// Entries are individually length-prefixed so a receiver can skip a
    /// malformed one without losing the rest of the advertisement.
    pub fn encode(&self) -> Bytes {
        let mut b = BytesMut::with_capacity(8 + self.entries.len() * 48);
        debug_assert!(self.entries.len() <= u16::MAX as usize);
        b.put_u16(self.entries.len() as u16);
        for entry in &self.entries {
            entry.encode_into(&mut b);
        }
        b.freeze()
    }

    /// Decode, skipping malformed entries. Returns the advertisement and the
    /// number of entries dropped; a mangled outer structure is still fatal.
    pub fn decode(payload: &[u8]) -> Result<(Self, usize)> {
        let (mut i, count) =
            be_u16::<_, nom::error::Error<&[u8]>>(payload).map_err(|_| bad("ROUTE_ADV"))?;
        let mut entries = Vec::with_capacity(count as usize);
        let mut skipped = 0usize;
        for _ in 0..count {
            let (rest, body) =
                length_data(be_u16::<_, nom::error::Error<&[u8]>>)(i).map_err(|_| bad("ROUTE_ADV"))?;
            i = rest;
            match RouteAdvEntry::parse(body) {
                Ok((leftover, entry)) if leftover.is_empty() => entries.push(entry),
                _ => skipped += 1,
            }
        }
        if !i.is_empty() {
            return Err(Error::protocol("trailing bytes in ROUTE_ADV payload"));
        }
        Ok((RouteAdv { entries }, skipped))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteWithdraw {
    pub keys: Vec<RouteKey>,
}

impl RouteWithdraw {
    pub fn into_frame(self) -> Frame {
        Frame::new(FrameType::RouteWithdraw, 0, self.encode())
    }

    pub fn encode(&self) -> Bytes {
        let mut b = BytesMut::with_capacity(4 + self.keys.len() * 20);
        debug_assert!(self.keys.len() <= u16::MAX as usize);
        b.put_u16(self.keys.len() as u16);
        for key in &self.keys {
            put_route_key(&mut b, key);
        }
        b.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        finish("ROUTE_WITHDRAW", Self::parse(payload))
    }

    fn parse(mut i: &[u8]) -> PResult<'_, Self> {
        let (rest, count) = be_u16(i)?;
        i = rest;
        let mut keys = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (rest, key) = p_route_key(i)?;
            keys.push(key);
            i = rest;
        }
        Ok((i, RouteWithdraw { keys }))
    }
}

// ---------------------------------------------------------------- node info

/// Flooded NodeInfo carrier. The envelope stays in the clear so transit
/// agents can version-check and re-flood without opening the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfoBlob {
    pub agent_id: AgentId,
    pub updated_at_ms: u64,
    pub body: Bytes,
    pub sealed: bool,
}

impl NodeInfoBlob {
    pub fn into_frame(self) -> Frame {
        let flags = if self.sealed { crate::frame::FLAG_SEALED } else { 0 };
        let mut b = BytesMut::with_capacity(24 + self.body.len());
        b.put_slice(self.agent_id.as_bytes());
        b.put_u64(self.updated_at_ms);
        b.put_slice(&self.body);
        Frame::new(FrameType::NodeInfo, 0, b.freeze()).with_flags(flags)
    }

    pub fn decode(payload: &[u8], flags: u8) -> Result<Self> {
        if payload.len() < 24 {
            return Err(bad("NODE_INFO"));
        }
        let (i, agent_id) = p_agent_id(payload).map_err(|_| bad("NODE_INFO"))?;
        let (i, updated_at_ms) = be_u64::<_, nom::error::Error<&[u8]>>(i).map_err(|_| bad("NODE_INFO"))?;
        Ok(Self {
            agent_id,
            updated_at_ms,
            body: Bytes::copy_from_slice(i),
            sealed: flags & crate::frame::FLAG_SEALED != 0,
        })
    }
}

// ---------------------------------------------------------------- control

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlReq {
    pub dest: AgentId,
    pub src: AgentId,
    pub tag: u16,
    pub body: Bytes,
    pub sealed: bool,
}

impl ControlReq {
    pub fn into_frame(self) -> Frame {
        let flags = if self.sealed { crate::frame::FLAG_SEALED } else { 0 };
        let mut b = BytesMut::with_capacity(34 + self.body.len());
        b.put_slice(self.dest.as_bytes());
        b.put_slice(self.src.as_bytes());
        b.put_u16(self.tag);
        b.put_slice(&self.body);
        Frame::new(FrameType::ControlReq, 0, b.freeze()).with_flags(flags)
    }

    pub fn decode(payload: &[u8], flags: u8) -> Result<Self> {
        if payload.len() < 34 {
            return Err(bad("CONTROL_REQ"));
        }
        let (i, dest) = p_agent_id(payload).map_err(|_| bad("CONTROL_REQ"))?;
        let (i, src) = p_agent_id(i).map_err(|_| bad("CONTROL_REQ"))?;
        let (i, tag) = be_u16::<_, nom::error::Error<&[u8]>>(i).map_err(|_| bad("CONTROL_REQ"))?;
        Ok(Self {
            dest,
            src,
            tag,
            body: Bytes::copy_from_slice(i),
            sealed: flags & crate::frame::FLAG_SEALED != 0,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRsp {
    pub dest: AgentId,
    pub src: AgentId,
    pub tag: u16,
    /// Zero for success; non-zero values mirror the HTTP mapping.
    pub status: u8,
    pub body: Bytes,
    pub sealed: bool,
}

impl ControlRsp {
    pub fn into_frame(self) -> Frame {
        let flags = if self.sealed { crate::frame::FLAG_SEALED } else { 0 };
        let mut b = BytesMut::with_capacity(35 + self.body.len());
        b.put_slice(self.dest.as_bytes());
        b.put_slice(self.src.as_bytes());
        b.put_u16(self.tag);
        b.put_u8(self.status);
        b.put_slice(&self.body);
        Frame::new(FrameType::ControlRsp, 0, b.freeze()).with_flags(flags)
    }

    pub fn decode(payload: &[u8], flags: u8) -> Result<Self> {
        if payload.len() < 35 {
            return Err(bad("CONTROL_RSP"));
        }
        let (i, dest) = p_agent_id(payload).map_err(|_| bad("CONTROL_RSP"))?;
        let (i, src) = p_agent_id(i).map_err(|_| bad("CONTROL_RSP"))?;
        let (i, tag) = be_u16::<_, nom::error::Error<&[u8]>>(i).map_err(|_| bad("CONTROL_RSP"))?;
        let (i, status) = nom_u8::<_, nom::error::Error<&[u8]>>(i).map_err(|_| bad("CONTROL_RSP"))?;
        Ok(Self {
            dest,
            src,
            tag,
            status,
            body: Bytes::copy_from_slice(i),
            sealed: flags & crate::frame::FLAG_SEALED != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(b: u8) -> AgentId {
        AgentId::from_bytes([b; 16])
    }

    #[test]
    fn hello_round_trip() {
        let hello = Hello {
            version: PROTOCOL_VERSION,
            agent_id: id(1),
            public_key: [2; 32],
            features: 0b101,
            nonce: [3; 32],
            display_name: "edge-1".into(),
        };
        assert_eq!(Hello::decode(&hello.encode()).unwrap(), hello);
    }

    #[test]
    fn hello_rejects_truncation() {
        let hello = Hello {
            version: 1,
            agent_id: id(1),
            public_key: [2; 32],
            features: 0,
            nonce: [3; 32],
            display_name: String::new(),
        };
        let wire = hello.encode();
        assert!(Hello::decode(&wire[..wire.len() - 1]).is_err());
    }

    #[test]
    fn open_round_trip_with_addr_forms() {
        for addr in [
            None,
            Some(DestAddr::Ip("10.0.0.1:443".parse().unwrap())),
            Some(DestAddr::Ip("[2001:db8::1]:53".parse().unwrap())),
            Some(DestAddr::name("example.com", 80)),
        ] {
            let open = StreamOpen {
                dest: id(9),
                origin: id(1),
                origin_stream_id: 11,
                kind: StreamKind::Tcp,
                ttl: 16,
                initial_window: 256 * 1024,
                addr,
                e2e_public: None,
            };
            let frame = open.clone().into_frame(11);
            let back = StreamOpen::decode(&frame.payload, frame.flags).unwrap();
            assert_eq!(back, open);
        }
    }

    #[test]
    fn open_carries_e2e_key_via_flag() {
        let open = StreamOpen {
            dest: id(9),
            origin: id(2),
            origin_stream_id: 5,
            kind: StreamKind::Udp,
            ttl: 8,
            initial_window: 1024,
            addr: Some(DestAddr::name("dns.internal.example", 53)),
            e2e_public: Some([7; 32]),
        };
        let frame = open.clone().into_frame(5);
        assert_eq!(frame.flags & FLAG_E2E, FLAG_E2E);
        let back = StreamOpen::decode(&frame.payload, frame.flags).unwrap();
        assert_eq!(back, open);
        // Without the flag the trailing key is not stripped, so the payload
        // no longer parses cleanly.
        assert!(StreamOpen::decode(&frame.payload, 0).is_err());
    }

    #[test]
    fn open_ack_round_trip() {
        let ok = StreamOpenAck {
            status: OpenStatus::Ok,
            initial_window: 65536,
            e2e_public: Some([4; 32]),
        };
        let frame = ok.clone().into_frame(7);
        assert_eq!(StreamOpenAck::decode(&frame.payload, frame.flags).unwrap(), ok);

        let failed = StreamOpenAck::failure(ResetReason::NoRoute);
        let frame = failed.clone().into_frame(7);
        assert_eq!(
            StreamOpenAck::decode(&frame.payload, frame.flags).unwrap(),
            failed
        );
    }

    #[test]
    fn reset_and_window_round_trip() {
        let frame = reset_frame(3, ResetReason::LimitExceeded);
        assert_eq!(
            decode_reset(&frame.payload).unwrap(),
            ResetReason::LimitExceeded
        );
        let frame = window_frame(3, 128 * 1024);
        assert_eq!(decode_window(&frame.payload).unwrap(), 128 * 1024);
        assert!(decode_window(&[0, 0, 1]).is_err());
    }

    #[test]
    fn route_adv_round_trip() {
        let adv = RouteAdv {
            entries: vec![
                RouteAdvEntry {
                    key: RouteKey::Agent(id(5)),
                    metric: 0,
                    ttl_secs: 300,
                    path: vec![],
                },
                RouteAdvEntry {
                    key: RouteKey::Cidr("10.9.0.0/16".parse().unwrap()),
                    metric: 2,
                    ttl_secs: 300,
                    path: vec![id(5), id(6)],
                },
                RouteAdvEntry {
                    key: RouteKey::Domain("*.internal.example".parse().unwrap()),
                    metric: 1,
                    ttl_secs: 120,
                    path: vec![id(5)],
                },
            ],
        };
        let (back, skipped) = RouteAdv::decode(&adv.encode()).unwrap();
        assert_eq!(back, adv);
        assert_eq!(skipped, 0);
    }

    #[test]
    fn route_adv_skips_malformed_entry() {
        let good = RouteAdvEntry {
            key: RouteKey::Agent(id(5)),
            metric: 1,
            ttl_secs: 60,
            path: vec![id(5)],
        };
        let mut b = BytesMut::new();
        b.put_u16(2);
        // Garbage entry with an unknown key tag, correctly length-prefixed.
        b.put_u16(3);
        b.put_slice(&[0xee, 0x01, 0x02]);
        good.encode_into(&mut b);
        let (adv, skipped) = RouteAdv::decode(&b).unwrap();
        assert_eq!(skipped, 1);
        assert_eq!(adv.entries, vec![good]);
    }

    #[test]
    fn route_adv_mangled_outer_structure_is_fatal() {
        // Claims two entries but the buffer ends mid-length-prefix.
        let mut b = BytesMut::new();
        b.put_u16(2);
        b.put_u8(0);
        assert!(RouteAdv::decode(&b).is_err());
    }

    #[test]
    fn route_withdraw_round_trip() {
        let wd = RouteWithdraw {
            keys: vec![
                RouteKey::Cidr("0.0.0.0/0".parse().unwrap()),
                RouteKey::Domain("dns.internal.example".parse().unwrap()),
            ],
        };
        assert_eq!(RouteWithdraw::decode(&wd.encode()).unwrap(), wd);
    }

    #[test]
    fn route_key_bad_tag_rejected() {
        assert!(RouteWithdraw::decode(&[0, 1, 9]).is_err());
    }

    #[test]
    fn node_info_blob_round_trip() {
        let blob = NodeInfoBlob {
            agent_id: id(8),
            updated_at_ms: 1234,
            body: Bytes::from_static(b"{\"hostname\":\"h\"}"),
            sealed: false,
        };
        let frame = blob.clone().into_frame();
        assert_eq!(
            NodeInfoBlob::decode(&frame.payload, frame.flags).unwrap(),
            blob
        );
    }

    #[test]
    fn control_round_trip() {
        let req = ControlReq {
            dest: id(1),
            src: id(2),
            tag: 77,
            body: Bytes::from_static(b"{\"op\":\"status\"}"),
            sealed: true,
        };
        let frame = req.clone().into_frame();
        assert_eq!(ControlReq::decode(&frame.payload, frame.flags).unwrap(), req);

        let rsp = ControlRsp {
            dest: id(2),
            src: id(1),
            tag: 77,
            status: 0,
            body: Bytes::from_static(b"{}"),
            sealed: true,
        };
        let frame = rsp.clone().into_frame();
        assert_eq!(ControlRsp::decode(&frame.payload, frame.flags).unwrap(), rsp);
    }
}
