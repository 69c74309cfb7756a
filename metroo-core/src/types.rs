use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    str::FromStr,
};

/// 128-bit opaque agent identifier, stable for the life of the install.
///
/// Rendered as 32 lowercase hex characters; the 12-character short form is
/// what logs and the HTTP API show.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId(pub [u8; 16]);

impl AgentId {
    pub const LEN: usize = 16;

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// First 12 hex characters, the human-facing short form.
    pub fn short(&self) -> String {
        hex::encode(self.0)[..12].to_string()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgentId({})", self.short())
    }
}

impl FromStr for AgentId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s)
            .map_err(|_| crate::Error::identity(format!("agent id is not hex: {s:?}")))?;
        let bytes: [u8; 16] = raw
            .try_into()
            .map_err(|_| crate::Error::identity("agent id must be 16 bytes"))?;
        Ok(Self(bytes))
    }
}

impl Serialize for AgentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AgentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Payload kind carried by a stream. The wire value is part of STREAM_OPEN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Tcp,
    Udp,
    Icmp,
    Control,
    Shell,
    FileXfer,
}

impl StreamKind {
    pub fn to_wire(self) -> u8 {
        match self {
            StreamKind::Tcp => 1,
            StreamKind::Udp => 2,
            StreamKind::Icmp => 3,
            StreamKind::Control => 4,
            StreamKind::Shell => 5,
            StreamKind::FileXfer => 6,
        }
    }

    pub fn from_wire(v: u8) -> Option<Self> {
        Some(match v {
            1 => StreamKind::Tcp,
            2 => StreamKind::Udp,
            3 => StreamKind::Icmp,
            4 => StreamKind::Control,
            5 => StreamKind::Shell,
            6 => StreamKind::FileXfer,
            _ => return None,
        })
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamKind::Tcp => "tcp",
            StreamKind::Udp => "udp",
            StreamKind::Icmp => "icmp",
            StreamKind::Control => "control",
            StreamKind::Shell => "shell",
            StreamKind::FileXfer => "filexfer",
        };
        f.write_str(s)
    }
}

/// Reason code carried by STREAM_RESET and STREAM_OPEN_ACK failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResetReason {
    PeerClosed,
    Timeout,
    Forbidden,
    NoRoute,
    LimitExceeded,
    TtlExceeded,
    Internal,
    /// Exit-side dial failures, carried in STREAM_OPEN_ACK status.
    HostUnreachable,
    ConnectionRefused,
}

impl ResetReason {
    pub fn to_wire(self) -> u8 {
        match self {
            ResetReason::PeerClosed => 1,
            ResetReason::Timeout => 2,
            ResetReason::Forbidden => 3,
            ResetReason::NoRoute => 4,
            ResetReason::LimitExceeded => 5,
            ResetReason::TtlExceeded => 6,
            ResetReason::Internal => 7,
            ResetReason::HostUnreachable => 8,
            ResetReason::ConnectionRefused => 9,
        }
    }

    pub fn from_wire(v: u8) -> Option<Self> {
        Some(match v {
            1 => ResetReason::PeerClosed,
            2 => ResetReason::Timeout,
            3 => ResetReason::Forbidden,
            4 => ResetReason::NoRoute,
            5 => ResetReason::LimitExceeded,
            6 => ResetReason::TtlExceeded,
            7 => ResetReason::Internal,
            8 => ResetReason::HostUnreachable,
            9 => ResetReason::ConnectionRefused,
            _ => return None,
        })
    }
}

impl fmt::Display for ResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResetReason::PeerClosed => "peer-closed",
            ResetReason::Timeout => "timeout",
            ResetReason::Forbidden => "forbidden",
            ResetReason::NoRoute => "no-route",
            ResetReason::LimitExceeded => "limit-exceeded",
            ResetReason::TtlExceeded => "ttl-exceeded",
            ResetReason::Internal => "internal-error",
            ResetReason::HostUnreachable => "host-unreachable",
            ResetReason::ConnectionRefused => "connection-refused",
        };
        f.write_str(s)
    }
}

/// Transport kinds recognised by name in configuration. The core never looks
/// inside them; it consumes the framed-connection abstraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Quic,
    H2,
    Ws,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportKind::Quic => "quic",
            TransportKind::H2 => "h2",
            TransportKind::Ws => "ws",
        };
        f.write_str(s)
    }
}

impl FromStr for TransportKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quic" => Ok(TransportKind::Quic),
            "h2" => Ok(TransportKind::H2),
            "ws" => Ok(TransportKind::Ws),
            other => Err(crate::Error::config(format!("unknown transport {other:?}"))),
        }
    }
}

/// Destination address descriptor carried in STREAM_OPEN. Names are resolved
/// at the exit, never at the ingress.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DestAddr {
    Ip(SocketAddr),
    Name { host: String, port: u16 },
}

impl DestAddr {
    pub fn name(host: impl Into<String>, port: u16) -> Self {
        DestAddr::Name {
            host: host.into(),
            port,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            DestAddr::Ip(sa) => sa.port(),
            DestAddr::Name { port, .. } => *port,
        }
    }

    /// The IP if the destination is already numeric.
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            DestAddr::Ip(sa) => Some(sa.ip()),
            DestAddr::Name { .. } => None,
        }
    }

    /// The domain name if the destination is symbolic.
    pub fn host_name(&self) -> Option<&str> {
        match self {
            DestAddr::Ip(_) => None,
            DestAddr::Name { host, .. } => Some(host),
        }
    }
}

impl fmt::Display for DestAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestAddr::Ip(sa) => write!(f, "{sa}"),
            DestAddr::Name { host, port } => write!(f, "{host}:{port}"),
        }
    }
}
