use crate::types::ResetReason;
use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Handshake failure subcategories. All of them close the transport; none are
/// retried on the same connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandshakeFailure {
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("identity mismatch")]
    IdentityMismatch,
    #[error("authenticator invalid")]
    BadAuthenticator,
    #[error("timed out")]
    Timeout,
}

/// Category of an exit dial failure, preserved so the ingress can map it onto
/// the right SOCKS5 reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialFailure {
    HostUnreachable,
    Refused,
    Timeout,
    Other,
}

impl DialFailure {
    pub fn from_io(e: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::ConnectionRefused => DialFailure::Refused,
            ErrorKind::TimedOut => DialFailure::Timeout,
            ErrorKind::HostUnreachable | ErrorKind::NetworkUnreachable => {
                DialFailure::HostUnreachable
            }
            _ => DialFailure::Other,
        }
    }
}

/// The closed error set surfaced across the core.
#[derive(Debug, Error)]
pub enum Error {
    #[error("config: {0}")]
    Config(String),
    #[error("identity: {0}")]
    Identity(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("handshake: {0}")]
    Handshake(HandshakeFailure),
    #[error("protocol: {0}")]
    Protocol(String),
    #[error("authentication failed")]
    AuthFailed,
    #[error("no route to {0}")]
    NoRoute(String),
    #[error("routing loop detected")]
    Loop,
    #[error("ttl exceeded")]
    TtlExceeded,
    #[error("stream closed")]
    StreamClosed,
    #[error("stream reset: {0}")]
    Reset(ResetReason),
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("cancelled")]
    Cancelled,
    #[error("exit dial failed: {detail}")]
    ExitDial { kind: DialFailure, detail: String },
    #[error("crypto: {0}")]
    Crypto(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn identity(msg: impl Into<String>) -> Self {
        Self::Identity(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::Crypto(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn no_route(dest: impl std::fmt::Display) -> Self {
        Self::NoRoute(dest.to_string())
    }

    pub fn exit_dial(e: &std::io::Error) -> Self {
        Self::ExitDial {
            kind: DialFailure::from_io(e),
            detail: e.to_string(),
        }
    }

    /// The RESET reason a peer should see when this error kills a stream.
    pub fn reset_reason(&self) -> ResetReason {
        match self {
            Error::Timeout(_) | Error::Handshake(HandshakeFailure::Timeout) => ResetReason::Timeout,
            Error::NoRoute(_) => ResetReason::NoRoute,
            Error::Loop => ResetReason::NoRoute,
            Error::TtlExceeded => ResetReason::TtlExceeded,
            Error::LimitExceeded(_) => ResetReason::LimitExceeded,
            Error::AuthFailed => ResetReason::Forbidden,
            Error::Reset(reason) => *reason,
            Error::StreamClosed => ResetReason::PeerClosed,
            Error::ExitDial { kind, .. } => match kind {
                DialFailure::HostUnreachable => ResetReason::HostUnreachable,
                DialFailure::Refused => ResetReason::ConnectionRefused,
                DialFailure::Timeout => ResetReason::Timeout,
                DialFailure::Other => ResetReason::Internal,
            },
            _ => ResetReason::Internal,
        }
    }
}

// The IO seam: read/write failures are transport errors everywhere in the
// core; exit dial sites map through `Error::exit_dial` instead.
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Protocol(format!("json: {e}"))
    }
}
