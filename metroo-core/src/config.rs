//! Agent configuration. Parses a TOML document into strongly-typed sections
//! and validates the cross-field rules that cannot be expressed in serde.

use crate::error::{Error, Result};
use crate::types::{AgentId, TransportKind};
use serde::Deserialize;
use std::{fs, net::SocketAddr, path::Path, time::Duration};

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub agent: AgentSection,
    pub listeners: Vec<ListenerConfig>,
    pub peers: Vec<PeerConfig>,
    pub socks5: Socks5Config,
    pub exit: ExitConfig,
    pub udp: DatagramConfig,
    pub icmp: DatagramConfig,
    pub routing: RoutingConfig,
    pub connections: ConnectionsConfig,
    pub limits: LimitsConfig,
    pub management: ManagementConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentSection {
    /// Fixed agent id in hex. When omitted the persisted identity (generated
    /// on first start) is used.
    pub id: Option<AgentId>,
    pub data_dir: String,
    pub display_name: Option<String>,
    /// `error`, `warn`, `info`, `debug`, `trace`, or any EnvFilter directive.
    pub log_level: String,
    /// `text` or `json`.
    pub log_format: LogFormat,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            id: None,
            data_dir: ".".into(),
            display_name: None,
            log_level: "info".into(),
            log_format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    pub transport: TransportKind,
    pub address: SocketAddr,
    /// URL path for ws/h2 listeners.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub tls_cert: Option<String>,
    #[serde(default)]
    pub tls_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeerConfig {
    /// Expected remote agent id; handshake fails on mismatch when set.
    #[serde(default)]
    pub id: Option<AgentId>,
    pub address: String,
    pub transport: TransportKind,
    #[serde(default)]
    pub proxy_auth: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Socks5Config {
    pub enabled: bool,
    pub address: SocketAddr,
    pub auth: Socks5Auth,
}

impl Default for Socks5Config {
    fn default() -> Self {
        Self {
            enabled: false,
            address: SocketAddr::from(([127, 0, 0, 1], 1080)),
            auth: Socks5Auth::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Socks5Auth {
    pub required: bool,
    pub users: Vec<Socks5User>,
}

/// One credential entry. Exactly one of `password` / `password_hash` may be
/// set; configurations that set both are rejected rather than guessed at.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Socks5User {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    /// bcrypt hash (`$2a$`/`$2b$`/`$2y$`).
    #[serde(default)]
    pub password_hash: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExitConfig {
    pub enabled: bool,
    /// CIDRs this agent will dial on behalf of the mesh.
    pub routes: Vec<String>,
    /// Domain patterns, exact or `*.suffix`.
    pub domains: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatagramConfig {
    pub enabled: bool,
    pub allowed_cidrs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoutingConfig {
    #[serde(with = "humantime_serde")]
    pub advertise_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub route_ttl: Duration,
    pub max_hops: u8,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            advertise_interval: Duration::from_secs(120),
            route_ttl: Duration::from_secs(300),
            max_hops: 16,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionsConfig {
    /// Forwarded pairs idle longer than this are reaped.
    #[serde(with = "humantime_serde")]
    pub idle_threshold: Duration,
    /// Deadline for dial + handshake, stream open, and control requests.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        Self {
            idle_threshold: Duration::from_secs(300),
            timeout: Duration::from_secs(30),
            reconnect: ReconnectConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconnectConfig {
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    pub max_streams_per_peer: usize,
    pub max_streams_total: usize,
    /// Per-stream receive window in bytes.
    pub buffer_size: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_streams_per_peer: 1000,
            max_streams_total: 10_000,
            buffer_size: 256 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManagementConfig {
    /// X25519 public key (hex). When set, node info and control payloads are
    /// sealed so only holders of the private half can read them.
    pub public_key: Option<String>,
    pub private_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiConfig {
    pub enabled: bool,
    pub address: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: SocketAddr::from(([127, 0, 0, 1], 7608)),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read_to_string(&path)
            .map_err(|e| Error::config(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_str(&data)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(data: &str) -> Result<Self> {
        let cfg: Config = toml::from_str(data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Cross-field rules serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.routing.max_hops == 0 {
            return Err(Error::config("routing.max_hops must be at least 1"));
        }
        if self.routing.advertise_interval < Duration::from_secs(1) {
            return Err(Error::config("routing.advertise_interval below 1s"));
        }
        if self.limits.buffer_size == 0 {
            return Err(Error::config("limits.buffer_size must be non-zero"));
        }
        if self.limits.max_streams_per_peer > self.limits.max_streams_total {
            return Err(Error::config(
                "limits.max_streams_per_peer exceeds max_streams_total",
            ));
        }
        for user in &self.socks5.auth.users {
            match (&user.password, &user.password_hash) {
                (Some(_), Some(_)) => {
                    return Err(Error::config(format!(
                        "socks5 user {:?} sets both password and password_hash",
                        user.username
                    )));
                }
                (None, None) => {
                    return Err(Error::config(format!(
                        "socks5 user {:?} has no credential",
                        user.username
                    )));
                }
                _ => {}
            }
            if let Some(hash) = &user.password_hash {
                if !hash.starts_with("$2") {
                    return Err(Error::config(format!(
                        "socks5 user {:?}: password_hash is not a bcrypt hash",
                        user.username
                    )));
                }
            }
        }
        if self.socks5.auth.required && self.socks5.auth.users.is_empty() {
            return Err(Error::config("socks5 auth required but no users configured"));
        }
        if let Some(pk) = &self.management.public_key {
            decode_key32(pk, "management.public_key")?;
        }
        if let Some(sk) = &self.management.private_key {
            decode_key32(sk, "management.private_key")?;
            if self.management.public_key.is_none() {
                return Err(Error::config(
                    "management.private_key set without public_key",
                ));
            }
        }
        Ok(())
    }
}

pub(crate) fn decode_key32(s: &str, what: &str) -> Result<[u8; 32]> {
    let raw = hex::decode(s).map_err(|_| Error::config(format!("{what} is not hex")))?;
    raw.try_into()
        .map_err(|_| Error::config(format!("{what} must be 32 bytes")))
}
