//! Per-agent metadata flooded through the mesh. Mutable, versioned by
//! `updated_at_ms`; receivers keep the newest blob per agent and re-flood it.

use crate::types::{AgentId, TransportKind};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub agent_id: AgentId,
    pub display_name: Option<String>,
    pub hostname: String,
    pub os: String,
    pub arch: String,
    pub version: String,
    /// Unix millis when the agent process started.
    pub boot_time_ms: u64,
    pub listeners: Vec<ListenerInfo>,
    pub capabilities: Capabilities,
    pub peers: Vec<PeerSummary>,
    /// Unix millis of the last mutation; the flooding version.
    pub updated_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerInfo {
    pub transport: TransportKind,
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub udp: bool,
    pub icmp: bool,
    pub socks5: bool,
    pub exit_routes: Vec<String>,
    pub exit_domains: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerSummary {
    pub id: AgentId,
    pub transport: TransportKind,
    pub rtt_ms: Option<u64>,
}

pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl NodeInfo {
    /// True when `other` carries strictly newer information for the same agent.
    pub fn supersedes(&self, other: &NodeInfo) -> bool {
        self.agent_id == other.agent_id && self.updated_at_ms > other.updated_at_ms
    }

    pub fn touch(&mut self) {
        self.updated_at_ms = unix_millis();
    }
}
