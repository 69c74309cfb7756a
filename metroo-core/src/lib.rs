#![forbid(unsafe_code)]

//! Muti Metroo core: typed identifiers, the closed error set shared across
//! the workspace, configuration loading, and the node metadata that gets
//! flooded through the mesh.

pub mod config;
pub mod error;
pub mod node_info;
pub mod reach;
pub mod types;

pub use config::Config;
pub use error::{DialFailure, Error, HandshakeFailure, Result};
pub use node_info::NodeInfo;
pub use reach::{Cidr, DomainPattern, RouteKey};
pub use types::{AgentId, DestAddr, ResetReason, StreamKind, TransportKind};
