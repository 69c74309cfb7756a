#![forbid(unsafe_code)]

//! Muti Metroo agent daemon.
//!
//! Wires the link, routing, and crypto layers into a running agent: the
//! supervisor owns peer lifetimes and timers, the forwarder relays frames for
//! streams that pass through, the SOCKS5 front-end feeds client traffic into
//! the mesh, and the exit dialer performs the real outbound I/O.

pub mod control;
pub mod exit;
pub mod forwarder;
pub mod http_api;
pub mod msg;
pub mod relay;
pub mod socks5;
pub mod supervisor;

pub use supervisor::{StreamHandler, Supervisor};
