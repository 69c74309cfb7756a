#![forbid(unsafe_code)]

//! Muti Metroo link layer.
//!
//! Everything that happens between two adjacent agents: the binary frame
//! codec, the authenticated handshake, the link session (keepalives, RTT,
//! single-writer send queue), and the stream multiplexer with per-stream
//! flow control and half-close. Routing decisions and real sockets live a
//! layer up, in the daemon.

pub mod codec;
pub mod conn;
pub mod frame;
pub mod handshake;
mod mux;
pub mod payload;
mod sink;
pub mod stream;

pub mod peer;

pub use conn::{Connection, FrameReader, FrameWriter};
pub use frame::{Frame, FrameType, DATA_CHUNK, MAX_FRAME_LEN};
pub use handshake::{handshake, HandshakeConfig, PeerInfo};
pub use mux::MuxConfig;
pub use peer::{LinkConfig, LinkEvent, LinkRole, LinkState, PeerLink};
pub use stream::{Stream, StreamReadHalf, StreamState, StreamWriteHalf};
