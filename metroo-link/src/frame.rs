//! Wire frame shape: `len:u32 | type:u8 | flags:u8 | stream_id:u64 | payload`.
//! `len` covers everything after itself. Big-endian throughout, no
//! variable-length integers.

use bytes::Bytes;
use metroo_core::{Error, Result};

/// Maximum value of the length field (type byte through end of payload).
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Fixed part after the length prefix: type + flags + stream id.
pub const FRAME_HEADER_LEN: usize = 1 + 1 + 8;

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - FRAME_HEADER_LEN;

/// Chunk size for STREAM_DATA; small enough that a window refill keeps
/// several frames in flight.
pub const DATA_CHUNK: usize = 64 * 1024;

/// OPEN/OPEN_ACK carries a trailing 32-byte X25519 ephemeral public key.
pub const FLAG_E2E: u8 = 0x01;
/// NODE_INFO / CONTROL body is sealed under the management key.
pub const FLAG_SEALED: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    PeerHello = 0x01,
    PeerWelcome = 0x02,
    Keepalive = 0x03,
    KeepaliveAck = 0x04,
    StreamOpen = 0x10,
    StreamOpenAck = 0x11,
    StreamData = 0x12,
    StreamEof = 0x13,
    StreamReset = 0x14,
    StreamWindow = 0x15,
    RouteAdv = 0x20,
    RouteWithdraw = 0x21,
    NodeInfo = 0x22,
    ControlReq = 0x30,
    ControlRsp = 0x31,
}

impl FrameType {
    pub fn from_wire(v: u8) -> Result<Self> {
        Ok(match v {
            0x01 => FrameType::PeerHello,
            0x02 => FrameType::PeerWelcome,
            0x03 => FrameType::Keepalive,
            0x04 => FrameType::KeepaliveAck,
            0x10 => FrameType::StreamOpen,
            0x11 => FrameType::StreamOpenAck,
            0x12 => FrameType::StreamData,
            0x13 => FrameType::StreamEof,
            0x14 => FrameType::StreamReset,
            0x15 => FrameType::StreamWindow,
            0x20 => FrameType::RouteAdv,
            0x21 => FrameType::RouteWithdraw,
            0x22 => FrameType::NodeInfo,
            0x30 => FrameType::ControlReq,
            0x31 => FrameType::ControlRsp,
            other => return Err(Error::protocol(format!("unknown frame type {other:#04x}"))),
        })
    }

    /// Whether this frame is addressed to a stream and should be dispatched
    /// through the multiplexer.
    pub fn is_stream_frame(self) -> bool {
        matches!(
            self,
            FrameType::StreamOpen
                | FrameType::StreamOpenAck
                | FrameType::StreamData
                | FrameType::StreamEof
                | FrameType::StreamReset
                | FrameType::StreamWindow
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub flags: u8,
    pub stream_id: u64,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(frame_type: FrameType, stream_id: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            frame_type,
            flags: 0,
            stream_id,
            payload: payload.into(),
        }
    }

    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    /// Bytes this frame occupies on the wire, length prefix included. This is
    /// what counts against the link send-queue byte budget.
    pub fn wire_size(&self) -> usize {
        4 + FRAME_HEADER_LEN + self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_type_round_trip() {
        for t in [
            FrameType::PeerHello,
            FrameType::PeerWelcome,
            FrameType::Keepalive,
            FrameType::KeepaliveAck,
            FrameType::StreamOpen,
            FrameType::StreamOpenAck,
            FrameType::StreamData,
            FrameType::StreamEof,
            FrameType::StreamReset,
            FrameType::StreamWindow,
            FrameType::RouteAdv,
            FrameType::RouteWithdraw,
            FrameType::NodeInfo,
            FrameType::ControlReq,
            FrameType::ControlRsp,
        ] {
            assert_eq!(FrameType::from_wire(t as u8).unwrap(), t);
        }
        assert!(FrameType::from_wire(0xff).is_err());
        assert!(FrameType::from_wire(0x00).is_err());
    }

    #[test]
    fn stream_frame_classification() {
        assert!(FrameType::StreamData.is_stream_frame());
        assert!(FrameType::StreamOpen.is_stream_frame());
        assert!(!FrameType::RouteAdv.is_stream_frame());
        assert!(!FrameType::Keepalive.is_stream_frame());
    }

    #[test]
    fn wire_size_accounts_for_prefix() {
        let f = Frame::new(FrameType::StreamData, 3, vec![0u8; 100]);
        assert_eq!(f.wire_size(), 4 + 10 + 100);
    }
}
