//! Message framing on top of a byte stream. UDP associations and ICMP pumps
//! carry discrete messages over their mesh streams (and, for ICMP, over the
//! client TCP connection); each message is u16-length-prefixed.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use metroo_core::{Error, Result};
use metroo_link::stream::StreamReadHalf;

pub const MAX_MESSAGE: usize = 65535;

/// Reassembles length-prefixed messages from stream chunks.
pub struct MessageReader {
    inner: StreamReadHalf,
    buf: BytesMut,
}

impl MessageReader {
    pub fn new(inner: StreamReadHalf) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
        }
    }

    /// Next whole message; `None` on orderly end-of-stream.
    pub async fn next(&mut self) -> Result<Option<Bytes>> {
        loop {
            if self.buf.len() >= 2 {
                let len = u16::from_be_bytes([self.buf[0], self.buf[1]]) as usize;
                if self.buf.len() >= 2 + len {
                    self.buf.advance(2);
                    return Ok(Some(self.buf.split_to(len).freeze()));
                }
            }
            match self.inner.read().await? {
                Some(chunk) => self.buf.extend_from_slice(&chunk),
                None => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    return Err(Error::protocol("stream ended mid-message"));
                }
            }
        }
    }
}

/// Frame one message for the wire.
pub fn frame_message(payload: &[u8]) -> Result<Bytes> {
    if payload.len() > MAX_MESSAGE {
        return Err(Error::protocol("message exceeds 64 KiB"));
    }
    let mut out = BytesMut::with_capacity(2 + payload.len());
    out.put_u16(payload.len() as u16);
    out.put_slice(payload);
    Ok(out.freeze())
}

/// ICMP pump message types, shared by the SOCKS5 front-end and the exit.
pub const ICMP_MSG_ECHO: u8 = 0;
pub const ICMP_MSG_REPLY: u8 = 1;
pub const ICMP_MSG_ERROR: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcmpMsg {
    pub msg_type: u8,
    pub ident: u16,
    pub seq: u16,
    pub payload: Bytes,
}

impl IcmpMsg {
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(5 + self.payload.len());
        out.put_u8(self.msg_type);
        out.put_u16(self.ident);
        out.put_u16(self.seq);
        out.put_slice(&self.payload);
        out.freeze()
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < 5 {
            return Err(Error::protocol("icmp message too short"));
        }
        Ok(Self {
            msg_type: raw[0],
            ident: u16::from_be_bytes([raw[1], raw[2]]),
            seq: u16::from_be_bytes([raw[3], raw[4]]),
            payload: Bytes::copy_from_slice(&raw[5..]),
        })
    }

    pub fn error(ident: u16, seq: u16, text: &str) -> Self {
        Self {
            msg_type: ICMP_MSG_ERROR,
            ident,
            seq,
            payload: Bytes::copy_from_slice(text.as_bytes()),
        }
    }
}
