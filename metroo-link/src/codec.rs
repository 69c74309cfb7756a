//! Frame encode/decode. The decoder is written with `nom` over a complete
//! buffer; `FrameCodec` adapts it to `tokio_util`'s incremental interface for
//! byte-oriented transports.

use crate::frame::{Frame, FrameType, FRAME_HEADER_LEN, MAX_FRAME_LEN};
use bytes::{BufMut, Bytes, BytesMut};
use metroo_core::{Error, Result};
use nom::{
    bytes::complete::take,
    number::complete::{be_u32, be_u64, u8 as nom_u8},
    IResult,
};
use tokio_util::codec::{Decoder, Encoder};

/// Append one frame to `dst`.
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    let len = FRAME_HEADER_LEN + frame.payload.len();
    if len > MAX_FRAME_LEN {
        return Err(Error::protocol(format!(
            "frame of {len} bytes exceeds the 1 MiB cap"
        )));
    }
    dst.reserve(4 + len);
    dst.put_u32(len as u32);
    dst.put_u8(frame.frame_type as u8);
    dst.put_u8(frame.flags);
    dst.put_u64(frame.stream_id);
    dst.put_slice(&frame.payload);
    Ok(())
}

pub fn encode_frame_to_bytes(frame: &Frame) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    encode_frame(frame, &mut buf)?;
    Ok(buf.freeze())
}

fn parse_frame(input: &[u8]) -> IResult<&[u8], (u8, u8, u64, &[u8])> {
    let (input, len) = be_u32(input)?;
    let (input, body) = take(len)(input)?;
    let (body, frame_type) = nom_u8(body)?;
    let (body, flags) = nom_u8(body)?;
    let (body, stream_id) = be_u64(body)?;
    Ok((input, (frame_type, flags, stream_id, body)))
}

/// Decode exactly one frame from a complete buffer.
pub fn decode_frame(input: &[u8]) -> Result<(Frame, usize)> {
    if input.len() >= 4 {
        let len = u32::from_be_bytes([input[0], input[1], input[2], input[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(Error::protocol(format!(
                "frame length {len} exceeds the 1 MiB cap"
            )));
        }
        if len < FRAME_HEADER_LEN {
            return Err(Error::protocol(format!("frame length {len} below header")));
        }
    }
    let (rest, (ty, flags, stream_id, payload)) =
        parse_frame(input).map_err(|_| Error::protocol("truncated frame"))?;
    let frame = Frame {
        frame_type: FrameType::from_wire(ty)?,
        flags,
        stream_id,
        payload: Bytes::copy_from_slice(payload),
    };
    Ok((frame, input.len() - rest.len()))
}

/// Incremental codec for `tokio_util::codec::Framed`.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(Error::protocol(format!(
                "frame length {len} exceeds the 1 MiB cap"
            )));
        }
        if len < FRAME_HEADER_LEN {
            return Err(Error::protocol(format!("frame length {len} below header")));
        }
        if src.len() < 4 + len {
            src.reserve(4 + len - src.len());
            return Ok(None);
        }
        let whole = src.split_to(4 + len);
        let (frame, consumed) = decode_frame(&whole)?;
        debug_assert_eq!(consumed, whole.len());
        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        encode_frame(&item, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn encode_decode_round_trip() {
        let frame = Frame::new(FrameType::StreamData, 42, &b"payload"[..]).with_flags(0x01);
        let wire = encode_frame_to_bytes(&frame).unwrap();
        let (back, consumed) = decode_frame(&wire).unwrap();
        assert_eq!(back, frame);
        assert_eq!(consumed, wire.len());
    }

    #[test]
    fn empty_payload_frame() {
        let frame = Frame::new(FrameType::StreamEof, 7, Bytes::new());
        let wire = encode_frame_to_bytes(&frame).unwrap();
        assert_eq!(wire.len(), 4 + FRAME_HEADER_LEN);
        let (back, _) = decode_frame(&wire).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn oversize_frame_rejected_on_encode() {
        let frame = Frame::new(FrameType::StreamData, 1, vec![0u8; MAX_FRAME_LEN]);
        assert!(encode_frame_to_bytes(&frame).is_err());
    }

    #[test]
    fn oversize_length_rejected_on_decode() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_LEN + 1) as u32);
        buf.put_bytes(0, 32);
        assert!(decode_frame(&buf).is_err());
    }

    #[test]
    fn undersize_length_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(4);
        buf.put_bytes(0, 4);
        assert!(decode_frame(&buf).is_err());
    }

    #[test]
    fn unknown_type_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(FRAME_HEADER_LEN as u32);
        buf.put_u8(0x7f);
        buf.put_u8(0);
        buf.put_u64(0);
        assert!(decode_frame(&buf).is_err());
    }

    #[test]
    fn incremental_decoder_waits_for_full_frame() {
        let frame = Frame::new(FrameType::StreamData, 9, vec![3u8; 64]);
        let wire = encode_frame_to_bytes(&frame).unwrap();
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&wire[..10]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&wire[10..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(frame));
        assert!(buf.is_empty());
    }

    #[test]
    fn incremental_decoder_handles_back_to_back_frames() {
        let a = Frame::new(FrameType::Keepalive, 0, vec![1u8; 16]);
        let b = Frame::new(FrameType::StreamEof, 5, Bytes::new());
        let mut buf = BytesMut::new();
        encode_frame(&a, &mut buf).unwrap();
        encode_frame(&b, &mut buf).unwrap();
        let mut codec = FrameCodec;
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(a));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(b));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    proptest! {
        #[test]
        fn round_trip_random_payloads(
            stream_id in any::<u64>(),
            flags in any::<u8>(),
            payload in proptest::collection::vec(any::<u8>(), 0..2048),
        ) {
            let frame = Frame::new(FrameType::StreamData, stream_id, payload).with_flags(flags);
            let wire = encode_frame_to_bytes(&frame)?;
            let (back, consumed) = decode_frame(&wire)?;
            prop_assert_eq!(back, frame);
            prop_assert_eq!(consumed, wire.len());
        }
    }
}
