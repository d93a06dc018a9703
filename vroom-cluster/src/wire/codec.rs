use bytes::Bytes;
use tokio_util::codec::LengthDelimitedCodec;

use super::envelope::{Envelope, InboundEnvelope};
use crate::error::Result;

/// Width of the length prefix in front of every frame
pub const LENGTH_FIELD_BYTES: usize = 4;

/// Codec for the media-server stream: `u32` big-endian length, then payload.
///
/// Frames above `max_frame_bytes` fail the stream; JSON problems inside a
/// well-delimited frame are handled per message by the router instead.
#[must_use]
pub fn frame_codec(max_frame_bytes: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(LENGTH_FIELD_BYTES)
        .big_endian()
        .max_frame_length(max_frame_bytes)
        .new_codec()
}

/// Serialize an outbound envelope into a frame payload (without prefix)
pub fn encode_envelope(envelope: &Envelope) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(envelope)?))
}

/// Parse a frame payload into an inbound envelope
pub fn decode_envelope(payload: &[u8]) -> Result<InboundEnvelope> {
    Ok(serde_json::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::envelope::{CloseRoom, ServerCommand};
    use bytes::{BufMut, BytesMut};
    use tokio_util::codec::{Decoder, Encoder};
    use vroom_core::{RoomName, ServerId};

    #[test]
    fn test_length_prefix_is_big_endian() {
        let mut codec = frame_codec(1024);
        let mut dst = BytesMut::new();
        codec.encode(Bytes::from_static(b"{\"a\":1}"), &mut dst).unwrap();

        assert_eq!(&dst[..4], &[0, 0, 0, 7]);
        assert_eq!(&dst[4..], b"{\"a\":1}");
    }

    #[test]
    fn test_decoder_waits_for_full_frame() {
        let mut codec = frame_codec(1024);
        let mut src = BytesMut::new();
        src.put_u32(10);
        src.extend_from_slice(b"{\"wsid\"");
        assert!(codec.decode(&mut src).unwrap().is_none());

        src.extend_from_slice(b":1}");
        let frame = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(&frame[..], b"{\"wsid\":1}");
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let mut codec = frame_codec(16);
        let mut src = BytesMut::new();
        src.put_u32(1024);
        src.extend_from_slice(&[b'x'; 32]);
        assert!(codec.decode(&mut src).is_err());
    }

    #[test]
    fn test_encode_envelope_shape() {
        let envelope = Envelope {
            wsid: None,
            node: Some(ServerId::from("egress-1")),
            message: ServerCommand::CloseRoom(CloseRoom {
                room: RoomName::from("demo"),
            }),
        };
        let bytes = encode_envelope(&envelope).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["node"], "egress-1");
        assert_eq!(value["message"]["type"], "closeRoom");
        assert_eq!(value["message"]["data"]["room"], "demo");
        assert!(value.get("wsid").is_none());
    }

    #[test]
    fn test_decode_rejects_non_json() {
        assert!(decode_envelope(b"\x00\x01not json").is_err());
    }
}
