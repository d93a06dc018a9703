//! Media-server wire protocol
//!
//! Every frame is a 4-byte big-endian length followed by a UTF-8 JSON
//! envelope `{wsid, node, message?, communication?}`.

pub mod codec;
pub mod envelope;

pub use codec::{decode_envelope, encode_envelope, frame_codec, LENGTH_FIELD_BYTES};
pub use envelope::{
    CloseRoom, ConnectPipeRelay, ConsumeAll, ConsumeProducer, ConsumerControl,
    CreateRelayProducer, CreatedRelayProducer, DisconnectTransport, Envelope, InboundEnvelope,
    JoinRoom, MediaKind, MediaServerEvent, ProducerControl, ProducerRequest, RawMessage,
    RegisterMediaServer, RegisterMovementServer, RestartIce, ServerCommand, ServerLoad,
    ServerMode, StorePipeRelay, TransportConnect, TransportRequest,
};
