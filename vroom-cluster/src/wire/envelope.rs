//! Envelope and message types exchanged with media servers

use serde::{Deserialize, Serialize};
use serde_json::Value;
use vroom_core::{PeerId, RoomName, ServerId, TransportId};

use crate::error::Result;

/// Role a media server process plays in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    Ingress,
    Egress,
    Movement,
}

impl ServerMode {
    pub const ALL: [Self; 3] = [Self::Ingress, Self::Egress, Self::Movement];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ingress => "ingress",
            Self::Egress => "egress",
            Self::Movement => "movement",
        }
    }
}

impl std::fmt::Display for ServerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// Outbound frame addressed to one media server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Client transport the command acts for; replies are routed back by it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wsid: Option<TransportId>,
    /// Target server, filled in by the router at send time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<ServerId>,
    pub message: ServerCommand,
}

impl Envelope {
    #[must_use]
    pub const fn new(message: ServerCommand) -> Self {
        Self {
            wsid: None,
            node: None,
            message,
        }
    }

    #[must_use]
    pub const fn for_transport(wsid: TransportId, message: ServerCommand) -> Self {
        Self {
            wsid: Some(wsid),
            node: None,
            message,
        }
    }
}

/// Commands sent from the coordination process to media servers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerCommand {
    JoinRoom(JoinRoom),
    CreateIngressTransport(TransportRequest),
    CreateEgressTransport(TransportRequest),
    ConnectIngressTransport(TransportConnect),
    ConnectEgressTransport(TransportConnect),
    CreateAudioProducer(ProducerRequest),
    CreateVideoProducer(ProducerRequest),
    CreateMovementProducer(ProducerRequest),
    CreateEventProducer(ProducerRequest),
    RequestAllAudio(ConsumeAll),
    RequestAllVideo(ConsumeAll),
    RequestAllMovement(ConsumeAll),
    RequestAllEvents(ConsumeAll),
    ConsumeAudio(ConsumeProducer),
    ConsumeVideo(ConsumeProducer),
    ConsumeMovement(ConsumeProducer),
    ConsumeEvents(ConsumeProducer),
    PauseProducer(ProducerControl),
    ResumeProducer(ProducerControl),
    PauseConsumer(ConsumerControl),
    ResumeConsumer(ConsumerControl),
    ProducerClose(ProducerControl),
    RestartIce(RestartIce),
    DisconnectTransport(DisconnectTransport),
    CloseRoom(CloseRoom),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    pub room: RoomName,
    pub peer_id: PeerId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportRequest {
    pub peer_id: PeerId,
    pub room: RoomName,
    #[serde(default)]
    pub sctp_capabilities: Value,
    #[serde(default)]
    pub rtp_capabilities: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConnect {
    pub peer_id: PeerId,
    pub room: RoomName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_id: Option<String>,
    pub dtls_parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerRequest {
    pub peer_id: PeerId,
    pub room: RoomName,
    /// Egress that will receive the relayed producer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress: Option<ServerId>,
    #[serde(default)]
    pub rtp_capabilities: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub producer_options: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeAll {
    pub peer_id: PeerId,
    pub room: RoomName,
    #[serde(default)]
    pub rtp_capabilities: Value,
    pub producer_peer_ids: Vec<PeerId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeProducer {
    /// Consuming peer
    pub peer_id: PeerId,
    pub producer_peer_id: PeerId,
    pub room: RoomName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtp_capabilities: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerControl {
    pub peer_id: PeerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomName>,
    pub producer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerControl {
    /// Peer whose consumers are paused or resumed
    pub peer_id: PeerId,
    pub room: RoomName,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartIce {
    pub peer_id: PeerId,
    pub transport_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectTransport {
    pub peer_id: PeerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomName>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseRoom {
    pub room: RoomName,
}

/// Frame received from a media server, before message interpretation
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
    #[serde(default)]
    pub wsid: Option<TransportId>,
    #[serde(default)]
    pub node: Option<ServerId>,
    #[serde(default)]
    pub message: Option<RawMessage>,
    /// Reply for a client, forwarded without interpretation
    #[serde(default)]
    pub communication: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

/// Messages a media server can send to the router
#[derive(Debug, Clone, PartialEq)]
pub enum MediaServerEvent {
    RegisterMediaServer(RegisterMediaServer),
    RegisterMovementServer(RegisterMovementServer),
    StorePipeRelay(StorePipeRelay),
    ConnectPipeRelay(ConnectPipeRelay),
    CreateRelayProducer(CreateRelayProducer),
    CreatedRelayProducer(CreatedRelayProducer),
    ServerLoad(ServerLoad),
    /// Recognized envelope, unhandled type
    Other(String),
}

impl MediaServerEvent {
    /// Interpret a raw message; unknown types become `Other`, known types
    /// with malformed data are errors.
    pub fn from_raw(raw: RawMessage) -> Result<Self> {
        let RawMessage { kind, data } = raw;
        let event = match kind.as_str() {
            "registerMediaServer" => Self::RegisterMediaServer(serde_json::from_value(data)?),
            "registerMovementServer" => Self::RegisterMovementServer(serde_json::from_value(data)?),
            "storePipeRelay" => Self::StorePipeRelay(serde_json::from_value(data)?),
            "connectPipeRelay" => Self::ConnectPipeRelay(serde_json::from_value(data)?),
            "createRelayProducer" => Self::CreateRelayProducer(serde_json::from_value(data)?),
            "createdRelayProducer" => Self::CreatedRelayProducer(serde_json::from_value(data)?),
            "serverLoad" => Self::ServerLoad(serde_json::from_value(data)?),
            _ => Self::Other(kind),
        };
        Ok(event)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegisterMediaServer {
    pub mode: ServerMode,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegisterMovementServer {
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorePipeRelay {
    pub egress: ServerId,
    pub ingress_route: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectPipeRelay {
    pub ingress_route: String,
    pub egress_route: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreateRelayProducer {
    pub egress: ServerId,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRelayProducer {
    pub peer_id: PeerId,
    #[serde(default)]
    pub kind: Option<MediaKind>,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerLoad {
    pub load: f64,
}
