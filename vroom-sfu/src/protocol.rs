//! Client signaling protocol
//!
//! Client frames are JSON text of the form `{"type": ..., "message": {...}}`.
//! [`ClientCommand`] is what clients send, [`ClientSignal`] what the
//! coordination layer pushes back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use vroom_cluster::{LoadSnapshot, MediaKind};
use vroom_core::{PeerId, Region, RoomName, ServerId};

use crate::types::{PeerCounter, StreamKind};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "message", rename_all = "camelCase")]
pub enum ClientCommand {
    RequestIdentity(RequestIdentity),
    JoinRoom(RoomRequest),
    GetRoomMetrics(GetRoomMetrics),
    LeaveRoom(RoomRequest),
    CreateIngressTransport(CreateTransport),
    CreateEgressTransport(CreateTransport),
    ConnectIngressTransport(ConnectTransport),
    ConnectEgressTransport(ConnectTransport),
    ProduceMedia(ProduceMedia),
    ProduceData(Produce),
    ProduceEvents(Produce),
    GetRoomAudio(ConsumeRoom),
    GetRoomVideo(ConsumeRoom),
    GetRoomMovement(ConsumeRoom),
    GetRoomEvents(ConsumeRoom),
    MuteProducer(ProducerAction),
    ResumeProducer(ProducerAction),
    SetAudioState(StreamState),
    SetVideoState(StreamState),
    SetDesktopState(StreamState),
    HushPeers(HushPeers),
    HushUser(HushUser),
    PeerIndicators(PeerIndicators),
    ReplyPeerIndicators(ReplyPeerIndicators),
    BootPeer(BootPeer),
    DisconnectPeerWebsocket(Option<SessionRequest>),
    ProducerClose(ProducerAction),
    BeginSendingStats(Option<SessionRequest>),
    EndSendingStats(Option<SessionRequest>),
    RestartIce(RestartIce),
}

impl ClientCommand {
    /// Parse one client frame
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RequestIdentity {
    /// Edge-location code reported by the client, e.g. `ATL`
    pub region: Option<String>,
}

/// Body of the commands that act on the sending transport; it may be
/// omitted entirely
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionRequest {
    pub peer_id: Option<PeerId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRequest {
    pub peer_id: PeerId,
    pub room: RoomName,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GetRoomMetrics {
    pub rooms: Option<Vec<RoomName>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransport {
    pub peer_id: PeerId,
    #[serde(default)]
    pub sctp_options: Value,
    #[serde(default)]
    pub rtp_capabilities: Value,
    /// Overrides the peer's assigned egress
    #[serde(default)]
    pub remote_egress: Option<ServerId>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransport {
    pub peer_id: PeerId,
    pub dtls_parameters: Value,
    #[serde(default)]
    pub transport_id: Option<String>,
    #[serde(default)]
    pub remote_egress: Option<ServerId>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceMedia {
    pub peer_id: PeerId,
    pub kind: MediaKind,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub producer_options: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Produce {
    pub peer_id: PeerId,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub producer_options: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeRoom {
    pub peer_id: PeerId,
    #[serde(default)]
    pub is_spectator: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerAction {
    pub peer_id: PeerId,
    pub producer_id: String,
    #[serde(default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamState {
    pub peer_id: PeerId,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HushPeers {
    pub peer_id: PeerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HushUser {
    pub peer_id: PeerId,
    pub target: PeerId,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerIndicators {
    pub peer_id: PeerId,
    #[serde(default)]
    pub indicators: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPeerIndicators {
    pub peer_id: PeerId,
    #[serde(default)]
    pub target: Option<PeerId>,
    /// Takes precedence over the sender's own room
    #[serde(default)]
    pub room: Option<RoomName>,
    #[serde(default)]
    pub indicators: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootPeer {
    /// Peer to remove
    pub peer_id: PeerId,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartIce {
    pub peer_id: PeerId,
    pub transport_id: String,
}

/// Occupancy of one room as reported to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMetrics {
    #[serde(flatten)]
    pub counter: PeerCounter,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_emptied: Option<DateTime<Utc>>,
}

/// Pushes from the coordination layer to a client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "message", rename_all = "camelCase")]
pub enum ClientSignal {
    Identity {
        id: PeerId,
        region: Region,
    },
    PeerCount {
        rooms: BTreeMap<RoomName, RoomMetrics>,
    },
    #[serde(rename_all = "camelCase")]
    PeerDisconnect {
        peer_id: PeerId,
    },
    #[serde(rename_all = "camelCase")]
    SetConsumerState {
        peer_id: PeerId,
        kind: StreamKind,
        enabled: bool,
    },
    Hushed {
        by: PeerId,
    },
    #[serde(rename_all = "camelCase")]
    PeerIndicators {
        peer_id: PeerId,
        indicators: Value,
    },
    #[serde(rename_all = "camelCase")]
    PeerIndicatorsReply {
        peer_id: PeerId,
        indicators: Value,
    },
    BootUser {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Stats {
        rooms: BTreeMap<RoomName, PeerCounter>,
        #[serde(flatten)]
        servers: LoadSnapshot,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_join_room() {
        let cmd =
            ClientCommand::parse(r#"{"type":"joinRoom","message":{"peerId":"p1","room":"demo"}}"#)
                .unwrap();
        assert_eq!(
            cmd,
            ClientCommand::JoinRoom(RoomRequest {
                peer_id: PeerId::from("p1"),
                room: RoomName::from("demo"),
            })
        );
    }

    #[test]
    fn test_parse_session_commands_without_message() {
        assert_eq!(
            ClientCommand::parse(r#"{"type":"beginSendingStats"}"#).unwrap(),
            ClientCommand::BeginSendingStats(None)
        );
        assert_eq!(
            ClientCommand::parse(r#"{"type":"endSendingStats"}"#).unwrap(),
            ClientCommand::EndSendingStats(None)
        );
        assert_eq!(
            ClientCommand::parse(r#"{"type":"disconnectPeerWebsocket"}"#).unwrap(),
            ClientCommand::DisconnectPeerWebsocket(None)
        );
    }

    #[test]
    fn test_parse_session_commands_with_message() {
        assert_eq!(
            ClientCommand::parse(r#"{"type":"disconnectPeerWebsocket","message":{"peerId":"p1"}}"#)
                .unwrap(),
            ClientCommand::DisconnectPeerWebsocket(Some(SessionRequest {
                peer_id: Some(PeerId::from("p1")),
            }))
        );
        assert_eq!(
            ClientCommand::parse(r#"{"type":"beginSendingStats","message":{}}"#).unwrap(),
            ClientCommand::BeginSendingStats(Some(SessionRequest::default()))
        );
        assert_eq!(
            ClientCommand::parse(r#"{"type":"endSendingStats","message":{"peerId":"p1"}}"#)
                .unwrap(),
            ClientCommand::EndSendingStats(Some(SessionRequest {
                peer_id: Some(PeerId::from("p1")),
            }))
        );
    }

    #[test]
    fn test_parse_optional_fields() {
        let cmd = ClientCommand::parse(r#"{"type":"getRoomMetrics","message":{}}"#).unwrap();
        assert_eq!(cmd, ClientCommand::GetRoomMetrics(GetRoomMetrics { rooms: None }));

        let cmd = ClientCommand::parse(r#"{"type":"requestIdentity","message":{"region":"ATL"}}"#)
            .unwrap();
        assert_eq!(
            cmd,
            ClientCommand::RequestIdentity(RequestIdentity {
                region: Some("ATL".to_string())
            })
        );

        let cmd = ClientCommand::parse(
            r#"{"type":"produceMedia","message":{"peerId":"p","kind":"video"}}"#,
        )
        .unwrap();
        let ClientCommand::ProduceMedia(produce) = cmd else {
            panic!("expected produceMedia");
        };
        assert_eq!(produce.kind, MediaKind::Video);
        assert!(produce.label.is_none());
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(ClientCommand::parse(r#"{"type":"launchRockets","message":{}}"#).is_err());
        assert!(ClientCommand::parse("not json").is_err());
    }

    #[test]
    fn test_signal_shape() {
        let signal = ClientSignal::Identity {
            id: PeerId::from("p1"),
            region: Region::UsEast1,
        };
        assert_eq!(
            serde_json::to_value(&signal).unwrap(),
            json!({"type": "identity", "message": {"id": "p1", "region": "us-east-1"}})
        );

        let signal = ClientSignal::PeerDisconnect {
            peer_id: PeerId::from("p2"),
        };
        assert_eq!(
            serde_json::to_value(&signal).unwrap(),
            json!({"type": "peerDisconnect", "message": {"peerId": "p2"}})
        );
    }

    #[test]
    fn test_peer_count_flattens_counter() {
        let mut rooms = BTreeMap::new();
        rooms.insert(
            RoomName::from("demo"),
            RoomMetrics {
                counter: PeerCounter {
                    lobby_count: 1,
                    peer_count: 1,
                    ..PeerCounter::default()
                },
                last_emptied: None,
            },
        );
        let value = serde_json::to_value(ClientSignal::PeerCount { rooms }).unwrap();
        assert_eq!(value["message"]["rooms"]["demo"]["lobbyCount"], 1);
        assert!(value["message"]["rooms"]["demo"].get("lastEmptied").is_none());
    }
}
