//! Peer records and the peer registry

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use vroom_core::{PeerId, Region, RoomName, ServerId, TransportId};

use crate::types::PeerRole;

/// Producer a peer can own on its ingress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ProducerSlot {
    Audio,
    Video,
    ScreenAudio,
    ScreenVideo,
    Movement,
    Events,
}

/// Producer ids confirmed by the ingress. Unset means "not ready yet".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerIds {
    pub audio: Option<String>,
    pub video: Option<String>,
    pub screen_audio: Option<String>,
    pub screen_video: Option<String>,
    pub movement: Option<String>,
    pub events: Option<String>,
}

impl ProducerIds {
    fn slot_mut(&mut self, slot: ProducerSlot) -> &mut Option<String> {
        match slot {
            ProducerSlot::Audio => &mut self.audio,
            ProducerSlot::Video => &mut self.video,
            ProducerSlot::ScreenAudio => &mut self.screen_audio,
            ProducerSlot::ScreenVideo => &mut self.screen_video,
            ProducerSlot::Movement => &mut self.movement,
            ProducerSlot::Events => &mut self.events,
        }
    }

    pub fn set(&mut self, slot: ProducerSlot, id: String) {
        *self.slot_mut(slot) = Some(id);
    }

    /// Forget a closed producer wherever it is recorded
    pub fn clear(&mut self, producer_id: &str) -> bool {
        let mut cleared = false;
        for slot in [
            ProducerSlot::Audio,
            ProducerSlot::Video,
            ProducerSlot::ScreenAudio,
            ProducerSlot::ScreenVideo,
            ProducerSlot::Movement,
            ProducerSlot::Events,
        ] {
            let entry = self.slot_mut(slot);
            if entry.as_deref() == Some(producer_id) {
                *entry = None;
                cleared = true;
            }
        }
        cleared
    }
}

/// One client signaling session
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: PeerId,
    pub transport: TransportId,
    pub region: Region,
    pub room: Option<RoomName>,
    pub role: PeerRole,
    /// Set once the ingress transport is created; only counted peers occupy
    /// a slot in the room counter.
    pub counted: bool,
    pub ingress: Option<ServerId>,
    pub egress: Option<ServerId>,
    pub movement: Option<ServerId>,
    pub rtp_capabilities: Option<Value>,
    pub sctp_capabilities: Option<Value>,
    pub producers: ProducerIds,
}

impl Peer {
    #[must_use]
    pub fn new(id: PeerId, transport: TransportId, region: Region) -> Self {
        Self {
            id,
            transport,
            region,
            room: None,
            role: PeerRole::Lobby,
            counted: false,
            ingress: None,
            egress: None,
            movement: None,
            rtp_capabilities: None,
            sctp_capabilities: None,
            producers: ProducerIds::default(),
        }
    }

    #[must_use]
    pub fn is_in(&self, room: &RoomName) -> bool {
        self.room.as_ref() == Some(room)
    }

    /// Whether `server` is this peer's ingress or egress; movement is not media
    #[must_use]
    pub fn carries_media_on(&self, server: &ServerId) -> bool {
        [&self.ingress, &self.egress]
            .into_iter()
            .any(|assigned| assigned.as_ref() == Some(server))
    }

    /// Back to lobby defaults; the record survives so the peer can rejoin
    pub fn reset_membership(&mut self) {
        self.room = None;
        self.role = PeerRole::Lobby;
        self.counted = false;
        self.ingress = None;
        self.egress = None;
        self.movement = None;
        self.producers = ProducerIds::default();
    }
}

/// Peer registry indexed by peer id and by transport handle
#[derive(Debug, Default)]
pub struct PeerStore {
    peers: HashMap<PeerId, Peer>,
    by_transport: HashMap<TransportId, PeerId>,
}

impl PeerStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, peer: Peer) {
        self.by_transport
            .insert(peer.transport.clone(), peer.id.clone());
        self.peers.insert(peer.id.clone(), peer);
    }

    #[must_use]
    pub fn get(&self, id: &PeerId) -> Option<&Peer> {
        self.peers.get(id)
    }

    pub fn get_mut(&mut self, id: &PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(id)
    }

    #[must_use]
    pub fn id_for_transport(&self, transport: &TransportId) -> Option<&PeerId> {
        self.by_transport.get(transport)
    }

    #[must_use]
    pub fn by_transport(&self, transport: &TransportId) -> Option<&Peer> {
        self.by_transport
            .get(transport)
            .and_then(|id| self.peers.get(id))
    }

    pub fn by_transport_mut(&mut self, transport: &TransportId) -> Option<&mut Peer> {
        let id = self.by_transport.get(transport)?;
        self.peers.get_mut(id)
    }

    pub fn remove(&mut self, id: &PeerId) -> Option<Peer> {
        let peer = self.peers.remove(id)?;
        if self.by_transport.get(&peer.transport) == Some(id) {
            self.by_transport.remove(&peer.transport);
        }
        Some(peer)
    }

    pub fn remove_by_transport(&mut self, transport: &TransportId) -> Option<Peer> {
        let id = self.by_transport.get(transport)?.clone();
        self.remove(&id)
    }

    /// Peers currently in `room`
    pub fn in_room<'a>(&'a self, room: &'a RoomName) -> impl Iterator<Item = &'a Peer> + 'a {
        self.peers.values().filter(move |peer| peer.is_in(room))
    }

    /// Transports of peers in `room`, except `exclude`
    #[must_use]
    pub fn room_transports(&self, room: &RoomName, exclude: Option<&PeerId>) -> Vec<TransportId> {
        self.in_room(room)
            .filter(|peer| Some(&peer.id) != exclude)
            .map(|peer| peer.transport.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Peer> {
        self.peers.values_mut()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str, transport: &str) -> Peer {
        Peer::new(PeerId::from(id), TransportId::from(transport), Region::Local)
    }

    #[test]
    fn test_lookup_by_transport() {
        let mut store = PeerStore::new();
        store.insert(peer("p1", "t1"));

        assert_eq!(
            store.by_transport(&TransportId::from("t1")).unwrap().id,
            PeerId::from("p1")
        );
        assert!(store.by_transport(&TransportId::from("t2")).is_none());

        let removed = store.remove_by_transport(&TransportId::from("t1")).unwrap();
        assert_eq!(removed.id, PeerId::from("p1"));
        assert!(store.is_empty());
        assert!(store.id_for_transport(&TransportId::from("t1")).is_none());
    }

    #[test]
    fn test_room_membership() {
        let mut store = PeerStore::new();
        let room = RoomName::from("demo");
        for (id, transport) in [("a", "ta"), ("b", "tb"), ("c", "tc")] {
            let mut p = peer(id, transport);
            if id != "c" {
                p.room = Some(room.clone());
            }
            store.insert(p);
        }

        assert_eq!(store.in_room(&room).count(), 2);
        assert_eq!(
            store.room_transports(&room, Some(&PeerId::from("a"))),
            vec![TransportId::from("tb")]
        );
    }

    #[test]
    fn test_reset_membership_keeps_identity() {
        let mut p = peer("p1", "t1");
        p.room = Some(RoomName::from("demo"));
        p.role = PeerRole::Participant;
        p.counted = true;
        p.ingress = Some(ServerId::from("I1"));
        p.rtp_capabilities = Some(serde_json::json!({"codecs": []}));

        p.reset_membership();
        assert_eq!(p.id, PeerId::from("p1"));
        assert!(p.room.is_none());
        assert_eq!(p.role, PeerRole::Lobby);
        assert!(!p.counted);
        assert!(p.ingress.is_none());
        assert!(p.rtp_capabilities.is_some());
    }

    #[test]
    fn test_movement_server_is_not_media() {
        let mut p = peer("p1", "t1");
        p.ingress = Some(ServerId::from("I1"));
        p.egress = Some(ServerId::from("E1"));
        p.movement = Some(ServerId::from("M1"));

        assert!(p.carries_media_on(&ServerId::from("I1")));
        assert!(p.carries_media_on(&ServerId::from("E1")));
        assert!(!p.carries_media_on(&ServerId::from("M1")));
    }

    #[test]
    fn test_producer_clear() {
        let mut ids = ProducerIds::default();
        ids.set(ProducerSlot::Audio, "prod-1".to_string());
        ids.set(ProducerSlot::Events, "prod-2".to_string());

        assert!(ids.clear("prod-1"));
        assert!(!ids.clear("prod-1"));
        assert_eq!(ids.events.as_deref(), Some("prod-2"));
    }
}
