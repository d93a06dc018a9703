//! Room topology and occupancy stores

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use vroom_cluster::RouteEntry;
use vroom_core::{RoomName, ServerId};

use crate::types::PeerCounter;

/// Media servers backing a room, each list deduplicated
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Room {
    pub ingress: Vec<ServerId>,
    pub egress: Vec<ServerId>,
    pub movement: Vec<ServerId>,
}

fn add_unique(servers: &mut Vec<ServerId>, server: ServerId) -> bool {
    if servers.contains(&server) {
        return false;
    }
    servers.push(server);
    true
}

impl Room {
    /// Returns true when the server is new to the room
    pub fn add_ingress(&mut self, server: ServerId) -> bool {
        add_unique(&mut self.ingress, server)
    }

    pub fn add_egress(&mut self, server: ServerId) -> bool {
        add_unique(&mut self.egress, server)
    }

    pub fn add_movement(&mut self, server: ServerId) -> bool {
        add_unique(&mut self.movement, server)
    }

    #[must_use]
    pub fn references(&self, server: &ServerId) -> bool {
        self.ingress.contains(server)
            || self.egress.contains(server)
            || self.movement.contains(server)
    }

    #[must_use]
    pub fn route_entry(&self) -> RouteEntry {
        RouteEntry {
            ingress: self.ingress.clone(),
            egress: self.egress.clone(),
            movement: self.movement.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct RoomStore {
    rooms: HashMap<RoomName, Room>,
}

impl RoomStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &RoomName) -> Option<&Room> {
        self.rooms.get(name)
    }

    pub fn get_or_create(&mut self, name: RoomName) -> &mut Room {
        self.rooms.entry(name).or_default()
    }

    pub fn remove(&mut self, name: &RoomName) -> Option<Room> {
        self.rooms.remove(name)
    }

    /// Rooms listing `server` in any role
    #[must_use]
    pub fn referencing(&self, server: &ServerId) -> Vec<RoomName> {
        self.rooms
            .iter()
            .filter(|(_, room)| room.references(server))
            .map(|(name, _)| name.clone())
            .collect()
    }

    #[must_use]
    pub fn contains(&self, name: &RoomName) -> bool {
        self.rooms.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

/// Occupancy counters keyed by room name, independent of [`RoomStore`]
#[derive(Debug, Default)]
pub struct CounterStore {
    counters: HashMap<RoomName, PeerCounter>,
}

impl CounterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, room: &RoomName) -> Option<&PeerCounter> {
        self.counters.get(room)
    }

    pub fn get_mut(&mut self, room: &RoomName) -> Option<&mut PeerCounter> {
        self.counters.get_mut(room)
    }

    pub fn entry(&mut self, room: RoomName) -> &mut PeerCounter {
        self.counters.entry(room).or_default()
    }

    pub fn remove(&mut self, room: &RoomName) -> Option<PeerCounter> {
        self.counters.remove(room)
    }

    /// Counters for the named rooms, or for every counted room when `rooms`
    /// is `None`. Unknown names are skipped.
    #[must_use]
    pub fn snapshot(&self, rooms: Option<&[RoomName]>) -> BTreeMap<RoomName, PeerCounter> {
        match rooms {
            Some(names) => names
                .iter()
                .filter_map(|name| self.counters.get(name).map(|c| (name.clone(), *c)))
                .collect(),
            None => self
                .counters
                .iter()
                .map(|(name, counter)| (name.clone(), *counter))
                .collect(),
        }
    }

    #[must_use]
    pub fn contains(&self, room: &RoomName) -> bool {
        self.counters.contains_key(room)
    }
}
