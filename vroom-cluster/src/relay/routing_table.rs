use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use vroom_core::{RoomName, ServerId};

use crate::wire::ServerMode;

/// Servers currently backing one room
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouteEntry {
    pub ingress: Vec<ServerId>,
    pub egress: Vec<ServerId>,
    pub movement: Vec<ServerId>,
}

impl RouteEntry {
    #[must_use]
    pub fn servers(&self, mode: ServerMode) -> &[ServerId] {
        match mode {
            ServerMode::Ingress => &self.ingress,
            ServerMode::Egress => &self.egress,
            ServerMode::Movement => &self.movement,
        }
    }

    #[must_use]
    pub fn references(&self, server: &ServerId) -> bool {
        ServerMode::ALL
            .into_iter()
            .any(|mode| self.servers(mode).contains(server))
    }
}

/// Room name -> backing servers, used for room-wide sends
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    rooms: Arc<DashMap<RoomName, RouteEntry>>,
}

impl RoutingTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, room: RoomName, entry: RouteEntry) {
        self.rooms.insert(room, entry);
    }

    #[must_use]
    pub fn get(&self, room: &RoomName) -> Option<RouteEntry> {
        self.rooms.get(room).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, room: &RoomName) -> Option<RouteEntry> {
        self.rooms.remove(room).map(|(_, entry)| entry)
    }

    /// Remove every room that lists `server`; returns the removed room names
    pub fn remove_referencing(&self, server: &ServerId) -> Vec<RoomName> {
        let doomed: Vec<RoomName> = self
            .rooms
            .iter()
            .filter(|entry| entry.value().references(server))
            .map(|entry| entry.key().clone())
            .collect();

        for room in &doomed {
            self.rooms.remove(room);
        }
        doomed
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

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ingress: &[&str], egress: &[&str]) -> RouteEntry {
        RouteEntry {
            ingress: ingress.iter().map(|s| ServerId::from(*s)).collect(),
            egress: egress.iter().map(|s| ServerId::from(*s)).collect(),
            movement: Vec::new(),
        }
    }

    #[test]
    fn test_remove_referencing() {
        let table = RoutingTable::new();
        table.upsert(RoomName::from("a"), entry(&["I1"], &["E1"]));
        table.upsert(RoomName::from("b"), entry(&["I2"], &["E1", "E2"]));
        table.upsert(RoomName::from("c"), entry(&["I2"], &["E2"]));

        let mut removed = table.remove_referencing(&ServerId::from("E1"));
        removed.sort();
        assert_eq!(removed, vec![RoomName::from("a"), RoomName::from("b")]);
        assert_eq!(table.len(), 1);
        assert!(table.get(&RoomName::from("c")).is_some());
    }

    #[test]
    fn test_upsert_replaces() {
        let table = RoutingTable::new();
        table.upsert(RoomName::from("a"), entry(&["I1"], &[]));
        table.upsert(RoomName::from("a"), entry(&["I1"], &["E9"]));
        assert_eq!(table.get(&RoomName::from("a")).unwrap().egress, vec![ServerId::from("E9")]);
    }
}
