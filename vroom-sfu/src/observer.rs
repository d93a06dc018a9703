//! Room activity hooks

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::info;
use vroom_core::RoomName;

/// Notified when room occupancy crosses interesting thresholds
pub trait RoomObserver: Send + Sync {
    /// The last participant of `room` disconnected
    fn on_last_peer_disconnect(&self, room: &RoomName);

    fn last_emptied(&self, _room: &RoomName) -> Option<DateTime<Utc>> {
        None
    }
}

/// Records when each room last lost its final participant
#[derive(Debug, Default)]
pub struct RoomActivityLog {
    emptied: DashMap<RoomName, DateTime<Utc>>,
}

impl RoomActivityLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoomObserver for RoomActivityLog {
    fn on_last_peer_disconnect(&self, room: &RoomName) {
        let now = Utc::now();
        self.emptied.insert(room.clone(), now);
        info!(room = %room, at = %now, "Last participant left room");
    }

    fn last_emptied(&self, room: &RoomName) -> Option<DateTime<Utc>> {
        self.emptied.get(room).map(|at| *at.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_last_emptied() {
        let log = RoomActivityLog::new();
        let room = RoomName::from("demo");
        assert!(log.last_emptied(&room).is_none());

        let before = Utc::now();
        log.on_last_peer_disconnect(&room);
        assert!(log.last_emptied(&room).unwrap() >= before);
    }
}
