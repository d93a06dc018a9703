//! Common types used throughout the peer coordination layer

use serde::{Deserialize, Serialize};
use vroom_cluster::MediaKind;

/// Counting role of a peer inside its room. A peer holds exactly one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    #[default]
    Lobby,
    Participant,
    Spectator,
}

/// Per-room occupancy counters.
///
/// Decrements are floored at zero: several cleanup paths may race to
/// release the same slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerCounter {
    pub lobby_count: u32,
    pub participant_count: u32,
    pub spectator_count: u32,
    pub peer_count: u32,
}

impl PeerCounter {
    fn slot(&mut self, role: PeerRole) -> &mut u32 {
        match role {
            PeerRole::Lobby => &mut self.lobby_count,
            PeerRole::Participant => &mut self.participant_count,
            PeerRole::Spectator => &mut self.spectator_count,
        }
    }

    #[must_use]
    pub const fn count(&self, role: PeerRole) -> u32 {
        match role {
            PeerRole::Lobby => self.lobby_count,
            PeerRole::Participant => self.participant_count,
            PeerRole::Spectator => self.spectator_count,
        }
    }

    /// A peer took its first slot in the room
    pub fn admit(&mut self, role: PeerRole) {
        *self.slot(role) += 1;
        self.peer_count += 1;
    }

    /// A counted peer left the room
    pub fn release(&mut self, role: PeerRole) {
        let slot = self.slot(role);
        *slot = slot.saturating_sub(1);
        self.peer_count = self.peer_count.saturating_sub(1);
    }

    /// Move one peer between role counters
    pub fn transition(&mut self, from: PeerRole, to: PeerRole) {
        if from == to {
            return;
        }
        let slot = self.slot(from);
        *slot = slot.saturating_sub(1);
        *self.slot(to) += 1;
    }

    /// No participant and no lobby occupant remains
    #[must_use]
    pub const fn is_vacant(&self) -> bool {
        self.participant_count == 0 && self.lobby_count == 0
    }
}

/// Producer/consumer channel a peer can publish or subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaChannel {
    Audio,
    Video,
    Movement,
    Events,
}

/// Label an event producer is created with; its consumers include the producer
pub const FRAME_EVENTS_LABEL: &str = "FrameEvents";

impl MediaChannel {
    /// Classify a relay producer the egress reported.
    ///
    /// Data producers carry no media kind: the `FrameEvents` label marks the
    /// event channel, anything else is movement.
    #[must_use]
    pub fn for_relay(kind: Option<MediaKind>, label: Option<&str>) -> Self {
        match (kind, label) {
            (Some(MediaKind::Audio), _) => Self::Audio,
            (Some(MediaKind::Video), _) => Self::Video,
            (None, Some(FRAME_EVENTS_LABEL)) => Self::Events,
            (None, _) => Self::Movement,
        }
    }

    #[must_use]
    pub const fn is_media(self) -> bool {
        matches!(self, Self::Audio | Self::Video)
    }

    /// Whether the producing peer also receives its own stream
    #[must_use]
    pub const fn includes_producer(self) -> bool {
        matches!(self, Self::Events)
    }
}

/// Local stream a client can toggle for everyone else
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Audio,
    Video,
    Desktop,
}

impl StreamKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Desktop => "desktop",
        }
    }
}

/// Direction of a client transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Send,
    Recv,
}
