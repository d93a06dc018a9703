//! Moderation, indicator relays, room metrics and the periodic stats stream

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vroom_core::{PeerId, RoomName, TransportId};

use crate::manager::PeerConnectionManager;
use crate::protocol::{ClientSignal, ReplyPeerIndicators};

impl PeerConnectionManager {
    /// Answer `origin` with occupancy for the listed rooms, or every room
    /// with a counter when no list is given. Unknown names are skipped.
    pub fn get_room_metrics(&self, origin: &TransportId, rooms: Option<&[RoomName]>) {
        let state = self.state.lock();
        let rooms = state
            .counters
            .snapshot(rooms)
            .into_iter()
            .map(|(room, counter)| {
                let metrics = self.room_metrics(&room, counter);
                (room, metrics)
            })
            .collect();
        drop(state);

        self.hub.send(origin, &ClientSignal::PeerCount { rooms });
    }

    /// Tell everyone else in the sender's room they were hushed
    pub fn hush_peers(&self, peer_id: &PeerId) {
        let state = self.state.lock();
        let Some(room) = state.peers.get(peer_id).and_then(|p| p.room.clone()) else {
            debug!(peer_id = %peer_id, "hushPeers outside a room");
            return;
        };
        let others = state.peers.room_transports(&room, Some(peer_id));
        drop(state);

        let sent = self.hub.broadcast(&others, &ClientSignal::Hushed { by: peer_id.clone() });
        info!(peer_id = %peer_id, room = %room, sent, "Room hushed");
    }

    pub fn hush_user(&self, peer_id: &PeerId, target: &PeerId) {
        let transport = self.state.lock().peers.get(target).map(|p| p.transport.clone());
        let Some(transport) = transport else {
            debug!(peer_id = %peer_id, target = %target, "hushUser for unknown target");
            return;
        };
        self.hub.send(&transport, &ClientSignal::Hushed { by: peer_id.clone() });
    }

    pub fn peer_indicators(&self, peer_id: &PeerId, indicators: Value) {
        let state = self.state.lock();
        let Some(room) = state.peers.get(peer_id).and_then(|p| p.room.clone()) else {
            debug!(peer_id = %peer_id, "peerIndicators outside a room");
            return;
        };
        let others = state.peers.room_transports(&room, Some(peer_id));
        drop(state);

        self.hub.broadcast(
            &others,
            &ClientSignal::PeerIndicators {
                peer_id: peer_id.clone(),
                indicators,
            },
        );
    }

    /// Reply to an indicator broadcast: to one target when given, otherwise
    /// to the named room, otherwise to the sender's room.
    pub fn reply_peer_indicators(&self, req: ReplyPeerIndicators) {
        let state = self.state.lock();
        let recipients = if let Some(target) = &req.target {
            state
                .peers
                .get(target)
                .map(|p| vec![p.transport.clone()])
                .unwrap_or_default()
        } else {
            let room = req
                .room
                .clone()
                .or_else(|| state.peers.get(&req.peer_id).and_then(|p| p.room.clone()));
            room.map(|room| state.peers.room_transports(&room, Some(&req.peer_id)))
                .unwrap_or_default()
        };
        drop(state);

        if recipients.is_empty() {
            debug!(peer_id = %req.peer_id, "replyPeerIndicators has no recipients");
            return;
        }
        self.hub.broadcast(
            &recipients,
            &ClientSignal::PeerIndicatorsReply {
                peer_id: req.peer_id,
                indicators: req.indicators,
            },
        );
    }

    /// Remove a peer: notify it, run the disconnect flow and close its socket
    pub fn boot_peer(&self, peer_id: &PeerId, reason: Option<String>) {
        let mut guard = self.state.lock();
        let Some(transport) = guard.peers.get(peer_id).map(|p| p.transport.clone()) else {
            debug!(peer_id = %peer_id, "bootPeer for unknown peer");
            return;
        };

        self.hub.send(&transport, &ClientSignal::BootUser { reason: reason.clone() });
        self.disconnect_locked(&mut guard, &transport);
        drop(guard);

        self.stop_stats(&transport);
        self.hub.close(&transport);
        warn!(peer_id = %peer_id, reason = ?reason, "Peer booted");
    }

    // ------------------------------------------------------------------
    // Stats stream
    // ------------------------------------------------------------------

    /// Current room counters plus per-server load
    #[must_use]
    pub fn stats_snapshot(&self) -> ClientSignal {
        let rooms: BTreeMap<RoomName, _> = self.state.lock().counters.snapshot(None);
        ClientSignal::Stats {
            rooms,
            servers: self.router.load_snapshot(),
        }
    }

    /// Start pushing [`Self::stats_snapshot`] to `origin` every stats
    /// interval. A running stream for the same transport is replaced.
    pub fn begin_sending_stats(self: &Arc<Self>, origin: &TransportId) {
        let token = CancellationToken::new();
        if let Some(previous) = self.stats_tasks.insert(origin.clone(), token.clone()) {
            previous.cancel();
        }

        let manager = Arc::downgrade(self);
        let transport = origin.clone();
        let mut timer = interval(self.stats_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = timer.tick() => {
                        let Some(manager) = manager.upgrade() else {
                            break;
                        };
                        if !manager.hub.contains(&transport) {
                            manager.stats_tasks.remove(&transport);
                            break;
                        }
                        let stats = manager.stats_snapshot();
                        manager.hub.send(&transport, &stats);
                    }
                }
            }
            debug!(transport = %transport, "Stats stream stopped");
        });

        info!(transport = %origin, interval = ?self.stats_interval, "Stats stream started");
    }

    pub fn end_sending_stats(&self, origin: &TransportId) {
        self.stop_stats(origin);
    }

    pub(crate) fn stop_stats(&self, transport: &TransportId) {
        if let Some((_, token)) = self.stats_tasks.remove(transport) {
            token.cancel();
        }
    }
}
