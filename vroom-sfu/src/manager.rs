//! Peer Connection Manager - coordination of peers, rooms and media servers
//!
//! This module provides:
//! - The single entry point for client commands
//! - Identity, join, leave and disconnect flows
//! - Room teardown once nobody occupies a room
//! - Cleanup when a media server connection is lost
//!
//! All peer, room and counter state sits behind one mutex. The router may be
//! called with that mutex held; it never calls back into a handler from its
//! send paths.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vroom_cluster::wire::{CreatedRelayProducer, DisconnectTransport, JoinRoom};
use vroom_cluster::{Envelope, RouteHandler, ServerCommand, ServerMode, SignalRouter};
use vroom_core::config::SignalingConfig;
use vroom_core::{PeerId, RoomName, ServerId, TransportId};

use crate::hub::ClientHub;
use crate::observer::RoomObserver;
use crate::peer::{Peer, PeerStore};
use crate::protocol::{ClientCommand, ClientSignal, RoomMetrics};
use crate::room::{CounterStore, Room, RoomStore};
use crate::types::{Direction, MediaChannel, PeerCounter, PeerRole, StreamKind};

#[derive(Debug, Default)]
pub(crate) struct ManagerState {
    pub(crate) peers: PeerStore,
    pub(crate) rooms: RoomStore,
    pub(crate) counters: CounterStore,
}

pub struct PeerConnectionManager {
    pub(crate) router: Arc<SignalRouter>,
    pub(crate) hub: Arc<ClientHub>,
    pub(crate) observer: Option<Arc<dyn RoomObserver>>,
    pub(crate) stats_interval: Duration,
    pub(crate) state: Mutex<ManagerState>,
    pub(crate) stats_tasks: DashMap<TransportId, CancellationToken>,
}

impl PeerConnectionManager {
    /// Build the manager and install it as the router's callback target
    pub fn new(
        router: Arc<SignalRouter>,
        hub: Arc<ClientHub>,
        config: &SignalingConfig,
        observer: Option<Arc<dyn RoomObserver>>,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            router,
            hub,
            observer,
            stats_interval: Duration::from_millis(config.stats_interval_ms.max(1)),
            state: Mutex::new(ManagerState::default()),
            stats_tasks: DashMap::new(),
        });

        let weak = Arc::downgrade(&manager);
        let handler: Weak<dyn RouteHandler> = weak;
        manager.router.attach(handler);

        info!(
            stats_interval_ms = config.stats_interval_ms,
            "Peer connection manager initialized"
        );
        manager
    }

    /// Parse and run one client frame; malformed frames are logged and dropped
    pub fn handle_text(self: &Arc<Self>, origin: &TransportId, text: &str) {
        match ClientCommand::parse(text) {
            Ok(command) => self.command(origin, command),
            Err(e) => {
                warn!(
                    transport = %origin,
                    error = %e,
                    raw = %text,
                    "Ignoring malformed client command"
                );
            }
        }
    }

    pub fn command(self: &Arc<Self>, origin: &TransportId, command: ClientCommand) {
        match command {
            ClientCommand::RequestIdentity(req) => {
                self.request_identity(origin, req.region.as_deref());
            }
            ClientCommand::JoinRoom(req) => self.join_room(&req.peer_id, req.room),
            ClientCommand::GetRoomMetrics(req) => {
                self.get_room_metrics(origin, req.rooms.as_deref());
            }
            ClientCommand::LeaveRoom(req) => self.leave_room(&req.peer_id, &req.room),
            ClientCommand::CreateIngressTransport(req) => self.create_ingress_transport(req),
            ClientCommand::CreateEgressTransport(req) => self.create_egress_transport(req),
            ClientCommand::ConnectIngressTransport(req) => {
                self.connect_transport(Direction::Send, req);
            }
            ClientCommand::ConnectEgressTransport(req) => {
                self.connect_transport(Direction::Recv, req);
            }
            ClientCommand::ProduceMedia(req) => {
                let channel = match req.kind {
                    vroom_cluster::MediaKind::Audio => MediaChannel::Audio,
                    vroom_cluster::MediaKind::Video => MediaChannel::Video,
                };
                self.produce(channel, &req.peer_id, req.label, req.producer_options);
            }
            ClientCommand::ProduceData(req) => {
                self.produce(MediaChannel::Movement, &req.peer_id, req.label, req.producer_options);
            }
            ClientCommand::ProduceEvents(req) => {
                self.produce(MediaChannel::Events, &req.peer_id, req.label, req.producer_options);
            }
            ClientCommand::GetRoomAudio(req) => {
                self.consume_all(MediaChannel::Audio, &req.peer_id, req.is_spectator);
            }
            ClientCommand::GetRoomVideo(req) => {
                self.consume_all(MediaChannel::Video, &req.peer_id, req.is_spectator);
            }
            ClientCommand::GetRoomMovement(req) => {
                self.consume_all(MediaChannel::Movement, &req.peer_id, req.is_spectator);
            }
            ClientCommand::GetRoomEvents(req) => {
                self.consume_all(MediaChannel::Events, &req.peer_id, req.is_spectator);
            }
            ClientCommand::MuteProducer(req) => self.set_producer_paused(&req, true),
            ClientCommand::ResumeProducer(req) => self.set_producer_paused(&req, false),
            ClientCommand::SetAudioState(req) => {
                self.set_stream_state(StreamKind::Audio, &req.peer_id, req.enabled);
            }
            ClientCommand::SetVideoState(req) => {
                self.set_stream_state(StreamKind::Video, &req.peer_id, req.enabled);
            }
            ClientCommand::SetDesktopState(req) => {
                self.set_stream_state(StreamKind::Desktop, &req.peer_id, req.enabled);
            }
            ClientCommand::HushPeers(req) => self.hush_peers(&req.peer_id),
            ClientCommand::HushUser(req) => self.hush_user(&req.peer_id, &req.target),
            ClientCommand::PeerIndicators(req) => {
                self.peer_indicators(&req.peer_id, req.indicators);
            }
            ClientCommand::ReplyPeerIndicators(req) => self.reply_peer_indicators(req),
            ClientCommand::BootPeer(req) => self.boot_peer(&req.peer_id, req.reason),
            ClientCommand::DisconnectPeerWebsocket(req) => {
                let peer_id = req.and_then(|r| r.peer_id);
                debug!(transport = %origin, peer_id = ?peer_id, "Client asked to disconnect");
                self.disconnect(origin);
            }
            ClientCommand::ProducerClose(req) => self.producer_close(&req),
            ClientCommand::BeginSendingStats(_) => self.begin_sending_stats(origin),
            ClientCommand::EndSendingStats(_) => self.end_sending_stats(origin),
            ClientCommand::RestartIce(req) => self.restart_ice(&req),
        }
    }

    // ------------------------------------------------------------------
    // Read access
    // ------------------------------------------------------------------

    #[must_use]
    pub fn peer(&self, id: &PeerId) -> Option<Peer> {
        self.state.lock().peers.get(id).cloned()
    }

    #[must_use]
    pub fn peer_for_transport(&self, transport: &TransportId) -> Option<Peer> {
        self.state.lock().peers.by_transport(transport).cloned()
    }

    #[must_use]
    pub fn room(&self, name: &RoomName) -> Option<Room> {
        self.state.lock().rooms.get(name).cloned()
    }

    #[must_use]
    pub fn counter(&self, room: &RoomName) -> Option<PeerCounter> {
        self.state.lock().counters.get(room).copied()
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.state.lock().peers.len()
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.state.lock().rooms.len()
    }

    // ------------------------------------------------------------------
    // Identity and membership
    // ------------------------------------------------------------------

    /// Look up or allocate the peer for `origin` and push its identity.
    ///
    /// A transport that already owns a peer gets the same id back.
    pub fn request_identity(&self, origin: &TransportId, edge_code: Option<&str>) -> PeerId {
        let region = self.router.resolve_region(edge_code.unwrap_or_default());

        let mut state = self.state.lock();
        let id = if let Some(peer) = state.peers.by_transport_mut(origin) {
            debug!(peer_id = %peer.id, transport = %origin, "Reusing peer for known transport");
            peer.region = region;
            peer.id.clone()
        } else {
            let peer = Peer::new(PeerId::generate(), origin.clone(), region);
            let id = peer.id.clone();
            state.peers.insert(peer);
            info!(peer_id = %id, transport = %origin, region = %region, "Peer created");
            id
        };
        drop(state);

        self.hub.send(
            origin,
            &ClientSignal::Identity {
                id: id.clone(),
                region,
            },
        );
        id
    }

    pub fn join_room(&self, peer_id: &PeerId, room: RoomName) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(peer) = state.peers.get(peer_id).cloned() else {
            debug!(peer_id = %peer_id, room = %room, "joinRoom for unknown peer");
            return;
        };
        if peer.is_in(&room) {
            debug!(peer_id = %peer_id, room = %room, "Peer already in room");
            return;
        }

        // Servers are chosen before any state changes so an aborted join
        // leaves the peer where it was
        let region = peer.region;
        let Some(ingress) = self.router.get_ingress(region) else {
            error!(
                peer_id = %peer_id,
                room = %room,
                region = %region,
                "No ingress server available, join aborted"
            );
            return;
        };
        let Some(egress) = self.router.get_egress(region) else {
            error!(
                peer_id = %peer_id,
                room = %room,
                region = %region,
                "No egress server available, join aborted"
            );
            return;
        };
        let movement = self.router.get_movement(region);

        if let Some(current) = peer.room.clone() {
            self.leave_locked(state, peer_id, &current);
        }

        let join = |p: &Peer| {
            Envelope::for_transport(
                p.transport.clone(),
                ServerCommand::JoinRoom(JoinRoom {
                    room: room.clone(),
                    peer_id: p.id.clone(),
                }),
            )
        };

        let others: Vec<Peer> = state
            .peers
            .in_room(&room)
            .filter(|p| p.id != *peer_id)
            .cloned()
            .collect();
        let entry = state.rooms.get_or_create(room.clone());

        // Egresses already serving the room must also serve the newcomer
        for existing in &entry.egress {
            self.router.request_join(ServerMode::Egress, existing, join(&peer));
        }
        self.router.request_join(ServerMode::Ingress, &ingress, join(&peer));
        entry.add_ingress(ingress.clone());

        if entry.add_egress(egress.clone()) {
            self.router.request_join(ServerMode::Egress, &egress, join(&peer));
            for other in &others {
                self.router.request_join(ServerMode::Egress, &egress, join(other));
            }
        }
        if let Some(movement) = &movement {
            self.router.request_join(ServerMode::Movement, movement, join(&peer));
            entry.add_movement(movement.clone());
        }
        let route = entry.route_entry();

        state.counters.entry(room.clone());
        if let Some(joined) = state.peers.get_mut(peer_id) {
            joined.room = Some(room.clone());
            joined.role = PeerRole::Lobby;
            joined.counted = false;
            joined.ingress = Some(ingress.clone());
            joined.egress = Some(egress.clone());
            joined.movement.clone_from(&movement);
        }
        self.router.update_route(room.clone(), route);

        info!(
            peer_id = %peer_id,
            room = %room,
            ingress = %ingress,
            egress = %egress,
            movement = ?movement,
            "Peer joined room"
        );
    }

    pub fn leave_room(&self, peer_id: &PeerId, room: &RoomName) {
        let mut guard = self.state.lock();
        self.leave_locked(&mut guard, peer_id, room);
    }

    pub(crate) fn leave_locked(&self, state: &mut ManagerState, peer_id: &PeerId, room: &RoomName) {
        let Some(peer) = state.peers.get(peer_id).cloned() else {
            debug!(peer_id = %peer_id, room = %room, "leaveRoom for unknown peer");
            return;
        };
        if !peer.is_in(room) {
            debug!(peer_id = %peer_id, room = %room, "leaveRoom for a room the peer is not in");
            return;
        }

        self.close_transports(state, &peer, room);
        if let Some(left) = state.peers.get_mut(peer_id) {
            left.reset_membership();
        }
        self.release_slot(state, &peer, room);

        let remaining = state.peers.room_transports(room, None);
        self.hub.broadcast(
            &remaining,
            &ClientSignal::PeerDisconnect {
                peer_id: peer_id.clone(),
            },
        );
        self.settle_room(state, room);

        info!(peer_id = %peer_id, room = %room, "Peer left room");
    }

    /// End a client session for any reason.
    ///
    /// Unknown transports are ignored: several paths (explicit command,
    /// socket close, boot) may race to clean up the same session.
    pub fn disconnect(&self, transport: &TransportId) {
        self.stop_stats(transport);
        let mut guard = self.state.lock();
        self.disconnect_locked(&mut guard, transport);
    }

    pub(crate) fn disconnect_locked(
        &self,
        state: &mut ManagerState,
        transport: &TransportId,
    ) -> Option<Peer> {
        let Some(peer) = state.peers.remove_by_transport(transport) else {
            debug!(transport = %transport, "Disconnect for unknown transport");
            return None;
        };

        if let Some(room) = peer.room.clone() {
            self.close_transports(state, &peer, &room);
            self.release_slot(state, &peer, &room);

            let no_participants = state
                .counters
                .get(&room)
                .map_or(true, |counter| counter.participant_count < 1);
            if no_participants {
                if let Some(observer) = &self.observer {
                    observer.on_last_peer_disconnect(&room);
                }
            }

            let remaining = state.peers.room_transports(&room, None);
            self.hub.broadcast(
                &remaining,
                &ClientSignal::PeerDisconnect {
                    peer_id: peer.id.clone(),
                },
            );
            self.settle_room(state, &room);
        }

        info!(peer_id = %peer.id, transport = %transport, "Peer disconnected");
        Some(peer)
    }

    /// Tell every server touching `peer` in `room` to drop its transports
    fn close_transports(&self, state: &ManagerState, peer: &Peer, room: &RoomName) {
        let envelope = disconnect_envelope(peer, Some(room));
        if let Some(ingress) = &peer.ingress {
            self.router.close_ingress_transport(ingress, envelope.clone());
        }

        let mut egresses: Vec<ServerId> = state
            .rooms
            .get(room)
            .map(|r| r.egress.clone())
            .unwrap_or_default();
        if let Some(own) = &peer.egress {
            if !egresses.contains(own) {
                egresses.push(own.clone());
            }
        }
        for egress in &egresses {
            self.router.close_egress_transport(egress, envelope.clone());
        }
    }

    fn release_slot(&self, state: &mut ManagerState, peer: &Peer, room: &RoomName) {
        if !peer.counted {
            return;
        }
        match state.counters.get_mut(room) {
            Some(counter) => counter.release(peer.role),
            None => warn!(peer_id = %peer.id, room = %room, "No counter for room on release"),
        }
    }

    /// Tear the room down once nobody holds it, otherwise rebroadcast counts.
    ///
    /// Lobby peers that have not created a transport yet are not counted but
    /// still keep the room alive.
    pub(crate) fn settle_room(&self, state: &mut ManagerState, room: &RoomName) -> bool {
        let counter_vacant = state.counters.get(room).map_or(true, PeerCounter::is_vacant);
        let occupied = state
            .peers
            .in_room(room)
            .any(|peer| peer.role != PeerRole::Spectator);

        if counter_vacant && !occupied {
            self.teardown_room(state, room);
            true
        } else {
            self.broadcast_counts(state, room);
            false
        }
    }

    pub(crate) fn teardown_room(&self, state: &mut ManagerState, room: &RoomName) {
        state.rooms.remove(room);
        state.counters.remove(room);
        let sent = self.router.close_room(room);
        info!(room = %room, teardown_sent = sent, "Room removed");
    }

    pub(crate) fn room_metrics(&self, room: &RoomName, counter: PeerCounter) -> RoomMetrics {
        RoomMetrics {
            counter,
            last_emptied: self.observer.as_ref().and_then(|o| o.last_emptied(room)),
        }
    }

    /// Push the room's counter to everyone in it
    pub(crate) fn broadcast_counts(&self, state: &ManagerState, room: &RoomName) {
        let Some(counter) = state.counters.get(room) else {
            return;
        };
        let rooms = [(room.clone(), self.room_metrics(room, *counter))]
            .into_iter()
            .collect();
        let transports = state.peers.room_transports(room, None);
        self.hub.broadcast(&transports, &ClientSignal::PeerCount { rooms });
    }
}

fn disconnect_envelope(peer: &Peer, room: Option<&RoomName>) -> Envelope {
    Envelope::for_transport(
        peer.transport.clone(),
        ServerCommand::DisconnectTransport(DisconnectTransport {
            peer_id: peer.id.clone(),
            room: room.cloned(),
        }),
    )
}

impl RouteHandler for PeerConnectionManager {
    fn consumer_messages(&self, produced: &CreatedRelayProducer) -> Option<Vec<Envelope>> {
        self.create_consumer_messages(produced)
    }

    /// Drop every peer whose ingress or egress is `server_id` and every room
    /// that lists it.
    ///
    /// Peers are not migrated; their sockets are closed so clients reconnect.
    /// Peers that only used the server for movement keep their session.
    fn drop_route(&self, server_id: &ServerId) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let transports: Vec<TransportId> = state
            .peers
            .iter()
            .filter(|peer| peer.carries_media_on(server_id))
            .map(|peer| peer.transport.clone())
            .collect();
        for peer in state.peers.iter_mut() {
            if peer.movement.as_ref() == Some(server_id) {
                peer.movement = None;
            }
        }
        for transport in &transports {
            self.disconnect_locked(state, transport);
            self.stop_stats(transport);
            self.hub.close(transport);
        }

        let rooms = state.rooms.referencing(server_id);
        for room in &rooms {
            self.teardown_room(state, room);
        }

        warn!(
            server_id = %server_id,
            peers_dropped = transports.len(),
            rooms_dropped = rooms.len(),
            "Dropped routes through lost media server"
        );
    }

    fn relay_to_client(&self, wsid: &TransportId, communication: Value) {
        self.record_producer(wsid, &communication);
        self.hub.relay(wsid, &communication);
    }
}
