//! Transport, producer and consumer flows
//!
//! Everything here is a typed forward to the signal router with the peer's
//! cached room, capability and server context attached. Confirmations come
//! back asynchronously as media-server communications.

use serde_json::Value;
use tracing::{debug, warn};
use vroom_cluster::wire::{
    ConsumeAll, ConsumeProducer, ConsumerControl, CreatedRelayProducer, ProducerControl,
    ProducerRequest, RestartIce as RestartIceCommand, TransportConnect, TransportRequest,
};
use vroom_cluster::{Envelope, ServerCommand};
use vroom_core::{PeerId, RoomName, TransportId};

use crate::manager::{ManagerState, PeerConnectionManager};
use crate::peer::{Peer, ProducerSlot};
use crate::protocol::{ClientSignal, ConnectTransport, CreateTransport, ProducerAction, RestartIce};
use crate::types::{Direction, MediaChannel, PeerRole, StreamKind};

/// Producer label used for screen-share streams
pub const DESKTOP_LABEL: &str = "desktop";

impl PeerConnectionManager {
    pub fn create_ingress_transport(&self, req: CreateTransport) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(peer) = state.peers.get_mut(&req.peer_id) else {
            debug!(peer_id = %req.peer_id, "createIngressTransport for unknown peer");
            return;
        };
        peer.sctp_capabilities = Some(req.sctp_options.clone());
        peer.rtp_capabilities = Some(req.rtp_capabilities.clone());

        let (Some(room), Some(ingress)) = (peer.room.clone(), peer.ingress.clone()) else {
            warn!(peer_id = %req.peer_id, "createIngressTransport before joinRoom");
            return;
        };
        let newly_counted = !peer.counted;
        peer.counted = true;
        let role = peer.role;

        let envelope = Envelope::for_transport(
            peer.transport.clone(),
            ServerCommand::CreateIngressTransport(TransportRequest {
                peer_id: req.peer_id.clone(),
                room: room.clone(),
                sctp_capabilities: req.sctp_options,
                rtp_capabilities: req.rtp_capabilities,
            }),
        );
        self.router.request_ingress_transport(&ingress, envelope);

        // Ingress creation is where a peer starts occupying a slot
        if newly_counted {
            state.counters.entry(room.clone()).admit(role);
            self.broadcast_counts(state, &room);
        }
    }

    pub fn create_egress_transport(&self, req: CreateTransport) {
        let mut state = self.state.lock();

        let Some(peer) = state.peers.get_mut(&req.peer_id) else {
            debug!(peer_id = %req.peer_id, "createEgressTransport for unknown peer");
            return;
        };
        peer.sctp_capabilities = Some(req.sctp_options.clone());
        peer.rtp_capabilities = Some(req.rtp_capabilities.clone());

        let Some(room) = peer.room.clone() else {
            warn!(peer_id = %req.peer_id, "createEgressTransport before joinRoom");
            return;
        };
        let Some(egress) = req.remote_egress.or_else(|| peer.egress.clone()) else {
            warn!(peer_id = %req.peer_id, "createEgressTransport without an egress");
            return;
        };

        let envelope = Envelope::for_transport(
            peer.transport.clone(),
            ServerCommand::CreateEgressTransport(TransportRequest {
                peer_id: req.peer_id,
                room,
                sctp_capabilities: req.sctp_options,
                rtp_capabilities: req.rtp_capabilities,
            }),
        );
        self.router.request_egress_transport(&egress, envelope);
    }

    /// Connect a client transport. Connecting the send side makes the peer a
    /// participant.
    pub fn connect_transport(&self, direction: Direction, req: ConnectTransport) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(peer) = state.peers.get_mut(&req.peer_id) else {
            debug!(peer_id = %req.peer_id, ?direction, "connectTransport for unknown peer");
            return;
        };
        let Some(room) = peer.room.clone() else {
            warn!(peer_id = %req.peer_id, ?direction, "connectTransport before joinRoom");
            return;
        };

        let connect = TransportConnect {
            peer_id: req.peer_id.clone(),
            room: room.clone(),
            transport_id: req.transport_id,
            dtls_parameters: req.dtls_parameters,
        };

        match direction {
            Direction::Send => {
                let Some(ingress) = peer.ingress.clone() else {
                    warn!(peer_id = %req.peer_id, "connectIngressTransport without an ingress");
                    return;
                };
                let previous = peer.role;
                let promote = peer.counted && previous != PeerRole::Participant;
                peer.role = PeerRole::Participant;

                let envelope = Envelope::for_transport(
                    peer.transport.clone(),
                    ServerCommand::ConnectIngressTransport(connect),
                );
                self.router.connect_ingress_transport(&ingress, envelope);

                if promote {
                    state
                        .counters
                        .entry(room.clone())
                        .transition(previous, PeerRole::Participant);
                    self.broadcast_counts(state, &room);
                }
            }
            Direction::Recv => {
                let Some(egress) = req.remote_egress.or_else(|| peer.egress.clone()) else {
                    warn!(peer_id = %req.peer_id, "connectEgressTransport without an egress");
                    return;
                };
                let envelope = Envelope::for_transport(
                    peer.transport.clone(),
                    ServerCommand::ConnectEgressTransport(connect),
                );
                self.router.connect_egress_transport(&egress, envelope);
            }
        }
    }

    pub fn produce(
        &self,
        channel: MediaChannel,
        peer_id: &PeerId,
        label: Option<String>,
        producer_options: Value,
    ) {
        let state = self.state.lock();
        let Some(peer) = state.peers.get(peer_id) else {
            debug!(peer_id = %peer_id, ?channel, "produce for unknown peer");
            return;
        };
        let (Some(room), Some(ingress)) = (peer.room.clone(), peer.ingress.clone()) else {
            warn!(peer_id = %peer_id, ?channel, "produce before joinRoom");
            return;
        };

        let request = ProducerRequest {
            peer_id: peer_id.clone(),
            room,
            egress: peer.egress.clone(),
            rtp_capabilities: peer.rtp_capabilities.clone().unwrap_or_default(),
            label,
            producer_options,
        };
        let transport = peer.transport.clone();
        match channel {
            MediaChannel::Audio => self.router.create_audio_producer(
                &ingress,
                Envelope::for_transport(transport, ServerCommand::CreateAudioProducer(request)),
            ),
            MediaChannel::Video => self.router.create_video_producer(
                &ingress,
                Envelope::for_transport(transport, ServerCommand::CreateVideoProducer(request)),
            ),
            MediaChannel::Movement => self.router.create_movement_producer(
                &ingress,
                Envelope::for_transport(transport, ServerCommand::CreateMovementProducer(request)),
            ),
            MediaChannel::Events => self.router.create_event_producer(
                &ingress,
                Envelope::for_transport(transport, ServerCommand::CreateEventProducer(request)),
            ),
        };
    }

    /// Ask every egress in the peer's room to open consumers for all other
    /// room members. The movement request also ends the peer's lobby phase.
    pub fn consume_all(&self, channel: MediaChannel, peer_id: &PeerId, is_spectator: bool) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(peer) = state.peers.get(peer_id).cloned() else {
            debug!(peer_id = %peer_id, ?channel, "consume request for unknown peer");
            return;
        };
        let Some(room) = peer.room.clone() else {
            debug!(peer_id = %peer_id, ?channel, "consume request outside a room");
            return;
        };

        if channel == MediaChannel::Movement {
            self.leave_lobby(state, &peer, &room, is_spectator);
        }

        let producer_peer_ids: Vec<PeerId> = state
            .peers
            .in_room(&room)
            .filter(|other| other.id != peer.id)
            .map(|other| other.id.clone())
            .collect();
        let request = ConsumeAll {
            peer_id: peer.id.clone(),
            room: room.clone(),
            rtp_capabilities: peer.rtp_capabilities.clone().unwrap_or_default(),
            producer_peer_ids,
        };

        let transport = peer.transport.clone();
        let sent = match channel {
            MediaChannel::Audio => self.router.request_all_audio(
                &room,
                &Envelope::for_transport(transport, ServerCommand::RequestAllAudio(request)),
            ),
            MediaChannel::Video => self.router.request_all_video(
                &room,
                &Envelope::for_transport(transport, ServerCommand::RequestAllVideo(request)),
            ),
            MediaChannel::Movement => self.router.request_all_movement(
                &room,
                &Envelope::for_transport(transport, ServerCommand::RequestAllMovement(request)),
            ),
            MediaChannel::Events => self.router.request_all_events(
                &room,
                &Envelope::for_transport(transport, ServerCommand::RequestAllEvents(request)),
            ),
        };
        debug!(
            peer_id = %peer_id,
            room = %room,
            ?channel,
            egress_count = sent,
            "Requested room consumers"
        );
    }

    fn leave_lobby(
        &self,
        state: &mut ManagerState,
        peer: &Peer,
        room: &RoomName,
        is_spectator: bool,
    ) {
        if peer.role != PeerRole::Lobby {
            return;
        }
        let target = if is_spectator {
            PeerRole::Spectator
        } else {
            PeerRole::Participant
        };
        if let Some(entry) = state.peers.get_mut(&peer.id) {
            entry.role = target;
        }
        if peer.counted {
            state
                .counters
                .entry(room.clone())
                .transition(PeerRole::Lobby, target);
            self.broadcast_counts(state, room);
        }
        debug!(peer_id = %peer.id, room = %room, role = ?target, "Peer left lobby");
    }

    /// Pause (`paused = true`) or resume a producer on the peer's ingress
    pub fn set_producer_paused(&self, action: &ProducerAction, paused: bool) {
        let state = self.state.lock();
        let Some(peer) = state.peers.get(&action.peer_id) else {
            debug!(peer_id = %action.peer_id, "producer toggle for unknown peer");
            return;
        };
        let Some(ingress) = peer.ingress.clone() else {
            warn!(peer_id = %action.peer_id, "producer toggle without an ingress");
            return;
        };

        let control = producer_control(peer, action);
        let command = if paused {
            ServerCommand::PauseProducer(control)
        } else {
            ServerCommand::ResumeProducer(control)
        };
        let envelope = Envelope::for_transport(peer.transport.clone(), command);
        if paused {
            self.router.pause_producer(&ingress, envelope);
        } else {
            self.router.resume_producer(&ingress, envelope);
        }
    }

    pub fn producer_close(&self, action: &ProducerAction) {
        let mut state = self.state.lock();
        let Some(peer) = state.peers.get_mut(&action.peer_id) else {
            debug!(peer_id = %action.peer_id, "producerClose for unknown peer");
            return;
        };

        let envelope = Envelope::for_transport(
            peer.transport.clone(),
            ServerCommand::ProducerClose(producer_control(peer, action)),
        );
        let sent = self
            .router
            .producer_close(peer.egress.as_ref(), peer.ingress.as_ref(), envelope);
        peer.producers.clear(&action.producer_id);
        debug!(
            peer_id = %action.peer_id,
            producer_id = %action.producer_id,
            sent,
            "Producer closed"
        );
    }

    pub fn restart_ice(&self, req: &RestartIce) {
        let state = self.state.lock();
        let Some(peer) = state.peers.get(&req.peer_id) else {
            debug!(peer_id = %req.peer_id, "restartIce for unknown peer");
            return;
        };
        let envelope = Envelope::for_transport(
            peer.transport.clone(),
            ServerCommand::RestartIce(RestartIceCommand {
                peer_id: req.peer_id.clone(),
                transport_id: req.transport_id.clone(),
            }),
        );
        self.router
            .restart_ice(peer.egress.as_ref(), peer.ingress.as_ref(), envelope);
    }

    /// Pause or resume everyone's consumers of one of the peer's streams
    pub fn set_stream_state(&self, stream: StreamKind, peer_id: &PeerId, enabled: bool) {
        let state = self.state.lock();
        let Some(peer) = state.peers.get(peer_id) else {
            debug!(peer_id = %peer_id, "stream state for unknown peer");
            return;
        };
        let Some(room) = peer.room.clone() else {
            debug!(peer_id = %peer_id, "stream state outside a room");
            return;
        };

        let control = ConsumerControl {
            peer_id: peer_id.clone(),
            room: room.clone(),
            kind: stream.as_str().to_string(),
        };
        let envelope = Envelope::for_transport(
            peer.transport.clone(),
            if enabled {
                ServerCommand::ResumeConsumer(control)
            } else {
                ServerCommand::PauseConsumer(control)
            },
        );
        let egresses = state
            .rooms
            .get(&room)
            .map(|r| r.egress.clone())
            .unwrap_or_else(|| peer.egress.iter().cloned().collect());
        for egress in &egresses {
            if enabled {
                self.router.resume_consumer(egress, envelope.clone());
            } else {
                self.router.pause_consumer(egress, envelope.clone());
            }
        }

        let others = state.peers.room_transports(&room, Some(peer_id));
        self.hub.broadcast(
            &others,
            &ClientSignal::SetConsumerState {
                peer_id: peer_id.clone(),
                kind: stream,
                enabled,
            },
        );
    }

    /// Consume instructions for a relay producer an egress just created.
    ///
    /// Targets every non-lobby peer in the producer's room except the
    /// producer itself; the event channel includes the producer.
    #[must_use]
    pub fn create_consumer_messages(
        &self,
        produced: &CreatedRelayProducer,
    ) -> Option<Vec<Envelope>> {
        let state = self.state.lock();
        let Some(producer) = state.peers.get(&produced.peer_id) else {
            warn!(peer_id = %produced.peer_id, "Relay producer for unknown peer");
            return None;
        };
        let Some(room) = producer.room.as_ref() else {
            debug!(peer_id = %produced.peer_id, "Relay producer for peer outside a room");
            return Some(Vec::new());
        };

        let channel = MediaChannel::for_relay(produced.kind, produced.label.as_deref());
        let messages = state
            .peers
            .in_room(room)
            .filter(|consumer| consumer.role != PeerRole::Lobby)
            .filter(|consumer| consumer.id != producer.id || channel.includes_producer())
            .map(|consumer| {
                let consume = ConsumeProducer {
                    peer_id: consumer.id.clone(),
                    producer_peer_id: producer.id.clone(),
                    room: room.clone(),
                    label: produced.label.clone(),
                    rtp_capabilities: if channel.is_media() {
                        consumer.rtp_capabilities.clone()
                    } else {
                        None
                    },
                };
                let command = match channel {
                    MediaChannel::Audio => ServerCommand::ConsumeAudio(consume),
                    MediaChannel::Video => ServerCommand::ConsumeVideo(consume),
                    MediaChannel::Movement => ServerCommand::ConsumeMovement(consume),
                    MediaChannel::Events => ServerCommand::ConsumeEvents(consume),
                };
                Envelope::for_transport(consumer.transport.clone(), command)
            })
            .collect();
        Some(messages)
    }

    /// Remember producer ids the ingress confirmed to a client
    pub(crate) fn record_producer(&self, wsid: &TransportId, communication: &Value) {
        let Some(kind) = communication.get("type").and_then(Value::as_str) else {
            return;
        };
        let message = communication.get("message");
        let field = |name: &str| message.and_then(|m| m.get(name)).and_then(Value::as_str);

        let slot = match kind {
            "producedMedia" => {
                let desktop = field("label") == Some(DESKTOP_LABEL);
                match (field("kind"), desktop) {
                    (Some("audio"), false) => ProducerSlot::Audio,
                    (Some("audio"), true) => ProducerSlot::ScreenAudio,
                    (Some("video"), false) => ProducerSlot::Video,
                    (Some("video"), true) => ProducerSlot::ScreenVideo,
                    _ => return,
                }
            }
            "producedData" => ProducerSlot::Movement,
            "producedEvents" => ProducerSlot::Events,
            _ => return,
        };
        let Some(id) = field("id") else {
            debug!(transport = %wsid, message_type = kind, "Producer confirmation without id");
            return;
        };

        let mut state = self.state.lock();
        if let Some(peer) = state.peers.by_transport_mut(wsid) {
            peer.producers.set(slot, id.to_string());
            debug!(peer_id = %peer.id, ?slot, producer_id = id, "Producer recorded");
        }
    }
}

fn producer_control(peer: &Peer, action: &ProducerAction) -> ProducerControl {
    ProducerControl {
        peer_id: action.peer_id.clone(),
        room: peer.room.clone(),
        producer_id: action.producer_id.clone(),
        kind: action.kind.clone(),
    }
}
