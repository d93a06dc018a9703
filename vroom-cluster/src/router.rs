//! Signal router
//!
//! Owns every media-server connection and gives the peer layer an
//! address-by-role API: pick a server for a region, send it a command, or
//! fan a command out to every server backing a room. Inbound frames update
//! load/region/pipe state, get forwarded to another server, or are handed to
//! the [`RouteHandler`].
//!
//! All sends are fire-and-forget; replies are matched to state by value.

use bytes::Bytes;
use dashmap::DashMap;
use nanoid::nanoid;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use vroom_core::{resolve_region, Region, RoomName, ServerId, TransportId};

use crate::connection::{ConnectionId, ServerLink};
use crate::discovery::{LoadSnapshot, Selection, ServerRegistry};
use crate::handler::RouteHandler;
use crate::relay::{PipeTable, RouteEntry, RoutingTable};
use crate::wire::{
    decode_envelope, encode_envelope, CloseRoom, Envelope, InboundEnvelope, MediaServerEvent,
    ServerCommand, ServerMode,
};

pub struct SignalRouter {
    primary_region: Region,
    links: DashMap<ConnectionId, ServerLink>,
    registry: ServerRegistry,
    pipes: PipeTable,
    routes: RoutingTable,
    handler: RwLock<Option<Weak<dyn RouteHandler>>>,
}

impl SignalRouter {
    #[must_use]
    pub fn new(primary_region: Region) -> Self {
        Self {
            primary_region,
            links: DashMap::new(),
            registry: ServerRegistry::new(),
            pipes: PipeTable::new(),
            routes: RoutingTable::new(),
            handler: RwLock::new(None),
        }
    }

    /// Install the callback target. Held weakly: the handler owns the router.
    pub fn attach(&self, handler: Weak<dyn RouteHandler>) {
        *self.handler.write() = Some(handler);
    }

    fn handler(&self) -> Option<Arc<dyn RouteHandler>> {
        self.handler.read().as_ref().and_then(Weak::upgrade)
    }

    #[must_use]
    pub const fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn pipes(&self) -> &PipeTable {
        &self.pipes
    }

    #[must_use]
    pub const fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    #[must_use]
    pub const fn primary_region(&self) -> Region {
        self.primary_region
    }

    #[must_use]
    pub fn load_snapshot(&self) -> LoadSnapshot {
        self.registry.snapshot()
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Track a new media-server socket. The receiver yields frame payloads
    /// for the connection's writer.
    pub fn open_connection(&self) -> (ConnectionId, mpsc::UnboundedReceiver<Bytes>) {
        let connection_id: ConnectionId = nanoid!();
        let (tx, rx) = mpsc::unbounded_channel();
        self.links
            .insert(connection_id.clone(), ServerLink::new(connection_id.clone(), tx));
        debug!(connection_id = %connection_id, "Media-server connection opened");
        (connection_id, rx)
    }

    /// Unwind a closed socket: its servers leave the registry, the peer layer
    /// drops routes through them, and pipes/rooms naming them are removed.
    pub fn close_connection(&self, connection_id: &str) {
        self.links.remove(connection_id);
        let dropped = self.registry.unregister_connection(connection_id);
        if dropped.is_empty() {
            debug!(connection_id = %connection_id, "Unregistered connection closed");
            return;
        }

        let handler = self.handler();
        for (mode, server_id) in dropped {
            if let Some(handler) = &handler {
                handler.drop_route(&server_id);
            }
            let pipes = self.pipes.remove_server(&server_id);
            let rooms = self.routes.remove_referencing(&server_id);
            warn!(
                server_id = %server_id,
                mode = %mode,
                pipes_dropped = pipes,
                rooms_dropped = rooms.len(),
                "Media server connection lost"
            );
        }
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Process one frame. Parse failures are logged and dropped; they never
    /// close the connection.
    pub fn handle_frame(&self, connection_id: &str, frame: Bytes) {
        let envelope = match decode_envelope(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(
                    connection_id = %connection_id,
                    error = %e,
                    raw = %String::from_utf8_lossy(&frame),
                    "Malformed frame from media server"
                );
                return;
            }
        };

        let InboundEnvelope {
            wsid,
            node,
            message,
            communication,
        } = envelope;

        match (message, communication) {
            (Some(raw), _) => match MediaServerEvent::from_raw(raw) {
                Ok(event) => self.dispatch(connection_id, node, event, &frame),
                Err(e) => error!(
                    connection_id = %connection_id,
                    error = %e,
                    raw = %String::from_utf8_lossy(&frame),
                    "Malformed message from media server"
                ),
            },
            (None, Some(communication)) => self.forward_communication(wsid, communication),
            (None, None) => error!(
                connection_id = %connection_id,
                raw = %String::from_utf8_lossy(&frame),
                "Envelope has neither message nor communication"
            ),
        }
    }

    fn dispatch(
        &self,
        connection_id: &str,
        node: Option<ServerId>,
        event: MediaServerEvent,
        frame: &Bytes,
    ) {
        match event {
            MediaServerEvent::RegisterMediaServer(register) => {
                self.register(connection_id, node, register.mode, &register.region);
            }
            MediaServerEvent::RegisterMovementServer(register) => {
                self.register(connection_id, node, ServerMode::Movement, &register.region);
            }
            MediaServerEvent::StorePipeRelay(store) => {
                let Some(ingress) = self.reporter(connection_id, node, ServerMode::Ingress) else {
                    warn!(connection_id = %connection_id, "storePipeRelay from unknown server");
                    return;
                };
                self.pipes
                    .open(ingress, store.egress.clone(), store.ingress_route);
                self.forward(ServerMode::Egress, &store.egress, frame.clone());
            }
            MediaServerEvent::ConnectPipeRelay(connect) => {
                let Some(egress) = self.reporter(connection_id, node, ServerMode::Egress) else {
                    warn!(connection_id = %connection_id, "connectPipeRelay from unknown server");
                    return;
                };
                match self
                    .pipes
                    .connect(&egress, &connect.ingress_route, connect.egress_route)
                {
                    Some(pipe) => {
                        self.forward(ServerMode::Ingress, &pipe.ingress, frame.clone());
                    }
                    None => error!(
                        egress = %egress,
                        ingress_route = %connect.ingress_route,
                        "No pipe relay for connectPipeRelay, abandoning handshake"
                    ),
                }
            }
            MediaServerEvent::CreateRelayProducer(create) => {
                self.forward(ServerMode::Egress, &create.egress, frame.clone());
            }
            MediaServerEvent::CreatedRelayProducer(created) => {
                let Some(egress) = self.reporter(connection_id, node, ServerMode::Egress) else {
                    warn!(
                        connection_id = %connection_id,
                        "createdRelayProducer from unregistered server"
                    );
                    return;
                };
                let Some(handler) = self.handler() else {
                    warn!("No route handler attached, dropping createdRelayProducer");
                    return;
                };
                let Some(messages) = handler.consumer_messages(&created) else {
                    warn!(peer_id = %created.peer_id, "Relay producer for unknown peer");
                    return;
                };
                debug!(
                    peer_id = %created.peer_id,
                    egress = %egress,
                    consumers = messages.len(),
                    "Dispatching consumer messages"
                );
                for envelope in messages {
                    self.send(ServerMode::Egress, &egress, envelope);
                }
            }
            MediaServerEvent::ServerLoad(report) => {
                if self.registry.record_load(connection_id, report.load) == 0 {
                    debug!(
                        connection_id = %connection_id,
                        "Load report from unregistered connection"
                    );
                }
            }
            MediaServerEvent::Other(kind) => {
                info!(
                    connection_id = %connection_id,
                    message_type = %kind,
                    "Unhandled media-server message"
                );
            }
        }
    }

    fn register(
        &self,
        connection_id: &str,
        node: Option<ServerId>,
        mode: ServerMode,
        region: &str,
    ) {
        let Some(server_id) = node else {
            error!(connection_id = %connection_id, mode = %mode, "Registration without node id");
            return;
        };
        let region = match region.parse::<Region>() {
            Ok(region) => region,
            Err(e) => {
                error!(server_id = %server_id, error = %e, "Registration with unknown region");
                return;
            }
        };
        let Some(link) = self.links.get(connection_id).map(|l| l.value().clone()) else {
            warn!(connection_id = %connection_id, "Registration on a closed connection");
            return;
        };
        self.registry.register(mode, server_id, region, link);
    }

    /// Server that sent a frame: the envelope's `node`, else the connection's
    /// registered server of `mode`.
    fn reporter(
        &self,
        connection_id: &str,
        node: Option<ServerId>,
        mode: ServerMode,
    ) -> Option<ServerId> {
        node.or_else(|| {
            self.registry
                .servers_on(connection_id)
                .into_iter()
                .find(|(m, _)| *m == mode)
                .map(|(_, id)| id)
        })
    }

    fn forward_communication(&self, wsid: Option<TransportId>, communication: Value) {
        let Some(wsid) = wsid else {
            warn!("Communication without wsid, dropping");
            return;
        };
        match self.handler() {
            Some(handler) => handler.relay_to_client(&wsid, communication),
            None => warn!(wsid = %wsid, "No route handler attached, dropping communication"),
        }
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    /// Map a client edge code to a region that has egress capacity
    #[must_use]
    pub fn resolve_region(&self, edge_code: &str) -> Region {
        resolve_region(edge_code, self.primary_region, |region| {
            self.registry.has_servers(ServerMode::Egress, region)
        })
    }

    fn select(&self, mode: ServerMode, region: Region) -> Option<ServerId> {
        match self.registry.select(mode, region)? {
            Selection::Regional(id) => Some(id),
            Selection::Fallback(id, fallback) => {
                debug!(
                    mode = %mode,
                    requested = %region,
                    fallback = %fallback,
                    server_id = %id,
                    "Region empty, using fallback"
                );
                Some(id)
            }
        }
    }

    #[must_use]
    pub fn get_ingress(&self, region: Region) -> Option<ServerId> {
        self.select(ServerMode::Ingress, region)
    }

    #[must_use]
    pub fn get_egress(&self, region: Region) -> Option<ServerId> {
        self.select(ServerMode::Egress, region)
    }

    #[must_use]
    pub fn get_movement(&self, region: Region) -> Option<ServerId> {
        self.select(ServerMode::Movement, region)
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Frame and queue `envelope` for `server`; unknown targets are dropped
    pub fn send(&self, mode: ServerMode, server: &ServerId, mut envelope: Envelope) -> bool {
        let Some(link) = self.registry.link(mode, server) else {
            warn!(server_id = %server, mode = %mode, "Unknown media server, dropping message");
            return false;
        };
        envelope.node = Some(server.clone());
        match encode_envelope(&envelope) {
            Ok(frame) => self.deliver(&link, server, frame),
            Err(e) => {
                error!(server_id = %server, error = %e, "Failed to encode envelope");
                false
            }
        }
    }

    fn forward(&self, mode: ServerMode, server: &ServerId, frame: Bytes) -> bool {
        let Some(link) = self.registry.link(mode, server) else {
            warn!(server_id = %server, mode = %mode, "Unknown forward target, dropping frame");
            return false;
        };
        self.deliver(&link, server, frame)
    }

    fn deliver(&self, link: &ServerLink, server: &ServerId, frame: Bytes) -> bool {
        if link.send(frame) {
            true
        } else {
            warn!(
                server_id = %server,
                connection_id = %link.connection_id(),
                "Media-server writer closed"
            );
            false
        }
    }

    fn send_to_room(&self, mode: ServerMode, room: &RoomName, envelope: &Envelope) -> usize {
        let Some(entry) = self.routes.get(room) else {
            debug!(room = %room, "No routing entry for room");
            return 0;
        };
        entry
            .servers(mode)
            .iter()
            .filter(|server| self.send(mode, server, envelope.clone()))
            .count()
    }

    pub fn request_join(&self, mode: ServerMode, server: &ServerId, envelope: Envelope) -> bool {
        self.send(mode, server, envelope)
    }

    pub fn request_ingress_transport(&self, ingress: &ServerId, envelope: Envelope) -> bool {
        self.send(ServerMode::Ingress, ingress, envelope)
    }

    pub fn request_egress_transport(&self, egress: &ServerId, envelope: Envelope) -> bool {
        self.send(ServerMode::Egress, egress, envelope)
    }

    pub fn connect_ingress_transport(&self, ingress: &ServerId, envelope: Envelope) -> bool {
        self.send(ServerMode::Ingress, ingress, envelope)
    }

    pub fn connect_egress_transport(&self, egress: &ServerId, envelope: Envelope) -> bool {
        self.send(ServerMode::Egress, egress, envelope)
    }

    pub fn create_audio_producer(&self, ingress: &ServerId, envelope: Envelope) -> bool {
        self.send(ServerMode::Ingress, ingress, envelope)
    }

    pub fn create_video_producer(&self, ingress: &ServerId, envelope: Envelope) -> bool {
        self.send(ServerMode::Ingress, ingress, envelope)
    }

    pub fn create_movement_producer(&self, ingress: &ServerId, envelope: Envelope) -> bool {
        self.send(ServerMode::Ingress, ingress, envelope)
    }

    pub fn create_event_producer(&self, ingress: &ServerId, envelope: Envelope) -> bool {
        self.send(ServerMode::Ingress, ingress, envelope)
    }

    /// Fan out to every egress backing `room`; returns how many accepted it
    pub fn request_all_audio(&self, room: &RoomName, envelope: &Envelope) -> usize {
        self.send_to_room(ServerMode::Egress, room, envelope)
    }

    pub fn request_all_video(&self, room: &RoomName, envelope: &Envelope) -> usize {
        self.send_to_room(ServerMode::Egress, room, envelope)
    }

    pub fn request_all_movement(&self, room: &RoomName, envelope: &Envelope) -> usize {
        self.send_to_room(ServerMode::Egress, room, envelope)
    }

    pub fn request_all_events(&self, room: &RoomName, envelope: &Envelope) -> usize {
        self.send_to_room(ServerMode::Egress, room, envelope)
    }

    pub fn pause_producer(&self, ingress: &ServerId, envelope: Envelope) -> bool {
        self.send(ServerMode::Ingress, ingress, envelope)
    }

    pub fn resume_producer(&self, ingress: &ServerId, envelope: Envelope) -> bool {
        self.send(ServerMode::Ingress, ingress, envelope)
    }

    pub fn pause_consumer(&self, egress: &ServerId, envelope: Envelope) -> bool {
        self.send(ServerMode::Egress, egress, envelope)
    }

    pub fn resume_consumer(&self, egress: &ServerId, envelope: Envelope) -> bool {
        self.send(ServerMode::Egress, egress, envelope)
    }

    /// Close a producer on both its egress and ingress
    pub fn producer_close(
        &self,
        egress: Option<&ServerId>,
        ingress: Option<&ServerId>,
        envelope: Envelope,
    ) -> usize {
        let mut sent = 0;
        if let Some(egress) = egress {
            sent += usize::from(self.send(ServerMode::Egress, egress, envelope.clone()));
        }
        if let Some(ingress) = ingress {
            sent += usize::from(self.send(ServerMode::Ingress, ingress, envelope));
        }
        sent
    }

    /// Restart ICE on the egress when one is given and connected, else ingress
    pub fn restart_ice(
        &self,
        egress: Option<&ServerId>,
        ingress: Option<&ServerId>,
        envelope: Envelope,
    ) -> bool {
        if let Some(egress) = egress.filter(|e| self.registry.contains(ServerMode::Egress, e)) {
            return self.send(ServerMode::Egress, egress, envelope);
        }
        match ingress {
            Some(ingress) => self.send(ServerMode::Ingress, ingress, envelope),
            None => {
                warn!("restartIce with no reachable server");
                false
            }
        }
    }

    pub fn close_egress_transport(&self, egress: &ServerId, envelope: Envelope) -> bool {
        self.send(ServerMode::Egress, egress, envelope)
    }

    pub fn close_ingress_transport(&self, ingress: &ServerId, envelope: Envelope) -> bool {
        self.send(ServerMode::Ingress, ingress, envelope)
    }

    /// Record which servers back `room`
    pub fn update_route(&self, room: RoomName, entry: RouteEntry) {
        self.routes.upsert(room, entry);
    }

    /// Send room teardown to every server in the room's routing entry and
    /// forget the entry. Returns the number of teardown messages queued.
    pub fn close_room(&self, room: &RoomName) -> usize {
        let Some(entry) = self.routes.remove(room) else {
            debug!(room = %room, "close_room for unrouted room");
            return 0;
        };

        let envelope = Envelope::new(ServerCommand::CloseRoom(CloseRoom { room: room.clone() }));
        let sent = ServerMode::ALL
            .into_iter()
            .flat_map(|mode| entry.servers(mode).iter().map(move |server| (mode, server)))
            .filter(|(mode, server)| self.send(*mode, server, envelope.clone()))
            .count();

        info!(room = %room, teardown_sent = sent, "Room closed");
        sent
    }
}
