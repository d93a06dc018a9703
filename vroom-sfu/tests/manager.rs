use bytes::Bytes;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use vroom_cluster::{ConnectionId, RouteHandler, SignalRouter};
use vroom_core::config::SignalingConfig;
use vroom_core::{PeerId, Region, RoomName, ServerId, TransportId};
use vroom_sfu::{
    ClientHub, Outbound, PeerConnectionManager, PeerRole, RoomActivityLog, RoomObserver,
};

struct Harness {
    router: Arc<SignalRouter>,
    hub: Arc<ClientHub>,
    manager: Arc<PeerConnectionManager>,
    activity: Arc<RoomActivityLog>,
}

fn harness() -> Harness {
    let router = Arc::new(SignalRouter::new(Region::UsEast1));
    let hub = Arc::new(ClientHub::new(64));
    let activity = Arc::new(RoomActivityLog::new());
    let observer: Arc<dyn RoomObserver> = activity.clone();
    let config = SignalingConfig::default();
    let manager = PeerConnectionManager::new(router.clone(), hub.clone(), &config, Some(observer));
    Harness {
        router,
        hub,
        manager,
        activity,
    }
}

struct MediaServer {
    connection: ConnectionId,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl MediaServer {
    fn received(&mut self) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(bytes) = self.rx.try_recv() {
            out.push(serde_json::from_slice(&bytes).unwrap());
        }
        out
    }
}

fn media_server(router: &SignalRouter, node: &str, mode: &str) -> MediaServer {
    let (connection, rx) = router.open_connection();
    router.handle_frame(
        &connection,
        Bytes::from(
            json!({
                "node": node,
                "message": {
                    "type": "registerMediaServer",
                    "data": {"mode": mode, "region": "us-east-1"}
                }
            })
            .to_string(),
        ),
    );
    MediaServer { connection, rx }
}

fn movement_server(router: &SignalRouter, node: &str) -> MediaServer {
    let (connection, rx) = router.open_connection();
    router.handle_frame(
        &connection,
        Bytes::from(
            json!({
                "node": node,
                "message": {"type": "registerMovementServer", "data": {"region": "us-east-1"}}
            })
            .to_string(),
        ),
    );
    MediaServer { connection, rx }
}

fn report_load(router: &SignalRouter, server: &MediaServer, load: f64) {
    router.handle_frame(
        &server.connection,
        Bytes::from(json!({"message": {"type": "serverLoad", "data": {"load": load}}}).to_string()),
    );
}

struct Client {
    transport: TransportId,
    rx: mpsc::Receiver<Outbound>,
    peer_id: PeerId,
}

impl Client {
    fn received(&mut self) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            if let Outbound::Text(text) = frame {
                out.push(serde_json::from_str(&text).unwrap());
            }
        }
        out
    }
}

fn connect(h: &Harness, name: &str) -> Client {
    let transport = TransportId::from(name);
    let rx = h.hub.register(transport.clone());
    let peer_id = h.manager.request_identity(&transport, Some("ATL"));
    Client { transport, rx, peer_id }
}

fn send(h: &Harness, client: &Client, value: Value) {
    h.manager.handle_text(&client.transport, &value.to_string());
}

/// Send `{type, message}` from `client`
fn command(h: &Harness, client: &Client, kind: &str, message: Value) {
    send(h, client, json!({"type": kind, "message": message}));
}

fn join(h: &Harness, client: &Client, room: &str) {
    command(h, client, "joinRoom", json!({"peerId": client.peer_id, "room": room}));
}

fn create_ingress(h: &Harness, client: &Client) {
    send(
        h,
        client,
        json!({
            "type": "createIngressTransport",
            "message": {"peerId": client.peer_id, "sctpOptions": {}, "rtpCapabilities": {}}
        }),
    );
}

/// `wsid` of every `joinRoom` in `frames`, in order
fn joined(frames: &[Value]) -> Vec<&str> {
    frames
        .iter()
        .filter(|f| f["message"]["type"] == "joinRoom")
        .filter_map(|f| f["wsid"].as_str())
        .collect()
}

fn types(frames: &[Value]) -> Vec<&str> {
    frames
        .iter()
        .map(|f| {
            f["message"]["type"]
                .as_str()
                .or_else(|| f["type"].as_str())
                .unwrap_or_default()
        })
        .collect()
}

#[test]
fn identity_is_stable_per_transport() {
    let h = harness();
    let transport = TransportId::from("t1");
    let mut rx = h.hub.register(transport.clone());

    h.manager
        .handle_text(&transport, r#"{"type":"requestIdentity","message":{"region":"ATL"}}"#);
    h.manager
        .handle_text(&transport, r#"{"type":"requestIdentity","message":{"region":"ATL"}}"#);

    assert_eq!(h.manager.peer_count(), 1);
    let mut ids = Vec::new();
    while let Ok(Outbound::Text(text)) = rx.try_recv() {
        let frame: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(frame["type"], "identity");
        // no egress registered in us-east-1 yet: falls back to the primary region
        assert_eq!(frame["message"]["region"], "us-east-1");
        ids.push(frame["message"]["id"].as_str().unwrap().to_string());
    }
    assert_eq!(ids.len(), 2);
    assert_eq!(ids[0], ids[1]);
}

#[test]
fn join_then_leave_tears_room_down() {
    let h = harness();
    let mut ingress = media_server(&h.router, "I1", "ingress");
    let mut egress = media_server(&h.router, "E1", "egress");
    let client = connect(&h, "t1");
    let room = RoomName::from("demo");

    join(&h, &client, "demo");

    let peer = h.manager.peer(&client.peer_id).unwrap();
    assert_eq!(peer.region, Region::UsEast1);
    assert_eq!(peer.room.as_ref(), Some(&room));
    assert_eq!(peer.role, PeerRole::Lobby);
    assert_eq!(peer.ingress, Some(ServerId::from("I1")));
    assert_eq!(peer.egress, Some(ServerId::from("E1")));
    assert_eq!(h.manager.counter(&room).unwrap().peer_count, 0);

    let joins = ingress.received();
    assert_eq!(types(&joins), ["joinRoom"]);
    assert_eq!(joins[0]["node"], "I1");
    assert_eq!(joins[0]["wsid"], "t1");
    assert_eq!(types(&egress.received()), ["joinRoom"]);

    create_ingress(&h, &client);
    let counter = h.manager.counter(&room).unwrap();
    assert_eq!((counter.lobby_count, counter.peer_count), (1, 1));
    assert_eq!(counter.participant_count, 0);
    ingress.received();

    send(
        &h,
        &client,
        json!({"type": "leaveRoom", "message": {"peerId": client.peer_id, "room": "demo"}}),
    );

    assert_eq!(types(&ingress.received()), ["disconnectTransport", "closeRoom"]);
    assert_eq!(types(&egress.received()), ["disconnectTransport", "closeRoom"]);
    assert_eq!(h.manager.room_count(), 0);
    assert!(h.manager.counter(&room).is_none());
    assert!(h.router.routes().get(&room).is_none());

    // the peer survives leaving; only its membership is reset
    let peer = h.manager.peer(&client.peer_id).unwrap();
    assert!(peer.room.is_none());
    assert!(peer.egress.is_none());
}

#[test]
fn new_egress_joins_peers_already_in_room() {
    let h = harness();
    let _ingress = media_server(&h.router, "I1", "ingress");
    let mut e1 = media_server(&h.router, "E1", "egress");
    let a = connect(&h, "a");
    join(&h, &a, "demo");
    assert_eq!(joined(&e1.received()), ["a"]);

    let mut e2 = media_server(&h.router, "E2", "egress");
    report_load(&h.router, &e1, 5.0);
    report_load(&h.router, &e2, 1.0);
    let b = connect(&h, "b");
    join(&h, &b, "demo");

    // E1 already serves the room, so it picks up the newcomer; E2 is new to
    // the room and must learn about everyone
    assert_eq!(joined(&e1.received()), ["b"]);
    assert_eq!(joined(&e2.received()), ["b", "a"]);

    let room = RoomName::from("demo");
    assert_eq!(
        h.manager.room(&room).unwrap().egress,
        vec![ServerId::from("E1"), ServerId::from("E2")]
    );
    assert_eq!(h.manager.peer(&a.peer_id).unwrap().egress, Some(ServerId::from("E1")));
    assert_eq!(h.manager.peer(&b.peer_id).unwrap().egress, Some(ServerId::from("E2")));
    assert_eq!(h.router.routes().get(&room).unwrap().egress.len(), 2);
}

#[test]
fn join_without_capacity_is_aborted() {
    let h = harness();
    let client = connect(&h, "t1");

    join(&h, &client, "demo");

    assert_eq!(h.manager.room_count(), 0);
    assert!(h.manager.peer(&client.peer_id).unwrap().room.is_none());
}

#[test]
fn switching_rooms_without_capacity_keeps_current_room() {
    let h = harness();
    let ingress = media_server(&h.router, "I1", "ingress");
    let mut egress = media_server(&h.router, "E1", "egress");
    let client = connect(&h, "t1");
    join(&h, &client, "one");
    egress.received();

    // the ingress disappears from selection without its peers being dropped
    h.router.registry().unregister_connection(&ingress.connection);
    join(&h, &client, "two");

    let peer = h.manager.peer(&client.peer_id).unwrap();
    assert_eq!(peer.room, Some(RoomName::from("one")));
    assert_eq!(peer.egress, Some(ServerId::from("E1")));
    assert!(h.manager.room(&RoomName::from("one")).is_some());
    assert!(h.manager.room(&RoomName::from("two")).is_none());
    assert!(egress.received().is_empty());
}

#[test]
fn counters_follow_transport_lifecycle() {
    let h = harness();
    let _ingress = media_server(&h.router, "I1", "ingress");
    let _egress = media_server(&h.router, "E1", "egress");
    let mut a = connect(&h, "a");
    let mut b = connect(&h, "b");
    let room = RoomName::from("demo");
    join(&h, &a, "demo");
    join(&h, &b, "demo");

    create_ingress(&h, &a);
    let counter = h.manager.counter(&room).unwrap();
    assert_eq!((counter.lobby_count, counter.peer_count), (1, 1));

    command(
        &h,
        &a,
        "connectIngressTransport",
        json!({"peerId": a.peer_id, "dtlsParameters": {}}),
    );
    let counter = h.manager.counter(&room).unwrap();
    assert_eq!((counter.lobby_count, counter.participant_count), (0, 1));
    assert_eq!(h.manager.peer(&a.peer_id).unwrap().role, PeerRole::Participant);

    a.received();
    b.received();
    h.manager.disconnect(&a.transport);
    h.manager.disconnect(&a.transport);

    let counter = h.manager.counter(&room).unwrap();
    assert_eq!(counter.participant_count, 0);
    assert_eq!(counter.peer_count, 0);
    assert!(h.activity.last_emptied(&room).is_some());

    // b is still in the lobby without a transport: the room stays
    assert_eq!(h.manager.room_count(), 1);
    assert_eq!(types(&b.received()), ["peerDisconnect", "peerCount"]);

    send(&h, &b, json!({"type": "leaveRoom", "message": {"peerId": b.peer_id, "room": "demo"}}));
    assert_eq!(h.manager.room_count(), 0);
}

#[test]
fn relay_producer_targets_room_members() {
    let h = harness();
    let _ingress = media_server(&h.router, "I1", "ingress");
    let mut egress = media_server(&h.router, "E1", "egress");
    let a = connect(&h, "a");
    let b = connect(&h, "b");
    let c = connect(&h, "c");
    for client in [&a, &b, &c] {
        join(&h, client, "demo");
    }
    for client in [&a, &b] {
        command(
            &h,
            client,
            "getRoomMovement",
            json!({"peerId": client.peer_id, "isSpectator": false}),
        );
    }
    assert_eq!(h.manager.peer(&c.peer_id).unwrap().role, PeerRole::Lobby);
    egress.received();

    let report = |data: Value| {
        let message = json!({"type": "createdRelayProducer", "data": data});
        Bytes::from(json!({"node": "E1", "message": message}).to_string())
    };
    let producer = a.peer_id.as_str();

    h.router
        .handle_frame(&egress.connection, report(json!({"peerId": producer, "kind": "audio"})));
    let consumes = egress.received();
    assert_eq!(types(&consumes), ["consumeAudio"]);
    assert_eq!(consumes[0]["wsid"], "b");
    assert_eq!(consumes[0]["message"]["data"]["producerPeerId"], a.peer_id.as_str());

    h.router.handle_frame(
        &egress.connection,
        report(json!({"peerId": producer, "label": "FrameEvents"})),
    );
    let mut consumers: Vec<String> = egress
        .received()
        .iter()
        .map(|f| f["wsid"].as_str().unwrap().to_string())
        .collect();
    consumers.sort();
    assert_eq!(consumers, ["a", "b"]);

    h.router
        .handle_frame(&egress.connection, report(json!({"peerId": producer, "label": "position"})));
    assert_eq!(types(&egress.received()), ["consumeMovement"]);
}

#[test]
fn consume_request_lists_other_peers() {
    let h = harness();
    let _ingress = media_server(&h.router, "I1", "ingress");
    let mut egress = media_server(&h.router, "E1", "egress");
    let a = connect(&h, "a");
    let b = connect(&h, "b");
    join(&h, &a, "demo");
    join(&h, &b, "demo");
    egress.received();

    send(&h, &a, json!({"type": "getRoomAudio", "message": {"peerId": a.peer_id}}));

    let requests = egress.received();
    assert_eq!(types(&requests), ["requestAllAudio"]);
    assert_eq!(
        requests[0]["message"]["data"]["producerPeerIds"],
        json!([b.peer_id.as_str()])
    );
}

#[test]
fn spectator_counts_separately() {
    let h = harness();
    let _ingress = media_server(&h.router, "I1", "ingress");
    let _egress = media_server(&h.router, "E1", "egress");
    let a = connect(&h, "a");
    let room = RoomName::from("demo");
    join(&h, &a, "demo");
    send(
        &h,
        &a,
        json!({"type": "createIngressTransport", "message": {"peerId": a.peer_id}}),
    );
    send(
        &h,
        &a,
        json!({"type": "getRoomMovement", "message": {"peerId": a.peer_id, "isSpectator": true}}),
    );

    let counter = h.manager.counter(&room).unwrap();
    assert_eq!(counter.spectator_count, 1);
    assert_eq!(counter.lobby_count, 0);
    assert!(counter.is_vacant());

    h.manager.disconnect(&a.transport);
    assert_eq!(h.manager.room_count(), 0);
}

#[test]
fn lost_media_server_drops_its_peers() {
    let h = harness();
    let ingress = media_server(&h.router, "I1", "ingress");
    let mut egress = media_server(&h.router, "E1", "egress");
    let mut client = connect(&h, "t1");
    join(&h, &client, "demo");
    egress.received();
    client.received();

    h.router.close_connection(&ingress.connection);

    assert_eq!(h.manager.peer_count(), 0);
    assert_eq!(h.manager.room_count(), 0);
    assert!(!h.hub.contains(&client.transport));
    assert_eq!(types(&egress.received()), ["disconnectTransport", "closeRoom"]);

    let mut last = None;
    while let Ok(frame) = client.rx.try_recv() {
        last = Some(frame);
    }
    assert_eq!(last, Some(Outbound::Close));
}

#[test]
fn lost_movement_server_keeps_peers_connected() {
    let h = harness();
    let _ingress = media_server(&h.router, "I1", "ingress");
    let _egress = media_server(&h.router, "E1", "egress");
    let movement = movement_server(&h.router, "M1");
    let mut client = connect(&h, "t1");
    join(&h, &client, "demo");
    assert_eq!(
        h.manager.peer(&client.peer_id).unwrap().movement,
        Some(ServerId::from("M1"))
    );
    client.received();

    h.router.close_connection(&movement.connection);

    assert_eq!(h.manager.peer_count(), 1);
    assert!(h.hub.contains(&client.transport));
    let peer = h.manager.peer(&client.peer_id).unwrap();
    assert_eq!(peer.ingress, Some(ServerId::from("I1")));
    assert_eq!(peer.egress, Some(ServerId::from("E1")));
    assert!(peer.movement.is_none());
    // rooms naming the lost server are still removed
    assert_eq!(h.manager.room_count(), 0);

    while let Ok(frame) = client.rx.try_recv() {
        assert_ne!(frame, Outbound::Close);
    }
}

#[test]
fn drop_route_ignores_unrelated_server() {
    let h = harness();
    let _ingress = media_server(&h.router, "I1", "ingress");
    let _egress = media_server(&h.router, "E1", "egress");
    let client = connect(&h, "t1");
    join(&h, &client, "demo");

    h.manager.drop_route(&ServerId::from("E9"));

    assert_eq!(h.manager.peer_count(), 1);
    assert_eq!(h.manager.room_count(), 1);
}

#[test]
fn boot_removes_target() {
    let h = harness();
    let _ingress = media_server(&h.router, "I1", "ingress");
    let _egress = media_server(&h.router, "E1", "egress");
    let mut a = connect(&h, "a");
    let mut b = connect(&h, "b");
    join(&h, &a, "demo");
    join(&h, &b, "demo");
    a.received();
    b.received();

    send(&h, &b, json!({"type": "bootPeer", "message": {"peerId": a.peer_id, "reason": "spam"}}));

    assert!(h.manager.peer(&a.peer_id).is_none());
    assert!(!h.hub.contains(&a.transport));
    let Ok(Outbound::Text(text)) = a.rx.try_recv() else {
        panic!("expected bootUser");
    };
    let boot: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(boot, json!({"type": "bootUser", "message": {"reason": "spam"}}));
    assert_eq!(a.rx.try_recv().unwrap(), Outbound::Close);

    let frames = b.received();
    assert_eq!(types(&frames)[0], "peerDisconnect");
    assert_eq!(frames[0]["message"]["peerId"], a.peer_id.as_str());
}

#[test]
fn stream_state_pauses_consumers() {
    let h = harness();
    let _ingress = media_server(&h.router, "I1", "ingress");
    let mut egress = media_server(&h.router, "E1", "egress");
    let mut a = connect(&h, "a");
    let mut b = connect(&h, "b");
    join(&h, &a, "demo");
    join(&h, &b, "demo");
    egress.received();
    a.received();
    b.received();

    command(&h, &a, "setAudioState", json!({"peerId": a.peer_id, "enabled": false}));

    let pauses = egress.received();
    assert_eq!(types(&pauses), ["pauseConsumer"]);
    assert_eq!(pauses[0]["message"]["data"]["kind"], "audio");
    assert_eq!(
        b.received(),
        [json!({
            "type": "setConsumerState",
            "message": {"peerId": a.peer_id.as_str(), "kind": "audio", "enabled": false}
        })]
    );
    assert!(a.received().is_empty());
}

#[test]
fn producer_ids_recorded_and_closed() {
    let h = harness();
    let ingress = media_server(&h.router, "I1", "ingress");
    let mut egress = media_server(&h.router, "E1", "egress");
    let mut client = connect(&h, "t1");
    join(&h, &client, "demo");
    egress.received();
    client.received();

    h.router.handle_frame(
        &ingress.connection,
        Bytes::from(
            json!({
                "wsid": "t1",
                "node": "I1",
                "communication": {
                    "type": "producedMedia",
                    "message": {"id": "prod-1", "kind": "audio"}
                }
            })
            .to_string(),
        ),
    );

    assert_eq!(
        h.manager.peer(&client.peer_id).unwrap().producers.audio.as_deref(),
        Some("prod-1")
    );
    assert_eq!(types(&client.received()), ["producedMedia"]);

    command(
        &h,
        &client,
        "producerClose",
        json!({"peerId": client.peer_id, "producerId": "prod-1"}),
    );
    assert!(h.manager.peer(&client.peer_id).unwrap().producers.audio.is_none());
    assert_eq!(types(&egress.received()), ["producerClose"]);
}

#[test]
fn indicators_reach_the_rest_of_the_room() {
    let h = harness();
    let _ingress = media_server(&h.router, "I1", "ingress");
    let _egress = media_server(&h.router, "E1", "egress");
    let mut a = connect(&h, "a");
    let mut b = connect(&h, "b");
    join(&h, &a, "demo");
    join(&h, &b, "demo");
    a.received();
    b.received();

    command(
        &h,
        &a,
        "peerIndicators",
        json!({"peerId": a.peer_id, "indicators": {"hand": true}}),
    );
    assert!(a.received().is_empty());
    assert_eq!(types(&b.received()), ["peerIndicators"]);

    command(
        &h,
        &b,
        "replyPeerIndicators",
        json!({"peerId": b.peer_id, "target": a.peer_id, "indicators": {}}),
    );
    assert_eq!(types(&a.received()), ["peerIndicatorsReply"]);

    command(&h, &a, "hushUser", json!({"peerId": a.peer_id, "target": b.peer_id}));
    assert_eq!(
        b.received(),
        [json!({"type": "hushed", "message": {"by": a.peer_id.as_str()}})]
    );
}

#[test]
fn room_metrics_for_known_rooms() {
    let h = harness();
    let _ingress = media_server(&h.router, "I1", "ingress");
    let _egress = media_server(&h.router, "E1", "egress");
    let mut a = connect(&h, "a");
    join(&h, &a, "demo");
    a.received();

    send(&h, &a, json!({"type": "getRoomMetrics", "message": {"rooms": ["demo", "missing"]}}));

    let frames = a.received();
    assert_eq!(types(&frames), ["peerCount"]);
    let rooms = frames[0]["message"]["rooms"].as_object().unwrap();
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms["demo"]["peerCount"], 0);
}

#[tokio::test(start_paused = true)]
async fn stats_stream_until_stopped() {
    let h = harness();
    let _egress = media_server(&h.router, "E1", "egress");
    let mut client = connect(&h, "t1");
    client.received();

    command(&h, &client, "beginSendingStats", json!({}));
    tokio::time::sleep(Duration::from_millis(2500)).await;

    let frames = client.received();
    assert!(frames.len() >= 2);
    assert!(frames.iter().all(|f| f["type"] == "stats"));
    assert_eq!(frames[0]["message"]["egress"][0]["serverId"], "E1");

    send(&h, &client, json!({"type": "endSendingStats"}));
    tokio::time::sleep(Duration::from_millis(3000)).await;
    assert!(client.received().is_empty());
}

#[test]
fn disconnect_command_accepts_optional_body() {
    let h = harness();
    let with_body = connect(&h, "t1");
    let without_body = connect(&h, "t2");
    assert_eq!(h.manager.peer_count(), 2);

    send(
        &h,
        &with_body,
        json!({"type": "disconnectPeerWebsocket", "message": {"peerId": with_body.peer_id}}),
    );
    assert!(h.manager.peer(&with_body.peer_id).is_none());

    send(&h, &without_body, json!({"type": "disconnectPeerWebsocket"}));
    assert_eq!(h.manager.peer_count(), 0);
}

#[test]
fn malformed_commands_are_ignored() {
    let h = harness();
    let client = connect(&h, "t1");

    h.manager.handle_text(&client.transport, "not json");
    h.manager
        .handle_text(&client.transport, r#"{"type":"launchRockets","message":{}}"#);
    h.manager.handle_text(&client.transport, r#"{"type":"joinRoom","message":{}}"#);

    assert_eq!(h.manager.peer_count(), 1);
    assert_eq!(h.manager.room_count(), 0);
}
