//! Client WebSocket gateway
//!
//! Each socket gets a fresh transport handle and an outbound queue in the
//! client hub. Text frames go to the peer connection manager; the hub's
//! queue is drained back onto the socket. A socket that stops answering
//! pings is closed and its session unwound like any other disconnect.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use vroom_core::config::SignalingConfig;
use vroom_core::TransportId;
use vroom_sfu::{ClientHub, Outbound, PeerConnectionManager};

#[derive(Clone)]
pub struct GatewayState {
    pub manager: Arc<PeerConnectionManager>,
    pub hub: Arc<ClientHub>,
    pub signaling: Arc<SignalingConfig>,
    pub shutdown: CancellationToken,
}

pub fn create_router(state: GatewayState) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "clients": state.hub.len(),
        "peers": state.manager.peer_count(),
        "rooms": state.manager.room_count(),
    }))
}

async fn websocket_handler(
    State(state): State<GatewayState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_message_size(state.signaling.max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: GatewayState) {
    let transport = TransportId::generate();
    let mut outbound = state.hub.register(transport.clone());
    let (mut sink, mut stream) = socket.split();
    info!(transport = %transport, "Client connected");

    let ping_every = Duration::from_secs(state.signaling.ping_interval_secs.max(1));
    let pong_timeout = Duration::from_secs(state.signaling.pong_timeout_secs.max(1));
    let mut ping = interval_at(Instant::now() + ping_every, ping_every);
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        debug!(transport = %transport, error = %e, "Client write failed");
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    state.manager.handle_text(&transport, text.as_str());
                }
                Some(Ok(Message::Pong(_))) => last_pong = Instant::now(),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(transport = %transport, error = %e, "Client read failed");
                    break;
                }
            },
            _ = ping.tick() => {
                if last_pong.elapsed() > pong_timeout {
                    warn!(transport = %transport, "Client missed pong deadline, closing");
                    break;
                }
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
            () = state.shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }

    state.manager.disconnect(&transport);
    state.hub.unregister(&transport);
    info!(transport = %transport, "Client disconnected");
}
