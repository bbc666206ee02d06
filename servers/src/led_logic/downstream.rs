//! Client-facing websocket endpoint and observability routes.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;

use crate::led_logic::arbiter::SourceHandle;
use crate::led_logic::config::Config;
use crate::led_logic::model::{ClientMessage, ServerMessage};
use crate::led_logic::state::AppState;

static NEXT_CLIENT_ID: AtomicUsize = AtomicUsize::new(1);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .with_state(state)
}

pub async fn run(config: Config, state: AppState, mut shutdown: broadcast::Receiver<()>) {
    let app = router(state);
    let port = config.port.unwrap_or(9099);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    log::info!("alert endpoint listening on {}", addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("failed to bind {}: {}", addr, e);
            return;
        }
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.recv().await.ok();
            log::info!("alert endpoint shutting down");
        })
        .await
    {
        log::error!("server error: {}", e);
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn health_handler() -> impl IntoResponse {
    (axum::http::StatusCode::OK, "OK")
}

/// Degraded states (link loss, missing hardware) show up here as plain
/// data; the snapshot is whatever the arbiter currently holds.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let visible = state.arbiter.visible_alerts().await.unwrap_or_default();
    let alerts = state.arbiter.current_alerts().await.unwrap_or_default();
    let clients: Vec<_> = state
        .clients()
        .into_iter()
        .map(|(id, info)| json!({ "id": id, "name": info.name, "link": info.link }))
        .collect();
    Json(json!({ "visible": visible, "alerts": alerts, "clients": clients }))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
    state.add_client(client_id);
    let handle = state.arbiter.for_source(format!("client-{client_id}"));
    handle.register();
    log::debug!("client {} connected", client_id);

    while let Some(received) = socket.recv().await {
        let message = match received {
            Ok(message) => message,
            // Client disconnected mid-frame.
            Err(_) => break,
        };
        match message {
            Message::Text(text) => {
                let reply = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(command) => apply(&state, &handle, client_id, command),
                    Err(e) => {
                        log::debug!("dropping malformed frame from client {}: {}", client_id, e);
                        None
                    }
                };
                if let Some(reply) = reply {
                    match serde_json::to_string(&reply) {
                        Ok(json_str) => {
                            if socket.send(Message::Text(json_str.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => log::error!("failed to encode reply: {}", e),
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    handle.unregister();
    state.remove_client(client_id);
    log::debug!("client {} disconnected", client_id);
}

fn apply(
    state: &AppState,
    handle: &SourceHandle,
    client_id: usize,
    command: ClientMessage,
) -> Option<ServerMessage> {
    if command.ping.unwrap_or(false) {
        log::debug!("ping from client {}", client_id);
        return Some(ServerMessage::pong());
    }
    if let Some(alert) = &command.enable {
        log::debug!("client {} enabling {}", client_id, alert);
        handle.enable(alert);
        return Some(ServerMessage::success(true));
    }
    if let Some(alert) = &command.disable {
        log::debug!("client {} disabling {}", client_id, alert);
        handle.disable(alert);
        return Some(ServerMessage::success(true));
    }
    if command.name.is_some() || command.link.is_some() {
        state.set_identity(client_id, command.name, command.link);
        // No reply is required for identification; ack anyway so simple
        // clients can treat every request uniformly.
        return Some(ServerMessage::success(true));
    }
    log::debug!("frame from client {} carried no command", client_id);
    None
}
