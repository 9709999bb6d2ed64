//! Connection handlers for the Huddle server.
//!
//! This module handles the connection lifecycle and event processing.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::security;
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    middleware,
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use huddle_core::{outbox, Broadcaster, ConnectionId};
use huddle_protocol::{codec, ClientEvent, Encoded, Encoding, JoinRoom, ServerEvent};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Room membership and fan-out.
    pub broadcaster: Broadcaster,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let broadcaster = Broadcaster::with_clock(
            config.chat.broadcaster_config(),
            Arc::new(config.chat.clock()),
        );

        Self {
            broadcaster,
            config,
        }
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    let config = &state.config;

    Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route(&config.http.chat_path, get(security::chat_page))
        .route("/health", get(health_handler))
        .fallback_service(ServeDir::new(&config.http.static_dir))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            security::security_headers,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let websocket_path = config.transport.websocket_path.clone();
    let chat_path = config.http.chat_path.clone();
    let state = Arc::new(AppState::new(config));

    let listener = TcpListener::bind(addr).await?;

    info!("Huddle server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, websocket_path);
    info!("Chat page: http://{}{}", addr, chat_path);

    axum::serve(listener, app(state)).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.broadcaster.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.connection_count,
        "room_count": stats.room_count,
        "rooms": state.broadcaster.registry().room_names(),
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.max_message_size(state.config.transport.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (tx, mut inbox) = outbox();
    let connection_id = state.broadcaster.connect(tx);

    debug!(connection = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    // Replies use whatever encoding the client last spoke
    let mut encoding = Encoding::Json;

    // Read buffer for partial binary frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    loop {
        tokio::select! {
            biased;

            // Events queued for this connection by the broadcaster
            Some(event) = inbox.recv() => {
                if let Err(e) = send_event(&mut sender, &event, encoding).await {
                    debug!(connection = %connection_id, error = %e, "Failed to send event");
                    break;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        encoding = Encoding::Json;
                        metrics::record_message(text.len(), "inbound");

                        match codec::decode_text(&text) {
                            Ok(event) => handle_event(event, &connection_id, &state),
                            Err(e) => {
                                warn!(connection = %connection_id, error = %e, "Ignoring malformed text frame");
                                metrics::record_error("decode");
                            }
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        encoding = Encoding::MessagePack;
                        metrics::record_message(data.len(), "inbound");
                        read_buffer.extend_from_slice(&data);

                        loop {
                            match codec::decode_from::<ClientEvent>(&mut read_buffer) {
                                Ok(Some(event)) => handle_event(event, &connection_id, &state),
                                Ok(None) => break,
                                Err(e) => {
                                    warn!(connection = %connection_id, error = %e, "Discarding malformed binary frame");
                                    metrics::record_error("decode");
                                    read_buffer.clear();
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    let report = state.broadcaster.disconnect(&connection_id);
    metrics::set_active_rooms(state.broadcaster.stats().room_count);

    info!(
        connection = %connection_id,
        room = report.room.as_deref().unwrap_or("-"),
        notified = report.notified,
        "WebSocket disconnected"
    );
}

/// Apply a decoded client event.
fn handle_event(event: ClientEvent, connection_id: &ConnectionId, state: &AppState) {
    match event {
        ClientEvent::JoinRoom(JoinRoom { username, room }) => {
            match state.broadcaster.join(connection_id, &username, &room) {
                Ok(report) => {
                    metrics::record_join();
                    metrics::set_active_rooms(state.broadcaster.stats().room_count);
                    info!(
                        connection = %connection_id,
                        username = %username,
                        room = %report.room,
                        members = report.roster.len(),
                        "User joined"
                    );
                }
                Err(e) => {
                    warn!(connection = %connection_id, error = %e, "Join failed");
                    metrics::record_error("join");
                }
            }
        }

        ClientEvent::ChatMessage(text) => match state.broadcaster.chat(connection_id, &text) {
            Ok(recipients) => metrics::record_fanout(recipients),
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "Dropping chat message");
                metrics::record_error("chat");
            }
        },
    }
}

/// Send an event to the WebSocket.
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
    encoding: Encoding,
) -> Result<()> {
    let frame = codec::encode(event, encoding)?;
    metrics::record_message(frame.len(), "outbound");

    let message = match frame {
        Encoded::Text(text) => Message::Text(text),
        Encoded::Binary(data) => Message::Binary(data.to_vec()),
    };
    sender.send(message).await?;
    Ok(())
}
