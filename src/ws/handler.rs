//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::{AppState, ConnectionRole};
use crate::session::publisher::history_entries;
use crate::session::{Command, CommandError, ViewMode};
use crate::util::rate_limit::CommandRateLimiter;
use crate::ws::protocol::{ClientMsg, DisplaySnapshot, ServerMsg};

/// Replies addressed to a single connection
const DIRECT_BUFFER: usize = 16;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// `admin` for the controller, anything omitted is a display
    #[serde(default)]
    pub role: ConnectionRole,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    debug!(role = ?query.role, "WebSocket upgrade");
    ws.on_upgrade(move |socket| handle_socket(socket, query.role, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, role: ConnectionRole, state: AppState) {
    let conn_id = state.register_subscriber(role);
    info!(conn_id = %conn_id, role = ?role, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    let subscription = match state.session.subscribe().await {
        Ok(subscription) => subscription,
        Err(e) => {
            error!(conn_id = %conn_id, error = %e, "Failed to subscribe to session");
            state.unregister_subscriber(&conn_id);
            return;
        }
    };

    // Handshake: current state (and history when shown) before anything live
    for msg in &initial_messages(&state, subscription.snapshot).await {
        if let Err(e) = send_msg(&mut ws_sink, msg).await {
            error!(conn_id = %conn_id, error = %e, "Failed to send initial snapshot");
            state.unregister_subscriber(&conn_id);
            return;
        }
    }

    run_session(conn_id, role, &state, ws_sink, ws_stream, subscription.updates).await;

    if let Some(subscriber) = state.unregister_subscriber(&conn_id) {
        let connected_secs = (Utc::now() - subscriber.connected_at).num_seconds();
        info!(conn_id = %conn_id, connected_secs, "WebSocket connection closed");
    }
}

/// The state snapshot, followed by the history when displays show it.
/// A failed history read is logged and skipped; the next reload reaches
/// this connection through the broadcast feed.
async fn initial_messages(state: &AppState, snapshot: DisplaySnapshot) -> Vec<ServerMsg> {
    let show_history = snapshot.view_mode == ViewMode::History;
    let mut initial = vec![ServerMsg::UpdateDisplay(snapshot)];

    if show_history {
        match state.store.find_all_ordered().await {
            Ok(matches) => initial.push(ServerMsg::UpdateHistory {
                matches: history_entries(matches),
            }),
            Err(e) => warn!(error = %e, "Could not load history for new subscriber"),
        }
    }

    initial
}

/// Run the WebSocket session with read/write split
async fn run_session(
    conn_id: Uuid,
    role: ConnectionRole,
    state: &AppState,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    mut updates: broadcast::Receiver<ServerMsg>,
) {
    let rate_limiter = CommandRateLimiter::new(state.config.command_rate_limit);
    let (direct_tx, mut direct_rx) = mpsc::channel::<ServerMsg>(DIRECT_BUFFER);

    // Spawn writer task: broadcasts and direct replies -> WebSocket
    let writer_handle = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                update = updates.recv() => match update {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(
                            conn_id = %conn_id,
                            lagged_count = n,
                            "Client lagged, skipping {} updates", n
                        );
                        // Continue - the next snapshot is complete anyway
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(conn_id = %conn_id, "Update channel closed");
                        break;
                    }
                },
                direct = direct_rx.recv() => match direct {
                    Some(msg) => msg,
                    None => break,
                },
            };

            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(conn_id = %conn_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    // Reader loop: WebSocket -> session
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if let Err(e) = handle_text(role, state, &rate_limiter, &text).await {
                    warn!(conn_id = %conn_id, code = e.code(), error = %e, "Command rejected");
                    if direct_tx.send(e.into_msg()).await.is_err() {
                        break;
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(conn_id = %conn_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) => {
                debug!(conn_id = %conn_id, "Received ping");
            }
            Ok(Message::Pong(_)) => {
                debug!(conn_id = %conn_id, "Received pong");
            }
            Ok(Message::Close(_)) => {
                info!(conn_id = %conn_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(conn_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Abort writer task
    writer_handle.abort();
}

/// Why a text frame did not become an applied command
#[derive(Debug, thiserror::Error)]
pub enum InboundError {
    #[error("Display connections are read-only")]
    ReadOnly,

    #[error("Too many commands, slow down")]
    RateLimited,

    #[error("Malformed command: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    Command(#[from] CommandError),
}

impl InboundError {
    pub fn code(&self) -> &'static str {
        match self {
            InboundError::ReadOnly => "read_only",
            InboundError::RateLimited => "rate_limited",
            InboundError::Malformed(_) => "validation_error",
            InboundError::Command(e) => e.code(),
        }
    }

    pub fn into_msg(self) -> ServerMsg {
        ServerMsg::Error {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

/// Parse, validate and dispatch one text frame
async fn handle_text(
    role: ConnectionRole,
    state: &AppState,
    rate_limiter: &CommandRateLimiter,
    text: &str,
) -> Result<(), InboundError> {
    if role != ConnectionRole::Admin {
        return Err(InboundError::ReadOnly);
    }
    if !rate_limiter.check() {
        return Err(InboundError::RateLimited);
    }

    let client_msg: ClientMsg = serde_json::from_str(text)?;
    let command = Command::try_from(client_msg)?;
    state.session.dispatch(command).await?;
    Ok(())
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
