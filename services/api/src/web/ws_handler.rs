//! services/api/src/web/ws_handler.rs
//!
//! The WebSocket entry point for live progress. A connection subscribes to one
//! lesson's change feed, forwards every accepted write to the client, and lets
//! the client push records over the same socket.

use crate::web::{
    protocol::{ClientMessage, ServerMessage},
    rest::{validate_record, was_merged},
    state::AppState,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use progress_sync_core::ProgressRecord;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub user_id: String,
}

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Path(lesson_id): Path<String>,
    Query(params): Query<WsParams>,
) -> Response {
    if params.user_id.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "user_id is required").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, params.user_id, lesson_id))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, user_id: String, lesson_id: String) {
    info!(user_id = %user_id, lesson_id = %lesson_id, "Progress WebSocket connected.");
    let (mut sender, mut receiver) = socket.split();

    // --- 1. Subscribe ---
    let mut changes = match app_state.store.subscribe(&user_id, &lesson_id).await {
        Ok(changes) => changes,
        Err(e) => {
            error!(error = %e, "Failed to subscribe to progress changes.");
            let _ = send(&mut sender, &ServerMessage::Error { message: e.to_string() }).await;
            return;
        }
    };
    let outbound = async_stream::stream! {
        while let Some(change) = changes.next().await {
            yield match change {
                Ok(record) => ServerMessage::ProgressChanged { record: Box::new(record) },
                Err(e) => ServerMessage::Error { message: e.to_string() },
            };
        }
    };
    futures::pin_mut!(outbound);

    // --- 2. Main Message Loop ---
    loop {
        tokio::select! {
            message = outbound.next() => match message {
                Some(message) => {
                    if !send(&mut sender, &message).await {
                        break;
                    }
                }
                None => {
                    debug!("Progress change stream ended.");
                    break;
                }
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let reply = handle_text_message(text.as_str(), &app_state, &user_id, &lesson_id).await;
                    if !send(&mut sender, &reply).await {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    info!("Client sent close message.");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket receive failed.");
                    break;
                }
                None => {
                    info!("Client disconnected.");
                    break;
                }
            },
        }
    }

    // --- 3. Cleanup ---
    // Dropping the change stream unsubscribes.
    info!(lesson_id = %lesson_id, "Progress WebSocket closed.");
}

/// Applies one client message and returns the reply.
async fn handle_text_message(
    text: &str,
    app_state: &AppState,
    user_id: &str,
    lesson_id: &str,
) -> ServerMessage {
    let record = match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Push { record }) => *record,
        Err(e) => {
            warn!("Failed to deserialize client message: {}", e);
            return ServerMessage::Error {
                message: format!("unrecognised message: {}", e),
            };
        }
    };
    match push(app_state, user_id, lesson_id, record).await {
        Ok(message) => message,
        Err(message) => ServerMessage::Error { message },
    }
}

async fn push(
    app_state: &AppState,
    user_id: &str,
    lesson_id: &str,
    record: ProgressRecord,
) -> Result<ServerMessage, String> {
    if record.lesson_id != lesson_id {
        return Err(format!("this connection follows lesson {}", lesson_id));
    }
    validate_record(&record, user_id).map_err(|(_, message)| message)?;
    let incoming_version = record.sync_version;
    let stored = app_state.store.put(record).await.map_err(|e| {
        error!("Failed to store pushed progress: {:?}", e);
        e.to_string()
    })?;
    Ok(ServerMessage::PushAccepted {
        merged: was_merged(incoming_version, &stored),
        record: Box::new(stored),
    })
}

/// Returns false once the client can no longer be written to.
async fn send(sender: &mut SplitSink<WebSocket, Message>, message: &ServerMessage) -> bool {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            error!(error = %e, "Failed to encode server message.");
            return true;
        }
    };
    if let Err(e) = sender.send(Message::Text(json.into())).await {
        debug!(error = %e, "Failed to send to WebSocket client.");
        return false;
    }
    true
}
