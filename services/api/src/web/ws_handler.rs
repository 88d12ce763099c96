//! services/api/src/web/ws_handler.rs
//!
//! The push channel. A socket is authenticated before the upgrade, registered
//! into the fan-out router, and then relays broker events until the client
//! leaves or its session is revoked.

use crate::web::{
    middleware::bearer_token,
    protocol::{ClientMessage, ServerMessage},
    rpc::{public_message, RpcError},
    state::AppState,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
};
use chat_core::{BrokerEvent, ChatError, ConnectionGuard, SessionContext};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// The handler for upgrading HTTP requests to WebSocket connections.
///
/// The token comes from `?token=` (browsers cannot set headers on a socket)
/// or, failing that, from a bearer header.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
) -> Result<Response, RpcError> {
    let token = params
        .token
        .as_deref()
        .or_else(|| bearer_token(&headers))
        .ok_or(RpcError(ChatError::InvalidToken))?;
    let ctx = app_state.broker.authenticate(token).await?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, app_state, ctx)))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, ctx: SessionContext) {
    let (mut sender, mut receiver) = socket.split();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let guard = app_state.broker.connect(&ctx, event_tx).await;
    info!(
        user = %ctx.user_id,
        session = %ctx.session_id,
        connection = %guard.id(),
        "WebSocket connection established"
    );

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let revoked = matches!(event, BrokerEvent::SessionRevoked { .. });
                if send_frame(&mut sender, &ServerMessage::from(event)).await.is_err() {
                    break;
                }
                if revoked {
                    info!(session = %ctx.session_id, "Session revoked, closing socket");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_text_message(text.as_str(), &app_state, &guard).await;
                        if let Some(reply) = reply {
                            if send_frame(&mut sender, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Client disconnected.");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket receive failed: {}", e);
                        break;
                    }
                }
            }
        }
    }

    app_state.broker.disconnect(guard).await;
    info!(user = %ctx.user_id, "WebSocket connection closed.");
}

/// Applies one client frame. Returns the frame to answer with, if any.
async fn handle_text_message(
    text: &str,
    app_state: &Arc<AppState>,
    guard: &ConnectionGuard,
) -> Option<ServerMessage> {
    let client_msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(connection = %guard.id(), "Rejected client frame: {}", e);
            return Some(ServerMessage::Error {
                message: format!("Invalid message: {}", e),
            });
        }
    };

    match client_msg {
        ClientMessage::SubscribeRoom { room_id } => {
            match app_state.broker.subscribe_room(guard, room_id).await {
                Ok(()) => None,
                Err(e) => {
                    warn!(connection = %guard.id(), room = %room_id, "Subscribe refused: {}", e);
                    Some(ServerMessage::Error {
                        message: public_message(&e),
                    })
                }
            }
        }
        ClientMessage::UnsubscribeRoom { room_id } => {
            app_state.broker.unsubscribe_room(guard, room_id);
            None
        }
        ClientMessage::Ping => Some(ServerMessage::Pong),
    }
}

async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &ServerMessage,
) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize server frame: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(json.into())).await
}
