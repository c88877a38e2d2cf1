// src/handlers/chat.rs
use crate::middleware::auth::auth_middleware;
use crate::models::auth::Claims;
use crate::models::chat::{ChatReply, ChatRequest, RelayError};
use crate::models::preferences::{PreferencesPatch, Theme};
use crate::surface::{ChatSurface, Command, SessionUser};
use crate::AppState;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Extension,
    },
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

pub fn chat_routes() -> Router {
    let public_routes = Router::new()
        .route("/api/chat", post(relay_chat))
        .route("/ws", get(websocket_handler));

    let protected_routes = Router::new()
        .route("/api/chat/history", get(get_chat_history))
        .layer(axum::middleware::from_fn(auth_middleware));

    public_routes.merge(protected_routes)
}

/// The relay endpoint: forwards `{message, userId}` verbatim to the
/// downstream agent backend and returns its reply. Any failure, network
/// or malformed response alike, becomes a logged 500.
async fn relay_chat(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatReply>, (StatusCode, Json<RelayError>)> {
    match state.agent.send(&payload.message, &payload.user_id).await {
        Ok(reply) => Ok(Json(ChatReply { reply })),
        Err(e) => {
            tracing::error!("Relay to agent backend failed: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RelayError {
                    error: "Failed to communicate with agent backend".to_string(),
                }),
            ))
        }
    }
}

/// Frames the connected client may send over the chat WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Authenticate {
        token: String,
    },
    Message {
        text: String,
    },
    Preferences {
        theme: Option<Theme>,
        language: Option<String>,
    },
    SignOut,
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| websocket(socket, state))
}

/// One chat surface per WebSocket connection. Frames are translated
/// into surface commands; session tokens are verified here at the edge,
/// so the surface only ever observes verified sign-in/sign-out changes.
async fn websocket(stream: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = stream.split();

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let commands = ChatSurface::spawn(
        state.store.clone(),
        state.agent.clone(),
        state.feed.clone(),
        event_tx,
    );

    tracing::info!("Chat surface connected");

    loop {
        tokio::select! {
            frame = receiver.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        let frame = match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(frame) => frame,
                            Err(e) => {
                                tracing::warn!("Unparseable client frame: {}", e);
                                if send_error(&mut sender, "Unrecognized frame").await.is_err() {
                                    break;
                                }
                                continue;
                            }
                        };

                        let command = match frame {
                            ClientFrame::Authenticate { token } => {
                                match crate::handlers::auth::verify_jwt_token(&token) {
                                    Ok(claims) => Command::SignIn(session_user(&claims)),
                                    Err(e) => {
                                        tracing::warn!("WebSocket authentication failed: {}", e);
                                        if send_error(&mut sender, "Invalid or expired token")
                                            .await
                                            .is_err()
                                        {
                                            break;
                                        }
                                        continue;
                                    }
                                }
                            }
                            ClientFrame::Message { text } => Command::Send { text },
                            ClientFrame::Preferences { theme, language } => {
                                Command::UpdatePreferences(PreferencesPatch { theme, language })
                            }
                            ClientFrame::SignOut => Command::SignOut,
                        };

                        if commands.send(command).is_err() {
                            tracing::error!("Chat surface task is gone, closing socket");
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {} // Ignore binary/ping/pong frames.
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket receive error: {}", e);
                        break;
                    }
                }
            }

            event = event_rx.recv() => {
                match event {
                    Some(event) => {
                        let json = match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(e) => {
                                tracing::error!("Failed to serialize surface event: {}", e);
                                continue;
                            }
                        };
                        if sender.send(WsMessage::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    // Dropping the command sender terminates the surface task, which
    // drops its feed subscription with it.
    tracing::info!("Chat surface disconnected");
}

fn session_user(claims: &Claims) -> SessionUser {
    SessionUser {
        user_id: claims.sub.clone(),
        email: claims.email.clone(),
    }
}

async fn send_error(
    sender: &mut (impl SinkExt<WsMessage> + Unpin),
    message: &str,
) -> Result<(), ()> {
    let frame = serde_json::json!({
        "type": "error",
        "message": message,
    });
    sender
        .send(WsMessage::Text(frame.to_string()))
        .await
        .map_err(|_| ())
}

/// Message history for the authenticated user, ascending by timestamp.
/// The sort happens here: retrieval order from the store is unspecified.
async fn get_chat_history(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<RelayError>)> {
    let mut messages = state.store.list_messages(&claims.sub).await.map_err(|e| {
        tracing::error!("Failed to load history for user {}: {}", claims.sub, e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RelayError {
                error: "Failed to load message history".to_string(),
            }),
        )
    })?;
    messages.sort_by_key(|m| m.timestamp);

    Ok(Json(serde_json::json!({
        "success": true,
        "messages": messages,
    })))
}
