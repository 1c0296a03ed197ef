use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tracing::{error, info, warn};
use uuid::Uuid;

use kalp_provider::GenerateOptions;
use kalp_types::events::{ASSISTANT_TYPING_ID, ClientEvent, ServerEvent};
use kalp_types::models::new_session_id;

use crate::Gateway;
use crate::relay::{RelayError, Turn};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Identity attached to a connection by a successful `join-user`.
#[derive(Debug, Clone)]
struct Identity {
    user_id: Uuid,
    username: String,
}

/// Handle one WebSocket connection until either side closes it.
///
/// Connections start unauthenticated. Only `join-user` is honoured until it
/// succeeds; every other event is answered with an error.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway) {
    let (mut sender, mut receiver) = socket.split();
    let (conn_id, mut outbound) = gateway.dispatcher.register().await;
    info!("Connection {} opened", conn_id);

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward dispatcher events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = outbound.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Failed to encode event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read events from client
    let gw = gateway.clone();
    let mut recv_task = tokio::spawn(async move {
        let mut identity: Option<Identity> = None;

        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => handle_event(&gw, conn_id, &mut identity, event).await,
                    Err(e) => {
                        warn!(
                            "Connection {} bad event: {} -- raw: {}",
                            conn_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        // A broken join-user still gets an answer
                        if event_name(&text).as_deref() == Some("join-user") {
                            gw.dispatcher
                                .send_to(conn_id, ServerEvent::auth_error("Invalid join-user payload"))
                                .await;
                        }
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    gateway.dispatcher.unregister(conn_id).await;
    info!("Connection {} closed", conn_id);
}

async fn handle_event(
    gateway: &Gateway,
    conn_id: Uuid,
    identity: &mut Option<Identity>,
    event: ClientEvent,
) {
    let dispatcher = &gateway.dispatcher;

    match event {
        ClientEvent::JoinUser { user_id, token } => {
            match authenticate(gateway, user_id, token).await {
                Ok((id, display_name)) => {
                    info!("{} ({}) authenticated on connection {}", id.username, id.user_id, conn_id);
                    dispatcher.identify(conn_id, id.user_id).await;
                    dispatcher
                        .send_to(
                            conn_id,
                            ServerEvent::UserAuthenticated {
                                user_id: id.user_id,
                                username: id.username.clone(),
                                display_name,
                            },
                        )
                        .await;
                    *identity = Some(id);
                }
                Err(message) => {
                    warn!("Connection {} failed to authenticate: {}", conn_id, message);
                    dispatcher.send_to(conn_id, ServerEvent::auth_error(message)).await;
                }
            }
        }

        ClientEvent::JoinSession(session) => {
            let Some(id) = identity.as_ref() else {
                dispatcher.send_to(conn_id, ServerEvent::auth_error("Not authenticated")).await;
                return;
            };
            let session_id = session.session_id().to_string();
            match gateway.relay.check_access(id.user_id, &session_id).await {
                Ok(_) => {
                    dispatcher.join_room(conn_id, &session_id).await;
                    info!("{} ({}) joined session {}", id.username, id.user_id, session_id);
                }
                Err(e) => {
                    dispatcher
                        .send_to(conn_id, ServerEvent::message_error(e.public_message(), Some(session_id)))
                        .await;
                }
            }
        }

        ClientEvent::SendMessage {
            prompt,
            session_id,
            temperature,
            max_tokens,
        } => {
            let Some(id) = identity.as_ref() else {
                dispatcher
                    .send_to(conn_id, ServerEvent::message_error("Not authenticated", Some(session_id)))
                    .await;
                return;
            };
            let session_id = if session_id.trim().is_empty() {
                new_session_id(id.user_id, Utc::now())
            } else {
                session_id
            };
            let turn = Turn {
                user_id: id.user_id,
                session_id,
                prompt,
                options: GenerateOptions { temperature, max_tokens },
            };
            // Generation can take longer than the heartbeat window; keep reading.
            tokio::spawn(relay_turn(gateway.clone(), conn_id, turn));
        }

        ClientEvent::Typing { session_id, is_typing } => {
            let Some(id) = identity.as_ref() else {
                return;
            };
            let Some(room) = dispatcher.room_of(conn_id).await else {
                return;
            };
            if session_id.is_some_and(|sid| sid != room) {
                return;
            }
            dispatcher
                .broadcast_to_room(
                    &room,
                    id.user_id,
                    ServerEvent::Typing {
                        user_id: id.user_id.to_string(),
                        is_typing,
                    },
                    Some(conn_id),
                )
                .await;
        }
    }
}

/// Validate `join-user`. The error string is sent back as `auth-error`.
/// Token verification and the user lookup hit SQLite, so they run on the
/// blocking pool.
async fn authenticate(
    gateway: &Gateway,
    user_id: String,
    token: String,
) -> Result<(Identity, String), String> {
    let gw = gateway.clone();
    tokio::task::spawn_blocking(move || {
        let claims = gw.tokens.verify(&token).map_err(|e| e.to_string())?;
        if claims.sub.to_string() != user_id.trim() {
            return Err("Token does not match user".to_string());
        }

        let user = gw
            .relay
            .db()
            .get_user_by_id(&claims.sub.to_string())
            .map_err(|e| {
                error!("User lookup failed: {}", e);
                "Authentication failed".to_string()
            })?
            .ok_or_else(|| "User not found".to_string())?;

        Ok((
            Identity {
                user_id: claims.sub,
                username: user.username,
            },
            user.display_name,
        ))
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        "Authentication failed".to_string()
    })?
}

/// Run a turn on behalf of a connection and fan the result out to the room.
async fn relay_turn(gateway: Gateway, conn_id: Uuid, turn: Turn) {
    let dispatcher = &gateway.dispatcher;
    let session_id = turn.session_id.clone();

    if let Err(e) = gateway.relay.preflight(&turn).await {
        if let RelayError::Storage(inner) = &e {
            error!("Preflight failed for session {}: {}", session_id, inner);
        }
        dispatcher
            .send_to(conn_id, ServerEvent::message_error(e.public_message(), Some(session_id)))
            .await;
        return;
    }

    let owner = turn.user_id;
    dispatcher.join_room(conn_id, &session_id).await;
    dispatcher.claim_room(&session_id, owner).await;
    dispatcher.broadcast_to_room(&session_id, owner, assistant_typing(true), None).await;

    let result = gateway.relay.run_turn(turn).await;

    dispatcher.claim_room(&session_id, owner).await;
    dispatcher.broadcast_to_room(&session_id, owner, assistant_typing(false), None).await;
    let event = match result {
        Ok(reply) => ServerEvent::MessageResponse(reply),
        Err(e) => {
            if let RelayError::Storage(inner) = &e {
                error!("Turn failed for session {}: {}", session_id, inner);
            }
            ServerEvent::message_error(e.public_message(), Some(session_id.clone()))
        }
    };
    dispatcher.broadcast_to_room(&session_id, owner, event, None).await;
}

/// The `event` field of a frame that failed to parse as a `ClientEvent`.
fn event_name(raw: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    value.get("event")?.as_str().map(str::to_string)
}

fn assistant_typing(is_typing: bool) -> ServerEvent {
    ServerEvent::Typing {
        user_id: ASSISTANT_TYPING_ID.to_string(),
        is_typing,
    }
}
