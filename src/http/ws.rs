//! `GET /ws/realtime?token={jwt}&resumeAfter={eventTs?}` (`SPEC_FULL.md` §6,
//! §4.5): authenticates via query-string token (the `Authorization` header
//! isn't available to browser WebSocket clients), replays buffered history
//! strictly after `resumeAfter`, then forwards live events until disconnect
//! or the server-side heartbeat interval elapses without a pong.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
pub struct RealtimeQuery {
    pub token: String,
    #[serde(default)]
    pub resume_after: Option<DateTime<Utc>>,
}

/// # Errors
/// `401` if the token is missing, malformed, or fails verification.
pub async fn realtime_handshake(
    State(state): State<AppState>,
    Query(query): Query<RealtimeQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let claims = state.verifier.verify(&query.token)?;
    let user_id = claims.user_id().to_string();

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user_id, query.resume_after)))
}

async fn handle_socket(
    mut socket: WebSocket,
    state: AppState,
    user_id: String,
    resume_after: Option<DateTime<Utc>>,
) {
    let (mut connection, replay) = state.hub.attach(&user_id, resume_after);

    for event in replay {
        if send_event(&mut socket, &event).await.is_err() {
            state.hub.detach(&user_id, connection.id);
            return;
        }
    }

    let mut heartbeat = tokio::time::interval(state.hub.heartbeat_interval());
    heartbeat.tick().await; // first tick fires immediately

    // Missed liveness probes since the last pong. A probe is "missed" as
    // soon as it's sent; a pong resets the count. Two misses in a row means
    // the peer hasn't answered two full heartbeat intervals, so we close.
    let mut missed_pongs: u32 = 0;

    loop {
        tokio::select! {
            event = connection.receiver.recv() => {
                match event {
                    Some(event) => {
                        if send_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = heartbeat.tick() => {
                if missed_pongs >= 2 {
                    warn!(%user_id, "realtime connection failed liveness check, closing");
                    break;
                }
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                missed_pongs += 1;
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Pong(_))) => missed_pongs = 0,
                    Some(Ok(_)) => {} // clients don't send anything else meaningful
                    Some(Err(err)) => {
                        warn!(%user_id, error = %err, "realtime socket error");
                        break;
                    }
                }
            }
        }
    }

    debug!(%user_id, connection_id = connection.id, "realtime connection closed");
    state.hub.detach(&user_id, connection.id);
}

async fn send_event(socket: &mut WebSocket, event: &crate::realtime::WireEvent) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    socket.send(Message::Text(text.into())).await
}
