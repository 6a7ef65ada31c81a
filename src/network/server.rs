//! HTTP surface: the `/spe_ed` upgrade endpoint plus the time and stats
//! pages.
//!
//! A connection passes the token gate before it is upgraded; afterwards a
//! reader task feeds decoded actions into the player's bounded input buffer
//! and a writer task drains outbound state messages. The reader closes the
//! input channel exactly once on decode error, connection error or close,
//! which the engine treats as invalidation.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use chrono::{SecondsFormat, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::network::auth::{TokenCheck, TokenGate, TokenTicket};
use crate::network::matchmaker::Matchmaker;
use crate::pseudonym::Pseudonyms;
use crate::stats::StatsHandle;

const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

/// Nominal handshake window; axum/hyper completes the WebSocket handshake
/// as part of the HTTP exchange itself.
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 3;

/// Everything the endpoints need.
#[derive(Clone)]
pub struct AppState {
    /// API key credit accounting.
    pub gate: Arc<TokenGate>,
    /// Open-lobby management.
    pub matchmaker: Arc<Matchmaker>,
    /// Pseudonym service for connecting keys.
    pub pseudonyms: Arc<Pseudonyms>,
    /// Statistics worker handle, when enabled.
    pub stats: Option<StatsHandle>,
}

/// Build the router. The time endpoint is on by default, the stats page is
/// opt-in.
pub fn router(app: AppState, disable_time: bool, stats_enabled: bool) -> axum::Router {
    let mut router = axum::Router::new().route("/spe_ed", get(spe_ed));
    if !disable_time {
        router = router.route("/spe_ed_time", get(spe_ed_time));
    }
    if stats_enabled {
        router = router.route("/spe_ed_stats", get(spe_ed_stats));
    }
    router.with_state(app)
}

#[derive(Debug, Deserialize)]
struct ConnectQuery {
    #[serde(default)]
    key: String,
}

/// One inbound message: `{"action": "..."}`.
#[derive(Debug, Deserialize)]
struct ActionMessage {
    action: String,
}

/// Admission decision for a connecting key: claim a credit and reject
/// tokens that are already playing in the open lobby.
pub fn check_admission(
    gate: &TokenGate,
    matchmaker: &Matchmaker,
    key: &str,
) -> Result<(), StatusCode> {
    match gate.claim(key) {
        TokenCheck::Unknown => return Err(StatusCode::FORBIDDEN),
        TokenCheck::RateLimited => return Err(StatusCode::TOO_MANY_REQUESTS),
        TokenCheck::Ok => {}
    }
    if matchmaker.contains_token(key) {
        gate.release(key);
        debug!(key, "already in open lobby");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }
    Ok(())
}

async fn spe_ed(
    State(app): State<AppState>,
    Query(query): Query<ConnectQuery>,
    headers: axum::http::HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let key = query.key;
    if let Err(status) = check_admission(&app.gate, &app.matchmaker, &key) {
        return status.into_response();
    }
    debug!(key = %key, ?headers, "connection metadata");

    if let Some(stats) = &app.stats {
        stats.lobby_joined(key.clone());
    }

    ws.on_upgrade(move |socket| handle_socket(socket, key, app))
}

async fn handle_socket(socket: WebSocket, key: String, app: AppState) {
    let ticket = Arc::new(TokenTicket::new(app.gate.clone(), key.clone()));
    let pseudonym = app.pseudonyms.get(&key);

    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let (in_tx, in_rx) = mpsc::channel::<String>(crate::INPUT_BUFFER);

    // Writer: drains state broadcasts onto the socket; ends when the
    // player slot drops the sender.
    tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Reader: decodes `{action}` messages into the bounded input buffer,
    // dropping on full. Any termination closes the channel exactly once.
    let reader_ticket = ticket.clone();
    let reader_key = key.clone();
    tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            let payload = match message {
                Ok(Message::Text(text)) => text.into_bytes(),
                Ok(Message::Binary(bytes)) => bytes,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue, // ping/pong
                Err(e) => {
                    debug!(key = %reader_key, "read error: {e}");
                    break;
                }
            };
            match serde_json::from_slice::<ActionMessage>(&payload) {
                Ok(message) => {
                    // Non-blocking enqueue; a full buffer drops the action.
                    let _ = in_tx.try_send(message.action);
                }
                Err(e) => {
                    warn!(key = %reader_key, "malformed action message: {e}");
                    break;
                }
            }
        }
        reader_ticket.release();
        // in_tx drops here, closing the input channel.
    });

    let slot = crate::game::engine::PlayerSlot::remote(pseudonym, ticket, out_tx, in_rx);
    match app.matchmaker.admit(slot) {
        Ok(()) => {}
        Err(mut slot) => {
            // Close the slot right here so the token credit comes back even
            // if the client never hangs up its side of the socket.
            warn!(key = %key, "admission failed, closing");
            slot.close();
            if let Some(stats) = &app.stats {
                stats.lobby_left(key);
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct TimeResponse {
    time: String,
    milliseconds: u32,
}

async fn spe_ed_time() -> impl IntoResponse {
    let now = Utc::now();
    let body = TimeResponse {
        time: now.to_rfc3339_opts(SecondsFormat::Secs, true),
        milliseconds: now.timestamp_subsec_millis(),
    };
    (
        [
            (ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (CACHE_CONTROL, NO_CACHE),
        ],
        Json(body),
    )
}

async fn spe_ed_stats(State(app): State<AppState>) -> Response {
    let Some(stats) = &app.stats else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match stats.page().await {
        Some(page) => ([(CACHE_CONTROL, NO_CACHE)], Html(page)).into_response(),
        None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

// =============================================================================
// TESTS
// =============================================================================
