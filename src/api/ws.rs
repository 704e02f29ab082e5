// WebSocket gateway: validates connecting channels, replays state on
// reconnect, and translates frames to and from engine operations.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::engine::events::{ClientFrame, ServerEvent};
use crate::engine::sessions::EventSender;
use crate::engine::state::MatchStatus;
use crate::engine::MatchEngine;
use crate::metrics;

use super::AppState;

#[derive(Deserialize)]
pub struct WsParams {
    pub player: Option<String>,
}

/// WebSocket upgrade handler for a match channel.
pub async fn ws_match(
    ws: WebSocketUpgrade,
    Path(match_id): Path<String>,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state, match_id, params.player))
}

async fn handle_ws(
    socket: WebSocket,
    state: AppState,
    match_id: String,
    player: Option<String>,
) {
    let engine = state.engine.clone();

    let Some(player) = player.filter(|p| !p.is_empty()) else {
        reject(socket, "Player name required").await;
        return;
    };

    let snapshot = match engine.connect_snapshot(&match_id, &player).await {
        Ok(s) => s,
        Err(e) => {
            reject(socket, &e.to_string()).await;
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel();

    // Greeting, and on reconnect into a live match the state replay:
    // both healths plus the public fields of any round in progress.
    let _ = tx.send(ServerEvent::Connected {
        player: player.clone(),
        match_id: match_id.clone(),
        players: snapshot.players.clone(),
    });
    if snapshot.status == MatchStatus::Active {
        let _ = tx.send(ServerEvent::MatchReady {
            players: snapshot.healths.clone(),
        });
        if let Some(round_event) = snapshot.live_round {
            let _ = tx.send(round_event);
        }
    }

    engine.sessions.connect(&match_id, &player, tx.clone());
    metrics::CONNECTED_WEBSOCKETS.inc();
    tracing::info!(%match_id, %player, "websocket connected");

    // May flip the match active when this is the second connected seat.
    engine.player_connected(&match_id).await;

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(event) => {
                        let json = match serde_json::to_string(&event) {
                            Ok(j) => j,
                            Err(_) => continue,
                        };
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            // Client disconnected
                            break;
                        }
                    }
                    // Sender replaced by a reconnect; this pump is done.
                    None => break,
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&engine, &match_id, &player, &tx, text.as_str());
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Ignore binary and protocol-level ping/pong frames
                    }
                    Some(Err(_)) => break,
                }
            }
        }
    }

    // Disconnection only removes event delivery; the match plays on.
    engine.sessions.disconnect(&match_id, &player, &tx);
    metrics::CONNECTED_WEBSOCKETS.dec();
    tracing::info!(%match_id, %player, "websocket disconnected");
}

/// Map one inbound frame to an engine operation. The two-phase submit and
/// skip operations run as their own tasks so collaborator latency never
/// blocks this player's inbound loop.
fn handle_frame(
    engine: &Arc<MatchEngine>,
    match_id: &str,
    player: &str,
    tx: &EventSender,
    text: &str,
) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(_) => {
            let _ = tx.send(ServerEvent::Error {
                message: "Invalid frame".to_string(),
            });
            return;
        }
    };

    match frame {
        ClientFrame::SubmitAnswer {
            question_id,
            answer,
        } => {
            let engine = engine.clone();
            let match_id = match_id.to_string();
            let player = player.to_string();
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Err(e) = engine
                    .submit_answer(&match_id, &player, &question_id, &answer)
                    .await
                {
                    let _ = tx.send(ServerEvent::Error {
                        message: e.to_string(),
                    });
                }
            });
        }
        ClientFrame::SkipRound => {
            let engine = engine.clone();
            let match_id = match_id.to_string();
            let player = player.to_string();
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Err(e) = engine.vote_skip(&match_id, &player).await {
                    let _ = tx.send(ServerEvent::Error {
                        message: e.to_string(),
                    });
                }
            });
        }
        ClientFrame::Ping => {
            let _ = tx.send(ServerEvent::Pong);
        }
    }
}

/// Send a single error frame and close the channel without registering it.
async fn reject(mut socket: WebSocket, message: &str) {
    let event = ServerEvent::Error {
        message: message.to_string(),
    };
    if let Ok(json) = serde_json::to_string(&event) {
        let _ = socket.send(Message::Text(json.into())).await;
    }
    let _ = socket.close().await;
}
