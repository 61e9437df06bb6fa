//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::packet::encode_frame;
use crate::game::{MatchCommand, PlayerSocket};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Display name
    pub name: Option<String>,
    /// Outfit key; players sharing an outfit are teamed
    pub outfit: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, query, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, query: WsQuery, state: AppState) {
    let conn_id = Uuid::new_v4();
    let name = query
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| format!("Player_{}", &conn_id.to_string()[..8]));
    let outfit = query.outfit.unwrap_or_default();

    info!(conn_id = %conn_id, name = %name, "New WebSocket connection");

    let (mut ws_sink, mut ws_stream) = socket.split();

    // Everything server-to-client travels as length-prefixed binary frames
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<Bytes>();

    let welcome = ServerMsg::Welcome {
        conn_id,
        server_time: unix_millis(),
    };
    match encode_frame(&welcome) {
        Ok(frame) => {
            let _ = frame_tx.send(frame);
        }
        Err(e) => {
            error!(conn_id = %conn_id, error = %e, "Failed to encode welcome");
            return;
        }
    }

    // Join the default match
    let handle = state.ensure_match();
    let joined = handle
        .cmd_tx
        .send(MatchCommand::Join {
            conn: conn_id,
            name: name.clone(),
            outfit,
            socket: PlayerSocket::new(frame_tx.clone()),
        })
        .await
        .is_ok();
    if !joined {
        warn!(conn_id = %conn_id, "Match task unavailable");
        return;
    }

    // Writer task: match frames -> WebSocket
    let writer_conn = conn_id;
    let writer_handle = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if let Err(e) = ws_sink.send(Message::Binary(frame.to_vec())).await {
                debug!(conn_id = %writer_conn, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    // Reader loop: WebSocket -> match task
    let rate_limiter = ConnectionRateLimiter::new();
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(conn_id = %conn_id, "Rate limited input message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(client_msg) => {
                        let leaving = matches!(client_msg, ClientMsg::Leave);
                        if handle
                            .cmd_tx
                            .send(MatchCommand::Client {
                                conn: conn_id,
                                msg: client_msg,
                            })
                            .await
                            .is_err()
                        {
                            debug!(conn_id = %conn_id, "Match input channel closed");
                            break;
                        }
                        if leaving {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(conn_id = %conn_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(conn_id = %conn_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
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

    // Signal disconnect to the match loop; best-effort
    let _ = handle
        .cmd_tx
        .send(MatchCommand::Disconnect { conn: conn_id })
        .await;

    writer_handle.abort();

    info!(conn_id = %conn_id, "WebSocket connection closed");
}
