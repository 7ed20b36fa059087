//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::game::{JoinRequest, MatchError, MatchHandle};
use crate::http::ticket::{verify_ticket, AdmissionError, TicketClaims};
use crate::ids::{PlayerId, SocketId};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Match ticket issued by the lobby
    pub ticket: Option<String>,
}

/// WebSocket upgrade handler. The ticket is checked before upgrading, so a
/// rejected client never gets a socket.
pub async fn ws_handler(
    ws: Option<WebSocketUpgrade>,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let claims = match query
        .ticket
        .ok_or(AdmissionError::MissingTicket)
        .and_then(|ticket| {
            verify_ticket(&ticket, &state.config.ticket_secret, &state.config.game_id)
        }) {
        Ok(claims) => claims,
        Err(e) => {
            warn!(error = %e, "WebSocket admission refused");
            return e.into_response();
        }
    };

    let Some(ws) = ws else {
        return (StatusCode::BAD_REQUEST, "Expected a WebSocket upgrade").into_response();
    };

    info!(player_id = %claims.sub, match_id = %claims.match_id, "WebSocket upgrade for ticket holder");
    ws.on_upgrade(move |socket| handle_socket(socket, claims, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, claims: TicketClaims, state: AppState) {
    let socket_id = SocketId::new();
    let player_id = claims.sub.clone();
    info!(player_id = %player_id, socket_id = %socket_id, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let request = JoinRequest {
        player_id: player_id.clone(),
        display_name: claims.display_name,
        role: claims.role,
        socket_id,
        outbound: outbound_tx,
    };

    let handle = match state.match_registry.join(&claims.match_id, request).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!(player_id = %player_id, match_id = %claims.match_id, error = %e, "Match admission refused");
            let code = match e {
                MatchError::InProgress(_) => "match_in_progress",
                MatchError::Closed => "match_closed",
            };
            let _ = send_msg(&mut ws_sink, &ServerMsg::error(code, e.to_string())).await;
            let _ = ws_sink.close().await;
            return;
        }
    };

    run_session(&handle, &player_id, socket_id, ws_sink, ws_stream, outbound_rx).await;

    // The match ignores this if the player already reconnected elsewhere
    if handle.leave(player_id.clone(), socket_id).await.is_err() {
        debug!(player_id = %player_id, "Match already closed on disconnect");
    }

    info!(player_id = %player_id, socket_id = %socket_id, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    handle: &MatchHandle,
    player_id: &PlayerId,
    socket_id: SocketId,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    mut outbound_rx: mpsc::UnboundedReceiver<ServerMsg>,
) {
    let rate_limiter = ConnectionRateLimiter::new();

    // Writer task: match messages -> WebSocket. Ends when the match drops
    // this player's queue (replaced socket, removal) or the socket fails.
    let writer_player_id = player_id.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(player_id = %writer_player_id, error = %e, "WebSocket send failed");
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    // Reader loop: WebSocket -> match
    loop {
        tokio::select! {
            frame = ws_stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if !rate_limiter.check_message() {
                        warn!(player_id = %player_id, "Rate limited client message");
                        continue;
                    }

                    let msg = match serde_json::from_str::<ClientMsg>(&text) {
                        Ok(msg) => msg,
                        Err(e) => {
                            warn!(player_id = %player_id, error = %e, "Failed to parse client message");
                            continue;
                        }
                    };

                    if handle
                        .client_message(player_id.clone(), socket_id, msg)
                        .await
                        .is_err()
                    {
                        debug!(player_id = %player_id, "Match channel closed");
                        break;
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    warn!(player_id = %player_id, "Received binary message, ignoring");
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    info!(player_id = %player_id, "Client closed connection");
                    break;
                }
                Some(Err(e)) => {
                    error!(player_id = %player_id, error = %e, "WebSocket error");
                    break;
                }
            },
            _ = &mut writer => {
                debug!(player_id = %player_id, "Outbound queue closed, ending session");
                break;
            }
        }
    }

    writer.abort();
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
