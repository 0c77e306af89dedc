use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::auth::jwt::{verify_token, TokenType};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// The routing envelope every broadcast event carries. Events with a
/// `user_id` are private to that user; events without one fan out to all
/// connected clients.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    user_id: Option<Uuid>,
}

fn addressed_to(event: &str, user_id: Uuid) -> bool {
    match serde_json::from_str::<Envelope>(event) {
        Ok(Envelope {
            user_id: Some(target),
        }) => target == user_id,
        _ => true,
    }
}

/// Browsers cannot set an Authorization header on a WebSocket upgrade, so the
/// access token arrives as a query parameter instead.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Response {
    let claims = query
        .token
        .as_deref()
        .and_then(|t| verify_token(t, &state.config).ok())
        .map(|data| data.claims);

    let user_id = match claims {
        Some(c) if c.token_type == TokenType::Access => c.sub,
        _ => {
            tracing::warn!("WebSocket upgrade rejected: missing or invalid access token");
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    };

    let rx = match state.ws_tx.as_ref() {
        Some(tx) => tx.subscribe(),
        None => {
            return (StatusCode::SERVICE_UNAVAILABLE, "Events unavailable").into_response();
        }
    };

    ws.on_upgrade(move |socket| pump_events(socket, rx, user_id))
}

/// Single loop over both directions: broadcast events flow out (filtered per
/// user), inbound frames are drained so Close is noticed. The client has
/// nothing to say yet.
async fn pump_events(socket: WebSocket, mut rx: broadcast::Receiver<String>, user_id: Uuid) {
    tracing::debug!(user_id = %user_id, "WebSocket connected");

    let (mut outbound, mut inbound) = socket.split();

    loop {
        tokio::select! {
            event = rx.recv() => {
                let event = match event {
                    Ok(e) => e,
                    // Lagged: this client missed events; keep going.
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if !addressed_to(&event, user_id) {
                    continue;
                }
                if outbound.send(Message::Text(event)).await.is_err() {
                    break;
                }
            }
            frame = inbound.next() => {
                match frame {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    tracing::debug!(user_id = %user_id, "WebSocket closed");
}
