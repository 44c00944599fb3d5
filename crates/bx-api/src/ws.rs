//! Live notification socket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::Extension;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::RequestContext;
use crate::lifecycle::notify::ConnectionHub;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct ClientFrame {
    action: String,
}

fn is_subscribe(text: &str) -> bool {
    serde_json::from_str::<ClientFrame>(text).is_ok_and(|f| f.action == "subscribe")
}

pub async fn connect(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    ws: WebSocketUpgrade,
) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| session(socket, hub, ctx.user_id))
}

async fn session(socket: WebSocket, hub: Arc<ConnectionHub>, user_id: Uuid) {
    let (mut outbound, mut inbound) = socket.split();
    let (mut conn_id, mut frames) = hub.register(user_id);
    tracing::debug!(%user_id, conn_id, connected = hub.connected(), "live connection opened");

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(text) => {
                    if outbound.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                // A newer connection for this user took over.
                None => break,
            },
            msg = inbound.next() => match msg {
                Some(Ok(Message::Text(text))) if is_subscribe(text.as_str()) => {
                    (conn_id, frames) = hub.register(user_id);
                    tracing::debug!(%user_id, conn_id, "live connection re-registered");
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    hub.unregister(user_id, conn_id);
    tracing::debug!(%user_id, conn_id, "live connection closed");
}
