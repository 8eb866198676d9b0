use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::database::models::{TokenScope, User};
use crate::error::AppError;
use crate::notifications::WsJsonResponse;
use crate::tokens;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub token: String,
}

/// GET /ws upgrades an authenticated admin client to the notification channel.
#[tracing::instrument(skip_all)]
pub async fn notifications_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let user = tokens::resolve(
        state.repository.as_ref(),
        &query.token,
        TokenScope::Authentication,
    )
    .await?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user)))
}

/// Handles an individual WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState, user: User) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    match serde_json::to_string(&WsJsonResponse::connected(user.id)) {
        Ok(greeting) => {
            if sender.send(Message::Text(greeting.into())).await.is_err() {
                return;
            }
        }
        Err(e) => warn!("Could not encode greeting: {e}"),
    }

    let hub = state.notifications.clone();
    let connection = hub.register(user.id, tx);
    info!("User {} connected to notifications as {connection}", user.id);

    // Ends when the hub drops our sink or the socket stops accepting writes
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sender.send(Message::Text(message.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    // Client frames carry nothing we act on; pings are answered by the socket
    let mut receive_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Close(_) => break,
                Message::Text(text) => debug!("Ignoring client message: {}", text.as_str()),
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => receive_task.abort(),
        _ = (&mut receive_task) => send_task.abort(),
    }

    hub.unregister(connection);
    info!("WebSocket connection {connection} closed");
}
