use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use uuid::Uuid;

use crate::dto::proctor_dto::{ClientEnvelope, ClientMessage};
use crate::AppState;

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn proctor_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.max_message_size(state.max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// One task per connection. Inbound frames are handled strictly in arrival
/// order; outbound commands are written by a separate task so a slow client
/// never holds up a broadcast.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (connection_id, mut outbound) = state.gateway.accept().await;
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(command) = outbound.recv().await {
            let text = match serde_json::to_string(&command) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, %connection_id, "Failed to encode outbound command");
                    continue;
                }
            };
            if let Err(e) = ws_sender.send(Message::Text(text)).await {
                tracing::debug!(error = %e, %connection_id, "Outbound write failed, closing writer");
                break;
            }
        }
    });

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => dispatch(&state, connection_id, &text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, %connection_id, "WebSocket read error");
                break;
            }
        }
    }

    state.gateway.disconnect(connection_id).await;
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
}

async fn dispatch(state: &AppState, connection_id: Uuid, text: &str) {
    let envelope = match serde_json::from_str::<ClientEnvelope>(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!(error = %e, %connection_id, "Ignoring malformed frame");
            return;
        }
    };
    let kind = envelope.kind.clone();
    match ClientMessage::from_envelope(envelope) {
        Some(message) => state.enforcement.handle(connection_id, message).await,
        None => tracing::debug!(%connection_id, message_type = %kind, "Ignoring unknown message type"),
    }
}
