//! Server network layer handling WebSocket connections to the relay

use crate::connection::{Handshake, JoinRequest, OUTBOUND_QUEUE_CAPACITY};
use crate::error::AppError;
use crate::http::AppState;
use crate::relay::RelayHandle;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{ClientPacket, ServerPacket};
use tokio::sync::mpsc;

/// `GET /ws`: validates the handshake before upgrading
///
/// Requests without a group token are answered with 400 and never reach the
/// relay.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(handshake): Query<Handshake>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let request = handshake.validate().map_err(|e| {
        debug!("Rejecting WebSocket handshake: {}", e);
        AppError::from(e)
    })?;

    let relay = state.relay.clone();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, relay, request)))
}

/// Runs one accepted connection until either side closes it
async fn handle_socket(socket: WebSocket, relay: RelayHandle, request: JoinRequest) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (packet_tx, mut packet_rx) = mpsc::channel::<ServerPacket>(OUTBOUND_QUEUE_CAPACITY);

    let connection_id = match relay.connect(request, packet_tx).await {
        Ok(id) => id,
        Err(e) => {
            error!("Failed to register connection: {}", e);
            let _ = ws_sender.close().await;
            return;
        }
    };

    // Spawn writer that drains the relay's outgoing queue for this connection
    let writer_id = connection_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(packet) = packet_rx.recv().await {
            let text = match serde_json::to_string(&packet) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize packet for {}: {}", writer_id, e);
                    continue;
                }
            };

            if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                debug!("Socket of {} closed while sending: {}", writer_id, e);
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    while let Some(message) = ws_receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientPacket>(text.as_str()) {
                Ok(packet) => relay.packet(&connection_id, packet),
                Err(e) => debug!("Dropping malformed frame from {}: {}", connection_id, e),
            },
            Ok(Message::Binary(_)) => {
                debug!("Dropping binary frame from {}", connection_id);
            }
            Ok(Message::Close(_)) => break,
            // Pings are answered by axum
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket error on {}: {}", connection_id, e);
                break;
            }
        }
    }

    info!("Connection {} closed", connection_id);
    relay.disconnect(&connection_id);

    // The relay drops our queue on disconnect, which ends the writer
    if let Err(e) = writer.await {
        error!("Writer task of {} failed: {}", connection_id, e);
    }
}
