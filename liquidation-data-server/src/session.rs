use futures::{SinkExt, StreamExt};
use liquidation_data::{
    broadcast::Broadcaster,
    message::{ClientMessage, ServerMessage},
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

pub const WELCOME_MESSAGE: &str = "Connected to liquidation stream";

/// Upper bound on flushing queued messages & the close frame once a session ends.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Handle an individual WebSocket subscriber connection.
///
/// Sends the welcome message, registers with the [`Broadcaster`] (which queues the stats
/// snapshot & recent log), then forwards queued messages until either side goes away.
pub async fn handle_client(stream: TcpStream, peer_addr: SocketAddr, broadcaster: Arc<Broadcaster>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", peer_addr, e);
            return;
        }
    };

    info!("WebSocket handshake completed for {}", peer_addr);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Send welcome message
    match ServerMessage::welcome(WELCOME_MESSAGE).to_json() {
        Ok(json) => {
            if ws_sender.send(Message::text(json)).await.is_err() {
                debug!("Client {} went away before welcome", peer_addr);
                return;
            }
        }
        Err(e) => warn!("Failed to serialise welcome for {}: {}", peer_addr, e),
    }

    // The broadcaster owns the only sender: eviction or shutdown drops it and ends the send task
    let (tx, mut rx) = mpsc::channel::<Arc<ServerMessage>>(broadcaster.config().client_buffer);
    let id = broadcaster.register(tx);
    info!(subscriber = %id, %peer_addr, "subscriber connected");

    // Forward queued messages to this client
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = match message.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to serialise message for {}: {}", peer_addr, e);
                    continue;
                }
            };
            if ws_sender.send(Message::text(json)).await.is_err() {
                return;
            }
        }

        // Unregistered by the server, eg/ heartbeat timeout or shutdown
        let _ = ws_sender.send(Message::Close(None)).await;
        let _ = ws_sender.close().await;
    });

    // Handle incoming messages from client (heartbeats)
    let recv_broadcaster = Arc::clone(&broadcaster);
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) => {
                    // Tungstenite handles pong automatically, but log it
                    debug!("Received ping from {}", peer_addr);
                }
                Ok(Message::Text(text)) => {
                    match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(ClientMessage::Heartbeat) => {
                            if !recv_broadcaster.heartbeat(id) {
                                break;
                            }
                            if let Err(error) =
                                recv_broadcaster.send_to(id, ServerMessage::heartbeat_ack())
                            {
                                debug!(subscriber = %id, %error, "heartbeat ack not delivered");
                            }
                        }
                        Err(_) => debug!("Received text from {}: {}", peer_addr, text),
                    }
                }
                Err(e) => {
                    error!("WebSocket error for {}: {}", peer_addr, e);
                    break;
                }
                _ => {}
            }
        }
    });

    // Wait for either task to complete
    let send_finished = tokio::select! {
        _ = &mut send_task => {
            info!("Send task completed for {}", peer_addr);
            recv_task.abort();
            true
        }
        _ = &mut recv_task => {
            info!("Receive task completed for {}", peer_addr);
            false
        }
    };

    broadcaster.unregister(id);
    if !send_finished {
        // Dropping the last sender lets the send task flush & close
        if tokio::time::timeout(CLOSE_TIMEOUT, &mut send_task).await.is_err() {
            send_task.abort();
        }
    }

    info!("WebSocket connection closed for {}", peer_addr);
}
