use futures_util::sink::SinkExt;
use futures_util::stream::StreamExt;
use log::{debug, error, info};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::sync::mpsc;
use uuid::Uuid;
use warp::ws::{Message, WebSocket};

use crate::core::connection::Connection;
use crate::core::message_handler::MessageHandler;
use crate::core::message_types::ServerMessage;
use crate::core::server::SharedServerManager;
use crate::error::KeyclashError;
use crate::handlers::auth::authenticate_connection;
use crate::security_logger::{log_security_event, SecurityEvent};

// Handle a WebSocket connection
pub async fn handle_ws_client(
    ws: WebSocket,
    addr: Option<SocketAddr>,
    token: Option<String>,
    server: SharedServerManager,
) {
    let source_ip = addr.map(|a| a.ip()).unwrap_or_else(|| {
        log::warn!("No remote address on upgrade, falling back to localhost");
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    });

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, rx) = mpsc::unbounded_channel();

    // Spawn a task to forward messages from our channel to the WebSocket
    tokio::task::spawn(async move {
        let mut rx = rx;
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_tx.send(message).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
    });

    // Generate a unique client ID
    let client_id = Uuid::new_v4().to_string();

    // Per-source ceiling comes before everything else; a rejection
    // closes the socket after one explanatory envelope
    if !server.try_admit(source_ip, &client_id).await {
        let active = server.admission_count(source_ip).await;
        log_security_event(SecurityEvent::AdmissionRejected {
            ip: source_ip,
            active_connections: active,
        })
        .await;

        let _ = tx.send(Message::text(error_envelope(
            &KeyclashError::AdmissionRejected,
        )));
        let _ = tx.send(Message::close());
        return;
    }

    // Resolve identity. A missing token still succeeds as a guest, so
    // a failure means an actual bad credential was presented.
    let grant = match authenticate_connection(token, server.verifier()) {
        Ok(grant) => grant,
        Err(e) => {
            log_security_event(SecurityEvent::AuthenticationFailed {
                ip: Some(source_ip),
                reason: e.to_string(),
            })
            .await;
            let _ = tx.send(Message::text(error_envelope(&e)));

            // The socket stays open but never gets a session; every
            // further message repeats the rejection
            reject_all_messages(&mut ws_rx, &tx).await;
            server.release_admission(source_ip, &client_id).await;
            return;
        }
    };

    if grant.verified {
        log_security_event(SecurityEvent::AuthenticationSuccess {
            player_id: grant.player.id.clone(),
            ip: Some(source_ip),
        })
        .await;
    }

    // Register the client
    let connection = Connection::with_id(
        client_id.clone(),
        grant.player.clone(),
        source_ip,
        tx.clone(),
    );
    server.register_connection(connection).await;

    info!(
        "Client connected: {} (player {})",
        client_id, grant.player.id
    );
    info!("Current connections: {}", server.connection_count().await);

    // Send a welcome message to the client
    let connected_msg = ServerMessage::Connected {
        client_id: client_id.clone(),
        player_id: grant.player.id.clone(),
        name: grant.player.name.clone(),
        authenticated: grant.verified,
        room_hint: grant.room_hint.clone(),
    };

    match serde_json::to_string(&connected_msg) {
        Ok(msg_str) => {
            if let Err(e) = tx.send(Message::text(msg_str)) {
                error!("Failed to send welcome message: {}", e);
            }
        }
        Err(e) => {
            error!("Failed to serialize welcome message: {}", e);
        }
    };

    // Handle incoming messages
    let handler = MessageHandler::new(server.clone());
    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(msg) => {
                // Only process text messages
                if msg.is_text() {
                    if let Ok(text) = msg.to_str() {
                        if let Err(e) = handler.handle_client_message(&client_id, text).await {
                            debug!("Message from {} rejected: {}", client_id, e);
                        }
                    }
                }
            }
            Err(e) => {
                error!("WebSocket error for {}: {}", client_id, e);
                break;
            }
        }
    }

    // Client disconnected: one call unwinds every registry and guard
    server.cleanup_connection(&client_id).await;
    info!("Client disconnected: {}", client_id);
    info!("Current connections: {}", server.connection_count().await);
}

/// Drain a connection whose credential was rejected, answering every
/// text frame with the same rejection
async fn reject_all_messages(
    ws_rx: &mut futures_util::stream::SplitStream<WebSocket>,
    tx: &mpsc::UnboundedSender<Message>,
) {
    let rejection = error_envelope(&KeyclashError::AuthRejected("invalid token".to_string()));
    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(msg) if msg.is_text() => {
                if tx.send(Message::text(rejection.clone())).is_err() {
                    break;
                }
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
}

fn error_envelope(error: &KeyclashError) -> String {
    serde_json::to_string(&ServerMessage::Error {
        code: error.code().to_string(),
        message: error.to_string(),
    })
    .unwrap_or_default()
}
