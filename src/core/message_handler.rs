//! Message handler with per-category rate limiting and race routing

use crate::constants::{MAX_JSON_MESSAGE_SIZE, QUEUE_BLOCK_MS};
use crate::core::message_types::{ClientMessage, ServerMessage};
use crate::core::rate_limiter::EventCategory;
use crate::core::server::SharedServerManager;
use crate::error::{KeyclashError, Result};
use crate::security_logger::{log_security_event, SecurityEvent};

/// Handles incoming client messages and routes them appropriately
pub struct MessageHandler {
    server: SharedServerManager,
}

impl MessageHandler {
    /// Create a new message handler
    pub fn new(server: SharedServerManager) -> Self {
        Self { server }
    }

    /// Process a client message. Guard failures and operation errors
    /// are reported back to the sender as an error envelope before the
    /// error propagates to the caller.
    pub async fn handle_client_message(
        &self,
        connection_id: &str,
        message_text: &str,
    ) -> Result<()> {
        if message_text.len() > MAX_JSON_MESSAGE_SIZE {
            log::warn!(
                "Oversized message rejected from {}: {} bytes",
                connection_id,
                message_text.len()
            );
            let error = KeyclashError::MessageTooLarge(message_text.len());
            self.send_error(connection_id, &error).await;
            return Err(error);
        }

        let client_message: ClientMessage = match serde_json::from_str(message_text) {
            Ok(message) => message,
            Err(e) => {
                let error = KeyclashError::MessageParseError(format!("Invalid JSON: {}", e));
                self.send_error(connection_id, &error).await;
                return Err(error);
            }
        };

        // Every parsed message burns budget in exactly one category
        let category = Self::category_of(&client_message);
        let decision = self.server.check_event(connection_id, category).await;
        if !decision.allowed {
            log_security_event(SecurityEvent::RateLimitExceeded {
                connection_id: connection_id.to_string(),
                limit_type: category.name().to_string(),
            })
            .await;
            let error = KeyclashError::RateLimited {
                retry_in_ms: decision.reset_in_ms,
            };
            self.send_error(connection_id, &error).await;
            return Err(error);
        }

        // Queue entry carries its own stricter admission gate
        if matches!(client_message, ClientMessage::JoinQueue { .. })
            && !self.server.check_queue_attempt(connection_id).await
        {
            log_security_event(SecurityEvent::QueueFlood {
                connection_id: connection_id.to_string(),
            })
            .await;
            let error = KeyclashError::RateLimited {
                retry_in_ms: QUEUE_BLOCK_MS,
            };
            self.send_error(connection_id, &error).await;
            return Err(error);
        }

        let result = match client_message {
            ClientMessage::CreateRoom { name } => self
                .server
                .handle_create_room(connection_id, name)
                .await
                .map(|_| ()),
            ClientMessage::JoinRoom { room_id, name } => {
                self.server
                    .clone()
                    .handle_join_room(connection_id, &room_id, name)
                    .await
            }
            ClientMessage::LeaveRoom => self.server.handle_leave_room(connection_id).await,
            ClientMessage::ProgressUpdate { progress } => {
                self.server.handle_progress(connection_id, progress).await
            }
            ClientMessage::JoinQueue { name } => {
                self.server
                    .clone()
                    .handle_join_queue(connection_id, name)
                    .await
            }
            ClientMessage::LeaveQueue => self.server.handle_leave_queue(connection_id).await,
        };

        if let Err(error) = result {
            if let KeyclashError::ValidationRejected(detail) = &error {
                log_security_event(SecurityEvent::ValidationRejected {
                    connection_id: connection_id.to_string(),
                    detail: detail.clone(),
                })
                .await;
            }
            self.send_error(connection_id, &error).await;
            return Err(error);
        }
        Ok(())
    }

    fn category_of(message: &ClientMessage) -> EventCategory {
        match message {
            ClientMessage::ProgressUpdate { .. } => EventCategory::Progress,
            ClientMessage::CreateRoom { .. } => EventCategory::RoomCreate,
            ClientMessage::JoinRoom { .. }
            | ClientMessage::LeaveRoom
            | ClientMessage::JoinQueue { .. }
            | ClientMessage::LeaveQueue => EventCategory::RoomAction,
        }
    }

    /// Implausible progress gets a dedicated envelope; everything else
    /// maps to a generic error with a stable code
    async fn send_error(&self, connection_id: &str, error: &KeyclashError) {
        let message = match error {
            KeyclashError::ValidationRejected(reason) => ServerMessage::ValidationFailed {
                reason: reason.clone(),
            },
            other => ServerMessage::Error {
                code: other.code().to_string(),
                message: other.to_string(),
            },
        };
        if !self.server.send_to_connection(connection_id, &message).await {
            log::warn!("Failed to deliver error envelope to {}", connection_id);
        }
    }
}
