//! WebSocket connection management
//! Handles the lifecycle of client connections

use log::warn;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;
use warp::ws::Message;

use crate::auth::player::Player;

/// Represents the state of a single WebSocket connection
pub struct Connection {
    pub id: String,
    pub player: Player,
    /// Source address the connection was admitted under
    pub addr: IpAddr,
    pub sender: mpsc::UnboundedSender<Message>,
    pub connected_at: Instant,
}

impl Connection {
    /// Create a new connection with a unique ID
    pub fn new(player: Player, addr: IpAddr, sender: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            player,
            addr,
            sender,
            connected_at: Instant::now(),
        }
    }

    /// Create a connection with a caller-chosen ID
    pub fn with_id(
        id: String,
        player: Player,
        addr: IpAddr,
        sender: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            id,
            player,
            addr,
            sender,
            connected_at: Instant::now(),
        }
    }

    /// Send a text message through this connection
    pub fn send_text(&self, text: &str) -> bool {
        match self.sender.send(Message::text(text)) {
            Ok(_) => true,
            Err(_) => {
                warn!("Failed to send message to client {}", self.id);
                false
            }
        }
    }

    /// Calculate the connection duration
    pub fn connection_duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
