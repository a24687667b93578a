use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use warp::ws::Message;

use crate::auth::player::Player;
use crate::core::connection::Connection;

/// Registry of live connections, indexed by connection id and by the
/// player racing over it
pub struct SessionManager {
    connections: RwLock<HashMap<String, Connection>>,
    player_index: RwLock<HashMap<String, String>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            player_index: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new client connection
    pub async fn register(&self, connection: Connection) {
        let mut player_index = self.player_index.write().await;
        let mut connections = self.connections.write().await;
        player_index.insert(connection.player.id.clone(), connection.id.clone());
        connections.insert(connection.id.clone(), connection);
    }

    /// Remove a client connection
    pub async fn unregister(&self, connection_id: &str) -> Option<Connection> {
        let mut player_index = self.player_index.write().await;
        let mut connections = self.connections.write().await;
        let connection = connections.remove(connection_id)?;
        // Only drop the index entry if it still points at this connection
        if player_index.get(&connection.player.id) == Some(&connection.id) {
            player_index.remove(&connection.player.id);
        }
        Some(connection)
    }

    pub async fn player_of(&self, connection_id: &str) -> Option<Player> {
        let connections = self.connections.read().await;
        connections.get(connection_id).map(|c| c.player.clone())
    }

    pub async fn sender_of(&self, connection_id: &str) -> Option<mpsc::UnboundedSender<Message>> {
        let connections = self.connections.read().await;
        connections.get(connection_id).map(|c| c.sender.clone())
    }

    /// Transport handle for the connection a player currently races on
    pub async fn sender_of_player(&self, player_id: &str) -> Option<mpsc::UnboundedSender<Message>> {
        let connection_id = {
            let player_index = self.player_index.read().await;
            player_index.get(player_id)?.clone()
        };
        self.sender_of(&connection_id).await
    }

    /// Send a text frame to one connection
    pub async fn send_to(&self, connection_id: &str, text: &str) -> bool {
        let connections = self.connections.read().await;
        match connections.get(connection_id) {
            Some(connection) => connection.send_text(text),
            None => false,
        }
    }

    /// Send a text frame to the connection a player currently races on
    pub async fn send_to_player(&self, player_id: &str, text: &str) -> bool {
        let connection_id = {
            let player_index = self.player_index.read().await;
            match player_index.get(player_id) {
                Some(id) => id.clone(),
                None => return false,
            }
        };
        self.send_to(&connection_id, text).await
    }

    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
