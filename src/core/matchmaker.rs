//! Matchmaking queue
//!
//! Strict FIFO: players wait in arrival order and the oldest entries
//! form the next race. Group assembly and race creation are driven by
//! the server manager so the race exists before anyone is notified.

use std::collections::VecDeque;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::auth::player::Player;

/// One waiting player
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub connection_id: String,
    pub player: Player,
    pub queued_at: Instant,
}

/// Outcome of an enqueue attempt
#[derive(Debug)]
pub enum EnqueueOutcome {
    /// Waiting; position is 1-based
    Queued { position: usize },
    /// The new entry completed a group, drained in FIFO order
    Matched(Vec<QueueEntry>),
}

/// FIFO matchmaking queue
pub struct MatchQueue {
    entries: RwLock<VecDeque<QueueEntry>>,
    group_size: usize,
}

impl MatchQueue {
    pub fn new(group_size: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            group_size,
        }
    }

    /// Add a player to the queue, forming a group when one completes.
    ///
    /// Re-enqueueing the same player keeps their original position and
    /// refreshes the connection the match will be delivered to.
    pub async fn enqueue(&self, connection_id: &str, player: Player) -> EnqueueOutcome {
        let mut entries = self.entries.write().await;

        if let Some(pos) = entries.iter().position(|e| e.player.id == player.id) {
            entries[pos].connection_id = connection_id.to_string();
            return EnqueueOutcome::Queued { position: pos + 1 };
        }

        entries.push_back(QueueEntry {
            connection_id: connection_id.to_string(),
            player,
            queued_at: Instant::now(),
        });

        if entries.len() >= self.group_size {
            let group: Vec<QueueEntry> = entries.drain(..self.group_size).collect();
            log::info!(
                "Matched group of {} after {:?} wait",
                group.len(),
                group
                    .first()
                    .map(|e| e.queued_at.elapsed())
                    .unwrap_or_default()
            );
            return EnqueueOutcome::Matched(group);
        }

        EnqueueOutcome::Queued {
            position: entries.len(),
        }
    }

    /// Remove a waiting player. Safe to call for players not in the
    /// queue; later entries move up.
    pub async fn dequeue(&self, connection_id: &str) -> bool {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.connection_id != connection_id);
        entries.len() < before
    }

    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 1-based position of a waiting connection
    pub async fn position(&self, connection_id: &str) -> Option<usize> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .position(|e| e.connection_id == connection_id)
            .map(|p| p + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(id: &str) -> Player {
        Player::new(id.to_string(), format!("Player {}", id))
    }

    #[tokio::test]
    async fn pair_forms_at_group_size() {
        let queue = MatchQueue::new(2);

        match queue.enqueue("conn-a", player("a")).await {
            EnqueueOutcome::Queued { position } => assert_eq!(position, 1),
            EnqueueOutcome::Matched(_) => panic!("first player should wait"),
        }

        match queue.enqueue("conn-b", player("b")).await {
            EnqueueOutcome::Matched(group) => {
                assert_eq!(group.len(), 2);
                assert_eq!(group[0].player.id, "a");
                assert_eq!(group[1].player.id, "b");
            }
            EnqueueOutcome::Queued { .. } => panic!("second player should complete the pair"),
        }

        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn third_player_starts_a_new_group() {
        let queue = MatchQueue::new(2);
        queue.enqueue("conn-a", player("a")).await;
        queue.enqueue("conn-b", player("b")).await;

        match queue.enqueue("conn-c", player("c")).await {
            EnqueueOutcome::Queued { position } => assert_eq!(position, 1),
            EnqueueOutcome::Matched(_) => panic!("third player has no partner yet"),
        }
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn groups_form_in_arrival_order() {
        let queue = MatchQueue::new(3);
        queue.enqueue("conn-a", player("a")).await;
        queue.enqueue("conn-b", player("b")).await;

        match queue.enqueue("conn-c", player("c")).await {
            EnqueueOutcome::Matched(group) => {
                let ids: Vec<&str> = group.iter().map(|e| e.player.id.as_str()).collect();
                assert_eq!(ids, ["a", "b", "c"]);
            }
            EnqueueOutcome::Queued { .. } => panic!("group of three should have formed"),
        }
    }

    #[tokio::test]
    async fn duplicate_enqueue_keeps_position_and_refreshes_connection() {
        let queue = MatchQueue::new(3);
        queue.enqueue("conn-a1", player("a")).await;
        queue.enqueue("conn-b", player("b")).await;

        match queue.enqueue("conn-a2", player("a")).await {
            EnqueueOutcome::Queued { position } => assert_eq!(position, 1),
            EnqueueOutcome::Matched(_) => panic!("duplicate must not complete a group"),
        }

        assert_eq!(queue.len().await, 2);
        assert_eq!(queue.position("conn-a2").await, Some(1));
        assert_eq!(queue.position("conn-a1").await, None);
    }

    #[tokio::test]
    async fn dequeue_is_idempotent_and_moves_others_up() {
        let queue = MatchQueue::new(3);
        queue.enqueue("conn-a", player("a")).await;
        queue.enqueue("conn-b", player("b")).await;

        assert!(queue.dequeue("conn-a").await);
        assert!(!queue.dequeue("conn-a").await);
        assert_eq!(queue.position("conn-b").await, Some(1));
    }
}
