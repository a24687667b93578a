//! Integrated server service that coordinates admission, sessions,
//! matchmaking and races

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use warp::ws::Message as WsMessage;

use crate::auth::player::{sanitize_display_name, Player};
use crate::auth::token::TokenVerifier;
use crate::config::ServerConfig;
use crate::constants::MAX_RACE_PLAYERS;
use crate::core::admission::ConnectionAdmission;
use crate::core::connection::Connection;
use crate::core::matchmaker::{EnqueueOutcome, MatchQueue, QueueEntry};
use crate::core::message_types::{PlayerInfo, ServerMessage};
use crate::core::queue_limiter::QueueRateLimiter;
use crate::core::race::{LeaveOutcome, ProgressOutcome, Race, RaceManager};
use crate::core::rate_limiter::{CategoryBudget, EventCategory, EventRateLimiter, RateDecision};
use crate::core::session::SessionManager;
use crate::error::{KeyclashError, Result};
use crate::snippet::{SnippetSource, StaticSnippets};

/// Coordinates every live connection, the matchmaking queue and all
/// running races behind one handle
pub struct ServerManager {
    config: ServerConfig,
    verifier: TokenVerifier,
    sessions: SessionManager,
    races: RaceManager,
    queue: MatchQueue,
    admission: Arc<ConnectionAdmission>,
    event_limiter: Arc<EventRateLimiter>,
    queue_limiter: Arc<QueueRateLimiter>,
    snippets: Arc<dyn SnippetSource>,
}

impl ServerManager {
    /// Create a new server manager from validated configuration
    pub fn new(config: ServerConfig) -> Self {
        Self::with_snippet_source(config, Arc::new(StaticSnippets::new()))
    }

    /// Create with a custom snippet provider
    pub fn with_snippet_source(config: ServerConfig, snippets: Arc<dyn SnippetSource>) -> Self {
        let verifier = match &config.token_secret {
            Some(secret) => TokenVerifier::new(secret),
            None => TokenVerifier::without_secret(),
        };

        let mut budgets = HashMap::new();
        budgets.insert(
            EventCategory::Progress,
            CategoryBudget::new(
                config.progress_limit,
                Duration::from_millis(config.progress_window_ms),
            ),
        );
        budgets.insert(
            EventCategory::RoomAction,
            CategoryBudget::new(
                config.room_action_limit,
                Duration::from_millis(config.room_action_window_ms),
            ),
        );
        budgets.insert(
            EventCategory::RoomCreate,
            CategoryBudget::new(
                config.room_create_limit,
                Duration::from_millis(config.room_create_window_ms),
            ),
        );

        Self {
            verifier,
            sessions: SessionManager::new(),
            races: RaceManager::new(),
            queue: MatchQueue::new(config.match_group_size),
            admission: Arc::new(ConnectionAdmission::new(config.max_connections_per_ip)),
            event_limiter: Arc::new(EventRateLimiter::with_budgets(budgets)),
            queue_limiter: Arc::new(QueueRateLimiter::new()),
            snippets,
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    /// Start the background sweep tasks. The caller owns the handles
    /// and aborts them on shutdown.
    pub fn start_maintenance_tasks(&self) -> Vec<JoinHandle<()>> {
        vec![
            self.admission.clone().start_sweep_task(),
            self.event_limiter.clone().start_sweep_task(),
            self.queue_limiter.clone().start_sweep_task(),
        ]
    }

    // --- admission ---

    pub async fn try_admit(&self, source: IpAddr, connection_id: &str) -> bool {
        self.admission.try_admit(source, connection_id).await
    }

    pub async fn release_admission(&self, source: IpAddr, connection_id: &str) {
        self.admission.release(source, connection_id).await;
    }

    pub async fn admission_count(&self, source: IpAddr) -> usize {
        self.admission.count(source).await
    }

    pub async fn admission_tracked_sources(&self) -> usize {
        self.admission.total_tracked().await
    }

    pub async fn admission_total_connections(&self) -> usize {
        self.admission.total_connections().await
    }

    // --- rate limiting ---

    pub async fn check_event(&self, connection_id: &str, category: EventCategory) -> RateDecision {
        self.event_limiter.check(connection_id, category).await
    }

    pub async fn check_queue_attempt(&self, connection_id: &str) -> bool {
        self.queue_limiter.check(connection_id).await
    }

    // --- sessions ---

    pub async fn register_connection(&self, connection: Connection) {
        self.sessions.register(connection).await;
    }

    pub async fn player_of(&self, connection_id: &str) -> Option<Player> {
        self.sessions.player_of(connection_id).await
    }

    pub async fn connection_count(&self) -> usize {
        self.sessions.connection_count().await
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.len().await
    }

    pub async fn race_count(&self) -> usize {
        self.races.race_count().await
    }

    /// Full disconnect path: every guard and registry forgets the
    /// connection, and any race it was in sees it leave.
    pub async fn cleanup_connection(&self, connection_id: &str) {
        let Some(connection) = self.sessions.unregister(connection_id).await else {
            return;
        };

        self.admission.release(connection.addr, connection_id).await;
        self.event_limiter.forget(connection_id).await;
        self.queue_limiter.remove(connection_id).await;
        self.queue.dequeue(connection_id).await;

        if let Err(e) = self.leave_current_race(&connection.player).await {
            log::trace!(
                "No race to leave for disconnecting connection {}: {}",
                connection_id,
                e
            );
        }

        log::info!(
            "Connection {} closed after {:?}",
            connection_id,
            connection.connection_duration()
        );
    }

    // --- race operations ---

    /// Create a private race room with the caller as its first player
    pub async fn handle_create_room(
        &self,
        connection_id: &str,
        name: Option<String>,
    ) -> Result<String> {
        let player = self.resolve_player(connection_id, name).await?;
        if self.races.race_of(&player.id).await.is_some() {
            return Err(KeyclashError::AlreadyInRoom);
        }

        let snippet = self.snippets.pick().await?;
        let mut race = Race::new(snippet, self.config.min_players, MAX_RACE_PLAYERS);
        race.add_player(player.clone())?;

        let (race_id, race_handle) = self.races.insert(race).await;
        self.races
            .record_members(&race_id, std::slice::from_ref(&player.id))
            .await;

        self.send_to_connection(
            connection_id,
            &ServerMessage::RoomCreated {
                room_id: race_id.clone(),
            },
        )
        .await;
        let snapshot = {
            let guard = race_handle.lock().await;
            Self::room_snapshot(&guard)
        };
        self.send_to_connection(connection_id, &snapshot).await;

        log::info!("Player {} created race {}", player.id, race_id);
        Ok(race_id)
    }

    /// Join an existing waiting room; starts the countdown when the
    /// roster reaches the minimum
    pub async fn handle_join_room(
        self: Arc<Self>,
        connection_id: &str,
        room_id: &str,
        name: Option<String>,
    ) -> Result<()> {
        let player = self.resolve_player(connection_id, name).await?;
        let race = self.races.join(room_id, player.clone()).await?;

        let (snapshot, should_start) = {
            let mut guard = race.lock().await;
            let should_start = guard.ready_to_start();
            if should_start {
                guard.begin_countdown()?;
            }
            (Self::room_snapshot(&guard), should_start)
        };

        self.broadcast_to_race(
            &race,
            &ServerMessage::PlayerJoined {
                room_id: room_id.to_string(),
                player: PlayerInfo {
                    id: player.id.clone(),
                    name: player.name.clone(),
                    progress: 0,
                    finished: false,
                },
            },
            Some(&player.id),
        )
        .await;
        self.send_to_connection(connection_id, &snapshot).await;

        if should_start {
            self.clone()
                .start_countdown(room_id.to_string(), race)
                .await;
        }
        Ok(())
    }

    /// Leave whatever race the caller is in
    pub async fn handle_leave_room(&self, connection_id: &str) -> Result<()> {
        let player = self
            .sessions
            .player_of(connection_id)
            .await
            .ok_or_else(|| KeyclashError::SessionNotFound(connection_id.to_string()))?;
        self.leave_current_race(&player).await
    }

    /// Apply a typing progress report and fan out the consequences
    pub async fn handle_progress(&self, connection_id: &str, progress: u32) -> Result<()> {
        let player = self
            .sessions
            .player_of(connection_id)
            .await
            .ok_or_else(|| KeyclashError::SessionNotFound(connection_id.to_string()))?;
        let race_id = self
            .races
            .race_of(&player.id)
            .await
            .ok_or_else(|| KeyclashError::StateConflict("not in a race".to_string()))?;
        let race = self
            .races
            .get(&race_id)
            .await
            .ok_or(KeyclashError::RoomNotFound)?;

        let (outcome, rankings) = {
            let mut guard = race.lock().await;
            let outcome = guard.apply_progress(&player.id, progress)?;
            let rankings = match outcome {
                ProgressOutcome::Finished {
                    race_complete: true,
                    ..
                } => Some(guard.rankings()),
                _ => None,
            };
            (outcome, rankings)
        };

        match outcome {
            ProgressOutcome::NoChange => {}
            ProgressOutcome::Advanced => {
                self.broadcast_to_race(
                    &race,
                    &ServerMessage::OpponentProgress {
                        room_id: race_id.clone(),
                        player_id: player.id.clone(),
                        progress,
                    },
                    Some(&player.id),
                )
                .await;
            }
            ProgressOutcome::Finished {
                rank,
                time_ms,
                race_complete,
            } => {
                self.send_to_connection(
                    connection_id,
                    &ServerMessage::PlayerFinished {
                        room_id: race_id.clone(),
                        time_ms,
                        rank,
                    },
                )
                .await;
                self.broadcast_to_race(
                    &race,
                    &ServerMessage::PlayerFinishedTask {
                        room_id: race_id.clone(),
                        player_id: player.id.clone(),
                        rank,
                    },
                    Some(&player.id),
                )
                .await;

                if race_complete {
                    if let Some(rankings) = rankings {
                        self.broadcast_to_race(
                            &race,
                            &ServerMessage::GameComplete {
                                room_id: race_id.clone(),
                                rankings,
                            },
                            None,
                        )
                        .await;
                    }
                    self.races.teardown(&race_id).await;
                }
            }
        }
        Ok(())
    }

    /// Enter the matchmaking queue; a completed group gets its race
    /// created before anyone is notified
    pub async fn handle_join_queue(
        self: Arc<Self>,
        connection_id: &str,
        name: Option<String>,
    ) -> Result<()> {
        let player = self.resolve_player(connection_id, name).await?;
        if self.races.race_of(&player.id).await.is_some() {
            return Err(KeyclashError::AlreadyInRoom);
        }

        match self.queue.enqueue(connection_id, player).await {
            EnqueueOutcome::Queued { position } => {
                self.send_to_connection(connection_id, &ServerMessage::QueueJoined { position })
                    .await;
                Ok(())
            }
            EnqueueOutcome::Matched(group) => self.start_matched_race(group).await,
        }
    }

    /// Leave the queue. Always succeeds so a rate-blocked client can
    /// still back out.
    pub async fn handle_leave_queue(&self, connection_id: &str) -> Result<()> {
        self.queue.dequeue(connection_id).await;
        Ok(())
    }

    async fn start_matched_race(self: Arc<Self>, group: Vec<QueueEntry>) -> Result<()> {
        let snippet = self.snippets.pick().await?;
        let group_size = group.len();
        let mut race = Race::new(snippet, group_size, group_size);
        for entry in &group {
            race.add_player(entry.player.clone())?;
        }

        let (race_id, race_handle) = self.races.insert(race).await;
        let member_ids: Vec<String> = group.iter().map(|e| e.player.id.clone()).collect();
        self.races.record_members(&race_id, &member_ids).await;

        // Matchmade rosters are fixed, so the countdown starts at once
        let snapshot = {
            let mut guard = race_handle.lock().await;
            guard.begin_countdown()?;
            Self::room_snapshot(&guard)
        };
        for entry in &group {
            self.send_to_connection(&entry.connection_id, &snapshot)
                .await;
        }

        log::info!("Matched race {} with {} players", race_id, group_size);
        self.clone().start_countdown(race_id, race_handle).await;
        Ok(())
    }

    async fn leave_current_race(&self, player: &Player) -> Result<()> {
        let race_id = self
            .races
            .race_of(&player.id)
            .await
            .ok_or(KeyclashError::RoomNotFound)?;
        let Some(race) = self.races.get(&race_id).await else {
            self.races.forget_member(&player.id).await;
            return Ok(());
        };

        let (outcome, rankings) = {
            let mut guard = race.lock().await;
            let outcome = guard.mark_left(&player.id);
            let rankings = match outcome {
                LeaveOutcome::MarkedAbsent {
                    race_complete: true,
                    ..
                } => Some(guard.rankings()),
                _ => None,
            };
            (outcome, rankings)
        };
        self.races.forget_member(&player.id).await;

        let player_left = ServerMessage::PlayerLeft {
            room_id: race_id.clone(),
            player_id: player.id.clone(),
        };

        match outcome {
            LeaveOutcome::Removed { empty: true } => {
                self.races.teardown(&race_id).await;
            }
            LeaveOutcome::Removed { empty: false } => {
                self.broadcast_to_race(&race, &player_left, None).await;
            }
            LeaveOutcome::MarkedAbsent {
                abandoned: true, ..
            } => {
                self.races.teardown(&race_id).await;
            }
            LeaveOutcome::MarkedAbsent {
                abandoned: false,
                race_complete,
            } => {
                self.broadcast_to_race(&race, &player_left, None).await;
                if race_complete {
                    if let Some(rankings) = rankings {
                        self.broadcast_to_race(
                            &race,
                            &ServerMessage::GameComplete {
                                room_id: race_id.clone(),
                                rankings,
                            },
                            None,
                        )
                        .await;
                    }
                    self.races.teardown(&race_id).await;
                }
            }
            LeaveOutcome::NotAMember => {}
        }
        Ok(())
    }

    // --- countdown and timeout timers ---

    async fn start_countdown(self: Arc<Self>, race_id: String, race: Arc<Mutex<Race>>) {
        let countdown_ms = self.config.countdown_ms;
        let server = self.clone();
        let task_race = race.clone();
        let task_race_id = race_id.clone();
        let handle = tokio::spawn(async move {
            server
                .run_countdown(task_race_id, task_race, countdown_ms)
                .await;
        });
        self.races.set_countdown_timer(&race_id, handle).await;
    }

    async fn run_countdown(
        self: Arc<Self>,
        race_id: String,
        race: Arc<Mutex<Race>>,
        countdown_ms: u64,
    ) {
        let remainder = countdown_ms % 1000;
        let seconds = countdown_ms / 1000;
        if remainder > 0 {
            tokio::time::sleep(Duration::from_millis(remainder)).await;
        }
        for seconds_left in (1..=seconds).rev() {
            self.broadcast_to_race(
                &race,
                &ServerMessage::CountdownTick {
                    room_id: race_id.clone(),
                    seconds_left,
                },
                None,
            )
            .await;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        // One shared start instant for every participant
        let start_time = {
            let mut guard = race.lock().await;
            match guard.activate() {
                Ok(ts) => ts,
                Err(_) => return,
            }
        };
        self.broadcast_to_race(
            &race,
            &ServerMessage::GameStart {
                room_id: race_id.clone(),
                start_time,
            },
            None,
        )
        .await;
        log::info!("Race {} started", race_id);

        self.clone().arm_timeout(race_id, race).await;
    }

    async fn arm_timeout(self: Arc<Self>, race_id: String, race: Arc<Mutex<Race>>) {
        let timeout = Duration::from_secs(self.config.race_timeout_secs);
        let server = self.clone();
        let task_race_id = race_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            server.finish_overrunning_race(&task_race_id, &race).await;
        });
        self.races.set_timeout_timer(&race_id, handle).await;
    }

    async fn finish_overrunning_race(&self, race_id: &str, race: &Arc<Mutex<Race>>) {
        let rankings = {
            let mut guard = race.lock().await;
            if !guard.finish_by_timeout() {
                return;
            }
            guard.rankings()
        };
        log::info!("Race {} hit its time limit", race_id);
        self.broadcast_to_race(
            race,
            &ServerMessage::GameComplete {
                room_id: race_id.to_string(),
                rankings,
            },
            None,
        )
        .await;
        self.races.teardown(race_id).await;
    }

    // --- messaging helpers ---

    fn encode(message: &ServerMessage) -> String {
        serde_json::to_string(message).unwrap_or_default()
    }

    fn room_snapshot(race: &Race) -> ServerMessage {
        ServerMessage::RoomJoined {
            room_id: race.id.clone(),
            snippet: race.snippet.clone(),
            players: race.participants().iter().map(PlayerInfo::from).collect(),
            state: race.state,
        }
    }

    pub async fn send_to_connection(&self, connection_id: &str, message: &ServerMessage) -> bool {
        self.sessions
            .send_to(connection_id, &Self::encode(message))
            .await
    }

    /// Deliver a message to every present participant, optionally
    /// skipping one player. Sends fan out concurrently.
    async fn broadcast_to_race(
        &self,
        race: &Arc<Mutex<Race>>,
        message: &ServerMessage,
        exclude_player: Option<&str>,
    ) -> usize {
        let targets: Vec<String> = {
            let guard = race.lock().await;
            guard
                .participants()
                .iter()
                .filter(|p| p.present)
                .filter(|p| exclude_player != Some(p.player.id.as_str()))
                .map(|p| p.player.id.clone())
                .collect()
        };

        let text = Self::encode(message);
        let mut send_tasks = Vec::new();
        for player_id in targets {
            if let Some(sender) = self.sessions.sender_of_player(&player_id).await {
                let text = text.clone();
                let task = tokio::spawn(async move {
                    match sender.send(WsMessage::text(text)) {
                        Ok(_) => true,
                        Err(_) => {
                            log::warn!("Failed to deliver race message to player {}", player_id);
                            false
                        }
                    }
                });
                send_tasks.push(task);
            }
        }

        let results = futures_util::future::join_all(send_tasks).await;
        results
            .into_iter()
            .filter_map(|result| result.ok())
            .filter(|&sent| sent)
            .count()
    }

    async fn resolve_player(
        &self,
        connection_id: &str,
        name_override: Option<String>,
    ) -> Result<Player> {
        let player = self
            .sessions
            .player_of(connection_id)
            .await
            .ok_or_else(|| KeyclashError::SessionNotFound(connection_id.to_string()))?;
        Ok(match name_override {
            Some(name) => Player::new(player.id, sanitize_display_name(&name)),
            None => player,
        })
    }
}

// Shared reference to server manager
pub type SharedServerManager = Arc<ServerManager>;
