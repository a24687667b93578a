use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::auth::player::Player;
use crate::error::{KeyclashError, Result};
use crate::snippet::Snippet;

/// Race lifecycle state. Transitions are strictly forward:
/// waiting -> countdown -> active -> finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceState {
    Waiting,
    Countdown,
    Active,
    Finished,
}

/// One player inside a race
#[derive(Debug, Clone)]
pub struct Participant {
    pub player: Player,
    /// Count of correctly typed characters, monotonically non-decreasing
    pub progress: u32,
    pub finished: bool,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub rank: Option<usize>,
    /// False once the player disconnected or left mid-race
    pub present: bool,
}

impl Participant {
    fn new(player: Player) -> Self {
        Self {
            player,
            progress: 0,
            finished: false,
            finished_at: None,
            rank: None,
            present: true,
        }
    }
}

/// Final standing of one participant, reported in the race summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingEntry {
    pub player_id: String,
    pub name: String,
    pub rank: Option<usize>,
    pub time_ms: Option<u64>,
    pub finished: bool,
    pub present: bool,
}

/// Result of applying a progress update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressOutcome {
    /// Equal to the recorded value; nothing changed
    NoChange,
    /// Progress advanced but the snippet is not complete
    Advanced,
    /// The participant just completed the snippet
    Finished {
        rank: usize,
        time_ms: u64,
        /// True when this finish also completed the whole race
        race_complete: bool,
    },
}

/// Result of a participant leaving
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// Removed from a waiting roster; `empty` means nobody is left
    Removed { empty: bool },
    /// Marked absent mid-race. `abandoned` means every participant is
    /// gone; `race_complete` means the remaining present players have
    /// all finished and the race just completed.
    MarkedAbsent {
        abandoned: bool,
        race_complete: bool,
    },
    NotAMember,
}

/// A typing race over one snippet
#[derive(Debug, Clone)]
pub struct Race {
    pub id: String,
    pub snippet: Snippet,
    pub state: RaceState,
    /// Roster in join order
    participants: Vec<Participant>,
    pub min_players: usize,
    pub max_players: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub countdown_started_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Shared start instant, identical for every participant
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    finished_count: usize,
}

impl Race {
    pub fn new(snippet: Snippet, min_players: usize, max_players: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            snippet,
            state: RaceState::Waiting,
            participants: Vec::new(),
            min_players,
            max_players,
            created_at: chrono::Utc::now(),
            countdown_started_at: None,
            started_at: None,
            finished_count: 0,
        }
    }

    /// Adds a player to a waiting race
    pub fn add_player(&mut self, player: Player) -> Result<()> {
        if self.state != RaceState::Waiting {
            return Err(KeyclashError::StateConflict(
                "race has already started".to_string(),
            ));
        }
        if self.participants.iter().any(|p| p.player.id == player.id) {
            return Err(KeyclashError::AlreadyInRoom);
        }
        if self.participants.len() >= self.max_players {
            return Err(KeyclashError::RoomFull);
        }
        self.participants.push(Participant::new(player));
        Ok(())
    }

    /// True once enough players are present to start the countdown
    pub fn ready_to_start(&self) -> bool {
        self.state == RaceState::Waiting && self.participants.len() >= self.min_players
    }

    /// Moves a waiting race into its countdown
    pub fn begin_countdown(&mut self) -> Result<()> {
        if self.state != RaceState::Waiting {
            return Err(KeyclashError::StateConflict(
                "countdown can only start from waiting".to_string(),
            ));
        }
        self.state = RaceState::Countdown;
        self.countdown_started_at = Some(chrono::Utc::now());
        Ok(())
    }

    /// Moves the race from countdown to active and fixes the shared
    /// start instant. Returns the start time as epoch milliseconds.
    pub fn activate(&mut self) -> Result<i64> {
        if self.state != RaceState::Countdown {
            return Err(KeyclashError::StateConflict(
                "race can only activate from countdown".to_string(),
            ));
        }
        let now = chrono::Utc::now();
        self.state = RaceState::Active;
        self.started_at = Some(now);
        Ok(now.timestamp_millis())
    }

    /// Applies a progress report from one participant.
    ///
    /// Progress may never exceed the snippet length or move backwards;
    /// violations reject the update and leave shared state untouched.
    /// Reporting an unchanged value is a no-op, which also makes a
    /// duplicate finish report harmless.
    pub fn apply_progress(&mut self, player_id: &str, progress: u32) -> Result<ProgressOutcome> {
        if self.state != RaceState::Active {
            return Err(KeyclashError::StateConflict(
                "race is not active".to_string(),
            ));
        }

        let char_count = self.snippet.char_count;
        let participant = self
            .participants
            .iter_mut()
            .find(|p| p.player.id == player_id && p.present)
            .ok_or_else(|| {
                KeyclashError::StateConflict("player is not racing here".to_string())
            })?;

        if progress > char_count {
            return Err(KeyclashError::ValidationRejected(format!(
                "progress {} exceeds snippet length {}",
                progress, char_count
            )));
        }
        if progress < participant.progress {
            return Err(KeyclashError::ValidationRejected(format!(
                "progress cannot move backwards ({} < {})",
                progress, participant.progress
            )));
        }
        if progress == participant.progress {
            return Ok(ProgressOutcome::NoChange);
        }

        participant.progress = progress;

        if progress == char_count && !participant.finished {
            let now = chrono::Utc::now();
            self.finished_count += 1;
            let rank = self.finished_count;
            participant.finished = true;
            participant.finished_at = Some(now);
            participant.rank = Some(rank);

            let time_ms = self
                .started_at
                .map(|start| (now - start).num_milliseconds().max(0) as u64)
                .unwrap_or(0);

            let race_complete = self.all_present_finished();
            if race_complete {
                self.state = RaceState::Finished;
            }

            return Ok(ProgressOutcome::Finished {
                rank,
                time_ms,
                race_complete,
            });
        }

        Ok(ProgressOutcome::Advanced)
    }

    /// Handles a participant leaving or disconnecting.
    ///
    /// Waiting rosters shrink; once the countdown has begun the roster
    /// is fixed and the participant is only marked absent, so the race
    /// goes on for everyone else.
    pub fn mark_left(&mut self, player_id: &str) -> LeaveOutcome {
        match self.state {
            RaceState::Waiting => {
                let before = self.participants.len();
                self.participants.retain(|p| p.player.id != player_id);
                if self.participants.len() == before {
                    return LeaveOutcome::NotAMember;
                }
                LeaveOutcome::Removed {
                    empty: self.participants.is_empty(),
                }
            }
            RaceState::Countdown | RaceState::Active => {
                let participant = self
                    .participants
                    .iter_mut()
                    .find(|p| p.player.id == player_id && p.present);
                let Some(participant) = participant else {
                    return LeaveOutcome::NotAMember;
                };
                participant.present = false;

                let abandoned = !self.participants.iter().any(|p| p.present);
                let race_complete =
                    !abandoned && self.state == RaceState::Active && self.all_present_finished();
                if race_complete {
                    self.state = RaceState::Finished;
                }
                LeaveOutcome::MarkedAbsent {
                    abandoned,
                    race_complete,
                }
            }
            RaceState::Finished => LeaveOutcome::NotAMember,
        }
    }

    /// Ends an overrunning race. Returns false if the race was no
    /// longer active.
    pub fn finish_by_timeout(&mut self) -> bool {
        if self.state != RaceState::Active {
            return false;
        }
        self.state = RaceState::Finished;
        true
    }

    fn all_present_finished(&self) -> bool {
        self.participants
            .iter()
            .filter(|p| p.present)
            .all(|p| p.finished)
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn player_count(&self) -> usize {
        self.participants.len()
    }

    pub fn contains_player(&self, player_id: &str) -> bool {
        self.participants.iter().any(|p| p.player.id == player_id)
    }

    /// Final standings: finishers by rank, then everyone else in
    /// roster order
    pub fn rankings(&self) -> Vec<RankingEntry> {
        let mut entries: Vec<RankingEntry> = self
            .participants
            .iter()
            .map(|p| RankingEntry {
                player_id: p.player.id.clone(),
                name: p.player.name.clone(),
                rank: p.rank,
                time_ms: match (p.finished_at, self.started_at) {
                    (Some(done), Some(start)) => {
                        Some((done - start).num_milliseconds().max(0) as u64)
                    }
                    _ => None,
                },
                finished: p.finished,
                present: p.present,
            })
            .collect();
        entries.sort_by_key(|e| e.rank.unwrap_or(usize::MAX));
        entries
    }
}

/// Per-race background task handles, aborted on teardown
#[derive(Default)]
struct RaceTimers {
    countdown: Option<JoinHandle<()>>,
    timeout: Option<JoinHandle<()>>,
}

/// Owns every live race and the player-to-race index
pub struct RaceManager {
    races: RwLock<HashMap<String, Arc<Mutex<Race>>>>,
    /// player_id -> race_id; a player races in at most one place
    membership: RwLock<HashMap<String, String>>,
    timers: RwLock<HashMap<String, RaceTimers>>,
}

impl RaceManager {
    pub fn new() -> Self {
        Self {
            races: RwLock::new(HashMap::new()),
            membership: RwLock::new(HashMap::new()),
            timers: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a new race and returns its handle
    pub async fn insert(&self, race: Race) -> (String, Arc<Mutex<Race>>) {
        let race_id = race.id.clone();
        let handle = Arc::new(Mutex::new(race));
        self.races
            .write()
            .await
            .insert(race_id.clone(), handle.clone());
        (race_id, handle)
    }

    pub async fn get(&self, race_id: &str) -> Option<Arc<Mutex<Race>>> {
        let races = self.races.read().await;
        races.get(race_id).cloned()
    }

    /// Race a player currently belongs to
    pub async fn race_of(&self, player_id: &str) -> Option<String> {
        let membership = self.membership.read().await;
        membership.get(player_id).cloned()
    }

    /// Adds a player to a race, enforcing the one-race-per-player rule
    pub async fn join(&self, race_id: &str, player: Player) -> Result<Arc<Mutex<Race>>> {
        let race = self
            .get(race_id)
            .await
            .ok_or(KeyclashError::RoomNotFound)?;

        let mut membership = self.membership.write().await;
        if membership.contains_key(&player.id) {
            return Err(KeyclashError::AlreadyInRoom);
        }
        {
            let mut guard = race.lock().await;
            guard.add_player(player.clone())?;
        }
        membership.insert(player.id, race_id.to_string());
        Ok(race)
    }

    /// Records membership for players placed into a race at creation
    /// time (matchmade rosters)
    pub async fn record_members(&self, race_id: &str, player_ids: &[String]) {
        let mut membership = self.membership.write().await;
        for player_id in player_ids {
            membership.insert(player_id.clone(), race_id.to_string());
        }
    }

    /// Drops a player's membership entry
    pub async fn forget_member(&self, player_id: &str) {
        let mut membership = self.membership.write().await;
        membership.remove(player_id);
    }

    /// Stores the countdown task handle for a race. Registering a
    /// timer for a race that no longer exists aborts it on the spot.
    pub async fn set_countdown_timer(&self, race_id: &str, handle: JoinHandle<()>) {
        let mut timers = self.timers.write().await;
        if !self.races.read().await.contains_key(race_id) {
            handle.abort();
            return;
        }
        let entry = timers.entry(race_id.to_string()).or_default();
        if let Some(old) = entry.countdown.replace(handle) {
            old.abort();
        }
    }

    /// Stores the timeout task handle for a race, with the same
    /// dead-race guard as the countdown timer.
    pub async fn set_timeout_timer(&self, race_id: &str, handle: JoinHandle<()>) {
        let mut timers = self.timers.write().await;
        if !self.races.read().await.contains_key(race_id) {
            handle.abort();
            return;
        }
        let entry = timers.entry(race_id.to_string()).or_default();
        if let Some(old) = entry.timeout.replace(handle) {
            old.abort();
        }
    }

    /// Removes a race, its timers, and every membership entry pointing
    /// at it. The race is unpublished before the timers are aborted, so
    /// a timer that races this call either gets aborted here or finds
    /// no race left to act on.
    pub async fn teardown(&self, race_id: &str) {
        let removed = self.races.write().await.remove(race_id);

        if let Some(timers) = self.timers.write().await.remove(race_id) {
            if let Some(handle) = timers.countdown {
                handle.abort();
            }
            if let Some(handle) = timers.timeout {
                handle.abort();
            }
        }

        if removed.is_some() {
            let mut membership = self.membership.write().await;
            membership.retain(|_, rid| rid != race_id);
            log::debug!("Race {} torn down", race_id);
        }
    }

    pub async fn race_count(&self) -> usize {
        let races = self.races.read().await;
        races.len()
    }
}

impl Default for RaceManager {
    fn default() -> Self {
        Self::new()
    }
}
