//! Per-connection event rate limiting
//!
//! Each connection gets an independent sliding window per event
//! category. Exceeding a budget puts that category into a cooldown
//! block; when the block expires the window history is cleared, so the
//! client restarts with a full budget instead of resuming a saturated
//! window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::constants::{
    PROGRESS_LIMIT, PROGRESS_WINDOW_MS, RATE_LIMITER_SWEEP_INTERVAL_SECS, ROOM_ACTION_LIMIT,
    ROOM_ACTION_WINDOW_MS, ROOM_CREATE_LIMIT, ROOM_CREATE_WINDOW_MS,
};

/// Event category for differentiated rate limiting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    /// High-frequency typing progress updates
    Progress,
    /// Join/leave room and queue operations
    RoomAction,
    /// Room creation
    RoomCreate,
}

impl EventCategory {
    pub const ALL: [EventCategory; 3] = [
        EventCategory::Progress,
        EventCategory::RoomAction,
        EventCategory::RoomCreate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EventCategory::Progress => "progress",
            EventCategory::RoomAction => "room_action",
            EventCategory::RoomCreate => "room_create",
        }
    }
}

/// Budget for one event category
#[derive(Debug, Clone, Copy)]
pub struct CategoryBudget {
    pub max_events: u32,
    pub window: Duration,
}

impl CategoryBudget {
    pub fn new(max_events: u32, window: Duration) -> Self {
        Self { max_events, window }
    }

    /// Default budget for typing progress updates
    pub fn progress() -> Self {
        Self::new(PROGRESS_LIMIT, Duration::from_millis(PROGRESS_WINDOW_MS))
    }

    /// Default budget for room membership operations
    pub fn room_action() -> Self {
        Self::new(
            ROOM_ACTION_LIMIT,
            Duration::from_millis(ROOM_ACTION_WINDOW_MS),
        )
    }

    /// Default budget for room creation
    pub fn room_create() -> Self {
        Self::new(
            ROOM_CREATE_LIMIT,
            Duration::from_millis(ROOM_CREATE_WINDOW_MS),
        )
    }

    fn default_for(category: EventCategory) -> Self {
        match category {
            EventCategory::Progress => Self::progress(),
            EventCategory::RoomAction => Self::room_action(),
            EventCategory::RoomCreate => Self::room_create(),
        }
    }
}

/// Outcome of a rate limit check
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    /// Events left in the current window (0 when blocked)
    pub remaining: u32,
    /// Milliseconds until the window fully resets, or until the block
    /// lifts when not allowed
    pub reset_in_ms: u64,
}

/// Sliding window state for one (connection, category) pair
struct CategoryWindow {
    hits: Vec<Instant>,
    blocked_until: Option<Instant>,
}

impl CategoryWindow {
    fn new() -> Self {
        Self {
            hits: Vec::new(),
            blocked_until: None,
        }
    }
}

/// Rate limiter for events on established connections
pub struct EventRateLimiter {
    states: RwLock<HashMap<String, HashMap<EventCategory, CategoryWindow>>>,
    budgets: HashMap<EventCategory, CategoryBudget>,
}

impl EventRateLimiter {
    pub fn new() -> Self {
        let budgets = EventCategory::ALL
            .iter()
            .map(|&c| (c, CategoryBudget::default_for(c)))
            .collect();
        Self {
            states: RwLock::new(HashMap::new()),
            budgets,
        }
    }

    /// Limiter with custom budgets; categories not named keep defaults
    pub fn with_budgets(overrides: HashMap<EventCategory, CategoryBudget>) -> Self {
        let mut limiter = Self::new();
        for (category, budget) in overrides {
            limiter.budgets.insert(category, budget);
        }
        limiter
    }

    fn budget(&self, category: EventCategory) -> CategoryBudget {
        self.budgets
            .get(&category)
            .copied()
            .unwrap_or_else(|| CategoryBudget::default_for(category))
    }

    /// Check and record one event. Categories on the same connection
    /// never affect each other.
    pub async fn check(&self, connection_id: &str, category: EventCategory) -> RateDecision {
        let budget = self.budget(category);
        let now = Instant::now();

        let mut states = self.states.write().await;
        let windows = states
            .entry(connection_id.to_string())
            .or_insert_with(HashMap::new);
        let window = windows.entry(category).or_insert_with(CategoryWindow::new);

        if let Some(until) = window.blocked_until {
            if now < until {
                return RateDecision {
                    allowed: false,
                    remaining: 0,
                    reset_in_ms: until.duration_since(now).as_millis() as u64,
                };
            }
            // Block expired: the window restarts empty
            window.blocked_until = None;
            window.hits.clear();
        }

        window
            .hits
            .retain(|&hit| now.duration_since(hit) < budget.window);

        if window.hits.len() >= budget.max_events as usize {
            window.blocked_until = Some(now + budget.window);
            log::debug!(
                "Connection {} exceeded {:?} budget, blocked for {:?}",
                connection_id,
                category,
                budget.window
            );
            return RateDecision {
                allowed: false,
                remaining: 0,
                reset_in_ms: budget.window.as_millis() as u64,
            };
        }

        window.hits.push(now);
        let oldest = window.hits.first().copied().unwrap_or(now);
        let reset_in = budget
            .window
            .saturating_sub(now.duration_since(oldest));

        RateDecision {
            allowed: true,
            remaining: budget.max_events - window.hits.len() as u32,
            reset_in_ms: reset_in.as_millis() as u64,
        }
    }

    /// Drop all state for a disconnected connection
    pub async fn forget(&self, connection_id: &str) {
        let mut states = self.states.write().await;
        states.remove(connection_id);
    }

    /// Number of connections currently holding limiter state
    pub async fn tracked_connections(&self) -> usize {
        let states = self.states.read().await;
        states.len()
    }

    /// Drop windows that are empty and unblocked, then connections with
    /// no windows left
    pub async fn sweep(&self) {
        let now = Instant::now();
        let mut states = self.states.write().await;
        states.retain(|_, windows| {
            windows.retain(|category, window| {
                let budget = self
                    .budgets
                    .get(category)
                    .copied()
                    .unwrap_or_else(|| CategoryBudget::default_for(*category));
                window
                    .hits
                    .retain(|&hit| now.duration_since(hit) < budget.window);

                let still_blocked = matches!(window.blocked_until, Some(until) if now < until);
                !window.hits.is_empty() || still_blocked
            });
            !windows.is_empty()
        });
    }

    /// Start the periodic sweep task. The caller owns the handle and
    /// aborts it on shutdown.
    pub fn start_sweep_task(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(RATE_LIMITER_SWEEP_INTERVAL_SECS));
            loop {
                interval.tick().await;
                self.sweep().await;
            }
        })
    }
}

impl Default for EventRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
