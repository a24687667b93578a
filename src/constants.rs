// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3030;
pub const WS_PATH: &str = "ws";

// Admission control constants
pub const DEFAULT_MAX_CONNECTIONS_PER_IP: usize = 10;
pub const ADMISSION_GRACE_SECS: u64 = 60;
pub const ADMISSION_SWEEP_INTERVAL_SECS: u64 = 60;

// Event rate limiting defaults (per connection, per category)
pub const PROGRESS_LIMIT: u32 = 60;
pub const PROGRESS_WINDOW_MS: u64 = 1_000;
pub const ROOM_ACTION_LIMIT: u32 = 10;
pub const ROOM_ACTION_WINDOW_MS: u64 = 10_000;
pub const ROOM_CREATE_LIMIT: u32 = 5;
pub const ROOM_CREATE_WINDOW_MS: u64 = 60_000;
pub const RATE_LIMITER_SWEEP_INTERVAL_SECS: u64 = 60;

// Matchmaking queue flood protection
pub const QUEUE_WINDOW_MS: u64 = 10_000;
pub const QUEUE_WINDOW_LIMIT: u32 = 10;
pub const QUEUE_BLOCK_MS: u64 = 30_000;
pub const QUEUE_SWEEP_INTERVAL_SECS: u64 = 60;

// Race lifecycle defaults
pub const DEFAULT_COUNTDOWN_MS: u64 = 5_000;
pub const DEFAULT_MIN_PLAYERS: usize = 2;
pub const DEFAULT_MATCH_GROUP_SIZE: usize = 2;
pub const DEFAULT_RACE_TIMEOUT_SECS: u64 = 300;
pub const MAX_RACE_PLAYERS: usize = 5;

// Inbound message constraints
pub const MAX_JSON_MESSAGE_SIZE: usize = 2048;
pub const MAX_DISPLAY_NAME_LEN: usize = 24;
