use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum KeyclashError {
    // Admission errors
    AdmissionRejected,

    // Auth errors
    AuthRejected(String),

    // Rate limiting errors
    RateLimited { retry_in_ms: u64 },

    // Session errors
    SessionNotFound(String),

    // Messages errors
    MessageParseError(String),
    MessageTooLarge(usize),

    // Room errors
    RoomNotFound,
    RoomFull,
    AlreadyInRoom,

    // Lifecycle errors
    StateConflict(String),

    // Validation errors
    ValidationRejected(String),

    // Configuration errors
    ConfigError(String),
}

impl KeyclashError {
    /// Stable machine-readable code carried in outbound error frames.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AdmissionRejected => "ADMISSION_REJECTED",
            Self::AuthRejected(_) => "AUTH_REJECTED",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::MessageParseError(_) => "MESSAGE_PARSE_ERROR",
            Self::MessageTooLarge(_) => "MESSAGE_TOO_LARGE",
            Self::RoomNotFound => "ROOM_NOT_FOUND",
            Self::RoomFull => "ROOM_FULL",
            Self::AlreadyInRoom => "ALREADY_IN_ROOM",
            Self::StateConflict(_) => "STATE_CONFLICT",
            Self::ValidationRejected(_) => "VALIDATION_REJECTED",
            Self::ConfigError(_) => "CONFIG_ERROR",
        }
    }
}

impl fmt::Display for KeyclashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdmissionRejected => write!(f, "Connection limit reached for this address"),
            Self::AuthRejected(msg) => write!(f, "Authentication rejected: {}", msg),
            Self::RateLimited { retry_in_ms } => {
                write!(f, "Rate limited: retry in {} ms", retry_in_ms)
            }
            Self::SessionNotFound(id) => write!(f, "Session not found: {}", id),
            Self::MessageParseError(msg) => write!(f, "Message parse error: {}", msg),
            Self::MessageTooLarge(size) => write!(f, "Message too large: {} bytes", size),
            Self::RoomNotFound => write!(f, "Room not found"),
            Self::RoomFull => write!(f, "Room is full"),
            Self::AlreadyInRoom => write!(f, "Already in a room"),
            Self::StateConflict(msg) => write!(f, "State conflict: {}", msg),
            Self::ValidationRejected(msg) => write!(f, "Validation rejected: {}", msg),
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl Error for KeyclashError {}

// Generic result type for keyclash
pub type Result<T> = std::result::Result<T, KeyclashError>;
