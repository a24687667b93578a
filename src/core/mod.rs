//! Core functionality for the typing race server

pub mod admission;
pub mod connection;
pub mod matchmaker;
pub mod message_handler;
pub mod message_types;
pub mod queue_limiter;
pub mod race;
pub mod rate_limiter;
pub mod server;
pub mod session;

// Re-export main components for convenience
pub use admission::ConnectionAdmission;
pub use connection::Connection;
pub use matchmaker::{EnqueueOutcome, MatchQueue, QueueEntry};
pub use message_handler::MessageHandler;
pub use message_types::{ClientMessage, PlayerInfo, ServerMessage};
pub use queue_limiter::QueueRateLimiter;
pub use race::{
    LeaveOutcome, Participant, ProgressOutcome, Race, RaceManager, RaceState, RankingEntry,
};
pub use rate_limiter::{CategoryBudget, EventCategory, EventRateLimiter, RateDecision};
pub use server::{ServerManager, SharedServerManager};
pub use session::SessionManager;
