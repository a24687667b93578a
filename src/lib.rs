//! Keyclash - a real-time multiplayer typing race server
//!
//! This library provides connection admission, token authentication,
//! rate limiting, matchmaking and race session management on top of a
//! warp WebSocket transport.

pub mod auth;
pub mod config;
pub mod constants;
pub mod core;
pub mod error;
pub mod handlers;
pub mod security_logger;
pub mod snippet;

// Re-export main components
pub use config::*;
pub use constants::*;
