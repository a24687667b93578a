//! Authentication module

pub mod player;
pub mod token;

// Re-export main components
pub use player::{sanitize_display_name, Player};
pub use token::{AuthGrant, Claims, TokenIssuer, TokenVerifier};
