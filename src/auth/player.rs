use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::MAX_DISPLAY_NAME_LEN;

/// Invisible and direction-override characters stripped from display
/// names. Left in place they enable spoofed or unreadable rosters.
const INVISIBLE_CHARS: &[char] = &[
    '\u{200B}', // ZERO WIDTH SPACE
    '\u{200C}', // ZERO WIDTH NON-JOINER
    '\u{200D}', // ZERO WIDTH JOINER
    '\u{200E}', // LEFT-TO-RIGHT MARK
    '\u{200F}', // RIGHT-TO-LEFT MARK
    '\u{202A}', // LEFT-TO-RIGHT EMBEDDING
    '\u{202B}', // RIGHT-TO-LEFT EMBEDDING
    '\u{202C}', // POP DIRECTIONAL FORMATTING
    '\u{202D}', // LEFT-TO-RIGHT OVERRIDE
    '\u{202E}', // RIGHT-TO-LEFT OVERRIDE
    '\u{2060}', // WORD JOINER
    '\u{FEFF}', // ZERO WIDTH NO-BREAK SPACE
];

/// A player identity for the duration of one connection.
///
/// The id comes from a verified token subject or is synthesized for
/// guests; it is never reused across races.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Player {
    pub id: String,
    pub name: String,
}

impl Player {
    pub fn new(id: String, name: String) -> Self {
        Self { id, name }
    }

    /// Synthesizes a guest identity with a fresh id and placeholder name
    pub fn guest() -> Self {
        let id = Uuid::new_v4().to_string();
        let name = guest_name_for(&id);
        Self { id, name }
    }

    /// Placeholder name for players that supplied none
    pub fn guest_name() -> String {
        guest_name_for(&Uuid::new_v4().to_string())
    }
}

fn guest_name_for(id: &str) -> String {
    let suffix: String = id.chars().filter(|c| *c != '-').take(4).collect();
    format!("Guest-{}", suffix)
}

/// Normalizes an untrusted display name.
///
/// Malformed names are repaired rather than rejected: control and
/// invisible characters are stripped, whitespace is collapsed, and the
/// result is capped at MAX_DISPLAY_NAME_LEN characters. A name with
/// nothing left after cleaning becomes a guest placeholder.
pub fn sanitize_display_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_control() && !INVISIBLE_CHARS.contains(c))
        .collect();

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    let capped: String = collapsed.chars().take(MAX_DISPLAY_NAME_LEN).collect();
    let trimmed = capped.trim().to_string();

    if trimmed.is_empty() {
        Player::guest_name()
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_name_passes_through() {
        assert_eq!(sanitize_display_name("Ada Lovelace"), "Ada Lovelace");
    }

    #[test]
    fn whitespace_is_collapsed_and_trimmed() {
        assert_eq!(sanitize_display_name("  Ada   Lovelace  "), "Ada Lovelace");
    }

    #[test]
    fn control_characters_are_stripped() {
        assert_eq!(sanitize_display_name("A\u{0000}d\u{0007}a"), "Ada");
        assert_eq!(sanitize_display_name("Ada\u{202E}evil"), "Adaevil");
    }

    #[test]
    fn zero_width_characters_are_stripped() {
        assert_eq!(sanitize_display_name("A\u{200B}d\u{200D}a"), "Ada");
    }

    #[test]
    fn long_names_are_capped() {
        let long = "x".repeat(100);
        assert_eq!(sanitize_display_name(&long).chars().count(), MAX_DISPLAY_NAME_LEN);
    }

    #[test]
    fn empty_input_becomes_guest() {
        assert!(sanitize_display_name("").starts_with("Guest-"));
        assert!(sanitize_display_name("   ").starts_with("Guest-"));
        assert!(sanitize_display_name("\u{200B}\u{200B}").starts_with("Guest-"));
    }

    #[test]
    fn guest_identities_are_unique() {
        let a = Player::guest();
        let b = Player::guest();
        assert_ne!(a.id, b.id);
        assert!(a.name.starts_with("Guest-"));
    }
}
