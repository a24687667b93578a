//! Race snippet selection
//!
//! Every race is typed against one snippet. Generation and curation
//! live in a separate content service; this seam only has to hand out
//! a snippet per race.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{KeyclashError, Result};

/// Text a race is typed against
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snippet {
    pub id: String,
    pub text: String,
    /// Character count of `text`; progress is bounded by this value
    pub char_count: u32,
}

impl Snippet {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let char_count = text.chars().count() as u32;
        Self {
            id: id.into(),
            text,
            char_count,
        }
    }
}

/// Snippet provider interface
#[async_trait]
pub trait SnippetSource: Send + Sync {
    /// Pick a snippet for a new race
    async fn pick(&self) -> Result<Snippet>;
}

/// Built-in snippet corpus for deployments without a content service
pub struct StaticSnippets {
    snippets: Vec<Snippet>,
}

impl StaticSnippets {
    pub fn new() -> Self {
        let texts = [
            "The quick brown fox jumps over the lazy dog while the cat watches from the warm windowsill.",
            "Programs must be written for people to read, and only incidentally for machines to execute.",
            "A river cuts through rock not because of its power, but because of its persistence over time.",
            "Typing fast is useless if the words are wrong; accuracy first, then let the speed follow naturally.",
            "The lighthouse keeper climbed the spiral stairs each evening to light the lamp before the fog rolled in.",
            "Somewhere between the first keystroke and the last, every writer discovers what the sentence wanted to say.",
        ];

        let snippets = texts
            .iter()
            .enumerate()
            .map(|(i, text)| Snippet::new(format!("builtin-{}", i), *text))
            .collect();

        Self { snippets }
    }

    /// Corpus from caller-supplied texts; empty input is rejected at
    /// pick time, not construction time
    pub fn from_texts(texts: Vec<String>) -> Self {
        let snippets = texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| Snippet::new(format!("custom-{}", i), text))
            .collect();
        Self { snippets }
    }
}

impl Default for StaticSnippets {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnippetSource for StaticSnippets {
    async fn pick(&self) -> Result<Snippet> {
        if self.snippets.is_empty() {
            return Err(KeyclashError::ConfigError(
                "Snippet corpus is empty".to_string(),
            ));
        }
        let idx = rand::thread_rng().gen_range(0..self.snippets.len());
        Ok(self.snippets[idx].clone())
    }
}
