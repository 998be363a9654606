//! Conversation Session: append-only history of one chat.
//!
//! The router and every specialist are stateless between turns; the
//! [`Session::snapshot`] replayed on each invocation is their only memory.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::types::{GuardrailViolation, SessionKey, Turn};

/// Errors persisting a session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to serialize session history: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write session history to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Session key '{0}' cannot be used as a file name")]
    InvalidKey(String),
}

/// Ordered history of one session.
#[derive(Debug, Clone)]
pub struct Session {
    key: SessionKey,
    turns: Vec<Turn>,
}

impl Session {
    pub fn new(key: SessionKey) -> Self {
        Self {
            key,
            turns: Vec::new(),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn append_user(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::user(text));
    }

    pub fn append_assistant(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::assistant(text));
    }

    /// Record an assistant answer the output gate did not accept.
    pub fn append_flagged(&mut self, text: impl Into<String>, violations: Vec<GuardrailViolation>) {
        self.turns.push(Turn::flagged(text, violations));
    }

    /// Record a refusal in place of an assistant answer.
    pub fn append_refusal(&mut self, text: impl Into<String>, violation: GuardrailViolation) {
        self.turns.push(Turn::refusal(text, violation));
    }

    /// Ordered copy of the history, fed as context to the next invocation.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Pretty-printed JSON array of the history.
    pub fn to_history_json(&self) -> Result<String, SessionError> {
        Ok(serde_json::to_string_pretty(&self.turns)?)
    }

    /// Write the history to `<dir>/<session key>.json`, replacing any earlier file.
    pub fn save_to(&self, dir: &Path) -> Result<PathBuf, SessionError> {
        let path = dir.join(self.file_name()?);
        let json = self.to_history_json()?;

        fs::create_dir_all(dir)
            .and_then(|_| fs::write(&path, json))
            .map_err(|source| SessionError::Write {
                path: path.clone(),
                source,
            })?;

        tracing::info!(session = %self.key, path = %path.display(), turns = self.turns.len(), "Saved session history");
        Ok(path)
    }

    fn file_name(&self) -> Result<String, SessionError> {
        let key = self.key.as_str();
        let safe = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && key != "."
            && key != "..";

        if safe {
            Ok(format!("{}.json", key))
        } else {
            Err(SessionError::InvalidKey(key.to_string()))
        }
    }
}
