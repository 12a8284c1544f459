//! Core data models used throughout context-chat.
//!
//! These types represent the sources, passages, conversation turns and
//! credentials that flow through ingestion, retrieval and answering.

use std::fmt;
use std::path::PathBuf;

/// A bounded-size slice of a source document plus its embedding.
///
/// Passages are created once during ingestion and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub id: String,
    /// Identifier of the originating source (its file name).
    pub source: String,
    /// Zero-based index of this passage within its source.
    pub position: i64,
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
    pub embedding: Vec<f32>,
}

/// A passage returned from a similarity query, with its cosine score.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub passage: Passage,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingState {
    Pending,
    Processed,
}

/// A file found in the drop zone, with its extracted text.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub source_id: String,
    pub content: String,
    /// SHA-256 of `content`, used to recognise sources already indexed.
    pub content_hash: String,
    pub state: ProcessingState,
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Default)]
pub struct IngestionReport {
    pub sources_found: usize,
    pub sources_processed: usize,
    pub passages_added: usize,
    /// Sources whose content was already in the index; archived without re-embedding.
    pub duplicates_skipped: usize,
    /// `(source, reason)` for sources that could not be read or extracted.
    pub failed: Vec<(String, String)>,
    /// `(source, reason)` for indexed sources that could not be moved to the archive.
    pub archive_failures: Vec<(String, String)>,
}

impl IngestionReport {
    pub fn is_noop(&self) -> bool {
        self.sources_found == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message of the running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    /// Monotonic, starting at 1 for the first turn of the session.
    pub sequence: u64,
}

/// One interchangeable API key for the language-model backend.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Human-readable name, usually the environment variable it came from.
    pub label: String,
    pub secret: String,
}

impl Credential {
    pub fn new(label: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            secret: secret.into(),
        }
    }
}

// Secrets never reach logs or panic messages.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("label", &self.label)
            .field("secret", &"<redacted>")
            .finish()
    }
}
