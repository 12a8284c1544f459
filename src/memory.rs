//! Two-tier conversation memory.
//!
//! The session tier is an append-only list of turns; prompts replay a
//! suffix of it ([`ConversationMemory::recent_window`]). The persisted tier
//! is a single plain-text summary file, loaded when the memory is opened
//! and fully rewritten by [`ConversationMemory::save_summary`] with a fresh
//! condensation of the current session. The previous summary is not fed
//! into that condensation: each save replaces it outright.
//!
//! Writes go to a temporary file in the same directory and are renamed
//! over the summary, so a crash never leaves a partial file behind.

use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::llm::{LlmError, LlmGateway};
use crate::models::{ConversationTurn, Role};

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("cannot read summary file {}: {source}", .path.display())]
    SummaryRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("summary generation failed: {0}")]
    Generation(#[from] LlmError),
    #[error("cannot persist summary to {}: {source}", .path.display())]
    SummaryPersist {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub struct ConversationMemory {
    summary_path: PathBuf,
    summary: String,
    turns: Vec<ConversationTurn>,
    summary_max_words: usize,
}

impl ConversationMemory {
    /// Open the memory backed by `summary_path`, loading the persisted
    /// summary (empty if the file does not exist yet). The parent
    /// directory is created so that a later save can succeed.
    pub fn open(summary_path: &Path, summary_max_words: usize) -> Result<Self, MemoryError> {
        if let Some(parent) = summary_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| MemoryError::SummaryPersist {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let summary = read_summary(summary_path)?;
        Ok(Self {
            summary_path: summary_path.to_path_buf(),
            summary,
            turns: Vec::new(),
            summary_max_words,
        })
    }

    pub fn summary_path(&self) -> &Path {
        &self.summary_path
    }

    /// Summary as loaded at start-up or last saved by this session.
    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// Re-read the persisted summary from disk.
    pub fn load_summary(&self) -> Result<String, MemoryError> {
        read_summary(&self.summary_path)
    }

    pub fn record(&mut self, role: Role, text: impl Into<String>) -> &ConversationTurn {
        let sequence = self.turns.len() as u64 + 1;
        self.turns.push(ConversationTurn {
            role,
            text: text.into(),
            sequence,
        });
        &self.turns[self.turns.len() - 1]
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// The last `n` turns in chronological order (fewer if the session is
    /// shorter).
    pub fn recent_window(&self, n: usize) -> &[ConversationTurn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    /// Human-readable transcript of the session so far.
    pub fn history_view(&self) -> String {
        if self.turns.is_empty() {
            return "(no messages in this session yet)".to_string();
        }
        format_turns(&self.turns)
    }

    /// Condense this session through `gateway` and overwrite the persisted
    /// summary with the result.
    ///
    /// Returns `Ok(None)` without touching the file when the session has no
    /// turns. On any error the file on disk is left exactly as it was.
    pub async fn save_summary(&mut self, gateway: &LlmGateway) -> Result<Option<String>, MemoryError> {
        if self.turns.is_empty() {
            tracing::debug!("empty session; keeping the existing summary");
            return Ok(None);
        }

        let prompt = condensation_prompt(&self.turns, self.summary_max_words);
        let summary = gateway.generate(&prompt, None).await?;
        write_atomically(&self.summary_path, &summary)?;

        tracing::info!(
            path = %self.summary_path.display(),
            words = summary.split_whitespace().count(),
            "session summary saved"
        );
        self.summary = summary.clone();
        Ok(Some(summary))
    }
}

fn read_summary(path: &Path) -> Result<String, MemoryError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(text.trim().to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(source) => Err(MemoryError::SummaryRead {
            path: path.to_path_buf(),
            source,
        }),
    }
}

pub(crate) fn format_turns(turns: &[ConversationTurn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.role, t.text))
        .collect::<Vec<_>>()
        .join("\n")
}

fn condensation_prompt(turns: &[ConversationTurn], max_words: usize) -> String {
    format!(
        "Summarize the following conversation in at most {} words. \
         Keep the facts the user shared, the questions asked and the conclusions reached, \
         so the conversation can be resumed later. Write the summary in the language of the conversation.\n\n\
         Conversation:\n{}\n\nSummary:",
        max_words,
        format_turns(turns)
    )
}

fn write_atomically(path: &Path, contents: &str) -> Result<(), MemoryError> {
    let persist_err = |source: std::io::Error| MemoryError::SummaryPersist {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(p) => p.to_path_buf(),
        None => PathBuf::from("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(persist_err)?;
    tmp.write_all(contents.as_bytes()).map_err(persist_err)?;
    // The temporary file is created owner-only; keep the mode of the file it replaces.
    if let Ok(existing) = std::fs::metadata(path) {
        tmp.as_file()
            .set_permissions(existing.permissions())
            .map_err(persist_err)?;
    }
    tmp.as_file().sync_all().map_err(persist_err)?;
    tmp.persist(path).map_err(|e| persist_err(e.error))?;
    Ok(())
}
