//! Session engine.
//!
//! [`Engine`] owns every piece of state a conversation needs: the vector
//! store, the embedder, the language-model gateway and the conversation
//! memory. Nothing lives in globals, so independent engines (one per test,
//! for instance) never interfere.
//!
//! Mutating operations take `&mut self`; one query is answered completely
//! (retrieve, assemble prompt, generate, record) before the next can start.

use anyhow::{bail, Context, Result};
use thiserror::Error;

use crate::config::{load_credentials, Config};
use crate::embedding::{create_embedder, Embedder};
use crate::ingest::ingest;
use crate::llm::{create_backend, LlmError, LlmGateway, RotationPolicy};
use crate::memory::{format_turns, ConversationMemory, MemoryError};
use crate::models::{ConversationTurn, IngestionReport, Role, SearchHit};
use crate::store::VectorStore;

pub const DEFAULT_PERSONA: &str = "You are an expert technology consultant.";

/// Per-query failure. The session stays usable after any of these.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("retrieval failed: {0:#}")]
    Retrieval(anyhow::Error),
    #[error(transparent)]
    Llm(#[from] LlmError),
}

pub struct Engine {
    config: Config,
    store: VectorStore,
    embedder: Box<dyn Embedder>,
    gateway: LlmGateway,
    memory: ConversationMemory,
}

impl Engine {
    /// Assemble an engine from explicit parts.
    ///
    /// Fails if the index or summary location is unusable, or if the index
    /// was built with a different embedding dimension than `embedder`.
    pub async fn open(config: Config, embedder: Box<dyn Embedder>, gateway: LlmGateway) -> Result<Self> {
        let store = VectorStore::open(&config.store.path).await?;
        if let Some(dims) = store.dims().await? {
            if dims != embedder.dims() {
                bail!(
                    "Vector index at {} holds {}-dimensional vectors but embedder '{}' produces {}. \
                     Use the same embedding settings or point store.path at a new directory.",
                    config.store.path.display(),
                    dims,
                    embedder.model_name(),
                    embedder.dims()
                );
            }
        }
        let memory = ConversationMemory::open(&config.memory.summary_path, config.memory.summary_max_words)
            .context("Cannot use the summary file")?;

        Ok(Self {
            config,
            store,
            embedder,
            gateway,
            memory,
        })
    }

    /// Build providers and credentials from configuration, then [`open`](Self::open).
    pub async fn from_config(config: Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let credentials = load_credentials(&config.llm)?;
        let backend = create_backend(&config.llm)?;
        let gateway = LlmGateway::new(backend, credentials, RotationPolicy::from_config(&config.llm));
        tracing::debug!(
            backend = gateway.backend_name(),
            credentials = gateway.credential_count(),
            embedder = embedder.model_name(),
            "engine configured"
        );
        Self::open(config, embedder, gateway).await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    /// Ingest the drop zone into this engine's store.
    pub async fn ingest(&mut self, dry_run: bool) -> Result<IngestionReport> {
        ingest(&self.config, &self.store, self.embedder.as_ref(), dry_run).await
    }

    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        self.store.query(self.embedder.as_ref(), query, k).await
    }

    /// Answer `text` from retrieved passages and conversation memory.
    ///
    /// Both the question and the answer are recorded only when generation
    /// succeeds; a failed query leaves the session unchanged.
    pub async fn answer_query(&mut self, text: &str) -> Result<String, EngineError> {
        let hits = self
            .store
            .query(self.embedder.as_ref(), text, self.config.retrieval.top_k)
            .await
            .map_err(EngineError::Retrieval)?;
        tracing::debug!(hits = hits.len(), "retrieved passages");

        let prompt = build_prompt(
            self.config.llm.persona.as_deref().unwrap_or(DEFAULT_PERSONA),
            self.memory.summary(),
            self.memory.recent_window(self.config.memory.window),
            &hits,
            text,
        );
        let answer = self.gateway.generate(&prompt, None).await?;

        self.memory.record(Role::User, text);
        self.memory.record(Role::Assistant, answer.clone());
        Ok(answer)
    }

    pub fn history_view(&self) -> String {
        self.memory.history_view()
    }

    /// Persist a condensation of this session as the new summary.
    ///
    /// Errors are returned for reporting only; the previous summary file is
    /// intact whenever this fails.
    pub async fn end_session(&mut self) -> Result<Option<String>, MemoryError> {
        self.memory.save_summary(&self.gateway).await
    }

    pub async fn close(self) {
        self.store.close().await;
    }
}

/// Assemble the answering prompt.
pub fn build_prompt(
    persona: &str,
    summary: &str,
    recent: &[ConversationTurn],
    hits: &[SearchHit],
    query: &str,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(persona.trim());
    prompt.push_str(
        "\nUse the context below to answer the user's question. Explain it in your own words \
         instead of repeating the text literally, in a professional and friendly tone. \
         Answer in the same language as the question. If the context does not contain the \
         answer, say so.\n\n",
    );

    prompt.push_str("Summary of earlier conversations:\n");
    if summary.trim().is_empty() {
        prompt.push_str("(none)\n\n");
    } else {
        prompt.push_str(summary.trim());
        prompt.push_str("\n\n");
    }

    prompt.push_str("Recent conversation:\n");
    if recent.is_empty() {
        prompt.push_str("(none)\n\n");
    } else {
        prompt.push_str(&format_turns(recent));
        prompt.push_str("\n\n");
    }

    prompt.push_str("Context:\n---\n");
    if hits.is_empty() {
        prompt.push_str("(no indexed documents matched)\n");
    }
    for (i, hit) in hits.iter().enumerate() {
        prompt.push_str(&format!(
            "[{}] {} #{}\n{}\n---\n",
            i + 1,
            hit.passage.source,
            hit.passage.position,
            hit.passage.text.trim()
        ));
    }

    prompt.push_str(&format!("\nQuestion: {}\nAnswer:", query.trim()));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::llm::tests::ScriptedBackend;
    use crate::llm::LlmResponse;
    use crate::models::{Credential, Passage};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn gateway(outcome: Result<LlmResponse, LlmError>) -> LlmGateway {
        LlmGateway::new(
            Box::new(Arc::new(ScriptedBackend::new(outcome))),
            vec![Credential::new("KEY", "secret")],
            RotationPolicy {
                max_rotations: 1,
                backoff: Duration::from_millis(1),
            },
        )
    }

    fn hit(source: &str, position: i64, text: &str) -> SearchHit {
        SearchHit {
            passage: Passage {
                id: format!("{}-{}", source, position),
                source: source.to_string(),
                position,
                text: text.to_string(),
                hash: String::new(),
                embedding: Vec::new(),
            },
            score: 0.5,
        }
    }

    #[test]
    fn test_prompt_sections_in_order() {
        let recent = vec![ConversationTurn {
            role: Role::User,
            text: "hola".into(),
            sequence: 1,
        }];
        let hits = vec![hit("datos.txt", 0, "Total gastos: 1200")];
        let prompt = build_prompt(DEFAULT_PERSONA, "prior talk", &recent, &hits, "¿total gastos?");

        let persona = prompt.find("expert technology consultant").unwrap();
        let summary = prompt.find("prior talk").unwrap();
        let turns = prompt.find("user: hola").unwrap();
        let context = prompt.find("[1] datos.txt #0\nTotal gastos: 1200").unwrap();
        let question = prompt.find("Question: ¿total gastos?").unwrap();
        assert!(persona < summary && summary < turns && turns < context && context < question);
    }

    #[test]
    fn test_prompt_with_nothing_known() {
        let prompt = build_prompt("Persona.", "", &[], &[], "q");
        assert!(prompt.starts_with("Persona."));
        assert!(prompt.contains("no indexed documents matched"));
    }

    #[tokio::test]
    async fn test_failed_query_keeps_session_unchanged() {
        let tmp = TempDir::new().unwrap();
        let config = Config::rooted_at(tmp.path());
        let mut engine = Engine::open(
            config,
            Box::new(HashingEmbedder::new(16)),
            gateway(Err(LlmError::Upstream("500".into()))),
        )
        .await
        .unwrap();

        let err = engine.answer_query("hola").await.unwrap_err();
        assert!(matches!(err, EngineError::Llm(LlmError::Upstream(_))));
        assert!(engine.memory().turns().is_empty());
    }

    #[tokio::test]
    async fn test_answer_records_both_turns() {
        let tmp = TempDir::new().unwrap();
        let config = Config::rooted_at(tmp.path());
        let mut engine = Engine::open(
            config,
            Box::new(HashingEmbedder::new(16)),
            gateway(Ok(LlmResponse::Text("respuesta".into()))),
        )
        .await
        .unwrap();

        assert_eq!(engine.answer_query("pregunta").await.unwrap(), "respuesta");
        let turns = engine.memory().turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[1].text, "respuesta");
    }

    #[tokio::test]
    async fn test_open_rejects_dimension_mismatch() {
        let tmp = TempDir::new().unwrap();
        let config = Config::rooted_at(tmp.path());
        {
            let store = VectorStore::open(&config.store.path).await.unwrap();
            let mut p = hit("a.txt", 0, "texto").passage;
            p.embedding = vec![1.0; 8];
            store.insert(&[p], &[]).await.unwrap();
            store.close().await;
        }

        let result = Engine::open(
            config,
            Box::new(HashingEmbedder::new(16)),
            gateway(Ok(LlmResponse::Text("x".into()))),
        )
        .await;
        assert!(result.is_err());
    }
}
