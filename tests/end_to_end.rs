use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use context_chat::config::Config;
use context_chat::embedding::HashingEmbedder;
use context_chat::engine::Engine;
use context_chat::llm::{LlmBackend, LlmError, LlmGateway, LlmResponse, RotationPolicy};
use context_chat::models::Credential;
use tempfile::TempDir;

/// Answers every prompt with `echo:<prompt length in chars>` and keeps the prompts.
struct EchoBackend {
    prompts: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl LlmBackend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    async fn invoke(&self, prompt: &str, _credential: &Credential) -> Result<LlmResponse, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(LlmResponse::Text(format!("echo:{}", prompt.chars().count())))
    }
}

fn config_for(root: &std::path::Path) -> Config {
    let mut config = Config::rooted_at(root);
    config.chunking.chunk_size = 100;
    config.chunking.chunk_overlap = 20;
    config.retrieval.top_k = 2;
    config
}

/// 240 characters: three 80-character lines, so 100/20 windows give 3 passages.
fn document() -> String {
    [
        "Informe anual. El total de gastos del ejercicio fue de 1200 euros en viajes.",
        "La empresa de Jeremias desarrolla software educativo para colegios.",
        "Los gastos de marketing y el total de ingresos se revisan cada trimestre.",
    ]
    .iter()
    .map(|line| format!("{:<80}", line))
    .collect()
}

async fn engine(config: Config, prompts: &Arc<Mutex<Vec<String>>>) -> Engine {
    let gateway = LlmGateway::new(
        Box::new(EchoBackend {
            prompts: Arc::clone(prompts),
        }),
        vec![Credential::new("KEY_A", "a"), Credential::new("KEY_B", "b")],
        RotationPolicy {
            max_rotations: 2,
            backoff: Duration::from_millis(1),
        },
    );
    Engine::open(config, Box::new(HashingEmbedder::new(64)), gateway)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_total_gastos_session() {
    let tmp = TempDir::new().unwrap();
    let config = config_for(tmp.path());
    std::fs::create_dir_all(&config.sources.root).unwrap();
    std::fs::write(config.sources.root.join("datos.txt"), document()).unwrap();

    let prompts = Arc::new(Mutex::new(Vec::new()));
    let mut engine = engine(config.clone(), &prompts).await;

    let report = engine.ingest(false).await.unwrap();
    assert_eq!(report.sources_processed, 1);
    assert_eq!(report.passages_added, 3);
    assert!(config.sources.archive_path().join("datos.txt").exists());

    let hits = engine.search("total gastos", 2).await.unwrap();
    assert_eq!(hits.len(), 2);
    // Windows 0 and 2 hold both "total" and "gastos"; the middle one only "gastos".
    let mut positions: Vec<i64> = hits.iter().map(|h| h.passage.position).collect();
    positions.sort();
    assert_eq!(positions, vec![0, 2]);
    assert!(hits[0].score >= hits[1].score);

    let answer = engine.answer_query("total gastos").await.unwrap();
    let sent = prompts.lock().unwrap()[0].clone();
    assert_eq!(answer, format!("echo:{}", sent.chars().count()));
    for hit in &hits {
        assert!(sent.contains(hit.passage.text.trim()));
    }

    let before = engine.memory().load_summary().unwrap();
    let saved = engine.end_session().await.unwrap();
    assert!(saved.is_some());
    let after = engine.memory().load_summary().unwrap();
    assert!(!after.is_empty());
    assert_ne!(after, before);
    engine.close().await;
}

#[tokio::test]
async fn test_next_session_reuses_index_and_summary() {
    let tmp = TempDir::new().unwrap();
    let config = config_for(tmp.path());
    std::fs::create_dir_all(&config.sources.root).unwrap();
    std::fs::write(config.sources.root.join("datos.txt"), document()).unwrap();

    let prompts = Arc::new(Mutex::new(Vec::new()));
    let summary = {
        let mut first = engine(config.clone(), &prompts).await;
        first.ingest(false).await.unwrap();
        first.answer_query("total gastos").await.unwrap();
        let summary = first.end_session().await.unwrap().unwrap();
        first.close().await;
        summary
    };

    let mut second = engine(config, &prompts).await;
    assert_eq!(second.memory().summary(), summary);

    let report = second.ingest(false).await.unwrap();
    assert!(report.is_noop());
    assert_eq!(second.store().passage_count().await.unwrap(), 3);

    second.answer_query("y los ingresos?").await.unwrap();
    let last_prompt = prompts.lock().unwrap().last().unwrap().clone();
    assert!(last_prompt.contains(&summary), "prior summary must reach the prompt");
    second.close().await;
}

#[tokio::test]
async fn test_recent_turns_reach_the_prompt() {
    let tmp = TempDir::new().unwrap();
    let mut config = config_for(tmp.path());
    config.memory.window = 2;

    let prompts = Arc::new(Mutex::new(Vec::new()));
    let mut engine = engine(config, &prompts).await;

    engine.answer_query("primera pregunta").await.unwrap();
    engine.answer_query("segunda pregunta").await.unwrap();
    engine.answer_query("tercera pregunta").await.unwrap();

    let third = prompts.lock().unwrap()[2].clone();
    assert!(third.contains("user: segunda pregunta"));
    assert!(!third.contains("user: primera pregunta"));
    assert_eq!(engine.memory().turns().len(), 6);
    assert!(engine.history_view().starts_with("user: primera pregunta"));
    engine.close().await;
}
