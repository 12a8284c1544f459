//! Interactive and one-shot question answering.
//!
//! Both entry points run start-up ingestion first, then answer through an
//! [`Engine`], and persist the session summary before returning. Query
//! failures are printed and never end the session.

use anyhow::Result;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::config::Config;
use crate::engine::{Engine, EngineError};
use crate::ingest::print_report;
use crate::llm::LlmError;

const EXIT_WORDS: [&str; 4] = ["/exit", "exit", "quit", "salir"];

/// `ctxchat ask <question>`.
pub async fn run_ask(config: Config, question: &str) -> Result<()> {
    let mut engine = Engine::from_config(config).await?;
    startup_ingest(&mut engine).await;

    match engine.answer_query(question).await {
        Ok(answer) => println!("{}", answer),
        Err(e) => eprintln!("{}", describe(&e)),
    }

    finish_session(&mut engine, &mut std::io::stdout()).await;
    engine.close().await;
    Ok(())
}

/// `ctxchat chat`: read questions from stdin until an exit word or EOF.
pub async fn run_chat(config: Config) -> Result<()> {
    let mut engine = Engine::from_config(config).await?;
    startup_ingest(&mut engine).await;

    if !engine.memory().summary().is_empty() {
        println!("(resuming with the summary of earlier conversations)");
    }
    println!("Ask a question. /history shows this session, /exit ends it.");

    let stdin = BufReader::new(tokio::io::stdin());
    run_session(&mut engine, stdin, &mut std::io::stdout()).await;
    engine.close().await;
    Ok(())
}

/// Answer lines from `reader` until an exit word, end of input or a read
/// error, then save the session summary.
///
/// Lines that are not valid UTF-8 are reported and skipped.
pub async fn run_session<R, W>(engine: &mut Engine, mut reader: R, out: &mut W)
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut buf = Vec::new();
    loop {
        say(out, format_args!("> "));

        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                say(out, format_args!("\n"));
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "could not read input, ending session");
                eprintln!("Error reading input: {}", e);
                break;
            }
        }

        let input = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim(),
            Err(_) => {
                eprintln!("Error: the line is not valid UTF-8 and was ignored.");
                continue;
            }
        };
        if input.is_empty() {
            continue;
        }
        if EXIT_WORDS.iter().any(|w| input.eq_ignore_ascii_case(w)) {
            break;
        }
        if input == "/history" {
            say(out, format_args!("{}\n", engine.history_view()));
            continue;
        }

        match engine.answer_query(input).await {
            Ok(answer) => say(out, format_args!("\n{}\n\n", answer)),
            Err(e) => eprintln!("{}", describe(&e)),
        }
    }

    finish_session(engine, out).await;
}

fn say<W: Write>(out: &mut W, text: std::fmt::Arguments<'_>) {
    if let Err(e) = out.write_fmt(text).and_then(|_| out.flush()) {
        tracing::warn!(error = %e, "could not write to the terminal");
    }
}

async fn startup_ingest(engine: &mut Engine) {
    match engine.ingest(false).await {
        Ok(report) if report.is_noop() => {}
        Ok(report) => print_report(&report, false),
        Err(e) => eprintln!("Ingestion failed, answering from the existing index: {:#}", e),
    }
}

async fn finish_session<W: Write>(engine: &mut Engine, out: &mut W) {
    match engine.end_session().await {
        Ok(Some(_)) => say(
            out,
            format_args!(
                "Session summary saved to {}\n",
                engine.memory().summary_path().display()
            ),
        ),
        Ok(None) => {}
        Err(e) => {
            tracing::error!(error = %e, "session summary not saved");
            eprintln!("Could not save the session summary ({}); the previous one was kept.", e);
        }
    }
}

fn describe(err: &EngineError) -> String {
    match err {
        EngineError::Llm(LlmError::AllCredentialsExhausted { .. }) => {
            format!("The model is busy right now: {}", err)
        }
        other => format!("Error: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::llm::tests::ScriptedBackend;
    use crate::llm::{LlmGateway, LlmResponse, RotationPolicy};
    use crate::models::Credential;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn engine_with(backend: &Arc<ScriptedBackend>, root: &Path) -> Engine {
        let gateway = LlmGateway::new(
            Box::new(backend.clone()),
            vec![Credential::new("KEY", "secret")],
            RotationPolicy {
                max_rotations: 1,
                backoff: Duration::from_millis(1),
            },
        );
        Engine::open(Config::rooted_at(root), Box::new(HashingEmbedder::new(64)), gateway)
            .await
            .unwrap()
    }

    fn answering() -> Arc<ScriptedBackend> {
        Arc::new(ScriptedBackend::new(Ok(LlmResponse::Text("respuesta".into()))))
    }

    #[tokio::test]
    async fn test_session_survives_bad_input_and_failed_query() {
        let tmp = TempDir::new().unwrap();
        let backend = answering();
        backend.push("KEY", Err(LlmError::Upstream("gemini returned 500".into())));
        let mut engine = engine_with(&backend, tmp.path()).await;

        let input: &[u8] = b"caf\xe9\n/history\nprimera\nsegunda\n";
        let mut out = Vec::new();
        run_session(&mut engine, input, &mut out).await;

        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("(no messages in this session yet)"));
        assert!(out.contains("respuesta"));
        assert!(out.contains("Session summary saved to"));

        // The failed query leaves no turns; the second one is recorded.
        let turns = engine.memory().turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].text, "segunda");

        let summary_path = engine.memory().summary_path().to_path_buf();
        assert_eq!(std::fs::read_to_string(summary_path).unwrap(), "respuesta");
        engine.close().await;
    }

    #[tokio::test]
    async fn test_exit_words_end_the_session() {
        let tmp = TempDir::new().unwrap();
        for word in ["/exit", "exit", "QUIT", "salir"] {
            let backend = answering();
            let mut engine = engine_with(&backend, tmp.path()).await;

            let input = format!("{}\nnunca se pregunta\n", word);
            let mut out = Vec::new();
            run_session(&mut engine, input.as_bytes(), &mut out).await;

            assert!(backend.calls.lock().unwrap().is_empty(), "{} did not end the session", word);
            assert!(engine.memory().turns().is_empty());
            engine.close().await;
        }
    }

    #[tokio::test]
    async fn test_history_shows_the_session_and_eof_saves_summary() {
        let tmp = TempDir::new().unwrap();
        let backend = answering();
        let mut engine = engine_with(&backend, tmp.path()).await;

        let input: &[u8] = b"hola\n/history\n";
        let mut out = Vec::new();
        run_session(&mut engine, input, &mut out).await;

        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("user: hola\nassistant: respuesta"), "out={}", out);
        // One answer plus one condensation.
        assert_eq!(backend.calls.lock().unwrap().len(), 2);
        assert_eq!(engine.memory().load_summary().unwrap(), "respuesta");
        engine.close().await;
    }

    #[test]
    fn test_exhausted_is_reported_as_try_later() {
        let err = EngineError::Llm(LlmError::AllCredentialsExhausted {
            credentials: 2,
            rotations: 3,
        });
        let msg = describe(&err);
        assert!(msg.starts_with("The model is busy"));
        assert!(msg.contains("try again later"));
    }

    #[test]
    fn test_upstream_is_reported_as_error() {
        let err = EngineError::Llm(LlmError::Upstream("gemini returned 400".into()));
        assert!(describe(&err).starts_with("Error: upstream error"));
    }
}
