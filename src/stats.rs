//! Index and memory overview.
//!
//! Used by `ctxchat stats` to show what has been ingested and whether a
//! session summary exists, without needing any LLM credentials.

use anyhow::Result;
use chrono::{TimeZone, Utc};

use crate::config::Config;
use crate::ingest::discover_sources;
use crate::store::{VectorStore, INDEX_FILE};

/// Run the stats command: query the store and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = VectorStore::open(&config.store.path).await?;

    let passages = store.passage_count().await?;
    let sources = store.list_sources().await?;
    let dims = store.dims().await?;
    let pending = discover_sources(&config.sources, false)?.len();

    let index_size = std::fs::metadata(config.store.path.join(INDEX_FILE))
        .map(|m| m.len())
        .unwrap_or(0);
    let summary = std::fs::read_to_string(&config.memory.summary_path).unwrap_or_default();

    println!("context-chat — Index Stats");
    println!("==========================");
    println!();
    println!("  Index:       {}", config.store.path.display());
    println!("  Size:        {}", format_bytes(index_size));
    println!(
        "  Dimensions:  {}",
        dims.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
    );
    println!();
    println!("  Sources:     {}", sources.len());
    println!("  Passages:    {}", passages);
    println!("  Pending:     {} file(s) in {}", pending, config.sources.root.display());
    println!();
    println!(
        "  Summary:     {} word(s) in {}",
        summary.split_whitespace().count(),
        config.memory.summary_path.display()
    );

    if !sources.is_empty() {
        println!();
        println!("  By source:");
        println!("  {:<32} {:>8}   {}", "SOURCE", "PASSAGES", "INGESTED");
        println!("  {}", "-".repeat(64));
        for s in &sources {
            println!(
                "  {:<32} {:>8}   {}",
                s.source,
                s.passage_count,
                format_ts(s.ingested_at)
            );
        }
    }

    println!();
    store.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn format_ts(ts: i64) -> String {
    match Utc.timestamp_opt(ts, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        None => "?".to_string(),
    }
}
