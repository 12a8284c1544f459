//! `ctxchat search`: retrieval without generation.
//!
//! Embeds the query with the configured provider and prints the top-`k`
//! passages with their cosine scores. Handy for checking what the model
//! would be given as context for a question.

use anyhow::Result;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::models::SearchHit;
use crate::store::VectorStore;

pub async fn run_search(config: &Config, query: &str, k: Option<usize>) -> Result<()> {
    let k = k.unwrap_or(config.retrieval.search_k);
    let store = VectorStore::open(&config.store.path).await?;
    let embedder = create_embedder(&config.embedding)?;

    let hits = store.query(embedder.as_ref(), query, k).await?;
    if hits.is_empty() {
        println!("No results.");
    } else {
        for (i, hit) in hits.iter().enumerate() {
            println!("{}", format_hit(i + 1, hit));
        }
    }

    store.close().await;
    Ok(())
}

fn format_hit(rank: usize, hit: &SearchHit) -> String {
    format!(
        "{}. [{:.3}] {} #{}\n   {}",
        rank,
        hit.score,
        hit.passage.source,
        hit.passage.position,
        snippet(&hit.passage.text, 200)
    )
}

/// First `max_chars` characters on a single line.
fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_flattens_and_truncates() {
        assert_eq!(snippet("uno\n\ndos   tres", 100), "uno dos tres");
        assert_eq!(snippet("ñandú ñandú", 5), "ñandú...");
    }
}
