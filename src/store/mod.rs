//! Persistent vector store.
//!
//! Passages and their embeddings live in a SQLite database
//! (`index.sqlite`) inside the configured index directory. Insertion is
//! additive only: one transaction per batch, no update, no delete.
//! Similarity queries load every vector and rank by cosine similarity in
//! Rust, breaking score ties by passage id so identical queries against an
//! unchanged store always return the same ordering.
//!
//! The embedding dimension is recorded on the first insert; every later
//! insert and query must use vectors of that size.

mod schema;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, Embedder};
use crate::models::{Passage, SearchHit};

/// File name of the database inside the index directory.
pub const INDEX_FILE: &str = "index.sqlite";

/// Bookkeeping row for a source whose passages are in the batch.
#[derive(Debug, Clone)]
pub struct IndexedSource {
    pub content_hash: String,
    pub source: String,
    pub passage_count: usize,
}

/// A row of the `sources` table as read back for inspection.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub source: String,
    pub content_hash: String,
    pub passage_count: i64,
    pub ingested_at: i64,
}

pub struct VectorStore {
    pool: SqlitePool,
    dir: PathBuf,
}

impl VectorStore {
    /// Open the index in `dir`, creating the directory and an empty index
    /// if absent.
    pub async fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create vector index directory: {}", dir.display()))?;
        let db_path = dir.join(INDEX_FILE);

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Cannot open vector index: {}", db_path.display()))?;

        schema::migrate(&pool).await?;

        Ok(Self {
            pool,
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Embedding dimension fixed by the first insert, if any.
    pub async fn dims(&self) -> Result<Option<usize>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM meta WHERE key = 'dims'")
            .fetch_optional(&self.pool)
            .await?;
        Ok(value.and_then(|v| v.parse().ok()))
    }

    /// Insert a batch of passages together with the sources they came from.
    ///
    /// Everything is written in one transaction: when this returns `Ok`, the
    /// passages are durable; on error nothing from the batch is visible.
    /// Re-inserting an existing passage id is ignored.
    pub async fn insert(&self, passages: &[Passage], sources: &[IndexedSource]) -> Result<()> {
        if passages.is_empty() && sources.is_empty() {
            return Ok(());
        }

        let expected = match self.dims().await? {
            Some(d) => Some(d),
            None => passages.first().map(|p| p.embedding.len()),
        };
        if let Some(dims) = expected {
            if dims == 0 {
                bail!("Refusing to index passages with empty embeddings");
            }
            if let Some(bad) = passages.iter().find(|p| p.embedding.len() != dims) {
                bail!(
                    "Passage {} has a {}-dimensional embedding; this index stores {}-dimensional vectors",
                    bad.id,
                    bad.embedding.len(),
                    dims
                );
            }
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        if let Some(dims) = expected {
            sqlx::query("INSERT INTO meta (key, value) VALUES ('dims', ?) ON CONFLICT(key) DO NOTHING")
                .bind(dims.to_string())
                .execute(&mut *tx)
                .await?;
        }

        for passage in passages {
            sqlx::query(
                r#"
                INSERT INTO passages (id, source, position, text, hash, embedding, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO NOTHING
                "#,
            )
            .bind(&passage.id)
            .bind(&passage.source)
            .bind(passage.position)
            .bind(&passage.text)
            .bind(&passage.hash)
            .bind(vec_to_blob(&passage.embedding))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        for source in sources {
            sqlx::query(
                r#"
                INSERT INTO sources (content_hash, source, passage_count, ingested_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(content_hash) DO NOTHING
                "#,
            )
            .bind(&source.content_hash)
            .bind(&source.source)
            .bind(source.passage_count as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Whether a source with this content hash has already been indexed.
    pub async fn has_source(&self, content_hash: &str) -> Result<bool> {
        let found: Option<String> =
            sqlx::query_scalar("SELECT content_hash FROM sources WHERE content_hash = ?")
                .bind(content_hash)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    pub async fn passage_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM passages")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn source_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sources")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Indexed sources, most recently ingested first.
    pub async fn list_sources(&self) -> Result<Vec<SourceRecord>> {
        let rows = sqlx::query(
            "SELECT source, content_hash, passage_count, ingested_at FROM sources \
             ORDER BY ingested_at DESC, source ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| SourceRecord {
                source: row.get("source"),
                content_hash: row.get("content_hash"),
                passage_count: row.get("passage_count"),
                ingested_at: row.get("ingested_at"),
            })
            .collect())
    }

    /// Top-`k` passages for an already-embedded query, best first.
    ///
    /// A `k` larger than the passage count returns every passage.
    pub async fn query_vector(&self, query_vec: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        if let Some(dims) = self.dims().await? {
            if dims != query_vec.len() {
                bail!(
                    "Query embedding has {} dimensions; this index stores {}-dimensional vectors",
                    query_vec.len(),
                    dims
                );
            }
        }

        let rows = sqlx::query(
            "SELECT id, source, position, text, hash, embedding FROM passages",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<SearchHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let embedding = blob_to_vec(&blob);
                let score = cosine_similarity(query_vec, &embedding);
                SearchHit {
                    passage: Passage {
                        id: row.get("id"),
                        source: row.get("source"),
                        position: row.get("position"),
                        text: row.get("text"),
                        hash: row.get("hash"),
                        embedding,
                    },
                    score,
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.passage.id.cmp(&b.passage.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Embed `text` and return its top-`k` passages.
    pub async fn query(&self, embedder: &dyn Embedder, text: &str, k: usize) -> Result<Vec<SearchHit>> {
        let query_vec = embedder.embed(text).await?;
        self.query_vector(&query_vec, k).await
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
