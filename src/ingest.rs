//! Ingestion pipeline.
//!
//! One run goes through these phases in order:
//!
//! 1. **Discover** eligible files directly under `sources.root` (no
//!    recursion, so the archive subfolder is never rescanned).
//! 2. **Read** each file; unreadable sources are reported and left in place.
//! 3. **Deduplicate** by SHA-256 of the extracted text against the index and
//!    against earlier files of the same run.
//! 4. **Chunk** new sources into overlapping passages.
//! 5. **Embed** every new passage of the run.
//! 6. **Insert** all passages and source records in a single store batch.
//! 7. **Archive** each indexed or duplicate source into the archive folder,
//!    one file at a time, best-effort.
//!
//! Archival happens only after the batch insert has committed. A crash
//! between 6 and 7 leaves files in the drop zone whose content is already
//! indexed; the next run recognises them by hash and just archives them.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::chunk::{chunk_source, expected_passages};
use crate::config::{Config, SourcesConfig};
use crate::embedding::{create_embedder, embed_all, Embedder};
use crate::extract::read_source;
use crate::models::{IngestionReport, Passage, ProcessingState, SourceDocument};
use crate::store::{IndexedSource, VectorStore};

/// Run one ingestion pass over the drop zone.
///
/// With `dry_run` set nothing is embedded, inserted or moved; the report
/// holds what a real run would do, with `passages_added` as an estimate.
/// Per-source read failures are collected in the report. Embedding and
/// store failures abort the run before any file is archived.
pub async fn ingest(
    config: &Config,
    store: &VectorStore,
    embedder: &dyn Embedder,
    dry_run: bool,
) -> Result<IngestionReport> {
    let mut report = IngestionReport::default();
    let files = discover_sources(&config.sources, !dry_run)?;
    report.sources_found = files.len();
    if files.is_empty() {
        tracing::info!(root = %config.sources.root.display(), "no new sources to ingest");
        return Ok(report);
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut new_docs: Vec<SourceDocument> = Vec::new();
    let mut duplicates: Vec<PathBuf> = Vec::new();

    for path in files {
        let source_id = source_name(&path);
        let content = match read_source(&path) {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                tracing::warn!(source = %source_id, "no extractable text; leaving in place");
                report.failed.push((source_id, "no extractable text".to_string()));
                continue;
            }
            Err(e) => {
                tracing::warn!(source = %source_id, error = %e, "skipping unreadable source");
                report.failed.push((source_id, e.to_string()));
                continue;
            }
        };

        let content_hash = content_hash(&content);
        if !seen.insert(content_hash.clone()) || store.has_source(&content_hash).await? {
            tracing::info!(source = %source_id, "content already indexed; archiving without re-embedding");
            report.duplicates_skipped += 1;
            duplicates.push(path);
            continue;
        }

        new_docs.push(SourceDocument {
            path,
            source_id,
            content,
            content_hash,
            state: ProcessingState::Pending,
        });
    }

    let size = config.chunking.chunk_size;
    let overlap = config.chunking.chunk_overlap;

    if dry_run {
        report.sources_processed = new_docs.len();
        report.passages_added = new_docs
            .iter()
            .map(|d| expected_passages(d.content.chars().count(), size, overlap))
            .sum();
        return Ok(report);
    }

    let mut passages: Vec<Passage> = Vec::new();
    let mut indexed: Vec<IndexedSource> = Vec::new();
    for doc in &new_docs {
        let doc_passages = chunk_source(&doc.source_id, &doc.content_hash, &doc.content, size, overlap);
        tracing::debug!(source = %doc.source_id, passages = doc_passages.len(), "chunked");
        indexed.push(IndexedSource {
            content_hash: doc.content_hash.clone(),
            source: doc.source_id.clone(),
            passage_count: doc_passages.len(),
        });
        passages.extend(doc_passages);
    }

    if !passages.is_empty() {
        let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        let vectors = embed_all(embedder, &texts, config.embedding.batch_size)
            .await
            .context("Embedding failed; no sources were indexed")?;
        for (passage, vector) in passages.iter_mut().zip(vectors) {
            passage.embedding = vector;
        }
    }

    store
        .insert(&passages, &indexed)
        .await
        .context("Failed to write passages to the vector index")?;

    for doc in &mut new_docs {
        doc.state = ProcessingState::Processed;
    }
    report.sources_processed = new_docs.len();
    report.passages_added = passages.len();

    let archive_dir = config.sources.archive_path();
    let to_archive = new_docs
        .iter()
        .filter(|d| d.state == ProcessingState::Processed)
        .map(|d| d.path.clone())
        .chain(duplicates);
    for path in to_archive {
        match archive_file(&path, &archive_dir) {
            Ok(dest) => tracing::debug!(from = %path.display(), to = %dest.display(), "archived"),
            Err(e) => {
                tracing::warn!(source = %path.display(), error = %e, "failed to archive source");
                report
                    .archive_failures
                    .push((source_name(&path), format!("{:#}", e)));
            }
        }
    }

    tracing::info!(
        sources = report.sources_processed,
        passages = report.passages_added,
        duplicates = report.duplicates_skipped,
        failed = report.failed.len(),
        "ingestion finished"
    );
    Ok(report)
}

/// `ctxchat ingest`: run one pass with the configured embedder and print
/// the report.
pub async fn run_ingest(config: &Config, dry_run: bool) -> Result<()> {
    let store = VectorStore::open(&config.store.path).await?;
    let embedder = create_embedder(&config.embedding)?;
    let report = ingest(config, &store, embedder.as_ref(), dry_run).await?;
    print_report(&report, dry_run);
    store.close().await;
    Ok(())
}

pub fn print_report(report: &IngestionReport, dry_run: bool) {
    if dry_run {
        println!("ingest (dry-run)");
        println!("  sources found: {}", report.sources_found);
        println!("  new sources: {}", report.sources_processed);
        println!("  already indexed: {}", report.duplicates_skipped);
        println!("  estimated passages: {}", report.passages_added);
    } else {
        println!("ingest");
        println!("  sources found: {}", report.sources_found);
        println!("  sources indexed: {}", report.sources_processed);
        println!("  passages added: {}", report.passages_added);
        println!("  duplicates archived: {}", report.duplicates_skipped);
    }
    for (source, reason) in &report.failed {
        println!("  skipped {}: {}", source, reason);
    }
    for (source, reason) in &report.archive_failures {
        println!("  not archived {}: {}", source, reason);
    }
    if report.is_noop() {
        println!("  nothing new to ingest");
    }
    println!("ok");
}

/// Eligible files directly under the drop zone, sorted by path.
///
/// A missing root is created when `create` is set; otherwise it simply
/// yields no files.
pub fn discover_sources(sources: &SourcesConfig, create: bool) -> Result<Vec<PathBuf>> {
    let root = &sources.root;
    if !root.exists() {
        if create {
            std::fs::create_dir_all(root)
                .with_context(|| format!("Cannot create source directory: {}", root.display()))?;
        }
        return Ok(Vec::new());
    }

    let include = build_globset(&sources.include_globs)?;
    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "cannot list drop zone entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if include.is_match(entry.file_name().to_string_lossy().as_ref()) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid include glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Move `path` into `archive_dir`, never overwriting an archived file.
///
/// On a name clash the file gets a `-YYYYmmddHHMMSS` suffix before its
/// extension (and a counter if that is taken too).
pub fn archive_file(path: &Path, archive_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(archive_dir)
        .with_context(|| format!("Cannot create archive directory: {}", archive_dir.display()))?;

    let name = path
        .file_name()
        .with_context(|| format!("Not a file path: {}", path.display()))?;
    let mut dest = archive_dir.join(name);

    if dest.exists() {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let stamp = chrono::Local::now().format("%Y%m%d%H%M%S");
        dest = archive_dir.join(format!("{}-{}{}", stem, stamp, ext));
        let mut n = 1;
        while dest.exists() {
            dest = archive_dir.join(format!("{}-{}-{}{}", stem, stamp, n, ext));
            n += 1;
        }
    }

    std::fs::rename(path, &dest)
        .with_context(|| format!("Cannot move {} to {}", path.display(), dest.display()))?;
    Ok(dest)
}
