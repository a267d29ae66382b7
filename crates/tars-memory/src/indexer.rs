//! Incremental index builds.
//!
//! A build enumerates a content root, skips files whose content hash is
//! already recorded, and re-chunks and re-embeds the rest. Each changed file
//! is written in its own transaction after its embeddings are in hand, so a
//! failure leaves that file and every earlier one exactly as they were.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tars_core::TarsError;
use tracing::{debug, info};

use crate::chunker::{chunk_markdown, content_hash, ChunkOptions};
use crate::embedding::EmbeddingProvider;
use crate::source::{ContentSource, SourceEntry};
use crate::store::{FileMeta, MemoryIndex};

const MEDIA_TYPE: &str = "text/markdown";

/// Where and how to build an index.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Index database file.
    pub db_path: PathBuf,
    /// Content root handed to the source.
    pub root: PathBuf,
    /// Collection the files belong to.
    pub collection: String,
    /// Chunk sizing.
    pub chunking: ChunkOptions,
}

/// Outcome of a build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStats {
    /// Files chunked and embedded this run.
    pub indexed: usize,
    /// Files whose content hash was unchanged.
    pub skipped: usize,
    /// Chunks written this run.
    pub chunks: usize,
    /// Files removed because they disappeared from the source.
    pub deleted: usize,
}

/// Builds and refreshes an index from a content source.
///
/// # Examples
///
/// ```no_run
/// use std::path::PathBuf;
/// use tars_memory::chunker::ChunkOptions;
/// use tars_memory::embedding::OllamaClient;
/// use tars_memory::indexer::{Indexer, IndexerConfig};
/// use tars_memory::source::MemoryDirSource;
///
/// # async fn example() {
/// let config = IndexerConfig {
///     db_path: PathBuf::from("memory/tars.db"),
///     root: PathBuf::from("memory"),
///     collection: "tars_memory".into(),
///     chunking: ChunkOptions::default(),
/// };
/// let provider = OllamaClient::new("http://localhost:11434").unwrap();
/// let indexer = Indexer::new(config, Box::new(provider), Box::new(MemoryDirSource));
/// let stats = indexer.build_index("qwen3-embedding:0.6b").await.unwrap();
/// println!("indexed {} files", stats.indexed);
/// # }
/// ```
pub struct Indexer {
    config: IndexerConfig,
    provider: Box<dyn EmbeddingProvider>,
    source: Box<dyn ContentSource>,
}

impl Indexer {
    /// Create an indexer.
    pub fn new(
        config: IndexerConfig,
        provider: Box<dyn EmbeddingProvider>,
        source: Box<dyn ContentSource>,
    ) -> Self {
        Self {
            config,
            provider,
            source,
        }
    }

    /// Bring the index up to date with the content root using `model`.
    ///
    /// A missing root returns zero stats without touching the database.
    /// Switching models invalidates every stored vector first, so the run
    /// re-embeds all files.
    ///
    /// # Errors
    ///
    /// Returns [`TarsError::Provider`] if embedding fails or returns a
    /// different number of vectors than chunks,
    /// [`TarsError::DimensionMismatch`] if the index was built with vectors
    /// of another length, [`TarsError::Validation`] for invalid chunk
    /// options, or [`TarsError::Database`] / [`TarsError::Io`] on storage
    /// failures. Files committed before the error stay committed.
    pub async fn build_index(&self, model: &str) -> Result<BuildStats, TarsError> {
        let mut stats = BuildStats::default();
        let root = &self.config.root;
        if !root.is_dir() {
            info!(root = %root.display(), "content root missing, nothing to index");
            return Ok(stats);
        }
        self.config.chunking.validate()?;

        let dimensions = self.provider.probe_dimension(model).await?;
        MemoryIndex::prepare_model(&self.config.db_path, model)?;
        let mut index = MemoryIndex::open_or_create(&self.config.db_path, dimensions)?;

        let collection = &self.config.collection;
        let collection_id = index.write(|w| {
            w.set_embedding_model(model)?;
            w.ensure_collection(collection)
        })?;

        let entries = self.source.enumerate(root)?;
        let discovered: HashSet<String> = entries.iter().map(|e| path_key(&e.path)).collect();

        for (path, file_id) in index.indexed_paths(collection_id)? {
            if !discovered.contains(&path) {
                index.write(|w| w.delete_file(file_id))?;
                info!(path = %path, "removed deleted file from index");
                stats.deleted += 1;
            }
        }

        for entry in &entries {
            match self.index_file(&mut index, collection_id, entry, model).await? {
                Some(chunks) => {
                    stats.indexed += 1;
                    stats.chunks += chunks;
                }
                None => stats.skipped += 1,
            }
        }

        info!(
            collection = %collection,
            indexed = stats.indexed,
            skipped = stats.skipped,
            chunks = stats.chunks,
            deleted = stats.deleted,
            "index build finished"
        );
        Ok(stats)
    }

    /// Returns the number of chunks written, or `None` if the file was
    /// unchanged.
    async fn index_file(
        &self,
        index: &mut MemoryIndex,
        collection_id: i64,
        entry: &SourceEntry,
        model: &str,
    ) -> Result<Option<usize>, TarsError> {
        let path = path_key(&entry.path);
        let content = self.source.read_text(&entry.path)?;
        let hash = content_hash(&content);

        if let Some(stored) = index.get_file(collection_id, &path)? {
            if stored.content_hash == hash {
                debug!(path = %path, "unchanged, skipping");
                return Ok(None);
            }
        }

        let stat = self.source.stat(&entry.path)?;
        let chunks = chunk_markdown(&content, &self.config.chunking)?;
        let embeddings = if chunks.is_empty() {
            Vec::new()
        } else {
            let texts: Vec<String> = chunks.iter().map(|c| c.embedding_text()).collect();
            self.provider.embed(&texts, model).await?
        };
        if embeddings.len() != chunks.len() {
            return Err(TarsError::Provider(format!(
                "embedding count mismatch for {path}: got {} embeddings for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }

        let meta = FileMeta {
            path: path.clone(),
            title: file_title(&entry.path),
            media_type: MEDIA_TYPE.to_string(),
            category: Some(entry.category.clone()),
            content_hash: hash,
            mtime: stat.mtime,
            size: stat.size,
        };
        let written = index.write(|w| {
            let (file_id, _) = w.upsert_file(collection_id, &meta)?;
            w.delete_chunks_for_file(file_id)?;
            w.insert_chunks(file_id, &chunks, &embeddings)
        })?;

        debug!(path = %path, chunks = written, "indexed file");
        Ok(Some(written))
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn file_title(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().into_owned())
}
