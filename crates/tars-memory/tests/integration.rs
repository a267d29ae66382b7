use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tars_core::{SearchMode, SearchResult, TarsError};
use tars_memory::chunker::ChunkOptions;
use tars_memory::embedding::EmbeddingProvider;
use tars_memory::indexer::{BuildStats, Indexer, IndexerConfig};
use tars_memory::search::{SearchEngine, SearchEngineConfig};
use tars_memory::source::{ContentSource, MemoryDirSource, VaultSource};
use tars_memory::store::MemoryIndex;

const VOCAB: [&str; 4] = ["dog", "perry", "python", "walks"];

/// Deterministic "semantic" vectors: one dimension per vocabulary word,
/// valued by how often the word occurs.
#[derive(Clone, Default)]
struct KeywordEmbedder {
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, texts: &[String], _model: &str) -> Result<Vec<Vec<f32>>, TarsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().extend(texts.iter().cloned());
        Ok(texts
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                VOCAB
                    .iter()
                    .map(|word| lower.matches(word).count() as f32)
                    .collect()
            })
            .collect())
    }
}

/// Knows the dimension but never returns vectors for content.
struct EmptyEmbedder;

#[async_trait]
impl EmbeddingProvider for EmptyEmbedder {
    async fn embed(&self, _texts: &[String], _model: &str) -> Result<Vec<Vec<f32>>, TarsError> {
        Ok(Vec::new())
    }

    async fn probe_dimension(&self, _model: &str) -> Result<usize, TarsError> {
        Ok(VOCAB.len())
    }
}

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

fn indexer(
    root: &Path,
    collection: &str,
    provider: impl EmbeddingProvider + 'static,
    source: impl ContentSource + 'static,
) -> Indexer {
    Indexer::new(
        IndexerConfig {
            db_path: root.join("index.db"),
            root: root.to_path_buf(),
            collection: collection.into(),
            chunking: ChunkOptions::default(),
        },
        Box::new(provider),
        Box::new(source),
    )
}

async fn build(root: &Path, model: &str) -> Result<BuildStats, TarsError> {
    indexer(root, "tars_memory", KeywordEmbedder::default(), MemoryDirSource)
        .build_index(model)
        .await
}

fn engine(db_path: &Path, provider: impl EmbeddingProvider + 'static) -> SearchEngine {
    SearchEngine::new(
        SearchEngineConfig {
            db_path: db_path.to_path_buf(),
            model: "test-model".into(),
            rrf_k: 60,
        },
        Box::new(provider),
    )
}

async fn search(root: &Path, query: &str, mode: SearchMode) -> Vec<SearchResult> {
    engine(&root.join("index.db"), KeywordEmbedder::default())
        .search(query, mode, 10, 0.0)
        .await
        .unwrap()
}

fn find<'a>(results: &'a [SearchResult], file: &str) -> Option<&'a SearchResult> {
    results.iter().find(|r| r.file_path.ends_with(file))
}

#[tokio::test]
async fn hybrid_search_rewards_double_matches() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(&root.join("a.md"), "My dog's name is Perry\n");
    write(&root.join("b.md"), "Discussed Perry the dog and walks.\n");
    write(&root.join("c.md"), "Python notes: nothing about pets.\n");

    let stats = indexer(root, "notes", KeywordEmbedder::default(), VaultSource)
        .build_index("test-model")
        .await
        .unwrap();
    assert_eq!(stats.indexed, 3);
    assert_eq!(stats.chunks, 3);

    let results = search(root, "Perry dog", SearchMode::Hybrid).await;
    let a = find(&results, "a.md").expect("A is returned");
    let b = find(&results, "b.md").expect("B is returned");
    let c = find(&results, "c.md").expect("C is a vector-only candidate");

    assert!(b.score >= c.score, "B {} vs C {}", b.score, c.score);
    assert!(a.score > c.score);
    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(results.iter().all(|r| r.score > 0.0 && r.score <= 1.0));
    assert_eq!(a.category.as_deref(), Some("note"));
    assert_eq!(a.file_title.as_deref(), Some("a"));
    assert_eq!((a.start_line, a.end_line), (1, 1));
}

#[tokio::test]
async fn single_list_modes_rank_their_own_signal() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(&root.join("a.md"), "My dog's name is Perry\n");
    write(&root.join("c.md"), "Python notes: nothing about pets.\n");
    indexer(root, "notes", KeywordEmbedder::default(), VaultSource)
        .build_index("test-model")
        .await
        .unwrap();

    let fts = search(root, "python", SearchMode::Fts).await;
    assert_eq!(fts.len(), 1);
    assert!(fts[0].file_path.ends_with("c.md"));
    assert!((fts[0].score - 1.0).abs() < 1e-12);

    let vec = search(root, "perry", SearchMode::Vec).await;
    assert_eq!(vec.len(), 2);
    assert!(vec[0].file_path.ends_with("a.md"));
    assert!((vec[0].score - 1.0).abs() < 1e-12);
}

#[tokio::test]
async fn min_score_and_limit_trim_results() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(&root.join("Memory.md"), "Perry the dog likes long walks.\n");
    write(&root.join("sessions/2024-01-01.md"), "Talked about Perry.\n");
    build(root, "test-model").await.unwrap();

    let engine = engine(&root.join("index.db"), KeywordEmbedder::default());
    let all = engine.search("Perry", SearchMode::Hybrid, 10, 0.0).await.unwrap();
    assert_eq!(all.len(), 2);

    let none = engine.search("Perry", SearchMode::Hybrid, 10, 1.01).await.unwrap();
    assert!(none.is_empty());

    let one = engine.search("Perry", SearchMode::Hybrid, 1, 0.0).await.unwrap();
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].chunk_id, all[0].chunk_id);

    assert!(engine
        .search("Perry", SearchMode::Hybrid, 0, 0.0)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn unchanged_files_are_skipped_and_edits_reindexed() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(&root.join("Memory.md"), "# Facts\n\nPerry is a dog.\n");
    write(&root.join("Procedural.md"), "# How\n\nWalk Perry at seven.\n");

    let first = build(root, "test-model").await.unwrap();
    assert_eq!(
        first,
        BuildStats {
            indexed: 2,
            skipped: 0,
            chunks: 2,
            deleted: 0
        }
    );
    let before = search(root, "perry", SearchMode::Fts).await;

    let second = build(root, "test-model").await.unwrap();
    assert_eq!(second.indexed, 0);
    assert_eq!(second.skipped, 2);
    let after = search(root, "perry", SearchMode::Fts).await;
    let ids = |rs: &[SearchResult]| {
        let mut ids: Vec<i64> = rs.iter().map(|r| r.chunk_id).collect();
        ids.sort_unstable();
        ids
    };
    assert_eq!(ids(&before), ids(&after), "skipped files keep their chunk rows");

    write(&root.join("Memory.md"), "# Facts\n\nPerry prefers python-shaped toys.\n");
    let third = build(root, "test-model").await.unwrap();
    assert_eq!(third.indexed, 1);
    assert_eq!(third.skipped, 1);

    assert_eq!(search(root, "prefers", SearchMode::Fts).await.len(), 1);
    assert!(search(root, "dog", SearchMode::Fts).await.is_empty());
    let index = MemoryIndex::open_existing(&root.join("index.db")).unwrap().unwrap();
    assert_eq!(index.chunk_count().unwrap(), 2);
}

#[tokio::test]
async fn deleted_files_leave_search_results() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(&root.join("Memory.md"), "Perry is a dog.\n");
    write(&root.join("sessions/2024-03-01.md"), "Python walks session.\n");
    build(root, "test-model").await.unwrap();
    assert_eq!(search(root, "python", SearchMode::Fts).await.len(), 1);

    std::fs::remove_file(root.join("sessions/2024-03-01.md")).unwrap();
    let stats = build(root, "test-model").await.unwrap();
    assert_eq!(stats.deleted, 1);
    assert_eq!(stats.skipped, 1);

    assert!(search(root, "python", SearchMode::Fts).await.is_empty());
    let vec = search(root, "python walks", SearchMode::Vec).await;
    assert!(vec.iter().all(|r| !r.file_path.contains("2024-03-01")));
    assert_eq!(vec.len(), 1);
}

#[tokio::test]
async fn model_change_forces_full_reindex() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(&root.join("Memory.md"), "Perry is a dog.\n");
    write(&root.join("Procedural.md"), "Walk Perry.\n");

    build(root, "model-a").await.unwrap();
    let same = build(root, "model-a").await.unwrap();
    assert_eq!(same.skipped, 2);

    let switched = build(root, "model-b").await.unwrap();
    assert_eq!(switched.indexed, 2);
    assert_eq!(switched.skipped, 0);
    assert_eq!(switched.chunks, 2);

    let index = MemoryIndex::open_existing(&root.join("index.db")).unwrap().unwrap();
    let stats = index.stats().unwrap();
    assert_eq!(stats.embedding_model.as_deref(), Some("model-b"));
    assert_eq!(stats.chunks, 2);
}

#[tokio::test]
async fn search_uses_the_model_recorded_in_the_index() {
    struct ModelRecorder(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl EmbeddingProvider for ModelRecorder {
        async fn embed(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>, TarsError> {
            self.0.lock().unwrap().push(model.to_string());
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0, 0.0]).collect())
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(&root.join("Memory.md"), "Perry is a dog.\n");
    build(root, "indexed-with").await.unwrap();

    let models = Arc::new(Mutex::new(Vec::new()));
    engine(&root.join("index.db"), ModelRecorder(models.clone()))
        .search("dog", SearchMode::Vec, 5, 0.0)
        .await
        .unwrap();
    assert_eq!(*models.lock().unwrap(), vec!["indexed-with".to_string()]);
}

#[tokio::test]
async fn provider_shortfall_leaves_file_for_retry() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(&root.join("Memory.md"), "Perry is a dog.\n");

    let err = indexer(root, "tars_memory", EmptyEmbedder, MemoryDirSource)
        .build_index("test-model")
        .await
        .unwrap_err();
    assert!(matches!(err, TarsError::Provider(_)), "{err}");

    let retry = build(root, "test-model").await.unwrap();
    assert_eq!(retry.indexed, 1);
    assert_eq!(retry.skipped, 0);
}

#[tokio::test]
async fn failed_reindex_keeps_previous_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(&root.join("Memory.md"), "Perry is a dog.\n");
    build(root, "test-model").await.unwrap();

    write(&root.join("Memory.md"), "Python replaced everything.\n");
    assert!(indexer(root, "tars_memory", EmptyEmbedder, MemoryDirSource)
        .build_index("test-model")
        .await
        .is_err());

    assert_eq!(search(root, "perry", SearchMode::Fts).await.len(), 1);
    assert!(search(root, "python", SearchMode::Fts).await.is_empty());

    let retry = build(root, "test-model").await.unwrap();
    assert_eq!(retry.indexed, 1);
    assert_eq!(search(root, "python", SearchMode::Fts).await.len(), 1);
}

#[tokio::test]
async fn embedder_sees_heading_context() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(
        &root.join("Memory.md"),
        "# Pets\n\n## Perry\n\nLikes walks.\n",
    );

    let embedder = KeywordEmbedder::default();
    let seen = embedder.seen.clone();
    indexer(root, "tars_memory", embedder, MemoryDirSource)
        .build_index("test-model")
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert!(
        seen.iter().any(|t| t.starts_with("Pets\n\n# Pets")),
        "{seen:?}"
    );

    let hits = search(root, "likes", SearchMode::Fts).await;
    assert!(hits[0].content.starts_with("# Pets"), "stored content stays raw");
}

#[tokio::test]
async fn missing_index_returns_empty_without_embedding() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = KeywordEmbedder::default();
    let calls = embedder.calls.clone();

    let results = engine(&dir.path().join("never-built.db"), embedder)
        .search("Perry", SearchMode::Hybrid, 5, 0.0)
        .await
        .unwrap();
    assert!(results.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!dir.path().join("never-built.db").exists());
}

#[tokio::test]
async fn empty_index_returns_empty() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("index.db");
    drop(MemoryIndex::open_or_create(&db, 4).unwrap());

    let results = engine(&db, KeywordEmbedder::default())
        .search("Perry", SearchMode::Hybrid, 5, 0.0)
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn empty_query_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir.path().join("index.db"), KeywordEmbedder::default());
    for query in ["", "   \n"] {
        let err = engine
            .search(query, SearchMode::Hybrid, 5, 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, TarsError::Validation(_)));
    }
}

#[tokio::test]
async fn query_vector_of_wrong_dimension_is_a_configuration_error() {
    struct Wide;

    #[async_trait]
    impl EmbeddingProvider for Wide {
        async fn embed(&self, texts: &[String], _model: &str) -> Result<Vec<Vec<f32>>, TarsError> {
            Ok(texts.iter().map(|_| vec![0.1; 8]).collect())
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(&root.join("Memory.md"), "Perry is a dog.\n");
    build(root, "test-model").await.unwrap();

    let err = engine(&root.join("index.db"), Wide)
        .search("perry", SearchMode::Hybrid, 5, 0.0)
        .await
        .unwrap_err();
    assert!(err.is_configuration(), "{err}");
}

#[tokio::test]
async fn notes_vault_builds_its_own_collection() {
    let dir = tempfile::tempdir().unwrap();
    let vault = dir.path();
    write(&vault.join("daily/2024-05-01.md"), "Bought python book for Perry.\n");
    write(&vault.join(".obsidian/cache.md"), "perry perry perry\n");

    let stats = indexer(vault, "notes", KeywordEmbedder::default(), VaultSource)
        .build_index("test-model")
        .await
        .unwrap();
    assert_eq!(stats.indexed, 1);

    let index = MemoryIndex::open_existing(&vault.join("index.db")).unwrap().unwrap();
    let collection = index.collection_id("notes").unwrap().expect("notes collection");
    assert_eq!(index.indexed_paths(collection).unwrap().len(), 1);
    assert!(index.collection_id("tars_memory").unwrap().is_none());

    let hits = search(vault, "python book", SearchMode::Hybrid).await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].category.as_deref(), Some("note"));
    assert_eq!(hits[0].file_title.as_deref(), Some("2024-05-01"));
}
