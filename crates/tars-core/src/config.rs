use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::TarsError;
use crate::types::SearchMode;

/// Top-level configuration loaded from `.tars.toml`.
///
/// Supports layered resolution: CLI flags > env vars > local config > defaults.
/// Only the binary consults the environment; library code receives this
/// struct (or pieces of it) explicitly.
///
/// # Examples
///
/// ```
/// use tars_core::TarsConfig;
///
/// let config = TarsConfig::default();
/// assert_eq!(config.chunking.target_tokens, 800);
/// assert_eq!(config.memory.collection, "tars_memory");
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TarsConfig {
    /// Memory directory (Memory.md, Procedural.md, sessions/).
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Personal notes vault.
    #[serde(default)]
    pub notes: NotesConfig,
    /// Embedding provider settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Chunk sizing.
    #[serde(default)]
    pub chunking: ChunkingConfig,
    /// Search defaults.
    #[serde(default)]
    pub search: SearchConfig,
}

impl TarsConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`TarsError::Io`] if the file cannot be read, or
    /// [`TarsError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tars_core::TarsConfig;
    /// use std::path::Path;
    ///
    /// let config = TarsConfig::from_file(Path::new(".tars.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, TarsError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`TarsError::Toml`] if parsing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use tars_core::TarsConfig;
    ///
    /// let toml = r#"
    /// [chunking]
    /// target_tokens = 400
    /// "#;
    /// let config = TarsConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.chunking.target_tokens, 400);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, TarsError> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }
}

/// Memory directory configuration.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use tars_core::MemoryConfig;
///
/// let config = MemoryConfig {
///     dir: Some(PathBuf::from("/home/me/memory")),
///     ..MemoryConfig::default()
/// };
/// assert_eq!(config.db_path(), Some(PathBuf::from("/home/me/memory/tars.db")));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Directory holding the memory files. Indexing is disabled when unset.
    pub dir: Option<PathBuf>,
    /// Index database file name, created inside `dir` (default: `tars.db`).
    #[serde(default = "default_memory_database")]
    pub database: String,
    /// Collection name inside the index (default: `tars_memory`).
    #[serde(default = "default_memory_collection")]
    pub collection: String,
}

fn default_memory_database() -> String {
    "tars.db".into()
}

fn default_memory_collection() -> String {
    "tars_memory".into()
}

impl MemoryConfig {
    /// Path of the index database, if a memory directory is configured.
    pub fn db_path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.join(&self.database))
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            dir: None,
            database: default_memory_database(),
            collection: default_memory_collection(),
        }
    }
}

/// Notes vault configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotesConfig {
    /// Vault root. Notes indexing is disabled when unset.
    pub dir: Option<PathBuf>,
    /// Index database file name, created inside `dir` (default: `notes.db`).
    #[serde(default = "default_notes_database")]
    pub database: String,
    /// Collection name inside the index (default: `notes`).
    #[serde(default = "default_notes_collection")]
    pub collection: String,
}

fn default_notes_database() -> String {
    "notes.db".into()
}

fn default_notes_collection() -> String {
    "notes".into()
}

impl NotesConfig {
    /// Path of the notes index database, if a vault is configured.
    pub fn db_path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.join(&self.database))
    }
}

impl Default for NotesConfig {
    fn default() -> Self {
        Self {
            dir: None,
            database: default_notes_database(),
            collection: default_notes_collection(),
        }
    }
}

/// Configuration for the embedding provider.
///
/// # Examples
///
/// ```
/// use tars_core::EmbeddingConfig;
///
/// let config = EmbeddingConfig::default();
/// assert_eq!(config.provider, "ollama");
/// assert_eq!(config.model, "qwen3-embedding:0.6b");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding provider (default: `"ollama"`).
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    /// Model name (default: `"qwen3-embedding:0.6b"`).
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Provider base URL (default: `"http://localhost:11434"`).
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    /// Per-request timeout in seconds (default: 120).
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

fn default_embedding_provider() -> String {
    "ollama".into()
}

fn default_embedding_model() -> String {
    "qwen3-embedding:0.6b".into()
}

fn default_embedding_base_url() -> String {
    "http://localhost:11434".into()
}

fn default_embedding_timeout() -> u64 {
    120
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            base_url: default_embedding_base_url(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

/// Chunk sizing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target chunk size in estimated tokens (default: 800).
    #[serde(default = "default_target_tokens")]
    pub target_tokens: usize,
    /// Fraction of each chunk repeated at the start of the next (default: 0.1).
    #[serde(default = "default_overlap_fraction")]
    pub overlap_fraction: f64,
}

fn default_target_tokens() -> usize {
    800
}

fn default_overlap_fraction() -> f64 {
    0.1
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: default_target_tokens(),
            overlap_fraction: default_overlap_fraction(),
        }
    }
}

/// Search defaults.
///
/// `min_score` applies to the fused RRF score, which lies in `[0, 1]` and
/// depends on the number of fused lists and on `rrf_k`. It is not a cosine
/// or BM25 threshold.
///
/// # Examples
///
/// ```
/// use tars_core::{SearchConfig, SearchMode};
///
/// let config = SearchConfig::default();
/// assert_eq!(config.mode, SearchMode::Hybrid);
/// assert_eq!(config.limit, 10);
/// assert_eq!(config.rrf_k, 60);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Retrieval mode (default: `hybrid`).
    #[serde(default)]
    pub mode: SearchMode,
    /// Maximum number of results (default: 10).
    #[serde(default = "default_search_limit")]
    pub limit: usize,
    /// Minimum fused score (default: 0.0).
    #[serde(default)]
    pub min_score: f64,
    /// RRF smoothing constant (default: 60).
    #[serde(default = "default_rrf_k")]
    pub rrf_k: usize,
}

fn default_search_limit() -> usize {
    10
}

fn default_rrf_k() -> usize {
    60
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            mode: SearchMode::default(),
            limit: default_search_limit(),
            min_score: 0.0,
            rrf_k: default_rrf_k(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = TarsConfig::default();
        assert!(config.memory.dir.is_none());
        assert_eq!(config.memory.database, "tars.db");
        assert_eq!(config.memory.collection, "tars_memory");
        assert!(config.notes.dir.is_none());
        assert_eq!(config.notes.database, "notes.db");
        assert_eq!(config.notes.collection, "notes");
        assert_eq!(config.embedding.provider, "ollama");
        assert_eq!(config.embedding.base_url, "http://localhost:11434");
        assert_eq!(config.embedding.timeout_secs, 120);
        assert_eq!(config.chunking.target_tokens, 800);
        assert!((config.chunking.overlap_fraction - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.search.mode, SearchMode::Hybrid);
        assert_eq!(config.search.min_score, 0.0);
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
[memory]
dir = "/data/memory"

[notes]
dir = "/data/vault"
collection = "vault"

[embedding]
model = "nomic-embed-text"
base_url = "http://gpu-box:11434"

[chunking]
target_tokens = 400
overlap_fraction = 0.2

[search]
mode = "fts"
limit = 3
min_score = 0.25
"#;
        let config = TarsConfig::from_toml(toml).unwrap();
        assert_eq!(config.memory.dir, Some(PathBuf::from("/data/memory")));
        assert_eq!(config.memory.database, "tars.db");
        assert_eq!(config.notes.collection, "vault");
        assert_eq!(config.notes.database, "notes.db");
        assert_eq!(config.embedding.model, "nomic-embed-text");
        assert_eq!(config.embedding.provider, "ollama");
        assert_eq!(config.chunking.target_tokens, 400);
        assert_eq!(config.search.mode, SearchMode::Fts);
        assert_eq!(config.search.limit, 3);
        assert_eq!(config.search.rrf_k, 60);
    }

    #[test]
    fn db_paths_follow_configured_dirs() {
        let mut config = TarsConfig::default();
        assert!(config.memory.db_path().is_none());
        assert!(config.notes.db_path().is_none());

        config.memory.dir = Some(PathBuf::from("/m"));
        config.notes.dir = Some(PathBuf::from("/n"));
        assert_eq!(config.memory.db_path(), Some(PathBuf::from("/m/tars.db")));
        assert_eq!(config.notes.db_path(), Some(PathBuf::from("/n/notes.db")));
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let config = TarsConfig::from_toml("").unwrap();
        assert_eq!(config.chunking.target_tokens, 800);
        assert_eq!(config.embedding.model, "qwen3-embedding:0.6b");
    }

    #[test]
    fn invalid_toml_returns_error() {
        let result = TarsConfig::from_toml("{{invalid}}");
        assert!(result.is_err());
    }

    #[test]
    fn unknown_search_mode_is_rejected() {
        let result = TarsConfig::from_toml("[search]\nmode = \"fuzzy\"\n");
        assert!(result.is_err());
    }
}
