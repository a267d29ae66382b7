//! SQLite + FTS5 storage for memory chunks and embeddings.
//!
//! Files and chunks live in plain tables; `chunks_fts` is an external-content
//! FTS5 mirror of `chunks.content` kept in sync by triggers, so a chunk and
//! its keyword entry always appear and disappear together. Embeddings are
//! little-endian `f32` BLOBs and nearest-neighbour search computes cosine
//! distance in Rust.

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use tars_core::{SearchResult, TarsError};
use tracing::{debug, info, warn};

use crate::chunker::Chunk;
use crate::search::sanitize_fts_query;

const MODEL_KEY: &str = "embedding_model";
const DIM_KEY: &str = "vec_dim";

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS collections (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT UNIQUE NOT NULL
    );

    CREATE TABLE IF NOT EXISTS files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        collection_id INTEGER NOT NULL REFERENCES collections(id),
        path TEXT NOT NULL,
        title TEXT,
        media_type TEXT NOT NULL DEFAULT 'text/markdown',
        category TEXT,
        content_hash TEXT NOT NULL,
        mtime REAL NOT NULL,
        size INTEGER NOT NULL,
        indexed_at TEXT NOT NULL,
        UNIQUE(collection_id, path)
    );

    CREATE TABLE IF NOT EXISTS chunks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        sequence INTEGER NOT NULL,
        content_hash TEXT NOT NULL,
        start_line INTEGER NOT NULL,
        end_line INTEGER NOT NULL,
        content TEXT NOT NULL,
        embedding BLOB NOT NULL,
        UNIQUE(file_id, sequence)
    );

    CREATE INDEX IF NOT EXISTS chunks_file_id ON chunks(file_id);

    CREATE TABLE IF NOT EXISTS metadata (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
        content,
        content='chunks', content_rowid='id',
        tokenize='porter unicode61'
    );

    CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
        INSERT INTO chunks_fts(rowid, content) VALUES (new.id, new.content);
    END;

    CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
        INSERT INTO chunks_fts(chunks_fts, rowid, content) VALUES ('delete', old.id, old.content);
    END;

    CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE ON chunks BEGIN
        INSERT INTO chunks_fts(chunks_fts, rowid, content) VALUES ('delete', old.id, old.content);
        INSERT INTO chunks_fts(rowid, content) VALUES (new.id, new.content);
    END;
";

/// Index statistics.
///
/// # Examples
///
/// ```
/// use tars_memory::store::MemoryIndex;
///
/// let index = MemoryIndex::in_memory(4).unwrap();
/// let stats = index.stats().unwrap();
/// assert_eq!(stats.chunks, 0);
/// assert_eq!(stats.embedding_dim, Some(4));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    /// Number of indexed files.
    pub files: usize,
    /// Number of stored chunks.
    pub chunks: usize,
    /// Model the stored vectors were produced by.
    pub embedding_model: Option<String>,
    /// Vector dimension of the index.
    pub embedding_dim: Option<usize>,
    /// Size of the database in bytes.
    pub db_size_bytes: u64,
}

/// File attributes written by [`IndexWriter::upsert_file`].
#[derive(Debug, Clone, PartialEq)]
pub struct FileMeta {
    /// Path as reported by the content source.
    pub path: String,
    /// Display title.
    pub title: Option<String>,
    /// MIME type of the source document.
    pub media_type: String,
    /// Category label (`semantic`, `procedural`, `episodic`, `note`).
    pub category: Option<String>,
    /// SHA-256 of the whole file content.
    pub content_hash: String,
    /// Modification time in seconds since the Unix epoch.
    pub mtime: f64,
    /// Size in bytes.
    pub size: u64,
}

/// A file row as stored in the index.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    pub id: i64,
    pub path: String,
    pub title: Option<String>,
    pub category: Option<String>,
    pub content_hash: String,
    pub mtime: f64,
    pub size: u64,
    pub indexed_at: String,
}

/// SQLite-backed chunk index with FTS5 keyword search and BLOB embeddings.
///
/// Reads go through `&self`; every mutation happens inside [`MemoryIndex::write`].
///
/// # Examples
///
/// ```
/// use tars_memory::store::MemoryIndex;
///
/// let mut index = MemoryIndex::in_memory(3).unwrap();
/// let collection = index.write(|w| w.ensure_collection("tars_memory")).unwrap();
/// assert!(index.indexed_paths(collection).unwrap().is_empty());
/// ```
pub struct MemoryIndex {
    conn: Connection,
    dimensions: Option<usize>,
}

impl MemoryIndex {
    /// Open or create an index at `path` for vectors of length `dimensions`.
    ///
    /// Creates the parent directory and schema as needed. A chunk table
    /// without its FTS mirror is backfilled. The recorded dimension is
    /// initialised on first use; corrupt dimension metadata is re-derived
    /// from stored vectors.
    ///
    /// # Errors
    ///
    /// Returns [`TarsError::DimensionMismatch`] if the index holds vectors of
    /// another length, or [`TarsError::Database`] if SQLite fails.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use tars_memory::store::MemoryIndex;
    ///
    /// let index = MemoryIndex::open_or_create(Path::new("memory/tars.db"), 1024).unwrap();
    /// ```
    pub fn open_or_create(path: &Path, dimensions: usize) -> Result<Self, TarsError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    TarsError::Database(format!("failed to create index directory: {e}"))
                })?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|e| TarsError::Database(format!("failed to open database: {e}")))?;
        Self::initialise(conn, dimensions)
    }

    /// Open an existing index without creating anything.
    ///
    /// Returns `None` when the file does not exist or holds no chunk table.
    ///
    /// # Errors
    ///
    /// Returns [`TarsError::Database`] if the file exists but cannot be read.
    pub fn open_existing(path: &Path) -> Result<Option<Self>, TarsError> {
        if !path.is_file() {
            return Ok(None);
        }
        let conn = connect_existing(path)?;
        if !table_exists(&conn, "chunks")? {
            return Ok(None);
        }
        let dimensions = stored_dimensions(&conn)?;
        Ok(Some(Self { conn, dimensions }))
    }

    /// Create an in-memory index (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`TarsError::Database`] if schema creation fails.
    pub fn in_memory(dimensions: usize) -> Result<Self, TarsError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            TarsError::Database(format!("failed to create in-memory database: {e}"))
        })?;
        Self::initialise(conn, dimensions)
    }

    /// Invalidate stored vectors if they were produced by another model.
    ///
    /// Call before [`MemoryIndex::open_or_create`] with the model about to be
    /// used. When the recorded model differs, or vectors exist without a
    /// recorded model, every chunk (and its FTS entry) is removed, every file
    /// hash is blanked so the next build re-embeds it, and the recorded
    /// dimension is cleared. Returns whether vectors were invalidated.
    ///
    /// # Errors
    ///
    /// Returns [`TarsError::Database`] if SQLite fails.
    pub fn prepare_model(path: &Path, model: &str) -> Result<bool, TarsError> {
        if !path.is_file() {
            return Ok(false);
        }
        let mut conn = connect_existing(path)?;
        ensure_schema(&conn)?;

        let stored_model = get_metadata(&conn, MODEL_KEY)?;
        let chunks = count_rows(&conn, "chunks")?;
        let stale = match stored_model.as_deref() {
            Some(stored) => stored != model,
            None => chunks > 0,
        };
        if !stale {
            if stored_model.is_none() {
                delete_metadata(&conn, DIM_KEY)?;
            }
            return Ok(false);
        }

        let tx = conn
            .transaction()
            .map_err(|e| TarsError::Database(format!("failed to begin transaction: {e}")))?;
        tx.execute("DELETE FROM chunks", [])
            .map_err(|e| TarsError::Database(format!("failed to purge chunks: {e}")))?;
        tx.execute("UPDATE files SET content_hash = ''", [])
            .map_err(|e| TarsError::Database(format!("failed to reset file hashes: {e}")))?;
        delete_metadata(&tx, DIM_KEY)?;
        tx.commit()
            .map_err(|e| TarsError::Database(format!("failed to commit purge: {e}")))?;

        info!(
            from = stored_model.as_deref().unwrap_or("unknown"),
            to = model,
            chunks,
            "embedding model changed, purged stored vectors"
        );
        Ok(true)
    }

    fn initialise(conn: Connection, dimensions: usize) -> Result<Self, TarsError> {
        ensure_schema(&conn)?;

        let actual = match stored_dimensions(&conn)? {
            Some(stored) => stored,
            None => {
                let derived = derived_dimensions(&conn)?;
                let actual = derived.unwrap_or(dimensions);
                set_metadata(&conn, DIM_KEY, &actual.to_string())?;
                actual
            }
        };
        if actual != dimensions {
            return Err(TarsError::DimensionMismatch {
                stored: actual,
                requested: dimensions,
            });
        }

        Ok(Self {
            conn,
            dimensions: Some(actual),
        })
    }

    /// Run `f` inside a transaction: committed if it returns `Ok`, rolled
    /// back otherwise.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns, or [`TarsError::Database`] if the
    /// transaction cannot begin or commit.
    pub fn write<T>(
        &mut self,
        f: impl FnOnce(&IndexWriter<'_>) -> Result<T, TarsError>,
    ) -> Result<T, TarsError> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| TarsError::Database(format!("failed to begin transaction: {e}")))?;
        let value = {
            let writer = IndexWriter {
                conn: &tx,
                dimensions: self.dimensions,
            };
            f(&writer)?
        };
        tx.commit()
            .map_err(|e| TarsError::Database(format!("failed to commit transaction: {e}")))?;
        Ok(value)
    }

    /// Vector length of the index, if initialised.
    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    /// Model recorded as the producer of the stored vectors.
    ///
    /// # Errors
    ///
    /// Returns [`TarsError::Database`] on query failure.
    pub fn embedding_model(&self) -> Result<Option<String>, TarsError> {
        get_metadata(&self.conn, MODEL_KEY)
    }

    /// Look up a collection id by name.
    ///
    /// # Errors
    ///
    /// Returns [`TarsError::Database`] on query failure.
    pub fn collection_id(&self, name: &str) -> Result<Option<i64>, TarsError> {
        self.conn
            .query_row(
                "SELECT id FROM collections WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| TarsError::Database(format!("failed to look up collection: {e}")))
    }

    /// Look up a file by collection and path.
    ///
    /// # Errors
    ///
    /// Returns [`TarsError::Database`] on query failure.
    pub fn get_file(&self, collection_id: i64, path: &str) -> Result<Option<StoredFile>, TarsError> {
        get_file(&self.conn, collection_id, path)
    }

    /// Map of path to file id for every file in a collection.
    ///
    /// # Errors
    ///
    /// Returns [`TarsError::Database`] on query failure.
    pub fn indexed_paths(&self, collection_id: i64) -> Result<BTreeMap<String, i64>, TarsError> {
        let mut stmt = self
            .conn
            .prepare("SELECT path, id FROM files WHERE collection_id = ?1")
            .map_err(|e| TarsError::Database(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map(params![collection_id], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| TarsError::Database(format!("failed to query files: {e}")))?;

        let mut paths = BTreeMap::new();
        for row in rows {
            let (path, id): (String, i64) =
                row.map_err(|e| TarsError::Database(format!("failed to read row: {e}")))?;
            paths.insert(path, id);
        }
        Ok(paths)
    }

    /// Number of stored chunks.
    ///
    /// # Errors
    ///
    /// Returns [`TarsError::Database`] on query failure.
    pub fn chunk_count(&self) -> Result<usize, TarsError> {
        count_rows(&self.conn, "chunks")
    }

    /// Nearest chunks to `query` by cosine distance, closest first.
    ///
    /// # Errors
    ///
    /// Returns [`TarsError::DimensionMismatch`] if `query` does not match the
    /// index dimension, or [`TarsError::Database`] on query failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use tars_memory::store::MemoryIndex;
    ///
    /// let index = MemoryIndex::in_memory(2).unwrap();
    /// assert!(index.vector_search(&[0.1, 0.2], 5).unwrap().is_empty());
    /// assert!(index.vector_search(&[0.1, 0.2, 0.3], 5).is_err());
    /// ```
    pub fn vector_search(&self, query: &[f32], limit: usize) -> Result<Vec<i64>, TarsError> {
        if let Some(stored) = self.dimensions {
            if query.len() != stored {
                return Err(TarsError::DimensionMismatch {
                    stored,
                    requested: query.len(),
                });
            }
        }

        let mut stmt = self
            .conn
            .prepare("SELECT id, embedding FROM chunks ORDER BY id")
            .map_err(|e| TarsError::Database(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                let id: i64 = row.get(0)?;
                let bytes: Vec<u8> = row.get(1)?;
                Ok((id, cosine_distance(query, &bytes_to_floats(&bytes))))
            })
            .map_err(|e| TarsError::Database(format!("failed to query chunks: {e}")))?;

        let mut scored: Vec<(i64, f64)> = Vec::new();
        for row in rows {
            scored.push(row.map_err(|e| TarsError::Database(format!("failed to read row: {e}")))?);
        }

        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored.into_iter().map(|(id, _)| id).collect())
    }

    /// Chunk ids matching every term of `query`, best FTS rank first.
    ///
    /// Returns an empty list if the FTS table is absent or the query has no
    /// terms.
    ///
    /// # Errors
    ///
    /// Returns [`TarsError::Database`] on query failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use tars_memory::store::MemoryIndex;
    ///
    /// let index = MemoryIndex::in_memory(2).unwrap();
    /// assert!(index.keyword_search("perry", 5).unwrap().is_empty());
    /// ```
    pub fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<i64>, TarsError> {
        if !table_exists(&self.conn, "chunks_fts")? {
            return Ok(Vec::new());
        }
        let safe_query = sanitize_fts_query(query);
        if safe_query.is_empty() {
            return Ok(Vec::new());
        }

        let mut stmt = self
            .conn
            .prepare(
                "SELECT rowid FROM chunks_fts
                 WHERE chunks_fts MATCH ?1
                 ORDER BY rank
                 LIMIT ?2",
            )
            .map_err(|e| TarsError::Database(format!("failed to prepare FTS query: {e}")))?;
        let rows = stmt
            .query_map(params![safe_query, limit as i64], |row| row.get(0))
            .map_err(|e| TarsError::Database(format!("FTS query failed: {e}")))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row.map_err(|e| TarsError::Database(format!("failed to read FTS row: {e}")))?);
        }
        Ok(ids)
    }

    /// Attach file and line metadata to scored chunk ids, keeping their order.
    ///
    /// Ids that no longer exist are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`TarsError::Database`] on query failure.
    pub fn hydrate(&self, scored: &[(i64, f64)]) -> Result<Vec<SearchResult>, TarsError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT c.content, c.start_line, c.end_line, f.path, f.title, f.category
                 FROM chunks c
                 JOIN files f ON f.id = c.file_id
                 WHERE c.id = ?1",
            )
            .map_err(|e| TarsError::Database(format!("failed to prepare query: {e}")))?;

        let mut results = Vec::with_capacity(scored.len());
        for &(chunk_id, score) in scored {
            let hit = stmt
                .query_row(params![chunk_id], |row| {
                    Ok(SearchResult {
                        content: row.get(0)?,
                        score,
                        start_line: row.get(1)?,
                        end_line: row.get(2)?,
                        file_path: row.get(3)?,
                        file_title: row.get(4)?,
                        category: row.get(5)?,
                        chunk_id,
                    })
                })
                .optional()
                .map_err(|e| TarsError::Database(format!("failed to hydrate chunk: {e}")))?;
            match hit {
                Some(hit) => results.push(hit),
                None => debug!(chunk_id, "chunk vanished before hydration"),
            }
        }
        Ok(results)
    }

    /// Get index statistics.
    ///
    /// # Errors
    ///
    /// Returns [`TarsError::Database`] on query failure.
    pub fn stats(&self) -> Result<IndexStats, TarsError> {
        let files = count_rows(&self.conn, "files")?;
        let chunks = count_rows(&self.conn, "chunks")?;

        let page_count: i64 = self
            .conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))
            .unwrap_or(0);
        let page_size: i64 = self
            .conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))
            .unwrap_or(4096);

        Ok(IndexStats {
            files,
            chunks,
            embedding_model: self.embedding_model()?,
            embedding_dim: self.dimensions,
            db_size_bytes: (page_count * page_size) as u64,
        })
    }
}

/// Mutating view of a [`MemoryIndex`], valid for one transaction.
pub struct IndexWriter<'a> {
    conn: &'a Connection,
    dimensions: Option<usize>,
}

impl IndexWriter<'_> {
    /// Get or create a collection by name.
    ///
    /// # Errors
    ///
    /// Returns [`TarsError::Database`] on failure.
    pub fn ensure_collection(&self, name: &str) -> Result<i64, TarsError> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO collections (name) VALUES (?1)",
                params![name],
            )
            .map_err(|e| TarsError::Database(format!("failed to create collection: {e}")))?;
        self.conn
            .query_row(
                "SELECT id FROM collections WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .map_err(|e| TarsError::Database(format!("failed to look up collection: {e}")))
    }

    /// Record the model that produced the stored vectors.
    ///
    /// # Errors
    ///
    /// Returns [`TarsError::Database`] on failure.
    pub fn set_embedding_model(&self, model: &str) -> Result<(), TarsError> {
        set_metadata(self.conn, MODEL_KEY, model)
    }

    /// Insert or update a file row. Returns `(file_id, changed)`; an
    /// unchanged content hash leaves the row untouched.
    ///
    /// # Errors
    ///
    /// Returns [`TarsError::Database`] on failure.
    pub fn upsert_file(&self, collection_id: i64, meta: &FileMeta) -> Result<(i64, bool), TarsError> {
        let indexed_at = chrono::Utc::now().to_rfc3339();

        if let Some(existing) = get_file(self.conn, collection_id, &meta.path)? {
            if existing.content_hash == meta.content_hash {
                return Ok((existing.id, false));
            }
            self.conn
                .execute(
                    "UPDATE files
                     SET title = ?1, media_type = ?2, category = ?3, content_hash = ?4,
                         mtime = ?5, size = ?6, indexed_at = ?7
                     WHERE id = ?8",
                    params![
                        meta.title,
                        meta.media_type,
                        meta.category,
                        meta.content_hash,
                        meta.mtime,
                        meta.size as i64,
                        indexed_at,
                        existing.id
                    ],
                )
                .map_err(|e| TarsError::Database(format!("failed to update file: {e}")))?;
            return Ok((existing.id, true));
        }

        self.conn
            .execute(
                "INSERT INTO files
                 (collection_id, path, title, media_type, category, content_hash, mtime, size, indexed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    collection_id,
                    meta.path,
                    meta.title,
                    meta.media_type,
                    meta.category,
                    meta.content_hash,
                    meta.mtime,
                    meta.size as i64,
                    indexed_at
                ],
            )
            .map_err(|e| TarsError::Database(format!("failed to record file: {e}")))?;
        Ok((self.conn.last_insert_rowid(), true))
    }

    /// Remove every chunk (and FTS entry) of a file.
    ///
    /// # Errors
    ///
    /// Returns [`TarsError::Database`] on failure.
    pub fn delete_chunks_for_file(&self, file_id: i64) -> Result<usize, TarsError> {
        self.conn
            .execute("DELETE FROM chunks WHERE file_id = ?1", params![file_id])
            .map_err(|e| TarsError::Database(format!("failed to delete chunks: {e}")))
    }

    /// Remove a file row together with its chunks.
    ///
    /// # Errors
    ///
    /// Returns [`TarsError::Database`] on failure.
    pub fn delete_file(&self, file_id: i64) -> Result<(), TarsError> {
        self.delete_chunks_for_file(file_id)?;
        self.conn
            .execute("DELETE FROM files WHERE id = ?1", params![file_id])
            .map_err(|e| TarsError::Database(format!("failed to delete file record: {e}")))?;
        Ok(())
    }

    /// Store chunks with their vectors. Only the first
    /// `min(chunks.len(), embeddings.len())` pairs are written; returns that
    /// count.
    ///
    /// # Errors
    ///
    /// Returns [`TarsError::DimensionMismatch`] if a vector's length differs
    /// from the index dimension (nothing is padded or truncated), or
    /// [`TarsError::Database`] on insert failure.
    pub fn insert_chunks(
        &self,
        file_id: i64,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<usize, TarsError> {
        let Some(stored) = self.dimensions else {
            return Err(TarsError::Config(
                "index dimension is not initialised".into(),
            ));
        };

        let mut stmt = self
            .conn
            .prepare(
                "INSERT INTO chunks
                 (file_id, sequence, content_hash, start_line, end_line, content, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .map_err(|e| TarsError::Database(format!("failed to prepare insert: {e}")))?;

        let mut written = 0;
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            if embedding.len() != stored {
                return Err(TarsError::DimensionMismatch {
                    stored,
                    requested: embedding.len(),
                });
            }
            stmt.execute(params![
                file_id,
                chunk.sequence,
                chunk.content_hash,
                chunk.start_line,
                chunk.end_line,
                chunk.content,
                floats_to_bytes(embedding)
            ])
            .map_err(|e| TarsError::Database(format!("failed to insert chunk: {e}")))?;
            written += 1;
        }
        Ok(written)
    }
}

fn connect_existing(path: &Path) -> Result<Connection, TarsError> {
    let flags = OpenFlags::default().difference(OpenFlags::SQLITE_OPEN_CREATE);
    let conn = Connection::open_with_flags(path, flags)
        .map_err(|e| TarsError::Database(format!("failed to open database: {e}")))?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")
        .map_err(|e| TarsError::Database(format!("failed to configure database: {e}")))?;
    Ok(conn)
}

fn ensure_schema(conn: &Connection) -> Result<(), TarsError> {
    let _mode: String = conn
        .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
        .map_err(|e| TarsError::Database(format!("failed to enable WAL: {e}")))?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")
        .map_err(|e| TarsError::Database(format!("failed to configure database: {e}")))?;

    let had_chunks = table_exists(conn, "chunks")?;
    let had_fts = table_exists(conn, "chunks_fts")?;

    conn.execute_batch(SCHEMA_SQL)
        .map_err(|e| TarsError::Database(format!("failed to create schema: {e}")))?;

    if had_chunks && !had_fts && count_rows(conn, "chunks")? > 0 {
        conn.execute("INSERT INTO chunks_fts(chunks_fts) VALUES ('rebuild')", [])
            .map_err(|e| TarsError::Database(format!("failed to backfill FTS index: {e}")))?;
        info!("rebuilt missing full-text index from stored chunks");
    }
    Ok(())
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool, TarsError> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )
        .map_err(|e| TarsError::Database(format!("failed to inspect schema: {e}")))?;
    Ok(count > 0)
}

fn count_rows(conn: &Connection, table: &str) -> Result<usize, TarsError> {
    let count: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .map_err(|e| TarsError::Database(format!("failed to count {table}: {e}")))?;
    Ok(count as usize)
}

fn get_file(conn: &Connection, collection_id: i64, path: &str) -> Result<Option<StoredFile>, TarsError> {
    conn.query_row(
        "SELECT id, path, title, category, content_hash, mtime, size, indexed_at
         FROM files WHERE collection_id = ?1 AND path = ?2",
        params![collection_id, path],
        |row| {
            Ok(StoredFile {
                id: row.get(0)?,
                path: row.get(1)?,
                title: row.get(2)?,
                category: row.get(3)?,
                content_hash: row.get(4)?,
                mtime: row.get(5)?,
                size: row.get::<_, i64>(6)? as u64,
                indexed_at: row.get(7)?,
            })
        },
    )
    .optional()
    .map_err(|e| TarsError::Database(format!("failed to look up file: {e}")))
}

fn get_metadata(conn: &Connection, key: &str) -> Result<Option<String>, TarsError> {
    conn.query_row(
        "SELECT value FROM metadata WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| TarsError::Database(format!("failed to get metadata '{key}': {e}")))
}

fn set_metadata(conn: &Connection, key: &str, value: &str) -> Result<(), TarsError> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        params![key, value],
    )
    .map_err(|e| TarsError::Database(format!("failed to set metadata '{key}': {e}")))?;
    Ok(())
}

fn delete_metadata(conn: &Connection, key: &str) -> Result<(), TarsError> {
    conn.execute("DELETE FROM metadata WHERE key = ?1", params![key])
        .map_err(|e| TarsError::Database(format!("failed to clear metadata '{key}': {e}")))?;
    Ok(())
}

/// Recorded dimension; unparseable values are logged and ignored.
fn stored_dimensions(conn: &Connection) -> Result<Option<usize>, TarsError> {
    let Some(value) = get_metadata(conn, DIM_KEY)? else {
        return Ok(None);
    };
    match value.parse::<usize>() {
        Ok(dims) if dims > 0 => Ok(Some(dims)),
        _ => {
            warn!(value = %value, "ignoring corrupt vector dimension metadata");
            Ok(None)
        }
    }
}

/// Dimension implied by the first stored vector, if any.
fn derived_dimensions(conn: &Connection) -> Result<Option<usize>, TarsError> {
    let bytes: Option<i64> = conn
        .query_row("SELECT length(embedding) FROM chunks LIMIT 1", [], |row| row.get(0))
        .optional()
        .map_err(|e| TarsError::Database(format!("failed to inspect stored vectors: {e}")))?;
    Ok(bytes.map(|len| len as usize / 4).filter(|dims| *dims > 0))
}

fn floats_to_bytes(floats: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(floats.len() * 4);
    for f in floats {
        bytes.extend_from_slice(&f.to_le_bytes());
    }
    bytes
}

fn bytes_to_floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }

    dot / denom
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    1.0 - cosine_similarity(a, b)
}
