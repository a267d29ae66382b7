//! Content sources: where indexable markdown comes from.
//!
//! A [`ContentSource`] enumerates documents under a root and labels each
//! with a category. [`MemoryDirSource`] knows the fixed layout of the
//! assistant's memory directory; [`VaultSource`] walks a notes vault.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tars_core::TarsError;
use tracing::{debug, warn};

/// Category of the long-lived facts file.
pub const SEMANTIC: &str = "semantic";
/// Category of the how-to file.
pub const PROCEDURAL: &str = "procedural";
/// Category of per-session logs.
pub const EPISODIC: &str = "episodic";
/// Category of notes vault documents.
pub const NOTE: &str = "note";

/// A document discovered under a content root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    /// Path of the document.
    pub path: PathBuf,
    /// Category label stored with the file.
    pub category: String,
}

/// Filesystem attributes recorded with each indexed file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileStat {
    /// Modification time in seconds since the Unix epoch.
    pub mtime: f64,
    /// Size in bytes.
    pub size: u64,
}

/// Enumerates and reads indexable documents.
///
/// `read_text` and `stat` default to the local filesystem.
pub trait ContentSource: Send + Sync {
    /// Documents under `root`, in a stable order. A missing root yields none.
    fn enumerate(&self, root: &Path) -> Result<Vec<SourceEntry>, TarsError>;

    /// Document text; invalid UTF-8 is replaced rather than rejected.
    fn read_text(&self, path: &Path) -> Result<String, TarsError> {
        let bytes = std::fs::read(path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Modification time and size.
    fn stat(&self, path: &Path) -> Result<FileStat, TarsError> {
        let metadata = std::fs::metadata(path)?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0.0, |d| d.as_secs_f64());
        Ok(FileStat {
            mtime,
            size: metadata.len(),
        })
    }
}

/// The assistant's memory directory.
///
/// `Memory.md` is semantic memory, `Procedural.md` procedural memory and
/// every `sessions/*.md` log (sorted by name) episodic memory.
///
/// # Examples
///
/// ```
/// use tars_memory::source::{ContentSource, MemoryDirSource};
///
/// let dir = tempfile::tempdir().unwrap();
/// std::fs::write(dir.path().join("Memory.md"), "# Facts\n").unwrap();
/// let entries = MemoryDirSource.enumerate(dir.path()).unwrap();
/// assert_eq!(entries.len(), 1);
/// assert_eq!(entries[0].category, "semantic");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryDirSource;

const MEMORY_FILES: [(&str, &str); 2] = [(SEMANTIC, "Memory.md"), (PROCEDURAL, "Procedural.md")];

impl ContentSource for MemoryDirSource {
    fn enumerate(&self, root: &Path) -> Result<Vec<SourceEntry>, TarsError> {
        if !root.is_dir() {
            warn!(root = %root.display(), "memory directory does not exist");
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for (category, name) in MEMORY_FILES {
            let path = root.join(name);
            if path.is_file() {
                found.push(SourceEntry {
                    path,
                    category: category.to_string(),
                });
            }
        }

        let sessions = root.join("sessions");
        if sessions.is_dir() {
            let mut logs: Vec<PathBuf> = std::fs::read_dir(&sessions)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_markdown(p))
                .collect();
            logs.sort();
            found.extend(logs.into_iter().map(|path| SourceEntry {
                path,
                category: EPISODIC.to_string(),
            }));
        }

        debug!(root = %root.display(), files = found.len(), "enumerated memory directory");
        Ok(found)
    }
}

/// A personal notes vault: every markdown file below the root.
///
/// Hidden directories (`.obsidian`, `.trash`, ...) are skipped and
/// `.gitignore` rules are honoured.
#[derive(Debug, Clone, Copy, Default)]
pub struct VaultSource;

impl ContentSource for VaultSource {
    fn enumerate(&self, root: &Path) -> Result<Vec<SourceEntry>, TarsError> {
        if !root.is_dir() {
            warn!(root = %root.display(), "notes vault does not exist");
            return Ok(Vec::new());
        }

        let walker = ignore::WalkBuilder::new(root).hidden(true).build();
        let mut paths = Vec::new();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!(error = %e, "skipping unreadable vault entry");
                    continue;
                }
            };

            let Some(file_type) = entry.file_type() else {
                continue;
            };
            if !file_type.is_file() || !is_markdown(entry.path()) {
                continue;
            }
            paths.push(entry.into_path());
        }

        paths.sort();
        debug!(root = %root.display(), files = paths.len(), "enumerated notes vault");
        Ok(paths
            .into_iter()
            .map(|path| SourceEntry {
                path,
                category: NOTE.to_string(),
            })
            .collect())
    }
}

fn is_markdown(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("md")
}
