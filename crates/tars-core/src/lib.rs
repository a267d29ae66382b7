//! Core types, configuration, and error handling for tars.
//!
//! This crate provides the shared foundation used by the other tars crates:
//! - [`TarsError`]: unified error type using `thiserror`
//! - [`TarsConfig`]: configuration loaded from `.tars.toml`
//! - Shared types: [`SearchMode`], [`SearchResult`], [`OutputFormat`]

mod config;
mod error;
mod types;

pub use config::{
    ChunkingConfig, EmbeddingConfig, MemoryConfig, NotesConfig, SearchConfig, TarsConfig,
};
pub use error::TarsError;
pub use types::{OutputFormat, SearchMode, SearchResult};

/// A convenience `Result` type for tars operations.
pub type Result<T> = std::result::Result<T, TarsError>;
