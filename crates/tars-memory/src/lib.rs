//! Long-term memory retrieval: markdown chunking, SQLite storage and hybrid search.
//!
//! Documents from a [`source::ContentSource`] are split by [`chunker`] into
//! overlapping, boundary-aware chunks, embedded through an
//! [`embedding::EmbeddingProvider`] and stored by [`store::MemoryIndex`]
//! alongside an FTS5 keyword mirror. [`indexer::Indexer`] keeps the index in
//! step with the source incrementally; [`search::SearchEngine`] fuses vector
//! and keyword rankings with Reciprocal Rank Fusion.

pub mod chunker;
pub mod embedding;
pub mod indexer;
pub mod search;
pub mod source;
pub mod store;
