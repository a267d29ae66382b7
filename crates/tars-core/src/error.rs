/// Errors that can occur across tars.
///
/// Each variant wraps a specific error domain. Library crates use this type
/// directly; the binary crate renders it through `miette` at the boundary.
///
/// # Examples
///
/// ```
/// use tars_core::TarsError;
///
/// let err = TarsError::Config("missing memory directory".into());
/// assert!(err.to_string().contains("missing memory directory"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum TarsError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The index was built with vectors of a different length.
    #[error(
        "vector dimension mismatch: index was built with {stored} dimensions but {requested} were requested"
    )]
    #[diagnostic(help(
        "the embedding model changed shape; delete the index database or switch back to the original model"
    ))]
    DimensionMismatch {
        /// Dimension recorded in the index.
        stored: usize,
        /// Dimension of the vectors being written or queried.
        requested: usize,
    },

    /// Embedding provider failure or malformed provider response.
    #[error("embedding provider error: {0}")]
    Provider(String),

    /// Input rejected before any I/O took place.
    #[error("invalid input: {0}")]
    Validation(String),

    /// SQLite failure.
    #[error("database error: {0}")]
    Database(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl TarsError {
    /// Whether this error stems from configuration rather than runtime failure.
    ///
    /// Dimension mismatches count as configuration: they never resolve by retrying.
    pub fn is_configuration(&self) -> bool {
        matches!(self, TarsError::Config(_) | TarsError::DimensionMismatch { .. })
    }
}
