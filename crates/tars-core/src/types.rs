use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which ranked lists feed the fused result.
///
/// # Examples
///
/// ```
/// use tars_core::SearchMode;
///
/// let mode: SearchMode = "vector".parse().unwrap();
/// assert_eq!(mode, SearchMode::Vec);
/// assert_eq!(SearchMode::default(), SearchMode::Hybrid);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Vector similarity and full-text keyword search, fused with RRF.
    #[default]
    Hybrid,
    /// Vector similarity only.
    Vec,
    /// Full-text keyword search only.
    Fts,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchMode::Hybrid => write!(f, "hybrid"),
            SearchMode::Vec => write!(f, "vec"),
            SearchMode::Fts => write!(f, "fts"),
        }
    }
}

impl FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hybrid" => Ok(SearchMode::Hybrid),
            "vec" | "vector" => Ok(SearchMode::Vec),
            "fts" | "keyword" => Ok(SearchMode::Fts),
            other => Err(format!("unknown search mode: {other}")),
        }
    }
}

/// Output format for CLI results.
///
/// # Examples
///
/// ```
/// use tars_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
///
/// let fmt: OutputFormat = "md".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Markdown);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable summaries.
    #[default]
    Text,
    /// Machine-readable JSON with camelCase keys.
    Json,
    /// Markdown-formatted output.
    Markdown,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

/// A hydrated search hit.
///
/// `score` is the fused RRF score in `[0, 1]`; a chunk ranked first in
/// every contributing list scores exactly `1.0`.
///
/// # Examples
///
/// ```
/// use tars_core::SearchResult;
///
/// let hit = SearchResult {
///     content: "Perry walks the dog at 7am.".into(),
///     score: 1.0,
///     file_path: "Memory.md".into(),
///     file_title: Some("Memory".into()),
///     category: Some("semantic".into()),
///     start_line: 3,
///     end_line: 5,
///     chunk_id: 12,
/// };
/// assert_eq!(hit.line_range(), "3-5");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// Chunk text.
    pub content: String,
    /// Fused score.
    pub score: f64,
    /// Path of the owning file, as recorded at index time.
    pub file_path: String,
    /// Title of the owning file.
    pub file_title: Option<String>,
    /// Category label of the owning file (`semantic`, `episodic`, ...).
    pub category: Option<String>,
    /// First line of the chunk (1-indexed, inclusive).
    pub start_line: u32,
    /// Last line of the chunk (1-indexed, inclusive).
    pub end_line: u32,
    /// Row id of the chunk in the index.
    pub chunk_id: i64,
}

impl SearchResult {
    /// Line range formatted as `start-end`.
    pub fn line_range(&self) -> String {
        format!("{}-{}", self.start_line, self.end_line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_mode_from_str() {
        assert_eq!("hybrid".parse::<SearchMode>().unwrap(), SearchMode::Hybrid);
        assert_eq!("vec".parse::<SearchMode>().unwrap(), SearchMode::Vec);
        assert_eq!("VECTOR".parse::<SearchMode>().unwrap(), SearchMode::Vec);
        assert_eq!("fts".parse::<SearchMode>().unwrap(), SearchMode::Fts);
        assert_eq!("keyword".parse::<SearchMode>().unwrap(), SearchMode::Fts);
        assert!("fuzzy".parse::<SearchMode>().is_err());
    }

    #[test]
    fn search_mode_display_round_trips() {
        for mode in [SearchMode::Hybrid, SearchMode::Vec, SearchMode::Fts] {
            assert_eq!(mode.to_string().parse::<SearchMode>().unwrap(), mode);
        }
    }

    #[test]
    fn output_format_from_str() {
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!(
            "markdown".parse::<OutputFormat>().unwrap(),
            OutputFormat::Markdown
        );
        assert_eq!(
            "md".parse::<OutputFormat>().unwrap(),
            OutputFormat::Markdown
        );
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn output_format_default_is_text() {
        assert_eq!(OutputFormat::default(), OutputFormat::Text);
    }

    #[test]
    fn search_result_serializes_camel_case() {
        let hit = SearchResult {
            content: "text".into(),
            score: 0.5,
            file_path: "sessions/2024-01-01.md".into(),
            file_title: None,
            category: Some("episodic".into()),
            start_line: 1,
            end_line: 4,
            chunk_id: 7,
        };
        let json = serde_json::to_value(&hit).unwrap();
        assert_eq!(json["filePath"], "sessions/2024-01-01.md");
        assert_eq!(json["startLine"], 1);
        assert_eq!(json["endLine"], 4);
        assert!(json["fileTitle"].is_null());
    }
}
