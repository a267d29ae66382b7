//! Markdown-aware chunking with boundary scoring.
//!
//! Documents are cut near a token target at the most natural boundary
//! (headings first, then fences, rules, blank lines, list items), never in
//! the middle of a fenced code block unless the block exceeds three times
//! the target. Consecutive chunks overlap by a fraction of their lines.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tars_core::{ChunkingConfig, TarsError};

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(#{1,6})\s").unwrap());
static RULE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(-{3,}|\*{3,}|_{3,})\s*$").unwrap());
static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(`{3,}|~{3,})").unwrap());
static LIST_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\s*[-*+]|\s*\d+\.)\s").unwrap());
static DATA_IMAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\(data:[^)]+\)").unwrap());

/// A contiguous slice of a markdown document.
///
/// # Examples
///
/// ```
/// use tars_memory::chunker::{chunk_markdown, ChunkOptions};
///
/// let chunks = chunk_markdown("# Hello\n\nSome content here.\n", &ChunkOptions::default()).unwrap();
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].start_line, 1);
/// assert_eq!(chunks[0].end_line, 3);
/// assert_eq!(chunks[0].heading_path, vec!["Hello".to_string()]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Raw text of the chunk, line terminators included.
    pub content: String,
    /// 0-based position among the chunks of its document.
    pub sequence: u32,
    /// First line (1-indexed).
    pub start_line: u32,
    /// Last line (1-indexed, inclusive).
    pub end_line: u32,
    /// SHA-256 of `content`, lowercase hex.
    pub content_hash: String,
    /// Heading breadcrumb in effect at `start_line`, outermost first.
    pub heading_path: Vec<String>,
}

impl Chunk {
    /// Text handed to the embedding model: the heading breadcrumb (if any)
    /// followed by the chunk content.
    ///
    /// Vectors are therefore computed from this text rather than from the raw
    /// `content`; storage and full-text search keep the raw content. Chunks
    /// without headings embed exactly their content.
    ///
    /// # Examples
    ///
    /// ```
    /// use tars_memory::chunker::Chunk;
    ///
    /// let chunk = Chunk {
    ///     content: "Boil water.\n".into(),
    ///     sequence: 0,
    ///     start_line: 3,
    ///     end_line: 3,
    ///     content_hash: String::new(),
    ///     heading_path: vec!["Recipes".into(), "Pasta".into()],
    /// };
    /// assert_eq!(chunk.embedding_text(), "Recipes > Pasta\n\nBoil water.\n");
    /// ```
    pub fn embedding_text(&self) -> String {
        if self.heading_path.is_empty() {
            self.content.clone()
        } else {
            format!("{}\n\n{}", self.heading_path.join(" > "), self.content)
        }
    }
}

/// Chunk sizing parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkOptions {
    /// Target chunk size in estimated tokens.
    pub target_tokens: usize,
    /// Fraction of each chunk's lines repeated at the start of the next.
    pub overlap_fraction: f64,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            target_tokens: 800,
            overlap_fraction: 0.1,
        }
    }
}

impl From<&ChunkingConfig> for ChunkOptions {
    fn from(config: &ChunkingConfig) -> Self {
        Self {
            target_tokens: config.target_tokens,
            overlap_fraction: config.overlap_fraction,
        }
    }
}

impl ChunkOptions {
    /// Reject options the chunker cannot honour.
    ///
    /// # Errors
    ///
    /// Returns [`TarsError::Validation`] if `target_tokens` is zero or
    /// `overlap_fraction` is outside `[0, 1)`.
    pub fn validate(&self) -> Result<(), TarsError> {
        if self.target_tokens == 0 {
            return Err(TarsError::Validation(
                "target_tokens must be greater than zero".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.overlap_fraction) {
            return Err(TarsError::Validation(format!(
                "overlap_fraction must be in [0, 1), got {}",
                self.overlap_fraction
            )));
        }
        Ok(())
    }
}

/// Structural role of a line that makes it a candidate cut point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryKind {
    /// ATX heading with its level (1-6).
    Heading(u8),
    /// Horizontal rule.
    Rule,
    /// Code fence delimiter (opening or closing).
    Fence,
    /// Whitespace-only line.
    Blank,
    /// Bulleted or numbered list item.
    ListItem,
}

impl BoundaryKind {
    /// Baseline preference for cutting before a line of this kind.
    pub fn score(self) -> u32 {
        match self {
            BoundaryKind::Heading(level) => 110 - 10 * u32::from(level.clamp(1, 6)),
            BoundaryKind::Fence => 80,
            BoundaryKind::Rule => 70,
            BoundaryKind::Blank => 10,
            BoundaryKind::ListItem => 5,
        }
    }
}

/// Classify a line. Plain text is not a boundary.
///
/// # Examples
///
/// ```
/// use tars_memory::chunker::{classify_line, BoundaryKind};
///
/// assert_eq!(classify_line("## Sub\n"), Some(BoundaryKind::Heading(2)));
/// assert_eq!(classify_line("```rust\n"), Some(BoundaryKind::Fence));
/// assert_eq!(classify_line("Just text.\n"), None);
/// ```
pub fn classify_line(line: &str) -> Option<BoundaryKind> {
    if let Some(caps) = HEADING_RE.captures(line) {
        let level = caps.get(1).map_or(1, |m| m.as_str().len());
        return Some(BoundaryKind::Heading(level as u8));
    }
    if RULE_RE.is_match(line) {
        return Some(BoundaryKind::Rule);
    }
    if FENCE_RE.is_match(line) {
        return Some(BoundaryKind::Fence);
    }
    if line.trim().is_empty() {
        return Some(BoundaryKind::Blank);
    }
    if LIST_RE.is_match(line) {
        return Some(BoundaryKind::ListItem);
    }
    None
}

/// Rough token count: one token per four characters.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// SHA-256 of `text` as lowercase hex.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Quadratic decay of a baseline score with distance from the ideal cut.
pub fn score_boundary(baseline: u32, distance: usize, window: usize) -> f64 {
    if window == 0 {
        return f64::from(baseline);
    }
    let ratio = distance as f64 / window as f64;
    f64::from(baseline) * (1.0 - ratio * ratio)
}

/// Split a markdown document into overlapping chunks.
///
/// Inline `data:` URI images are stripped first. Empty or whitespace-only
/// input produces no chunks.
///
/// # Errors
///
/// Returns [`TarsError::Validation`] if `options` are invalid.
///
/// # Examples
///
/// ```
/// use tars_memory::chunker::{chunk_markdown, ChunkOptions};
///
/// let options = ChunkOptions { target_tokens: 120, overlap_fraction: 0.0 };
/// let mut text = String::new();
/// for i in 0..4 {
///     text.push_str(&format!("## Section {i}\n\n{}\n\n", "word ".repeat(120)));
/// }
/// let chunks = chunk_markdown(&text, &options).unwrap();
/// assert!(chunks.len() >= 2);
/// assert_eq!(chunks.iter().map(|c| c.content.as_str()).collect::<String>(), text);
/// ```
pub fn chunk_markdown(text: &str, options: &ChunkOptions) -> Result<Vec<Chunk>, TarsError> {
    options.validate()?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let cleaned = DATA_IMAGE_RE.replace_all(text, "");
    let lines: Vec<&str> = cleaned.split_inclusive('\n').collect();
    let kinds: Vec<Option<BoundaryKind>> = lines.iter().map(|l| classify_line(l)).collect();
    let line_tokens: Vec<usize> = lines.iter().map(|l| estimate_tokens(l)).collect();
    let total = lines.len();

    let target = options.target_tokens as f64;
    let window_open = target * 0.7;
    let window_close = target * 1.3;
    let max_extended = options.target_tokens * 3;

    // fence_state[i] is whether a code fence is open just before line i
    let mut fence_state = Vec::with_capacity(total + 1);
    let mut open = false;
    fence_state.push(open);
    for kind in &kinds {
        if *kind == Some(BoundaryKind::Fence) {
            open = !open;
        }
        fence_state.push(open);
    }

    let mut emitter = Emitter {
        lines: &lines,
        kinds: &kinds,
        trail: HeadingTrail::default(),
        chunks: Vec::new(),
    };
    let mut pos = 0;

    while pos < total {
        let mut tokens = 0usize;
        let mut window_start = None;
        let mut end = pos;

        for i in pos..total {
            tokens += line_tokens[i];
            end = i + 1;
            if window_start.is_none() && tokens as f64 >= window_open {
                window_start = Some(i);
            }
            if tokens as f64 >= window_close {
                break;
            }
        }

        if end >= total {
            emitter.emit(pos, total);
            break;
        }

        let window_start = window_start.unwrap_or(pos);
        let in_fence = fence_state[end];

        let mut target_line = end - 1;
        let mut running = 0usize;
        for (i, count) in line_tokens.iter().enumerate().take(end).skip(pos) {
            running += count;
            if running >= options.target_tokens {
                target_line = i;
                break;
            }
        }
        let window_size = end - window_start;

        let mut fence_open = fence_state[window_start];

        let mut best: Option<(usize, f64)> = None;
        for (i, kind) in kinds.iter().enumerate().take(end).skip(window_start) {
            let Some(kind) = *kind else {
                continue;
            };
            if kind == BoundaryKind::Fence {
                fence_open = !fence_open;
            }
            if fence_open && kind != BoundaryKind::Fence {
                continue;
            }
            let score = score_boundary(kind.score(), i.abs_diff(target_line), window_size);
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((i, score)),
            }
        }

        let mut cut = best.map_or(end, |(i, _)| i);

        if best.is_none() && in_fence {
            let mut extended_tokens = tokens;
            let mut extend_end = end;
            let mut still_open = true;
            while extend_end < total && extended_tokens < max_extended {
                let kind = kinds[extend_end];
                extended_tokens += line_tokens[extend_end];
                extend_end += 1;
                if kind == Some(BoundaryKind::Fence) {
                    still_open = !still_open;
                    if !still_open {
                        break;
                    }
                }
            }
            if extend_end > end {
                cut = extend_end;
            }
        }

        if cut <= pos {
            cut = end;
        }

        emitter.emit(pos, cut);

        let overlap = ((cut - pos) as f64 * options.overlap_fraction).floor() as usize;
        let next = cut - overlap;
        pos = if next <= pos { cut } else { next };
    }

    Ok(emitter.chunks)
}

/// Builds chunks from line ranges, numbering only the ones it keeps.
struct Emitter<'a> {
    lines: &'a [&'a str],
    kinds: &'a [Option<BoundaryKind>],
    trail: HeadingTrail,
    chunks: Vec<Chunk>,
}

impl Emitter<'_> {
    fn emit(&mut self, start: usize, end: usize) {
        let content: String = self.lines[start..end].concat();
        if content.trim().is_empty() {
            return;
        }
        self.trail.advance_to(self.lines, self.kinds, start);
        self.chunks.push(Chunk {
            content_hash: content_hash(&content),
            content,
            sequence: self.chunks.len() as u32,
            start_line: start as u32 + 1,
            end_line: end as u32,
            heading_path: self.trail.path(),
        });
    }
}

/// Tracks the heading stack while walking a document forwards.
#[derive(Debug, Default)]
struct HeadingTrail {
    next: usize,
    in_fence: bool,
    stack: Vec<(u8, String)>,
}

impl HeadingTrail {
    /// Consume lines up to and including `line`.
    fn advance_to(&mut self, lines: &[&str], kinds: &[Option<BoundaryKind>], line: usize) {
        while self.next <= line && self.next < lines.len() {
            match kinds[self.next] {
                Some(BoundaryKind::Fence) => self.in_fence = !self.in_fence,
                Some(BoundaryKind::Heading(level)) if !self.in_fence => {
                    self.stack.retain(|(l, _)| *l < level);
                    let title = lines[self.next].trim_start_matches('#').trim();
                    self.stack.push((level, title.to_string()));
                }
                _ => {}
            }
            self.next += 1;
        }
    }

    fn path(&self) -> Vec<String> {
        self.stack
            .iter()
            .filter(|(_, title)| !title.is_empty())
            .map(|(_, title)| title.clone())
            .collect()
    }
}
