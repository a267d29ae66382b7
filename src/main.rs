use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tars_core::{OutputFormat, SearchMode, SearchResult, TarsConfig};
use tars_memory::chunker::ChunkOptions;
use tars_memory::embedding::OllamaClient;
use tars_memory::indexer::{BuildStats, Indexer, IndexerConfig};
use tars_memory::search::{SearchEngine, SearchEngineConfig};
use tars_memory::source::{ContentSource, MemoryDirSource, VaultSource};
use tars_memory::store::{IndexStats, MemoryIndex};

#[derive(Parser)]
#[command(
    name = "tars",
    version,
    about = "Long-term memory for your assistant",
    long_about = "Index a memory directory or notes vault into SQLite and search it with\n\
                   hybrid vector + keyword retrieval fused by Reciprocal Rank Fusion.\n\n\
                   Examples:\n  \
                     tars init                          Create a .tars.toml config file\n  \
                     tars index --memory-dir ~/memory   Index Memory.md, Procedural.md, sessions/\n  \
                     tars search 'dog walks'            Hybrid search over memory\n  \
                     tars search 'recipes' --notes      Search the notes vault\n  \
                     tars stats                         Show index statistics"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (default: .tars.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for command results.\n\n\
                       Formats:\n  \
                         text      Human-readable summaries (default)\n  \
                         json      Machine-readable JSON with camelCase keys\n  \
                         markdown  GitHub-flavored Markdown"
    )]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Memory directory (overrides [memory] dir)
    #[arg(long, global = true, env = "TARS_MEMORY_DIR")]
    memory_dir: Option<PathBuf>,

    /// Notes vault (overrides [notes] dir)
    #[arg(long, global = true, env = "TARS_NOTES_DIR")]
    notes_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Build or refresh an index
    #[command(long_about = "Build or refresh an index.\n\n\
        Only files whose content changed since the last run are re-chunked and\n\
        re-embedded. Files that disappeared are removed from the index. Changing\n\
        the embedding model re-embeds everything.\n\n\
        Examples:\n  tars index\n  tars index --notes")]
    Index {
        /// Index the notes vault instead of the memory directory
        #[arg(long)]
        notes: bool,
    },
    /// Search an index
    #[command(long_about = "Search an index.\n\n\
        Scores are fused RRF scores in [0, 1]; --min-score filters on that scale.\n\n\
        Examples:\n  tars search 'Perry dog'\n  tars search 'pasta' --notes --mode fts\n  tars search 'deploy steps' --limit 3 --format json")]
    Search {
        /// Search query
        query: String,

        /// Search the notes vault instead of the memory directory
        #[arg(long)]
        notes: bool,

        /// Retrieval mode: hybrid, vec, or fts (default: [search] mode)
        #[arg(long)]
        mode: Option<SearchMode>,

        /// Maximum results to return (default: [search] limit)
        #[arg(long)]
        limit: Option<usize>,

        /// Minimum fused score (default: [search] min_score)
        #[arg(long)]
        min_score: Option<f64>,
    },
    /// Show index statistics
    Stats {
        /// Show the notes index instead of the memory index
        #[arg(long)]
        notes: bool,
    },
    /// Create a default .tars.toml configuration file
    #[command(long_about = "Create a default .tars.toml configuration file.\n\n\
        Generates a commented-out template with all available options.\n\
        Fails if .tars.toml already exists.")]
    Init,
    /// Generate shell completion scripts
    #[command(hide = true)]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// One indexable corpus: the memory directory or the notes vault.
struct Target {
    root: PathBuf,
    db_path: PathBuf,
    collection: String,
    notes: bool,
}

impl Target {
    fn resolve(config: &TarsConfig, notes: bool) -> Result<Self> {
        if notes {
            let (Some(root), Some(db_path)) = (config.notes.dir.clone(), config.notes.db_path()) else {
                miette::bail!(miette::miette!(
                    help = "Pass --notes-dir, set TARS_NOTES_DIR, or add dir under [notes] in .tars.toml",
                    "No notes vault configured"
                ));
            };
            Ok(Self {
                root,
                db_path,
                collection: config.notes.collection.clone(),
                notes,
            })
        } else {
            let (Some(root), Some(db_path)) = (config.memory.dir.clone(), config.memory.db_path()) else {
                miette::bail!(miette::miette!(
                    help = "Pass --memory-dir, set TARS_MEMORY_DIR, or add dir under [memory] in .tars.toml",
                    "No memory directory configured"
                ));
            };
            Ok(Self {
                root,
                db_path,
                collection: config.memory.collection.clone(),
                notes,
            })
        }
    }

    fn source(&self) -> Box<dyn ContentSource> {
        if self.notes {
            Box::new(VaultSource)
        } else {
            Box::new(MemoryDirSource)
        }
    }

    fn label(&self) -> &'static str {
        if self.notes {
            "notes"
        } else {
            "memory"
        }
    }
}

const DEFAULT_CONFIG: &str = r#"# tars configuration

[memory]
# dir = "~/tars/memory"
# database = "tars.db"
# collection = "tars_memory"

[notes]
# dir = "~/Documents/vault"
# database = "notes.db"
# collection = "notes"

[embedding]
# provider = "ollama"
# model = "qwen3-embedding:0.6b"
# base_url = "http://localhost:11434"
# timeout_secs = 120

[chunking]
# target_tokens = 800
# overlap_fraction = 0.1

[search]
# mode = "hybrid"
# limit = 10
# min_score = 0.0
# rrf_k = 60
"#;

fn load_config(path: Option<&Path>) -> Result<TarsConfig> {
    match path {
        Some(path) => Ok(TarsConfig::from_file(path)?),
        None => {
            let default_path = Path::new(".tars.toml");
            if default_path.exists() {
                Ok(TarsConfig::from_file(default_path)?)
            } else {
                Ok(TarsConfig::default())
            }
        }
    }
}

fn spinner(message: String) -> Option<indicatif::ProgressBar> {
    if !std::io::stderr().is_terminal() {
        return None;
    }
    let pb = indicatif::ProgressBar::new_spinner();
    if let Ok(style) = indicatif::ProgressStyle::with_template("{spinner:.cyan} {msg} ({elapsed})") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    Some(pb)
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .expect("miette handler");
    human_panic::setup_panic!();

    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    match &cli.command {
        Command::Init => return run_init(),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "tars", &mut std::io::stdout());
            return Ok(());
        }
        _ => {}
    }

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(dir) = &cli.memory_dir {
        config.memory.dir = Some(dir.clone());
    }
    if let Some(dir) = &cli.notes_dir {
        config.notes.dir = Some(dir.clone());
    }
    tracing::debug!(format = %cli.format, model = %config.embedding.model, "configuration loaded");

    match &cli.command {
        Command::Index { notes } => {
            let target = Target::resolve(&config, *notes)?;
            let stats = run_index(&config, &target).await?;
            print_build_stats(cli.format, &target, &stats)?;
        }
        Command::Search {
            query,
            notes,
            mode,
            limit,
            min_score,
        } => {
            let target = Target::resolve(&config, *notes)?;
            let engine = SearchEngine::new(
                SearchEngineConfig {
                    db_path: target.db_path.clone(),
                    model: config.embedding.model.clone(),
                    rrf_k: config.search.rrf_k,
                },
                Box::new(OllamaClient::with_config(&config.embedding)?),
            );
            let results = engine
                .search(
                    query,
                    mode.unwrap_or(config.search.mode),
                    limit.unwrap_or(config.search.limit),
                    min_score.unwrap_or(config.search.min_score),
                )
                .await?;
            print_results(cli.format, &results)?;
        }
        Command::Stats { notes } => {
            let target = Target::resolve(&config, *notes)?;
            let stats = match MemoryIndex::open_existing(&target.db_path)? {
                Some(index) => Some(index.stats()?),
                None => None,
            };
            print_index_stats(cli.format, &target, stats.as_ref())?;
        }
        Command::Init | Command::Completions { .. } => {}
    }

    Ok(())
}

fn run_init() -> Result<()> {
    let path = Path::new(".tars.toml");
    if path.exists() {
        miette::bail!(".tars.toml already exists");
    }
    std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
    println!("Created .tars.toml with default configuration");
    Ok(())
}

async fn run_index(config: &TarsConfig, target: &Target) -> Result<BuildStats> {
    let indexer = Indexer::new(
        IndexerConfig {
            db_path: target.db_path.clone(),
            root: target.root.clone(),
            collection: target.collection.clone(),
            chunking: ChunkOptions::from(&config.chunking),
        },
        Box::new(OllamaClient::with_config(&config.embedding)?),
        target.source(),
    );

    let pb = spinner(format!("Indexing {} at {}", target.label(), target.root.display()));
    let result = indexer.build_index(&config.embedding.model).await;
    if let Some(pb) = pb {
        match &result {
            Ok(_) => pb.finish_and_clear(),
            Err(_) => pb.finish_with_message("Failed"),
        }
    }
    Ok(result?)
}

fn print_build_stats(format: OutputFormat, target: &Target, stats: &BuildStats) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(stats).into_diagnostic()?);
        }
        OutputFormat::Markdown => {
            println!("# Indexed {}\n", target.label());
            println!("| Files indexed | Unchanged | Chunks written | Removed |");
            println!("|---|---|---|---|");
            println!(
                "| {} | {} | {} | {} |",
                stats.indexed, stats.skipped, stats.chunks, stats.deleted
            );
        }
        OutputFormat::Text => {
            println!(
                "Indexed {} files ({} chunks), {} unchanged, {} removed",
                stats.indexed, stats.chunks, stats.skipped, stats.deleted
            );
        }
    }
    Ok(())
}

fn print_results(format: OutputFormat, results: &[SearchResult]) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(results).into_diagnostic()?);
        }
        OutputFormat::Markdown => {
            if results.is_empty() {
                println!("No results found.");
                return Ok(());
            }
            println!("# Search Results\n");
            for (i, r) in results.iter().enumerate() {
                let title = r.file_title.as_deref().unwrap_or(&r.file_path);
                println!(
                    "## {}. {title} `{}:{}` (score: {:.4})\n\n{}\n",
                    i + 1,
                    r.file_path,
                    r.line_range(),
                    r.score,
                    r.content.trim_end(),
                );
            }
        }
        OutputFormat::Text => {
            if results.is_empty() {
                println!("No results found.");
                return Ok(());
            }
            for (i, r) in results.iter().enumerate() {
                let category = r.category.as_deref().unwrap_or("-");
                println!(
                    "{}. {}:{} [{category}] (score: {:.4})",
                    i + 1,
                    r.file_path,
                    r.line_range(),
                    r.score,
                );
                let preview: String = r
                    .content
                    .lines()
                    .take(3)
                    .map(|l| format!("   {l}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                println!("{preview}\n");
            }
        }
    }
    Ok(())
}

fn print_index_stats(format: OutputFormat, target: &Target, stats: Option<&IndexStats>) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&stats).into_diagnostic()?);
        }
        OutputFormat::Markdown | OutputFormat::Text => {
            let Some(stats) = stats else {
                println!(
                    "No {} index at {} (run `tars index{}`)",
                    target.label(),
                    target.db_path.display(),
                    if target.notes { " --notes" } else { "" }
                );
                return Ok(());
            };
            let model = stats.embedding_model.as_deref().unwrap_or("-");
            let dim = stats
                .embedding_dim
                .map_or_else(|| "-".to_string(), |d| d.to_string());
            if format == OutputFormat::Markdown {
                println!("# {} index\n", target.label());
                println!("| Files | Chunks | Model | Dimension | Size (bytes) |");
                println!("|---|---|---|---|---|");
                println!(
                    "| {} | {} | {model} | {dim} | {} |",
                    stats.files, stats.chunks, stats.db_size_bytes
                );
            } else {
                println!("Index:     {}", target.db_path.display());
                println!("Files:     {}", stats.files);
                println!("Chunks:    {}", stats.chunks);
                println!("Model:     {model}");
                println!("Dimension: {dim}");
                println!("Size:      {} bytes", stats.db_size_bytes);
            }
        }
    }
    Ok(())
}
