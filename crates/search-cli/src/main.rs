//! Helios Clinical Search CLI
//!
//! Drives the search engine against a SQLite clinical store. Requests are
//! JSON files of the form `{ "resource_type": ..., "parameters": ... }` and
//! results are written to stdout as JSON.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracing::info;

use helios_search::backends::sqlite::{SqliteBackend, SqliteBackendConfig};
use helios_search::core::FhirJsonTranslator;
use helios_search::{ResourceType, SearchConfig, SearchEngine, SearchRequest, SearchResults};

type Engine = SearchEngine<SqliteBackend, FhirJsonTranslator>;

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(name = "hfs-search")]
#[command(about = "Search a relational clinical store")]
struct Cli {
    /// Path to the SQLite database, or `:memory:`.
    #[arg(long, env = "HFS_SEARCH_DATABASE", default_value = "clinical.db")]
    database: String,

    /// JSON file with engine configuration.
    #[arg(long, env = "HFS_SEARCH_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "HFS_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Install the clinical schema.
    Init,
    /// Execute a SQL seed script.
    Load {
        /// The script.
        script: PathBuf,
    },
    /// Print the number of primary matches.
    Count {
        /// The request file.
        request: PathBuf,
    },
    /// Print one page of results.
    Page {
        /// The request file.
        request: PathBuf,
        /// First primary index (inclusive).
        #[arg(long, default_value_t = 0)]
        start: usize,
        /// Last primary index (exclusive). Defaults to the preferred page size.
        #[arg(long)]
        end: Option<usize>,
    },
    /// Print every result.
    All {
        /// The request file.
        request: PathBuf,
    },
    /// Print one resource and everything related to it.
    Everything {
        /// The root resource type.
        resource_type: ResourceType,
        /// The root resource uuid.
        uuid: String,
    },
    /// Print the SQL a request assembles to.
    Explain {
        /// The request file.
        request: PathBuf,
    },
}

/// Initializes the tracing subscriber for logging.
fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("helios_search={},hfs_search={}", level, level)));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SearchConfig> {
    let Some(path) = path else {
        return Ok(SearchConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

fn load_request(path: &Path) -> anyhow::Result<SearchRequest> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading request {}", path.display()))?;
    Ok(SearchRequest::from_json(&raw)?)
}

fn open_backend(database: &str) -> anyhow::Result<SqliteBackend> {
    info!(database = %database, "Opening clinical store");
    let backend = SqliteBackend::with_config(database, SqliteBackendConfig::default())?;
    backend.init_schema()?;
    Ok(backend)
}

fn bundle(
    results: &SearchResults<'_, SqliteBackend, FhirJsonTranslator>,
    entries: Vec<Value>,
) -> anyhow::Result<Value> {
    Ok(json!({
        "id": results.id().to_string(),
        "published": results.published().to_rfc3339(),
        "total": results.size()?,
        "entry": entries,
    }))
}

/// End of a default-sized page starting at `start`.
fn page_end(start: usize, page_size: usize) -> usize {
    start.saturating_add(page_size)
}

fn run(engine: &Engine, command: Command) -> anyhow::Result<Option<Value>> {
    let output = match command {
        Command::Init | Command::Load { .. } => None,
        Command::Count { request } => {
            let request = load_request(&request)?;
            let results = engine.search(request.resource_type, request.parameters);
            Some(json!({ "total": results.size()? }))
        }
        Command::Page {
            request,
            start,
            end,
        } => {
            let request = load_request(&request)?;
            let results = engine.search(request.resource_type, request.parameters);
            let end = end.unwrap_or_else(|| page_end(start, results.preferred_page_size()));
            let entries = results.page(start, end)?;
            Some(bundle(&results, entries)?)
        }
        Command::All { request } => {
            let request = load_request(&request)?;
            let results = engine.search(request.resource_type, request.parameters);
            let entries = results.all_resources()?;
            Some(bundle(&results, entries)?)
        }
        Command::Everything {
            resource_type,
            uuid,
        } => {
            let results = engine.everything(resource_type, &uuid)?;
            let entries = results.all_resources()?;
            Some(bundle(&results, entries)?)
        }
        Command::Explain { request } => {
            let request = load_request(&request)?;
            let explanation = engine.explain(request.resource_type, &request.parameters)?;
            Some(serde_json::to_value(explanation)?)
        }
    };
    Ok(output)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = load_config(cli.config.as_deref())?;
    let backend = open_backend(&cli.database)?;

    if let Command::Load { script } = &cli.command {
        let sql = std::fs::read_to_string(script)
            .with_context(|| format!("reading script {}", script.display()))?;
        backend.execute_batch(&sql)?;
        info!(script = %script.display(), "Loaded seed script");
    }

    let translator = FhirJsonTranslator::new(&config);
    let engine = SearchEngine::new(backend, translator, config)?;

    if let Some(output) = run(&engine, cli.command)? {
        println!("{}", serde_json::to_string_pretty(&output)?);
    }
    Ok(())
}
