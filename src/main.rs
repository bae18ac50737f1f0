use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod attribute_store;
mod catalog;
mod catalog_store;
mod config;
mod filter;
mod index_sync;
mod metrics;
mod search_index;
mod sqlite_persistence;

use catalog::CatalogService;
use catalog_store::SqliteCatalogStore;
use config::{AppConfig, CliConfig, FileConfig};
use filter::{ItemFilterRequest, SortDirection};
use search_index::{HttpSearchIndex, InMemorySearchIndex, SearchIndex};

/// Operator tooling for the catalog search index.
#[derive(Parser, Debug)]
#[command(name = "catalogctl")]
struct CliArgs {
    /// Path to the SQLite catalog database file.
    #[clap(long)]
    catalog_db: Option<PathBuf>,

    /// Path to an optional TOML config file. File values override CLI.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Base URL of the search engine (e.g. http://localhost:8108).
    #[clap(long)]
    search_url: Option<String>,

    /// API key for the search engine.
    #[clap(long)]
    search_api_key: Option<String>,

    /// Timeout in seconds for every search engine request.
    #[clap(long, default_value_t = 5)]
    search_timeout_sec: u64,

    /// Number of read connections for the catalog database.
    #[clap(long, default_value_t = 4)]
    read_pool_size: usize,

    /// Retries after a failed sync attempt.
    #[clap(long, default_value_t = 3)]
    sync_max_retries: u32,

    /// Base backoff delay between sync retries, in milliseconds.
    #[clap(long, default_value_t = 200)]
    sync_retry_base_delay_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rebuild every search document from the canonical store.
    Reindex,
    /// Report catalog and search engine health.
    Health,
    /// List the dynamic filter keys (and values) that currently exist.
    Filters {
        /// Show values for this key only.
        key: Option<String>,
    },
    /// Run a filtered, paginated item query against the catalog database.
    Find {
        /// Filter request as JSON (e.g. '{"attributes":{"color":"red"}}').
        #[clap(long)]
        filters: Option<String>,
        #[clap(long, default_value_t = 1)]
        page: usize,
        #[clap(long, default_value_t = 20)]
        per_page: usize,
        #[clap(long, default_value = "created_at")]
        sort: String,
        /// "asc" or "desc".
        #[clap(long, default_value = "desc")]
        direction: String,
    },
    /// Federated text search across items, categories and brands.
    QuickSearch {
        query: String,
        #[clap(long, default_value_t = 5)]
        per_page: usize,
    },
}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let cli_config = CliConfig {
        catalog_db: cli_args.catalog_db.clone(),
        read_pool_size: cli_args.read_pool_size,
        search_url: cli_args.search_url.clone(),
        search_api_key: cli_args.search_api_key.clone(),
        search_timeout_sec: cli_args.search_timeout_sec,
        sync_max_retries: cli_args.sync_max_retries,
        sync_retry_base_delay_ms: cli_args.sync_retry_base_delay_ms,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    metrics::init_metrics();

    info!("Opening catalog database at {:?}", config.catalog_db);
    let store = SqliteCatalogStore::new(&config.catalog_db, config.read_pool_size)?;

    let index: Arc<dyn SearchIndex> = match &config.search {
        Some(search) => {
            info!("Search engine configured at {}", search.url);
            Arc::new(HttpSearchIndex::new(
                search.url.clone(),
                search.api_key.clone(),
                search.timeout_sec,
            ))
        }
        None => {
            warn!("No search engine configured, using an in-process index (dry run)");
            Arc::new(InMemorySearchIndex::new())
        }
    };

    let service = CatalogService::new(store, index, config.sync.clone());

    match cli_args.command {
        Command::Reindex => {
            let report = service.reindex_all()?;
            for (collection, count) in &report.counts {
                println!("{}: {} documents", collection, count);
            }
            if report.pruned > 0 {
                println!("{} orphaned documents pruned", report.pruned);
            }
            if report.failed > 0 {
                println!("{} documents failed, see logs", report.failed);
            }
        }
        Command::Health => {
            let report = service.health();
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.catalog_ok {
                std::process::exit(1);
            }
        }
        Command::Filters { key } => match key {
            Some(key) => {
                let values = service.filter_values(&key)?;
                println!("{}", serde_json::to_string_pretty(&values)?);
            }
            None => {
                let filters = service.available_filters()?;
                println!("{}", serde_json::to_string_pretty(&filters)?);
            }
        },
        Command::Find {
            filters,
            page,
            per_page,
            sort,
            direction,
        } => {
            let request: ItemFilterRequest = match filters {
                Some(json) => serde_json::from_str(&json).context("Invalid filter JSON")?,
                None => ItemFilterRequest::default(),
            };
            let direction = match direction.as_str() {
                "asc" => SortDirection::Asc,
                _ => SortDirection::Desc,
            };
            let result = service.find_page(page, per_page, &sort, direction, &request)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::QuickSearch { query, per_page } => {
            let results = service.quick_search(&query, per_page)?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
    }

    // Let any sync work enqueued by this invocation drain before exit.
    service.flush_sync(Duration::from_secs(10));
    Ok(())
}
