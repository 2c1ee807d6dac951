//! Strata CLI
//!
//! Command-line interface for index lifecycle operations:
//! - Inspect current versions and planned migrations
//! - Run reindexes
//! - Run maintenance once or on an interval

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use strata::cache::InMemoryCacheClient;
use strata::client::{HttpSearchClient, MemorySearchClient, SearchClient};
use strata::config::{generate_default_config, Config, LoggingConfig};
use strata::index::{build_index, IndexContext, IndexSelection, ManagedIndex};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "strata")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Versioned and time-partitioned search index lifecycle manager")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: standard locations, then environment)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Run against an in-memory engine instead of the configured one
    #[arg(long, global = true)]
    pub dry_run: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate default config file
    InitConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Create indexes that must exist before the first write
    Configure {
        #[arg(short, long)]
        index: Option<String>,
    },

    /// Show configured and current schema versions
    Version {
        #[arg(short, long)]
        index: Option<String>,
    },

    /// Print the reindex work items for data on an old version
    Plan {
        #[arg(short, long)]
        index: String,
        /// Version the data is currently on
        #[arg(short, long)]
        from: u32,
    },

    /// Migrate data behind the configured version
    Reindex {
        #[arg(short, long)]
        index: Option<String>,
    },

    /// Rebalance aliases and apply retention
    Maintain {
        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
        /// Skip retention and reindex retries
        #[arg(long)]
        skip_optional: bool,
    },

    /// Show which names a date-range read would address
    Resolve {
        #[arg(short, long)]
        index: String,
        /// Range start (RFC 3339)
        #[arg(long)]
        start: DateTime<Utc>,
        /// Range end (RFC 3339)
        #[arg(long)]
        end: DateTime<Utc>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::InitConfig { output } = &cli.command {
        let config = generate_default_config();
        match output {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, &config)?;
                println!("Config written to {:?}", path);
            }
            None => print!("{}", config),
        }
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::load_default(),
    };
    init_logging(&config.logging)?;

    tracing::info!("Strata v{}", env!("CARGO_PKG_VERSION"));

    let client: Arc<dyn SearchClient> = if cli.dry_run {
        tracing::info!("Dry run: using in-memory engine");
        Arc::new(MemorySearchClient::new())
    } else {
        let client = HttpSearchClient::new(config.search.client_config())?;
        client
            .health_check()
            .await
            .with_context(|| format!("search engine at {}", config.search.url))?;
        Arc::new(client)
    };

    let mut context = IndexContext::new(client).with_cache_scope(config.cache.scope.clone());
    if config.cache.enabled {
        context = context.with_cache(Arc::new(InMemoryCacheClient::new()));
    }

    let indexes: Vec<Arc<dyn ManagedIndex>> = config
        .indexes
        .iter()
        .map(|c| build_index(c, &context))
        .collect();
    if indexes.is_empty() {
        tracing::warn!("No indexes configured");
    }

    match cli.command {
        Commands::InitConfig { .. } => {}

        Commands::Configure { index } => {
            for index in select(&indexes, index.as_deref())? {
                index.configure().await?;
                println!("{}: configured", index.name());
            }
        }

        Commands::Version { index } => {
            println!("{:<24} {:>10} {:>8}", "INDEX", "CONFIGURED", "CURRENT");
            for index in select(&indexes, index.as_deref())? {
                let current = index.current_version().await?;
                let marker = if current < index.version() { " *" } else { "" };
                println!(
                    "{:<24} {:>10} {:>8}{}",
                    index.name(),
                    index.version(),
                    current,
                    marker
                );
            }
        }

        Commands::Plan { index, from } => {
            let index = find(&indexes, &index)?;
            let items = index.plan_reindex(from).await?;
            println!("{}", serde_json::to_string_pretty(&items)?);
        }

        Commands::Reindex { index } => {
            let progress = |percent: u32, name: &str| {
                tracing::info!(index = %name, percent, "Reindex progress");
            };

            for index in select(&indexes, index.as_deref())? {
                index.configure().await?;
                let done = index.reindex(Some(&progress)).await?;
                println!("{}: {} reindex operation(s)", index.name(), done);
            }
        }

        Commands::Maintain {
            once,
            skip_optional,
        } => {
            let include_optional = config.maintenance.include_optional_tasks && !skip_optional;

            if once {
                let failures = run_maintenance(&indexes, include_optional).await;
                if failures > 0 {
                    bail!("maintenance failed for {} index(es)", failures);
                }
            } else {
                let minutes = config.maintenance.interval_minutes.max(1);
                tracing::info!(interval_minutes = minutes, "Starting maintenance loop");
                let mut ticker =
                    tokio::time::interval(std::time::Duration::from_secs(minutes * 60));

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            run_maintenance(&indexes, include_optional).await;
                        }
                        _ = tokio::signal::ctrl_c() => {
                            tracing::info!("Shutting down...");
                            break;
                        }
                    }
                }
            }
        }

        Commands::Resolve { index, start, end } => {
            let index = find(&indexes, &index)?;
            let names = index
                .resolve_index_names(&IndexSelection::DateRange { start, end })
                .await;
            for name in names {
                println!("{}", name);
            }
        }
    }

    Ok(())
}

/// One pass over every index, returning how many failed
async fn run_maintenance(indexes: &[Arc<dyn ManagedIndex>], include_optional: bool) -> usize {
    let mut failures = 0;

    for index in indexes {
        match index.maintain(include_optional).await {
            Ok(report) if report.is_noop() => {
                tracing::debug!(index = %index.name(), "Nothing to maintain");
            }
            Ok(report) => {
                tracing::info!(index = %index.name(), %report, "Maintenance pass complete");
                for failed in &report.failed_deletions {
                    tracing::warn!(index = %failed, "Deletion will be retried next pass");
                }
            }
            Err(e) => {
                failures += 1;
                tracing::error!(index = %index.name(), error = %e, "Maintenance failed");
            }
        }
    }

    failures
}

fn find<'a>(indexes: &'a [Arc<dyn ManagedIndex>], name: &str) -> anyhow::Result<&'a Arc<dyn ManagedIndex>> {
    match indexes.iter().find(|i| i.name() == name) {
        Some(index) => Ok(index),
        None => bail!("unknown index '{}'", name),
    }
}

fn select<'a>(
    indexes: &'a [Arc<dyn ManagedIndex>],
    name: Option<&str>,
) -> anyhow::Result<Vec<&'a Arc<dyn ManagedIndex>>> {
    match name {
        Some(name) => Ok(vec![find(indexes, name)?]),
        None => Ok(indexes.iter().collect()),
    }
}

fn init_logging(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("strata={}", logging.level)));

    let writer = match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path))?;
            BoxMakeWriter::new(std::sync::Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(logging.file.is_none());

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry.with(layer.json()).init();
    } else {
        registry.with(layer).init();
    }
    Ok(())
}
