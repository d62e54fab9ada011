//! Chronicle CLI
//!
//! Thin command-line surface over the library: each command maps 1:1
//! onto the ingestion and query interfaces.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use chronicle::types::{
    ChronicleConfig, EmbeddingConfig, IndexMode, RecordFilter, SearchOptions,
};
use chronicle::watch::{
    backfill_history, spawn_dir_watcher, spawn_shell_watcher, spawn_stream_watcher,
};
use chronicle::Chronicle;

#[derive(Parser)]
#[command(name = "chronicle")]
#[command(about = "Personal memory store with lexical and semantic recall")]
#[command(version)]
struct Cli {
    /// Database path
    #[arg(long, env = "CHRONICLE_DB_PATH", default_value = "~/.chronicle/memory.db")]
    db_path: String,

    /// Embedding model ("hash" or "none")
    #[arg(long, env = "CHRONICLE_EMBEDDING_MODEL", default_value = "hash")]
    embedding_model: String,

    /// Embedding dimensions
    #[arg(long, env = "CHRONICLE_EMBEDDING_DIMENSIONS", default_value = "384")]
    embedding_dimensions: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Remember a new memory
    Remember {
        /// Content to remember
        content: String,
        /// Tags (comma-separated)
        #[arg(short = 'T', long)]
        tags: Option<String>,
        /// Provenance of the record
        #[arg(short, long, default_value = "cli")]
        source: String,
        /// Metadata as a JSON object
        #[arg(short, long)]
        metadata: Option<String>,
    },
    /// Search memories
    Search {
        /// Search query (empty = pure filter)
        #[arg(default_value = "")]
        query: String,
        /// Filter by tags (comma-separated, all must match)
        #[arg(short = 'T', long)]
        tags: Option<String>,
        /// Only records at or after this RFC3339 instant
        #[arg(long)]
        since: Option<String>,
        /// Only records before this RFC3339 instant
        #[arg(long)]
        until: Option<String>,
        /// Filter by source
        #[arg(short, long)]
        source: Option<String>,
        /// Maximum results
        #[arg(short, long, default_value = "10")]
        limit: i64,
        /// Emit results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the most recent memories
    Recent {
        /// Maximum number to return
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },
    /// Get a memory by id
    Get {
        /// Record id
        id: i64,
    },
    /// Show store statistics
    Stats,
    /// Run one incremental indexing pass
    Index,
    /// Drop and recompute the embedding index
    Rebuild,
    /// Check index consistency, rebuilding on corruption
    Verify,
    /// Run a watcher until Ctrl-C
    Watch {
        #[command(subcommand)]
        target: WatchTarget,
    },
}

#[derive(Subcommand)]
enum WatchTarget {
    /// Tail a shell history file
    Shell {
        /// History file to watch
        #[arg(long, default_value = "~/.bash_history")]
        history: String,
        /// Import existing history before tailing
        #[arg(long)]
        backfill: bool,
        /// Poll interval in seconds
        #[arg(long, default_value = "2")]
        interval: u64,
    },
    /// Poll a directory for file changes
    Dir {
        /// Directory to watch
        path: String,
        /// Extensions to include (comma-separated, e.g. ".md,.rs")
        #[arg(short, long)]
        extensions: Option<String>,
        /// Poll interval in seconds
        #[arg(long, default_value = "5")]
        interval: u64,
    },
    /// Capture lines from standard input
    Stdin {
        /// Tags applied to every captured line (comma-separated)
        #[arg(short = 'T', long)]
        tags: Option<String>,
    },
}

fn split_csv(raw: Option<String>) -> Vec<String> {
    raw.map(|t| {
        t.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

fn parse_instant(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("not an RFC3339 timestamp: {}", raw))
}

fn print_record(record: &chronicle::MemoryRecord) {
    let tags = if record.tags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", record.tags.join(", "))
    };
    println!(
        "#{} {} ({}){} - {}",
        record.id,
        record.timestamp.format("%Y-%m-%d %H:%M"),
        record.source,
        tags,
        truncate(&record.content, 80)
    );
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let db_path = shellexpand::tilde(&cli.db_path).to_string();
    let mut config = ChronicleConfig::at_path(db_path);
    config.embedding = EmbeddingConfig {
        model: cli.embedding_model.clone(),
        dimensions: cli.embedding_dimensions,
    };
    // single-shot commands index at query time; watch mode runs the worker
    config.index_mode = match cli.command {
        Commands::Watch { .. } => IndexMode::Incremental,
        _ => IndexMode::OnDemand,
    };

    let chronicle = Chronicle::open(config)?;

    match cli.command {
        Commands::Remember {
            content,
            tags,
            source,
            metadata,
        } => {
            let tags = split_csv(tags);
            let metadata: HashMap<String, serde_json::Value> = match metadata {
                Some(raw) => serde_json::from_str(&raw).context("metadata must be a JSON object")?,
                None => HashMap::new(),
            };

            let id = chronicle.remember(&content, &tags, &source, &metadata)?;
            println!("Remembered #{}", id);
        }

        Commands::Search {
            query,
            tags,
            since,
            until,
            source,
            limit,
            json,
        } => {
            let options = SearchOptions {
                tags: split_csv(tags),
                since: since.as_deref().map(parse_instant).transpose()?,
                until: until.as_deref().map(parse_instant).transpose()?,
                source,
                limit,
            };

            let results = chronicle.search(&query, &options)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                for result in &results {
                    print!("(score: {:.3}) ", result.score);
                    print_record(&result.record);
                }
                if results.is_empty() {
                    println!("no matches");
                }
            }
        }

        Commands::Recent { limit } => {
            for record in chronicle.scan(&RecordFilter {
                limit: Some(limit),
                ..Default::default()
            })? {
                print_record(&record);
            }
        }

        Commands::Get { id } => {
            let record = chronicle.get(id)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }

        Commands::Stats => {
            let stats = chronicle.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }

        Commands::Index => {
            let indexed = chronicle.index_pending()?;
            println!("Indexed {} records", indexed);
        }

        Commands::Rebuild => {
            let indexed = chronicle.rebuild_index()?;
            println!("Rebuilt index with {} entries", indexed);
        }

        Commands::Verify => {
            chronicle.verify_index()?;
            println!("Index consistent");
        }

        Commands::Watch { target } => {
            chronicle.start_index_worker()?;

            let handle = match target {
                WatchTarget::Shell {
                    history,
                    backfill,
                    interval,
                } => {
                    let history = PathBuf::from(shellexpand::tilde(&history).to_string());
                    if backfill {
                        let captured = backfill_history(&chronicle, &history)?;
                        println!("Backfilled {} commands", captured);
                    }
                    println!("Watching {} (Ctrl-C to stop)", history.display());
                    spawn_shell_watcher(chronicle.clone(), history, Duration::from_secs(interval))
                }
                WatchTarget::Dir {
                    path,
                    extensions,
                    interval,
                } => {
                    let root = PathBuf::from(shellexpand::tilde(&path).to_string());
                    println!("Watching {} (Ctrl-C to stop)", root.display());
                    spawn_dir_watcher(
                        chronicle.clone(),
                        root,
                        split_csv(extensions),
                        Duration::from_secs(interval),
                    )
                }
                WatchTarget::Stdin { tags } => {
                    println!("Capturing stdin (Ctrl-C or EOF to stop)");
                    spawn_stream_watcher(chronicle.clone(), split_csv(tags))
                }
            };

            tokio::signal::ctrl_c().await?;
            handle.stop().await;
            chronicle.close().await?;
        }
    }

    Ok(())
}
