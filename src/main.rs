//! # LearnFlow CLI (`learnflow`)
//!
//! ## Usage
//!
//! ```bash
//! learnflow --config ./config/learnflow.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `learnflow init` | Create the SQLite database and its tables |
//! | `learnflow serve` | Start the HTTP server and sort worker |
//! | `learnflow sort <session>` | Submit a sort and poll until it finishes |
//! | `learnflow status <session>` | Poll a session's sort once |
//! | `learnflow summarize <article>` | Summarize an article |
//! | `learnflow notes <article>` | Generate study notes for an article |
//! | `learnflow stats` | Database overview and articles sorted on a day |
//!
//! `sort`, `status`, `summarize` and `notes` talk to a running server at
//! `[client].base_url`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use learnflow::{config, migrate, server, sort_cmd, stats};

/// LearnFlow: reading lists ranked against your learning goals.
#[derive(Parser)]
#[command(
    name = "learnflow",
    about = "LearnFlow — session reading lists ranked against your learning goals by an LLM",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/learnflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Start the HTTP server and the background sort worker.
    Serve,

    /// Submit a sort for a session and poll until it completes.
    Sort {
        /// Session id.
        session: i64,

        /// Rank only these article ids (default: the whole session).
        #[arg(long = "article")]
        articles: Vec<i64>,
    },

    /// Show the current sort state of a session.
    Status {
        session: i64,
    },

    /// Summarize one article.
    Summarize {
        article: i64,

        /// Regenerate even if a summary is cached.
        #[arg(long)]
        no_cache: bool,
    },

    /// Generate study notes for one article.
    Notes {
        article: i64,
    },

    /// Show database statistics.
    Stats {
        /// Day to count sorted articles for (YYYY-MM-DD, default today).
        #[arg(long)]
        date: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Sort { session, articles } => {
            sort_cmd::run_sort(&cfg, session, articles).await?;
        }
        Commands::Status { session } => {
            sort_cmd::run_status(&cfg, session).await?;
        }
        Commands::Summarize { article, no_cache } => {
            sort_cmd::run_summarize(&cfg, article, !no_cache).await?;
        }
        Commands::Notes { article } => {
            sort_cmd::run_notes(&cfg, article).await?;
        }
        Commands::Stats { date } => {
            stats::run_stats(&cfg, date.as_deref()).await?;
        }
    }

    Ok(())
}
