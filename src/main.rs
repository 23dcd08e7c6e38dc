// src/main.rs
//! LURE repository index - CLI entry point

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use lure_index::{pull, server, Config, Database, Package, SyncPolicy};
use std::io;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "lure-index")]
#[command(version)]
#[command(about = "Repository index for the LURE user package repository", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync cycle over the configured repositories
    Sync {
        /// Path to the index store
        #[arg(short, long, default_value = "/var/lib/lure/db")]
        db_path: String,

        /// Directory holding repository clones
        #[arg(short, long, default_value = "/var/lib/lure/repo")]
        repo_dir: String,

        /// Repository to sync, as name=url (repeatable; defaults to
        /// LURE_API_REPO)
        #[arg(long = "repo")]
        repos: Vec<String>,

        /// Keep syncing remaining repositories when one fails
        #[arg(long)]
        keep_going: bool,
    },

    /// Serve the webhook endpoint and sync on push events
    Serve {
        /// Path to the index store
        #[arg(short, long, default_value = "/var/lib/lure/db")]
        db_path: String,

        /// Directory holding repository clones
        #[arg(short, long, default_value = "/var/lib/lure/repo")]
        repo_dir: String,

        /// Address to bind to
        #[arg(short, long, default_value = "0.0.0.0:8080")]
        addr: SocketAddr,
    },

    /// Look up a package in the index
    Query {
        /// Package name
        name: String,

        /// Path to the index store
        #[arg(short, long, default_value = "/var/lib/lure/db")]
        db_path: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sync {
            db_path,
            repo_dir,
            repos,
            keep_going,
        } => cmd_sync(&db_path, &repo_dir, &repos, keep_going),

        Commands::Serve {
            db_path,
            repo_dir,
            addr,
        } => {
            let config = Config::new(db_path, repo_dir);
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(server::run_server(config, addr))?;
            Ok(())
        }

        Commands::Query { name, db_path } => cmd_query(&name, &db_path),

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "lure-index", &mut io::stdout());
            Ok(())
        }
    }
}

fn cmd_sync(db_path: &str, repo_dir: &str, repos: &[String], keep_going: bool) -> Result<()> {
    let mut config = Config::new(db_path, repo_dir);
    for entry in repos {
        let (name, url) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("--repo takes name=url, got {entry}"))?;
        config.repos.push(lure_index::Repo {
            name: name.to_string(),
            url: url.to_string(),
        });
    }

    if config.repos.is_empty() {
        anyhow::bail!("no repositories configured; pass --repo or set LURE_API_REPO");
    }

    let db = Database::open(&config.db_path)?;
    let policy = SyncPolicy {
        abort_cycle_on_repo_failure: !keep_going,
    };
    pull(&CancellationToken::new(), &db, &config, &policy)?;
    Ok(())
}

fn cmd_query(name: &str, db_path: &str) -> Result<()> {
    let db = Database::open(db_path)?;
    let pkgs = Package::query(&db, "name = ?1", &[&name])?;

    if pkgs.is_empty() {
        println!("no package named {name}");
        return Ok(());
    }
    for pkg in pkgs {
        println!("{}", serde_json::to_string_pretty(&pkg)?);
    }
    Ok(())
}
