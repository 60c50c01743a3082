//! WebAdmin Files
//!
//! Command line access to the policy-enforced files core.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use admin::commands::{format_claims, format_progress, App, EntryInfo, ListOptions};
use admin::config::Config;
use clap::{Parser, Subcommand};
use files::{FilesError, TransferOperation};

/// How often a running transfer reports progress.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// WebAdmin Files - inspect and manage files under configured locations.
#[derive(Parser, Debug)]
#[command(name = "webadmin-files")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Show the claims granted on a path
    Claims {
        /// Path to check
        path: PathBuf,
    },

    /// Show metadata for a file or directory
    Stat {
        /// Path to inspect
        path: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the contents of a directory
    List {
        /// Directory to list
        path: PathBuf,

        /// Glob matched against entry names
        #[arg(long, short, default_value = "*")]
        pattern: String,

        /// Include all subdirectories
        #[arg(long, short)]
        recursive: bool,

        /// List directories instead of files
        #[arg(long)]
        dirs: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Copy a file or directory tree
    Copy {
        source: PathBuf,
        destination: PathBuf,
    },

    /// Move a file or directory tree
    Move {
        source: PathBuf,
        destination: PathBuf,
    },

    /// Delete a file or directory tree
    Delete {
        path: PathBuf,
    },

    /// Create a directory and any missing parents
    Mkdir {
        path: PathBuf,
    },

    /// Create a file or update its modification time
    Touch {
        path: PathBuf,

        /// Modification time in seconds since the Unix epoch (default: now)
        #[arg(long)]
        modified: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Validate configuration
    config.validate()?;

    // Initialize tracing
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.daemon.log_level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(config_path) = &cli.config {
        tracing::debug!("Using config file: {:?}", config_path);
    }

    let app = App::new(&config);

    match cli.command {
        Commands::Claims { path } => {
            println!("{}", format_claims(&app.claims(&path)));
        }
        Commands::Stat { path, json } => {
            let info = app.stat(&path)?;
            print_entries(std::slice::from_ref(&info), json)?;
        }
        Commands::List {
            path,
            pattern,
            recursive,
            dirs,
            json,
        } => {
            let options = ListOptions {
                pattern,
                recursive,
                directories: dirs,
            };
            let entries = app.list(&path, &options)?;
            if entries.is_empty() && !json {
                println!("No entries.");
            } else {
                print_entries(&entries, json)?;
            }
        }
        Commands::Copy {
            source,
            destination,
        } => {
            let operation = app.copy(&source, &destination).await?;
            follow_transfer(operation).await?;
        }
        Commands::Move {
            source,
            destination,
        } => {
            let operation = app.move_to(&source, &destination).await?;
            follow_transfer(operation).await?;
        }
        Commands::Delete { path } => {
            app.delete(&path).await?;
            println!("Deleted {}", path.display());
        }
        Commands::Mkdir { path } => {
            let info = app.mkdir(&path).await?;
            println!("{info}");
        }
        Commands::Touch { path, modified } => {
            let info = app.touch(&path, modified).await?;
            println!("{info}");
        }
    }

    Ok(())
}

fn print_entries(entries: &[EntryInfo], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(entries)?);
    } else {
        for entry in entries {
            println!("{entry}");
        }
    }
    Ok(())
}

/// Report progress until the transfer finishes; Ctrl-C cancels it.
async fn follow_transfer(operation: Arc<TransferOperation>) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    let mut cancelled = false;

    let wait = operation.wait();
    tokio::pin!(wait);

    let result = loop {
        tokio::select! {
            result = &mut wait => break result,
            _ = ticker.tick() => eprintln!("{}", format_progress(&operation)),
            _ = tokio::signal::ctrl_c(), if !cancelled => {
                eprintln!("Cancelling transfer {}...", operation.id());
                operation.cancel();
                cancelled = true;
            }
        }
    };

    match result {
        Ok(()) => {
            println!("{}", format_progress(&operation));
            Ok(())
        }
        Err(FilesError::Cancelled) => {
            anyhow::bail!("Transfer {} was cancelled", operation.id())
        }
        Err(e) => Err(anyhow::Error::new(e)
            .context(format!("Transfer {} failed", operation.id()))),
    }
}
