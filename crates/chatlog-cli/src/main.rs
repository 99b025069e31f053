//! Chatlog CLI
//!
//! Records chat conversations as append-only HTML transcripts:
//! - `ingest`: read message events (JSON Lines) from stdin or a file and append each one
//! - `init` / `append` / `path`: work with a single conversation's transcript

use anyhow::{Context, Result};
use chatlog_store::{ConversationKey, TranscriptStore};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::BufReader;

mod config;
mod dispatch;
mod events;
mod ingest;
mod logging;

#[derive(Parser, Debug)]
#[command(name = "chatlog")]
#[command(author, version, about = "Chatlog: append-only HTML transcripts for chat conversations")]
struct Cli {
    #[command(flatten)]
    store: config::StoreArgs,

    /// Debug-level diagnostics (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Record every message event read as JSON Lines.
    ///
    /// One object per line: {"guild", "channel", "author", "bot", "content"}.
    /// Bot messages are skipped; failed events are logged and counted.
    Ingest {
        /// Events file (default: stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Create the transcript skeleton for a conversation if it does not exist yet.
    Init {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Append one message to a conversation's transcript.
    Append {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long)]
        author: String,
        #[arg(long, default_value = "")]
        message: String,
    },

    /// Print where a conversation's transcript lives.
    Path {
        #[command(flatten)]
        target: TargetArgs,
    },
}

/// Which conversation to act on. Omit both for the global transcript, which only the unscoped
/// layout has.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
struct TargetArgs {
    #[arg(long, requires = "channel")]
    guild: Option<String>,
    #[arg(long, requires = "guild")]
    channel: Option<String>,
}

impl TargetArgs {
    fn key(&self) -> ConversationKey {
        match (&self.guild, &self.channel) {
            (Some(guild), Some(channel)) => ConversationKey::channel(guild, channel),
            _ => ConversationKey::Global,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    let config = cli.store.resolve()?;
    tracing::debug!(
        export_dir = %config.export_dir.display(),
        layout = %config.layout,
        "store configured"
    );
    let store = Arc::new(TranscriptStore::new(config));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;

    runtime.block_on(async move {
        match cli.command {
            Commands::Ingest { input } => cmd_ingest(store, input.as_deref()).await,
            Commands::Init { target } => cmd_init(&store, &target.key()).await,
            Commands::Append {
                target,
                author,
                message,
            } => cmd_append(&store, &target.key(), &author, &message).await,
            Commands::Path { target } => cmd_path(&store, &target.key()),
        }
    })
}

async fn cmd_ingest(store: Arc<TranscriptStore>, input: Option<&Path>) -> Result<()> {
    let summary = match input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?;
            ingest::ingest(store, BufReader::new(file)).await?
        }
        None => ingest::ingest(store, BufReader::new(tokio::io::stdin())).await?,
    };

    let failed = if summary.failed > 0 {
        summary.failed.to_string().red().bold()
    } else {
        summary.failed.to_string().normal()
    };
    eprintln!(
        "{} {} message(s) across {} conversation(s); skipped {}, failed {}",
        "recorded".green().bold(),
        summary.appended,
        summary.conversations,
        summary.skipped,
        failed
    );
    Ok(())
}

async fn cmd_init(store: &TranscriptStore, key: &ConversationKey) -> Result<()> {
    let paths = store
        .ensure(key)
        .await
        .with_context(|| format!("initializing transcript for {key}"))?;
    println!("{}", paths.document.display());
    Ok(())
}

async fn cmd_append(
    store: &TranscriptStore,
    key: &ConversationKey,
    author: &str,
    message: &str,
) -> Result<()> {
    let receipt = store
        .append_message(key, author, message)
        .await
        .with_context(|| format!("appending to {key}"))?;
    eprintln!(
        "{} {}:{}",
        "wrote".green().bold(),
        receipt.document.display().to_string().bold(),
        receipt.line
    );
    Ok(())
}

fn cmd_path(store: &TranscriptStore, key: &ConversationKey) -> Result<()> {
    let paths = store.paths(key)?;
    println!("{}", paths.document.display());
    Ok(())
}
