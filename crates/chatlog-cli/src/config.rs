//! Store configuration: an optional JSON file overlaid by command-line flags.

use anyhow::{Context, Result};
use chatlog_store::{Layout, MarkerPolicy, StoreConfig, WriteDurability};
use clap::Args;
use std::fs;
use std::path::PathBuf;

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreArgs {
    /// JSON file with store settings (`export_dir`, `layout`, `durability`,
    /// `on_missing_marker`). Flags below override it.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Root folder transcripts are written under (default: ./export).
    #[arg(long, global = true)]
    pub export_dir: Option<PathBuf>,

    /// `scoped` (one file per guild channel) or `unscoped` (one file overall).
    #[arg(long, global = true)]
    pub layout: Option<Layout>,

    /// fsync every rewrite before it replaces the transcript.
    #[arg(long, global = true)]
    pub durable_writes: bool,

    /// Restore a missing `<!-- Messages -->` marker instead of failing the append.
    #[arg(long, global = true)]
    pub repair_missing_marker: bool,
}

impl StoreArgs {
    pub fn resolve(&self) -> Result<StoreConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => StoreConfig::default(),
        };

        if let Some(dir) = &self.export_dir {
            config.export_dir = dir.clone();
        }
        if let Some(layout) = self.layout {
            config.layout = layout;
        }
        if self.durable_writes {
            config.durability = WriteDurability::Durable;
        }
        if self.repair_missing_marker {
            config.on_missing_marker = MarkerPolicy::Repair;
        }
        Ok(config)
    }
}
