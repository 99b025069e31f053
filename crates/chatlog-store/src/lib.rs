//! Chatlog Transcript Store
//!
//! Maps conversations onto append-only HTML transcripts:
//!
//! ```text
//! ┌──────────────┐    ┌────────────────┐    ┌──────────────────────────────┐
//! │  message     │───►│  KeyedGuard    │───►│  ensure skeleton             │
//! │  (key, line) │    │  (one lock per │    │  read → insert above marker  │
//! └──────────────┘    │  conversation) │    │  → atomic rewrite            │
//!                     └────────────────┘    └──────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **Serialized per conversation**: the whole ensure/read/modify/write cycle runs under the
//!   conversation's lock, so same-key appends never lose or duplicate entries
//! - **Independent conversations**: different keys never wait on each other
//! - **One marker**: every document keeps exactly one `<!-- Messages -->` line, below all
//!   entries, which appear in the order their appends acquired the lock

pub mod document;
pub mod guard;
pub mod key;


pub use document::{escape_html, render_entry, skeleton, WriteDurability, MESSAGES_MARKER};
pub use guard::KeyedGuard;
pub use key::{resolve, ConversationKey, DocumentPaths, Layout};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Directory/file creation, read or write failed.
    #[error("storage unavailable at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An existing document has no messages marker to insert above.
    #[error("transcript {} has no messages marker", path.display())]
    MarkerMissing { path: PathBuf },

    #[error("malformed conversation identity: {field} {value:?} is {reason}")]
    MalformedIdentity {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("invalid entry: {0}")]
    InvalidEntry(&'static str),
}

pub type Result<T> = std::result::Result<T, StoreError>;

// ============================================================================
// Configuration
// ============================================================================

/// What to do when an existing transcript has lost its marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerPolicy {
    /// Fail the append with [`StoreError::MarkerMissing`] and leave the file alone.
    #[default]
    Reject,
    /// Put the marker back (above `</body>`, or with fresh closing tags) and append.
    Repair,
}

/// Configuration for the transcript store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root folder all transcripts live under
    pub export_dir: PathBuf,
    /// One global transcript or one per channel
    pub layout: Layout,
    pub durability: WriteDurability,
    pub on_missing_marker: MarkerPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            export_dir: PathBuf::from("./export"),
            layout: Layout::Scoped,
            durability: WriteDurability::Fast,
            on_missing_marker: MarkerPolicy::Reject,
        }
    }
}

// ============================================================================
// Transcript Store
// ============================================================================

/// Where an append landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendReceipt {
    pub document: PathBuf,
    /// 1-based line number of the new entry.
    pub line: usize,
}

/// The transcript log store. Share it behind an `Arc`; all methods take `&self`.
pub struct TranscriptStore {
    config: StoreConfig,
    guard: KeyedGuard<ConversationKey>,
}

impl TranscriptStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            guard: KeyedGuard::new(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Validate `key` and map it onto the key the configured layout writes to.
    fn scoped(&self, key: &ConversationKey) -> Result<ConversationKey> {
        let key = self.config.layout.scope(key)?;
        key.validate()?;
        Ok(key)
    }

    /// Resolve the document for `key` without touching the filesystem.
    pub fn paths(&self, key: &ConversationKey) -> Result<DocumentPaths> {
        let key = self.scoped(key)?;
        Ok(resolve(&self.config.export_dir, &key))
    }

    /// Make sure the directory and skeleton for `key` exist. Idempotent.
    pub async fn ensure(&self, key: &ConversationKey) -> Result<DocumentPaths> {
        let key = self.scoped(key)?;
        let paths = resolve(&self.config.export_dir, &key);
        self.guard
            .with_lock(&key, || self.ensure_locked(&key, &paths))
            .await?;
        Ok(paths)
    }

    /// Render `author`/`text` and append it to the conversation's transcript.
    pub async fn append_message(
        &self,
        key: &ConversationKey,
        author: &str,
        text: &str,
    ) -> Result<AppendReceipt> {
        self.append(key, &render_entry(author, text)).await
    }

    /// Append one pre-rendered line above the messages marker.
    pub async fn append(&self, key: &ConversationKey, entry: &str) -> Result<AppendReceipt> {
        document::check_entry(entry)?;
        let key = self.scoped(key)?;
        let paths = resolve(&self.config.export_dir, &key);
        self.guard
            .with_lock(&key, || self.append_locked(&key, &paths, entry))
            .await
    }

    /// Number of conversations that have been locked at least once.
    pub fn open_conversations(&self) -> usize {
        self.guard.units()
    }

    async fn ensure_locked(&self, key: &ConversationKey, paths: &DocumentPaths) -> Result<()> {
        let created =
            document::ensure_document(paths, &key.title(), self.config.durability).await?;
        if created {
            tracing::info!(
                conversation = %key,
                path = %paths.document.display(),
                "created transcript"
            );
        }
        Ok(())
    }

    async fn append_locked(
        &self,
        key: &ConversationKey,
        paths: &DocumentPaths,
        entry: &str,
    ) -> Result<AppendReceipt> {
        self.ensure_locked(key, paths).await?;

        let content = document::read_document(&paths.document).await?;
        let (updated, line) = match document::insert_entry(&content, entry) {
            Some(done) => done,
            None => self.recover_marker(&paths.document, &content, entry)?,
        };

        document::write_atomic(&paths.document, &updated, self.config.durability).await?;
        tracing::debug!(
            conversation = %key,
            path = %paths.document.display(),
            line,
            "appended entry"
        );

        Ok(AppendReceipt {
            document: paths.document.clone(),
            line,
        })
    }

    fn recover_marker(&self, path: &Path, content: &str, entry: &str) -> Result<(String, usize)> {
        let missing = || StoreError::MarkerMissing {
            path: path.to_path_buf(),
        };

        match self.config.on_missing_marker {
            MarkerPolicy::Reject => Err(missing()),
            MarkerPolicy::Repair => {
                tracing::warn!(path = %path.display(), "messages marker missing; restoring it");
                let restored = document::restore_marker(content);
                document::insert_entry(&restored, entry).ok_or_else(missing)
            }
        }
    }
}

// ============================================================================
// Convenience Functions
// ============================================================================

/// Create a store for `export_dir` with the given layout and default policies.
pub fn open_store(export_dir: impl AsRef<Path>, layout: Layout) -> TranscriptStore {
    TranscriptStore::new(StoreConfig {
        export_dir: export_dir.as_ref().to_path_buf(),
        layout,
        ..Default::default()
    })
}
