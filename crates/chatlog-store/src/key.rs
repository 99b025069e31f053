//! Conversation identity and the on-disk layout derived from it.
//!
//! ```text
//! unscoped:  <export>/index.html
//! scoped:    <export>/guild-<guild>/channel-<channel>.html
//! ```

use crate::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const UNSCOPED_DOCUMENT: &str = "index.html";
const GUILD_DIR_PREFIX: &str = "guild-";
const CHANNEL_FILE_PREFIX: &str = "channel-";

// ============================================================================
// Layout
// ============================================================================

/// How conversations map onto transcript documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// One transcript for the whole deployment.
    Unscoped,
    /// One directory per guild, one transcript per channel inside it.
    #[default]
    Scoped,
}

impl Layout {
    /// Map a key onto the key this layout actually writes to.
    ///
    /// In unscoped mode every conversation shares the global document, so every key collapses
    /// to [`ConversationKey::Global`]. This also means all of them share one lock.
    ///
    /// The scoped layout has no global document; [`ConversationKey::Global`] is rejected there
    /// rather than written next to the guild directories.
    pub fn scope(self, key: &ConversationKey) -> Result<ConversationKey> {
        match (self, key) {
            (Layout::Unscoped, _) => Ok(ConversationKey::Global),
            (Layout::Scoped, ConversationKey::Global) => Err(StoreError::MalformedIdentity {
                field: "guild",
                value: String::new(),
                reason: "missing",
            }),
            (Layout::Scoped, key) => Ok(key.clone()),
        }
    }
}

impl FromStr for Layout {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unscoped" => Ok(Layout::Unscoped),
            "scoped" => Ok(Layout::Scoped),
            other => Err(format!(
                "unknown layout '{other}' (expected 'scoped' or 'unscoped')"
            )),
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Unscoped => f.write_str("unscoped"),
            Layout::Scoped => f.write_str("scoped"),
        }
    }
}

// ============================================================================
// Conversation Keys
// ============================================================================

/// Identifies one transcript target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKey {
    /// The single deployment-wide transcript.
    Global,
    /// One channel inside one guild, addressed by human-readable names.
    Channel { guild: String, channel: String },
}

impl ConversationKey {
    pub fn channel(guild: impl Into<String>, channel: impl Into<String>) -> Self {
        ConversationKey::Channel {
            guild: guild.into(),
            channel: channel.into(),
        }
    }

    /// Reject identities that cannot name a directory entry under the export root.
    ///
    /// Names are otherwise used verbatim; there is no sanitization.
    pub fn validate(&self) -> Result<()> {
        match self {
            ConversationKey::Global => Ok(()),
            ConversationKey::Channel { guild, channel } => {
                validate_name("guild", guild)?;
                validate_name("channel", channel)
            }
        }
    }

    /// Human-readable title written into the document `<title>`.
    pub fn title(&self) -> String {
        match self {
            ConversationKey::Global => "Transcript".to_string(),
            ConversationKey::Channel { guild, channel } => format!("{guild} #{channel}"),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationKey::Global => f.write_str("global"),
            ConversationKey::Channel { guild, channel } => write!(f, "{guild}#{channel}"),
        }
    }
}

fn validate_name(field: &'static str, value: &str) -> Result<()> {
    let reason = if value.is_empty() {
        "empty"
    } else if value == "." || value == ".." {
        "relative path component"
    } else if value.contains(['/', '\\']) {
        "contains a path separator"
    } else if value.contains('\0') {
        "contains NUL"
    } else {
        return Ok(());
    };

    Err(StoreError::MalformedIdentity {
        field,
        value: value.to_string(),
        reason,
    })
}

// ============================================================================
// Path Resolution
// ============================================================================

/// Where one conversation's transcript lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPaths {
    /// Folder holding the document (created lazily, never deleted).
    pub directory: PathBuf,
    /// The transcript itself.
    pub document: PathBuf,
}

/// Pure mapping from a key to its directory and document under `export_dir`.
pub fn resolve(export_dir: &Path, key: &ConversationKey) -> DocumentPaths {
    match key {
        ConversationKey::Global => DocumentPaths {
            directory: export_dir.to_path_buf(),
            document: export_dir.join(UNSCOPED_DOCUMENT),
        },
        ConversationKey::Channel { guild, channel } => {
            let directory = export_dir.join(format!("{GUILD_DIR_PREFIX}{guild}"));
            let document = directory.join(format!("{CHANNEL_FILE_PREFIX}{channel}.html"));
            DocumentPaths {
                directory,
                document,
            }
        }
    }
}
