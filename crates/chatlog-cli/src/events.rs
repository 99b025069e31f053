//! Message-arrived events, one JSON object per line.
//!
//! ```text
//! {"guild": "G1", "channel": "general", "author": "alice", "bot": false, "content": "hi"}
//! ```

use anyhow::{Context, Result};
use chatlog_store::{ConversationKey, Layout, StoreError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEvent {
    #[serde(default)]
    pub guild: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    pub author: String,
    /// Automated participants are never recorded.
    #[serde(default)]
    pub bot: bool,
    #[serde(default)]
    pub content: String,
}

impl ChatEvent {
    /// The conversation this event belongs to under `layout`.
    ///
    /// Scoped deployments need both names; whether they are usable is up to the store.
    pub fn key(&self, layout: Layout) -> Result<ConversationKey, StoreError> {
        match layout {
            Layout::Unscoped => Ok(ConversationKey::Global),
            Layout::Scoped => {
                let guild = self.guild.as_deref().ok_or_else(|| missing("guild"))?;
                let channel = self.channel.as_deref().ok_or_else(|| missing("channel"))?;
                Ok(ConversationKey::channel(guild, channel))
            }
        }
    }
}

fn missing(field: &'static str) -> StoreError {
    StoreError::MalformedIdentity {
        field,
        value: String::new(),
        reason: "missing",
    }
}

/// Parse one input line; blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ChatEvent>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let event = serde_json::from_str(line).context("invalid event JSON")?;
    Ok(Some(event))
}
