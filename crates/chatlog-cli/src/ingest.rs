//! Event adapter: read JSON Lines events and record every human-authored message.

use crate::dispatch::{DispatchReport, Dispatcher};
use crate::events::parse_line;
use anyhow::{Context, Result};
use chatlog_store::TranscriptStore;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    pub appended: usize,
    /// Bot messages and lines that were not valid events.
    pub skipped: usize,
    pub failed: usize,
    pub conversations: usize,
}

/// Drain `input` into the store. Per-event problems are logged and counted; only a failure to
/// read the input itself is returned as an error, after everything already queued is recorded.
pub async fn ingest<R>(store: Arc<TranscriptStore>, mut input: R) -> Result<IngestSummary>
where
    R: AsyncBufRead + Unpin,
{
    let layout = store.config().layout;
    let mut dispatcher = Dispatcher::new(store);
    let mut summary = IngestSummary::default();
    let mut buf = Vec::new();
    let mut line_no = 0usize;

    loop {
        buf.clear();
        match input.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                let report = dispatcher.finish().await;
                summary.absorb(report);
                tracing::error!(
                    line = line_no + 1,
                    appended = summary.appended,
                    "event stream broke off"
                );
                return Err(err).context("reading events");
            }
        }
        line_no += 1;

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim_end_matches(['\n', '\r']),
            Err(err) => {
                tracing::warn!(line = line_no, error = %err, "skipping line that is not UTF-8");
                summary.skipped += 1;
                continue;
            }
        };

        let event = match parse_line(line) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(err) => {
                tracing::warn!(line = line_no, error = %format!("{err:#}"), "skipping unreadable event");
                summary.skipped += 1;
                continue;
            }
        };

        if event.bot {
            tracing::trace!(line = line_no, author = %event.author, "ignoring bot message");
            summary.skipped += 1;
            continue;
        }

        match event.key(layout) {
            Ok(key) => dispatcher.submit(key, event.author, event.content, line_no),
            Err(err) => {
                tracing::error!(line = line_no, error = %err, "event has no usable conversation");
                summary.failed += 1;
            }
        }
    }

    summary.absorb(dispatcher.finish().await);
    Ok(summary)
}

impl IngestSummary {
    fn absorb(&mut self, report: DispatchReport) {
        self.appended = report.appended;
        self.failed += report.failed;
        self.conversations = report.conversations;
    }
}
