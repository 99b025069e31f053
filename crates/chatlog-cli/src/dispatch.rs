//! Routes events to one worker task per conversation.
//!
//! Each conversation gets an unbounded queue drained by its own task, so events for one
//! conversation reach the store in arrival order while different conversations are written
//! concurrently. The store's per-conversation lock is still what makes each append safe.

use chatlog_store::{ConversationKey, TranscriptStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

#[derive(Debug)]
struct QueuedMessage {
    author: String,
    text: String,
    /// Input line the event came from, for diagnostics.
    line: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub appended: usize,
    pub failed: usize,
    pub conversations: usize,
}

pub struct Dispatcher {
    store: Arc<TranscriptStore>,
    queues: HashMap<ConversationKey, mpsc::UnboundedSender<QueuedMessage>>,
    workers: JoinSet<DispatchReport>,
    /// Messages that never reached a worker.
    undelivered: usize,
}

impl Dispatcher {
    pub fn new(store: Arc<TranscriptStore>) -> Self {
        Self {
            store,
            queues: HashMap::new(),
            workers: JoinSet::new(),
            undelivered: 0,
        }
    }

    /// Queue a message behind everything already submitted for `key`.
    pub fn submit(&mut self, key: ConversationKey, author: String, text: String, line: usize) {
        let queue = self.queues.entry(key.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            self.workers
                .spawn(run_worker(Arc::clone(&self.store), key.clone(), rx));
            tx
        });

        if queue.send(QueuedMessage { author, text, line }).is_err() {
            tracing::error!(conversation = %key, line, "conversation worker is gone; message dropped");
            self.undelivered += 1;
        }
    }

    /// Close every queue and wait for the workers to drain them.
    pub async fn finish(mut self) -> DispatchReport {
        let mut total = DispatchReport {
            failed: self.undelivered,
            conversations: self.queues.len(),
            ..Default::default()
        };
        self.queues.clear();

        while let Some(joined) = self.workers.join_next().await {
            match joined {
                Ok(report) => {
                    total.appended += report.appended;
                    total.failed += report.failed;
                }
                Err(err) => tracing::error!(error = %err, "conversation worker crashed"),
            }
        }
        total
    }
}

async fn run_worker(
    store: Arc<TranscriptStore>,
    key: ConversationKey,
    mut queue: mpsc::UnboundedReceiver<QueuedMessage>,
) -> DispatchReport {
    let mut report = DispatchReport::default();
    while let Some(message) = queue.recv().await {
        match store
            .append_message(&key, &message.author, &message.text)
            .await
        {
            Ok(receipt) => {
                report.appended += 1;
                tracing::debug!(
                    conversation = %key,
                    line = message.line,
                    document = %receipt.document.display(),
                    "recorded message"
                );
            }
            Err(err) => {
                report.failed += 1;
                tracing::error!(
                    conversation = %key,
                    line = message.line,
                    error = %err,
                    "failed to record message"
                );
            }
        }
    }
    report
}
