//! Integration tests for the transcript store as an embedding application uses it
//!
//! Run with: cargo test --test integration_tests

use chatlog_store::{
    open_store, ConversationKey, Layout, MarkerPolicy, StoreConfig, StoreError, TranscriptStore,
    MESSAGES_MARKER,
};
use std::sync::Arc;
use tempfile::tempdir;

fn entries(doc: &str) -> Vec<String> {
    doc.lines()
        .filter(|l| l.trim_start().starts_with("<p>"))
        .map(str::to_string)
        .collect()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_scenario_unscoped_first_message() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path(), Layout::Unscoped);

    store
        .append_message(&ConversationKey::Global, "alice", "hi")
        .await
        .unwrap();

    let doc = std::fs::read_to_string(dir.path().join("index.html")).unwrap();
    let expected = "<!DOCTYPE html>\n<html lang=\"en\">\n\t<head>\n\t\t<meta charset=\"UTF-8\">\n\
        \t\t<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
        \t\t<title>Transcript</title>\n\t</head>\n\n\t<body>\n\
        \t\t<p><strong>alice:</strong> hi</p>\n\
        \t\t<!-- Messages -->\n\t</body>\n</html>\n";
    assert_eq!(doc, expected);
}

#[tokio::test]
async fn test_scenario_guild_layout() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path(), Layout::Scoped);

    for (guild, channel) in [("G1", "general"), ("G1", "random"), ("G2", "general")] {
        store
            .append_message(&ConversationKey::channel(guild, channel), "u", channel)
            .await
            .unwrap();
    }

    assert!(dir.path().join("guild-G1/channel-general.html").is_file());
    assert!(dir.path().join("guild-G1/channel-random.html").is_file());
    assert!(dir.path().join("guild-G2/channel-general.html").is_file());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
}

#[tokio::test]
async fn test_scenario_marker_removed_by_hand() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path(), Layout::Scoped);
    let key = ConversationKey::channel("G1", "general");

    let receipt = store.append_message(&key, "alice", "kept").await.unwrap();
    let edited = std::fs::read_to_string(&receipt.document)
        .unwrap()
        .replace(MESSAGES_MARKER, "<!-- gone -->");
    std::fs::write(&receipt.document, &edited).unwrap();

    let err = store.append_message(&key, "bob", "dropped?").await.unwrap_err();
    assert!(matches!(err, StoreError::MarkerMissing { .. }));
    assert!(err.to_string().contains("no messages marker"));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_conversations_under_load() {
    let dir = tempdir().unwrap();
    let store = Arc::new(TranscriptStore::new(StoreConfig {
        export_dir: dir.path().to_path_buf(),
        layout: Layout::Scoped,
        on_missing_marker: MarkerPolicy::Reject,
        ..Default::default()
    }));

    let channels = ["a", "b", "c", "d"];
    let per_channel = 12;

    let mut handles = Vec::new();
    for channel in channels {
        for i in 0..per_channel {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .append_message(
                        &ConversationKey::channel("Load", channel),
                        "u",
                        &format!("{channel}{i}"),
                    )
                    .await
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for channel in channels {
        let path = store
            .paths(&ConversationKey::channel("Load", channel))
            .unwrap()
            .document;
        let doc = std::fs::read_to_string(path).unwrap();
        let mut got = entries(&doc);
        assert_eq!(got.len(), per_channel);
        got.sort();
        got.dedup();
        assert_eq!(got.len(), per_channel, "no duplicates in {channel}");
        assert_eq!(doc.matches(MESSAGES_MARKER).count(), 1);
        assert!(got.iter().all(|e| e.contains(&format!("> {channel}"))));
    }
    assert_eq!(store.open_conversations(), channels.len());
}
