//! Transcript documents: skeleton, entry rendering, marker insertion and atomic rewrite.

use crate::{DocumentPaths, Result, StoreError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Sentinel comment; every entry is inserted on the line directly above it.
pub const MESSAGES_MARKER: &str = "<!-- Messages -->";

const ENTRY_INDENT: &str = "\t\t";
const BODY_CLOSE: &str = "</body>";

/// Whether rewrites are fsynced before they replace the document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteDurability {
    #[default]
    Fast,
    /// `sync_all` the new contents before the rename and after creating a skeleton.
    Durable,
}

// ============================================================================
// Markup
// ============================================================================

/// The document written the first time a conversation is seen.
pub fn skeleton(title: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n\t<head>\n\t\t<meta charset=\"UTF-8\">\n\
         \t\t<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
         \t\t<title>{}</title>\n\t</head>\n\n\t<body>\n\t\t{MESSAGES_MARKER}\n\t</body>\n</html>\n",
        escape_html(title)
    )
}

/// Render one message as a single line of markup.
pub fn render_entry(author: &str, text: &str) -> String {
    format!(
        "{ENTRY_INDENT}<p><strong>{}:</strong> {}</p>",
        escape_html(author),
        escape_html(text)
    )
}

/// Escape markup-significant characters. Line breaks become `<br>` so the result is one line.
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("<br>");
            }
            '\n' => out.push_str("<br>"),
            _ => out.push(c),
        }
    }
    out
}

/// Check a pre-rendered entry before it goes anywhere near a document.
pub(crate) fn check_entry(entry: &str) -> Result<()> {
    if entry.contains(['\n', '\r']) {
        return Err(StoreError::InvalidEntry("entry spans more than one line"));
    }
    if entry.contains(MESSAGES_MARKER) {
        return Err(StoreError::InvalidEntry("entry contains the messages marker"));
    }
    Ok(())
}

// ============================================================================
// Line Editing
// ============================================================================

/// Insert `line` directly above the last line containing `needle`.
///
/// Every byte outside the inserted line is preserved, including CRLF endings and the presence
/// or absence of a trailing newline. Returns the new content and the 1-based line number of
/// the inserted line.
fn insert_above(content: &str, needle: &str, line: &str) -> Option<(String, usize)> {
    let hit = content.rfind(needle)?;
    let line_start = content[..hit].rfind('\n').map_or(0, |nl| nl + 1);
    let target = content[line_start..].split('\n').next().unwrap_or_default();
    let eol = if target.ends_with('\r') { "\r\n" } else { "\n" };

    let mut out = String::with_capacity(content.len() + line.len() + eol.len());
    out.push_str(&content[..line_start]);
    out.push_str(line);
    out.push_str(eol);
    out.push_str(&content[line_start..]);

    let line_no = content[..line_start].matches('\n').count() + 1;
    Some((out, line_no))
}

/// Insert an entry above the messages marker; `None` when the marker is gone.
pub(crate) fn insert_entry(content: &str, entry: &str) -> Option<(String, usize)> {
    insert_above(content, MESSAGES_MARKER, entry)
}

/// Put a missing marker back: above the last `</body>` if there is one, otherwise append the
/// marker together with the closing structure. A `</body>` sharing its line with other markup
/// is split onto its own line first so the marker stays inside the body.
pub(crate) fn restore_marker(content: &str) -> String {
    let marker_line = format!("{ENTRY_INDENT}{MESSAGES_MARKER}");
    if let Some(close) = content.rfind(BODY_CLOSE) {
        let line_start = content[..close].rfind('\n').map_or(0, |i| i + 1);
        if content[line_start..close].trim().is_empty() {
            if let Some((restored, _)) = insert_above(content, BODY_CLOSE, &marker_line) {
                return restored;
            }
        }
        let mut restored = String::with_capacity(content.len() + marker_line.len() + 2);
        restored.push_str(&content[..close]);
        restored.push('\n');
        restored.push_str(&marker_line);
        restored.push('\n');
        restored.push_str(&content[close..]);
        return restored;
    }

    let mut restored = content.to_string();
    if !restored.is_empty() && !restored.ends_with('\n') {
        restored.push('\n');
    }
    restored.push_str(&marker_line);
    restored.push_str("\n\t</body>\n</html>\n");
    restored
}

// ============================================================================
// Filesystem
// ============================================================================

fn storage_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Storage {
        path: path.to_path_buf(),
        source,
    }
}

/// Create the directory and the skeleton if absent. Returns `true` when a skeleton was written.
///
/// An existing document is left untouched and not inspected. The skeleton is written to a
/// sibling temp file and published with a hard link, so the document either appears complete
/// or not at all, and a document that appears concurrently is never overwritten.
pub(crate) async fn ensure_document(
    paths: &DocumentPaths,
    title: &str,
    durability: WriteDurability,
) -> Result<bool> {
    fs::create_dir_all(&paths.directory)
        .await
        .map_err(storage_err(&paths.directory))?;

    if fs::try_exists(&paths.document)
        .await
        .map_err(storage_err(&paths.document))?
    {
        return Ok(false);
    }

    let tmp = temp_path_for(&paths.document);
    let published = async {
        write_temp(&tmp, &skeleton(title), durability).await?;
        fs::hard_link(&tmp, &paths.document).await
    }
    .await;
    let _ = fs::remove_file(&tmp).await;

    match published {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(storage_err(&paths.document)(err)),
    }
}

pub(crate) async fn read_document(path: &Path) -> Result<String> {
    fs::read_to_string(path).await.map_err(storage_err(path))
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.tmp", std::process::id()))
}

async fn write_temp(tmp: &Path, contents: &str, durability: WriteDurability) -> std::io::Result<()> {
    let mut file = fs::File::create(tmp).await?;
    file.write_all(contents.as_bytes()).await?;
    file.flush().await?;
    if durability == WriteDurability::Durable {
        file.sync_all().await?;
    }
    Ok(())
}

/// Replace `path` with `contents` via a sibling temp file and a rename.
pub(crate) async fn write_atomic(
    path: &Path,
    contents: &str,
    durability: WriteDurability,
) -> Result<()> {
    let tmp = temp_path_for(path);

    let written = async {
        write_temp(&tmp, contents, durability).await?;
        fs::rename(&tmp, path).await
    }
    .await;

    if let Err(err) = written {
        let _ = fs::remove_file(&tmp).await;
        return Err(storage_err(path)(err));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_skeleton_has_exactly_one_marker() {
        let doc = skeleton("G1 #general");
        assert_eq!(doc.matches(MESSAGES_MARKER).count(), 1);
        assert!(doc.starts_with("<!DOCTYPE html>\n<html lang=\"en\">\n"));
        assert!(doc.contains("\t\t<title>G1 #general</title>\n"));
        assert!(doc.ends_with("\t\t<!-- Messages -->\n\t</body>\n</html>\n"));
    }

    #[test]
    fn test_skeleton_escapes_title() {
        let doc = skeleton("<script> #a&b");
        assert!(doc.contains("<title>&lt;script&gt; #a&amp;b</title>"));
    }

    #[test]
    fn test_render_entry() {
        assert_eq!(
            render_entry("alice", "hi"),
            "\t\t<p><strong>alice:</strong> hi</p>"
        );
        assert_eq!(
            render_entry("bob", "1 < 2 && <b>bold</b>"),
            "\t\t<p><strong>bob:</strong> 1 &lt; 2 &amp;&amp; &lt;b&gt;bold&lt;/b&gt;</p>"
        );
        assert_eq!(render_entry("carol", ""), "\t\t<p><strong>carol:</strong> </p>");
    }

    #[test]
    fn test_render_entry_folds_line_breaks() {
        assert_eq!(
            render_entry("dave", "one\ntwo\r\nthree\rfour"),
            "\t\t<p><strong>dave:</strong> one<br>two<br>three<br>four</p>"
        );
    }

    #[test]
    fn test_insert_entry_above_marker() {
        let doc = skeleton("t");
        let (doc, line) = insert_entry(&doc, "\t\t<p>a</p>").unwrap();
        let (doc, line2) = insert_entry(&doc, "\t\t<p>b</p>").unwrap();

        let lines: Vec<&str> = doc.lines().collect();
        assert_eq!(lines[line - 1], "\t\t<p>a</p>");
        assert_eq!(lines[line2 - 1], "\t\t<p>b</p>");
        assert_eq!(line2, line + 1);
        assert_eq!(lines[line2], "\t\t<!-- Messages -->");
        assert_eq!(doc.matches(MESSAGES_MARKER).count(), 1);
    }

    #[test]
    fn test_insert_uses_last_marker() {
        let doc = "a\n<!-- Messages -->\nb\n<!-- Messages -->\nc";
        let (out, line) = insert_entry(doc, "x").unwrap();
        assert_eq!(out, "a\n<!-- Messages -->\nb\nx\n<!-- Messages -->\nc");
        assert_eq!(line, 4);
    }

    #[test]
    fn test_insert_preserves_crlf_and_missing_trailing_newline() {
        let doc = "<body>\r\n<!-- Messages -->\r\n</body>";
        let (out, line) = insert_entry(doc, "<p>x</p>").unwrap();
        assert_eq!(out, "<body>\r\n<p>x</p>\r\n<!-- Messages -->\r\n</body>");
        assert_eq!(line, 2);
    }

    #[test]
    fn test_insert_marker_on_first_line() {
        let (out, line) = insert_entry("<!-- Messages -->", "x").unwrap();
        assert_eq!(out, "x\n<!-- Messages -->");
        assert_eq!(line, 1);
    }

    #[test]
    fn test_insert_without_marker() {
        assert!(insert_entry("<html><body></body></html>", "x").is_none());
    }

    #[test]
    fn test_restore_marker_above_body_close() {
        let doc = "<html>\n\t<body>\n\t\t<p>a</p>\n\t</body>\n</html>\n";
        let restored = restore_marker(doc);
        assert_eq!(
            restored,
            "<html>\n\t<body>\n\t\t<p>a</p>\n\t\t<!-- Messages -->\n\t</body>\n</html>\n"
        );
    }

    #[test]
    fn test_restore_marker_appends_closing_structure() {
        let restored = restore_marker("<p>orphan</p>");
        assert_eq!(
            restored,
            "<p>orphan</p>\n\t\t<!-- Messages -->\n\t</body>\n</html>\n"
        );
        assert_eq!(restored.matches(MESSAGES_MARKER).count(), 1);
    }

    #[test]
    fn test_restore_marker_splits_single_line_body() {
        let restored = restore_marker("<html><body></body></html>");
        assert_eq!(
            restored,
            "<html><body>\n\t\t<!-- Messages -->\n</body></html>"
        );

        let (doc, line) = insert_entry(&restored, "\t\t<p>x</p>").unwrap();
        assert_eq!(line, 2);
        let body = doc.find("<body>").unwrap();
        let entry = doc.find("<p>x</p>").unwrap();
        let close = doc.find("</body>").unwrap();
        assert!(body < entry && entry < close);
    }

    #[tokio::test]
    async fn test_ensure_failure_leaves_no_partial_document() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DocumentPaths {
            directory: dir.path().to_path_buf(),
            document: dir.path().join("channel-general.html"),
        };
        // A directory squatting on the temp path makes the skeleton write fail.
        let blocker = temp_path_for(&paths.document);
        std::fs::create_dir(&blocker).unwrap();

        let err = ensure_document(&paths, "t", WriteDurability::Fast)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Storage { .. }));
        assert!(!paths.document.exists());

        std::fs::remove_dir(&blocker).unwrap();
        assert!(ensure_document(&paths, "t", WriteDurability::Durable)
            .await
            .unwrap());
        assert_eq!(std::fs::read_to_string(&paths.document).unwrap(), skeleton("t"));
        assert!(!blocker.exists());
        assert!(!ensure_document(&paths, "t", WriteDurability::Fast)
            .await
            .unwrap());
    }

    #[test]
    fn test_check_entry() {
        check_entry("\t\t<p>fine</p>").unwrap();
        assert!(check_entry("two\nlines").is_err());
        assert!(check_entry("carriage\rreturn").is_err());
        assert!(check_entry("<!-- Messages -->").is_err());
    }

    proptest! {
        #[test]
        fn prop_rendered_entry_is_one_safe_line(author in ".*", text in ".*") {
            let entry = render_entry(&author, &text);
            prop_assert!(!entry.contains('\n'));
            prop_assert!(!entry.contains('\r'));
            prop_assert!(!entry.contains(MESSAGES_MARKER));
            prop_assert!(check_entry(&entry).is_ok());

            // Only the fixed wrapper (and folded line breaks) may contribute raw tags.
            let inner = entry
                .trim_start_matches("\t\t<p><strong>")
                .trim_end_matches("</p>")
                .replacen(":</strong> ", "", 1)
                .replace("<br>", "");
            prop_assert!(!inner.contains('<'));
            prop_assert!(!inner.contains('>'));
        }

        #[test]
        fn prop_insert_keeps_single_marker(entries in proptest::collection::vec("[a-z ]{0,12}", 0..20)) {
            let mut doc = skeleton("t");
            for e in &entries {
                let line = render_entry("u", e);
                doc = insert_entry(&doc, &line).unwrap().0;
            }
            prop_assert_eq!(doc.matches(MESSAGES_MARKER).count(), 1);
            prop_assert_eq!(doc.matches("<p><strong>u:</strong>").count(), entries.len());
        }
    }
}
