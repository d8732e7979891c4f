//! Per-KB on-disk document persistence for the Loading stage, per §4.7 and
//! grounded on the Python `application/storage.py::save_documents_to_disk`.

use std::path::{Path, PathBuf};

use ingest_common::{Document, PersistedSnapshot};
use tracing::warn;

pub fn documents_dir(content_root: &Path, kb_id: &str) -> PathBuf {
    content_root.join(kb_id).join("documents")
}

pub fn index_dir(content_root: &Path, kb_id: &str) -> PathBuf {
    content_root.join(kb_id).join("index")
}

pub fn snapshot_path(content_root: &Path, kb_id: &str) -> PathBuf {
    content_root.join(kb_id).join("status.json")
}

/// Writes the Persisted State Snapshot for `snapshot.kb_id` to
/// `<content_root>/<kb_id>/status.json`, grounded on the Python
/// `application/storage.py::save_documents_to_disk`'s create-then-write
/// shape. Called on every job status transition so a status query can be
/// answered without the coordinator task being resident.
pub async fn write_snapshot(content_root: &Path, snapshot: &PersistedSnapshot) -> anyhow::Result<()> {
    let path = snapshot_path(content_root, &snapshot.kb_id);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let body = serde_json::to_vec_pretty(snapshot)?;
    tokio::fs::write(&path, body).await?;
    Ok(())
}

/// Reads back the last snapshot written for `kb_id`, or `None` if the
/// knowledge base has never reached a recorded transition.
pub async fn read_snapshot(
    content_root: &Path,
    kb_id: &str,
) -> anyhow::Result<Option<PersistedSnapshot>> {
    let path = snapshot_path(content_root, kb_id);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Writes each document in `batch` as `{doc_id:04d}_{page_name}.md` under
/// the KB's `documents/` directory. A single document's write failure is
/// logged and skipped; it does not abort the rest of the batch.
pub async fn save_documents_to_disk(
    content_root: &Path,
    kb_id: &str,
    batch: &[Document],
) -> anyhow::Result<()> {
    let dir = documents_dir(content_root, kb_id);
    tokio::fs::create_dir_all(&dir).await?;

    for doc in batch {
        let doc_id = doc.doc_id().unwrap_or(0);
        let page_name = page_name_for(doc.url());
        let filename = format!("{:04}_{}.md", doc_id, page_name);
        let content = format!(
            "# Doc ID: {}\n# URL: {}\n\n{}",
            doc_id,
            doc.url().unwrap_or(""),
            doc.text
        );
        if let Err(err) = tokio::fs::write(dir.join(&filename), content).await {
            warn!(error = %err, filename, "failed to write document to disk, skipping");
        }
    }
    Ok(())
}

fn page_name_for(url: Option<&str>) -> String {
    let Some(url) = url else {
        return "document".to_string();
    };

    let trimmed = url.trim_end_matches('/');
    let last_segment = trimmed.rsplit('/').next().unwrap_or("");
    let raw = if last_segment.is_empty() {
        "index".to_string()
    } else {
        strip_known_suffix(last_segment)
    };

    sanitize_filename(&raw)
}

fn strip_known_suffix(segment: &str) -> String {
    for suffix in [".html", ".htm", ".php", ".asp"] {
        if let Some(stripped) = segment.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    segment.to_string()
}

/// Replace filesystem-hostile characters, collapse whitespace runs, trim
/// leading/trailing `._`, truncate to 100 chars, and fall back to
/// `"document"` if nothing usable remains.
fn sanitize_filename(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_space = false;
    for c in raw.chars() {
        if matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') {
            out.push('_');
            last_was_space = false;
        } else if c.is_whitespace() {
            if !last_was_space {
                out.push('_');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    let truncated: String = trimmed.chars().take(100).collect();

    if truncated.is_empty() || truncated == "_" {
        "document".to_string()
    } else {
        truncated
    }
}
