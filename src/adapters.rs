//! Development adapters for the four ingestion ports. The engine is
//! source- and backend-agnostic by design (`ingest_core::ports`); these
//! implementations exist so the daemon's CLI has something real to run
//! against a local directory without requiring an embedding API key or a
//! production vector store.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ingest_common::{Chunk, Document, EmbeddingResult};
use ingest_core::chunk_processor::content_hash;
use ingest_core::{Chunker, Embedder, Indexer, Loader};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Reads every regular file in a directory, in sorted path order, as one
/// `Document` each, `batch_size` documents per batch. Honors
/// `resume_after_batch_id` by skipping the documents already consumed by
/// prior batches, so restarting mid-source does not re-read from scratch.
pub struct FileSystemLoader {
    paths: std::vec::IntoIter<PathBuf>,
    batch_size: usize,
    next_doc_id: u32,
}

impl FileSystemLoader {
    pub fn new(
        root: &Path,
        batch_size: usize,
        resume_after_batch_id: Option<i64>,
    ) -> std::io::Result<Self> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(root)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        paths.sort();

        let skip_batches = resume_after_batch_id.map(|b| (b + 1).max(0) as usize).unwrap_or(0);
        let skip_docs = skip_batches * batch_size;
        let paths: Vec<_> = paths.into_iter().skip(skip_docs).collect();

        Ok(FileSystemLoader {
            paths: paths.into_iter(),
            batch_size,
            next_doc_id: skip_docs as u32,
        })
    }
}

#[async_trait]
impl Loader for FileSystemLoader {
    async fn next_batch(&mut self) -> anyhow::Result<Option<Vec<Document>>> {
        let mut batch = Vec::new();
        for _ in 0..self.batch_size {
            let Some(path) = self.paths.next() else {
                break;
            };
            let text = tokio::fs::read_to_string(&path).await?;
            let doc_id = self.next_doc_id;
            self.next_doc_id += 1;
            batch.push(Document {
                id: format!("doc-{doc_id}"),
                text,
                metadata: serde_json::json!({
                    "doc_id": doc_id,
                    "url": path.to_string_lossy(),
                }),
            });
        }
        if batch.is_empty() {
            Ok(None)
        } else {
            Ok(Some(batch))
        }
    }
}

/// Splits each document into fixed-size character windows. No overlap: a
/// production chunker would want one, but this is a development stand-in.
pub struct FixedSizeChunker {
    pub chunk_chars: usize,
}

#[async_trait]
impl Chunker for FixedSizeChunker {
    async fn chunk(&self, kb_id: &str, documents: &[Document]) -> anyhow::Result<Vec<Chunk>> {
        let mut out = Vec::new();
        for doc in documents {
            let doc_id = doc.doc_id().unwrap_or(0);
            let chars: Vec<char> = doc.text.chars().collect();
            if chars.is_empty() {
                continue;
            }
            let mut start = 0;
            let mut section = 0usize;
            while start < chars.len() {
                let end = (start + self.chunk_chars).min(chars.len());
                let text: String = chars[start..end].iter().collect();
                out.push(Chunk {
                    content_hash: content_hash(&text),
                    text,
                    kb_id: kb_id.to_string(),
                    doc_id,
                    url: doc.url().map(str::to_string),
                    section: Some(section.to_string()),
                });
                start = end;
                section += 1;
            }
        }
        Ok(out)
    }
}

/// A deterministic, non-semantic placeholder embedding: the content hash's
/// leading bytes scaled to `[0, 1]`. Swap this for a real embedding client
/// to get meaningful vectors; the pipeline does not care which it gets.
pub struct NullEmbedder {
    pub dims: usize,
}

#[async_trait]
impl Embedder for NullEmbedder {
    async fn embed(&self, chunk: &Chunk) -> anyhow::Result<EmbeddingResult> {
        let vector: Vec<f32> = chunk
            .content_hash
            .bytes()
            .take(self.dims)
            .map(|b| b as f32 / 255.0)
            .collect();
        Ok(EmbeddingResult {
            vector,
            content_hash: chunk.content_hash.clone(),
            text: chunk.text.clone(),
            metadata: serde_json::json!({}),
        })
    }
}

/// Append-only JSON-lines file per knowledge base, with an in-memory
/// content-hash set for the idempotency check. `delete_by_job` has no
/// per-job bookkeeping and clears the whole file, the same simplification
/// the pipeline's in-memory test fakes make.
pub struct JsonlIndexer {
    path: PathBuf,
    hashes: Mutex<HashSet<String>>,
}

impl JsonlIndexer {
    pub async fn open(index_dir: &Path, kb_id: &str) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(index_dir).await?;
        let path = index_dir.join(format!("{kb_id}.jsonl"));

        let mut hashes = HashSet::new();
        if let Ok(content) = tokio::fs::read_to_string(&path).await {
            for line in content.lines() {
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(line) {
                    if let Some(hash) = value.get("content_hash").and_then(|h| h.as_str()) {
                        hashes.insert(hash.to_string());
                    }
                }
            }
        }

        Ok(JsonlIndexer {
            path,
            hashes: Mutex::new(hashes),
        })
    }
}

#[async_trait]
impl Indexer for JsonlIndexer {
    async fn exists(&self, _kb_id: &str, content_hash: &str) -> anyhow::Result<bool> {
        Ok(self.hashes.lock().await.contains(content_hash))
    }

    async fn index(&self, _kb_id: &str, embedding: &EmbeddingResult) -> anyhow::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let line = serde_json::to_string(embedding)?;
        file.write_all(format!("{line}\n").as_bytes()).await?;
        self.hashes.lock().await.insert(embedding.content_hash.clone());
        Ok(())
    }

    async fn persist(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn delete_by_job(&self, _job_id: &str, _kb_id: &str) -> anyhow::Result<()> {
        tokio::fs::write(&self.path, b"").await?;
        self.hashes.lock().await.clear();
        Ok(())
    }

    async fn is_ready(&self, _kb_id: &str) -> anyhow::Result<bool> {
        Ok(!self.hashes.lock().await.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn filesystem_loader_yields_batches_of_requested_size() {
        let tmp = tempfile::tempdir().unwrap();
        for i in 0..5 {
            tokio::fs::write(tmp.path().join(format!("{i}.txt")), format!("doc {i}"))
                .await
                .unwrap();
        }
        let mut loader = FileSystemLoader::new(tmp.path(), 2, None).unwrap();

        let first = loader.next_batch().await.unwrap().unwrap();
        assert_eq!(first.len(), 2);
        let second = loader.next_batch().await.unwrap().unwrap();
        assert_eq!(second.len(), 2);
        let third = loader.next_batch().await.unwrap().unwrap();
        assert_eq!(third.len(), 1);
        assert!(loader.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn filesystem_loader_resumes_after_batch_id() {
        let tmp = tempfile::tempdir().unwrap();
        for i in 0..4 {
            tokio::fs::write(tmp.path().join(format!("{i}.txt")), format!("doc {i}"))
                .await
                .unwrap();
        }
        // batch_size 2, already consumed batch 0 -> only the second pair remains
        let mut loader = FileSystemLoader::new(tmp.path(), 2, Some(0)).unwrap();
        let batch = loader.next_batch().await.unwrap().unwrap();
        assert_eq!(batch.len(), 2);
        assert!(loader.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fixed_size_chunker_splits_on_char_boundaries() {
        let chunker = FixedSizeChunker { chunk_chars: 3 };
        let doc = Document {
            id: "d0".into(),
            text: "abcdefg".into(),
            metadata: serde_json::json!({"doc_id": 0}),
        };
        let chunks = chunker.chunk("kb-1", &[doc]).await.unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "abc");
        assert_eq!(chunks[2].text, "g");
    }

    #[tokio::test]
    async fn jsonl_indexer_round_trips_and_dedups() {
        let tmp = tempfile::tempdir().unwrap();
        let indexer = JsonlIndexer::open(tmp.path(), "kb-1").await.unwrap();
        let embedding = EmbeddingResult {
            vector: vec![0.1, 0.2],
            content_hash: "abc123".into(),
            text: "hello".into(),
            metadata: serde_json::json!({}),
        };
        assert!(!indexer.exists("kb-1", "abc123").await.unwrap());
        indexer.index("kb-1", &embedding).await.unwrap();
        assert!(indexer.exists("kb-1", "abc123").await.unwrap());

        // Reopening from disk should recover the hash set.
        let reopened = JsonlIndexer::open(tmp.path(), "kb-1").await.unwrap();
        assert!(reopened.exists("kb-1", "abc123").await.unwrap());
    }

    #[tokio::test]
    async fn jsonl_indexer_is_ready_once_something_is_indexed() {
        let tmp = tempfile::tempdir().unwrap();
        let indexer = JsonlIndexer::open(tmp.path(), "kb-1").await.unwrap();
        assert!(!indexer.is_ready("kb-1").await.unwrap());

        indexer
            .index(
                "kb-1",
                &EmbeddingResult {
                    vector: vec![0.1],
                    content_hash: "abc123".into(),
                    text: "hello".into(),
                    metadata: serde_json::json!({}),
                },
            )
            .await
            .unwrap();
        assert!(indexer.is_ready("kb-1").await.unwrap());
    }

    #[tokio::test]
    async fn jsonl_indexer_delete_by_job_clears_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let indexer = JsonlIndexer::open(tmp.path(), "kb-1").await.unwrap();
        let embedding = EmbeddingResult {
            vector: vec![0.1],
            content_hash: "abc123".into(),
            text: "hello".into(),
            metadata: serde_json::json!({}),
        };
        indexer.index("kb-1", &embedding).await.unwrap();
        indexer.delete_by_job("job-1", "kb-1").await.unwrap();
        assert!(!indexer.exists("kb-1", "abc123").await.unwrap());
    }
}
