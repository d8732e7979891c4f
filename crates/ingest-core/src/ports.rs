//! Capability ports consumed by the pipeline. Source-specific fetchers,
//! embedding providers and vector store backends are external collaborators
//! (see SPEC_FULL §6); this crate only defines the contracts and, in
//! `#[cfg(test)]`, small fakes that exercise the pipeline end to end.

use async_trait::async_trait;
use ingest_common::{Chunk, Document, EmbeddingResult};

/// Produces a finite sequence of document batches for a source
/// configuration. May honor `checkpoint.last_batch_id` to resume mid-source;
/// if it cannot, restarting from the beginning is acceptable — the
/// Indexer's idempotency absorbs the overlap.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Returns the next batch, or `None` once the source is exhausted.
    /// Implementations that wrap blocking I/O should offload it themselves
    /// (e.g. via `tokio::task::spawn_blocking`); the Coordinator treats this
    /// call as already being off the cooperative loop.
    async fn next_batch(&mut self) -> anyhow::Result<Option<Vec<Document>>>;
}

/// Splits a batch of documents into chunks with a stable `content_hash` per
/// unique chunk text. Chunk size, overlap and strategy are configuration
/// inputs to the concrete implementation, not part of this contract.
#[async_trait]
pub trait Chunker: Send + Sync {
    async fn chunk(&self, kb_id: &str, documents: &[Document]) -> anyhow::Result<Vec<Chunk>>;
}

/// Generates a vector embedding for one chunk. Failures (network, quota)
/// are returned as errors; the Chunk Processor decides on retry via the
/// Retry Policy.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, chunk: &Chunk) -> anyhow::Result<EmbeddingResult>;
}

/// Vector store writer with content-hash idempotency and destructive
/// per-job cleanup.
#[async_trait]
pub trait Indexer: Send + Sync {
    async fn exists(&self, kb_id: &str, content_hash: &str) -> anyhow::Result<bool>;
    async fn index(&self, kb_id: &str, embedding: &EmbeddingResult) -> anyhow::Result<()>;
    async fn persist(&self) -> anyhow::Result<()>;
    async fn delete_by_job(&self, job_id: &str, kb_id: &str) -> anyhow::Result<()>;
    /// Whether the backing index has anything durably written for `kb_id`
    /// right now. Backs the Ingestion Service's status composition (§4.11),
    /// which treats a ready index as conclusive proof of completion even if
    /// the phase rows have not all caught up yet.
    async fn is_ready(&self, kb_id: &str) -> anyhow::Result<bool>;
}

#[cfg(test)]
pub mod fakes {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Yields a fixed list of pre-built batches, one `next_batch()` call at
    /// a time, honoring `checkpoint.last_batch_id` by skipping that many
    /// batches up front.
    pub struct FakeLoader {
        batches: std::vec::IntoIter<Vec<Document>>,
    }

    impl FakeLoader {
        pub fn new(batches: Vec<Vec<Document>>, resume_after_batch_id: Option<i64>) -> Self {
            let skip = resume_after_batch_id.map(|b| (b + 1) as usize).unwrap_or(0);
            let batches = batches.into_iter().skip(skip).collect::<Vec<_>>();
            FakeLoader {
                batches: batches.into_iter(),
            }
        }
    }

    #[async_trait]
    impl Loader for FakeLoader {
        async fn next_batch(&mut self) -> anyhow::Result<Option<Vec<Document>>> {
            Ok(self.batches.next())
        }
    }

    /// Splits each document's text on blank lines into chunks, hashing with
    /// the same scheme `chunk_processor` uses in production.
    pub struct FakeChunker {
        pub chunks_per_doc: usize,
    }

    #[async_trait]
    impl Chunker for FakeChunker {
        async fn chunk(&self, kb_id: &str, documents: &[Document]) -> anyhow::Result<Vec<Chunk>> {
            let mut out = Vec::new();
            for doc in documents {
                let doc_id = doc.doc_id().unwrap_or(0);
                for i in 0..self.chunks_per_doc {
                    let text = format!("{}::chunk{}", doc.text, i);
                    out.push(Chunk {
                        content_hash: crate::chunk_processor::content_hash(&text),
                        text,
                        kb_id: kb_id.to_string(),
                        doc_id,
                        url: doc.url().map(|s| s.to_string()),
                        section: Some(i.to_string()),
                    });
                }
            }
            Ok(out)
        }
    }

    /// Counts embed calls and optionally fails the first N attempts for a
    /// chosen content hash, to exercise the retry policy (scenario S5).
    pub struct FakeEmbedder {
        pub call_count: Mutex<u32>,
        pub fail_hash: Option<String>,
        pub fail_times: u32,
    }

    impl FakeEmbedder {
        pub fn new() -> Self {
            FakeEmbedder {
                call_count: Mutex::new(0),
                fail_hash: None,
                fail_times: 0,
            }
        }

        pub fn failing(fail_hash: &str, fail_times: u32) -> Self {
            FakeEmbedder {
                call_count: Mutex::new(0),
                fail_hash: Some(fail_hash.to_string()),
                fail_times,
            }
        }

        pub fn calls(&self) -> u32 {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, chunk: &Chunk) -> anyhow::Result<EmbeddingResult> {
            let mut count = self.call_count.lock().unwrap();
            *count += 1;
            let this_call = *count;
            drop(count);

            if let Some(fail_hash) = &self.fail_hash {
                if fail_hash == &chunk.content_hash && this_call <= self.fail_times {
                    anyhow::bail!("embedder transient failure");
                }
            }

            Ok(EmbeddingResult {
                vector: vec![0.0_f32; 4],
                content_hash: chunk.content_hash.clone(),
                text: chunk.text.clone(),
                metadata: serde_json::json!({}),
            })
        }
    }

    /// In-memory content-addressed store. `delete_by_job` clears everything
    /// (this fake has no per-job tracking, same simplification the Python
    /// original makes).
    #[derive(Default)]
    pub struct FakeIndexer {
        pub hashes: Mutex<HashSet<String>>,
        pub deleted: Mutex<bool>,
    }

    impl FakeIndexer {
        pub fn new() -> Self {
            FakeIndexer::default()
        }

        pub fn indexed_count(&self) -> usize {
            self.hashes.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Indexer for FakeIndexer {
        async fn exists(&self, _kb_id: &str, content_hash: &str) -> anyhow::Result<bool> {
            Ok(self.hashes.lock().unwrap().contains(content_hash))
        }

        async fn index(&self, _kb_id: &str, embedding: &EmbeddingResult) -> anyhow::Result<()> {
            self.hashes
                .lock()
                .unwrap()
                .insert(embedding.content_hash.clone());
            Ok(())
        }

        async fn persist(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn delete_by_job(&self, _job_id: &str, _kb_id: &str) -> anyhow::Result<()> {
            self.hashes.lock().unwrap().clear();
            *self.deleted.lock().unwrap() = true;
            Ok(())
        }

        async fn is_ready(&self, _kb_id: &str) -> anyhow::Result<bool> {
            Ok(!self.hashes.lock().unwrap().is_empty())
        }
    }
}
