//! Embeds and indexes one chunk with idempotency and retry, per §4.6.

use std::sync::Arc;

use ingest_common::{Chunk, RetryPolicy};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::ports::{Embedder, Indexer};

/// SHA-256 hex digest of the canonicalized (trimmed) chunk text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.trim().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    pub success: bool,
    pub skipped: bool,
    pub error: Option<String>,
}

impl ChunkOutcome {
    fn skipped() -> Self {
        ChunkOutcome {
            success: true,
            skipped: true,
            error: None,
        }
    }

    fn success() -> Self {
        ChunkOutcome {
            success: true,
            skipped: false,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        ChunkOutcome {
            success: false,
            skipped: false,
            error: Some(error),
        }
    }
}

pub struct ChunkProcessor {
    retry_policy: RetryPolicy,
    embedder: Arc<dyn Embedder>,
    indexer: Arc<dyn Indexer>,
}

impl ChunkProcessor {
    pub fn new(
        retry_policy: RetryPolicy,
        embedder: Arc<dyn Embedder>,
        indexer: Arc<dyn Indexer>,
    ) -> Self {
        ChunkProcessor {
            retry_policy,
            embedder,
            indexer,
        }
    }

    pub async fn process(&self, kb_id: &str, chunk: &Chunk) -> ChunkOutcome {
        match self.indexer.exists(kb_id, &chunk.content_hash).await {
            Ok(true) => return ChunkOutcome::skipped(),
            Ok(false) => {}
            Err(err) => {
                warn!(error = %err, content_hash = %chunk.content_hash, "idempotency check failed, proceeding to embed");
            }
        }

        let mut attempt = 1;
        loop {
            match self.attempt_once(kb_id, chunk).await {
                Ok(()) => return ChunkOutcome::success(),
                Err(err) => {
                    if self.retry_policy.should_retry(attempt, &err) {
                        let delay = self.retry_policy.backoff_delay(attempt);
                        debug!(attempt, ?delay, "retrying chunk after transient failure");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return ChunkOutcome::failed(err.to_string());
                }
            }
        }
    }

    async fn attempt_once(&self, kb_id: &str, chunk: &Chunk) -> anyhow::Result<()> {
        let embedding = self.embedder.embed(chunk).await?;
        self.indexer.index(kb_id, &embedding).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::fakes::{FakeEmbedder, FakeIndexer};
    use ingest_common::Chunk;

    fn chunk(text: &str) -> Chunk {
        Chunk {
            content_hash: content_hash(text),
            text: text.to_string(),
            kb_id: "kb-1".into(),
            doc_id: 0,
            url: None,
            section: None,
        }
    }

    #[test]
    fn content_hash_is_stable_and_trims_whitespace() {
        assert_eq!(content_hash("hello"), content_hash("  hello  "));
        assert_ne!(content_hash("hello"), content_hash("world"));
    }

    #[tokio::test]
    async fn skips_already_indexed_chunk() {
        let indexer = Arc::new(FakeIndexer::new());
        let c = chunk("already there");
        indexer.hashes.lock().unwrap().insert(c.content_hash.clone());
        let embedder = Arc::new(FakeEmbedder::new());
        let processor = ChunkProcessor::new(RetryPolicy::default(), embedder.clone(), indexer);

        let outcome = processor.process("kb-1", &c).await;
        assert!(outcome.skipped);
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn embeds_and_indexes_new_chunk() {
        let indexer = Arc::new(FakeIndexer::new());
        let embedder = Arc::new(FakeEmbedder::new());
        let processor = ChunkProcessor::new(RetryPolicy::default(), embedder.clone(), indexer.clone());

        let c = chunk("brand new");
        let outcome = processor.process("kb-1", &c).await;
        assert!(outcome.success);
        assert!(!outcome.skipped);
        assert_eq!(indexer.indexed_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_succeeds_per_s5() {
        let indexer = Arc::new(FakeIndexer::new());
        let c = chunk("flaky chunk");
        let embedder = Arc::new(FakeEmbedder::failing(&c.content_hash, 2));
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_multiplier: 2.0,
        };
        let processor = ChunkProcessor::new(policy, embedder.clone(), indexer.clone());

        let outcome = processor.process("kb-1", &c).await;
        assert!(outcome.success);
        assert_eq!(embedder.calls(), 3);
        assert_eq!(indexer.indexed_count(), 1);
    }

    #[tokio::test]
    async fn exhausts_retries_and_reports_error() {
        let indexer = Arc::new(FakeIndexer::new());
        let c = chunk("always fails");
        let embedder = Arc::new(FakeEmbedder::failing(&c.content_hash, 99));
        let policy = RetryPolicy {
            max_attempts: 2,
            backoff_multiplier: 0.001,
        };
        let processor = ChunkProcessor::new(policy, embedder, indexer.clone());

        let outcome = processor.process("kb-1", &c).await;
        assert!(!outcome.success);
        assert!(outcome.error.is_some());
        assert_eq!(indexer.indexed_count(), 0);
    }
}
