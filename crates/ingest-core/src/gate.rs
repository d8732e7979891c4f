//! The pre-batch / pre-chunk check that observes desired state and gates
//! pipeline progress, per §4.5. The only place cancellation's destructive
//! cleanup happens.

use std::sync::Arc;
use std::time::Duration;

use ingest_common::JobStatus;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::GateError;
use crate::ports::Indexer;
use crate::store::SqliteJobStore;

const PAUSE_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct JobGate {
    store: Arc<SqliteJobStore>,
}

impl JobGate {
    pub fn new(store: Arc<SqliteJobStore>) -> Self {
        JobGate { store }
    }

    /// Returns `true` if the pipeline may proceed, `false` if it must stop.
    pub async fn check(
        &self,
        job_id: Uuid,
        kb_id: &str,
        indexer: &dyn Indexer,
    ) -> Result<bool, GateError> {
        loop {
            let status = self.store.get_job_status(job_id)?;
            match status {
                JobStatus::Running => return Ok(true),
                JobStatus::Paused => {
                    info!(%job_id, "job paused, waiting at gate");
                    tokio::time::sleep(PAUSE_POLL_INTERVAL).await;
                    continue;
                }
                JobStatus::Canceled => {
                    info!(%job_id, "job canceled, running cleanup");
                    self.cleanup(job_id, kb_id, indexer).await?;
                    return Ok(false);
                }
                JobStatus::Failed | JobStatus::Completed => return Ok(false),
                JobStatus::Pending | JobStatus::NotStarted => {
                    warn!(%job_id, ?status, "gate observed unexpected status");
                    return Ok(false);
                }
            }
        }
    }

    async fn cleanup(
        &self,
        job_id: Uuid,
        kb_id: &str,
        indexer: &dyn Indexer,
    ) -> Result<(), GateError> {
        let delete_result = indexer
            .delete_by_job(&job_id.to_string(), kb_id)
            .await;

        self.store
            .set_job_status(job_id, JobStatus::NotStarted, Some(chrono::Utc::now()), None)?;
        self.store.update_job(
            job_id,
            Some(&serde_json::json!({})),
            Some(&ingest_common::Counters::default()),
        )?;

        // The status transition above always happens even if cleanup
        // failed, so the job is never stuck in `canceled`; the error is
        // still surfaced so the operator knows manual cleanup may be
        // needed (§7: "logged and re-raised").
        delete_result.map_err(|source| GateError::CleanupFailed { job_id, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::fakes::FakeIndexer;
    use ingest_common::JobStatus;

    fn store_with_job(status: JobStatus) -> (Arc<SqliteJobStore>, Uuid) {
        let store = Arc::new(SqliteJobStore::new_in_memory().unwrap());
        let id = store
            .create_job("kb-1", "website", serde_json::json!({}), 0)
            .unwrap();
        store.set_job_status(id, status, None, None).unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn running_status_proceeds() {
        let (store, id) = store_with_job(JobStatus::Running);
        let gate = JobGate::new(store);
        let indexer = FakeIndexer::new();
        assert!(gate.check(id, "kb-1", &indexer).await.unwrap());
    }

    #[tokio::test]
    async fn failed_and_completed_are_terminal() {
        let (store, id) = store_with_job(JobStatus::Failed);
        let gate = JobGate::new(store.clone());
        let indexer = FakeIndexer::new();
        assert!(!gate.check(id, "kb-1", &indexer).await.unwrap());

        store.set_job_status(id, JobStatus::Completed, None, None).unwrap();
        assert!(!gate.check(id, "kb-1", &indexer).await.unwrap());
    }

    #[tokio::test]
    async fn canceled_runs_cleanup_exactly_once_and_resets_state() {
        let (store, id) = store_with_job(JobStatus::Canceled);
        let gate = JobGate::new(store.clone());
        let indexer = FakeIndexer::new();
        indexer.hashes.lock().unwrap().insert("abc".to_string());

        let proceed = gate.check(id, "kb-1", &indexer).await.unwrap();
        assert!(!proceed);
        assert!(*indexer.deleted.lock().unwrap());
        assert_eq!(indexer.indexed_count(), 0);

        let job = store.get_job(id).unwrap();
        assert_eq!(job.status, JobStatus::NotStarted);
        assert_eq!(job.checkpoint, serde_json::json!({}));
    }

    #[tokio::test]
    async fn cleanup_failure_still_transitions_status_but_surfaces_error() {
        let (store, id) = store_with_job(JobStatus::Canceled);
        let gate = JobGate::new(store.clone());

        struct FailingIndexer;
        #[async_trait::async_trait]
        impl Indexer for FailingIndexer {
            async fn exists(&self, _kb_id: &str, _content_hash: &str) -> anyhow::Result<bool> {
                Ok(false)
            }
            async fn index(&self, _kb_id: &str, _embedding: &ingest_common::EmbeddingResult) -> anyhow::Result<()> {
                Ok(())
            }
            async fn persist(&self) -> anyhow::Result<()> {
                Ok(())
            }
            async fn delete_by_job(&self, _job_id: &str, _kb_id: &str) -> anyhow::Result<()> {
                anyhow::bail!("disk is full")
            }
            async fn is_ready(&self, _kb_id: &str) -> anyhow::Result<bool> {
                Ok(false)
            }
        }

        let result = gate.check(id, "kb-1", &FailingIndexer).await;
        assert!(result.is_err());
        let job = store.get_job(id).unwrap();
        assert_eq!(job.status, JobStatus::NotStarted);
    }
}
