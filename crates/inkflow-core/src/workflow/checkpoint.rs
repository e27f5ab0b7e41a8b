//! Checkpoint manager: durable job snapshots with retention cleanup.
//!
//! Wraps a `CheckpointStore` to provide the engine-facing checkpoint API:
//! id generation, one-retry save semantics, newest-first listings, permissive
//! restore, and retention cleanup after every save. Writes for one job are
//! serialized by the owning engine task, so no cross-writer coordination is
//! needed here; the manager only guards id monotonicity.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use inkflow_types::checkpoint::{CHECKPOINT_SCHEMA_VERSION, Checkpoint, CheckpointMeta};
use inkflow_types::error::StoreError;
use inkflow_types::job::Job;
use uuid::Uuid;

use crate::repository::CheckpointStore;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Underlying store operation failed (after the save retry, for writes).
    #[error("checkpoint store error: {0}")]
    Store(String),

    /// No checkpoints have been recorded for the job.
    #[error("no checkpoints recorded for job {0}")]
    NoCheckpoints(Uuid),

    /// A specific checkpoint id was not found.
    #[error("checkpoint '{id}' not found for job {job_id}")]
    NotFound { job_id: Uuid, id: String },

    /// Checkpoint data exists but cannot be read back.
    #[error("corrupt checkpoint: {0}")]
    Corrupt(String),
}

impl CheckpointError {
    fn from_store(err: StoreError, job_id: Uuid, id: &str) -> Self {
        match err {
            StoreError::NotFound => CheckpointError::NotFound {
                job_id,
                id: id.to_string(),
            },
            StoreError::Corrupt(msg) => CheckpointError::Corrupt(msg),
            other => CheckpointError::Store(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

/// Which checkpoint to restore.
#[derive(Debug, Clone)]
pub enum CheckpointSelector {
    /// The most recent checkpoint by timestamp.
    Latest,
    /// A specific checkpoint id.
    Id(String),
}

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Manages durable job snapshots for one engine instance.
///
/// Generic over `S: CheckpointStore` so it works with any storage backend
/// (filesystem in inkflow-infra, in-memory mocks in tests).
pub struct CheckpointManager<S: CheckpointStore> {
    store: S,
    /// Checkpoints kept per job after each save.
    keep_last: usize,
    /// Last issued timestamp per job, in microseconds. Saves within the same
    /// microsecond bump past it so ids stay unique and sortable.
    last_micros: DashMap<Uuid, i64>,
}

impl<S: CheckpointStore> CheckpointManager<S> {
    /// Create a manager that retains `keep_last` checkpoints per job.
    pub fn new(store: S, keep_last: usize) -> Self {
        Self {
            store,
            keep_last,
            last_micros: DashMap::new(),
        }
    }

    /// Access the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Retention applied after each save.
    pub fn keep_last(&self) -> usize {
        self.keep_last
    }

    fn next_timestamp(&self, job_id: Uuid) -> DateTime<Utc> {
        let now = Utc::now().timestamp_micros();
        let mut entry = self.last_micros.entry(job_id).or_insert(i64::MIN);
        let micros = now.max(*entry + 1);
        *entry = micros;
        DateTime::from_timestamp_micros(micros).unwrap_or_else(Utc::now)
    }

    // -----------------------------------------------------------------------
    // Save
    // -----------------------------------------------------------------------

    /// Persist a snapshot of `job` taken after `step_name`.
    ///
    /// A store failure is retried once; the second failure is returned to the
    /// caller (the engine logs it and keeps the job running in memory).
    /// Retention cleanup runs after every successful save and is best-effort.
    pub async fn save(&self, job: &Job, step_name: &str) -> Result<String, CheckpointError> {
        let checkpoint = Checkpoint::new(job, step_name, self.next_timestamp(job.id));

        if let Err(first) = self.store.write(&checkpoint).await {
            tracing::warn!(
                job_id = %job.id,
                checkpoint_id = checkpoint.id.as_str(),
                error = %first,
                "checkpoint write failed, retrying once"
            );
            self.store
                .write(&checkpoint)
                .await
                .map_err(|e| CheckpointError::Store(e.to_string()))?;
        }

        tracing::debug!(
            job_id = %job.id,
            checkpoint_id = checkpoint.id.as_str(),
            step_name,
            "checkpoint saved"
        );

        if let Err(e) = self.cleanup(job.id, self.keep_last).await {
            tracing::warn!(job_id = %job.id, error = %e, "checkpoint retention cleanup failed");
        }

        Ok(checkpoint.id)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// List checkpoint metadata for a job, newest first.
    pub async fn list(&self, job_id: Uuid) -> Result<Vec<CheckpointMeta>, CheckpointError> {
        let mut metas = self
            .store
            .list(&job_id)
            .await
            .map_err(|e| CheckpointError::Store(e.to_string()))?;
        metas.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(metas)
    }

    /// The most recent checkpoint for a job.
    pub async fn get_latest(&self, job_id: Uuid) -> Result<Checkpoint, CheckpointError> {
        let metas = self.list(job_id).await?;
        let latest = metas.first().ok_or(CheckpointError::NoCheckpoints(job_id))?;
        self.store
            .read(&job_id, &latest.id)
            .await
            .map_err(|e| CheckpointError::from_store(e, job_id, &latest.id))
    }

    /// Restore a checkpoint for resumption.
    ///
    /// A schema-version difference is logged as a warning and the checkpoint
    /// is returned anyway: snapshots written by older engines stay loadable.
    pub async fn restore(
        &self,
        job_id: Uuid,
        selector: CheckpointSelector,
    ) -> Result<Checkpoint, CheckpointError> {
        let checkpoint = match selector {
            CheckpointSelector::Latest => self.get_latest(job_id).await?,
            CheckpointSelector::Id(id) => self
                .store
                .read(&job_id, &id)
                .await
                .map_err(|e| CheckpointError::from_store(e, job_id, &id))?,
        };

        match semver::Version::parse(&checkpoint.schema_version) {
            Ok(found) => {
                // CHECKPOINT_SCHEMA_VERSION is a compile-time constant; a
                // parse failure here would be a build defect.
                let current = semver::Version::parse(CHECKPOINT_SCHEMA_VERSION)
                    .map_err(|e| CheckpointError::Corrupt(e.to_string()))?;
                if found != current {
                    tracing::warn!(
                        job_id = %job_id,
                        checkpoint_id = checkpoint.id.as_str(),
                        found = %found,
                        current = %current,
                        "checkpoint schema version differs, loading anyway"
                    );
                }
            }
            Err(_) => {
                tracing::warn!(
                    job_id = %job_id,
                    checkpoint_id = checkpoint.id.as_str(),
                    version = checkpoint.schema_version.as_str(),
                    "checkpoint schema version is unparseable, loading anyway"
                );
            }
        }

        Ok(checkpoint)
    }

    // -----------------------------------------------------------------------
    // Deletion
    // -----------------------------------------------------------------------

    /// Delete one checkpoint. Returns `true` if it existed.
    pub async fn delete(&self, job_id: Uuid, checkpoint_id: &str) -> Result<bool, CheckpointError> {
        self.store
            .delete(&job_id, checkpoint_id)
            .await
            .map_err(|e| CheckpointError::from_store(e, job_id, checkpoint_id))
    }

    /// Delete all but the `keep_last` most recent checkpoints for a job.
    ///
    /// Returns the number of checkpoints deleted.
    pub async fn cleanup(&self, job_id: Uuid, keep_last: usize) -> Result<usize, CheckpointError> {
        let metas = self.list(job_id).await?;
        let mut deleted = 0;
        for meta in metas.iter().skip(keep_last) {
            if self
                .store
                .delete(&job_id, &meta.id)
                .await
                .map_err(|e| CheckpointError::Store(e.to_string()))?
            {
                deleted += 1;
            }
        }
        if deleted > 0 {
            tracing::debug!(job_id = %job_id, deleted, keep_last, "pruned old checkpoints");
        }
        Ok(deleted)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use inkflow_types::workflow::WorkflowDefinition;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// In-memory checkpoint store with injectable write failures.
    #[derive(Clone, Default)]
    struct MemoryStore {
        inner: Arc<Mutex<HashMap<(Uuid, String), Checkpoint>>>,
        fail_next_writes: Arc<AtomicUsize>,
    }

    impl MemoryStore {
        fn fail_next_writes(&self, n: usize) {
            self.fail_next_writes.store(n, Ordering::SeqCst);
        }

        async fn count(&self, job_id: Uuid) -> usize {
            self.inner
                .lock()
                .await
                .keys()
                .filter(|(j, _)| *j == job_id)
                .count()
        }
    }

    impl CheckpointStore for MemoryStore {
        async fn write(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
            let remaining = self.fail_next_writes.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_next_writes.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Io("injected write failure".to_string()));
            }
            self.inner
                .lock()
                .await
                .insert((checkpoint.job_id, checkpoint.id.clone()), checkpoint.clone());
            Ok(())
        }

        async fn read(&self, job_id: &Uuid, checkpoint_id: &str) -> Result<Checkpoint, StoreError> {
            self.inner
                .lock()
                .await
                .get(&(*job_id, checkpoint_id.to_string()))
                .cloned()
                .ok_or(StoreError::NotFound)
        }

        async fn list(&self, job_id: &Uuid) -> Result<Vec<CheckpointMeta>, StoreError> {
            Ok(self
                .inner
                .lock()
                .await
                .values()
                .filter(|c| c.job_id == *job_id)
                .map(Checkpoint::meta)
                .collect())
        }

        async fn delete(&self, job_id: &Uuid, checkpoint_id: &str) -> Result<bool, StoreError> {
            Ok(self
                .inner
                .lock()
                .await
                .remove(&(*job_id, checkpoint_id.to_string()))
                .is_some())
        }
    }

    fn sample_job() -> Job {
        let def = WorkflowDefinition {
            id: Uuid::now_v7(),
            name: "digest".to_string(),
            description: None,
            version: "1.0.0".to_string(),
            fail_fast: false,
            max_workers: None,
            group_timeout_secs: None,
            steps: vec![],
            metadata: HashMap::new(),
        };
        Job::new(&def, Value::Null, None)
    }

    #[tokio::test]
    async fn save_then_list_newest_first() {
        let manager = CheckpointManager::new(MemoryStore::default(), 10);
        let job = sample_job();

        let id1 = manager.save(&job, "gather").await.unwrap();
        let id2 = manager.save(&job, "draft").await.unwrap();
        let id3 = manager.save(&job, "review").await.unwrap();
        assert_ne!(id1, id2);

        let metas = manager.list(job.id).await.unwrap();
        let ids: Vec<&str> = metas.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec![id3.as_str(), id2.as_str(), id1.as_str()]);
    }

    #[tokio::test]
    async fn rapid_saves_get_unique_sortable_ids() {
        let manager = CheckpointManager::new(MemoryStore::default(), 100);
        let job = sample_job();

        let mut ids = Vec::new();
        for _ in 0..20 {
            ids.push(manager.save(&job, "stage").await.unwrap());
        }
        let mut deduped = ids.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), ids.len(), "ids must be unique");

        let metas = manager.list(job.id).await.unwrap();
        assert_eq!(metas.len(), 20);
        for pair in metas.windows(2) {
            assert!(pair[0].created_at > pair[1].created_at);
        }
    }

    #[tokio::test]
    async fn get_latest_on_empty_job_fails() {
        let manager = CheckpointManager::new(MemoryStore::default(), 10);
        let err = manager.get_latest(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, CheckpointError::NoCheckpoints(_)));
    }

    #[tokio::test]
    async fn restore_latest_returns_newest_snapshot() {
        let manager = CheckpointManager::new(MemoryStore::default(), 10);
        let mut job = sample_job();

        manager.save(&job, "gather").await.unwrap();
        job.record_completed_step("gather");
        manager.save(&job, "draft").await.unwrap();

        let restored = manager
            .restore(job.id, CheckpointSelector::Latest)
            .await
            .unwrap();
        assert_eq!(restored.step_name, "draft");
        assert_eq!(restored.job.completed_steps, vec!["gather"]);
    }

    #[tokio::test]
    async fn restore_by_id_and_missing_id() {
        let manager = CheckpointManager::new(MemoryStore::default(), 10);
        let job = sample_job();
        let id = manager.save(&job, "gather").await.unwrap();

        let restored = manager
            .restore(job.id, CheckpointSelector::Id(id.clone()))
            .await
            .unwrap();
        assert_eq!(restored.id, id);

        let err = manager
            .restore(job.id, CheckpointSelector::Id("ghost_1".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound { .. }));
    }

    #[tokio::test]
    async fn restore_then_save_is_idempotent_modulo_id() {
        let manager = CheckpointManager::new(MemoryStore::default(), 10);
        let mut job = sample_job();
        job.record_completed_step("gather");
        manager.save(&job, "gather").await.unwrap();

        let restored = manager
            .restore(job.id, CheckpointSelector::Latest)
            .await
            .unwrap();
        manager.save(&restored.job, "gather").await.unwrap();
        let again = manager
            .restore(job.id, CheckpointSelector::Latest)
            .await
            .unwrap();

        assert_eq!(again.job.completed_steps, restored.job.completed_steps);
        assert_eq!(
            serde_json::to_value(&again.job).unwrap(),
            serde_json::to_value(&restored.job).unwrap()
        );
        assert_ne!(again.id, restored.id);
    }

    #[tokio::test]
    async fn old_schema_version_still_loads() {
        let store = MemoryStore::default();
        let manager = CheckpointManager::new(store.clone(), 10);
        let job = sample_job();

        let mut checkpoint = Checkpoint::new(&job, "gather", Utc::now());
        checkpoint.schema_version = "0.9.0".to_string();
        store.write(&checkpoint).await.unwrap();

        let restored = manager
            .restore(job.id, CheckpointSelector::Latest)
            .await
            .unwrap();
        assert_eq!(restored.schema_version, "0.9.0");
    }

    #[tokio::test]
    async fn save_retries_once_on_store_failure() {
        let store = MemoryStore::default();
        let manager = CheckpointManager::new(store.clone(), 10);
        let job = sample_job();

        store.fail_next_writes(1);
        let id = manager.save(&job, "gather").await.unwrap();
        assert_eq!(store.count(job.id).await, 1);
        assert!(id.starts_with("gather_"));

        store.fail_next_writes(2);
        let err = manager.save(&job, "draft").await.unwrap_err();
        assert!(matches!(err, CheckpointError::Store(_)));
    }

    #[tokio::test]
    async fn cleanup_keeps_most_recent() {
        let store = MemoryStore::default();
        let manager = CheckpointManager::new(store.clone(), 100);
        let job = sample_job();

        for name in ["a", "b", "c", "d", "e"] {
            manager.save(&job, name).await.unwrap();
        }
        assert_eq!(store.count(job.id).await, 5);

        let deleted = manager.cleanup(job.id, 2).await.unwrap();
        assert_eq!(deleted, 3);

        let metas = manager.list(job.id).await.unwrap();
        assert_eq!(metas.len(), 2);
        assert_eq!(metas[0].step_name, "e");
        assert_eq!(metas[1].step_name, "d");
    }

    #[tokio::test]
    async fn save_applies_retention_automatically() {
        let store = MemoryStore::default();
        let manager = CheckpointManager::new(store.clone(), 3);
        let job = sample_job();

        for name in ["a", "b", "c", "d", "e", "f"] {
            manager.save(&job, name).await.unwrap();
        }
        assert_eq!(store.count(job.id).await, 3);

        let metas = manager.list(job.id).await.unwrap();
        let names: Vec<&str> = metas.iter().map(|m| m.step_name.as_str()).collect();
        assert_eq!(names, vec!["f", "e", "d"]);
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let manager = CheckpointManager::new(MemoryStore::default(), 10);
        let job = sample_job();
        let id = manager.save(&job, "gather").await.unwrap();

        assert!(manager.delete(job.id, &id).await.unwrap());
        assert!(!manager.delete(job.id, &id).await.unwrap());
    }
}
