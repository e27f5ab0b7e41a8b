//! Filesystem checkpoint store.
//!
//! Implements the `CheckpointStore` trait from `inkflow-core` with one
//! directory per job and one file per checkpoint:
//!
//! ```text
//! {root}/
//!   01938e90-.../                      <- job id
//!     gather_1700000000123456.json
//!     stage-1_1700000000456789.json
//!     final_1700000001000000.json
//! ```
//!
//! Bodies are pretty-printed JSON so operators can inspect a snapshot with
//! any text tool. File names are checkpoint ids, so listings never read file
//! bodies. Writes go through a temp file and a rename, keeping a crash
//! mid-write from leaving a half-written checkpoint under a valid name.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use inkflow_core::repository::CheckpointStore;
use inkflow_types::checkpoint::{Checkpoint, CheckpointMeta};
use inkflow_types::error::StoreError;
use uuid::Uuid;

/// Local filesystem-backed checkpoint store.
pub struct FsCheckpointStore {
    root: PathBuf,
}

impl FsCheckpointStore {
    /// Create a store rooted at `root`. The directory is created lazily on
    /// first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn job_dir(&self, job_id: &Uuid) -> PathBuf {
        self.root.join(job_id.to_string())
    }

    fn checkpoint_path(&self, job_id: &Uuid, checkpoint_id: &str) -> PathBuf {
        self.job_dir(job_id).join(format!("{checkpoint_id}.json"))
    }
}

fn io_err(e: std::io::Error) -> StoreError {
    StoreError::Io(e.to_string())
}

impl CheckpointStore for FsCheckpointStore {
    async fn write(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let dir = self.job_dir(&checkpoint.job_id);
        tokio::fs::create_dir_all(&dir).await.map_err(io_err)?;

        let body = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| StoreError::Serialize(e.to_string()))?;

        let path = self.checkpoint_path(&checkpoint.job_id, &checkpoint.id);
        let tmp = dir.join(format!(".{}.tmp", checkpoint.id));
        tokio::fs::write(&tmp, &body).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err)?;

        tracing::debug!(
            job_id = %checkpoint.job_id,
            checkpoint_id = checkpoint.id.as_str(),
            bytes = body.len(),
            "checkpoint written"
        );
        Ok(())
    }

    async fn read(&self, job_id: &Uuid, checkpoint_id: &str) -> Result<Checkpoint, StoreError> {
        let path = self.checkpoint_path(job_id, checkpoint_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(StoreError::NotFound),
            Err(e) => return Err(io_err(e)),
        };
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    async fn list(&self, job_id: &Uuid) -> Result<Vec<CheckpointMeta>, StoreError> {
        let dir = self.job_dir(job_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(e)),
        };

        let mut metas = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match CheckpointMeta::parse(*job_id, stem) {
                Some(meta) => metas.push(meta),
                None => {
                    tracing::warn!(?path, "skipping foreign file in checkpoint directory");
                }
            }
        }
        Ok(metas)
    }

    async fn delete(&self, job_id: &Uuid, checkpoint_id: &str) -> Result<bool, StoreError> {
        let path = self.checkpoint_path(job_id, checkpoint_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
