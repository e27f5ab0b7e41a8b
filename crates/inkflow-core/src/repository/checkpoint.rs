//! Checkpoint store trait definition.
//!
//! Defines the storage interface for job checkpoints. The infrastructure
//! layer (inkflow-infra) implements this trait with one directory per job and
//! one file per checkpoint; tests use in-memory implementations.

use inkflow_types::checkpoint::{Checkpoint, CheckpointMeta};
use inkflow_types::error::StoreError;
use uuid::Uuid;

/// Storage port for checkpoint persistence.
///
/// Writes for one job are serialized by the owning engine task, so
/// implementations need no cross-writer locking. Uses native async fn in
/// traits (Rust 2024 edition, no async_trait macro).
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint. Overwrites any checkpoint with the same id.
    fn write(
        &self,
        checkpoint: &Checkpoint,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Read a checkpoint body by id.
    ///
    /// Fails with `StoreError::NotFound` when absent and
    /// `StoreError::Corrupt` when the body cannot be deserialized.
    fn read(
        &self,
        job_id: &Uuid,
        checkpoint_id: &str,
    ) -> impl std::future::Future<Output = Result<Checkpoint, StoreError>> + Send;

    /// List checkpoint metadata for a job, in no particular order.
    ///
    /// A job with no checkpoints yields an empty list, not an error.
    fn list(
        &self,
        job_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<CheckpointMeta>, StoreError>> + Send;

    /// Delete a checkpoint. Returns `true` if it existed.
    fn delete(
        &self,
        job_id: &Uuid,
        checkpoint_id: &str,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;
}
