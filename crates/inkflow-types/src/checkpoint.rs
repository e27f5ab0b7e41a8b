//! Checkpoint snapshot types.
//!
//! A checkpoint is a point-in-time snapshot of a job, persisted after every
//! stage so that a crashed or paused job can resume from its last completed
//! step. Checkpoint ids embed the step name and a microsecond timestamp,
//! which makes them unique and chronologically sortable, and lets listings
//! be built from file names alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::Job;

/// Version tag written into every checkpoint body.
///
/// Compared on restore: a mismatch is a warning, never a load failure, so
/// checkpoints written by older engines remain loadable.
pub const CHECKPOINT_SCHEMA_VERSION: &str = "1.0.0";

/// Build a checkpoint id from a step name and a timestamp.
pub fn checkpoint_id(step_name: &str, at: DateTime<Utc>) -> String {
    format!("{step_name}_{}", at.timestamp_micros())
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// A persisted job snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// `{step_name}_{timestamp_micros}`.
    pub id: String,
    /// Owning job.
    pub job_id: Uuid,
    /// Name of the step (or stage marker) the snapshot was taken after.
    pub step_name: String,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
    /// Snapshot format version (see `CHECKPOINT_SCHEMA_VERSION`).
    pub schema_version: String,
    /// Workflow definition version the job was submitted with.
    pub workflow_version: String,
    /// Full job snapshot including step states, completed steps and context.
    pub job: Job,
}

impl Checkpoint {
    /// Build a checkpoint for a job snapshot taken at `created_at`.
    pub fn new(job: &Job, step_name: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            id: checkpoint_id(step_name, created_at),
            job_id: job.id,
            step_name: step_name.to_string(),
            created_at,
            schema_version: CHECKPOINT_SCHEMA_VERSION.to_string(),
            workflow_version: job.workflow_version.clone(),
            job: job.clone(),
        }
    }

    /// The listing view of this checkpoint.
    pub fn meta(&self) -> CheckpointMeta {
        CheckpointMeta {
            id: self.id.clone(),
            job_id: self.job_id,
            step_name: self.step_name.clone(),
            created_at: self.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// CheckpointMeta
// ---------------------------------------------------------------------------

/// Checkpoint listing entry, recoverable from a checkpoint id alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub id: String,
    pub job_id: Uuid,
    pub step_name: String,
    pub created_at: DateTime<Utc>,
}

impl CheckpointMeta {
    /// Parse a checkpoint id (`{step_name}_{timestamp_micros}`) back into
    /// metadata. Returns `None` for ids that do not follow the format.
    pub fn parse(job_id: Uuid, id: &str) -> Option<Self> {
        let (step_name, micros) = id.rsplit_once('_')?;
        if step_name.is_empty() {
            return None;
        }
        let micros: i64 = micros.parse().ok()?;
        let created_at = DateTime::from_timestamp_micros(micros)?;
        Some(Self {
            id: id.to_string(),
            job_id,
            step_name: step_name.to_string(),
            created_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
