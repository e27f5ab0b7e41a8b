//! Job lifecycle events published on the engine's broadcast bus.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events emitted by the job execution engine.
///
/// Consumers subscribe via the `EventBus` in `inkflow-core`; publishing with
/// no subscribers is a no-op. Events are informational -- job truth lives in
/// the job snapshot and its checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// The driver task began executing the plan.
    JobStarted { job_id: Uuid, workflow_name: String },
    /// A stage began executing.
    StageStarted {
        job_id: Uuid,
        stage: usize,
        step_ids: Vec<String>,
    },
    /// A step began executing.
    StepStarted { job_id: Uuid, step_id: String },
    /// A step completed successfully.
    StepCompleted {
        job_id: Uuid,
        step_id: String,
        duration_ms: u64,
    },
    /// A step failed or timed out.
    StepFailed {
        job_id: Uuid,
        step_id: String,
        error: String,
    },
    /// A checkpoint was written.
    CheckpointSaved { job_id: Uuid, checkpoint_id: String },
    /// A pause request took effect at a stage boundary.
    JobPaused { job_id: Uuid },
    /// A paused job resumed.
    JobResumed { job_id: Uuid },
    /// The job ran its full plan.
    JobCompleted { job_id: Uuid, steps_completed: u32 },
    /// The job halted on a failure.
    JobFailed { job_id: Uuid, error: String },
    /// A cancel request took effect.
    JobCancelled { job_id: Uuid },
}
