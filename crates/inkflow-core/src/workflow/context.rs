//! Job execution context: the step-output accumulator.
//!
//! `JobContext` is the mutable state that flows through a job. It stores the
//! caller's inputs and the outputs of completed steps keyed by step id, with
//! size limits to prevent unbounded memory growth. Only the job driver
//! mutates it, between stages; parallel workers receive read-only snapshots.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum size of a single step output (1 MB).
pub const MAX_STEP_OUTPUT_SIZE: usize = 1_048_576;

/// Maximum total size of all context data (10 MB).
pub const MAX_CONTEXT_SIZE: usize = 10_485_760;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from context bookkeeping.
#[derive(Debug, Error)]
pub enum ContextError {
    /// JSON (de)serialization of context data failed.
    #[error("context serialization failed: {0}")]
    Serialize(String),

    /// The accumulated context grew past the hard limit.
    #[error("total context size ({total} bytes) exceeds maximum ({max} bytes)")]
    SizeExceeded { total: usize, max: usize },
}

// ---------------------------------------------------------------------------
// JobContext
// ---------------------------------------------------------------------------

/// Mutable execution context that tracks state across a job.
///
/// Serializes to JSON for checkpointing; `from_json` restores it on resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobContext {
    /// Step outputs keyed by step ID.
    pub step_outputs: HashMap<String, Value>,
    /// Caller-supplied job inputs.
    pub inputs: Value,
    /// Workflow name.
    pub workflow_name: String,
    /// Job ID.
    pub job_id: Uuid,
}

impl JobContext {
    /// Create a new context for a job.
    pub fn new(workflow_name: String, job_id: Uuid, inputs: Value) -> Self {
        Self {
            step_outputs: HashMap::new(),
            inputs,
            workflow_name,
            job_id,
        }
    }

    /// Store the output of a completed step.
    ///
    /// Enforces `MAX_STEP_OUTPUT_SIZE` (1 MB) per output. If the output
    /// exceeds this limit, it is replaced with a JSON marker indicating the
    /// overflow. Also enforces `MAX_CONTEXT_SIZE` (10 MB) total.
    pub fn set_step_output(&mut self, step_id: &str, output: Value) -> Result<(), ContextError> {
        let serialized =
            serde_json::to_string(&output).map_err(|e| ContextError::Serialize(e.to_string()))?;

        if serialized.len() > MAX_STEP_OUTPUT_SIZE {
            tracing::warn!(
                step_id,
                size = serialized.len(),
                max = MAX_STEP_OUTPUT_SIZE,
                "step output exceeds size limit, truncating"
            );
            let truncated = json!({
                "_truncated": true,
                "_original_size": serialized.len(),
                "_message": format!(
                    "output exceeded {} byte limit and was truncated",
                    MAX_STEP_OUTPUT_SIZE
                )
            });
            self.step_outputs.insert(step_id.to_string(), truncated);
        } else {
            self.step_outputs.insert(step_id.to_string(), output);
        }

        let total = self.total_size();
        if total > MAX_CONTEXT_SIZE {
            return Err(ContextError::SizeExceeded {
                total,
                max: MAX_CONTEXT_SIZE,
            });
        }

        Ok(())
    }

    /// Get the output of a completed step.
    pub fn get_step_output(&self, step_id: &str) -> Option<&Value> {
        self.step_outputs.get(step_id)
    }

    /// Compute the total serialized size of all context data in bytes.
    pub fn total_size(&self) -> usize {
        let outputs_size: usize = self
            .step_outputs
            .values()
            .map(|v| serde_json::to_string(v).map(|s| s.len()).unwrap_or(0))
            .sum();
        let inputs_size = serde_json::to_string(&self.inputs)
            .map(|s| s.len())
            .unwrap_or(0);
        outputs_size + inputs_size
    }

    /// Serialize the entire context to JSON for checkpointing.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(json!({}))
    }

    /// Restore a context from a JSON checkpoint.
    pub fn from_json(value: Value) -> Result<Self, ContextError> {
        serde_json::from_value(value)
            .map_err(|e| ContextError::Serialize(format!("failed to restore context: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
