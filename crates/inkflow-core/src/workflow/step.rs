//! The `StepExecutor` capability and its registry.
//!
//! The engine never knows what a step does. Prompt construction, LLM calls,
//! output parsing, provider retries -- all of it lives behind `StepExecutor`,
//! an opaque capability registered per step id at startup. Any failure or
//! timeout escaping an executor is recorded as step state, never inspected or
//! retried by the engine.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use super::context::JobContext;

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Errors a step executor may surface.
#[derive(Debug, Error)]
pub enum StepError {
    /// Step execution failed. The message is recorded in the step state.
    #[error("step execution failed: {0}")]
    ExecutionFailed(String),

    /// The executor observed a cooperative-stop request and gave up.
    #[error("step cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// StepExecutor
// ---------------------------------------------------------------------------

/// The consumed step-execution capability.
///
/// Object-safe by construction (boxed futures) so implementations can be
/// stored behind `Arc<dyn StepExecutor>` in the registry.
pub trait StepExecutor: Send + Sync {
    /// Execute one step against a read-only context snapshot, returning the
    /// step's JSON output.
    fn execute<'a>(
        &'a self,
        step_id: &'a str,
        ctx: &'a JobContext,
    ) -> Pin<Box<dyn Future<Output = Result<Value, StepError>> + Send + 'a>>;
}

// ---------------------------------------------------------------------------
// StepRegistry
// ---------------------------------------------------------------------------

/// Maps step ids to their executors.
///
/// Populated at startup and immutable afterwards; the engine rejects
/// submissions naming unregistered steps, and a lookup miss at execution
/// time is reported as a step failure.
#[derive(Default)]
pub struct StepRegistry {
    executors: HashMap<String, Arc<dyn StepExecutor>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor for a step id. Replaces any previous binding.
    pub fn register(&mut self, step_id: impl Into<String>, executor: Arc<dyn StepExecutor>) {
        self.executors.insert(step_id.into(), executor);
    }

    /// Whether a step id has a registered executor.
    pub fn contains(&self, step_id: &str) -> bool {
        self.executors.contains_key(step_id)
    }

    /// Number of registered step ids.
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Execute a step through its registered executor.
    pub async fn execute(&self, step_id: &str, ctx: &JobContext) -> Result<Value, StepError> {
        match self.executors.get(step_id) {
            Some(executor) => executor.execute(step_id, ctx).await,
            None => Err(StepError::ExecutionFailed(format!(
                "no executor registered for step '{step_id}'"
            ))),
        }
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("step_ids", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
