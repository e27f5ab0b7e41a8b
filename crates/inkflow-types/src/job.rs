//! Job and step execution state.
//!
//! A `Job` is one end-to-end execution of a workflow with specific inputs.
//! It is owned and mutated exclusively by the engine task driving it; the
//! rest of the system sees read snapshots (and the serialized form inside
//! checkpoints).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::workflow::WorkflowDefinition;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Overall status of a job.
///
/// Transitions: `Pending -> Running -> {Paused, Completed, Failed, Cancelled}`
/// and `Paused -> {Running, Cancelled}`. Completed, Failed and Cancelled are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// True for statuses a job can never leave.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Status of an individual step within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
    Skipped,
}

impl StepStatus {
    /// True once the step can no longer change state within this job.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepStatus::Pending | StepStatus::Running)
    }
}

// ---------------------------------------------------------------------------
// StepState
// ---------------------------------------------------------------------------

/// Execution record for a single step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepState {
    /// Step ID matching `StepDefinition.id`.
    pub step_id: String,
    /// Current step status.
    pub status: StepStatus,
    /// JSON output produced by this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Error message if the step failed or timed out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When step execution started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When step execution reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepState {
    /// A step that has just begun executing.
    pub fn running(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Running,
            output: None,
            error: None,
            started_at: Some(Utc::now()),
            completed_at: None,
        }
    }

    /// A step that was never scheduled (unsatisfied dependency or halted group).
    pub fn skipped(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Skipped,
            output: None,
            error: None,
            started_at: None,
            completed_at: Some(Utc::now()),
        }
    }

    /// Mark the step completed with its output.
    pub fn complete(&mut self, output: Value) {
        self.status = StepStatus::Completed;
        self.output = Some(output);
        self.completed_at = Some(Utc::now());
    }

    /// Mark the step failed with an error message.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    /// Mark the step timed out.
    pub fn time_out(&mut self) {
        self.status = StepStatus::Timeout;
        self.error = Some("step timed out".to_string());
        self.completed_at = Some(Utc::now());
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A single execution instance of a workflow.
///
/// `completed_steps` is append-only and ordered by completion; it never
/// shrinks or reorders. `context` holds the serialized step-output
/// accumulator as written into checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// UUIDv7 job ID.
    pub id: Uuid,
    /// ID of the workflow definition being executed.
    pub workflow_id: Uuid,
    /// Workflow name (denormalized for display).
    pub workflow_name: String,
    /// Workflow version at submission time.
    pub workflow_version: String,
    /// Current job status.
    pub status: JobStatus,
    /// Caller-supplied inputs.
    pub inputs: Value,
    /// Serialized step-output accumulator (see `JobContext` in inkflow-core).
    pub context: Value,
    /// IDs of steps that completed successfully, in completion order.
    #[serde(default)]
    pub completed_steps: Vec<String>,
    /// Per-step execution records keyed by step id.
    #[serde(default)]
    pub step_states: HashMap<String, StepState>,
    /// Stop on first failure inside a parallel stage.
    pub fail_fast: bool,
    /// When the job was submitted.
    pub created_at: DateTime<Utc>,
    /// When execution began.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Error message if the job failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Caller-supplied correlation id for tracing across systems.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Job {
    /// Create a new pending job for a workflow definition.
    pub fn new(
        definition: &WorkflowDefinition,
        inputs: Value,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id: definition.id,
            workflow_name: definition.name.clone(),
            workflow_version: definition.version.clone(),
            status: JobStatus::Pending,
            inputs,
            context: Value::Null,
            completed_steps: Vec::new(),
            step_states: HashMap::new(),
            fail_fast: definition.fail_fast,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            correlation_id,
        }
    }

    /// Whether a step already completed successfully in this job.
    pub fn is_step_completed(&self, step_id: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step_id)
    }

    /// Append a step to `completed_steps`. Appending an id twice is a no-op,
    /// keeping the sequence append-only under resume.
    pub fn record_completed_step(&mut self, step_id: &str) {
        if !self.is_step_completed(step_id) {
            self.completed_steps.push(step_id.to_string());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::StepDefinition;
    use serde_json::json;

    fn sample_definition() -> WorkflowDefinition {
        WorkflowDefinition {
            id: Uuid::now_v7(),
            name: "weekly-roundup".to_string(),
            description: None,
            version: "2.1.0".to_string(),
            fail_fast: false,
            max_workers: None,
            group_timeout_secs: None,
            steps: vec![StepDefinition {
                id: "outline".to_string(),
                name: "Outline".to_string(),
                depends_on: vec![],
                timeout_secs: None,
            }],
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn job_status_terminal() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Paused.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
    }

    #[test]
    fn step_status_terminal() {
        assert!(StepStatus::Completed.is_terminal());
        assert!(StepStatus::Timeout.is_terminal());
        assert!(StepStatus::Skipped.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
    }

    #[test]
    fn new_job_carries_definition_fields() {
        let def = sample_definition();
        let job = Job::new(&def, json!({"topic": "rust"}), Some("req-42".to_string()));
        assert_eq!(job.workflow_id, def.id);
        assert_eq!(job.workflow_name, "weekly-roundup");
        assert_eq!(job.workflow_version, "2.1.0");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.inputs["topic"], json!("rust"));
        assert_eq!(job.correlation_id.as_deref(), Some("req-42"));
        assert!(job.completed_steps.is_empty());
    }

    #[test]
    fn completed_steps_append_only() {
        let def = sample_definition();
        let mut job = Job::new(&def, Value::Null, None);
        job.record_completed_step("a");
        job.record_completed_step("b");
        job.record_completed_step("a");
        assert_eq!(job.completed_steps, vec!["a", "b"]);
        assert!(job.is_step_completed("a"));
        assert!(!job.is_step_completed("c"));
    }

    #[test]
    fn step_state_lifecycle() {
        let mut state = StepState::running("draft");
        assert_eq!(state.status, StepStatus::Running);
        assert!(state.started_at.is_some());
        assert!(state.completed_at.is_none());

        state.complete(json!("five paragraphs"));
        assert_eq!(state.status, StepStatus::Completed);
        assert!(state.completed_at.is_some());

        let mut failed = StepState::running("review");
        failed.fail("model refused");
        assert_eq!(failed.status, StepStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("model refused"));

        let mut timed = StepState::running("publish");
        timed.time_out();
        assert_eq!(timed.status, StepStatus::Timeout);

        let skipped = StepState::skipped("notify");
        assert_eq!(skipped.status, StepStatus::Skipped);
        assert!(skipped.started_at.is_none());
    }

    #[test]
    fn job_json_roundtrip() {
        let def = sample_definition();
        let mut job = Job::new(&def, json!({"n": 3}), None);
        job.status = JobStatus::Running;
        job.record_completed_step("outline");
        job.step_states.insert(
            "outline".to_string(),
            StepState {
                step_id: "outline".to_string(),
                status: StepStatus::Completed,
                output: Some(json!("1. intro")),
                error: None,
                started_at: Some(Utc::now()),
                completed_at: Some(Utc::now()),
            },
        );

        let json_str = serde_json::to_string(&job).unwrap();
        let parsed: Job = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.id, job.id);
        assert_eq!(parsed.status, JobStatus::Running);
        assert_eq!(parsed.completed_steps, vec!["outline"]);
        assert_eq!(
            parsed.step_states["outline"].status,
            StepStatus::Completed
        );
    }
}
