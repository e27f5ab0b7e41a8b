//! Workflow definition and execution plan types.
//!
//! A `WorkflowDefinition` is the canonical description of a content-generation
//! pipeline: an ordered list of steps with declared dependencies plus
//! execution policy (worker bound, stage timeout, fail-fast). The compiler in
//! `inkflow-core` turns a definition into an `ExecutionPlan` of stages.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// The canonical workflow definition.
///
/// YAML files and programmatic submission both produce this struct. It is the
/// single source of truth for a workflow's shape and execution policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// UUIDv7 assigned on first save.
    pub id: Uuid,
    /// Human-readable workflow name (alphanumeric and hyphens).
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Semantic version string (e.g. "1.0.0"), recorded in every checkpoint.
    pub version: String,
    /// Stop the job on the first step failure inside a parallel stage.
    /// When false, siblings and satisfied downstream steps keep running and
    /// failures are recorded per step.
    #[serde(default)]
    pub fail_fast: bool,
    /// Worker bound for parallel stages (overrides the engine default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
    /// Wall-clock bound for a whole parallel stage, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_timeout_secs: Option<u64>,
    /// Ordered list of step definitions forming the workflow DAG.
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
    /// Extensible metadata (custom integrations, provenance).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A single step in the workflow DAG.
///
/// Steps carry no business payload: the work itself lives behind the
/// `StepExecutor` registered for the step id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// User-defined step ID (e.g. "gather-sources"). Unique within a workflow.
    pub id: String,
    /// Human-readable step name.
    pub name: String,
    /// Step IDs this step depends on (DAG edges).
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Step-level timeout in seconds (engine default applies when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Execution plan
// ---------------------------------------------------------------------------

/// One unit of the execution plan.
///
/// A `Parallel` stage lists its members in declaration order for
/// deterministic reporting; actual execution within the stage is unordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Stage {
    /// A single step executed on the job driver.
    Sequential { step_id: String },
    /// An independent step set fanned out to the worker pool.
    Parallel { step_ids: Vec<String> },
}

impl Stage {
    /// All step ids in this stage, in declaration order.
    pub fn step_ids(&self) -> Vec<&str> {
        match self {
            Stage::Sequential { step_id } => vec![step_id.as_str()],
            Stage::Parallel { step_ids } => step_ids.iter().map(String::as_str).collect(),
        }
    }
}

/// An ordered list of stages produced by the workflow compiler.
///
/// Every step's dependencies appear in strictly earlier stages than the step
/// itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub stages: Vec<Stage>,
}

impl ExecutionPlan {
    /// True when the plan contains no stages (an empty workflow).
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Total number of steps across all stages.
    pub fn step_count(&self) -> usize {
        self.stages.iter().map(|s| s.step_ids().len()).sum()
    }

    /// Whether any stage contains the given step id.
    pub fn contains_step(&self, step_id: &str) -> bool {
        self.stages
            .iter()
            .any(|s| s.step_ids().contains(&step_id))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
