//! Workflow compiler: dependency resolution and stage layering.
//!
//! Uses `petgraph` to model step dependencies as a directed graph, then runs
//! Kahn's algorithm to peel topological layers. A layer with one ready step
//! becomes a `Sequential` stage; a layer with several becomes a `Parallel`
//! stage whose members can run concurrently because every dependency sits in
//! an earlier layer. If extraction stalls before all steps are placed, the
//! remaining steps form the cycle report.

use std::collections::HashMap;

use inkflow_types::workflow::{ExecutionPlan, Stage, StepDefinition};
use petgraph::Direction;
use petgraph::graph::DiGraph;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from plan compilation. Both are fatal: the job never starts.
#[derive(Debug, Error)]
pub enum CompileError {
    /// A step references a dependency that is not in the step list.
    #[error("step '{step_id}' depends on unknown step '{dependency}'")]
    UnknownDependency { step_id: String, dependency: String },

    /// The dependency graph contains a cycle. `step_ids` lists the steps
    /// that could not be placed, in declaration order.
    #[error("dependency cycle involving steps: {}", step_ids.join(", "))]
    CycleDetected { step_ids: Vec<String> },
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Compile a step list into an ordered `ExecutionPlan`.
///
/// Declaration order is preserved within each `Parallel` stage for
/// deterministic reporting; it does not constrain execution order inside the
/// stage. An empty step list compiles to an empty plan.
pub fn compile(steps: &[StepDefinition]) -> Result<ExecutionPlan, CompileError> {
    if steps.is_empty() {
        return Ok(ExecutionPlan::default());
    }

    let id_to_pos: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    // Build directed graph: edge from dependency -> dependent. Node weights
    // are declaration positions.
    let mut graph = DiGraph::<usize, ()>::new();
    let nodes: Vec<_> = (0..steps.len()).map(|i| graph.add_node(i)).collect();

    for (pos, step) in steps.iter().enumerate() {
        for dep in &step.depends_on {
            let from = id_to_pos.get(dep.as_str()).ok_or_else(|| {
                CompileError::UnknownDependency {
                    step_id: step.id.clone(),
                    dependency: dep.clone(),
                }
            })?;
            graph.add_edge(nodes[*from], nodes[pos], ());
        }
    }

    // Kahn's algorithm, peeling one zero-indegree layer per iteration.
    let mut indegree: Vec<usize> = nodes
        .iter()
        .map(|n| graph.neighbors_directed(*n, Direction::Incoming).count())
        .collect();

    let mut ready: Vec<usize> = (0..steps.len()).filter(|&i| indegree[i] == 0).collect();
    let mut stages = Vec::new();
    let mut placed = 0;

    while !ready.is_empty() {
        let layer = std::mem::take(&mut ready);
        placed += layer.len();

        let mut next = Vec::new();
        for &i in &layer {
            for succ in graph.neighbors_directed(nodes[i], Direction::Outgoing) {
                let j = graph[succ];
                indegree[j] -= 1;
                if indegree[j] == 0 {
                    next.push(j);
                }
            }
        }
        next.sort_unstable();

        stages.push(match layer.as_slice() {
            [single] => Stage::Sequential {
                step_id: steps[*single].id.clone(),
            },
            many => Stage::Parallel {
                step_ids: many.iter().map(|&i| steps[i].id.clone()).collect(),
            },
        });

        ready = next;
    }

    if placed < steps.len() {
        let step_ids = (0..steps.len())
            .filter(|&i| indegree[i] > 0)
            .map(|i| steps[i].id.clone())
            .collect();
        return Err(CompileError::CycleDetected { step_ids });
    }

    Ok(ExecutionPlan { stages })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
