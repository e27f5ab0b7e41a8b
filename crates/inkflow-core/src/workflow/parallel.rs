//! Bounded-parallel stage executor.
//!
//! Runs an independent step set concurrently through a fixed pool of worker
//! tasks. Workers claim steps from a shared cursor in declaration order, so
//! scheduling order is deterministic even though completion order is not.
//! Each worker receives an `Arc` snapshot of the context taken at stage start
//! and reports `(index, outcome, duration)` over a channel; the collector is
//! the only writer of the result slots, and results are returned in input
//! order regardless of completion order.
//!
//! Failure policy:
//! - `fail_fast = true`: the worker that observes the first failure or
//!   timeout cancels the group token before reporting, so no worker claims
//!   another step past the trip point. Steps not yet claimed report
//!   `Skipped`; in-flight steps settle normally.
//! - `fail_fast = false`: every step runs to completion or its own timeout.
//!
//! At the group deadline the token is cancelled as a cooperative-stop signal,
//! steps observed running are reported `Timeout`, never-claimed steps
//! `Skipped`, and worker tasks are detached -- not aborted -- so executor
//! work is never force-killed mid-flight.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::context::JobContext;
use super::step::StepRegistry;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// One step scheduled into a parallel stage.
#[derive(Debug, Clone)]
pub struct ParallelStep {
    pub step_id: String,
    /// Per-step execution bound; the group deadline caps it further.
    pub timeout: Duration,
}

/// Stage-wide execution policy.
#[derive(Debug, Clone)]
pub struct ParallelOptions {
    /// Worker pool bound.
    pub max_workers: usize,
    /// Wall-clock bound for the whole stage.
    pub group_timeout: Duration,
    /// Halt scheduling of unstarted steps after the first failure/timeout.
    pub fail_fast: bool,
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// Terminal outcome of one step within a stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Success(Value),
    Failure(String),
    Timeout,
    /// Never scheduled: the group halted (fail-fast or deadline) first.
    Skipped,
}

impl StepOutcome {
    /// True for failure and timeout -- the outcomes that trip fail-fast.
    pub fn is_failure(&self) -> bool {
        matches!(self, StepOutcome::Failure(_) | StepOutcome::Timeout)
    }
}

/// Result entry for one input step.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub step_id: String,
    pub outcome: StepOutcome,
    pub duration: Duration,
}

// ---------------------------------------------------------------------------
// ParallelExecutor
// ---------------------------------------------------------------------------

/// Executes independent step sets with bounded workers and a group deadline.
pub struct ParallelExecutor {
    registry: Arc<StepRegistry>,
}

impl ParallelExecutor {
    pub fn new(registry: Arc<StepRegistry>) -> Self {
        Self { registry }
    }

    /// Run a step set to settlement.
    ///
    /// Always returns exactly one `StepResult` per input step, in input
    /// order. Group-timeout expiry is reported through per-step outcomes,
    /// never as an error.
    pub async fn execute(
        &self,
        steps: &[ParallelStep],
        ctx: &JobContext,
        opts: &ParallelOptions,
    ) -> Vec<StepResult> {
        if steps.is_empty() {
            return Vec::new();
        }

        let total = steps.len();
        let group_token = CancellationToken::new();
        let snapshot = Arc::new(ctx.clone());
        let shared_steps: Arc<Vec<ParallelStep>> = Arc::new(steps.to_vec());
        let deadline = Instant::now() + opts.group_timeout;
        let cursor = Arc::new(AtomicUsize::new(0));
        // Start instants keyed by input index; also distinguishes Timeout
        // from Skipped when the deadline fires.
        let started: Arc<DashMap<usize, Instant>> = Arc::new(DashMap::new());
        let (result_tx, mut result_rx) = mpsc::unbounded_channel();

        let workers = opts.max_workers.max(1).min(total);
        let fail_fast = opts.fail_fast;
        let mut join_set = JoinSet::new();
        for _ in 0..workers {
            let registry = Arc::clone(&self.registry);
            let snapshot = Arc::clone(&snapshot);
            let steps = Arc::clone(&shared_steps);
            let cursor = Arc::clone(&cursor);
            let started = Arc::clone(&started);
            let token = group_token.clone();
            let result_tx = result_tx.clone();

            join_set.spawn(async move {
                loop {
                    if token.is_cancelled() {
                        break;
                    }
                    let idx = cursor.fetch_add(1, Ordering::SeqCst);
                    if idx >= steps.len() {
                        break;
                    }
                    let step = &steps[idx];

                    let start = Instant::now();
                    started.insert(idx, start);

                    let work = AssertUnwindSafe(registry.execute(&step.step_id, &snapshot))
                        .catch_unwind();

                    let outcome = match tokio::time::timeout(step.timeout, work).await {
                        Ok(Ok(Ok(output))) => StepOutcome::Success(output),
                        Ok(Ok(Err(err))) => StepOutcome::Failure(err.to_string()),
                        Ok(Err(_panic)) => {
                            StepOutcome::Failure("step executor panicked".to_string())
                        }
                        Err(_elapsed) => StepOutcome::Timeout,
                    };

                    // Cancel here, not in the collector, so this worker can
                    // never claim another step after a fail-fast trip.
                    if fail_fast && outcome.is_failure() {
                        token.cancel();
                    }

                    // The collector may already be gone after the deadline.
                    if result_tx.send((idx, outcome, start.elapsed())).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        // Collect until every slot settles or the deadline fires.
        let mut slots: Vec<Option<(StepOutcome, Duration)>> = vec![None; total];
        let mut settled = 0;
        let mut expired = false;
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                msg = result_rx.recv() => {
                    match msg {
                        None => break,
                        Some((idx, outcome, duration)) => {
                            slots[idx] = Some((outcome, duration));
                            settled += 1;
                            if settled == total {
                                break;
                            }
                        }
                    }
                }
                _ = &mut sleep => {
                    expired = true;
                    group_token.cancel();
                    break;
                }
            }
        }

        if expired {
            tracing::warn!(
                group_timeout_ms = opts.group_timeout.as_millis() as u64,
                settled,
                total,
                "parallel stage hit group timeout, detaching unsettled steps"
            );
            join_set.detach_all();
        }

        steps
            .iter()
            .enumerate()
            .map(|(idx, step)| {
                let (outcome, duration) = match slots[idx].take() {
                    Some(settled) => settled,
                    None => match started.get(&idx) {
                        Some(start) => (StepOutcome::Timeout, start.elapsed()),
                        None => (StepOutcome::Skipped, Duration::ZERO),
                    },
                };
                StepResult {
                    step_id: step.step_id.clone(),
                    outcome,
                    duration,
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
