//! Job execution engine: plan walking, the job state machine, and
//! checkpointed progress.
//!
//! One driver task per job, spawned by `submit`. The driver walks the
//! compiled plan stage by stage: `Sequential` stages run directly on the
//! driver, `Parallel` stages fan out through the `ParallelExecutor`. After
//! every stage the driver checkpoints the job, so a crashed process resumes
//! at the first stage containing an incomplete step.
//!
//! # State machine
//!
//! `Pending -> Running -> {Paused, Completed, Failed, Cancelled}` and
//! `Paused -> {Running, Cancelled}`. Pause and cancel are requests, honored
//! only at stage boundaries -- a parallel stage is never split, and in-flight
//! steps always settle before a cancel takes effect.
//!
//! Step failures are data, not exceptions: anything escaping a `StepExecutor`
//! (errors, timeouts, panics) is recorded in the step state and the job
//! transitions according to policy. Only compilation, validation, and
//! unresolved checkpoint errors surface from the public operations.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures_util::FutureExt;
use inkflow_types::event::JobEvent;
use inkflow_types::job::{Job, JobStatus, StepState};
use inkflow_types::workflow::{ExecutionPlan, Stage, StepDefinition, WorkflowDefinition};
use serde_json::Value;
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::EventBus;
use crate::repository::CheckpointStore;

use super::checkpoint::{CheckpointError, CheckpointManager, CheckpointSelector};
use super::compiler::{self, CompileError};
use super::context::JobContext;
use super::definition::{DefinitionError, validate_definition};
use super::parallel::{ParallelExecutor, ParallelOptions, ParallelStep, StepOutcome};
use super::step::StepRegistry;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default step-level timeout (5 minutes).
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 300;

/// Default parallel-stage timeout (30 minutes).
pub const DEFAULT_GROUP_TIMEOUT_SECS: u64 = 1800;

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Engine-wide execution defaults. Definitions may override the worker bound
/// and group timeout per workflow.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Worker bound for parallel stages.
    pub max_workers: usize,
    /// Checkpoints retained per job after each save.
    pub keep_last: usize,
    /// Checkpoints retained once a job reaches a terminal status.
    pub keep_last_on_termination: usize,
    /// Step timeout when a step declares none.
    pub default_step_timeout_secs: u64,
    /// Parallel-stage timeout when a definition declares none.
    pub default_group_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            keep_last: 10,
            keep_last_on_termination: 3,
            default_step_timeout_secs: DEFAULT_STEP_TIMEOUT_SECS,
            default_group_timeout_secs: DEFAULT_GROUP_TIMEOUT_SECS,
        }
    }
}

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Errors surfaced by the engine's public operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Definition parse/validation failure. The job never starts.
    #[error("definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// Plan compilation failure (unknown dependency or cycle). The job never
    /// starts.
    #[error("compilation error: {0}")]
    Compile(#[from] CompileError),

    /// Checkpoint failure on restore/list/delete.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// No active job or checkpoint under this id.
    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    /// Resume was requested for a job that is not paused.
    #[error("job {0} is not paused")]
    NotPaused(Uuid),

    /// Resume was requested for a job that already finished.
    #[error("job {job_id} already reached terminal status {status:?}")]
    AlreadyTerminal { job_id: Uuid, status: JobStatus },

    /// The definition names a step with no registered executor.
    #[error("no executor registered for step '{0}'")]
    UnregisteredStep(String),
}

// ---------------------------------------------------------------------------
// JobExecutionEngine
// ---------------------------------------------------------------------------

/// Control handle for one in-flight job.
struct JobHandle {
    snapshot: watch::Receiver<Job>,
    cancel: CancellationToken,
    pause: Arc<AtomicBool>,
    resume: Arc<Notify>,
}

struct EngineInner<S: CheckpointStore> {
    checkpoints: CheckpointManager<S>,
    parallel: ParallelExecutor,
    registry: Arc<StepRegistry>,
    events: EventBus,
    config: EngineConfig,
    jobs: DashMap<Uuid, JobHandle>,
}

/// The orchestration engine.
///
/// Each engine owns its checkpoint manager, parallel executor, and step
/// registry -- there is no ambient global state. Jobs run on their own
/// driver tasks; many jobs execute independently and concurrently.
pub struct JobExecutionEngine<S: CheckpointStore + 'static> {
    inner: Arc<EngineInner<S>>,
}

impl<S: CheckpointStore + 'static> Clone for JobExecutionEngine<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: CheckpointStore + 'static> JobExecutionEngine<S> {
    /// Create an engine over a checkpoint store and a startup-populated step
    /// registry.
    pub fn new(store: S, registry: StepRegistry, config: EngineConfig) -> Self {
        let registry = Arc::new(registry);
        Self {
            inner: Arc::new(EngineInner {
                checkpoints: CheckpointManager::new(store, config.keep_last),
                parallel: ParallelExecutor::new(Arc::clone(&registry)),
                registry,
                events: EventBus::new(256),
                config,
                jobs: DashMap::new(),
            }),
        }
    }

    /// The engine's event bus.
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Operational access to checkpoints (list, restore, delete).
    pub fn checkpoints(&self) -> &CheckpointManager<S> {
        &self.inner.checkpoints
    }

    /// IDs of jobs currently driven by this engine.
    pub fn active_jobs(&self) -> Vec<Uuid> {
        self.inner.jobs.iter().map(|e| *e.key()).collect()
    }

    // -----------------------------------------------------------------------
    // Public contract
    // -----------------------------------------------------------------------

    /// Submit a job: validate, compile, and begin asynchronous execution.
    ///
    /// Returns the job id immediately; progress is observable through
    /// `status`, the event bus, and checkpoints.
    pub async fn submit(
        &self,
        definition: WorkflowDefinition,
        inputs: Value,
        correlation_id: Option<String>,
    ) -> Result<Uuid, EngineError> {
        validate_definition(&definition)?;
        for step in &definition.steps {
            if !self.inner.registry.contains(&step.id) {
                return Err(EngineError::UnregisteredStep(step.id.clone()));
            }
        }
        let plan = compiler::compile(&definition.steps)?;

        let job = Job::new(&definition, inputs, correlation_id);
        let ctx = JobContext::new(definition.name.clone(), job.id, job.inputs.clone());
        let job_id = job.id;

        tracing::info!(
            job_id = %job_id,
            workflow = definition.name.as_str(),
            correlation_id = job.correlation_id.as_deref().unwrap_or(""),
            "job submitted"
        );

        self.spawn_driver(definition, plan, job, ctx);
        Ok(job_id)
    }

    /// Request a pause, honored at the next stage boundary.
    ///
    /// A parallel stage is never interrupted mid-flight; the pause
    /// checkpoint is written when the request takes effect.
    pub fn pause(&self, job_id: &Uuid) -> Result<(), EngineError> {
        match self.inner.jobs.get(job_id) {
            Some(handle) => {
                handle.pause.store(true, Ordering::Release);
                tracing::info!(job_id = %job_id, "pause requested");
                Ok(())
            }
            None => Err(EngineError::JobNotFound(*job_id)),
        }
    }

    /// Resume a paused job.
    ///
    /// If the job is still in memory, its driver continues from the boundary
    /// it paused at. Otherwise the latest checkpoint is restored and a new
    /// driver resumes at the first stage containing an incomplete step. A
    /// workflow-version difference against the checkpoint is a warning, not
    /// an error.
    pub async fn resume(
        &self,
        job_id: &Uuid,
        definition: &WorkflowDefinition,
    ) -> Result<(), EngineError> {
        if let Some(handle) = self.inner.jobs.get(job_id) {
            let paused = handle.pause.load(Ordering::Acquire)
                || handle.snapshot.borrow().status == JobStatus::Paused;
            if !paused {
                return Err(EngineError::NotPaused(*job_id));
            }
            handle.pause.store(false, Ordering::Release);
            handle.resume.notify_waiters();
            tracing::info!(job_id = %job_id, "resume requested");
            return Ok(());
        }

        // Process restart path: rebuild the job from its latest checkpoint.
        let checkpoint = self
            .inner
            .checkpoints
            .restore(*job_id, CheckpointSelector::Latest)
            .await
            .map_err(|e| match e {
                CheckpointError::NoCheckpoints(_) => EngineError::JobNotFound(*job_id),
                other => EngineError::Checkpoint(other),
            })?;

        let mut job = checkpoint.job;
        if job.status.is_terminal() {
            return Err(EngineError::AlreadyTerminal {
                job_id: *job_id,
                status: job.status,
            });
        }
        if definition.version != checkpoint.workflow_version {
            tracing::warn!(
                job_id = %job_id,
                checkpoint_version = checkpoint.workflow_version.as_str(),
                definition_version = definition.version.as_str(),
                "resuming with a different workflow version"
            );
        }

        validate_definition(definition)?;
        for step in &definition.steps {
            if !self.inner.registry.contains(&step.id) {
                return Err(EngineError::UnregisteredStep(step.id.clone()));
            }
        }
        let plan = compiler::compile(&definition.steps)?;

        let ctx = if job.context.is_null() {
            JobContext::new(job.workflow_name.clone(), job.id, job.inputs.clone())
        } else {
            JobContext::from_json(job.context.clone())
                .map_err(|e| CheckpointError::Corrupt(e.to_string()))?
        };

        job.status = JobStatus::Running;
        job.error = None;

        tracing::info!(
            job_id = %job_id,
            completed = job.completed_steps.len(),
            "resuming job from checkpoint"
        );

        self.spawn_driver(definition.clone(), plan, job, ctx);
        Ok(())
    }

    /// Request cancellation, honored at the next stage boundary.
    ///
    /// In-flight parallel steps settle rather than being force-killed; the
    /// final checkpoint preserves every completed step.
    pub fn cancel(&self, job_id: &Uuid) -> Result<(), EngineError> {
        match self.inner.jobs.get(job_id) {
            Some(handle) => {
                handle.cancel.cancel();
                tracing::info!(job_id = %job_id, "cancellation requested");
                Ok(())
            }
            None => Err(EngineError::JobNotFound(*job_id)),
        }
    }

    /// Read snapshot of a job.
    ///
    /// Active jobs are read from the driver's watch channel; retired jobs
    /// fall back to their latest checkpoint.
    pub async fn status(&self, job_id: &Uuid) -> Result<Job, EngineError> {
        if let Some(handle) = self.inner.jobs.get(job_id) {
            return Ok(handle.snapshot.borrow().clone());
        }
        match self
            .inner
            .checkpoints
            .restore(*job_id, CheckpointSelector::Latest)
            .await
        {
            Ok(checkpoint) => Ok(checkpoint.job),
            Err(CheckpointError::NoCheckpoints(_)) => Err(EngineError::JobNotFound(*job_id)),
            Err(e) => Err(EngineError::Checkpoint(e)),
        }
    }

    // -----------------------------------------------------------------------
    // Driver spawning
    // -----------------------------------------------------------------------

    fn spawn_driver(
        &self,
        definition: WorkflowDefinition,
        plan: ExecutionPlan,
        job: Job,
        ctx: JobContext,
    ) {
        let (tx, rx) = watch::channel(job.clone());
        let cancel = CancellationToken::new();
        let pause = Arc::new(AtomicBool::new(false));
        let resume = Arc::new(Notify::new());

        self.inner.jobs.insert(
            job.id,
            JobHandle {
                snapshot: rx,
                cancel: cancel.clone(),
                pause: Arc::clone(&pause),
                resume: Arc::clone(&resume),
            },
        );

        let steps = definition
            .steps
            .iter()
            .map(|s| (s.id.clone(), s.clone()))
            .collect();

        let driver = JobDriver {
            inner: Arc::clone(&self.inner),
            definition,
            plan,
            steps,
            job,
            ctx,
            tx,
            cancel,
            pause,
            resume,
        };
        tokio::spawn(driver.run());
    }
}

// ---------------------------------------------------------------------------
// JobDriver
// ---------------------------------------------------------------------------

/// Outcome of a stage boundary check.
enum Boundary {
    Continue,
    Cancelled,
}

/// Outcome of one stage.
enum StageFlow {
    Continue,
    Halt { error: String },
}

/// The task that owns and mutates one job.
struct JobDriver<S: CheckpointStore + 'static> {
    inner: Arc<EngineInner<S>>,
    definition: WorkflowDefinition,
    plan: ExecutionPlan,
    steps: HashMap<String, StepDefinition>,
    job: Job,
    ctx: JobContext,
    tx: watch::Sender<Job>,
    cancel: CancellationToken,
    pause: Arc<AtomicBool>,
    resume: Arc<Notify>,
}

impl<S: CheckpointStore + 'static> JobDriver<S> {
    async fn run(mut self) {
        let fresh = self.job.started_at.is_none();
        self.job.status = JobStatus::Running;
        if fresh {
            self.job.started_at = Some(Utc::now());
        }
        self.publish();
        if fresh {
            self.inner.events.publish(JobEvent::JobStarted {
                job_id: self.job.id,
                workflow_name: self.job.workflow_name.clone(),
            });
        } else {
            self.inner
                .events
                .publish(JobEvent::JobResumed { job_id: self.job.id });
        }
        tracing::info!(
            job_id = %self.job.id,
            workflow = self.job.workflow_name.as_str(),
            stages = self.plan.stages.len(),
            "job running"
        );

        let stages = self.plan.stages.clone();
        for (stage_idx, stage) in stages.iter().enumerate() {
            if let Boundary::Cancelled = self.stage_boundary().await {
                self.finalize(JobStatus::Cancelled, None, "cancelled").await;
                return;
            }

            let flow = match stage {
                Stage::Sequential { step_id } => self.run_sequential(step_id).await,
                Stage::Parallel { step_ids } => self.run_parallel(stage_idx, step_ids).await,
            };

            if let StageFlow::Halt { error } = flow {
                self.finalize(JobStatus::Failed, Some(error), "final").await;
                return;
            }
        }

        self.finalize(JobStatus::Completed, None, "final").await;
    }

    // -----------------------------------------------------------------------
    // Stage execution
    // -----------------------------------------------------------------------

    async fn run_sequential(&mut self, step_id: &str) -> StageFlow {
        if self.job.is_step_completed(step_id) {
            tracing::debug!(job_id = %self.job.id, step_id, "skipping completed step");
            return StageFlow::Continue;
        }
        if !self.deps_satisfied(step_id) {
            self.job
                .step_states
                .insert(step_id.to_string(), StepState::skipped(step_id));
            self.checkpoint(step_id).await;
            return StageFlow::Continue;
        }

        self.job
            .step_states
            .insert(step_id.to_string(), StepState::running(step_id));
        self.publish();
        self.inner.events.publish(JobEvent::StepStarted {
            job_id: self.job.id,
            step_id: step_id.to_string(),
        });

        let timeout = self.step_timeout(step_id);
        let start = std::time::Instant::now();
        let work = AssertUnwindSafe(self.inner.registry.execute(step_id, &self.ctx)).catch_unwind();
        let outcome = match tokio::time::timeout(timeout, work).await {
            Ok(Ok(Ok(output))) => StepOutcome::Success(output),
            Ok(Ok(Err(err))) => StepOutcome::Failure(err.to_string()),
            Ok(Err(_panic)) => StepOutcome::Failure("step executor panicked".to_string()),
            Err(_elapsed) => StepOutcome::Timeout,
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            StepOutcome::Success(output) => {
                if let Err(e) = self.ctx.set_step_output(step_id, output.clone()) {
                    self.record_step_failure(step_id, e.to_string());
                    return StageFlow::Halt {
                        error: format!("step '{step_id}' failed: {e}"),
                    };
                }
                if let Some(state) = self.job.step_states.get_mut(step_id) {
                    state.complete(output);
                }
                self.job.record_completed_step(step_id);
                self.inner.events.publish(JobEvent::StepCompleted {
                    job_id: self.job.id,
                    step_id: step_id.to_string(),
                    duration_ms,
                });
                self.checkpoint(step_id).await;
                StageFlow::Continue
            }
            StepOutcome::Failure(msg) => {
                self.record_step_failure(step_id, msg.clone());
                StageFlow::Halt {
                    error: format!("step '{step_id}' failed: {msg}"),
                }
            }
            StepOutcome::Timeout => {
                if let Some(state) = self.job.step_states.get_mut(step_id) {
                    state.time_out();
                }
                self.publish();
                self.inner.events.publish(JobEvent::StepFailed {
                    job_id: self.job.id,
                    step_id: step_id.to_string(),
                    error: "step timed out".to_string(),
                });
                StageFlow::Halt {
                    error: format!("step '{step_id}' timed out"),
                }
            }
            // A sequential invocation is always scheduled.
            StepOutcome::Skipped => StageFlow::Continue,
        }
    }

    async fn run_parallel(&mut self, stage_idx: usize, step_ids: &[String]) -> StageFlow {
        let mut to_run = Vec::new();
        for step_id in step_ids {
            if self.job.is_step_completed(step_id) {
                tracing::debug!(job_id = %self.job.id, step_id, "skipping completed step");
                continue;
            }
            if !self.deps_satisfied(step_id) {
                self.job
                    .step_states
                    .insert(step_id.clone(), StepState::skipped(step_id.clone()));
                continue;
            }
            to_run.push(ParallelStep {
                step_id: step_id.clone(),
                timeout: self.step_timeout(step_id),
            });
        }

        let mut failed: Vec<String> = Vec::new();
        if !to_run.is_empty() {
            for step in &to_run {
                self.job.step_states.insert(
                    step.step_id.clone(),
                    StepState::running(step.step_id.clone()),
                );
                self.inner.events.publish(JobEvent::StepStarted {
                    job_id: self.job.id,
                    step_id: step.step_id.clone(),
                });
            }
            self.publish();
            self.inner.events.publish(JobEvent::StageStarted {
                job_id: self.job.id,
                stage: stage_idx,
                step_ids: to_run.iter().map(|s| s.step_id.clone()).collect(),
            });

            let opts = ParallelOptions {
                max_workers: self
                    .definition
                    .max_workers
                    .unwrap_or(self.inner.config.max_workers)
                    .max(1),
                group_timeout: Duration::from_secs(
                    self.definition
                        .group_timeout_secs
                        .unwrap_or(self.inner.config.default_group_timeout_secs),
                ),
                fail_fast: self.job.fail_fast,
            };
            let results = self.inner.parallel.execute(&to_run, &self.ctx, &opts).await;

            // Merge in input order: the driver is the only context writer.
            for result in results {
                let duration_ms = result.duration.as_millis() as u64;
                match result.outcome {
                    StepOutcome::Success(output) => {
                        match self.ctx.set_step_output(&result.step_id, output.clone()) {
                            Ok(()) => {
                                if let Some(state) = self.job.step_states.get_mut(&result.step_id)
                                {
                                    state.complete(output);
                                }
                                self.job.record_completed_step(&result.step_id);
                                self.inner.events.publish(JobEvent::StepCompleted {
                                    job_id: self.job.id,
                                    step_id: result.step_id,
                                    duration_ms,
                                });
                            }
                            Err(e) => {
                                failed.push(result.step_id.clone());
                                self.record_step_failure(&result.step_id, e.to_string());
                            }
                        }
                    }
                    StepOutcome::Failure(msg) => {
                        failed.push(result.step_id.clone());
                        self.record_step_failure(&result.step_id, msg);
                    }
                    StepOutcome::Timeout => {
                        failed.push(result.step_id.clone());
                        if let Some(state) = self.job.step_states.get_mut(&result.step_id) {
                            state.time_out();
                        }
                        self.inner.events.publish(JobEvent::StepFailed {
                            job_id: self.job.id,
                            step_id: result.step_id,
                            error: "step timed out".to_string(),
                        });
                    }
                    StepOutcome::Skipped => {
                        self.job
                            .step_states
                            .insert(result.step_id.clone(), StepState::skipped(result.step_id));
                    }
                }
            }
        }

        self.checkpoint(&format!("stage-{stage_idx}")).await;

        if !failed.is_empty() && self.job.fail_fast {
            return StageFlow::Halt {
                error: format!("parallel stage failed at: {}", failed.join(", ")),
            };
        }
        StageFlow::Continue
    }

    // -----------------------------------------------------------------------
    // Control points
    // -----------------------------------------------------------------------

    /// Honor pause/cancel requests between stages.
    async fn stage_boundary(&mut self) -> Boundary {
        let cancel = self.cancel.clone();
        if cancel.is_cancelled() {
            return Boundary::Cancelled;
        }
        if !self.pause.load(Ordering::Acquire) {
            return Boundary::Continue;
        }

        // Register the resume waiter before announcing the pause, so a
        // resume issued the instant the status becomes visible cannot be
        // lost.
        let resume = Arc::clone(&self.resume);
        let mut resumed = pin!(resume.notified());
        resumed.as_mut().enable();
        if !self.pause.load(Ordering::Acquire) {
            return Boundary::Continue;
        }

        self.job.status = JobStatus::Paused;
        self.publish();
        self.checkpoint("paused").await;
        self.inner
            .events
            .publish(JobEvent::JobPaused { job_id: self.job.id });
        tracing::info!(job_id = %self.job.id, "job paused at stage boundary");

        tokio::select! {
            _ = resumed => {
                self.pause.store(false, Ordering::Release);
                self.job.status = JobStatus::Running;
                self.publish();
                self.inner.events.publish(JobEvent::JobResumed { job_id: self.job.id });
                tracing::info!(job_id = %self.job.id, "job resumed");
                Boundary::Continue
            }
            _ = cancel.cancelled() => Boundary::Cancelled,
        }
    }

    async fn finalize(mut self, status: JobStatus, error: Option<String>, step_name: &str) {
        self.job.status = status;
        self.job.completed_at = Some(Utc::now());
        self.job.error = error.clone();
        self.publish();
        self.checkpoint(step_name).await;

        if let Err(e) = self
            .inner
            .checkpoints
            .cleanup(self.job.id, self.inner.config.keep_last_on_termination)
            .await
        {
            tracing::warn!(job_id = %self.job.id, error = %e, "termination retention cleanup failed");
        }

        match status {
            JobStatus::Completed => self.inner.events.publish(JobEvent::JobCompleted {
                job_id: self.job.id,
                steps_completed: self.job.completed_steps.len() as u32,
            }),
            JobStatus::Failed => self.inner.events.publish(JobEvent::JobFailed {
                job_id: self.job.id,
                error: error.unwrap_or_default(),
            }),
            JobStatus::Cancelled => self
                .inner
                .events
                .publish(JobEvent::JobCancelled { job_id: self.job.id }),
            _ => {}
        }

        tracing::info!(
            job_id = %self.job.id,
            status = ?status,
            completed = self.job.completed_steps.len(),
            "job finished"
        );

        self.inner.jobs.remove(&self.job.id);
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn deps_satisfied(&self, step_id: &str) -> bool {
        match self.steps.get(step_id) {
            Some(def) => def
                .depends_on
                .iter()
                .all(|dep| self.job.is_step_completed(dep)),
            None => false,
        }
    }

    fn step_timeout(&self, step_id: &str) -> Duration {
        Duration::from_secs(
            self.steps
                .get(step_id)
                .and_then(|s| s.timeout_secs)
                .unwrap_or(self.inner.config.default_step_timeout_secs),
        )
    }

    fn record_step_failure(&mut self, step_id: &str, error: String) {
        match self.job.step_states.get_mut(step_id) {
            Some(state) => state.fail(error.clone()),
            None => {
                let mut state = StepState::running(step_id);
                state.fail(error.clone());
                self.job.step_states.insert(step_id.to_string(), state);
            }
        }
        self.publish();
        self.inner.events.publish(JobEvent::StepFailed {
            job_id: self.job.id,
            step_id: step_id.to_string(),
            error,
        });
    }

    /// Refresh the externally visible snapshot.
    fn publish(&mut self) {
        self.job.context = self.ctx.to_json();
        self.tx.send_replace(self.job.clone());
    }

    /// Checkpoint the current snapshot. Save failures (already retried once
    /// by the manager) degrade to a warning: the job keeps running in memory.
    async fn checkpoint(&mut self, step_name: &str) {
        self.publish();
        match self.inner.checkpoints.save(&self.job, step_name).await {
            Ok(checkpoint_id) => self.inner.events.publish(JobEvent::CheckpointSaved {
                job_id: self.job.id,
                checkpoint_id,
            }),
            Err(e) => tracing::warn!(
                job_id = %self.job.id,
                error = %e,
                "checkpoint save failed, job continues in memory"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
