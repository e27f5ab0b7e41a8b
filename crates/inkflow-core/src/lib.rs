//! Orchestration engine for multi-step content-generation jobs.
//!
//! This crate defines the engine and its ports:
//! - `workflow` -- definition validation, the dependency compiler, the job
//!   execution engine, the bounded-parallel step executor, and the checkpoint
//!   manager
//! - `repository` -- the `CheckpointStore` port that the infrastructure layer
//!   implements (filesystem in `inkflow-infra`, in-memory mocks in tests)
//! - `event` -- broadcast bus for job lifecycle events
//!
//! It depends only on `inkflow-types` -- never on a storage or I/O crate.

pub mod event;
pub mod repository;
pub mod workflow;
