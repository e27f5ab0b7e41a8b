//! Infrastructure adapters for Inkflow.
//!
//! Implements the ports defined in `inkflow-core` -- currently the
//! `CheckpointStore` trait, backed by the local filesystem.

pub mod checkpoint;
