use thiserror::Error;

/// Errors from checkpoint storage operations (the `CheckpointStore` port in
/// `inkflow-core`, implemented by `inkflow-infra`).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("corrupt checkpoint data: {0}")]
    Corrupt(String),

    #[error("checkpoint not found")]
    NotFound,
}
