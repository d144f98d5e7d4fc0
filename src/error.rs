//! Crate-wide error type.
//!
//! Bid rejections are not errors: the engine returns them as values
//! (`engine::RejectReason`) so callers decide how to surface them.
//! `EngineError` covers the infrastructure faults underneath.

use crate::storage::StorageError;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    /// Transient; callers may retry once per request.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("platform error: {0}")]
    Platform(#[from] reqwest::Error),

    #[error("internal error: {0}")]
    Internal(String),
}
