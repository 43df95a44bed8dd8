use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by faceid operations.
#[derive(Debug, Error)]
pub enum FaceIdError {
    #[error("corrupt store {path}: {reason}")]
    CorruptStore { path: PathBuf, reason: String },

    #[error("write error: {0}")]
    Write(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),

    #[error("invalid rename: {0}")]
    InvalidRename(String),

    #[error("invalid label: {0}")]
    InvalidLabel(String),

    #[error("invalid merge: {0}")]
    InvalidMerge(String),

    #[error("no valid source embedding to merge")]
    NoValidSource,

    #[error("detector error: {0}")]
    Detector(String),
}
