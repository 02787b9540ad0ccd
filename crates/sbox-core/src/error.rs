use std::path::PathBuf;

use thiserror::Error;

pub type SboxResult<T> = Result<T, SboxError>;

#[derive(Debug, Error)]
pub enum SboxError {
    /// Tag check failed. At chunk 0 this almost always means a wrong password.
    #[error("authentication failed at chunk {chunk_index} (offset {offset}): wrong password or corrupted data")]
    Authentication { chunk_index: u64, offset: u64 },

    #[error("artifact truncated at chunk {chunk_index} (offset {offset})")]
    TruncatedStream { chunk_index: u64, offset: u64 },

    #[error("checkpoint corrupt: {0}")]
    CheckpointCorrupt(String),

    #[error("chunk {chunk_index} too large: {len} bytes of ciphertext")]
    OversizeChunk { chunk_index: u64, len: usize },

    #[error("malformed frame at chunk {chunk_index}: {reason}")]
    MalformedFrame { chunk_index: u64, reason: String },

    #[error("artifact header error: {0}")]
    Header(String),

    #[error("cannot resume: {0}")]
    ResumeMismatch(String),

    #[error("integrity mismatch: expected {expected}, computed {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("digest sidecar missing: {}", .0.display())]
    MissingDigest(PathBuf),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SboxError {
    /// True for failures caused by a wrong key rather than a damaged artifact.
    pub fn is_wrong_password(&self) -> bool {
        matches!(self, SboxError::Authentication { chunk_index: 0, .. })
    }
}
