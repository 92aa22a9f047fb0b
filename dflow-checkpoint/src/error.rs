//! Checkpointing is optional and best-effort (spec §1 Non-goals, §6
//! "Persisted state"): every error here is something a caller can log and
//! fall back from, never a reason to fail the operation that triggered a
//! checkpoint write.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("i/o error on checkpoint file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint file {path} is not open for writing")]
    NotOpen { path: String },

    #[error("key of {0} bytes exceeds the varint-encodable length")]
    KeyTooLarge(usize),

    #[error("value of {0} bytes exceeds the varint-encodable length")]
    ValueTooLarge(usize),
}

pub type Result<T> = std::result::Result<T, CheckpointError>;
