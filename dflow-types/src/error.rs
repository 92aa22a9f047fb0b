//! The error taxonomy every core operation may signal (spec §7).
//!
//! `SUCCESS` is represented at the Rust type level by `Ok(..)`; every other
//! taxonomy entry is a `Code` variant. A non-success code must never alter
//! server state for the operation that produced it — callers rely on this
//! to treat a failed `store`/`create`/`refcount_incr` as a no-op.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome codes a core operation may report, mirroring spec §7 exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum Code {
    /// Allocation failure. Legitimate; callers may retry or abort.
    #[error("OOM")]
    Oom,
    /// `create` on an id that already has a record.
    #[error("DOUBLE_DECLARE")]
    DoubleDeclare,
    /// `store` on a closed scalar or an already-filled container slot.
    #[error("DOUBLE_WRITE")]
    DoubleWrite,
    /// `retrieve` on an unset scalar.
    #[error("UNSET")]
    Unset,
    /// Operation referenced an id with no record on the owning server.
    #[error("NOT_FOUND")]
    NotFound,
    /// Subscript not present (distinct from slot-created-but-unset).
    #[error("SUBSCRIPT_NOT_FOUND")]
    SubscriptNotFound,
    /// A numeric argument failed to parse.
    #[error("NUMBER_FORMAT")]
    NumberFormat,
    /// Malformed arguments.
    #[error("INVALID")]
    Invalid,
    /// Operation attempted on the reserved null id.
    #[error("NULL")]
    Null,
    /// Type mismatch between the request and the datum's declared type.
    #[error("TYPE")]
    Type,
    /// A refcount change would drive a counter negative.
    #[error("SLOTS_NEGATIVE")]
    SlotsNegative,
    /// Exhaustion of id space, message size, or similar hard limit.
    #[error("LIMIT")]
    Limit,
    /// Catch-all for conditions not otherwise classified.
    #[error("UNKNOWN")]
    Unknown,
}

/// Result type used throughout the core: `Ok` stands in for `SUCCESS`.
pub type Result<T> = std::result::Result<T, Code>;
