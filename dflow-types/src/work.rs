//! Work unit and request records shared between the dependency engine and
//! the work/request queues (spec §3, "Work unit" / "Request").

use serde::{Deserialize, Serialize};

use crate::routing::{Accuracy, Priority, Rank, Strictness, Target, WorkType};

/// A task payload plus routing metadata, waiting to be matched with a
/// worker's request. `id` is server-local and monotonic, assigned by
/// whoever enqueues it (the dependency engine for rule-derived work, or
/// directly for a plain Put).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub id: u64,
    pub seq: u64,
    pub work_type: WorkType,
    pub putter_rank: Rank,
    pub priority: Priority,
    pub answer_rank: Rank,
    pub target: Target,
    pub accuracy: Accuracy,
    pub strictness: Strictness,
    pub parallelism: u32,
    pub payload: Vec<u8>,
}

/// An idle worker's outstanding `get` registration (spec §3, "Request").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub rank: Rank,
    pub work_type: WorkType,
    pub count: u32,
    pub blocking: bool,
}
