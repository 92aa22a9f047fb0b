//! Small routing vocabulary shared by the queues, subscription tables, and
//! network layer: worker rank, work type, priority, and refcount deltas.

use serde::{Deserialize, Serialize};

/// A process rank (worker or server), matching the plain `int` rank used
/// throughout the original ADLB/Turbine sources.
pub type Rank = i32;

/// A work type tag. Work units, requests, and subscriptions are all keyed
/// by this in addition to rank/host.
pub type WorkType = i32;

/// Work unit priority. Larger is higher priority (spec §3).
pub type Priority = i64;

/// Hostname, used for host-granularity targeting (spec §4.4/§4.5).
pub type Host = String;

/// A signed combined change to a datum's read and write reference counts.
/// Used for `rc_decr` on store/retrieve and for cross-server refcount sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RcDelta {
    pub read: i64,
    pub write: i64,
}

impl RcDelta {
    pub const ZERO: RcDelta = RcDelta { read: 0, write: 0 };

    pub fn read(n: i64) -> Self {
        RcDelta { read: n, write: 0 }
    }

    pub fn write(n: i64) -> Self {
        RcDelta { read: 0, write: n }
    }

    pub fn new(read: i64, write: i64) -> Self {
        RcDelta { read, write }
    }

    pub fn is_zero(&self) -> bool {
        self.read == 0 && self.write == 0
    }

    pub fn negate(&self) -> Self {
        RcDelta {
            read: -self.read,
            write: -self.write,
        }
    }

    pub fn add(&self, other: RcDelta) -> RcDelta {
        RcDelta {
            read: self.read + other.read,
            write: self.write + other.write,
        }
    }
}

/// Whether a work unit's target is interpreted at rank or host granularity
/// (spec §4.4/GLOSSARY, "Accuracy").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Accuracy {
    Rank,
    Host,
}

/// Whether a targeted work unit may fall back to any worker if no matching
/// target is available (spec GLOSSARY, "Strict / soft").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strictness {
    Strict,
    Soft,
}

/// A work unit's destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    Any,
    Rank(Rank),
}

impl Target {
    pub fn is_any(&self) -> bool {
        matches!(self, Target::Any)
    }
}
