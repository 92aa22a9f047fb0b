//! The work queue (spec §4.4): four internal collections — per-type
//! untargeted, per-(rank,type) targeted, per-(host,type) targeted, and a
//! parallel-task list — with `add`, `get`, `pop_parallel`, and `steal`.
//!
//! Each targeted/untargeted index is a `BinaryHeap` of lightweight `Entry`
//! handles ordered `(priority desc, seq asc)`; the work unit body lives
//! once in a central map keyed by id. A soft-targeted unit is indexed in
//! two heaps but stored once: whichever heap's `get`/`steal` reaches it
//! first removes it from the central map, and the other heap's entry is
//! then found stale and skipped — the standard lazy-deletion technique for
//! a priority queue that needs O(1) removal-from-either-of-two-indices
//! without a second pointer-threaded structure (spec §9: replace the
//! macro-templated red-black trees with one ordered-map abstraction).

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use dflow_types::{Accuracy, Host, Priority, Rank, Strictness, Target, WorkType, WorkUnit};

/// Fixed per-unit bookkeeping overhead counted against a steal's memory
/// budget, in addition to the payload length (spec §4.4 "Stealing").
const STEAL_UNIT_OVERHEAD: usize = 64;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct Entry {
    priority: Priority,
    seq: u64,
    id: u64,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: higher priority pops first, and among
        // equal priorities the lower (earlier) seq pops first — FIFO
        // within a priority bucket (spec §5, "Ordering guarantees").
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Rank → host assignment, used to resolve host-accuracy targeting (spec
/// §4.4/§4.5). Owned by the server process that knows its cluster topology.
#[derive(Debug, Default)]
pub struct HostDirectory {
    host_of: HashMap<Rank, Host>,
}

impl HostDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_host(&mut self, rank: Rank, host: Host) {
        self.host_of.insert(rank, host);
    }

    pub fn host_of(&self, rank: Rank) -> Option<&Host> {
        self.host_of.get(&rank)
    }
}

/// One server's work queue (spec §4.4).
#[derive(Default)]
pub struct WorkQueue {
    store: HashMap<u64, WorkUnit>,
    untargeted: HashMap<WorkType, BinaryHeap<Entry>>,
    rank_targeted: HashMap<(Rank, WorkType), BinaryHeap<Entry>>,
    host_targeted: HashMap<(Host, WorkType), BinaryHeap<Entry>>,
    /// Parallel tasks (width > 1), kept in insertion order since they are
    /// matched by availability rather than priority (spec §4.4
    /// `pop_parallel`).
    parallel: HashMap<WorkType, Vec<u64>>,
    hosts: HostDirectory,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_host(&mut self, rank: Rank, host: Host) {
        self.hosts.set_host(rank, host);
    }

    /// `add(wu)` (spec §4.4). `wu.id` must be unique among currently queued
    /// work units; `wu.seq` determines FIFO order among equal priorities.
    pub fn add(&mut self, wu: WorkUnit) {
        let entry = Entry {
            priority: wu.priority,
            seq: wu.seq,
            id: wu.id,
        };

        if wu.parallelism > 1 {
            self.parallel.entry(wu.work_type).or_default().push(wu.id);
            self.store.insert(wu.id, wu);
            return;
        }

        match wu.target {
            Target::Any => {
                self.untargeted.entry(wu.work_type).or_default().push(entry);
            }
            Target::Rank(r) => match wu.accuracy {
                Accuracy::Rank => {
                    self.rank_targeted.entry((r, wu.work_type)).or_default().push(entry);
                    if wu.strictness == Strictness::Soft {
                        self.untargeted.entry(wu.work_type).or_default().push(entry);
                    }
                }
                Accuracy::Host => {
                    if let Some(host) = self.hosts.host_of(r).cloned() {
                        self.host_targeted
                            .entry((host, wu.work_type))
                            .or_default()
                            .push(entry);
                    } else {
                        // Unknown host for this rank: degrade to untargeted
                        // rather than stranding the unit unreachably.
                        self.untargeted.entry(wu.work_type).or_default().push(entry);
                    }
                    if wu.strictness == Strictness::Soft {
                        self.untargeted.entry(wu.work_type).or_default().push(entry);
                    }
                }
            },
        }
        self.store.insert(wu.id, wu);
    }

    /// `get(rank, type)` (spec §4.4): strictness order — rank-targeted,
    /// then host-targeted, then untargeted.
    pub fn get(&mut self, rank: Rank, work_type: WorkType) -> Option<WorkUnit> {
        if let Some(wu) = Self::pop_live(&mut self.rank_targeted, &(rank, work_type), &mut self.store) {
            return Some(wu);
        }
        if let Some(host) = self.hosts.host_of(rank).cloned() {
            if let Some(wu) = Self::pop_live(&mut self.host_targeted, &(host, work_type), &mut self.store) {
                return Some(wu);
            }
        }
        Self::pop_live(&mut self.untargeted, &work_type, &mut self.store)
    }

    fn pop_live<K: std::hash::Hash + Eq>(
        heaps: &mut HashMap<K, BinaryHeap<Entry>>,
        key: &K,
        store: &mut HashMap<u64, WorkUnit>,
    ) -> Option<WorkUnit> {
        let heap = heaps.get_mut(key)?;
        while let Some(entry) = heap.pop() {
            if let Some(wu) = store.remove(&entry.id) {
                return Some(wu);
            }
            // Stale: this id was already claimed through a dual-indexed
            // soft-target entry elsewhere.
        }
        None
    }

    /// `pop_parallel(type)` (spec §4.4): claim the first (FIFO) parallel
    /// task of `work_type` whose width can be assembled from `idle`, a
    /// caller-supplied pool of currently idle worker ranks (typically
    /// sourced from the request queue). Returns the task and the ranks
    /// claimed from `idle` (removed from it).
    pub fn pop_parallel(&mut self, work_type: WorkType, idle: &mut Vec<Rank>) -> Option<(WorkUnit, Vec<Rank>)> {
        let list = self.parallel.get_mut(&work_type)?;
        let pos = list.iter().position(|id| {
            self.store
                .get(id)
                .map(|wu| wu.parallelism as usize <= idle.len())
                .unwrap_or(false)
        })?;
        let id = list.remove(pos);
        if list.is_empty() {
            self.parallel.remove(&work_type);
        }
        let wu = self.store.remove(&id)?;
        let claimed = idle.drain(0..wu.parallelism as usize).collect();
        Some((wu, claimed))
    }

    /// `steal` (spec §4.4): only `untargeted[*]` is steal-eligible. Removes
    /// and returns up to `byte_budget` worth of units (payload length plus
    /// fixed overhead) of `work_type` from the untargeted index.
    pub fn steal(&mut self, work_type: WorkType, byte_budget: usize) -> Vec<WorkUnit> {
        let mut out = Vec::new();
        let mut used = 0usize;
        while used < byte_budget {
            match Self::pop_live(&mut self.untargeted, &work_type, &mut self.store) {
                Some(wu) => {
                    used += wu.payload.len() + STEAL_UNIT_OVERHEAD;
                    out.push(wu);
                }
                None => break,
            }
        }
        out
    }

    /// `true` if no ready work of any kind remains (spec §4.5, idle check).
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }
}
