//! The pending-task slab: O(1) insert and O(1) removal-on-ready, addressed
//! by index rather than by pointer (spec §9, "replace pointer-threaded
//! intrusive lists with arena-allocated nodes addressed by index").

use dflow_types::{DatumId, Subscript, WorkUnit};

/// One input a pending task is waiting on: either a whole-datum close or a
/// close of a specific subscript within it (spec §3, "Pending task record").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependInput {
    pub id: DatumId,
    pub subscript: Option<Subscript>,
}

impl DependInput {
    pub fn whole(id: DatumId) -> Self {
        DependInput { id, subscript: None }
    }

    pub fn sub(id: DatumId, subscript: Subscript) -> Self {
        DependInput {
            id,
            subscript: Some(subscript),
        }
    }
}

/// Opaque handle into the pending-task slab. Stable across insert/remove of
/// other tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingTaskId(usize);

#[derive(Debug)]
pub(crate) struct PendingTask {
    pub work_unit: WorkUnit,
    pub inputs: Vec<DependInput>,
    /// Per-input closed bit. Parallel to `inputs`.
    pub closed: Vec<bool>,
    /// Lowest index not yet known closed — the input this task is
    /// currently "waiting on" for reporting/debugging (spec §3, `blocker`).
    pub blocker: usize,
}

impl PendingTask {
    pub(crate) fn is_ready(&self) -> bool {
        self.blocker >= self.closed.len()
    }

    pub(crate) fn advance_blocker(&mut self) {
        while self.blocker < self.closed.len() && self.closed[self.blocker] {
            self.blocker += 1;
        }
    }
}

/// Arena of pending tasks, addressed by `PendingTaskId`. A freed slot is
/// reused by the next insert, same idiom as a generational slab without the
/// generation check (this engine never holds a stale `PendingTaskId` across
/// a remove — every holder of one either owns it uniquely in a dependents
/// list or just received it from `insert`).
#[derive(Debug, Default)]
pub(crate) struct Slab {
    slots: Vec<Option<PendingTask>>,
    free: Vec<usize>,
}

impl Slab {
    pub fn insert(&mut self, task: PendingTask) -> PendingTaskId {
        if let Some(i) = self.free.pop() {
            self.slots[i] = Some(task);
            PendingTaskId(i)
        } else {
            self.slots.push(Some(task));
            PendingTaskId(self.slots.len() - 1)
        }
    }

    pub fn get_mut(&mut self, id: PendingTaskId) -> Option<&mut PendingTask> {
        self.slots.get_mut(id.0).and_then(|s| s.as_mut())
    }

    pub fn remove(&mut self, id: PendingTaskId) -> Option<PendingTask> {
        let slot = self.slots.get_mut(id.0)?;
        let task = slot.take()?;
        self.free.push(id.0);
        Some(task)
    }

    pub fn contains(&self, id: PendingTaskId) -> bool {
        matches!(self.slots.get(id.0), Some(Some(_)))
    }

    /// Every still-pending task, for shutdown leak reporting.
    pub fn iter(&self) -> impl Iterator<Item = (PendingTaskId, &PendingTask)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|t| (PendingTaskId(i), t)))
    }

    /// Take every task out, for shutdown teardown.
    pub fn drain(&mut self) -> Vec<PendingTask> {
        let out: Vec<_> = self.slots.iter_mut().filter_map(|s| s.take()).collect();
        self.free.clear();
        self.slots.clear();
        out
    }
}
