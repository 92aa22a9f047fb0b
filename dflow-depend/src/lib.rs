//! The dependency engine (spec §4.3): the per-server table of pending
//! tasks, each carrying its own remaining-dependency bitmap, plus the
//! `rule`/`close`/`sub_close` operations that move a task from pending to
//! ready as its inputs are satisfied.
//!
//! This crate owns its dependents lists outright — unlike the whole-datum
//! and per-subscript *listener* tables in `dflow-subscribe`, which serve a
//! different audience (raw (rank, work-type) notification targets), the
//! dependents lists here exist purely to drive this engine's own close
//! bookkeeping and are never observed outside it. `dflow-server` is the
//! only caller: it decides, by querying `dflow-store` and `dflow-subscribe`
//! for each input's already-closed state, what to pass into `rule`, and it
//! routes every `StoreOutcome` closure event into `close`/`sub_close`.

mod pending;

use std::collections::{HashMap, HashSet};

use dflow_types::{DatumId, Subscript, WorkUnit};
use tracing::{trace, warn};

pub use pending::{DependInput, PendingTaskId};
use pending::{PendingTask, Slab};

type SubKey = (DatumId, Subscript);

/// Either the task was satisfied immediately (spec §4.3 step 3: "if all
/// inputs are already closed, skip inserting into the pending table and
/// enqueue the work unit directly") or it is now tracked as pending.
#[derive(Debug)]
pub enum RuleOutcome {
    Ready(WorkUnit),
    Pending(PendingTaskId),
}

/// One server's table of pending tasks and their dependents lists.
#[derive(Default)]
pub struct DependencyEngine {
    tasks: Slab,
    dependents: HashMap<DatumId, Vec<PendingTaskId>>,
    dependents_sub: HashMap<SubKey, Vec<PendingTaskId>>,
}

impl DependencyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_count(&self) -> usize {
        self.tasks.iter().count()
    }

    /// `rule(name, input_ids[], input_id_subs[], work_unit)` (spec §4.3).
    /// `inputs` is the task's full dependency set in declaration order;
    /// `already_closed` is the caller's determination, one bool per input,
    /// of whether that input has already reached `set` (spec §4.3 step 2:
    /// checked against the subscribed table, local store, closed-data LRU,
    /// or a completed cross-server subscribe before this call is made).
    ///
    /// Panics if `inputs.len() != already_closed.len()` — a caller bug, not
    /// a runtime condition (every input must get an already-closed verdict).
    pub fn rule(
        &mut self,
        work_unit: WorkUnit,
        inputs: Vec<DependInput>,
        already_closed: Vec<bool>,
    ) -> RuleOutcome {
        assert_eq!(
            inputs.len(),
            already_closed.len(),
            "one already-closed verdict per input"
        );

        let mut task = PendingTask {
            work_unit,
            inputs,
            closed: already_closed,
            blocker: 0,
        };
        task.advance_blocker();

        if task.is_ready() {
            trace!("rule satisfied at registration time, skipping pending table");
            return RuleOutcome::Ready(task.work_unit);
        }

        let task_id = self.tasks.insert(task);
        // SAFETY of the unwrap: we just inserted it.
        let task = self.tasks.get_mut(task_id).expect("just inserted");

        let mut seen_ids = HashSet::new();
        let mut seen_subs = HashSet::new();
        for (i, input) in task.inputs.iter().enumerate() {
            if task.closed[i] {
                continue;
            }
            match &input.subscript {
                None => {
                    if seen_ids.insert(input.id) {
                        self.dependents.entry(input.id).or_default().push(task_id);
                    }
                }
                Some(sub) => {
                    if seen_subs.insert((input.id, sub.clone())) {
                        self.dependents_sub
                            .entry((input.id, sub.clone()))
                            .or_default()
                            .push(task_id);
                    }
                }
            }
        }
        RuleOutcome::Pending(task_id)
    }

    /// `close(id)` (spec §4.3): a whole-datum close (write refcount reached
    /// zero). Returns the work units of every task that became ready as a
    /// result.
    pub fn close(&mut self, id: DatumId) -> Vec<WorkUnit> {
        let dependents = self.dependents.remove(&id).unwrap_or_default();
        self.notify_dependents(dependents, |input| input.subscript.is_none() && input.id == id)
    }

    /// `sub_close(id, subscript)` (spec §4.3): a per-subscript close
    /// (container key filled, struct field path filled).
    pub fn sub_close(&mut self, id: DatumId, subscript: &Subscript) -> Vec<WorkUnit> {
        let dependents = self
            .dependents_sub
            .remove(&(id, subscript.clone()))
            .unwrap_or_default();
        self.notify_dependents(dependents, |input| {
            input.id == id && input.subscript.as_ref() == Some(subscript)
        })
    }

    fn notify_dependents(
        &mut self,
        dependents: Vec<PendingTaskId>,
        matches: impl Fn(&DependInput) -> bool,
    ) -> Vec<WorkUnit> {
        let mut ready = Vec::new();
        // Guard against processing the same task twice in one call: a task
        // can appear at most once per id/subscript dependents list (`rule`
        // dedups on insert), but defensive dedup costs nothing here and
        // protects against a future caller merging two close events.
        let mut processed = HashSet::new();
        for task_id in dependents {
            if !processed.insert(task_id) {
                continue;
            }
            let Some(task) = self.tasks.get_mut(task_id) else {
                continue;
            };
            for i in task.blocker..task.closed.len() {
                if !task.closed[i] && matches(&task.inputs[i]) {
                    task.closed[i] = true;
                }
            }
            task.advance_blocker();
            if task.is_ready() {
                if let Some(done) = self.tasks.remove(task_id) {
                    ready.push(done.work_unit);
                }
            }
        }
        ready
    }

    /// Server shutdown: drop every still-pending task, returning a leak
    /// report for `ADLB_REPORT_LEAKS` (spec §4.3 "Cancellation", §7 "Leaked
    /// data at shutdown is reported").
    pub fn shutdown_leaks(&mut self) -> Vec<LeakedTask> {
        let leaked: Vec<LeakedTask> = self
            .tasks
            .drain()
            .into_iter()
            .map(|t| LeakedTask {
                work_type: t.work_unit.work_type,
                blocked_on: t.inputs.get(t.blocker).cloned(),
                remaining_inputs: t.closed.len() - t.blocker,
            })
            .collect();
        self.dependents.clear();
        self.dependents_sub.clear();
        if !leaked.is_empty() {
            warn!(count = leaked.len(), "pending tasks leaked at shutdown");
        }
        leaked
    }
}

/// A pending task still blocked at shutdown (spec §4.3 "Cancellation").
#[derive(Debug, Clone)]
pub struct LeakedTask {
    pub work_type: dflow_types::WorkType,
    pub blocked_on: Option<DependInput>,
    pub remaining_inputs: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use dflow_types::{Accuracy, Strictness, Target};

    fn wu(work_type: i32) -> WorkUnit {
        WorkUnit {
            id: 1,
            seq: 1,
            work_type,
            putter_rank: 0,
            priority: 0,
            answer_rank: 0,
            target: Target::Any,
            accuracy: Accuracy::Rank,
            strictness: Strictness::Strict,
            parallelism: 1,
            payload: vec![],
        }
    }

    #[test]
    fn all_inputs_already_closed_skips_pending_table() {
        let mut eng = DependencyEngine::new();
        let outcome = eng.rule(
            wu(1),
            vec![DependInput::whole(10), DependInput::whole(11)],
            vec![true, true],
        );
        assert!(matches!(outcome, RuleOutcome::Ready(_)));
        assert_eq!(eng.pending_count(), 0);
    }

    #[test]
    fn fan_in_releases_exactly_once_when_all_inputs_close() {
        let mut eng = DependencyEngine::new();
        let outcome = eng.rule(
            wu(1),
            vec![
                DependInput::whole(40),
                DependInput::whole(41),
                DependInput::whole(42),
            ],
            vec![false, false, false],
        );
        assert!(matches!(outcome, RuleOutcome::Pending(_)));

        assert!(eng.close(40).is_empty());
        assert!(eng.close(41).is_empty());
        let ready = eng.close(42);
        assert_eq!(ready.len(), 1);
        assert_eq!(eng.pending_count(), 0);
    }

    #[test]
    fn duplicate_input_is_idempotent_under_one_close() {
        let mut eng = DependencyEngine::new();
        let outcome = eng.rule(
            wu(1),
            vec![
                DependInput::whole(50),
                DependInput::whole(50),
                DependInput::whole(51),
            ],
            vec![false, false, false],
        );
        assert!(matches!(outcome, RuleOutcome::Pending(_)));

        // One close(50) satisfies both occurrences of id 50 in this task.
        assert!(eng.close(50).is_empty());
        let ready = eng.close(51);
        assert_eq!(ready.len(), 1);
    }

    #[test]
    fn subscript_close_is_independent_of_whole_datum_close() {
        let mut eng = DependencyEngine::new();
        let key = Subscript::from("k");
        let outcome = eng.rule(
            wu(1),
            vec![DependInput::sub(20, key.clone())],
            vec![false],
        );
        assert!(matches!(outcome, RuleOutcome::Pending(_)));

        // A whole-datum close on the same id does not satisfy a subscript input.
        assert!(eng.close(20).is_empty());
        let ready = eng.sub_close(20, &key);
        assert_eq!(ready.len(), 1);
    }

    #[test]
    fn shutdown_reports_leaked_pending_tasks() {
        let mut eng = DependencyEngine::new();
        eng.rule(wu(7), vec![DependInput::whole(99)], vec![false]);
        let leaked = eng.shutdown_leaks();
        assert_eq!(leaked.len(), 1);
        assert_eq!(leaked[0].work_type, 7);
        assert_eq!(eng.pending_count(), 0);
    }
}
