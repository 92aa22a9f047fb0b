//! The request queue (spec §4.5): per-rank FIFO of outstanding `get`
//! requests, plus the idle (blocked) worker count used for quiescence
//! detection.

use std::collections::{HashMap, VecDeque};

use dflow_types::{Accuracy, Rank, WorkType};

/// One outstanding `get` registration. `count` lets a single worker
/// register several outstanding copies with one call (spec §3, "Request").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub rank: Rank,
    pub work_type: WorkType,
    pub count: u32,
    pub blocking: bool,
}

/// One server's request queue (spec §4.5).
#[derive(Default)]
pub struct RequestQueue {
    per_rank: HashMap<Rank, VecDeque<Request>>,
    /// Round-robin cursor for `matches_type`, so repeated calls for the
    /// same type spread across ranks rather than always favoring the
    /// first one registered (spec §4.5: "round-robin across ranks is
    /// acceptable and recommended").
    rr_order: Vec<Rank>,
    rr_cursor: usize,
    nblocked: u32,
    worker_count: u32,
}

impl RequestQueue {
    pub fn new(worker_count: u32) -> Self {
        RequestQueue {
            per_rank: HashMap::new(),
            rr_order: Vec::new(),
            rr_cursor: 0,
            nblocked: 0,
            worker_count,
        }
    }

    pub fn set_worker_count(&mut self, n: u32) {
        self.worker_count = n;
    }

    /// Register `count` outstanding copies of a `get(rank, type)` request.
    pub fn register(&mut self, req: Request) {
        if req.blocking {
            self.nblocked += 1;
        }
        let queue = self.per_rank.entry(req.rank).or_default();
        if queue.is_empty() {
            self.rr_order.push(req.rank);
        }
        queue.push_back(req);
    }

    /// `matches_target(rank, type, accuracy)` (spec §4.5): accuracy `rank`
    /// tries the exact rank; `host` additionally tries any rank on the
    /// same host via `host_of`. Consumes one copy of the match and returns
    /// the satisfied rank, or `None`.
    pub fn matches_target(
        &mut self,
        rank: Rank,
        work_type: WorkType,
        accuracy: Accuracy,
        host_of: impl Fn(Rank) -> Option<String>,
    ) -> Option<Rank> {
        if self.take_one(rank, work_type).is_some() {
            return Some(rank);
        }
        if accuracy == Accuracy::Host {
            let host = host_of(rank)?;
            let candidates: Vec<Rank> = self
                .per_rank
                .iter()
                .filter(|(_, q)| !q.is_empty())
                .map(|(&r, _)| r)
                .filter(|&r| host_of(r).as_deref() == Some(host.as_str()))
                .collect();
            for candidate in candidates {
                if self.take_one(candidate, work_type).is_some() {
                    return Some(candidate);
                }
            }
        }
        None
    }

    /// `matches_type(type)` (spec §4.5): any rank with an outstanding
    /// request of `work_type`, visited round-robin.
    pub fn matches_type(&mut self, work_type: WorkType) -> Option<Rank> {
        if self.rr_order.is_empty() {
            return None;
        }
        let n = self.rr_order.len();
        for step in 0..n {
            let idx = (self.rr_cursor + step) % n;
            let rank = self.rr_order[idx];
            if self.take_one(rank, work_type).is_some() {
                self.rr_cursor = (idx + 1) % n;
                return Some(rank);
            }
        }
        None
    }

    /// Every rank with at least one outstanding, unconsumed request for
    /// `work_type`, in registration order. Used to assemble the idle pool
    /// a parallel task's width is matched against (spec §4.4
    /// `pop_parallel`) without consuming anything.
    pub fn idle_ranks_for(&self, work_type: WorkType) -> Vec<Rank> {
        self.rr_order
            .iter()
            .copied()
            .filter(|rank| {
                self.per_rank
                    .get(rank)
                    .is_some_and(|q| q.iter().any(|r| r.work_type == work_type))
            })
            .collect()
    }

    /// Consume one outstanding copy of `rank`'s request for `work_type`,
    /// the same bookkeeping `matches_target`/`matches_type` perform, for a
    /// caller (parallel assembly) that already picked the rank itself.
    pub fn take(&mut self, rank: Rank, work_type: WorkType) -> bool {
        self.take_one(rank, work_type).is_some()
    }

    fn take_one(&mut self, rank: Rank, work_type: WorkType) -> Option<()> {
        let queue = self.per_rank.get_mut(&rank)?;
        let pos = queue.iter().position(|r| r.work_type == work_type)?;
        let req = &mut queue[pos];
        req.count -= 1;
        let blocking = req.blocking;
        if req.count == 0 {
            queue.remove(pos);
        }
        if queue.is_empty() {
            self.per_rank.remove(&rank);
            self.rr_order.retain(|&r| r != rank);
        }
        if blocking {
            self.nblocked = self.nblocked.saturating_sub(1);
        }
        Some(())
    }

    /// Explicit decrement without a match, e.g. a worker cancelling a
    /// registered-but-unfulfilled blocking request.
    pub fn decrement_blocked(&mut self) {
        self.nblocked = self.nblocked.saturating_sub(1);
    }

    pub fn nblocked(&self) -> u32 {
        self.nblocked
    }

    pub fn worker_count(&self) -> u32 {
        self.worker_count
    }

    /// Quiescence precondition on the request-queue side: every worker is
    /// blocked. Combined with `WorkQueue::is_empty` by the caller for the
    /// full idle check (spec §4.5, §5).
    pub fn all_workers_blocked(&self) -> bool {
        self.nblocked == self.worker_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_match_exact_rank() {
        let mut rq = RequestQueue::new(1);
        rq.register(Request { rank: 3, work_type: 1, count: 1, blocking: true });
        assert_eq!(rq.nblocked(), 1);
        assert_eq!(rq.matches_target(3, 1, Accuracy::Rank, |_| None), Some(3));
        assert_eq!(rq.nblocked(), 0);
    }

    #[test]
    fn host_accuracy_matches_any_rank_on_host() {
        let mut rq = RequestQueue::new(2);
        rq.register(Request { rank: 1, work_type: 1, count: 1, blocking: true });
        let host_of = |r: Rank| -> Option<String> {
            match r {
                0 | 1 => Some("hostA".into()),
                _ => Some("hostB".into()),
            }
        };
        assert_eq!(rq.matches_target(0, 1, Accuracy::Host, host_of), Some(1));
    }

    #[test]
    fn matches_type_round_robins_across_ranks() {
        let mut rq = RequestQueue::new(2);
        rq.register(Request { rank: 1, work_type: 2, count: 1, blocking: false });
        rq.register(Request { rank: 2, work_type: 2, count: 1, blocking: false });
        let first = rq.matches_type(2).unwrap();
        rq.register(Request { rank: first, work_type: 2, count: 1, blocking: false });
        let second = rq.matches_type(2).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn count_of_copies_decrements_until_exhausted() {
        let mut rq = RequestQueue::new(1);
        rq.register(Request { rank: 1, work_type: 1, count: 2, blocking: false });
        assert_eq!(rq.matches_target(1, 1, Accuracy::Rank, |_| None), Some(1));
        assert_eq!(rq.matches_target(1, 1, Accuracy::Rank, |_| None), Some(1));
        assert_eq!(rq.matches_target(1, 1, Accuracy::Rank, |_| None), None);
    }

    #[test]
    fn idle_check_requires_all_workers_blocked() {
        let mut rq = RequestQueue::new(2);
        rq.register(Request { rank: 1, work_type: 1, count: 1, blocking: true });
        assert!(!rq.all_workers_blocked());
        rq.register(Request { rank: 2, work_type: 1, count: 1, blocking: true });
        assert!(rq.all_workers_blocked());
    }
}
