//! Subscription tables, reference-binding tables, the subscribed dedup set,
//! and the closed-data LRU caches (spec §4.2).
//!
//! This crate only remembers who is waiting and who has already been told;
//! it never touches a datum's storage or refcounts. `dflow-server` queries
//! it after a `dflow-store` call reports a datum or subscript closed, and
//! `dflow-depend`'s `rule()` consults the subscribed set and closed caches
//! before deciding whether a cross-server subscribe is actually needed.
//! No `Mutex`/`Arc` wrapping: every server is single-threaded cooperative
//! (spec §5), so these tables are owned outright by one server instance,
//! unlike the `Arc<Mutex<LruCache<..>>>` the teacher uses for a
//! multi-threaded workflow cache (`knhk-workflow-engine::performance::cache`).

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;

use dflow_types::{DatumId, DatumType, Rank, RcDelta, Subscript, WorkType};
use lru::LruCache;
use tracing::trace;

/// A reference-binding: closing the bound (id, subscript) slot delivers a
/// notification to `ref_id` and, if the stored value is itself a
/// reference, increments that further referand's read refcount (spec §4.1
/// "Algorithmic contracts").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceBinding {
    pub ref_id: DatumId,
    /// Subscript within `ref_id` the delivered value should be written at,
    /// or `None` to write the whole scalar.
    pub ref_subscript: Option<Subscript>,
    pub ref_type: DatumType,
    /// Refcounts to acquire on the delivered value's own referands, applied
    /// atomically with the release of the reservation hold (spec §3,
    /// "acquire while releasing must be atomic").
    pub transfer_refs: RcDelta,
}

/// Default closed-data cache capacity (`ADLB_CLOSED_CACHE_SIZE`, spec §6).
pub const DEFAULT_CLOSED_CACHE_SIZE: usize = 4096;

type SubKey = (DatumId, Subscript);

/// One server's subscription bookkeeping (spec §4.2).
pub struct SubscriptionTables {
    whole_listeners: HashMap<DatumId, Vec<(Rank, WorkType)>>,
    subscript_listeners: HashMap<SubKey, Vec<(Rank, WorkType)>>,
    whole_bindings: HashMap<DatumId, Vec<ReferenceBinding>>,
    subscript_bindings: HashMap<SubKey, Vec<ReferenceBinding>>,
    subscribed: HashSet<(DatumId, Option<Subscript>)>,
    closed_whole: LruCache<DatumId, ()>,
    closed_subscript: LruCache<SubKey, ()>,
}

impl SubscriptionTables {
    pub fn new(closed_cache_size: usize) -> Self {
        let cap = NonZeroUsize::new(closed_cache_size.max(1)).expect("capacity is at least 1");
        SubscriptionTables {
            whole_listeners: HashMap::new(),
            subscript_listeners: HashMap::new(),
            whole_bindings: HashMap::new(),
            subscript_bindings: HashMap::new(),
            subscribed: HashSet::new(),
            closed_whole: LruCache::new(cap),
            closed_subscript: LruCache::new(cap),
        }
    }

    // -- listeners --------------------------------------------------------

    pub fn add_whole_listener(&mut self, id: DatumId, rank: Rank, work_type: WorkType) {
        self.whole_listeners.entry(id).or_default().push((rank, work_type));
    }

    pub fn add_subscript_listener(
        &mut self,
        id: DatumId,
        subscript: Subscript,
        rank: Rank,
        work_type: WorkType,
    ) {
        self.subscript_listeners
            .entry((id, subscript))
            .or_default()
            .push((rank, work_type));
    }

    /// Drain and return every listener registered for `id`'s whole-datum
    /// close, e.g. when `dflow-store` reports `whole_datum_closed`.
    pub fn take_whole_listeners(&mut self, id: DatumId) -> Vec<(Rank, WorkType)> {
        let listeners = self.whole_listeners.remove(&id).unwrap_or_default();
        if !listeners.is_empty() {
            trace!(id, count = listeners.len(), "draining whole-datum listeners");
        }
        listeners
    }

    pub fn take_subscript_listeners(&mut self, id: DatumId, subscript: &Subscript) -> Vec<(Rank, WorkType)> {
        self.subscript_listeners
            .remove(&(id, subscript.clone()))
            .unwrap_or_default()
    }

    // -- reference bindings ------------------------------------------------

    pub fn bind_whole_reference(&mut self, id: DatumId, binding: ReferenceBinding) {
        self.whole_bindings.entry(id).or_default().push(binding);
    }

    pub fn bind_subscript_reference(&mut self, id: DatumId, subscript: Subscript, binding: ReferenceBinding) {
        self.subscript_bindings.entry((id, subscript)).or_default().push(binding);
    }

    pub fn take_whole_bindings(&mut self, id: DatumId) -> Vec<ReferenceBinding> {
        self.whole_bindings.remove(&id).unwrap_or_default()
    }

    pub fn take_subscript_bindings(&mut self, id: DatumId, subscript: &Subscript) -> Vec<ReferenceBinding> {
        self.subscript_bindings.remove(&(id, subscript.clone())).unwrap_or_default()
    }

    // -- subscribed dedup set ----------------------------------------------

    /// `true` if this is the first time (id, subscript) has been marked
    /// subscribed; the caller should issue the actual subscribe (local
    /// check / cache check / cross-server RPC) only in that case.
    pub fn mark_subscribed(&mut self, id: DatumId, subscript: Option<Subscript>) -> bool {
        self.subscribed.insert((id, subscript))
    }

    pub fn is_subscribed(&self, id: DatumId, subscript: Option<&Subscript>) -> bool {
        self.subscribed.contains(&(id, subscript.cloned()))
    }

    /// `close`/`sub_close` step 1: remove from the subscribed table.
    pub fn clear_subscribed(&mut self, id: DatumId, subscript: Option<&Subscript>) {
        self.subscribed.remove(&(id, subscript.cloned()));
    }

    // -- closed-data cache ---------------------------------------------------

    pub fn cache_mark_closed(&mut self, id: DatumId) {
        self.closed_whole.put(id, ());
    }

    pub fn cache_mark_subscript_closed(&mut self, id: DatumId, subscript: Subscript) {
        self.closed_subscript.put((id, subscript), ());
    }

    pub fn cache_is_closed(&mut self, id: DatumId) -> bool {
        self.closed_whole.get(&id).is_some()
    }

    pub fn cache_is_subscript_closed(&mut self, id: DatumId, subscript: &Subscript) -> bool {
        self.closed_subscript.get(&(id, subscript.clone())).is_some()
    }
}

impl Default for SubscriptionTables {
    fn default() -> Self {
        Self::new(DEFAULT_CLOSED_CACHE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listeners_drain_once() {
        let mut t = SubscriptionTables::default();
        t.add_whole_listener(1, 3, 7);
        t.add_whole_listener(1, 4, 7);
        assert_eq!(t.take_whole_listeners(1), vec![(3, 7), (4, 7)]);
        assert!(t.take_whole_listeners(1).is_empty());
    }

    #[test]
    fn subscribed_dedup_is_first_writer_wins() {
        let mut t = SubscriptionTables::default();
        assert!(t.mark_subscribed(1, None));
        assert!(!t.mark_subscribed(1, None));
        assert!(t.is_subscribed(1, None));
        t.clear_subscribed(1, None);
        assert!(!t.is_subscribed(1, None));
    }

    #[test]
    fn closed_cache_evicts_lru_tail_when_full() {
        let mut t = SubscriptionTables::new(2);
        t.cache_mark_closed(1);
        t.cache_mark_closed(2);
        t.cache_mark_closed(3); // evicts id 1, the least recently used
        assert!(!t.cache_is_closed(1));
        assert!(t.cache_is_closed(2));
        assert!(t.cache_is_closed(3));
    }

    #[test]
    fn subscript_listeners_keyed_independently_of_whole_listeners() {
        let mut t = SubscriptionTables::default();
        let sub = Subscript::from("k");
        t.add_subscript_listener(1, sub.clone(), 5, 1);
        t.add_whole_listener(1, 9, 1);
        assert_eq!(t.take_subscript_listeners(1, &sub), vec![(5, 1)]);
        assert_eq!(t.take_whole_listeners(1), vec![(9, 1)]);
    }
}
