//! The per-shard server state machine (spec §4, §5): every `Request` this
//! process answers is dispatched through `Server::handle`, which touches
//! only in-process data structures and returns a `Reply` plus whatever
//! `Outbound` actions still need the network. `run::serve` is the only
//! place those actions actually reach `dflow-net`.
//!
//! Every handler here runs to completion without itself waiting on another
//! message (spec §5, "Suspension points"): cross-server coordination is
//! always expressed as a queued `Outbound`, never an inline `.await`.

use std::collections::HashSet;

use dflow_depend::{DependInput, DependencyEngine, LeakedTask, RuleOutcome};
use dflow_net::{
    ContainerReferenceRequest, CreateRequest, EnumerateRequest, ExistsRequest, GetRequest,
    InsertAtomicRequest, PutRequest, PutRuleRequest, RefcountIncrRequest, RemoteCloseRequest,
    Reply, Request, RetrieveRequest, StoreRequest, SubscribeRequest, SyncRefcountRequest,
    SyncSubscribeRequest,
};
use dflow_queue::{Request as DispatchRequest, RequestQueue, WorkQueue};
use dflow_store::{DatumStore, StoreOutcome};
use dflow_subscribe::{ReferenceBinding, SubscriptionTables};
use dflow_types::{
    Accuracy, Code, DatumId, DatumType, RcDelta, Strictness, Subscript, Target, Topology,
    WorkUnit, NULL_ID,
};
use tracing::{debug, warn};

use crate::outbound::Outbound;

/// Default worker count used to size the request queue's quiescence
/// counter before the topology layer reports the real cluster size.
const DEFAULT_WORKER_COUNT: u32 = 1;

/// Outcome of one `Server::handle` call.
#[derive(Debug)]
pub struct HandleResult {
    pub reply: Reply,
    pub outbound: Vec<Outbound>,
}

/// One server's full in-process state: its shard of the datum store, its
/// subscription/dependency/queue bookkeeping, and the small amount of
/// local-only state (locks, id counters) that doesn't belong in any of
/// those crates individually.
pub struct Server {
    topology: Topology,
    store: DatumStore,
    subs: SubscriptionTables,
    depend: DependencyEngine,
    work: WorkQueue,
    requests: RequestQueue,
    locks: HashSet<DatumId>,
    next_work_id: u64,
    next_seq: u64,
    report_leaks: bool,
}

impl Server {
    pub fn new(topology: Topology, closed_cache_size: usize, report_leaks: bool) -> Self {
        Server {
            topology,
            store: DatumStore::new(topology),
            subs: SubscriptionTables::new(closed_cache_size),
            depend: DependencyEngine::new(),
            work: WorkQueue::new(),
            requests: RequestQueue::new(DEFAULT_WORKER_COUNT),
            locks: HashSet::new(),
            next_work_id: 1,
            next_seq: 1,
            report_leaks,
        }
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn set_worker_count(&mut self, n: u32) {
        self.requests.set_worker_count(n);
    }

    pub fn set_host(&mut self, rank: dflow_types::Rank, host: String) {
        self.work.set_host(rank, host);
    }

    /// Quiescence check (spec §4.5/§5): every worker blocked on `get` and
    /// no ready work of any kind remains.
    pub fn is_idle(&self) -> bool {
        self.work.is_empty() && self.requests.all_workers_blocked()
    }

    fn next_work_id(&mut self) -> u64 {
        let id = self.next_work_id;
        self.next_work_id += 1;
        id
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    pub fn handle(&mut self, req: Request) -> HandleResult {
        let mut out = Vec::new();
        let reply = match req {
            Request::Create(r) => self.do_create(r),
            Request::Store(r) => self.do_store(r, &mut out),
            Request::Retrieve(r) => self.do_retrieve(r, &mut out),
            Request::Exists(r) => self.do_exists(r, &mut out),
            Request::Enumerate(r) => self.do_enumerate(r, &mut out),
            Request::RefcountIncr(r) => self.do_refcount_incr(r, &mut out),
            Request::Subscribe(r) => self.do_subscribe(r),
            Request::ContainerReference(r) => self.do_container_reference(r, &mut out),
            Request::Unique => self.do_unique(),
            Request::InsertAtomic(r) => self.do_insert_atomic(r, &mut out),
            Request::Lock(id) => self.do_lock(id),
            Request::Unlock(id) => self.do_unlock(id),
            Request::DeclareStruct { index, info } => self.do_declare_struct(index, info),
            Request::Put(r) => self.do_put(r),
            Request::PutRule(r) => self.do_put_rule(r, &mut out),
            Request::Get(r) => self.do_get(r),
            Request::SyncSubscribe(r) => self.do_sync_subscribe(r),
            Request::SyncRefcount(r) => self.do_sync_refcount(r, &mut out),
            Request::RemoteClose(r) => self.do_remote_close(r),
            Request::Shutdown => self.do_shutdown(),
        };
        HandleResult { reply, outbound: out }
    }

    /// Feed the reply to a previously queued `SyncSubscribeQuery` back into
    /// the engine (spec §4.6): `already_closed = true` is treated exactly
    /// like receiving a `close`/`sub_close` notification for that input.
    pub fn on_sync_subscribe_reply(
        &mut self,
        id: DatumId,
        subscript: Option<Subscript>,
        already_closed: bool,
    ) -> Vec<Outbound> {
        let mut out = Vec::new();
        if already_closed {
            match &subscript {
                None => self.fire_whole_close(id, &mut out),
                Some(sub) => self.fire_sub_close(id, sub, &mut out),
            }
        }
        out
    }

    // -- refcount/closure plumbing shared by every mutating op --------------

    fn push_remote_refcount(&self, remote: Vec<(DatumId, RcDelta)>, out: &mut Vec<Outbound>) {
        for (id, delta) in remote {
            let target_rank = self.topology.owner_of(id) as dflow_types::Rank;
            out.push(Outbound::RefcountSync { target_rank, id, delta });
        }
    }

    fn apply_store_outcome(&mut self, id: DatumId, outcome: StoreOutcome, out: &mut Vec<Outbound>) {
        if outcome.whole_datum_closed {
            self.fire_whole_close(id, out);
        }
        if let Some(sub) = &outcome.subscript_closed {
            self.fire_sub_close(id, sub, out);
        }
        self.push_remote_refcount(outcome.effects.remote, out);
    }

    fn fire_whole_close(&mut self, id: DatumId, out: &mut Vec<Outbound>) {
        self.subs.cache_mark_closed(id);
        for wu in self.depend.close(id) {
            self.work.add(wu);
        }
        let listeners = self.subs.take_whole_listeners(id);
        if !listeners.is_empty() {
            debug!(id, count = listeners.len(), "whole-datum listeners satisfied");
        }
        for (rank, _work_type) in listeners {
            if rank != self.topology.rank as dflow_types::Rank {
                out.push(Outbound::RemoteClose { target_rank: rank, id, subscript: None });
            }
        }
        let bindings = self.subs.take_whole_bindings(id);
        for binding in bindings {
            if let Err(code) =
                self.deliver_reference(id, None, &binding, RcDelta::ZERO, out)
            {
                warn!(?code, id, "whole-datum reference delivery failed");
            }
        }
    }

    fn fire_sub_close(&mut self, id: DatumId, sub: &Subscript, out: &mut Vec<Outbound>) {
        self.subs.cache_mark_subscript_closed(id, sub.clone());
        for wu in self.depend.sub_close(id, sub) {
            self.work.add(wu);
        }
        let listeners = self.subs.take_subscript_listeners(id, sub);
        if !listeners.is_empty() {
            debug!(id, %sub, count = listeners.len(), "subscript listeners satisfied");
        }
        for (rank, _work_type) in listeners {
            if rank != self.topology.rank as dflow_types::Rank {
                out.push(Outbound::RemoteClose {
                    target_rank: rank,
                    id,
                    subscript: Some(sub.clone()),
                });
            }
        }
        let bindings = self.subs.take_subscript_bindings(id, sub);
        for binding in bindings {
            if let Err(code) =
                self.deliver_reference(id, Some(sub), &binding, RcDelta::read(-1), out)
            {
                warn!(?code, id, %sub, "subscript reference delivery failed");
            }
        }
    }

    /// Read the just-closed value at `(id, sub)`, deliver it into
    /// `binding.ref_id`, and release `release` (the reservation hold taken
    /// at registration, if any) from `id`'s own refcounts. Used both for
    /// the immediate-delivery path (value already present) and the
    /// deferred path (fired from `fire_sub_close`/`fire_whole_close`).
    fn deliver_reference(
        &mut self,
        id: DatumId,
        sub: Option<&Subscript>,
        binding: &ReferenceBinding,
        release: RcDelta,
        out: &mut Vec<Outbound>,
    ) -> Result<Vec<u8>, Code> {
        let retrieved = self.store.retrieve(id, sub, RcDelta::ZERO, binding.transfer_refs)?;
        self.push_remote_refcount(retrieved.effects.remote.clone(), out);
        let value =
            dflow_types::unpack(&retrieved.bytes, &binding.ref_type, self.store.struct_registry())?;
        if self.store.is_local(binding.ref_id) {
            match self.store.store(binding.ref_id, binding.ref_subscript.as_ref(), value, RcDelta::write(1)) {
                Ok(store_outcome) => self.apply_store_outcome(binding.ref_id, store_outcome, out),
                Err(code) => warn!(?code, ref_id = binding.ref_id, "reference delivery store failed"),
            }
        } else {
            debug!(ref_id = binding.ref_id, "cross-shard reference delivery not implemented, dropping");
        }
        if !release.is_zero() {
            let effects = self.store.refcount_incr(id, release)?;
            self.push_remote_refcount(effects.remote, out);
        }
        Ok(retrieved.bytes)
    }

    // -- individual operations ----------------------------------------------

    fn do_create(&mut self, r: CreateRequest) -> Reply {
        let id = if r.id == NULL_ID { None } else { Some(r.id) };
        match self.store.create(id, r.ty, r.read_rc, r.write_rc, r.permanent) {
            Ok(id) => Reply::Create { id },
            Err(code) => Reply::Error(code),
        }
    }

    fn do_store(&mut self, r: StoreRequest, out: &mut Vec<Outbound>) -> Reply {
        let value = match dflow_types::unpack(&r.bytes, &r.ty, self.store.struct_registry()) {
            Ok(v) => v,
            Err(code) => return Reply::Error(code),
        };
        match self.store.store(r.id, r.subscript.as_ref(), value, r.rc_decr) {
            Ok(outcome) => {
                self.apply_store_outcome(r.id, outcome, out);
                Reply::Store
            }
            Err(code) => Reply::Error(code),
        }
    }

    fn do_retrieve(&mut self, r: RetrieveRequest, out: &mut Vec<Outbound>) -> Reply {
        match self.store.retrieve(
            r.id,
            r.subscript.as_ref(),
            r.refc_policy.decr,
            r.refc_policy.acquire,
        ) {
            Ok(outcome) => {
                self.push_remote_refcount(outcome.effects.remote, out);
                Reply::Retrieve { ty: outcome.ty, bytes: outcome.bytes }
            }
            Err(code) => Reply::Error(code),
        }
    }

    fn do_exists(&mut self, r: ExistsRequest, out: &mut Vec<Outbound>) -> Reply {
        if r.id == NULL_ID {
            return Reply::Error(Code::Null);
        }
        let exists = self.store.exists(r.id);
        let set = exists && self.store.is_closed(r.id, r.subscript.as_ref()).unwrap_or(false);
        if exists && !r.decr.is_zero() {
            match self.store.refcount_incr(r.id, r.decr.negate()) {
                Ok(effects) => self.push_remote_refcount(effects.remote, out),
                Err(code) => return Reply::Error(code),
            }
        }
        Reply::Exists { exists, set }
    }

    fn do_enumerate(&mut self, r: EnumerateRequest, out: &mut Vec<Outbound>) -> Reply {
        let mut entries = match self.store.enumerate(r.id, r.offset, r.count) {
            Ok(e) => e,
            Err(code) => return Reply::Error(code),
        };
        if !r.include_keys {
            for e in entries.iter_mut() {
                e.0 = None;
            }
        }
        if !r.include_vals {
            for e in entries.iter_mut() {
                e.1 = Vec::new();
            }
        }
        let count = entries.len();
        if !r.decr.is_zero() {
            match self.store.refcount_incr(r.id, r.decr.negate()) {
                Ok(effects) => self.push_remote_refcount(effects.remote, out),
                Err(code) => return Reply::Error(code),
            }
        }
        Reply::Enumerate { entries, count }
    }

    fn do_refcount_incr(&mut self, r: RefcountIncrRequest, out: &mut Vec<Outbound>) -> Reply {
        match self.store.refcount_incr(r.id, RcDelta::new(r.read, r.write)) {
            Ok(effects) => {
                self.push_remote_refcount(effects.remote, out);
                Reply::RefcountIncr
            }
            Err(code) => Reply::Error(code),
        }
    }

    fn do_subscribe(&mut self, r: SubscribeRequest) -> Reply {
        if !self.store.exists(r.id) {
            return Reply::Error(Code::NotFound);
        }
        let already = self.store.is_closed(r.id, r.subscript.as_ref()).unwrap_or(false);
        if already {
            return Reply::Subscribe { subscribed: true };
        }
        match &r.subscript {
            None => self.subs.add_whole_listener(r.id, r.requester_rank, r.work_type),
            Some(sub) => {
                self.subs
                    .add_subscript_listener(r.id, sub.clone(), r.requester_rank, r.work_type)
            }
        }
        Reply::Subscribe { subscribed: false }
    }

    fn do_container_reference(&mut self, r: ContainerReferenceRequest, out: &mut Vec<Outbound>) -> Reply {
        let already = match self.store.is_closed(r.id, Some(&r.subscript)) {
            Ok(b) => b,
            Err(code) => return Reply::Error(code),
        };
        if already {
            let binding = ReferenceBinding {
                ref_id: r.ref_id,
                ref_subscript: r.ref_subscript,
                ref_type: r.ref_type,
                transfer_refs: r.transfer_refs,
            };
            match self.deliver_reference(r.id, Some(&r.subscript), &binding, RcDelta::ZERO, out) {
                Ok(bytes) => Reply::ContainerReference { value: Some(bytes) },
                Err(code) => Reply::Error(code),
            }
        } else {
            if let Err(code) = self.store.refcount_incr(r.id, RcDelta::read(1)) {
                return Reply::Error(code);
            }
            self.subs.bind_subscript_reference(
                r.id,
                r.subscript,
                ReferenceBinding {
                    ref_id: r.ref_id,
                    ref_subscript: r.ref_subscript,
                    ref_type: r.ref_type,
                    transfer_refs: r.transfer_refs,
                },
            );
            Reply::ContainerReference { value: None }
        }
    }

    fn do_unique(&mut self) -> Reply {
        match self.store.create(None, DatumType::Int, 0, 0, false) {
            Ok(id) => Reply::Unique { id },
            Err(code) => Reply::Error(code),
        }
    }

    fn do_insert_atomic(&mut self, r: InsertAtomicRequest, out: &mut Vec<Outbound>) -> Reply {
        match self.store.insert_atomic(r.id, &r.subscript) {
            Ok((created, existing)) => {
                if !created && !r.refc_policy.decr.is_zero() {
                    match self.store.refcount_incr(r.id, r.refc_policy.decr.negate()) {
                        Ok(effects) => self.push_remote_refcount(effects.remote, out),
                        Err(code) => return Reply::Error(code),
                    }
                }
                Reply::InsertAtomic { created, existing }
            }
            Err(code) => Reply::Error(code),
        }
    }

    fn do_lock(&mut self, id: DatumId) -> Reply {
        Reply::Lock { acquired: self.locks.insert(id) }
    }

    fn do_unlock(&mut self, id: DatumId) -> Reply {
        self.locks.remove(&id);
        Reply::Lock { acquired: true }
    }

    fn do_declare_struct(&mut self, index: i32, info: dflow_types::StructTypeInfo) -> Reply {
        match self.store.declare_struct_type(index, info) {
            Ok(()) => Reply::Success,
            Err(code) => Reply::Error(code),
        }
    }

    fn do_put(&mut self, r: PutRequest) -> Reply {
        let wu = self.build_work_unit(r);
        self.work.add(wu);
        Reply::Put
    }

    fn build_work_unit(&mut self, r: PutRequest) -> WorkUnit {
        WorkUnit {
            id: self.next_work_id(),
            seq: self.next_seq(),
            work_type: r.work_type,
            putter_rank: r.putter_rank,
            priority: r.priority,
            answer_rank: r.answer,
            target: r.target,
            accuracy: r.accuracy,
            strictness: r.strictness,
            parallelism: r.parallelism,
            payload: r.payload,
        }
    }

    fn do_put_rule(&mut self, r: PutRuleRequest, out: &mut Vec<Outbound>) -> Reply {
        let wu = self.build_work_unit(r.put);
        let mut inputs = Vec::with_capacity(r.wait_ids.len() + r.wait_id_subs.len());
        let mut already_closed = Vec::with_capacity(inputs.capacity());
        for id in &r.wait_ids {
            inputs.push(DependInput::whole(*id));
            already_closed.push(self.already_closed(*id, None, out));
        }
        for (id, sub) in &r.wait_id_subs {
            inputs.push(DependInput::sub(*id, sub.clone()));
            already_closed.push(self.already_closed(*id, Some(sub), out));
        }
        match self.depend.rule(wu, inputs, already_closed) {
            RuleOutcome::Ready(wu) => {
                self.work.add(wu);
                Reply::PutRule { ready: true }
            }
            RuleOutcome::Pending(_) => Reply::PutRule { ready: false },
        }
    }

    /// Determine whether `(id, sub)` has already closed, for `rule`'s
    /// already-closed vector (spec §4.3 step 2). For a remote id, consults
    /// the closed-data cache first and otherwise queues a subscribe-sync
    /// query (deduplicated by the subscribed set) rather than blocking.
    fn already_closed(&mut self, id: DatumId, sub: Option<&Subscript>, out: &mut Vec<Outbound>) -> bool {
        if self.store.is_local(id) {
            return self.store.is_closed(id, sub).unwrap_or(false);
        }
        let cached = match sub {
            None => self.subs.cache_is_closed(id),
            Some(s) => self.subs.cache_is_subscript_closed(id, s),
        };
        if cached {
            return true;
        }
        if self.subs.mark_subscribed(id, sub.cloned()) {
            out.push(Outbound::SyncSubscribeQuery {
                target_rank: self.topology.owner_of(id) as dflow_types::Rank,
                id,
                subscript: sub.cloned(),
                requester_rank: self.topology.rank as dflow_types::Rank,
            });
        }
        false
    }

    fn do_get(&mut self, r: GetRequest) -> Reply {
        match self.work.get(r.requester_rank, r.requested_type) {
            Some(wu) => Reply::Get { payload: wu.payload, answer: wu.answer_rank, work_type: wu.work_type },
            None => {
                if let Some(reply) = self.try_pop_parallel(&r) {
                    return reply;
                }
                self.requests.register(DispatchRequest {
                    rank: r.requester_rank,
                    work_type: r.requested_type,
                    count: r.count.max(1),
                    blocking: r.blocking,
                });
                Reply::NoWork
            }
        }
    }

    /// A parallel-width `Put` (spec §4.4 `pop_parallel`) never sits in the
    /// rank/host/untargeted heaps `self.work.get` checks, only in
    /// `parallel[type]`; without this, a worker polling for a type with
    /// only parallel work queued would get `NoWork` forever. The idle pool
    /// is every rank already blocked on this type (from an earlier `get`
    /// that missed) plus this request's own rank, since it is asking right
    /// now. Ranks other than the caller learn of their assignment the same
    /// way they learn of any other rank-targeted unit: it is re-enqueued
    /// strict/rank-targeted for them, so their own next `get` picks it up
    /// through the ordinary path with no second parallel assembly needed.
    fn try_pop_parallel(&mut self, r: &GetRequest) -> Option<Reply> {
        let mut idle = self.requests.idle_ranks_for(r.requested_type);
        if !idle.contains(&r.requester_rank) {
            idle.push(r.requester_rank);
        }
        let (wu, claimed) = self.work.pop_parallel(r.requested_type, &mut idle)?;
        // The idle pool is FIFO-ordered oldest-blocked-first with this
        // request appended last, so `claimed` may fill the task's width
        // entirely from ranks that were already waiting, leaving this
        // request's own rank unclaimed (it loses the race for this unit).
        let requester_claimed = claimed.contains(&r.requester_rank);
        for &rank in &claimed {
            if rank == r.requester_rank {
                continue;
            }
            self.requests.take(rank, r.requested_type);
            let echo = WorkUnit {
                id: self.next_work_id(),
                seq: self.next_seq(),
                work_type: wu.work_type,
                putter_rank: wu.putter_rank,
                priority: wu.priority,
                answer_rank: wu.answer_rank,
                target: Target::Rank(rank),
                accuracy: Accuracy::Rank,
                strictness: Strictness::Strict,
                parallelism: 1,
                payload: wu.payload.clone(),
            };
            self.work.add(echo);
        }
        requester_claimed.then(|| Reply::Get { payload: wu.payload, answer: wu.answer_rank, work_type: wu.work_type })
    }

    fn do_sync_subscribe(&mut self, r: SyncSubscribeRequest) -> Reply {
        let already = self.store.is_closed(r.id, r.subscript.as_ref()).unwrap_or(false);
        if !already {
            match &r.subscript {
                None => self.subs.add_whole_listener(r.id, r.requester_rank, r.work_type),
                Some(sub) => {
                    self.subs
                        .add_subscript_listener(r.id, sub.clone(), r.requester_rank, r.work_type)
                }
            }
        }
        Reply::SyncSubscribe { already_closed: already }
    }

    fn do_sync_refcount(&mut self, r: SyncRefcountRequest, out: &mut Vec<Outbound>) -> Reply {
        match self.store.refcount_incr(r.id, RcDelta::new(r.read, r.write)) {
            Ok(effects) => {
                self.push_remote_refcount(effects.remote, out);
                Reply::SyncRefcount
            }
            Err(code) => Reply::Error(code),
        }
    }

    fn do_remote_close(&mut self, r: RemoteCloseRequest) -> Reply {
        self.subs.clear_subscribed(r.id, r.subscript.as_ref());
        match &r.subscript {
            None => {
                self.subs.cache_mark_closed(r.id);
                for wu in self.depend.close(r.id) {
                    self.work.add(wu);
                }
            }
            Some(sub) => {
                self.subs.cache_mark_subscript_closed(r.id, sub.clone());
                for wu in self.depend.sub_close(r.id, sub) {
                    self.work.add(wu);
                }
            }
        }
        Reply::Success
    }

    fn do_shutdown(&mut self) -> Reply {
        let leaked: Vec<LeakedTask> = self.depend.shutdown_leaks();
        if !leaked.is_empty() {
            if self.report_leaks {
                for task in &leaked {
                    warn!(
                        work_type = task.work_type,
                        remaining = task.remaining_inputs,
                        blocked_on = ?task.blocked_on,
                        "leaked pending task at shutdown"
                    );
                }
            } else {
                warn!(count = leaked.len(), "pending tasks leaked at shutdown");
            }
        }
        Reply::Success
    }
}
