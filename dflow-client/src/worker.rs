//! Thin request/response stubs for every operation in the external
//! interface table (spec §6). `WorkerClient` is the worker-side half of
//! the protocol: it never touches a datum store directly, it only knows
//! how to route a call to the right server (`locate(id)` for id-keyed
//! operations, an explicit rank for server-scoped ones like `Unique` or
//! `Get`) and turn the reply back into a typed result or a `ClientError`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::debug;

use dflow_net::{
    ContainerReferenceRequest, CreateRequest, EnumerateRequest, ExistsRequest, GetRequest,
    InsertAtomicRequest, Peer, PeerSet, PutRequest, PutRuleRequest, RefcPolicy,
    RefcountIncrRequest, Reply, Request, RetrieveRequest, StoreRequest, SubscribeRequest,
};
use dflow_types::{
    Accuracy, DatumId, DatumType, Priority, Rank, RcDelta, Strictness, StructTypeInfo, Subscript,
    Target, Topology, WorkType, NULL_ID,
};

use crate::error::{ClientError, Result};
use crate::poll::PollBackoff;

/// Rank -> network address for every server in the cluster. A worker
/// knows this statically at start, the same as a server knows its peers
/// (spec §4.6).
pub type PeerAddrs = HashMap<Rank, SocketAddr>;

/// One work assignment handed back by `Get` (spec §6, "Get"): the task
/// payload, the rank the result should eventually be answered to, and the
/// work type it was dispatched for.
#[derive(Debug, Clone)]
pub struct WorkAssignment {
    pub payload: Vec<u8>,
    pub answer: Rank,
    pub work_type: WorkType,
}

/// Everything a worker needs to address the `put`/`create` it asks for
/// (spec §3, "Work unit"): caller fills in what the task actually is, the
/// client fills in routing defaults (`Target::Any`, `Accuracy::Rank`,
/// `Strictness::Strict`) when left unset.
#[derive(Debug, Clone)]
pub struct PutSpec {
    pub payload: Vec<u8>,
    pub target: Target,
    pub answer: Rank,
    pub work_type: WorkType,
    pub priority: Priority,
    pub parallelism: u32,
    pub accuracy: Accuracy,
    pub strictness: Strictness,
}

impl PutSpec {
    /// An untargeted, strict, non-parallel work unit — the common case.
    pub fn untargeted(payload: Vec<u8>, answer: Rank, work_type: WorkType, priority: Priority) -> Self {
        PutSpec {
            payload,
            target: Target::Any,
            answer,
            work_type,
            priority,
            parallelism: 1,
            accuracy: Accuracy::Rank,
            strictness: Strictness::Strict,
        }
    }

    fn into_wire(self, putter_rank: Rank) -> PutRequest {
        PutRequest {
            putter_rank,
            payload: self.payload,
            target: self.target,
            answer: self.answer,
            work_type: self.work_type,
            priority: self.priority,
            parallelism: self.parallelism,
            accuracy: self.accuracy,
            strictness: self.strictness,
        }
    }
}

/// The worker-side client: one per process, shared across the tasks a
/// worker runs concurrently. Connections are dialed lazily and cached by
/// `PeerSet`, same as a server's outbound connections to its peers.
pub struct WorkerClient {
    rank: Rank,
    topology: Topology,
    peers: PeerSet,
    peer_addrs: PeerAddrs,
    poll_backoff: PollBackoff,
}

impl WorkerClient {
    pub fn new(rank: Rank, topology: Topology, peer_addrs: PeerAddrs) -> Self {
        WorkerClient {
            rank,
            topology,
            peers: PeerSet::new(),
            peer_addrs,
            poll_backoff: PollBackoff::default(),
        }
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    fn owner(&self, id: DatumId) -> Rank {
        self.topology.owner_of(id) as Rank
    }

    async fn peer(&self, target: Rank) -> Result<Arc<Peer>> {
        let addr = *self
            .peer_addrs
            .get(&target)
            .ok_or(ClientError::UnknownServer(target))?;
        Ok(self.peers.get_or_connect(target, addr).await?)
    }

    async fn call(&self, target: Rank, request: Request) -> Result<Reply> {
        let peer = self.peer(target).await?;
        let reply = peer.call(&request).await?;
        if let Reply::Error(code) = reply {
            return Err(ClientError::Reply(code));
        }
        Ok(reply)
    }

    /// Allocate a datum id, or declare an existing one, on `server` (the
    /// process that should own it — `id == 0` lets the server pick one
    /// from its own progression; a nonzero `id` must already belong to
    /// `server`'s shard, i.e. `locate(id) == server`).
    pub async fn create(
        &self,
        server: Rank,
        id: DatumId,
        ty: DatumType,
        read_rc: i64,
        write_rc: i64,
        permanent: bool,
    ) -> Result<DatumId> {
        let target = if id == NULL_ID { server } else { self.owner(id) };
        match self
            .call(target, Request::Create(CreateRequest { id, ty, read_rc, write_rc, permanent }))
            .await?
        {
            Reply::Create { id } => Ok(id),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    pub async fn store(
        &self,
        id: DatumId,
        subscript: Option<Subscript>,
        ty: DatumType,
        bytes: Vec<u8>,
        rc_decr: RcDelta,
    ) -> Result<()> {
        match self
            .call(self.owner(id), Request::Store(StoreRequest { id, subscript, ty, bytes, rc_decr }))
            .await?
        {
            Reply::Store => Ok(()),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    pub async fn retrieve(
        &self,
        id: DatumId,
        subscript: Option<Subscript>,
        refc_policy: RefcPolicy,
    ) -> Result<(DatumType, Vec<u8>)> {
        match self
            .call(self.owner(id), Request::Retrieve(RetrieveRequest { id, subscript, refc_policy }))
            .await?
        {
            Reply::Retrieve { ty, bytes } => Ok((ty, bytes)),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    pub async fn exists(&self, id: DatumId, subscript: Option<Subscript>, decr: RcDelta) -> Result<(bool, bool)> {
        match self
            .call(self.owner(id), Request::Exists(ExistsRequest { id, subscript, decr }))
            .await?
        {
            Reply::Exists { exists, set } => Ok((exists, set)),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    pub async fn enumerate(
        &self,
        id: DatumId,
        count: Option<usize>,
        offset: usize,
        decr: RcDelta,
        include_keys: bool,
        include_vals: bool,
    ) -> Result<(Vec<(Option<Vec<u8>>, Vec<u8>)>, usize)> {
        match self
            .call(
                self.owner(id),
                Request::Enumerate(EnumerateRequest { id, count, offset, decr, include_keys, include_vals }),
            )
            .await?
        {
            Reply::Enumerate { entries, count } => Ok((entries, count)),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    pub async fn refcount_incr(&self, id: DatumId, read: i64, write: i64) -> Result<()> {
        match self
            .call(self.owner(id), Request::RefcountIncr(RefcountIncrRequest { id, read, write }))
            .await?
        {
            Reply::RefcountIncr => Ok(()),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    /// Returns `true` if the datum/slot was already closed at subscribe
    /// time (spec §4.2: "if already satisfied, the reply is 'ready'...").
    pub async fn subscribe(&self, id: DatumId, subscript: Option<Subscript>, work_type: WorkType) -> Result<bool> {
        match self
            .call(
                self.owner(id),
                Request::Subscribe(SubscribeRequest { id, subscript, requester_rank: self.rank, work_type }),
            )
            .await?
        {
            Reply::Subscribe { subscribed } => Ok(subscribed),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    pub async fn container_reference(
        &self,
        id: DatumId,
        subscript: Subscript,
        ref_id: DatumId,
        ref_subscript: Option<Subscript>,
        ref_type: DatumType,
        transfer_refs: RcDelta,
    ) -> Result<Option<Vec<u8>>> {
        match self
            .call(
                self.owner(id),
                Request::ContainerReference(ContainerReferenceRequest {
                    id,
                    subscript,
                    ref_id,
                    ref_subscript,
                    ref_type,
                    transfer_refs,
                }),
            )
            .await?
        {
            Reply::ContainerReference { value } => Ok(value),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    pub async fn unique(&self, server: Rank) -> Result<DatumId> {
        match self.call(server, Request::Unique).await? {
            Reply::Unique { id } => Ok(id),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    pub async fn insert_atomic(
        &self,
        id: DatumId,
        subscript: Subscript,
        refc_policy: RefcPolicy,
    ) -> Result<(bool, Option<Vec<u8>>)> {
        match self
            .call(self.owner(id), Request::InsertAtomic(InsertAtomicRequest { id, subscript, refc_policy }))
            .await?
        {
            Reply::InsertAtomic { created, existing } => Ok((created, existing)),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    pub async fn lock(&self, id: DatumId) -> Result<bool> {
        match self.call(self.owner(id), Request::Lock(id)).await? {
            Reply::Lock { acquired } => Ok(acquired),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    pub async fn unlock(&self, id: DatumId) -> Result<()> {
        match self.call(self.owner(id), Request::Unlock(id)).await? {
            Reply::Lock { .. } => Ok(()),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    pub async fn declare_struct(&self, server: Rank, index: i32, info: StructTypeInfo) -> Result<()> {
        match self.call(server, Request::DeclareStruct { index, info }).await? {
            Reply::Success => Ok(()),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    pub async fn put(&self, server: Rank, spec: PutSpec) -> Result<()> {
        match self.call(server, Request::Put(spec.into_wire(self.rank))).await? {
            Reply::Put => Ok(()),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    /// `Put-rule` (spec §6): `ready` tells the caller whether every input
    /// was already closed, so the work unit went straight to the work
    /// queue instead of the pending-task table.
    pub async fn put_rule(
        &self,
        server: Rank,
        spec: PutSpec,
        name: String,
        wait_ids: Vec<DatumId>,
        wait_id_subs: Vec<(DatumId, Subscript)>,
    ) -> Result<bool> {
        let put = spec.into_wire(self.rank);
        match self
            .call(server, Request::PutRule(PutRuleRequest { put, name, wait_ids, wait_id_subs }))
            .await?
        {
            Reply::PutRule { ready } => Ok(ready),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    /// A single, non-blocking `get` attempt: `None` if no matching work
    /// is ready right now.
    pub async fn try_get(&self, server: Rank, work_type: WorkType) -> Result<Option<WorkAssignment>> {
        let req = GetRequest { requester_rank: self.rank, requested_type: work_type, blocking: false, count: 1 };
        match self.call(server, Request::Get(req)).await? {
            Reply::Get { payload, answer, work_type } => Ok(Some(WorkAssignment { payload, answer, work_type })),
            Reply::NoWork => Ok(None),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    /// Block until work of `work_type` is available on `server`, polling
    /// with capped exponential backoff (spec §4.5: a `get` marked
    /// `blocking` counts toward `nblocked` while outstanding, and quiescence
    /// is `nblocked == worker_count` with every queue empty — this client
    /// re-registers with `blocking: true` on every poll so the server's
    /// idle accounting stays correct between attempts).
    pub async fn get(&self, server: Rank, work_type: WorkType) -> Result<WorkAssignment> {
        let mut attempt = 0u32;
        loop {
            let req = GetRequest { requester_rank: self.rank, requested_type: work_type, blocking: true, count: 1 };
            match self.call(server, Request::Get(req)).await? {
                Reply::Get { payload, answer, work_type } => return Ok(WorkAssignment { payload, answer, work_type }),
                Reply::NoWork => {
                    debug!(server, work_type, attempt, "no work ready, backing off");
                    self.poll_backoff.wait(attempt).await;
                    attempt = attempt.saturating_add(1);
                }
                _ => return Err(ClientError::UnexpectedReply),
            }
        }
    }

    pub async fn shutdown(&self, server: Rank) -> Result<()> {
        match self.call(server, Request::Shutdown).await? {
            Reply::Success => Ok(()),
            _ => Err(ClientError::UnexpectedReply),
        }
    }
}
