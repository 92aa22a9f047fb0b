//! The synchronous request/response protocol (spec §6): one request enum
//! and one reply enum covering every operation in the external interface
//! table, plus the two cross-server sync specializations (spec §4.6).

use serde::{Deserialize, Serialize};

use dflow_types::{
    Accuracy, Code, DatumId, DatumType, Priority, Rank, RcDelta, Strictness, StructTypeInfo,
    Subscript, Target, WorkType,
};

/// `refc_policy` (spec §6 "Retrieve"/"Insert-atomic"): the read-refcount
/// decrement applied to the datum being read, plus an optional acquire of
/// refcounts on every referand reachable from the value (spec §3,
/// "acquire while releasing must be atomic").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefcPolicy {
    pub decr: RcDelta,
    pub acquire: RcDelta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutRequest {
    pub putter_rank: Rank,
    pub payload: Vec<u8>,
    pub target: Target,
    pub answer: Rank,
    pub work_type: WorkType,
    pub priority: Priority,
    pub parallelism: u32,
    pub accuracy: Accuracy,
    pub strictness: Strictness,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutRuleRequest {
    pub put: PutRequest,
    pub name: String,
    pub wait_ids: Vec<DatumId>,
    pub wait_id_subs: Vec<(DatumId, Subscript)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRequest {
    pub requester_rank: Rank,
    pub requested_type: WorkType,
    pub blocking: bool,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRequest {
    /// `0` (`NULL_ID`) means "allocate a fresh id".
    pub id: DatumId,
    pub ty: DatumType,
    pub read_rc: i64,
    pub write_rc: i64,
    pub permanent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreRequest {
    pub id: DatumId,
    pub subscript: Option<Subscript>,
    pub ty: DatumType,
    pub bytes: Vec<u8>,
    pub rc_decr: RcDelta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveRequest {
    pub id: DatumId,
    pub subscript: Option<Subscript>,
    pub refc_policy: RefcPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExistsRequest {
    pub id: DatumId,
    pub subscript: Option<Subscript>,
    pub decr: RcDelta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumerateRequest {
    pub id: DatumId,
    pub count: Option<usize>,
    pub offset: usize,
    pub decr: RcDelta,
    pub include_keys: bool,
    pub include_vals: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefcountIncrRequest {
    pub id: DatumId,
    pub read: i64,
    pub write: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub id: DatumId,
    pub subscript: Option<Subscript>,
    pub requester_rank: Rank,
    pub work_type: WorkType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerReferenceRequest {
    pub id: DatumId,
    pub subscript: Subscript,
    pub ref_id: DatumId,
    pub ref_subscript: Option<Subscript>,
    pub ref_type: DatumType,
    pub transfer_refs: RcDelta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertAtomicRequest {
    pub id: DatumId,
    pub subscript: Subscript,
    pub refc_policy: RefcPolicy,
}

/// Cross-server subscribe sync (spec §4.6 "Subscribe sync"): on behalf of
/// a remote server's pending subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSubscribeRequest {
    pub id: DatumId,
    pub subscript: Option<Subscript>,
    pub requester_rank: Rank,
    pub work_type: WorkType,
}

/// Cross-server refcount sync (spec §4.6 "Refcount sync"): one-way
/// increment of a remote datum's refcounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRefcountRequest {
    pub id: DatumId,
    pub read: i64,
    pub write: i64,
}

/// Pushed by a datum's owning server to a rank it registered as a listener
/// via `SyncSubscribe`, once that datum (or subscript) actually closes.
/// The complement to "subscribe sync" replying `already_closed = false`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCloseRequest {
    pub id: DatumId,
    pub subscript: Option<Subscript>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    Put(PutRequest),
    PutRule(PutRuleRequest),
    Get(GetRequest),
    Create(CreateRequest),
    Store(StoreRequest),
    Retrieve(RetrieveRequest),
    Exists(ExistsRequest),
    Enumerate(EnumerateRequest),
    RefcountIncr(RefcountIncrRequest),
    Subscribe(SubscribeRequest),
    ContainerReference(ContainerReferenceRequest),
    Unique,
    InsertAtomic(InsertAtomicRequest),
    Lock(DatumId),
    Unlock(DatumId),
    DeclareStruct { index: i32, info: StructTypeInfo },
    SyncSubscribe(SyncSubscribeRequest),
    SyncRefcount(SyncRefcountRequest),
    RemoteClose(RemoteCloseRequest),
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Reply {
    Success,
    Error(Code),
    Put,
    PutRule { ready: bool },
    Get { payload: Vec<u8>, answer: Rank, work_type: WorkType },
    /// No matching work unit was ready at the moment of the call. Not an
    /// error: a blocking `get` caller is expected to poll again.
    NoWork,
    Create { id: DatumId },
    Store,
    Retrieve { ty: DatumType, bytes: Vec<u8> },
    Exists { exists: bool, set: bool },
    Enumerate { entries: Vec<(Option<Vec<u8>>, Vec<u8>)>, count: usize },
    RefcountIncr,
    Subscribe { subscribed: bool },
    ContainerReference { value: Option<Vec<u8>> },
    Unique { id: DatumId },
    InsertAtomic { created: bool, existing: Option<Vec<u8>> },
    Lock { acquired: bool },
    SyncSubscribe { already_closed: bool },
    SyncRefcount,
}
