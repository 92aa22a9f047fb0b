//! Point-to-point transport and the cross-server sync protocol (spec §4.6,
//! §5, §6). This crate owns the wire format and the connection machinery;
//! it has no knowledge of how a request is fulfilled — `dflow-server` maps
//! `Request` variants onto the store/subscribe/depend/queue crates and
//! answers through the `reply_tx` each `Inbound` carries.

pub mod error;
pub mod message;
pub mod transport;

pub use error::NetError;
pub use message::{
    ContainerReferenceRequest, CreateRequest, EnumerateRequest, ExistsRequest, GetRequest,
    InsertAtomicRequest, PutRequest, PutRuleRequest, RefcPolicy, RefcountIncrRequest,
    RemoteCloseRequest, Reply, Request, RetrieveRequest, StoreRequest, SubscribeRequest,
    SyncRefcountRequest, SyncSubscribeRequest,
};
pub use transport::{Inbound, Listener, Peer, PeerSet};
