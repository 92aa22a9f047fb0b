//! Actions the engine decides on while handling one request but cannot
//! finish itself, because they cross the network: a refcount owed to a
//! datum another server owns, a subscribe-sync query to a remote owner, or
//! a close notification pushed to a server that registered as a listener
//! via that query.
//!
//! `Server::handle` returns these alongside the `Reply`; `run::serve` is
//! the only place they actually touch `dflow-net`'s `PeerSet`. Keeping the
//! engine itself synchronous preserves the single-threaded-cooperative
//! invariant (spec §5): a handler never blocks waiting on another message
//! from this same process.

use dflow_types::{DatumId, Rank, RcDelta, Subscript};

use dflow_net::{Request as WireRequest, RemoteCloseRequest, SyncRefcountRequest, SyncSubscribeRequest};

#[derive(Debug, Clone)]
pub enum Outbound {
    /// A local `collect()` released a reference held on a datum owned by
    /// another shard (spec §4.6, "Refcount sync").
    RefcountSync { target_rank: Rank, id: DatumId, delta: RcDelta },
    /// One of this server's own pending rules depends on an id owned by
    /// another shard; the owner has not yet told us it is closed (spec
    /// §4.6, "Subscribe sync").
    SyncSubscribeQuery {
        target_rank: Rank,
        id: DatumId,
        subscript: Option<Subscript>,
        requester_rank: Rank,
    },
    /// A remote server registered as a listener on one of our local ids via
    /// `SyncSubscribeQuery`; it has since closed, so push the notification.
    RemoteClose { target_rank: Rank, id: DatumId, subscript: Option<Subscript> },
}

impl Outbound {
    /// The rank this action must be sent to, and the wire request it
    /// becomes. `SyncSubscribeQuery` is the one variant whose reply the
    /// event loop must feed back into the engine (`Server::on_sync_subscribe_reply`);
    /// the others are one-way.
    pub fn into_wire(self) -> (Rank, WireRequest) {
        match self {
            Outbound::RefcountSync { target_rank, id, delta } => (
                target_rank,
                WireRequest::SyncRefcount(SyncRefcountRequest { id, read: delta.read, write: delta.write }),
            ),
            Outbound::SyncSubscribeQuery { target_rank, id, subscript, requester_rank } => (
                target_rank,
                WireRequest::SyncSubscribe(SyncSubscribeRequest {
                    id,
                    subscript,
                    requester_rank,
                    work_type: 0,
                }),
            ),
            Outbound::RemoteClose { target_rank, id, subscript } => (
                target_rank,
                WireRequest::RemoteClose(RemoteCloseRequest { id, subscript }),
            ),
        }
    }
}
