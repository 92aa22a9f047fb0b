//! The async event loop (spec §5): the only place the synchronous `Server`
//! engine and `dflow-net`'s transport meet.
//!
//! `Server::handle` never awaits anything, so this loop can answer a
//! request and hand its `Outbound` actions off to background tasks without
//! ever blocking the next inbound request behind a remote round trip.
//! Only `SyncSubscribeQuery`'s reply needs to re-enter the engine; it comes
//! back through `feedback_tx` rather than by handing `&mut Server` to a
//! spawned task, so the engine is only ever touched from this one loop.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use dflow_checkpoint::{CheckpointWriter, Persist};
use dflow_net::{Inbound, Listener, NetError, PeerSet, Request as WireRequest, Reply};
use dflow_types::{DatumId, Rank, Subscript};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::engine::Server;
use crate::outbound::Outbound;

/// Rank -> network address, known statically at process start (spec §4.6:
/// every server knows the address of every other server in the cluster).
pub type PeerAddrs = HashMap<Rank, SocketAddr>;

const INBOUND_CHANNEL_CAPACITY: usize = 1024;
const FEEDBACK_CHANNEL_CAPACITY: usize = 1024;

struct SyncSubscribeReply {
    id: DatumId,
    subscript: Option<Subscript>,
    already_closed: bool,
}

/// Bind a listener and run the event loop until the inbound channel closes
/// (normally only once a `Shutdown` request has been handled).
pub async fn serve(
    server: Server,
    listen_addr: SocketAddr,
    peer_addrs: PeerAddrs,
) -> Result<(), NetError> {
    serve_with_ready_signal(server, listen_addr, peer_addrs, None).await
}

/// Same as `serve`, but reports the actual bound address over `ready_tx`
/// once the listener is up. Lets a caller bind an ephemeral port (`:0`,
/// e.g. in a test harness that starts several single-shard servers in one
/// process) and learn which port the OS assigned before dialing it.
pub async fn serve_with_ready_signal(
    server: Server,
    listen_addr: SocketAddr,
    peer_addrs: PeerAddrs,
    ready_tx: Option<tokio::sync::oneshot::Sender<SocketAddr>>,
) -> Result<(), NetError> {
    serve_with_checkpoint(server, listen_addr, peer_addrs, ready_tx, None).await
}

/// Same as `serve_with_ready_signal`, but every successful `store` is
/// additionally appended to `checkpoint` (spec §6, "Persisted state").
/// Checkpointing is best-effort: a write failure is logged and the reply
/// already sent to the caller is not revised (spec §1 Non-goal: "does not
/// provide durable storage").
pub async fn serve_with_checkpoint(
    mut server: Server,
    listen_addr: SocketAddr,
    peer_addrs: PeerAddrs,
    ready_tx: Option<tokio::sync::oneshot::Sender<SocketAddr>>,
    mut checkpoint: Option<CheckpointWriter>,
) -> Result<(), NetError> {
    let (inbound_tx, mut inbound_rx) = mpsc::channel::<Inbound>(INBOUND_CHANNEL_CAPACITY);
    let (feedback_tx, mut feedback_rx) = mpsc::channel::<SyncSubscribeReply>(FEEDBACK_CHANNEL_CAPACITY);
    let listener = Listener::bind(listen_addr, inbound_tx).await?;
    if let Some(tx) = ready_tx {
        let _ = tx.send(listener.local_addr()?);
    }
    let peers = Arc::new(PeerSet::new());
    let peer_addrs = Arc::new(peer_addrs);

    let accept_handle = tokio::spawn(async move {
        if let Err(err) = listener.serve().await {
            error!(%err, "listener accept loop exited");
        }
    });

    loop {
        tokio::select! {
            inbound = inbound_rx.recv() => {
                let Some(Inbound { request, reply_tx }) = inbound else { break };
                let is_shutdown = matches!(request, WireRequest::Shutdown);
                let pending_record = match (&request, &mut checkpoint) {
                    (WireRequest::Store(r), Some(_)) => Some((r.id, r.bytes.clone())),
                    _ => None,
                };
                let result = server.handle(request);
                if let (Some((id, bytes)), Reply::Store, Some(writer)) =
                    (pending_record, &result.reply, checkpoint.as_mut())
                {
                    if let Err(err) = writer.write(&id.to_be_bytes(), &bytes, Persist::Persist) {
                        warn!(%err, id, "checkpoint write failed, continuing without it");
                    }
                }
                if reply_tx.send(result.reply).is_err() {
                    warn!("caller dropped connection before reply was sent");
                }
                spawn_outbound(result.outbound, Arc::clone(&peers), Arc::clone(&peer_addrs), feedback_tx.clone());
                if is_shutdown {
                    break;
                }
            }
            feedback = feedback_rx.recv() => {
                let Some(reply) = feedback else { continue };
                let more = server.on_sync_subscribe_reply(reply.id, reply.subscript, reply.already_closed);
                spawn_outbound(more, Arc::clone(&peers), Arc::clone(&peer_addrs), feedback_tx.clone());
            }
        }
    }

    accept_handle.abort();
    Ok(())
}

fn spawn_outbound(
    outbound: Vec<Outbound>,
    peers: Arc<PeerSet>,
    peer_addrs: Arc<PeerAddrs>,
    feedback_tx: mpsc::Sender<SyncSubscribeReply>,
) {
    for action in outbound {
        let peers = Arc::clone(&peers);
        let peer_addrs = Arc::clone(&peer_addrs);
        let feedback_tx = feedback_tx.clone();
        let is_sync_subscribe = matches!(action, Outbound::SyncSubscribeQuery { .. });
        let (id, subscript) = match &action {
            Outbound::SyncSubscribeQuery { id, subscript, .. } => (*id, subscript.clone()),
            Outbound::RefcountSync { id, .. } | Outbound::RemoteClose { id, .. } => (*id, None),
        };
        let (target_rank, wire_request) = action.into_wire();
        tokio::spawn(async move {
            let Some(&addr) = peer_addrs.get(&target_rank) else {
                warn!(target_rank, "no known address for outbound peer, dropping");
                return;
            };
            let peer = match peers.get_or_connect(target_rank, addr).await {
                Ok(peer) => peer,
                Err(err) => {
                    warn!(%err, target_rank, "failed to connect to peer");
                    return;
                }
            };
            match peer.call(&wire_request).await {
                Ok(dflow_net::Reply::SyncSubscribe { already_closed }) if is_sync_subscribe => {
                    let _ = feedback_tx
                        .send(SyncSubscribeReply { id, subscript, already_closed })
                        .await;
                }
                Ok(_) => {
                    debug!(target_rank, "outbound action acknowledged");
                }
                Err(err) => {
                    warn!(%err, target_rank, "outbound action failed");
                }
            }
        });
    }
}
