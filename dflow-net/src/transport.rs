//! Point-to-point transport (spec §4.6, §5): manual length-prefixed framing
//! over TCP. Every request is synchronous from the caller's point of view —
//! `Peer::call` sends one frame and awaits exactly one reply frame — which
//! matches the protocol's point-to-point, one-request-one-reply shape.
//!
//! The server side never touches shared state directly: `Listener` spawns
//! one task per accepted connection that only reads frames and forwards
//! them, with a reply channel, onto a single mpsc queue drained by one
//! consumer task. That consumer is the only place request/reply dispatch
//! touches the store/queues/dependency engine, which is what lets those
//! crates stay lock-free (spec §5: "no internal locking needed in the core
//! data structures; concurrency comes from separate server processes, not
//! threads within one server").

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex};

use dflow_types::Rank;

use crate::error::NetError;
use crate::message::{Reply, Request};

/// Largest frame this transport will accept, guarding against a corrupt or
/// hostile length prefix driving an unbounded allocation.
const MAX_FRAME_BYTES: u32 = 256 * 1024 * 1024;

async fn write_frame(stream: &mut TcpStream, bytes: &[u8]) -> Result<(), NetError> {
    let len = bytes.len() as u32;
    stream
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|source| NetError::Io { peer: peer_label(stream), source })?;
    stream
        .write_all(bytes)
        .await
        .map_err(|source| NetError::Io { peer: peer_label(stream), source })
}

async fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>, NetError> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(source) if source.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(NetError::Closed { peer: peer_label(stream) });
        }
        Err(source) => return Err(NetError::Io { peer: peer_label(stream), source }),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(NetError::FrameTooLarge { len, max: MAX_FRAME_BYTES });
    }
    let mut buf = vec![0u8; len as usize];
    stream
        .read_exact(&mut buf)
        .await
        .map_err(|source| NetError::Io { peer: peer_label(stream), source })?;
    Ok(buf)
}

fn peer_label(stream: &TcpStream) -> String {
    stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string())
}

/// One outbound connection to another server, identified by rank. Calls are
/// serialized through the stream's mutex: the protocol is one-request-one-
/// reply, so a caller that needs concurrency opens several `Peer`s or
/// queues behind a connection pool — `dflow-server` manages that via
/// `PeerSet`.
pub struct Peer {
    rank: Rank,
    stream: Mutex<TcpStream>,
}

impl Peer {
    pub async fn connect(rank: Rank, addr: SocketAddr) -> Result<Self, NetError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| NetError::Io { peer: addr.to_string(), source })?;
        stream.set_nodelay(true).ok();
        Ok(Peer { rank, stream: Mutex::new(stream) })
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Send `request` and block until the matching reply arrives. Safe to
    /// call concurrently: callers queue behind the internal mutex rather
    /// than racing frames onto the wire.
    pub async fn call(&self, request: &Request) -> Result<Reply, NetError> {
        let encoded = bincode::serialize(request)?;
        let mut stream = self.stream.lock().await;
        write_frame(&mut stream, &encoded).await?;
        let reply_bytes = read_frame(&mut stream).await?;
        let reply: Reply = bincode::deserialize(&reply_bytes)?;
        Ok(reply)
    }
}

/// A registry of outbound connections keyed by rank, lazily dialed.
#[derive(Default)]
pub struct PeerSet {
    peers: Mutex<HashMap<Rank, Arc<Peer>>>,
}

impl PeerSet {
    pub fn new() -> Self {
        PeerSet { peers: Mutex::new(HashMap::new()) }
    }

    pub async fn get_or_connect(
        &self,
        rank: Rank,
        addr: SocketAddr,
    ) -> Result<Arc<Peer>, NetError> {
        let mut peers = self.peers.lock().await;
        if let Some(peer) = peers.get(&rank) {
            return Ok(Arc::clone(peer));
        }
        let peer = Arc::new(Peer::connect(rank, addr).await?);
        peers.insert(rank, Arc::clone(&peer));
        Ok(peer)
    }
}

/// One accepted request awaiting a reply, handed from a connection task to
/// the single-threaded event loop.
pub struct Inbound {
    pub request: Request,
    pub reply_tx: oneshot::Sender<Reply>,
}

/// The server side of the transport: accepts connections and forwards
/// every decoded request onto `inbound_tx`. Never touches application
/// state itself.
pub struct Listener {
    listener: TcpListener,
    inbound_tx: mpsc::Sender<Inbound>,
}

impl Listener {
    pub async fn bind(
        addr: SocketAddr,
        inbound_tx: mpsc::Sender<Inbound>,
    ) -> Result<Self, NetError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| NetError::Io { peer: addr.to_string(), source })?;
        Ok(Listener { listener, inbound_tx })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        self.listener
            .local_addr()
            .map_err(|source| NetError::Io { peer: "<local>".to_string(), source })
    }

    /// Accept connections until the socket is closed or the inbound channel
    /// is no longer receiving. Each accepted connection gets its own
    /// read-forward task; replies are written back on that same task once
    /// the event loop answers via the per-request oneshot.
    pub async fn serve(self) -> Result<(), NetError> {
        loop {
            let (stream, _) = self
                .listener
                .accept()
                .await
                .map_err(|source| NetError::Io { peer: "<accept>".to_string(), source })?;
            let inbound_tx = self.inbound_tx.clone();
            tokio::spawn(async move {
                if let Err(err) = serve_connection(stream, inbound_tx).await {
                    tracing::debug!(%err, "connection closed");
                }
            });
        }
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    inbound_tx: mpsc::Sender<Inbound>,
) -> Result<(), NetError> {
    loop {
        let frame = match read_frame(&mut stream).await {
            Ok(frame) => frame,
            Err(NetError::Closed { .. }) => return Ok(()),
            Err(err) => return Err(err),
        };
        let request: Request = bincode::deserialize(&frame)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        if inbound_tx.send(Inbound { request, reply_tx }).await.is_err() {
            return Err(NetError::EventLoopGone);
        }
        let reply = reply_rx.await.map_err(|_| NetError::EventLoopGone)?;
        let encoded = bincode::serialize(&reply)?;
        write_frame(&mut stream, &encoded).await?;
    }
}
