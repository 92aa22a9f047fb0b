//! A store that completes while a checkpoint log is attached gets
//! appended to that log (spec §6, "Persisted state"), without the wire
//! reply being affected.

use std::collections::HashMap;
use std::net::SocketAddr;

use dflow_checkpoint::{CheckpointWriter, FlushPolicy};
use dflow_net::{CreateRequest, Peer, Reply, Request, StoreRequest};
use dflow_server::Server;
use dflow_types::{DatumType, RcDelta, Topology};
use tokio::sync::oneshot;

#[tokio::test]
async fn successful_store_is_appended_to_the_checkpoint_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rank0.ckpt");
    let writer = CheckpointWriter::open(&path, 0, FlushPolicy::Always).unwrap();

    let server = Server::new(Topology::new(0, 1), 64, false);
    let (ready_tx, ready_rx) = oneshot::channel();
    let listen_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    tokio::spawn(async move {
        let _ =
            dflow_server::serve_with_checkpoint(server, listen_addr, HashMap::new(), Some(ready_tx), Some(writer))
                .await;
    });
    let addr = ready_rx.await.unwrap();

    let peer = Peer::connect(0, addr).await.unwrap();
    let create = peer
        .call(&Request::Create(CreateRequest { id: 0, ty: DatumType::Int, read_rc: 1, write_rc: 1, permanent: false }))
        .await
        .unwrap();
    let id = match create {
        Reply::Create { id } => id,
        other => panic!("unexpected reply: {other:?}"),
    };

    let reply = peer
        .call(&Request::Store(StoreRequest {
            id,
            subscript: None,
            ty: DatumType::Int,
            bytes: dflow_types::pack_new(&dflow_types::Value::Int(7)),
            rc_decr: RcDelta::write(1),
        }))
        .await
        .unwrap();
    assert!(matches!(reply, Reply::Store));

    drop(peer);

    let mut index = dflow_checkpoint::CheckpointIndex::new(None);
    let stats = dflow_checkpoint::reload(&path, &mut index, 0, 1).unwrap();
    assert_eq!(stats.ranks_loaded(), 1);
    assert_eq!(index.len(), 1);
    let expected = dflow_types::pack_new(&dflow_types::Value::Int(7));
    assert_eq!(index.lookup(&id.to_be_bytes()), Some(expected.as_slice()));
}
