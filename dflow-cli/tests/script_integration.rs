//! Runs a script file against a real co-located server, exercising the
//! same path both launcher binaries take (minus the process bootstrap and
//! exit-code translation, covered by unit tests in `launcher.rs`).

use std::collections::HashMap;
use std::net::SocketAddr;

use dflow_client::WorkerClient;
use dflow_server::Server;
use dflow_types::Topology;
use tokio::sync::oneshot;

async fn start_single_shard() -> WorkerClient {
    let server = Server::new(Topology::new(0, 1), 64, false);
    let (ready_tx, ready_rx) = oneshot::channel();
    let listen_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    tokio::spawn(async move {
        let _ = dflow_server::serve_with_ready_signal(server, listen_addr, HashMap::new(), Some(ready_tx)).await;
    });
    let addr = ready_rx.await.expect("server never signaled ready");

    let mut peer_addrs = HashMap::new();
    peer_addrs.insert(0, addr);
    WorkerClient::new(0, Topology::new(0, 1), peer_addrs)
}

#[tokio::test]
async fn put_and_get_round_trip_through_a_script() {
    let client = start_single_shard().await;
    let dir = tempfile::tempdir().unwrap();
    let script_path = dir.path().join("demo.script");
    std::fs::write(&script_path, "put 3 5 hello-$1\nget 3\n").unwrap();

    dflow_cli::script::run(&client, 0, &script_path, &["world".to_string()]).await.unwrap();
}

#[tokio::test]
async fn unknown_operation_reports_a_script_error() {
    let client = start_single_shard().await;
    let dir = tempfile::tempdir().unwrap();
    let script_path = dir.path().join("bad.script");
    std::fs::write(&script_path, "frobnicate\n").unwrap();

    let err = dflow_cli::script::run(&client, 0, &script_path, &[]).await.unwrap_err();
    assert!(matches!(err, dflow_cli::ScriptError::Parse { .. }));
}

#[tokio::test]
async fn missing_script_file_is_reported() {
    let client = start_single_shard().await;
    let err = dflow_cli::script::run(&client, 0, std::path::Path::new("/nonexistent/script"), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, dflow_cli::ScriptError::Io { .. }));
}
