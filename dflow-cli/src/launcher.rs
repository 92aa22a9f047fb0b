//! Process bootstrap shared by both launcher binaries (spec §6, "CLI
//! surface"). Each run starts a single co-located server, dials it as a
//! worker, and runs the given script against it — the single-process
//! deployment shape both launchers use when no remote peers are
//! configured (spec §4.6's multi-server topology works the same way,
//! just with more entries in the peer address table).

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use dflow_checkpoint::{CheckpointWriter, FlushPolicy};
use dflow_client::WorkerClient;
use dflow_server::{serve_with_checkpoint, Server};
use dflow_types::Topology;

use crate::script;

/// Exit code for a script-level failure (spec §6: "Exit code 0 on
/// success, 2 on script error; other codes on launch failure").
pub const EXIT_SCRIPT_ERROR: i32 = 2;
/// Exit code for anything that goes wrong before the script starts
/// running: bad configuration, an address already in use, and so on.
pub const EXIT_LAUNCH_FAILURE: i32 = 1;

#[derive(Debug, Parser)]
pub struct LauncherArgs {
    /// Path to the config file (env vars still override whatever it sets).
    #[arg(long, default_value = "dflow.toml")]
    pub config: PathBuf,

    /// Script to run against the co-located server.
    pub script: PathBuf,

    /// Positional arguments substituted into the script as $1, $2, ...
    pub script_args: Vec<String>,
}

/// Run one launcher invocation to completion and return the process exit
/// code (spec §6). Never panics on script or script-IO failure; only a
/// genuine launch failure (config, bind, or connect) short-circuits before
/// the script is attempted.
pub async fn run_launcher(args: LauncherArgs) -> i32 {
    dflow_telemetry::init();

    let config = match dflow_config::load_config(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            return EXIT_LAUNCH_FAILURE;
        }
    };

    let topology = Topology::new(config.rank, config.servers);
    let server = Server::new(topology, config.closed_cache_size, config.report_leaks);

    let checkpoint = match &config.checkpoint_file {
        Some(path) => match CheckpointWriter::open(path, config.rank, FlushPolicy::Periodic { every_n_writes: 64 }) {
            Ok(writer) => Some(writer),
            Err(err) => {
                eprintln!("failed to open checkpoint log {path:?}: {err}");
                return EXIT_LAUNCH_FAILURE;
            }
        },
        None => None,
    };

    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<SocketAddr>();
    let listen_addr = config.listen_addr;
    let server_task = tokio::spawn(async move {
        if let Err(err) =
            serve_with_checkpoint(server, listen_addr, Default::default(), Some(ready_tx), checkpoint).await
        {
            tracing::error!(%err, "server event loop exited with an error");
        }
    });

    let bound_addr = match ready_rx.await {
        Ok(addr) => addr,
        Err(_) => {
            eprintln!("server failed to start");
            return EXIT_LAUNCH_FAILURE;
        }
    };

    let mut peer_addrs = dflow_client::PeerAddrs::new();
    peer_addrs.insert(config.rank as dflow_types::Rank, bound_addr);
    let client = WorkerClient::new(config.rank as dflow_types::Rank, topology, peer_addrs);

    let result = script::run(&client, config.rank as dflow_types::Rank, &args.script, &args.script_args).await;

    server_task.abort();

    match result {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{err}");
            EXIT_SCRIPT_ERROR
        }
    }
}
