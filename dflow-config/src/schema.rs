//! Configuration schema: the resolved `Config` every process runs with,
//! and `FileConfig`, the partial structure a `dflow.toml` may fill in
//! (every field optional — env and defaults cover what the file omits,
//! matching the teacher's `KnhkConfig`/`#[serde(default)]` convention).

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;

fn default_closed_cache_size() -> usize {
    4096
}

fn default_listen_addr() -> String {
    "127.0.0.1:4040".to_string()
}

/// Resolved configuration for one process (server or worker), after
/// applying env > file > defaults (spec §6, "Environment variables
/// recognized"; SPEC_FULL §10.4).
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// `ADLB_CLOSED_CACHE_SIZE`: closed-data LRU capacity per server.
    pub closed_cache_size: usize,
    /// `ADLB_REPORT_LEAKS`: list each leaked id at shutdown.
    pub report_leaks: bool,
    /// `DFLOW_SERVERS`: total server count `S` for `locate(id) = id mod S`.
    pub servers: u32,
    /// `DFLOW_RANK`: this process's rank.
    pub rank: u32,
    /// `DFLOW_LISTEN_ADDR`: bind address for the point-to-point transport.
    pub listen_addr: SocketAddr,
    /// `DFLOW_CHECKPOINT_FILE`: absent disables checkpointing.
    pub checkpoint_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            closed_cache_size: default_closed_cache_size(),
            report_leaks: false,
            servers: 1,
            rank: 0,
            listen_addr: default_listen_addr().parse().expect("default listen addr parses"),
            checkpoint_file: None,
        }
    }
}

/// The `dflow.toml` shape: every field optional, so a file can set just
/// the cluster topology and leave everything else at its default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub closed_cache_size: Option<usize>,
    pub report_leaks: Option<bool>,
    pub servers: Option<u32>,
    pub rank: Option<u32>,
    pub listen_addr: Option<String>,
    pub checkpoint_file: Option<PathBuf>,
}
