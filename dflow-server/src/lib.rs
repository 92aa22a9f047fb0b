//! Ties the datum store, subscription tables, dependency engine, and
//! work/request queues into one per-process server: a synchronous state
//! machine (`engine`) driven by an async transport loop (`run`), exchanging
//! cross-server actions (`outbound`) neither owns outright.

pub mod engine;
pub mod outbound;
pub mod run;

pub use engine::{HandleResult, Server};
pub use outbound::Outbound;
pub use run::{serve, serve_with_checkpoint, serve_with_ready_signal, PeerAddrs};
