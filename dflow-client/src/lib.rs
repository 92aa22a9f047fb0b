//! Worker-side library (spec §6): thin request/response stubs for every
//! operation the external interface table names, plus the blocking `get`
//! contract. This crate owns no server state — it only knows how to route
//! a call to the right rank and translate its reply, the same role
//! `dflow-net::Peer` plays for a server's own outbound sync calls but
//! exposed with the typed, ergonomic surface a worker process wants.

pub mod error;
pub mod poll;
pub mod worker;

pub use error::{ClientError, Result};
pub use poll::PollBackoff;
pub use worker::{PeerAddrs, PutSpec, WorkAssignment, WorkerClient};
