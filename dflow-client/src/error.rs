//! Errors a worker-side call can produce: either the transport failed
//! (`dflow-net::NetError`), or the owning server's reply carried a
//! taxonomy `Code` (spec §7). A worker that considers an operation
//! mandatory is expected to match on `ClientError::Reply` and abort with
//! the code name printed (spec §7, "User-visible failure behavior"); this
//! crate only surfaces the error, it never aborts on the caller's behalf.

use dflow_net::NetError;
use dflow_types::{Code, Rank};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Net(#[from] NetError),

    #[error("server replied with {0:?}")]
    Reply(Code),

    #[error("no address known for server rank {0}")]
    UnknownServer(Rank),

    #[error("server sent a reply that does not match the request it answered")]
    UnexpectedReply,
}

pub type Result<T> = std::result::Result<T, ClientError>;
