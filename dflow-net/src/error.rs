//! Transport-layer errors: framing, connection, and serialization failures
//! that sit below the `Code` taxonomy a request/reply round trip carries
//! in its payload.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("i/o error talking to {peer}: {source}")]
    Io {
        peer: String,
        #[source]
        source: std::io::Error,
    },

    #[error("peer {peer} closed the connection")]
    Closed { peer: String },

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: u32, max: u32 },

    #[error("failed to encode message: {0}")]
    Encode(#[source] Box<bincode::ErrorKind>),

    #[error("failed to decode message: {0}")]
    Decode(#[source] Box<bincode::ErrorKind>),

    #[error("no connection established to rank {0}")]
    NotConnected(dflow_types::Rank),

    #[error("event loop has shut down")]
    EventLoopGone,
}

impl From<bincode::Error> for NetError {
    fn from(e: bincode::Error) -> Self {
        NetError::Encode(e)
    }
}
