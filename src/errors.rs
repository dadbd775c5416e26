//! Error kinds of the connection engine.

use crate::dispatch::HandlerError;
use std::io;
use thiserror::Error;

/// Failure to set up one of the listening sockets.
#[derive(Debug, Error)]
#[error("cannot bind port {port}: {source}")]
pub struct BindError {
    pub port: u16,
    #[source]
    pub source: io::Error,
}

/// Why a peer was released.
///
/// None of these escape the peer's task; each is logged and the connection
/// is fully cleaned up before the task returns. The server keeps running.
#[derive(Debug, Error)]
pub(crate) enum PeerError {
    #[error("transport failure: {0}")]
    Transport(#[from] io::Error),

    #[error("connection closed by peer")]
    ClosedByPeer,

    #[error("malformed message: {0}")]
    Protocol(&'static str),

    #[error("message exceeds the receive buffer")]
    Oversize,

    #[error("no complete message within the idle deadline")]
    Timeout,

    #[error("displaced by a newer connection")]
    Evicted,

    #[error("handler failed: {0}")]
    Handler(#[source] HandlerError),
}
