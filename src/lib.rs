//! fleetgate - keepalive-aware HTTP control gateway for workstation fleets.
//!
//! A long-lived TCP server mediating between two populations of peers: a
//! fleet of remote **agents** on managed workstations, and transient
//! **REST clients** issuing control operations. Both speak HTTP/1.1 over
//! dedicated ports; messages are framed incrementally into fixed per-peer
//! buffers and handed to pluggable dispatchers.
//!
//! What sets this apart from an ordinary HTTP server is the agent side:
//! agent connections are never closed on ordinary completion. They are
//! recycled into a **keepalive slot table** guaranteeing at most one live
//! socket per agent identity (a reconnecting agent displaces its stale
//! predecessor), and queued commands are pushed onto the open socket
//! whenever the agent returns to idle.
//!
//! # Protocol support
//!
//! Deliberately minimal: request line plus headers, `Content-Length`
//! framed bodies, and a single recognized `Authorization` header on the
//! REST port. No TLS, no chunked encoding, no pipelining. The maximum
//! message size equals the per-peer buffer capacity.
//!
//! # Quick start
//!
//! ```no_run
//! use fleetgate::{
//!     bind,
//!     dispatch::{Dispatch, HandlerError, InboundRequest, InboundResponse, ResponseOutcome},
//!     Server,
//! };
//! use tokio::{io::AsyncWriteExt, net::TcpStream};
//!
//! struct Gateway;
//!
//! impl Dispatch for Gateway {
//!     async fn dispatch_request(
//!         &self,
//!         _request: InboundRequest<'_>,
//!         stream: &mut TcpStream,
//!     ) -> Result<(), HandlerError> {
//!         stream
//!             .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
//!             .await?;
//!         Ok(())
//!     }
//!
//!     async fn dispatch_response(
//!         &self,
//!         _response: InboundResponse<'_>,
//!         _stream: &mut TcpStream,
//!     ) -> Result<ResponseOutcome, HandlerError> {
//!         Ok(ResponseOutcome::Idle)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .rest_listener(bind(8888).unwrap())
//!         .agent_listener(bind(8889).unwrap())
//!         .dispatch(Gateway)
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```
//!
//! The [`command::CommandQueue`] fills the push side: queue a
//! [`command::Command`] for an agent's IP and it is delivered on that
//! agent's socket the next time it finishes a response.

pub(crate) mod http {
    pub(crate) mod framer;
    pub mod types;
    pub(crate) mod wire;
}
pub(crate) mod server {
    pub(crate) mod peer;
    pub(crate) mod server;
    pub(crate) mod slots;
}
pub mod cli;
pub mod command;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod errors;
pub mod limits;
pub mod logging;

pub use crate::{
    http::types::Method,
    server::server::{bind, Server, ServerBuilder},
};
