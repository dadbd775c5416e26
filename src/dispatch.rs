//! Handler seams between the connection engine and business logic.
//!
//! The engine frames messages and manages connection lifetimes; what a
//! message *means* is decided behind these traits. A dispatcher receives
//! the raw message bytes plus the few fields the framer extracts, and may
//! write whatever response it wants on the socket before returning.

use crate::command::CommandId;
use std::{
    error, fmt,
    future::Future,
    net::{Ipv4Addr, SocketAddrV4},
    sync::Arc,
};
use tokio::net::TcpStream;

/// Error returned by a dispatcher. Always fatal for the peer; the handler
/// owns any partial response already written to the socket.
#[derive(Debug)]
pub struct HandlerError(Box<dyn error::Error + Send + Sync>);

impl HandlerError {
    pub fn new(err: impl Into<Box<dyn error::Error + Send + Sync>>) -> Self {
        HandlerError(err.into())
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.0.source()
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(err: std::io::Error) -> Self {
        HandlerError::new(err)
    }
}

impl From<crate::db::DbError> for HandlerError {
    fn from(err: crate::db::DbError) -> Self {
        HandlerError::new(err)
    }
}

/// A complete REST request as framed by the connection engine.
///
/// The request line and every header other than `Content-Length` and
/// `Authorization` are untouched; interpreting them is the dispatcher's
/// job.
#[derive(Debug, Clone, Copy)]
pub struct InboundRequest<'a> {
    /// Full message bytes, headers included.
    pub payload: &'a [u8],
    /// Body portion of `payload`.
    pub body: &'a [u8],
    /// `Authorization` value, when present and valid UTF-8 (at most 63
    /// bytes; longer tokens arrive truncated).
    pub auth_token: Option<&'a str>,
    /// Remote address of the connection.
    pub remote: SocketAddrV4,
}

/// A complete agent response as framed by the connection engine.
#[derive(Debug, Clone, Copy)]
pub struct InboundResponse<'a> {
    /// Full message bytes, headers included.
    pub payload: &'a [u8],
    /// Body portion of `payload`.
    pub body: &'a [u8],
    /// Remote address of the connection.
    pub remote: SocketAddrV4,
    /// Identifier of the last command pushed on this connection.
    pub last_cmd_id: Option<CommandId>,
}

/// What the engine does once an agent response is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// The agent is idle again; deliver its next pending command.
    Idle,
    /// The agent is still mid-operation; hold further commands back.
    Busy,
}

/// The request/response handler pair backing both listening sockets.
pub trait Dispatch: Send + Sync + 'static {
    /// Handles one framed message from a REST client.
    ///
    /// The connection is closed once the dispatcher returns; REST clients
    /// are transient and never occupy a keepalive slot.
    fn dispatch_request(
        &self,
        request: InboundRequest<'_>,
        stream: &mut TcpStream,
    ) -> impl Future<Output = Result<(), HandlerError>> + Send;

    /// Handles one framed message from an agent.
    fn dispatch_response(
        &self,
        response: InboundResponse<'_>,
        stream: &mut TcpStream,
    ) -> impl Future<Output = Result<ResponseOutcome, HandlerError>> + Send;
}

impl<D: Dispatch> Dispatch for Arc<D> {
    fn dispatch_request(
        &self,
        request: InboundRequest<'_>,
        stream: &mut TcpStream,
    ) -> impl Future<Output = Result<(), HandlerError>> + Send {
        (**self).dispatch_request(request, stream)
    }

    fn dispatch_response(
        &self,
        response: InboundResponse<'_>,
        stream: &mut TcpStream,
    ) -> impl Future<Output = Result<ResponseOutcome, HandlerError>> + Send {
        (**self).dispatch_response(response, stream)
    }
}

/// Chooses the keepalive slot for an agent identity.
pub trait SlotPolicy: Send + Sync + 'static {
    /// Returns the slot index for `ip`; must be below `slot_count`.
    fn slot_for(&self, ip: Ipv4Addr, slot_count: usize) -> usize;
}

/// Spreads agents across the table by their IPv4 address.
#[derive(Debug, Default, Clone, Copy)]
pub struct IpHashPolicy;

impl SlotPolicy for IpHashPolicy {
    fn slot_for(&self, ip: Ipv4Addr, slot_count: usize) -> usize {
        u32::from(ip) as usize % slot_count.max(1)
    }
}

/// Pins every agent to one fixed slot.
///
/// Any reconnecting agent then displaces the previous occupant, whoever it
/// was. Useful for tests and for single-workstation setups.
#[derive(Debug, Clone, Copy)]
pub struct FixedSlot(pub usize);

impl SlotPolicy for FixedSlot {
    fn slot_for(&self, _ip: Ipv4Addr, slot_count: usize) -> usize {
        self.0.min(slot_count.saturating_sub(1))
    }
}
