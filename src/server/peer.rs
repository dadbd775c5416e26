//! Per-connection state and the REST and agent read loops.
//!
//! Each accepted connection becomes one [`Peer`] driven by its own task.
//! A peer owns its socket and a fixed receive buffer; everything shared
//! with other peers (slot table, command store) lives behind
//! [`Shared`](crate::server::server::Shared).

use crate::{
    command::{CommandId, CommandStore},
    dispatch::{Dispatch, InboundRequest, InboundResponse, ResponseOutcome, SlotPolicy},
    errors::PeerError,
    http::{
        framer::{self, FrameError, FrameInfo, Framing},
        wire,
    },
    limits::ServerLimits,
    server::{
        server::Shared,
        slots::{Occupant, PeerId},
    },
};
use std::{net::SocketAddrV4, ops::ControlFlow, sync::Arc};
use tokio::{io::AsyncReadExt, net::TcpStream, sync::Notify, time::timeout};
use tracing::{debug, error, info, warn};

/// Which listener produced the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Rest,
    Agent,
}

/// Parsing progress of the message currently in the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerState {
    ReceivingHeader,
    ReceivingPayload,
    Processing,
}

pub(crate) struct Peer {
    id: PeerId,
    stream: TcpStream,
    addr: SocketAddrV4,
    role: Role,
    buf: Box<[u8]>,
    len: usize,
    state: PeerState,
    frame: Option<FrameInfo>,
    slot: Option<usize>,
    last_cmd_id: Option<CommandId>,
    evict: Arc<Notify>,
    /// Set when a completed message parks the peer in keepalive; suppresses
    /// the idle deadline until the next byte arrives.
    parked: bool,
}

impl Peer {
    pub(crate) fn new(
        id: PeerId,
        stream: TcpStream,
        addr: SocketAddrV4,
        role: Role,
        capacity: usize,
    ) -> Self {
        Peer {
            id,
            stream,
            addr,
            role,
            buf: vec![0; capacity].into_boxed_slice(),
            len: 0,
            state: PeerState::ReceivingHeader,
            frame: None,
            slot: None,
            last_cmd_id: None,
            evict: Arc::new(Notify::new()),
            parked: false,
        }
    }

    fn occupant(&self) -> Occupant {
        Occupant {
            peer: self.id,
            addr: self.addr,
            evict: self.evict.clone(),
        }
    }

    /// Drives the connection until it is closed, then cleans up after it.
    pub(crate) async fn run<D, C, P>(mut self, shared: Arc<Shared<D, C, P>>)
    where
        D: Dispatch,
        C: CommandStore,
        P: SlotPolicy,
    {
        debug!(addr = %self.addr, role = ?self.role, "connection accepted");

        if self.role == Role::Agent {
            let slot = shared
                .policy
                .slot_for(*self.addr.ip(), shared.limits.keepalive_slots);
            shared.slots.install(slot, self.occupant());
            self.slot = Some(slot);

            match wire::send_refresh(&mut self.stream, *self.addr.ip(), shared.limits.write_timeout)
                .await
            {
                Ok(()) => info!(addr = %self.addr, "sent refresh"),
                Err(err) => warn!(addr = %self.addr, %err, "cannot send refresh"),
            }
        }

        match self.drive(&shared).await {
            Ok(()) | Err(PeerError::ClosedByPeer) => {
                debug!(addr = %self.addr, "closing connection")
            }
            Err(PeerError::Evicted) => {
                debug!(addr = %self.addr, "closing displaced keepalive connection")
            }
            Err(err) => error!(addr = %self.addr, %err, "releasing peer"),
        }

        if let Some(slot) = self.slot {
            shared.slots.release(slot, self.id);
        }
    }

    async fn drive<D, C, P>(&mut self, shared: &Shared<D, C, P>) -> Result<(), PeerError>
    where
        D: Dispatch,
        C: CommandStore,
        P: SlotPolicy,
    {
        loop {
            self.fill(&shared.limits).await?;
            if self.advance(shared).await?.is_break() {
                return Ok(());
            }
        }
    }

    /// Reads once into the buffer.
    ///
    /// The role deadline is rearmed around every read, except for peers
    /// parked in keepalive with an empty buffer, which wait indefinitely.
    async fn fill(&mut self, limits: &ServerLimits) -> Result<(), PeerError> {
        let deadline = match self.role {
            Role::Rest => limits.rest_timeout,
            Role::Agent => limits.agent_timeout,
        };
        let idle_exempt = self.parked && self.len == 0;
        let evict = self.evict.clone();
        let len = self.len;

        let read = async {
            tokio::select! {
                biased;

                _ = evict.notified() => Err(PeerError::Evicted),
                result = self.stream.read(&mut self.buf[len..]) => {
                    result.map_err(PeerError::from)
                }
            }
        };

        let read_len = match idle_exempt {
            true => read.await?,
            false => match timeout(deadline, read).await {
                Ok(result) => result?,
                Err(_) => return Err(PeerError::Timeout),
            },
        };

        if read_len == 0 {
            return Err(PeerError::ClosedByPeer);
        }

        self.parked = false;
        self.len += read_len;
        Ok(())
    }

    /// Advances the state machine as far as the buffered bytes allow.
    ///
    /// One readable event may carry an entire message, so header framing,
    /// payload completion and processing all fall through in a single pass
    /// without another read in between.
    async fn advance<D, C, P>(
        &mut self,
        shared: &Shared<D, C, P>,
    ) -> Result<ControlFlow<()>, PeerError>
    where
        D: Dispatch,
        C: CommandStore,
        P: SlotPolicy,
    {
        loop {
            match self.state {
                PeerState::ReceivingHeader => {
                    let extract_auth = self.role == Role::Rest;
                    match framer::frame(&self.buf[..self.len], self.buf.len(), extract_auth) {
                        Ok(Framing::Incomplete) => return Ok(ControlFlow::Continue(())),
                        Ok(Framing::Complete(info)) => {
                            self.frame = Some(info);
                            self.state = PeerState::ReceivingPayload;
                        }
                        Err(FrameError::Oversize) => return self.oversize(shared).await,
                        Err(FrameError::InvalidContentLength) => {
                            return Err(PeerError::Protocol("invalid Content-Length"));
                        }
                    }
                }
                PeerState::ReceivingPayload => {
                    let msg_len = self.frame_info()?.msg_len;
                    if self.len < msg_len {
                        return Ok(ControlFlow::Continue(()));
                    }
                    self.state = PeerState::Processing;
                }
                PeerState::Processing => {
                    return match self.role {
                        Role::Rest => self.process_request(shared).await,
                        Role::Agent => self.process_response(shared).await,
                    };
                }
            }
        }
    }

    async fn process_request<D, C, P>(
        &mut self,
        shared: &Shared<D, C, P>,
    ) -> Result<ControlFlow<()>, PeerError>
    where
        D: Dispatch,
        C: CommandStore,
        P: SlotPolicy,
    {
        let frame = self.frame_info()?.clone();
        let auth_token = frame
            .auth
            .as_ref()
            .and_then(|range| simdutf8::basic::from_utf8(&self.buf[range.clone()]).ok());

        let request = InboundRequest {
            payload: &self.buf[..frame.msg_len],
            body: &self.buf[frame.header_len..frame.msg_len],
            auth_token,
            remote: self.addr,
        };

        shared
            .dispatch
            .dispatch_request(request, &mut self.stream)
            .await
            .map_err(PeerError::Handler)?;

        // REST clients are transient; only agents live in the slot table.
        Ok(ControlFlow::Break(()))
    }

    async fn process_response<D, C, P>(
        &mut self,
        shared: &Shared<D, C, P>,
    ) -> Result<ControlFlow<()>, PeerError>
    where
        D: Dispatch,
        C: CommandStore,
        P: SlotPolicy,
    {
        let frame = self.frame_info()?.clone();
        let response = InboundResponse {
            payload: &self.buf[..frame.msg_len],
            body: &self.buf[frame.header_len..frame.msg_len],
            remote: self.addr,
            last_cmd_id: self.last_cmd_id,
        };

        let outcome = shared
            .dispatch
            .dispatch_response(response, &mut self.stream)
            .await
            .map_err(PeerError::Handler)?;

        if outcome == ResponseOutcome::Idle {
            self.deliver_pending(shared).await;
        }

        debug!(addr = %self.addr, "leaving agent in keepalive mode");
        self.reset();
        if let Some(slot) = self.slot {
            shared.slots.install(slot, self.occupant());
        }

        Ok(ControlFlow::Continue(()))
    }

    /// Pulls the next pending command for this agent and emits it.
    ///
    /// A write failure is logged and the connection carries on. The command
    /// is consumed and recorded either way: `last_cmd_id` tracks the last
    /// emission attempt, not the last confirmed delivery.
    async fn deliver_pending<D, C, P>(&mut self, shared: &Shared<D, C, P>)
    where
        D: Dispatch,
        C: CommandStore,
        P: SlotPolicy,
    {
        let Some(command) = shared.commands.take_next(*self.addr.ip()) else {
            return;
        };

        match wire::send_command(&mut self.stream, &command, shared.limits.write_timeout).await {
            Ok(()) => info!(
                addr = %self.addr,
                id = command.id,
                path = command.kind.path(),
                "delivered pending command"
            ),
            Err(err) => {
                warn!(addr = %self.addr, id = command.id, %err, "cannot deliver pending command")
            }
        }

        self.last_cmd_id = Some(command.id);
        shared.commands.delivered(&command);
    }

    async fn oversize<D, C, P>(
        &mut self,
        shared: &Shared<D, C, P>,
    ) -> Result<ControlFlow<()>, PeerError>
    where
        D: Dispatch,
        C: CommandStore,
        P: SlotPolicy,
    {
        if self.role == Role::Rest {
            let _ = wire::write_bytes(
                &mut self.stream,
                wire::PAYLOAD_TOO_LARGE,
                shared.limits.write_timeout,
            )
            .await;
        }
        Err(PeerError::Oversize)
    }

    /// Prepares the buffer for the next message on a keepalive connection.
    ///
    /// Bytes past the completed message are discarded; a peer that wants to
    /// pipeline gets to resend.
    fn reset(&mut self) {
        self.state = PeerState::ReceivingHeader;
        self.len = 0;
        self.frame = None;
        self.parked = true;
    }

    fn frame_info(&self) -> Result<&FrameInfo, PeerError> {
        self.frame
            .as_ref()
            .ok_or(PeerError::Protocol("no framed message in this state"))
    }
}
