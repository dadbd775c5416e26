//! Listener setup and the accept loop.

use crate::{
    command::{CommandQueue, CommandStore},
    dispatch::{Dispatch, IpHashPolicy, SlotPolicy},
    errors::BindError,
    limits::ServerLimits,
    server::{
        peer::{Peer, Role},
        slots::SlotTable,
    },
};
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};
use tokio::net::TcpListener;
use tracing::{debug, error};

const LISTEN_BACKLOG: i32 = 250;

/// Binds a listening socket on `0.0.0.0:port`.
///
/// `SO_REUSEPORT` is set so a replacement process can bind while the old
/// one still drains. Must be called from within a tokio runtime.
pub fn bind(port: u16) -> Result<TcpListener, BindError> {
    let setup = || -> std::io::Result<std::net::TcpListener> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_port(true)?;
        socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())?;
        socket.listen(LISTEN_BACKLOG)?;
        socket.set_nonblocking(true)?;
        Ok(socket.into())
    };

    let listener = setup().map_err(|source| BindError { port, source })?;
    TcpListener::from_std(listener).map_err(|source| BindError { port, source })
}

/// State shared by every peer task.
pub(crate) struct Shared<D, C, P> {
    pub(crate) dispatch: D,
    pub(crate) commands: C,
    pub(crate) policy: P,
    pub(crate) slots: SlotTable,
    pub(crate) limits: ServerLimits,
}

/// The control gateway: two listeners feeding one population of peers.
///
/// REST clients connect to one port, agents to the other. Both speak
/// HTTP/1.1 framed by [`framer`](crate::http::framer); what differs is the
/// lifecycle: REST connections are transient, agent connections are always
/// recycled into keepalive and may receive pushed commands.
///
/// # Examples
///
/// ```no_run
/// use fleetgate::{
///     bind,
///     dispatch::{Dispatch, HandlerError, InboundRequest, InboundResponse, ResponseOutcome},
///     Server,
/// };
/// use tokio::{io::AsyncWriteExt, net::TcpStream};
///
/// struct Gateway;
///
/// impl Dispatch for Gateway {
///     async fn dispatch_request(
///         &self,
///         _request: InboundRequest<'_>,
///         stream: &mut TcpStream,
///     ) -> Result<(), HandlerError> {
///         stream
///             .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
///             .await?;
///         Ok(())
///     }
///
///     async fn dispatch_response(
///         &self,
///         _response: InboundResponse<'_>,
///         _stream: &mut TcpStream,
///     ) -> Result<ResponseOutcome, HandlerError> {
///         Ok(ResponseOutcome::Idle)
///     }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     Server::builder()
///         .rest_listener(bind(8888).unwrap())
///         .agent_listener(bind(8889).unwrap())
///         .dispatch(Gateway)
///         .build()
///         .launch()
///         .await;
/// }
/// ```
pub struct Server<D, C = CommandQueue, P = IpHashPolicy>
where
    D: Dispatch,
    C: CommandStore,
    P: SlotPolicy,
{
    rest: TcpListener,
    agent: TcpListener,
    pub(crate) shared: Arc<Shared<D, C, P>>,
}

impl<D: Dispatch> Server<D> {
    /// Creates a new builder for configuring the server instance.
    #[inline]
    pub fn builder() -> ServerBuilder<D> {
        ServerBuilder {
            rest: None,
            agent: None,
            dispatch: None,
            commands: CommandQueue::new(),
            policy: IpHashPolicy,
            limits: None,
        }
    }
}

impl<D, C, P> Server<D, C, P>
where
    D: Dispatch,
    C: CommandStore,
    P: SlotPolicy,
{
    /// Accepts connections on both listeners until the process exits.
    ///
    /// Accept failures are logged and do not take the listener down. Every
    /// accepted connection runs as its own task; a failing peer never
    /// brings down another.
    pub async fn launch(self) {
        let mut next_peer: u64 = 1;

        loop {
            let (accepted, role) = tokio::select! {
                result = self.rest.accept() => (result, Role::Rest),
                result = self.agent.accept() => (result, Role::Agent),
            };

            let (stream, addr) = match accepted {
                Ok(connection) => connection,
                Err(err) => {
                    error!(%err, "cannot accept client connection");
                    continue;
                }
            };

            let SocketAddr::V4(addr) = addr else {
                debug!(%addr, "dropping non-IPv4 connection");
                continue;
            };

            let id = next_peer;
            next_peer += 1;

            let peer = Peer::new(id, stream, addr, role, self.shared.limits.buffer_capacity);
            tokio::spawn(peer.run(self.shared.clone()));
        }
    }
}

/// Builder for configuring and creating [`Server`] instances.
pub struct ServerBuilder<D, C = CommandQueue, P = IpHashPolicy>
where
    D: Dispatch,
    C: CommandStore,
    P: SlotPolicy,
{
    rest: Option<TcpListener>,
    agent: Option<TcpListener>,
    dispatch: Option<D>,
    commands: C,
    policy: P,
    limits: Option<ServerLimits>,
}

impl<D, C, P> ServerBuilder<D, C, P>
where
    D: Dispatch,
    C: CommandStore,
    P: SlotPolicy,
{
    /// Sets the listener REST clients connect to.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn rest_listener(mut self, listener: TcpListener) -> Self {
        self.rest = Some(listener);
        self
    }

    /// Sets the listener agents connect to.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn agent_listener(mut self, listener: TcpListener) -> Self {
        self.agent = Some(listener);
        self
    }

    /// Sets the handler pair processing framed messages.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn dispatch(mut self, dispatch: D) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    /// Replaces the in-memory command queue with another store.
    #[inline(always)]
    pub fn commands<NewC: CommandStore>(self, commands: NewC) -> ServerBuilder<D, NewC, P> {
        ServerBuilder {
            rest: self.rest,
            agent: self.agent,
            dispatch: self.dispatch,
            commands,
            policy: self.policy,
            limits: self.limits,
        }
    }

    /// Replaces the slot assignment policy.
    #[inline(always)]
    pub fn slot_policy<NewP: SlotPolicy>(self, policy: NewP) -> ServerBuilder<D, C, NewP> {
        ServerBuilder {
            rest: self.rest,
            agent: self.agent,
            dispatch: self.dispatch,
            commands: self.commands,
            policy,
            limits: self.limits,
        }
    }

    /// Overrides the default limits.
    #[inline(always)]
    pub fn limits(mut self, limits: ServerLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Finalizes the builder and constructs a [`Server`] instance.
    ///
    /// # Panics
    ///
    /// Panics when `rest_listener`, `agent_listener` or `dispatch` was not
    /// called.
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server<D, C, P> {
        let limits = self.limits.unwrap_or_default();
        let slots = SlotTable::new(limits.keepalive_slots);

        Server {
            rest: self
                .rest
                .expect("the `rest_listener` method must be called to create"),
            agent: self
                .agent
                .expect("the `agent_listener` method must be called to create"),
            shared: Arc::new(Shared {
                dispatch: self
                    .dispatch
                    .expect("the `dispatch` method must be called to create"),
                commands: self.commands,
                policy: self.policy,
                slots,
                limits,
            }),
        }
    }
}
