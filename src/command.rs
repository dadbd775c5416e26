//! Queued outbound commands for agent workstations.
//!
//! Commands are produced elsewhere (schedulers, REST endpoints) and pulled
//! by the connection engine whenever an agent finishes a response and goes
//! idle. The engine never inspects a command beyond serializing it.

use crate::http::types::Method;
use serde_json::{json, Value};
use std::{
    collections::{HashMap, VecDeque},
    net::Ipv4Addr,
    sync::{Arc, Mutex},
};

/// Identifier of a queued command, used to correlate agent responses.
pub type CommandId = u64;

/// Operations the server can push to an agent workstation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CommandKind {
    Refresh,
    Probe,
    Shell,
    Poweroff,
    Reboot,
    Stop,
    Session,
    Hardware,
    Software,
    Setup,
    ImageCreate,
    ImageRestore,
}

impl CommandKind {
    /// Request path on the agent's HTTP surface.
    pub const fn path(&self) -> &'static str {
        match self {
            CommandKind::Refresh => "/refresh",
            CommandKind::Probe => "/probe",
            CommandKind::Shell => "/shell/run",
            CommandKind::Poweroff => "/poweroff",
            CommandKind::Reboot => "/reboot",
            CommandKind::Stop => "/stop",
            CommandKind::Session => "/session",
            CommandKind::Hardware => "/hardware",
            CommandKind::Software => "/software",
            CommandKind::Setup => "/setup",
            CommandKind::ImageCreate => "/image/create",
            CommandKind::ImageRestore => "/image/restore",
        }
    }
}

/// Target selectors carried by a command without an explicit body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandParams {
    pub ips: Vec<Ipv4Addr>,
}

impl CommandParams {
    pub(crate) fn to_json(&self) -> Value {
        json!({
            "ips": self.ips.iter().map(|ip| ip.to_string()).collect::<Vec<_>>(),
        })
    }
}

/// A pending outbound request destined for a specific agent.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub id: CommandId,
    pub method: Method,
    pub kind: CommandKind,
    pub params: CommandParams,
    /// Explicit JSON payload; when absent, `params` form the body.
    pub body: Option<Value>,
}

impl Command {
    /// The configuration poll pushed to every agent right after it connects.
    pub(crate) fn refresh(ip: Ipv4Addr) -> Self {
        Command {
            id: 0,
            method: Method::Get,
            kind: CommandKind::Refresh,
            params: CommandParams { ips: vec![ip] },
            body: None,
        }
    }
}

/// Source of pending commands, keyed by agent IPv4 address.
///
/// Scheduling policy lives with the implementation; the connection engine
/// only pulls the next record for a given agent and reports delivery.
pub trait CommandStore: Send + Sync + 'static {
    /// Removes and returns the oldest pending command for `ip`.
    fn take_next(&self, ip: Ipv4Addr) -> Option<Command>;

    /// Called once the command has been emitted on the agent socket.
    ///
    /// Emission is an attempt, not an acknowledgement: a failed write still
    /// consumes the command and still reports it here.
    fn delivered(&self, command: &Command) {
        let _ = command;
    }
}

impl<C: CommandStore + ?Sized> CommandStore for Arc<C> {
    fn take_next(&self, ip: Ipv4Addr) -> Option<Command> {
        (**self).take_next(ip)
    }

    fn delivered(&self, command: &Command) {
        (**self).delivered(command)
    }
}

/// In-memory FIFO command queue.
#[derive(Debug, Default)]
pub struct CommandQueue {
    pending: Mutex<HashMap<Ipv4Addr, VecDeque<Command>>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `command` for the agent at `ip`.
    pub fn push(&self, ip: Ipv4Addr, command: Command) {
        self.pending
            .lock()
            .unwrap()
            .entry(ip)
            .or_default()
            .push_back(command);
    }

    /// Number of commands still pending for `ip`.
    pub fn pending_for(&self, ip: Ipv4Addr) -> usize {
        self.pending
            .lock()
            .unwrap()
            .get(&ip)
            .map_or(0, VecDeque::len)
    }
}

impl CommandStore for CommandQueue {
    fn take_next(&self, ip: Ipv4Addr) -> Option<Command> {
        let mut pending = self.pending.lock().unwrap();
        let queue = pending.get_mut(&ip)?;
        let command = queue.pop_front();
        if queue.is_empty() {
            pending.remove(&ip);
        }
        command
    }
}

#[cfg(test)]
mod queue {
    use super::*;

    fn command(id: CommandId) -> Command {
        Command {
            id,
            method: Method::Get,
            kind: CommandKind::Probe,
            params: CommandParams::default(),
            body: None,
        }
    }

    #[test]
    fn fifo_per_agent() {
        let queue = CommandQueue::new();
        let alpha = Ipv4Addr::new(10, 0, 0, 1);
        let beta = Ipv4Addr::new(10, 0, 0, 2);

        queue.push(alpha, command(1));
        queue.push(alpha, command(2));
        queue.push(beta, command(3));

        assert_eq!(queue.take_next(alpha).unwrap().id, 1);
        assert_eq!(queue.take_next(alpha).unwrap().id, 2);
        assert_eq!(queue.take_next(alpha), None);
        assert_eq!(queue.take_next(beta).unwrap().id, 3);
    }

    #[test]
    fn pending_count_tracks_pushes() {
        let queue = CommandQueue::new();
        let ip = Ipv4Addr::new(10, 0, 0, 9);

        assert_eq!(queue.pending_for(ip), 0);
        queue.push(ip, command(1));
        queue.push(ip, command(2));
        assert_eq!(queue.pending_for(ip), 2);

        queue.take_next(ip);
        assert_eq!(queue.pending_for(ip), 1);
    }

    #[test]
    fn refresh_shape() {
        let refresh = Command::refresh(Ipv4Addr::new(172, 16, 0, 4));

        assert_eq!(refresh.method, Method::Get);
        assert_eq!(refresh.kind, CommandKind::Refresh);
        assert_eq!(refresh.params.ips, vec![Ipv4Addr::new(172, 16, 0, 4)]);
        assert_eq!(refresh.body, None);
        assert_eq!(refresh.kind.path(), "/refresh");
    }
}
