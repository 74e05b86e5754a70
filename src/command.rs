use crate::options::Options;
use crate::owner::SessionOwner;
use crate::routing::SocketType;
use crate::transport::tcp::{TcpAcceptor, TcpConnector};
use std::sync::Arc;

/// Opaque handle to a reactor-owned object (session, pipe endpoint, ...).
///
/// Indexed by a generation counter so a stale handle referring to a slot
/// that has since been reused is detectable instead of aliasing a
/// different live object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    pub index: usize,
    pub generation: u64,
}

impl Handle {
    pub fn new(index: usize, generation: u64) -> Self {
        Self { index, generation }
    }
}

/// A tagged record with a destination handle and a payload variant.
///
/// Commands are transported by value through [`crate::mailbox::Mailbox`];
/// the destination handle identifies which session/pipe owns the command
/// once it is dequeued on the reactor thread.
pub enum Command {
    /// The peer pipe gained read capacity; resume pulling from it.
    ActivateRead { to: Handle },
    /// The peer pipe gained write capacity; resume pushing into it.
    ActivateWrite { to: Handle },
    /// Stop the reactor owning this mailbox. Triggers a bounded linger
    /// drain of every attached session before the reactor thread exits.
    Stop,
    /// Register a freshly bound listener with this reactor; the reactor
    /// allocates its own token and drives `accept()` thereafter, creating a
    /// fresh session+engine pair for each accepted connection via `owner`.
    Bind {
        listener: TcpAcceptor,
        socket_type: SocketType,
        options: Options,
        owner: Arc<dyn SessionOwner>,
    },
    /// Register a connector with this reactor; the reactor drives it to
    /// completion (or reconnect-with-backoff on failure) and, once
    /// connected, creates a session+engine pair via `owner`.
    Connect {
        connector: TcpConnector,
        socket_type: SocketType,
        options: Options,
        owner: Arc<dyn SessionOwner>,
    },
}

impl Command {
    /// The handle this command is addressed to, if any (`Stop` has none).
    pub fn destination(&self) -> Option<Handle> {
        match self {
            Command::ActivateRead { to } | Command::ActivateWrite { to } => Some(*to),
            Command::Stop | Command::Bind { .. } | Command::Connect { .. } => None,
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::ActivateRead { .. } => "ActivateRead",
            Command::ActivateWrite { .. } => "ActivateWrite",
            Command::Stop => "Stop",
            Command::Bind { .. } => "Bind",
            Command::Connect { .. } => "Connect",
        };
        write!(f, "Command::{}({:?})", name, self.destination())
    }
}
