use bytes::Bytes;
use std::sync::Arc;

use super::{Destination, Reply, ResponseHandler};

/// Index into the transport-socket array plus the generation of its current binding.
///
/// Events carrying a stale generation belong to an earlier socket and are ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SocketId {
    pub(crate) index: usize,
    pub(crate) generation: u64,
}

impl SocketId {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Work the I/O loop performs on behalf of the pool.
///
/// Actions must be executed in order, a reply may depend on sends issued before it.
pub enum Action {
    /// Open a transport for `socket`, report with `on_connected`.
    Connect { socket: SocketId, dest: Destination },
    Send { socket: SocketId, data: Bytes },
    /// Close the transport, report with `on_closed`.
    Disconnect { socket: SocketId },
    /// Invoke a response handler, outside of any lock.
    Deliver { handler: Arc<dyn ResponseHandler>, reply: Reply },
    /// State changed that the loop has to look at, e.g. the backlog grew.
    Wake,
}

impl Action {
    /// Run a [`Action::Deliver`], returns any other action back.
    pub fn deliver(self) -> Option<Action> {
        match self {
            Action::Deliver { handler, reply } => {
                handler.on_reply(reply);
                None
            }
            action => Some(action),
        }
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Connect { socket, dest } => {
                f.debug_struct("Connect").field("socket", socket).field("dest", dest).finish()
            }
            Self::Send { socket, data } => {
                f.debug_struct("Send").field("socket", socket).field("len", &data.len()).finish()
            }
            Self::Disconnect { socket } => f.debug_struct("Disconnect").field("socket", socket).finish(),
            Self::Deliver { reply, .. } => f.debug_struct("Deliver").field("reply", reply).finish_non_exhaustive(),
            Self::Wake => f.write_str("Wake"),
        }
    }
}
