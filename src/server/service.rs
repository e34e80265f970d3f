use bytes::Bytes;

use super::Session;
use crate::ws::Message;

/// Inbound traffic of a session, delivered to its [`RequestHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Request head parsed and a body follows, see [`Session::head`].
    Head,
    /// Request body data, more follows.
    Body(Bytes),
    /// Request finished, the body holds the final slice.
    ///
    /// Bodiless requests only produce this event.
    Complete(Bytes),
    /// Websocket data, after [`Session::upgrade_websocket`].
    Message(Message),
    /// Websocket ping, already answered with a pong.
    Ping(Bytes),
    Pong(Bytes),
    /// Transport closed while a request or websocket was active.
    Closed,
}

// ===== RequestHandler =====

/// Handles the requests of a session.
///
/// Handlers run on the I/O loop and must not block. A response can be sent from inside the
/// callback or later through [`ServerHandle::with_session`].
///
/// [`ServerHandle::with_session`]: crate::rt::ServerHandle::with_session
pub trait RequestHandler: Send + Sync + 'static {
    fn on_event(&self, session: &mut Session, event: Event);
}

impl<F> RequestHandler for F
where
    F: Fn(&mut Session, Event) + Send + Sync + 'static,
{
    fn on_event(&self, session: &mut Session, event: Event) {
        self(session, event)
    }
}
