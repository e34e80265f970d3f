//! HTTP server session layer.
//!
//! Every accepted socket becomes a [`Session`]. The [`Server`] parses requests, applies the
//! persistent connection policy and dispatches to the [`RequestHandler`] registered for the
//! request's virtual directory, or to the default one.
mod service;
mod session;
mod host;

pub use service::{Event, RequestHandler};
pub use session::{ServerAction, Session, SessionId};
pub use host::Server;
