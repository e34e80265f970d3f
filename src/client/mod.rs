//! HTTP client connection pool.
//!
//! [`PoolManager`] multiplexes requests over a bounded number of sockets, at most
//! `max_connections_per_destination` per remote address. Requests to one connection are
//! answered in submission order, pipelined once the peer proved it keeps the connection
//! open across responses.
mod action;
mod request;
mod connection;
mod pool;

pub use action::{Action, SocketId};
pub use request::{Context, Destination, Failure, Reply, ReplyKind, Request, RequestBuilder, ResponseHandler, Token};
pub use connection::Pipeline;
pub use pool::PoolManager;

pub(crate) use request::Record;

#[cfg(test)]
mod test;
