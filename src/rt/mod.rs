//! Tokio I/O loop for the client pool and the server.
//!
//! The protocol core never touches sockets or the clock. This module owns both: socket tasks
//! move bytes, and one loop per [`Client`] or [`serve`] call feeds their events to the core
//! and executes the actions it returns.
mod connector;
mod socket;
mod client;
mod server;

pub use connector::{Connector, TcpConnector};
pub use client::{Client, Driver};
pub use server::{Serve, ServerHandle, serve};
