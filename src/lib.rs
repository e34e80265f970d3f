//! Non-blocking HTTP/1.x and WebSocket engine
//!
//! The protocol core performs no I/O. [`client::PoolManager`] and [`server::Server`] are fed
//! socket events and return the actions to execute, [`rt`] drives them on tokio.
//!
//! - [`h1`], HTTP/1.x message framing
//! - [`ws`], WebSocket framing and handshake
//! - [`client`], pipelining connection pool
//! - [`server`], session layer dispatching to request handlers
#![warn(missing_debug_implementations)]

mod log;
mod common;

pub mod config;
mod error;
pub mod crypto;

pub mod http;
pub mod h1;
pub mod ws;

pub mod client;
pub mod server;

#[cfg(feature = "tokio")]
pub mod rt;

pub use common::ParseResult;
pub use config::{Config, ConfigBuilder, ConfigError};
pub use error::Error;
