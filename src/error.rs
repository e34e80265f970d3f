use std::io;

use crate::{config::ConfigError, h1::ProtoError, ws::WsError};

/// Crate level error, returned by API misuse and runtime failures.
///
/// Request level failures are not reported here, they reach the request's
/// [`ResponseHandler`](crate::client::ResponseHandler) as [`Failure`](crate::client::Failure).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Proto(#[from] ProtoError),
    #[error(transparent)]
    WebSocket(#[from] WsError),
    #[error(transparent)]
    Io(#[from] io::Error),
    /// Token does not name a queued request.
    #[error("unknown request")]
    UnknownRequest,
    /// Request was not submitted with a streamed body, or its body is finished.
    #[error("request body is not streaming")]
    NotStreaming,
    /// Websocket operation on a connection that is not upgraded.
    #[error("connection is not upgraded")]
    NotUpgraded,
    /// Session table is full.
    #[error("session limit reached")]
    SessionLimit,
    /// Session is gone or closing.
    #[error("session closed")]
    SessionClosed,
    /// Response already sent for the current request.
    #[error("response already sent")]
    AlreadyResponded,
    /// Manager was shut down.
    #[error("shut down")]
    Shutdown,
}
