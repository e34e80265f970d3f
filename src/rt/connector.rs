use std::io;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

use crate::client::Destination;

/// Opens transports for the client driver.
///
/// TLS is left to implementors, [`TcpConnector`] only speaks plain TCP.
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + 'static;

    fn connect(&self, dest: &Destination) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Plain TCP connector with `TCP_NODELAY`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, dest: &Destination) -> io::Result<TcpStream> {
        if dest.secure {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "TcpConnector does not speak TLS"));
        }
        let stream = TcpStream::connect(dest.addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}
