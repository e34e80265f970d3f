//! Socket tasks.
//!
//! Each transport socket runs in its own task. The loop talks to it through an unbounded
//! command channel, the task reports back through a shared event channel tagged with the
//! socket's id.
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
};

use super::Connector;
use crate::{
    client::{Destination, SocketId},
    log::trace,
};

pub(crate) type CommandTx = UnboundedSender<Command>;
type CommandRx = UnboundedReceiver<Command>;

pub(crate) type EventTx<Id> = UnboundedSender<SocketEvent<Id>>;

pub(crate) enum Command {
    Send(Bytes),
    /// Close after every queued send.
    Close,
}

pub(crate) enum SocketEvent<Id> {
    Connected(Id, bool),
    Data(Id, Bytes),
    Closed(Id),
}

/// Spawn a task that connects to `dest` and then serves the socket.
///
/// A failed connect reports only `Connected(id, false)`.
pub(crate) fn connect<C: Connector>(
    connector: Arc<C>,
    dest: Destination,
    id: SocketId,
    buffer_size: usize,
    events: EventTx<SocketId>,
) -> CommandTx {
    let (tx, rx) = unbounded_channel();
    tokio::spawn(async move {
        match connector.connect(&dest).await {
            Ok(io) => {
                let _ = events.send(SocketEvent::Connected(id, true));
                serve_io(io, id, buffer_size, rx, events).await;
            }
            Err(_err) => {
                trace!("{}: connect error: {_err}", dest.addr);
                let _ = events.send(SocketEvent::Connected(id, false));
            }
        }
    });
    tx
}

/// Spawn a task serving an already connected socket.
pub(crate) fn spawn<IO, Id>(io: IO, id: Id, buffer_size: usize, events: EventTx<Id>) -> CommandTx
where
    IO: AsyncRead + AsyncWrite + Send + 'static,
    Id: Copy + Send + 'static,
{
    let (tx, rx) = unbounded_channel();
    tokio::spawn(serve_io(io, id, buffer_size, rx, events));
    tx
}

async fn serve_io<IO, Id>(io: IO, id: Id, buffer_size: usize, mut rx: CommandRx, events: EventTx<Id>)
where
    IO: AsyncRead + AsyncWrite,
    Id: Copy,
{
    let (mut reader, mut writer) = tokio::io::split(io);
    let mut buffer = BytesMut::with_capacity(buffer_size);

    loop {
        if buffer.capacity() - buffer.len() < buffer_size / 4 {
            buffer.reserve(buffer_size);
        }

        tokio::select! {
            read = reader.read_buf(&mut buffer) => match read {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if events.send(SocketEvent::Data(id, buffer.split().freeze())).is_err() {
                        break;
                    }
                }
            },
            command = rx.recv() => match command {
                Some(Command::Send(data)) => {
                    if writer.write_all(&data).await.is_err() {
                        break;
                    }
                }
                Some(Command::Close) | None => break,
            },
        }
    }

    let _ = writer.shutdown().await;
    let _ = events.send(SocketEvent::Closed(id));
}
