use std::{io, net::SocketAddr, time::Duration};
use tokio::{runtime::Runtime, sync::mpsc};
use plex::{
    Config,
    client::{Destination, Reply, ReplyKind, Request},
    rt::Client,
    ws::{DataType, Fragment},
};

/// Talks to the `/ws` echo directory of the `server` example.
fn main() -> io::Result<()> {
    env_logger::init();
    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));

    Runtime::new()?.block_on(async move {
        let (client, driver) = Client::new(Config::default());
        tokio::spawn(driver.run());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = Request::builder(Destination::plain(addr))
            .target("/ws")
            .websocket(None)
            .build(move |reply: Reply| {
                let _ = tx.send(reply);
            });
        let token = client.submit(request).map_err(io::Error::other)?;

        loop {
            let reply = match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Some(reply)) => reply,
                Ok(None) => break,
                Err(_) => {
                    println!("timed out");
                    break;
                }
            };
            match reply.kind {
                ReplyKind::Upgraded => {
                    for line in ["hello", "from", "plex"] {
                        client
                            .ws_send(token, DataType::Text, line.as_bytes(), Fragment::Complete)
                            .map_err(io::Error::other)?;
                    }
                    client.ws_ping(token, b"are you there").map_err(io::Error::other)?;
                }
                ReplyKind::Message { .. } => {
                    let text = String::from_utf8_lossy(&reply.body);
                    println!("< {text}");
                    if text == "plex" {
                        client.ws_close(token).map_err(io::Error::other)?;
                    }
                }
                ReplyKind::Pong => println!("< pong"),
                ReplyKind::Failed(failure) => {
                    println!("< failed: {failure}");
                    break;
                }
                ReplyKind::Disconnected => break,
                _ => {}
            }
        }

        client.shutdown();
        Ok(())
    })
}
