use std::{env, io, net::SocketAddr};
use tokio::{runtime::Runtime, sync::mpsc};
use plex::{
    Config,
    client::{Destination, Reply, ReplyKind, Request},
    rt::Client,
};

fn main() -> io::Result<()> {
    env_logger::init();

    let addr: SocketAddr = env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:3000".into())
        .parse()
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;

    Runtime::new()?.block_on(async move {
        let (client, driver) = Client::new(Config::default());
        tokio::spawn(driver.run());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let paths = ["/", "/index.html", "/about"];
        for path in paths {
            let tx = tx.clone();
            let request = Request::builder(Destination::plain(addr))
                .target(path)
                .collect_body()
                .build(move |reply: Reply| {
                    let _ = tx.send(reply);
                });
            if let Err(err) = client.submit(request) {
                eprintln!("{err}");
            }
        }
        drop(tx);

        let mut remaining = paths.len();
        while remaining > 0 {
            let Some(reply) = rx.recv().await else {
                break;
            };
            if reply.is_final() {
                remaining -= 1;
            }
            match &reply.kind {
                ReplyKind::Complete => {
                    let status = reply.head.as_ref().and_then(|head| head.status());
                    println!("< {:?} {}", status, String::from_utf8_lossy(&reply.body));
                }
                ReplyKind::Failed(failure) => println!("< failed: {failure}"),
                _ => {}
            }
        }

        client.shutdown();
        Ok(())
    })
}
