use std::io;
use tokio::{net::TcpListener, runtime::Runtime};
use plex::{
    Config,
    http::{Headers, StatusCode},
    server::{Event, Server, Session},
    ws::Fragment,
};

fn main() -> io::Result<()> {
    env_logger::init();

    Runtime::new()?.block_on(async {
        let mut server = Server::new(Config::default(), handle);
        server.register_directory("ws", echo);

        let io = TcpListener::bind("0.0.0.0:3000").await?;
        let (_handle, serve) = plex::rt::serve(io, server);
        serve.await;
        Ok(())
    })
}

fn handle(session: &mut Session, event: Event) {
    let Event::Complete(body) = event else {
        return;
    };
    if let Some(head) = session.head() {
        println!("> {:?} {}", head.method(), String::from_utf8_lossy(head.target().unwrap_or_default()));
    }
    if !body.is_empty() {
        println!("{}", String::from_utf8_lossy(&body));
    }

    let mut headers = Headers::new();
    headers.insert("Content-Type", "text/plain");
    if let Err(err) = session.send(StatusCode::OK, headers, "Hello World") {
        eprintln!("{err}");
    }
}

fn echo(session: &mut Session, event: Event) {
    let result = match event {
        Event::Complete(_) => session.upgrade_websocket(None),
        Event::Message(message) => session.ws_send(message.data_type, &message.payload, Fragment::Complete),
        _ => Ok(()),
    };
    if let Err(err) = result {
        eprintln!("{err}");
        session.disconnect();
    }
}
