use std::{collections::HashMap, io, net::SocketAddr, pin::Pin, time::Instant};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
};

use super::socket::{self, Command, CommandTx, EventTx, SocketEvent};
use crate::{
    Error,
    log::{debug, info, warning},
    server::{Server, ServerAction, Session, SessionId},
};

type Task = Box<dyn FnOnce(&mut Server, Instant, &mut Vec<ServerAction>) + Send>;

enum Job {
    Run(Task),
    Shutdown,
}

/// Start serving `listener` with `server`.
///
/// The returned [`Serve`] is the server loop, it must be awaited or spawned.
///
/// ```no_run
/// use plex::{Config, http::{Headers, StatusCode}, server::{Event, Server, Session}};
///
/// # async fn run() -> std::io::Result<()> {
/// let server = Server::new(Config::default(), |session: &mut Session, event: Event| {
///     if let Event::Complete(_) = event {
///         let _ = session.send(StatusCode::OK, Headers::new(), "Hello World");
///     }
/// });
/// let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
/// let (_handle, serve) = plex::rt::serve(listener, server);
/// serve.await;
/// # Ok(())
/// # }
/// ```
pub fn serve(listener: TcpListener, server: Server) -> (ServerHandle, Serve) {
    let (jobs_tx, jobs_rx) = unbounded_channel();
    let (events_tx, events_rx) = unbounded_channel();
    let serve = Serve {
        listener,
        server,
        jobs: jobs_rx,
        events_tx,
        events: events_rx,
        sockets: HashMap::new(),
        stopping: false,
        detached: false,
    };
    (ServerHandle { jobs: jobs_tx }, serve)
}

// ===== ServerHandle =====

/// Cloneable handle to act on a running server from other threads.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    jobs: UnboundedSender<Job>,
}

impl ServerHandle {
    /// Run `f` on session `id` inside the server loop, e.g. to answer a request asynchronously.
    ///
    /// `f` is not called if the session is gone by then.
    pub fn with_session(&self, id: SessionId, f: impl FnOnce(&mut Session) + Send + 'static) -> Result<(), Error> {
        let task: Task = Box::new(move |server, now, out| {
            server.with_session(id, now, out, f);
        });
        self.jobs.send(Job::Run(task)).map_err(|_| Error::Shutdown)
    }

    /// Stop accepting and close every session, the loop ends once all sockets are closed.
    pub fn shutdown(&self) -> Result<(), Error> {
        self.jobs.send(Job::Shutdown).map_err(|_| Error::Shutdown)
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Run(_) => f.write_str("Run"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

// ===== Serve =====

/// The server loop.
pub struct Serve {
    listener: TcpListener,
    server: Server,
    jobs: UnboundedReceiver<Job>,
    events_tx: EventTx<SessionId>,
    events: UnboundedReceiver<SocketEvent<SessionId>>,
    sockets: HashMap<usize, (SessionId, CommandTx)>,
    stopping: bool,
    /// Every [`ServerHandle`] was dropped.
    detached: bool,
}

impl Serve {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(mut self) {
        loop {
            if self.stopping && self.sockets.is_empty() {
                info!("server stopped");
                return;
            }

            let deadline = self.server.next_deadline();
            let timer = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                accepted = self.listener.accept(), if !self.stopping => match accepted {
                    Ok((stream, peer)) => self.accept(stream, peer),
                    Err(_err) => {
                        warning!("failed to accept: {_err}");
                    }
                },
                Some(event) = self.events.recv() => self.handle(event),
                job = self.jobs.recv(), if !self.detached => match job {
                    Some(Job::Run(task)) => {
                        let mut out = Vec::new();
                        task(&mut self.server, Instant::now(), &mut out);
                        self.execute(out);
                    }
                    Some(Job::Shutdown) => {
                        debug!("server shutting down");
                        self.stopping = true;
                        let mut out = Vec::new();
                        self.server.shutdown(&mut out);
                        self.execute(out);
                    }
                    None => self.detached = true,
                },
                () = timer => {
                    let mut out = Vec::new();
                    self.server.on_timer(Instant::now(), &mut out);
                    self.execute(out);
                }
            }
        }
    }

    fn accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        let Ok(id) = self.server.accept(peer, Instant::now()) else {
            // dropping the stream closes it
            return;
        };
        let _ = stream.set_nodelay(true);
        let buffer_size = self.server.config().receive_buffer_size;
        let tx = socket::spawn(stream, id, buffer_size, self.events_tx.clone());
        self.sockets.insert(id.index(), (id, tx));
    }

    fn handle(&mut self, event: SocketEvent<SessionId>) {
        let mut out = Vec::new();
        match event {
            SocketEvent::Data(id, data) => self.server.on_data(id, &data, Instant::now(), &mut out),
            SocketEvent::Closed(id) => {
                self.server.on_closed(id);
                if self.sockets.get(&id.index()).is_some_and(|(current, _)| *current == id) {
                    self.sockets.remove(&id.index());
                }
            }
            SocketEvent::Connected(..) => {}
        }
        self.execute(out);
    }

    fn execute(&mut self, actions: Vec<ServerAction>) {
        for action in actions {
            let (id, command) = match action {
                ServerAction::Send { session, data } => (session, Command::Send(data)),
                ServerAction::Close { session } => (session, Command::Close),
            };
            if let Some((current, tx)) = self.sockets.get(&id.index())
                && *current == id
            {
                let _ = tx.send(command);
            }
        }
    }
}

impl IntoFuture for Serve {
    type Output = ();
    type IntoFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.run())
    }
}

impl std::fmt::Debug for Serve {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Serve")
            .field("server", &self.server)
            .field("sockets", &self.sockets.len())
            .finish_non_exhaustive()
    }
}
