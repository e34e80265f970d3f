use bytes::Bytes;
use std::{
    collections::HashMap,
    net::SocketAddr,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use super::{
    Connector, TcpConnector,
    socket::{self, Command, CommandTx, SocketEvent},
};
use crate::{
    Config, Error,
    client::{Action, Context, PoolManager, Request, SocketId, Token},
    log::{debug, trace},
    ws::{DataType, Fragment},
};

type Shared = Mutex<PoolManager>;

fn lock(pool: &Shared) -> MutexGuard<'_, PoolManager> {
    pool.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloneable handle to a [`PoolManager`] driven by a [`Driver`].
///
/// Every method may be called from any thread. The pool lock is only held while the pool computes
/// actions, the driver executes them.
#[derive(Clone)]
pub struct Client {
    pool: Arc<Shared>,
    /// Actions computed outside the loop, also wakes it.
    actions: UnboundedSender<Vec<Action>>,
}

impl Client {
    /// Client connecting over plain TCP.
    pub fn new(config: Config) -> (Client, Driver<TcpConnector>) {
        Self::with_connector(config, TcpConnector)
    }

    pub fn with_connector<C: Connector>(config: Config, connector: C) -> (Client, Driver<C>) {
        let (actions_tx, actions_rx) = unbounded_channel();
        let (events_tx, events_rx) = unbounded_channel();
        let buffer_size = config.receive_buffer_size;
        let pool = Arc::new(Mutex::new(PoolManager::new(config)));
        let driver = Driver {
            pool: pool.clone(),
            connector: Arc::new(connector),
            actions: actions_rx,
            events_tx,
            events: events_rx,
            sockets: HashMap::new(),
            buffer_size,
            orphaned: false,
        };
        (Client { pool, actions: actions_tx }, driver)
    }

    /// Batches are queued while the pool is locked, so the channel order is the order the pool
    /// produced them in.
    fn act<R>(&self, f: impl FnOnce(&mut PoolManager, Instant, &mut Vec<Action>) -> R) -> R {
        let mut out = Vec::new();
        let mut pool = lock(&self.pool);
        let ret = f(&mut pool, Instant::now(), &mut out);
        if !out.is_empty() {
            let _ = self.actions.send(out);
        }
        drop(pool);
        ret
    }

    pub fn submit(&self, request: Request) -> Result<Token, Error> {
        self.act(|pool, _, out| pool.submit(request, out))
    }

    pub fn cancel(&self, token: Token) -> bool {
        self.act(|pool, now, out| pool.cancel(token, now, out))
    }

    pub fn delete_requests(&self, addr: SocketAddr) -> usize {
        self.act(|pool, _, out| pool.delete_requests(addr, out))
    }

    pub fn stream_body(&self, token: Token, data: impl Into<Bytes>, done: bool) -> Result<(), Error> {
        let data = data.into();
        self.act(|pool, _, out| pool.stream_body(token, data, done, out))
    }

    pub fn ws_send(&self, token: Token, data_type: DataType, payload: &[u8], fragment: Fragment) -> Result<(), Error> {
        self.act(|pool, _, out| pool.ws_send(token, data_type, payload, fragment, out))
    }

    pub fn ws_ping(&self, token: Token, payload: &[u8]) -> Result<(), Error> {
        self.act(|pool, _, out| pool.ws_ping(token, payload, out))
    }

    pub fn ws_close(&self, token: Token) -> Result<(), Error> {
        self.act(|pool, _, out| pool.ws_close(token, out))
    }

    pub fn reset_context(&self, token: Token, context: Context) -> bool {
        lock(&self.pool).reset_context(token, context)
    }

    /// Fail every request and close every socket, the driver stops afterwards.
    pub fn shutdown(&self) {
        self.act(|pool, _, out| {
            pool.shutdown(out);
            out.push(Action::Wake);
        })
    }

    /// Read pool state, e.g. [`PoolManager::pending_requests`].
    pub fn inspect<R>(&self, f: impl FnOnce(&PoolManager) -> R) -> R {
        f(&lock(&self.pool))
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("Client").field(&*lock(&self.pool)).finish()
    }
}

// ===== Driver =====

/// The I/O loop of a [`Client`], spawn it on a tokio runtime.
///
/// ```no_run
/// # async fn run() {
/// let (client, driver) = plex::rt::Client::new(plex::Config::default());
/// tokio::spawn(driver.run());
/// # drop(client);
/// # }
/// ```
pub struct Driver<C: Connector> {
    pool: Arc<Shared>,
    connector: Arc<C>,
    actions: UnboundedReceiver<Vec<Action>>,
    events_tx: socket::EventTx<SocketId>,
    events: UnboundedReceiver<SocketEvent<SocketId>>,
    sockets: HashMap<usize, (SocketId, CommandTx)>,
    buffer_size: usize,
    /// Every [`Client`] was dropped.
    orphaned: bool,
}

impl<C: Connector> Driver<C> {
    /// Run until every [`Client`] handle is dropped, or the pool is shut down and its sockets
    /// are closed.
    pub async fn run(mut self) {
        loop {
            let deadline = self.act(|pool, out| {
                pool.drain_backlog(out);
                pool.next_deadline()
            });

            let done = lock(&self.pool).is_shutdown() && self.sockets.is_empty();
            if done {
                debug!("client driver stopped");
                return;
            }

            let timer = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                actions = self.actions.recv(), if !self.orphaned => match actions {
                    Some(actions) => self.execute(actions),
                    None => {
                        debug!("client handles dropped, shutting down");
                        self.orphaned = true;
                        self.act(|pool, out| pool.shutdown(out));
                    }
                },
                Some(event) = self.events.recv() => self.handle(event),
                () = timer => self.act(|pool, out| pool.on_timer(Instant::now(), out)),
            }
        }
    }

    /// Run `f` under the pool lock and execute its actions behind every batch a [`Client`]
    /// queued before it, so sends reach a socket in the order the pool produced them.
    fn act<R>(&mut self, f: impl FnOnce(&mut PoolManager, &mut Vec<Action>) -> R) -> R {
        let mut out = Vec::new();
        let ret = {
            let mut pool = lock(&self.pool);
            while let Ok(queued) = self.actions.try_recv() {
                out.extend(queued);
            }
            f(&mut pool, &mut out)
        };
        self.execute(out);
        ret
    }

    fn handle(&mut self, event: SocketEvent<SocketId>) {
        let now = Instant::now();
        if let SocketEvent::Connected(id, false) | SocketEvent::Closed(id) = event {
            self.forget(id);
        }
        self.act(|pool, out| match event {
            SocketEvent::Connected(id, ok) => pool.on_connected(id, ok, now, out),
            SocketEvent::Data(id, data) => pool.on_data(id, &data, now, out),
            SocketEvent::Closed(id) => pool.on_closed(id, out),
        });
    }

    fn forget(&mut self, id: SocketId) {
        if self.sockets.get(&id.index()).is_some_and(|(current, _)| *current == id) {
            self.sockets.remove(&id.index());
        }
    }

    fn command(&self, id: SocketId, command: Command) {
        match self.sockets.get(&id.index()) {
            Some((current, tx)) if *current == id => {
                let _ = tx.send(command);
            }
            _ => {
                trace!("socket {} gone, command dropped", id.index());
            }
        }
    }

    /// Execute actions in order, handlers run here without the pool lock.
    fn execute(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Connect { socket, dest } => {
                    let tx = socket::connect(
                        self.connector.clone(),
                        dest,
                        socket,
                        self.buffer_size,
                        self.events_tx.clone(),
                    );
                    self.sockets.insert(socket.index(), (socket, tx));
                }
                Action::Send { socket, data } => self.command(socket, Command::Send(data)),
                Action::Disconnect { socket } => self.command(socket, Command::Close),
                Action::Wake => {}
                deliver => {
                    deliver.deliver();
                }
            }
        }
    }
}

impl<C: Connector> IntoFuture for Driver<C> {
    type Output = ();
    type IntoFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.run())
    }
}

impl<C: Connector> std::fmt::Debug for Driver<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Driver").field("sockets", &self.sockets.len()).finish_non_exhaustive()
    }
}
