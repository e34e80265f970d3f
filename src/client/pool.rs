use bytes::Bytes;
use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    time::Instant,
};

use super::{
    Action, Context, Failure, Request, SocketId, Token,
    connection::{ConnKey, Connection, Link, Next, Pipeline},
    request::Record,
};
use crate::{
    Config, Error, crypto,
    log::{debug, error, info, trace},
    ws::{CLOSE_NORMAL, DataType, Fragment},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Free,
    Bound(ConnKey),
    /// Disconnect issued for a connection that no longer owns the slot.
    Draining,
}

#[derive(Clone, Copy, Debug)]
struct Slot {
    generation: u64,
    state: SlotState,
}

/// Client connection pool.
///
/// The pool performs no I/O. Every operation appends [`Action`]s that the caller executes in
/// order, time is passed in explicitly. A runtime wraps it in a mutex, see [`rt::Client`].
///
/// [`rt::Client`]: crate::rt::Client
pub struct PoolManager {
    config: Config,
    connections: HashMap<ConnKey, Connection>,
    tokens: HashMap<Token, ConnKey>,
    /// Connections without socket or request, oldest first.
    idle: VecDeque<ConnKey>,
    /// Connections waiting for a socket slot.
    backlog: VecDeque<ConnKey>,
    slots: Vec<Slot>,
    shutdown: bool,
    _crypto: crypto::Guard,
}

impl PoolManager {
    pub fn new(config: Config) -> Self {
        let slots = vec![Slot { generation: 0, state: SlotState::Free }; config.pool_size];
        Self {
            connections: HashMap::new(),
            tokens: HashMap::new(),
            idle: VecDeque::with_capacity(config.idle_capacity),
            backlog: VecDeque::new(),
            slots,
            shutdown: false,
            _crypto: crypto::Guard::new(),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ===== Submission =====

    /// Queue a request, returns its token.
    pub fn submit(&mut self, request: Request, out: &mut Vec<Action>) -> Result<Token, Error> {
        if self.shutdown {
            return Err(Error::Shutdown);
        }

        let dest = request.dest;
        let key = self.choose_slot(dest.addr);
        let record = Record::new(request);
        let token = record.token;
        self.tokens.insert(token, key);
        trace!("{token}: submitted to {}/{}", key.0, key.1);

        let Some(conn) = self.connections.get_mut(&key) else {
            let mut conn = Connection::new(key, dest, &self.config);
            conn.queue.push_back(record);
            self.connections.insert(key, conn);
            self.backlog.push_back(key);
            out.push(Action::Wake);
            return Ok(token);
        };

        let was_empty = conn.queue.is_empty();
        conn.queue.push_back(record);

        if !was_empty {
            conn.flush(out);
            return Ok(token);
        }

        conn.idle_deadline = None;
        if let Some(pos) = self.idle.iter().position(|k| *k == key) {
            self.idle.remove(pos);
            self.backlog.push_back(key);
        } else if conn.socket.is_some() {
            conn.flush(out);
        } else if conn.retry_at.is_none() && !self.backlog.contains(&key) {
            self.backlog.push_back(key);
        }
        out.push(Action::Wake);
        Ok(token)
    }

    /// Prefer an existing connection with nothing queued, then a free slot, then the
    /// shortest queue.
    fn choose_slot(&self, addr: SocketAddr) -> ConnKey {
        let max = self.config.max_connections_per_destination;
        let keys = (0..max).map(|slot| (addr, slot));

        if let Some(key) = keys.clone().find(|key| self.connections.get(key).is_some_and(|c| c.queue.is_empty())) {
            return key;
        }
        if let Some(key) = keys.clone().find(|key| !self.connections.contains_key(key)) {
            return key;
        }
        keys.min_by_key(|key| self.connections.get(key).map_or(0, |c| c.queue.len()))
            .unwrap_or((addr, 0))
    }

    /// Cancel a queued request, its handler receives [`Failure::Canceled`].
    ///
    /// Returns `false` if the token is unknown.
    pub fn cancel(&mut self, token: Token, now: Instant, out: &mut Vec<Action>) -> bool {
        let Some(key) = self.tokens.remove(&token) else {
            return false;
        };
        let Some(conn) = self.connections.get_mut(&key) else {
            return false;
        };

        match conn.cancel(token, out) {
            None => false,
            Some(Next::Disconnect) => {
                debug!("{token}: canceled in flight, reconnecting");
                if let Some(socket) = conn.socket {
                    out.push(Action::Disconnect { socket });
                }
                true
            }
            Some(Next::Continue) => {
                if conn.queue.is_empty() && conn.link == Link::Connected {
                    conn.idle_deadline = Some(now + self.config.idle_timeout);
                }
                true
            }
        }
    }

    /// Fail every request queued for `addr` with [`Failure::Deleted`] and drop its
    /// connections, returns the number of failed requests.
    pub fn delete_requests(&mut self, addr: SocketAddr, out: &mut Vec<Action>) -> usize {
        let keys: Vec<ConnKey> = self.connections.keys().filter(|k| k.0 == addr).copied().collect();
        let mut failed = 0;
        for key in keys {
            failed += self.destroy(key, Failure::Deleted, out);
        }
        if failed > 0 {
            info!("{addr}: deleted {failed} requests");
        }
        failed
    }

    /// Fail everything with [`Failure::Destroyed`] and close every socket.
    pub fn shutdown(&mut self, out: &mut Vec<Action>) {
        self.shutdown = true;
        let keys: Vec<ConnKey> = self.connections.keys().copied().collect();
        for key in keys {
            self.destroy(key, Failure::Destroyed, out);
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    fn destroy(&mut self, key: ConnKey, failure: Failure, out: &mut Vec<Action>) -> usize {
        let Some(mut conn) = self.connections.remove(&key) else {
            return 0;
        };
        let tokens = conn.fail_all(failure, out);
        for token in &tokens {
            self.tokens.remove(token);
        }
        if let Some(socket) = conn.socket {
            self.drain_slot(socket);
            out.push(Action::Disconnect { socket });
        }
        self.idle.retain(|k| *k != key);
        self.backlog.retain(|k| *k != key);
        tokens.len()
    }

    /// Append a chunk to a request submitted with a streamed body.
    pub fn stream_body(&mut self, token: Token, data: Bytes, done: bool, out: &mut Vec<Action>) -> Result<(), Error> {
        self.connection(token)?.stream_body(token, data, done, out)
    }

    /// Send a websocket message on the upgraded request `token`.
    pub fn ws_send(
        &mut self,
        token: Token,
        data_type: DataType,
        payload: &[u8],
        fragment: Fragment,
        out: &mut Vec<Action>,
    ) -> Result<(), Error> {
        let (ws, socket) = self.connection(token)?.websocket(token)?;
        let data = ws.encode(data_type, payload, fragment)?;
        out.push(Action::Send { socket, data });
        Ok(())
    }

    pub fn ws_ping(&mut self, token: Token, payload: &[u8], out: &mut Vec<Action>) -> Result<(), Error> {
        let (ws, socket) = self.connection(token)?.websocket(token)?;
        let data = ws.ping(payload)?;
        out.push(Action::Send { socket, data });
        Ok(())
    }

    /// Send close, at most once per connection. The peer's echo tears the connection down.
    pub fn ws_close(&mut self, token: Token, out: &mut Vec<Action>) -> Result<(), Error> {
        let (ws, socket) = self.connection(token)?.websocket(token)?;
        if let Some(data) = ws.close(CLOSE_NORMAL) {
            out.push(Action::Send { socket, data });
        }
        Ok(())
    }

    /// Replace the user values of a queued request.
    pub fn reset_context(&mut self, token: Token, context: Context) -> bool {
        let Ok(conn) = self.connection(token) else {
            return false;
        };
        match conn.queue.iter_mut().find(|r| r.token == token && !r.canceled) {
            Some(record) => {
                record.request.context = context;
                true
            }
            None => false,
        }
    }

    fn connection(&mut self, token: Token) -> Result<&mut Connection, Error> {
        let key = self.tokens.get(&token).ok_or(Error::UnknownRequest)?;
        self.connections.get_mut(key).ok_or(Error::UnknownRequest)
    }

    // ===== I/O loop =====

    /// Pre-I/O phase: bind backlogged connections to free socket slots.
    pub fn drain_backlog(&mut self, out: &mut Vec<Action>) {
        while let Some(&key) = self.backlog.front() {
            let Some(conn) = self.connections.get_mut(&key) else {
                self.backlog.pop_front();
                continue;
            };
            if conn.socket.is_some() {
                self.backlog.pop_front();
                continue;
            }
            if conn.queue.is_empty() {
                self.backlog.pop_front();
                Self::park_idle(&mut self.idle, &mut self.connections, self.config.idle_capacity, key);
                continue;
            }

            let Some(index) = self.slots.iter().position(|s| s.state == SlotState::Free) else {
                trace!("backlog waits for a free socket, {} queued", self.backlog.len());
                return;
            };
            self.backlog.pop_front();

            let slot = &mut self.slots[index];
            slot.generation += 1;
            slot.state = SlotState::Bound(key);
            let socket = SocketId { index, generation: slot.generation };

            conn.bind(socket);
            debug!("{}/{}: connecting on socket {index}", key.0, key.1);
            out.push(Action::Connect { socket, dest: conn.dest });
        }
    }

    /// Connect attempt finished.
    pub fn on_connected(&mut self, socket: SocketId, ok: bool, now: Instant, out: &mut Vec<Action>) {
        let Some(key) = self.bound(socket) else {
            // a failed connect never reports a close
            if !ok {
                self.release_draining(socket);
            }
            return;
        };
        let Some(conn) = self.connections.get_mut(&key) else {
            return;
        };

        if ok {
            info!("{}/{}: connected", key.0, key.1);
            conn.connected(out);
            if conn.queue.is_empty() {
                conn.idle_deadline = Some(now + self.config.idle_timeout);
            }
            return;
        }

        self.slots[socket.index].state = SlotState::Free;
        conn.detach();
        conn.attempts += 1;
        if conn.attempts <= self.config.connect_retries && !conn.queue.is_empty() {
            let delay = self.config.backoff(conn.attempts);
            debug!("{}/{}: connect failed, retry in {delay:?}", key.0, key.1);
            conn.retry_at = Some(now + delay);
            return;
        }

        error!("{}/{}: connect failed, giving up", key.0, key.1);
        self.destroy(key, Failure::ConnectFailed, out);
    }

    /// Bytes received on `socket`.
    pub fn on_data(&mut self, socket: SocketId, data: &[u8], now: Instant, out: &mut Vec<Action>) {
        let Some(key) = self.bound(socket) else {
            return;
        };
        let Some(conn) = self.connections.get_mut(&key) else {
            return;
        };

        let before: Vec<Token> = conn.tokens().collect();
        let next = conn.receive(data, &self.config, out);
        let after = conn.queue.len();
        self.forget_finished(key, &before, after);

        if next == Next::Disconnect {
            out.push(Action::Disconnect { socket });
        } else if after == 0 && !before.is_empty() {
            if let Some(conn) = self.connections.get_mut(&key) {
                conn.idle_deadline = Some(now + self.config.idle_timeout);
            }
        }
    }

    /// Transport of `socket` closed.
    pub fn on_closed(&mut self, socket: SocketId, out: &mut Vec<Action>) {
        let Some(slot) = self.slots.get_mut(socket.index) else {
            return;
        };
        if slot.generation != socket.generation {
            return;
        }
        let state = std::mem::replace(&mut slot.state, SlotState::Free);
        let SlotState::Bound(key) = state else {
            return;
        };
        let Some(conn) = self.connections.get_mut(&key) else {
            return;
        };

        debug!("{}/{}: disconnected", key.0, key.1);
        let before: Vec<Token> = conn.tokens().collect();
        let requeue = conn.closed(out);
        conn.idle_deadline = None;
        let after = conn.queue.len();
        self.forget_finished(key, &before, after);

        if requeue {
            self.backlog.push_back(key);
            out.push(Action::Wake);
        } else {
            Self::park_idle(&mut self.idle, &mut self.connections, self.config.idle_capacity, key);
        }
    }

    /// The transport moved its receive buffer.
    ///
    /// Parsed heads are owned handles and need no rebasing, the notification is accepted for
    /// transports that report it.
    pub fn on_buffer_reallocated(&mut self, socket: SocketId, offset: isize) {
        if self.bound(socket).is_some() {
            trace!("socket {} buffer moved by {offset}", socket.index);
        }
    }

    /// Expire idle timers and connect backoffs.
    pub fn on_timer(&mut self, now: Instant, out: &mut Vec<Action>) {
        let mut expired = Vec::new();
        let mut retry = Vec::new();
        for (key, conn) in &mut self.connections {
            if conn.idle_deadline.is_some_and(|d| d <= now) {
                conn.idle_deadline = None;
                if conn.queue.is_empty() {
                    expired.push(*key);
                }
            }
            if conn.retry_at.is_some_and(|d| d <= now) {
                conn.retry_at = None;
                retry.push(*key);
            }
        }

        for key in expired {
            let Some(conn) = self.connections.get_mut(&key) else {
                continue;
            };
            debug!("{}/{}: idle timeout", key.0, key.1);
            if let Some(socket) = conn.socket {
                out.push(Action::Disconnect { socket });
                self.slots[socket.index].state = SlotState::Draining;
            }
            conn.detach();
            Self::park_idle(&mut self.idle, &mut self.connections, self.config.idle_capacity, key);
        }

        for key in retry {
            if !self.backlog.contains(&key) {
                self.backlog.push_back(key);
            }
        }
    }

    /// Soonest pending timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.connections
            .values()
            .flat_map(|c| [c.idle_deadline, c.retry_at])
            .flatten()
            .min()
    }

    fn park_idle(idle: &mut VecDeque<ConnKey>, connections: &mut HashMap<ConnKey, Connection>, capacity: usize, key: ConnKey) {
        if idle.contains(&key) {
            return;
        }
        if idle.len() >= capacity {
            if let Some(oldest) = idle.pop_front() {
                debug!("{}/{}: evicted from idle set", oldest.0, oldest.1);
                connections.remove(&oldest);
            }
        }
        idle.push_back(key);
    }

    fn bound(&self, socket: SocketId) -> Option<ConnKey> {
        let slot = self.slots.get(socket.index)?;
        match slot.state {
            SlotState::Bound(key) if slot.generation == socket.generation => Some(key),
            _ => None,
        }
    }

    fn release_draining(&mut self, socket: SocketId) {
        if let Some(slot) = self.slots.get_mut(socket.index)
            && slot.generation == socket.generation
            && slot.state == SlotState::Draining
        {
            slot.state = SlotState::Free;
        }
    }

    fn drain_slot(&mut self, socket: SocketId) {
        if let Some(slot) = self.slots.get_mut(socket.index)
            && slot.generation == socket.generation
            && slot.state != SlotState::Free
        {
            slot.state = SlotState::Draining;
        }
    }

    /// Drop token entries of requests that left the queue.
    fn forget_finished(&mut self, key: ConnKey, before: &[Token], remaining: usize) {
        if before.len() == remaining {
            return;
        }
        let Some(conn) = self.connections.get(&key) else {
            return;
        };
        for token in before {
            if !conn.queue.iter().any(|r| r.token == *token) {
                self.tokens.remove(token);
            }
        }
    }

    // ===== Introspection =====

    /// Returns `true` if any connection to `addr` exists.
    pub fn has_connection(&self, addr: SocketAddr) -> bool {
        self.connections.keys().any(|k| k.0 == addr)
    }

    /// Number of connections bound to a socket.
    pub fn active_connection_count(&self) -> usize {
        self.connections.values().filter(|c| c.socket.is_some()).count()
    }

    /// Number of sockets that are bound or still closing.
    pub fn live_sockets(&self) -> usize {
        self.slots.iter().filter(|s| s.state != SlotState::Free).count()
    }

    /// Number of requests queued for `addr`.
    pub fn pending_requests(&self, addr: SocketAddr) -> usize {
        self.connections.values().filter(|c| c.key.0 == addr).map(|c| c.pending()).sum()
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Pipelining state of a destination slot.
    pub fn pipeline(&self, addr: SocketAddr, slot: usize) -> Option<Pipeline> {
        self.connections.get(&(addr, slot)).map(|c| c.pipeline)
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("connections", &self.connections.len())
            .field("idle", &self.idle.len())
            .field("backlog", &self.backlog.len())
            .field("sockets", &self.live_sockets())
            .finish_non_exhaustive()
    }
}
