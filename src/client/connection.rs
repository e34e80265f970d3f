use bytes::{Bytes, BytesMut};
use std::{collections::VecDeque, net::SocketAddr, sync::Arc, time::Instant};

use super::{Action, Destination, Failure, Record, ReplyKind, SocketId, Token};
use crate::{
    Config,
    h1::{Framer, Outcome},
    http::MessageHead,
    log::{debug, info, warning},
    ws::{self, Role, WebSocket, WsError},
};

/// Pool table key: destination address and slot index.
pub(crate) type ConnKey = (SocketAddr, usize);

/// Pipelining capability learned from the peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pipeline {
    Unknown,
    Supported,
    /// Never set automatically, a connection in this state reconnects instead of pipelining.
    Unsupported,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Link {
    Detached,
    Connecting,
    Connected,
}

/// What the pool has to do after the connection handled an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Next {
    Continue,
    Disconnect,
}

/// One client connection: request queue, framing state and the socket it is bound to.
pub(crate) struct Connection {
    pub key: ConnKey,
    pub dest: Destination,
    pub queue: VecDeque<Record>,
    pub pipeline: Pipeline,
    pub socket: Option<SocketId>,
    pub link: Link,
    pub idle_deadline: Option<Instant>,
    pub retry_at: Option<Instant>,
    pub attempts: u32,
    framer: Framer,
    read_buf: BytesMut,
    ws: Option<WebSocket>,
    /// Some response arrived since the socket connected.
    answered: bool,
    /// Head request was canceled while in flight, its disconnect is expected.
    canceling: bool,
    /// Last response announced that the server closes the connection.
    server_closes: bool,
    receive_buffer_size: usize,
}

impl Connection {
    pub fn new(key: ConnKey, dest: Destination, config: &Config) -> Self {
        Self {
            key,
            dest,
            queue: VecDeque::new(),
            pipeline: Pipeline::Unknown,
            socket: None,
            link: Link::Detached,
            idle_deadline: None,
            retry_at: None,
            attempts: 0,
            framer: Framer::response(config.max_header_size),
            read_buf: BytesMut::new(),
            ws: None,
            answered: false,
            canceling: false,
            server_closes: false,
            receive_buffer_size: config.receive_buffer_size,
        }
    }

    pub fn is_upgraded(&self) -> bool {
        self.ws.is_some()
    }

    pub fn bind(&mut self, socket: SocketId) {
        self.socket = Some(socket);
        self.link = Link::Connecting;
    }

    /// Transport connected, the head request goes out.
    pub fn connected(&mut self, out: &mut Vec<Action>) {
        self.link = Link::Connected;
        self.attempts = 0;
        self.answered = false;
        self.server_closes = false;
        self.framer.reset();
        self.read_buf = BytesMut::with_capacity(self.receive_buffer_size);
        self.flush(out);
    }

    /// Socket is gone, everything tied to it is dropped.
    pub fn detach(&mut self) {
        self.socket = None;
        self.link = Link::Detached;
        self.ws = None;
        self.canceling = false;
        self.server_closes = false;
        self.framer.reset();
        self.read_buf = BytesMut::new();
    }

    /// Write every request that may go out now.
    ///
    /// Only the head request is written until pipelining is known to work, and nothing after
    /// a streamed body that is still open.
    pub fn flush(&mut self, out: &mut Vec<Action>) {
        let Some(socket) = self.socket else {
            return;
        };
        if self.link != Link::Connected || self.ws.is_some() {
            return;
        }
        let limit = if self.pipeline == Pipeline::Supported && !self.server_closes { usize::MAX } else { 1 };

        let mut data = Vec::new();
        for record in self.queue.iter_mut().take(limit) {
            if !record.sent {
                record.transmit(&mut data);
            }
            if record.is_blocking() {
                break;
            }
        }
        out.extend(data.into_iter().map(|data| Action::Send { socket, data }));
    }

    // ===== Inbound =====

    /// Handle received bytes.
    pub fn receive(&mut self, data: &[u8], config: &Config, out: &mut Vec<Action>) -> Next {
        self.read_buf.extend_from_slice(data);
        loop {
            if self.ws.is_some() {
                return self.receive_ws(out);
            }

            let Some(front) = self.queue.front() else {
                if !self.read_buf.is_empty() {
                    warning!("{}: {} bytes without pending request", self.dest.addr, self.read_buf.len());
                    return Next::Disconnect;
                }
                return Next::Continue;
            };
            if self.framer.is_idle() {
                self.framer.expect_bodiless(front.request.is_head);
            }

            let outcome = match self.framer.decode(&mut self.read_buf) {
                Ok(outcome) => outcome,
                Err(err) => {
                    warning!("{}: malformed response: {err}", self.dest.addr);
                    self.answered = true;
                    self.fail_front(Failure::Protocol(err), out);
                    return Next::Disconnect;
                }
            };

            match outcome {
                Outcome::NeedMoreData => return Next::Continue,
                Outcome::Head(_) => self.answered = true,
                Outcome::Informational(_) => self.answered = false,
                Outcome::Upgrade(head) => {
                    if let Err(err) = self.upgrade(head, config, out) {
                        warning!("{}: websocket upgrade rejected: {err}", self.dest.addr);
                        self.answered = true;
                        self.fail_front(Failure::WebSocket(err), out);
                        return Next::Disconnect;
                    }
                }
                Outcome::Partial(data) => {
                    self.answered = true;
                    let head = self.framer.head().cloned();
                    if let Some(record) = self.queue.front_mut() {
                        if record.request.collect {
                            record.collected.extend_from_slice(&data);
                        } else {
                            deliver(out, record, ReplyKind::Partial, head, data);
                        }
                    }
                }
                Outcome::Complete(data) => {
                    self.answered = true;
                    let head = self.framer.head().cloned();
                    if let Some(record) = self.queue.pop_front() {
                        let body = finish_body(&record, data);
                        deliver(out, &record, ReplyKind::Complete, head.clone(), body);
                    }
                    if self.finished_response(head.as_deref(), out) == Next::Disconnect {
                        return Next::Disconnect;
                    }
                }
            }
        }
    }

    fn upgrade(&mut self, head: Arc<MessageHead>, config: &Config, out: &mut Vec<Action>) -> Result<(), WsError> {
        let Some(record) = self.queue.front() else {
            return Err(WsError::Handshake);
        };
        let Some(upgrade) = record.request.upgrade.as_ref().filter(|_| !record.canceled) else {
            return Err(WsError::Handshake);
        };
        ws::handshake::verify_response(&head, &upgrade.accept)?;

        let mut socket = WebSocket::new(
            Role::Client,
            upgrade.max_reassembly.unwrap_or(config.max_reassembly),
            config.max_frame_size,
        );
        socket.set_auto_pong(upgrade.auto_pong);
        self.ws = Some(socket);
        self.answered = true;
        info!("{}: websocket established", self.dest.addr);
        deliver(out, record, ReplyKind::Upgraded, Some(head), Bytes::new());
        Ok(())
    }

    fn receive_ws(&mut self, out: &mut Vec<Action>) -> Next {
        let (Some(ws), Some(socket)) = (&mut self.ws, self.socket) else {
            return Next::Continue;
        };
        let mut events = Vec::new();
        let result = ws.decode(&mut self.read_buf, &mut events);

        let mut next = Next::Continue;
        for event in events {
            let (kind, body) = match event {
                ws::Event::Message(message) => (
                    ReplyKind::Message { data_type: message.data_type, status: message.status },
                    message.payload,
                ),
                ws::Event::Ping(payload) => (ReplyKind::Ping, payload),
                ws::Event::Pong(payload) => (ReplyKind::Pong, payload),
                ws::Event::Send(data) => {
                    out.push(Action::Send { socket, data });
                    continue;
                }
                ws::Event::Closed(_) => {
                    next = Next::Disconnect;
                    continue;
                }
            };
            if let Some(record) = self.queue.front() {
                deliver(out, record, kind, None, body);
            }
        }

        if let Err(err) = result {
            warning!("{}: websocket protocol error: {err}", self.dest.addr);
            return Next::Disconnect;
        }
        next
    }

    /// A response completed and its request is already dequeued.
    fn finished_response(&mut self, head: Option<&MessageHead>, out: &mut Vec<Action>) -> Next {
        self.server_closes = head.is_some_and(|head| !head.is_keep_alive());
        if self.queue.is_empty() {
            return Next::Continue;
        }
        match self.pipeline {
            Pipeline::Unsupported => Next::Disconnect,
            _ if self.server_closes => {
                debug!("{}: server closes, {} requests wait for reconnect", self.dest.addr, self.queue.len());
                Next::Continue
            }
            Pipeline::Unknown => {
                info!("{}: pipelining enabled", self.dest.addr);
                self.pipeline = Pipeline::Supported;
                self.flush(out);
                Next::Continue
            }
            Pipeline::Supported => {
                self.flush(out);
                Next::Continue
            }
        }
    }

    /// Transport closed, deliver what the close completes or interrupts.
    ///
    /// Returns `true` if requests remain that need a new socket.
    pub fn closed(&mut self, out: &mut Vec<Action>) -> bool {
        let canceling = std::mem::take(&mut self.canceling);

        if self.ws.is_some() {
            if let Some(record) = self.queue.pop_front() {
                deliver(out, &record, ReplyKind::Disconnected, None, Bytes::new());
            }
        } else if !canceling {
            let head = self.framer.head().cloned();
            if let Some(rest) = self.framer.decode_eof(&mut self.read_buf) {
                self.answered = true;
                if let Some(record) = self.queue.pop_front() {
                    let body = finish_body(&record, rest);
                    deliver(out, &record, ReplyKind::Complete, head, body);
                }
            } else if !self.framer.is_idle() {
                // severed mid-response
                if let Some(record) = self.queue.pop_front().filter(|r| !r.canceled) {
                    let body = finish_body(&record, Bytes::new());
                    let mut reply = record.reply(ReplyKind::Complete, head, body);
                    reply.truncated = true;
                    out.push(Action::Deliver { handler: record.request.handler.clone(), reply });
                }
            }
        }

        if !canceling && !self.answered && !self.queue.is_empty() {
            debug!("{}: closed before any response", self.dest.addr);
            self.fail_front(Failure::NoResponse, out);
        }

        self.detach();
        self.answered = false;
        self.queue.retain(|r| !r.canceled);
        for record in &mut self.queue {
            record.rewind();
        }
        !self.queue.is_empty()
    }

    // ===== Outbound =====

    /// Cancel a queued request, returns `None` if it is not queued here.
    ///
    /// A request already written behind the head stays queued as canceled so the response
    /// order is kept. The head request, or one whose streamed body is still open, can only be
    /// interrupted by dropping the socket.
    pub fn cancel(&mut self, token: Token, out: &mut Vec<Action>) -> Option<Next> {
        let pos = self.queue.iter().position(|r| r.token == token && !r.canceled)?;
        let on_wire = self.socket.is_some() && self.queue[pos].sent;
        deliver(out, &self.queue[pos], ReplyKind::Failed(Failure::Canceled), None, Bytes::new());

        if on_wire && pos > 0 && !self.queue[pos].is_blocking() {
            self.queue[pos].canceled = true;
            return Some(Next::Continue);
        }
        self.queue.remove(pos);
        if on_wire {
            self.canceling = true;
            return Some(Next::Disconnect);
        }
        Some(Next::Continue)
    }

    /// Append a streamed body chunk.
    pub fn stream_body(&mut self, token: Token, data: Bytes, done: bool, out: &mut Vec<Action>) -> Result<(), crate::Error> {
        let record = self
            .queue
            .iter_mut()
            .find(|r| r.token == token && !r.canceled)
            .ok_or(crate::Error::UnknownRequest)?;
        let pending = record.push_chunk(data, done).map_err(|()| crate::Error::NotStreaming)?;

        if let (Some(data), Some(socket)) = (pending, self.socket) {
            out.push(Action::Send { socket, data });
        }
        if done {
            self.flush(out);
        }
        Ok(())
    }

    /// Websocket state of the upgraded request `token`.
    pub fn websocket(&mut self, token: Token) -> Result<(&mut WebSocket, SocketId), crate::Error> {
        if self.queue.front().is_none_or(|r| r.token != token) {
            return Err(crate::Error::NotUpgraded);
        }
        match (&mut self.ws, self.socket) {
            (Some(ws), Some(socket)) => Ok((ws, socket)),
            _ => Err(crate::Error::NotUpgraded),
        }
    }

    /// Fail and drop every queued request.
    pub fn fail_all(&mut self, failure: Failure, out: &mut Vec<Action>) -> Vec<Token> {
        let mut tokens = Vec::with_capacity(self.queue.len());
        for record in self.queue.drain(..) {
            if record.canceled {
                continue;
            }
            tokens.push(record.token);
            deliver(out, &record, ReplyKind::Failed(failure.clone()), None, Bytes::new());
        }
        tokens
    }

    fn fail_front(&mut self, failure: Failure, out: &mut Vec<Action>) {
        if let Some(record) = self.queue.pop_front() {
            deliver(out, &record, ReplyKind::Failed(failure), None, Bytes::new());
        }
    }

    /// Number of queued requests still waiting for an answer.
    pub fn pending(&self) -> usize {
        self.queue.iter().filter(|r| !r.canceled).count()
    }

    /// Tokens of every queued request.
    pub fn tokens(&self) -> impl Iterator<Item = Token> + '_ {
        self.queue.iter().map(|r| r.token)
    }
}

fn finish_body(record: &Record, last: Bytes) -> Bytes {
    if !record.request.collect || record.collected.is_empty() {
        return last;
    }
    let mut body = record.collected.clone();
    body.extend_from_slice(&last);
    body.freeze()
}

fn deliver(out: &mut Vec<Action>, record: &Record, kind: ReplyKind, head: Option<Arc<MessageHead>>, body: Bytes) {
    if record.canceled {
        return;
    }
    out.push(Action::Deliver {
        handler: record.request.handler.clone(),
        reply: record.reply(kind, head, body),
    });
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("key", &self.key)
            .field("queue", &self.queue.len())
            .field("pipeline", &self.pipeline)
            .field("socket", &self.socket)
            .field("link", &self.link)
            .finish_non_exhaustive()
    }
}
