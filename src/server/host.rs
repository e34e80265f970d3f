use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Instant};

use super::{Event, RequestHandler, ServerAction, Session, SessionId};
use crate::{
    Config, Error, crypto,
    h1::{Outcome, ProtoError},
    http::{MessageHead, StatusCode, Version, headers::standard::EXPECT},
    log::{debug, info, warning},
    ws,
};

struct Entry {
    generation: u64,
    session: Option<Session>,
}

/// HTTP server session layer.
///
/// Like [`PoolManager`], the server performs no I/O: the loop feeds accepted sockets, received
/// bytes and timer ticks in, and executes the returned [`ServerAction`]s.
///
/// [`PoolManager`]: crate::client::PoolManager
pub struct Server {
    config: Config,
    handler: Arc<dyn RequestHandler>,
    directories: HashMap<Box<[u8]>, Arc<dyn RequestHandler>>,
    entries: Vec<Entry>,
    active: usize,
    _crypto: crypto::Guard,
}

impl Server {
    /// Create a server dispatching requests that match no virtual directory to `handler`.
    pub fn new(config: Config, handler: impl RequestHandler) -> Self {
        Self {
            config,
            handler: Arc::new(handler),
            directories: HashMap::new(),
            entries: Vec::new(),
            active: 0,
            _crypto: crypto::Guard::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Route requests whose first path segment equals `name` to `handler`.
    ///
    /// The handler stays bound to the session until the request completes, or for the lifetime
    /// of a websocket it upgraded.
    pub fn register_directory(&mut self, name: &str, handler: impl RequestHandler) {
        let name = name.trim_matches('/');
        self.directories.insert(name.as_bytes().into(), Arc::new(handler));
    }

    pub fn unregister_directory(&mut self, name: &str) -> bool {
        self.directories.remove(name.trim_matches('/').as_bytes()).is_some()
    }

    // ===== Sessions =====

    /// Register an accepted transport.
    pub fn accept(&mut self, peer: SocketAddr, now: Instant) -> Result<SessionId, Error> {
        if self.active >= self.config.max_sessions {
            warning!("{peer}: session limit reached");
            return Err(Error::SessionLimit);
        }

        let index = match self.entries.iter().position(|e| e.session.is_none()) {
            Some(index) => index,
            None => {
                self.entries.push(Entry { generation: 0, session: None });
                self.entries.len() - 1
            }
        };
        let entry = &mut self.entries[index];
        entry.generation += 1;
        let id = SessionId { index, generation: entry.generation };

        let mut session = Session::new(id, peer, &self.config);
        session.idle_deadline = Some(now + self.config.idle_timeout);
        entry.session = Some(session);
        self.active += 1;
        info!("{id}: accepted {peer}");
        Ok(id)
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        let entry = self.entries.get(id.index)?;
        if entry.generation != id.generation {
            return None;
        }
        entry.session.as_ref()
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.active
    }

    /// Act on a session from outside a handler, e.g. to answer a request later.
    ///
    /// Returns `None` if the session is gone.
    pub fn with_session<R>(
        &mut self,
        id: SessionId,
        now: Instant,
        out: &mut Vec<ServerAction>,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Option<R> {
        let session = lookup(&mut self.entries, id)?;
        let ret = f(session);
        self.pump(id, now, out);
        Some(ret)
    }

    /// Close every session.
    pub fn shutdown(&mut self, out: &mut Vec<ServerAction>) {
        for session in self.entries.iter_mut().filter_map(|e| e.session.as_mut()) {
            session.disconnect();
            out.append(&mut session.actions);
        }
    }

    // ===== I/O loop =====

    /// Bytes received on a session.
    ///
    /// While a response is pending, pipelined input is buffered up to the header size limit,
    /// beyond that the session is dropped.
    pub fn on_data(&mut self, id: SessionId, data: &[u8], now: Instant, out: &mut Vec<ServerAction>) {
        let Some(session) = lookup(&mut self.entries, id) else {
            return;
        };
        if session.is_closing() {
            return;
        }
        session.read_buf.extend_from_slice(data);
        if session.request_done && !session.is_responded() && session.read_buf.len() > self.config.max_header_size {
            warning!("{id}: {} bytes pipelined behind a pending response", session.read_buf.len());
            session.read_buf.clear();
            session.disconnect();
            out.append(&mut session.actions);
            return;
        }
        self.pump(id, now, out);
    }

    /// Transport of a session closed, the session is released.
    pub fn on_closed(&mut self, id: SessionId) {
        let Some(entry) = self.entries.get_mut(id.index) else {
            return;
        };
        if entry.generation != id.generation {
            return;
        }
        let Some(mut session) = entry.session.take() else {
            return;
        };
        self.active -= 1;
        debug!("{id}: closed");

        if session.has_request() || session.is_websocket() {
            let handler = session.handler.clone().unwrap_or_else(|| self.handler.clone());
            handler.on_event(&mut session, Event::Closed);
        }
    }

    /// Close sessions whose idle timer expired.
    pub fn on_timer(&mut self, now: Instant, out: &mut Vec<ServerAction>) {
        for session in self.entries.iter_mut().filter_map(|e| e.session.as_mut()) {
            if session.idle_deadline.is_some_and(|d| d <= now) {
                debug!("{}: idle timeout", session.id());
                session.disconnect();
                out.append(&mut session.actions);
            }
        }
    }

    /// Soonest idle timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .iter()
            .filter_map(|e| e.session.as_ref()?.idle_deadline)
            .min()
    }

    /// Parse and dispatch buffered input until the session has to wait.
    fn pump(&mut self, id: SessionId, now: Instant, out: &mut Vec<ServerAction>) {
        let Some(session) = lookup(&mut self.entries, id) else {
            return;
        };

        loop {
            out.append(&mut session.actions);
            if session.is_closing() {
                return;
            }
            if session.is_websocket() {
                self.pump_ws(id, out);
                return;
            }

            if session.request_done {
                if !session.is_responded() {
                    return;
                }
                let keep_alive = session.is_keep_alive();
                session.reset();
                if keep_alive {
                    session.idle_deadline = Some(now + self.config.idle_timeout);
                } else {
                    session.disconnect();
                }
                continue;
            }

            let outcome = match session.framer.decode(&mut session.read_buf) {
                Ok(outcome) => outcome,
                Err(err) => {
                    warning!("{id}: malformed request: {err}");
                    session.fail(error_status(&err));
                    continue;
                }
            };

            let event = match outcome {
                Outcome::NeedMoreData => return,
                Outcome::Head(head) => {
                    let expects = head.version() == Version::HTTP_11
                        && head.headers.contains_token(EXPECT, "100-continue");
                    let handler = directory(&self.directories, &head);
                    session.begin(head, handler);
                    if expects {
                        session.send_continue();
                    }
                    Event::Head
                }
                Outcome::Partial(data) => Event::Body(data),
                Outcome::Complete(data) => {
                    if !session.has_request() {
                        let Some(head) = session.framer.head().cloned() else {
                            session.fail(StatusCode::BAD_REQUEST);
                            continue;
                        };
                        let handler = directory(&self.directories, &head);
                        session.begin(head, handler);
                    }
                    session.request_done = true;
                    Event::Complete(data)
                }
                Outcome::Informational(_) | Outcome::Upgrade(_) => {
                    session.fail(StatusCode::BAD_REQUEST);
                    continue;
                }
            };

            let handler = session.handler.clone().unwrap_or_else(|| self.handler.clone());
            handler.on_event(session, event);
        }
    }

    fn pump_ws(&mut self, id: SessionId, out: &mut Vec<ServerAction>) {
        let Some(session) = lookup(&mut self.entries, id) else {
            return;
        };
        let mut events = Vec::new();
        let result = session.ws_decode(&mut events);

        for event in events {
            let event = match event {
                ws::Event::Message(message) => Event::Message(message),
                ws::Event::Ping(payload) => Event::Ping(payload),
                ws::Event::Pong(payload) => Event::Pong(payload),
                ws::Event::Send(data) => {
                    session.actions.push(ServerAction::Send { session: id, data });
                    continue;
                }
                ws::Event::Closed(code) => {
                    debug!("{id}: websocket closed by peer, code {code:?}");
                    session.disconnect();
                    continue;
                }
            };
            let handler = session.handler.clone().unwrap_or_else(|| self.handler.clone());
            handler.on_event(session, event);
        }

        if let Err(err) = result {
            warning!("{id}: websocket protocol error: {err}");
            session.disconnect();
        }
        out.append(&mut session.actions);
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("sessions", &self.active)
            .field("directories", &self.directories.len())
            .finish_non_exhaustive()
    }
}

fn lookup(entries: &mut [Entry], id: SessionId) -> Option<&mut Session> {
    let entry = entries.get_mut(id.index)?;
    if entry.generation != id.generation {
        return None;
    }
    entry.session.as_mut()
}

fn directory(
    directories: &HashMap<Box<[u8]>, Arc<dyn RequestHandler>>,
    head: &MessageHead,
) -> Option<Arc<dyn RequestHandler>> {
    let path = head.path()?;
    let path = path.strip_prefix(b"/").unwrap_or(path);
    let segment = path.split(|&b| b == b'/').next()?;
    directories.get(segment).cloned()
}

fn error_status(err: &ProtoError) -> StatusCode {
    match err {
        ProtoError::HeaderTooLarge => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
        ProtoError::UnsupportedVersion => StatusCode::HTTP_VERSION_NOT_SUPPORTED,
        _ => StatusCode::BAD_REQUEST,
    }
}
