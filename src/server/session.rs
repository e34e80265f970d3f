use bytes::{Bytes, BytesMut};
use std::{net::SocketAddr, sync::Arc, time::Instant};

use super::RequestHandler;
use crate::{
    Config, Error,
    h1::{Framer, Framing, encode::write_response_head, encode_chunk, encode_last_chunk},
    http::{
        Headers, MessageHead, StatusCode, Version,
        headers::standard::{CONNECTION, HOST, ORIGIN},
    },
    log::debug,
    ws::{self, CLOSE_NORMAL, DataType, Fragment, Role, WebSocket, WsError, handshake},
};

/// Index into the session table plus the generation of its current occupant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionId {
    pub(crate) index: usize,
    pub(crate) generation: u64,
}

impl SessionId {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "session {}.{}", self.index, self.generation)
    }
}

/// Work the I/O loop performs on behalf of the server, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAction {
    Send { session: SessionId, data: Bytes },
    /// Close the transport after every preceding send, report with `on_closed`.
    Close { session: SessionId },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Response {
    Pending,
    Streaming { chunked: bool, discard: bool },
    Done,
}

/// One accepted transport socket.
///
/// Requests are handled one at a time. Pipelined requests stay buffered until the current one
/// is answered.
pub struct Session {
    id: SessionId,
    peer: SocketAddr,
    pub(super) framer: Framer,
    pub(super) read_buf: BytesMut,
    head: Option<Arc<MessageHead>>,
    /// Whole request received.
    pub(super) request_done: bool,
    response: Response,
    keep_alive: bool,
    ws: Option<WebSocket>,
    /// Virtual directory bound for the current request.
    pub(super) handler: Option<Arc<dyn RequestHandler>>,
    pub(super) actions: Vec<ServerAction>,
    closing: bool,
    pub(super) idle_deadline: Option<Instant>,
    max_reassembly: usize,
    max_frame_size: usize,
}

impl Session {
    pub(super) fn new(id: SessionId, peer: SocketAddr, config: &Config) -> Self {
        Self {
            id,
            peer,
            framer: Framer::request(config.max_header_size),
            read_buf: BytesMut::with_capacity(config.receive_buffer_size),
            head: None,
            request_done: false,
            response: Response::Pending,
            keep_alive: true,
            ws: None,
            handler: None,
            actions: Vec::new(),
            closing: false,
            idle_deadline: None,
            max_reassembly: config.max_reassembly,
            max_frame_size: config.max_frame_size,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Head of the request being handled.
    pub fn head(&self) -> Option<&MessageHead> {
        self.head.as_deref()
    }

    pub fn is_websocket(&self) -> bool {
        self.ws.is_some()
    }

    /// Returns `true` once a close was requested, nothing more is sent.
    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Returns `true` if the connection stays open after the current response.
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Returns the `Origin` host if it differs from the `Host` header.
    pub fn cross_site_origin(&self) -> Option<&str> {
        let head = self.head.as_ref()?;
        let origin = head.headers.get_str(ORIGIN)?;
        let origin = origin.split_once("://").map_or(origin, |(_, rest)| rest);
        let origin = origin.split('/').next().unwrap_or(origin);
        let host = head.headers.get_str(HOST)?.trim();
        (!origin.eq_ignore_ascii_case(host)).then_some(origin)
    }

    // ===== Exchange =====

    pub(super) fn begin(&mut self, head: Arc<MessageHead>, handler: Option<Arc<dyn RequestHandler>>) {
        self.keep_alive = head.is_keep_alive();
        self.head = Some(head);
        self.handler = handler;
        self.response = Response::Pending;
        self.idle_deadline = None;
    }

    pub(super) fn has_request(&self) -> bool {
        self.head.is_some()
    }

    pub(super) fn is_responded(&self) -> bool {
        self.response == Response::Done
    }

    /// Forget the finished exchange, the next request may be parsed.
    pub(super) fn reset(&mut self) {
        self.head = None;
        self.handler = None;
        self.request_done = false;
        self.response = Response::Pending;
    }

    /// Answer a malformed request and close.
    pub(super) fn fail(&mut self, status: StatusCode) {
        if self.response == Response::Pending && !self.closing {
            let mut headers = Headers::new();
            headers.insert("Connection", "close");
            let mut dst = BytesMut::with_capacity(96);
            write_response_head(&mut dst, Version::HTTP_11, status, &headers, Framing::Length(0));
            self.push(dst.freeze());
            self.response = Response::Done;
        }
        self.keep_alive = false;
        self.disconnect();
    }

    /// Send `100 Continue` for a request waiting on it.
    pub(super) fn send_continue(&mut self) {
        self.push(Bytes::from_static(b"HTTP/1.1 100 Continue\r\n\r\n"));
    }

    fn push(&mut self, data: Bytes) {
        self.actions.push(ServerAction::Send { session: self.id, data });
    }

    /// Request being answered, its version and whether it was a `HEAD` request.
    fn start_response(&self) -> Result<(Version, bool), Error> {
        if self.closing {
            return Err(Error::SessionClosed);
        }
        if self.ws.is_some() || self.response != Response::Pending {
            return Err(Error::AlreadyResponded);
        }
        let head = self.head.as_ref().ok_or(Error::AlreadyResponded)?;
        let is_head = head.method().is_some_and(|m| *m == crate::http::Method::HEAD);
        Ok((head.version(), is_head))
    }

    fn connection_header(&mut self, headers: &mut Headers, version: Version) {
        if headers.contains_token(CONNECTION, "close") {
            self.keep_alive = false;
        }
        match (self.keep_alive, version) {
            (false, _) => headers.insert("Connection", "close"),
            (true, Version::HTTP_10) => headers.insert("Connection", "keep-alive"),
            (true, _) => {}
        }
    }

    // ===== Response =====

    /// Send a complete response with `Content-Length`.
    pub fn send(&mut self, status: StatusCode, mut headers: Headers, body: impl Into<Bytes>) -> Result<(), Error> {
        let (version, is_head) = self.start_response()?;
        let body = body.into();
        self.connection_header(&mut headers, version);

        let framing = if status.is_bodiless() { Framing::None } else { Framing::Length(body.len() as u64) };
        let mut dst = BytesMut::with_capacity(128);
        write_response_head(&mut dst, version, status, &headers, framing);
        self.push(dst.freeze());
        if !is_head && !status.is_bodiless() && !body.is_empty() {
            self.push(body);
        }
        self.response = Response::Done;
        Ok(())
    }

    /// Send a response head, the body follows with [`stream_body`].
    ///
    /// `HTTP/1.1` bodies are chunked, `HTTP/1.0` bodies are delimited by closing the connection.
    ///
    /// [`stream_body`]: Session::stream_body
    pub fn stream_head(&mut self, status: StatusCode, mut headers: Headers) -> Result<(), Error> {
        let (version, is_head) = self.start_response()?;
        let chunked = version == Version::HTTP_11;
        if !chunked {
            self.keep_alive = false;
        }
        self.connection_header(&mut headers, version);

        let discard = is_head || status.is_bodiless();
        let framing = match (discard, chunked) {
            (true, _) | (false, false) => Framing::None,
            (false, true) => Framing::Chunked,
        };
        let mut dst = BytesMut::with_capacity(128);
        write_response_head(&mut dst, version, status, &headers, framing);
        self.push(dst.freeze());
        self.response = Response::Streaming { chunked, discard };
        Ok(())
    }

    /// Append response body data, `done` finishes the response.
    pub fn stream_body(&mut self, data: impl Into<Bytes>, done: bool) -> Result<(), Error> {
        if self.closing {
            return Err(Error::SessionClosed);
        }
        let Response::Streaming { chunked, discard } = self.response else {
            return Err(Error::NotStreaming);
        };
        let data = data.into();

        match (discard, chunked) {
            (true, _) => {}
            (false, false) => {
                if !data.is_empty() {
                    self.push(data);
                }
            }
            (false, true) => {
                let mut dst = BytesMut::with_capacity(data.len() + 16);
                encode_chunk(&data, &mut dst);
                if done {
                    encode_last_chunk(&mut dst);
                }
                if !dst.is_empty() {
                    self.push(dst.freeze());
                }
            }
        }
        if done {
            self.response = Response::Done;
        }
        Ok(())
    }

    // ===== WebSocket =====

    /// Accept a websocket upgrade request with `101 Switching Protocols`.
    ///
    /// Afterwards [`close`](Session::close) sends a websocket close frame, and received bytes
    /// arrive as [`Event::Message`](super::Event::Message).
    pub fn upgrade_websocket(&mut self, max_reassembly: Option<usize>) -> Result<(), Error> {
        self.start_response()?;
        let head = self.head.as_ref().ok_or(Error::AlreadyResponded)?;
        let accept = handshake::accept_request(head)?;

        let mut headers = Headers::new();
        headers.insert("Upgrade", "websocket");
        headers.insert("Connection", "Upgrade");
        headers.insert("Sec-WebSocket-Accept", accept);
        let mut dst = BytesMut::with_capacity(160);
        write_response_head(&mut dst, Version::HTTP_11, StatusCode::SWITCHING_PROTOCOLS, &headers, Framing::None);
        self.push(dst.freeze());

        self.ws = Some(WebSocket::new(
            Role::Server,
            max_reassembly.unwrap_or(self.max_reassembly),
            self.max_frame_size,
        ));
        self.response = Response::Done;
        self.keep_alive = true;
        self.idle_deadline = None;
        debug!("{}: websocket established", self.id);
        Ok(())
    }

    pub fn ws_send(&mut self, data_type: DataType, payload: &[u8], fragment: Fragment) -> Result<(), Error> {
        if self.closing {
            return Err(Error::SessionClosed);
        }
        let ws = self.ws.as_mut().ok_or(Error::NotUpgraded)?;
        let data = ws.encode(data_type, payload, fragment)?;
        self.push(data);
        Ok(())
    }

    pub fn ws_ping(&mut self, payload: &[u8]) -> Result<(), Error> {
        if self.closing {
            return Err(Error::SessionClosed);
        }
        let ws = self.ws.as_mut().ok_or(Error::NotUpgraded)?;
        let data = ws.ping(payload)?;
        self.push(data);
        Ok(())
    }

    pub(super) fn ws_decode(&mut self, events: &mut Vec<ws::Event>) -> Result<(), WsError> {
        match &mut self.ws {
            Some(ws) => ws.decode(&mut self.read_buf, events),
            None => Ok(()),
        }
    }

    // ===== Close =====

    /// Close the session.
    ///
    /// An upgraded session sends a websocket close frame and waits for the peer's echo, a plain
    /// session disconnects after pending sends.
    pub fn close(&mut self) {
        match &mut self.ws {
            Some(ws) if !self.closing => {
                if let Some(data) = ws.close(CLOSE_NORMAL) {
                    self.push(data);
                }
            }
            _ => self.disconnect(),
        }
    }

    /// Close the transport after pending sends.
    pub fn disconnect(&mut self) {
        if !self.closing {
            self.closing = true;
            self.idle_deadline = None;
            self.actions.push(ServerAction::Close { session: self.id });
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("response", &self.response)
            .field("websocket", &self.ws.is_some())
            .field("closing", &self.closing)
            .finish_non_exhaustive()
    }
}
