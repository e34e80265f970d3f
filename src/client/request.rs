use bytes::{Bytes, BytesMut};
use std::{
    any::Any,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::{
    h1::{Framing, ProtoError, encode::write_request_head, encode_chunk, encode_last_chunk},
    http::{Headers, Method, MessageHead, Version, headers::standard::HOST},
    ws::{DataType, MessageStatus, WsError, handshake},
};

// ===== Token =====

/// Identifies a submitted request, used for cancellation and streaming.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(u64);

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

impl Token {
    fn next() -> Token {
        Token(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ===== Destination =====

/// Remote endpoint and transport mode of a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Destination {
    pub addr: SocketAddr,
    /// Connect with TLS, the connector decides how.
    pub secure: bool,
}

impl Destination {
    pub fn plain(addr: SocketAddr) -> Self {
        Self { addr, secure: false }
    }

    pub fn secure(addr: SocketAddr) -> Self {
        Self { addr, secure: true }
    }
}

// ===== Context =====

/// Two opaque user values handed back with every reply.
#[derive(Clone, Default)]
pub struct Context {
    first: Option<Arc<dyn Any + Send + Sync>>,
    second: Option<Arc<dyn Any + Send + Sync>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_first<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.first = Some(Arc::new(value));
        self
    }

    pub fn with_second<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.second = Some(Arc::new(value));
        self
    }

    pub fn first<T: Any>(&self) -> Option<&T> {
        self.first.as_deref()?.downcast_ref()
    }

    pub fn second<T: Any>(&self) -> Option<&T> {
        self.second.as_deref()?.downcast_ref()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("first", &self.first.is_some())
            .field("second", &self.second.is_some())
            .finish()
    }
}

// ===== Reply =====

/// Why a request ended without a response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Failure {
    #[error("request canceled")]
    Canceled,
    #[error("requests to destination deleted")]
    Deleted,
    #[error("client shut down")]
    Destroyed,
    #[error("connection closed before any response")]
    NoResponse,
    #[error("connect failed")]
    ConnectFailed,
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtoError),
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyKind {
    /// Body data, more follows.
    Partial,
    /// Response finished, the body holds the final slice.
    Complete,
    /// `101` accepted, the connection now speaks websocket.
    Upgraded,
    /// Websocket data.
    Message { data_type: DataType, status: MessageStatus },
    /// Websocket ping, pong was already answered unless disabled.
    Ping,
    /// Websocket pong.
    Pong,
    /// Upgraded connection closed.
    Disconnected,
    /// Request ended without a response, the body is always empty.
    Failed(Failure),
}

/// One delivery to a [`ResponseHandler`].
#[derive(Debug, Clone)]
pub struct Reply {
    pub token: Token,
    pub kind: ReplyKind,
    pub head: Option<Arc<MessageHead>>,
    pub body: Bytes,
    pub context: Context,
    /// The connection closed before the response was complete.
    pub truncated: bool,
}

impl Reply {
    /// Returns `true` if no further reply will arrive for this request.
    pub fn is_final(&self) -> bool {
        matches!(self.kind, ReplyKind::Complete | ReplyKind::Disconnected | ReplyKind::Failed(_))
    }

    pub fn failure(&self) -> Option<&Failure> {
        match &self.kind {
            ReplyKind::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Receives replies of a request, called on the I/O loop and must not block.
pub trait ResponseHandler: Send + Sync + 'static {
    fn on_reply(&self, reply: Reply);
}

impl<F> ResponseHandler for F
where
    F: Fn(Reply) + Send + Sync + 'static,
{
    fn on_reply(&self, reply: Reply) {
        self(reply)
    }
}

// ===== Request =====

#[derive(Clone, Debug)]
pub(crate) enum Body {
    Empty,
    Full(Bytes),
    Streamed { chunks: Vec<Bytes>, written: usize, done: bool },
}

#[derive(Clone, Debug)]
pub(crate) struct Upgrade {
    pub accept: String,
    pub max_reassembly: Option<usize>,
    pub auto_pong: bool,
}

/// Request ready for submission.
pub struct Request {
    pub(crate) dest: Destination,
    pub(crate) head: Bytes,
    pub(crate) body: Body,
    pub(crate) is_head: bool,
    pub(crate) upgrade: Option<Upgrade>,
    pub(crate) collect: bool,
    pub(crate) context: Context,
    pub(crate) handler: Arc<dyn ResponseHandler>,
}

impl Request {
    pub fn builder(dest: Destination) -> RequestBuilder {
        RequestBuilder {
            dest,
            method: Method::GET,
            target: Bytes::from_static(b"/"),
            version: Version::HTTP_11,
            headers: Headers::new(),
            body: Body::Empty,
            websocket: None,
            collect: false,
            context: Context::default(),
        }
    }

    /// Request from an already encoded head, including its terminating empty line.
    ///
    /// `HEAD` requests are detected from the request line.
    pub fn from_raw(
        dest: Destination,
        head: impl Into<Bytes>,
        body: Option<Bytes>,
        handler: impl ResponseHandler,
    ) -> Request {
        let head = head.into();
        Request {
            dest,
            is_head: head.starts_with(b"HEAD "),
            head,
            body: body.map_or(Body::Empty, Body::Full),
            upgrade: None,
            collect: false,
            context: Context::default(),
            handler: Arc::new(handler),
        }
    }

    pub fn destination(&self) -> Destination {
        self.dest
    }

    /// Attach opaque user values.
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Deliver the whole body with [`ReplyKind::Complete`] instead of streaming it.
    pub fn collect_body(mut self) -> Self {
        self.collect = true;
        self
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("dest", &self.dest)
            .field("head", &String::from_utf8_lossy(&self.head))
            .field("is_head", &self.is_head)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Request`].
#[derive(Debug)]
pub struct RequestBuilder {
    dest: Destination,
    method: Method,
    target: Bytes,
    version: Version,
    headers: Headers,
    body: Body,
    websocket: Option<(Option<usize>, bool)>,
    collect: bool,
    context: Context,
}

impl RequestBuilder {
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Request target, e.g: `/index.html`.
    pub fn target(mut self, target: impl Into<Bytes>) -> Self {
        self.target = target.into();
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn header(mut self, name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Complete body sent with `Content-Length`.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Body::Full(body.into());
        self
    }

    /// Body sent later in chunks, see `stream_body`.
    pub fn streamed(mut self) -> Self {
        self.body = Body::Streamed { chunks: Vec::new(), written: 0, done: false };
        self
    }

    /// Ask for a websocket upgrade, `max_reassembly` overrides the configured default.
    pub fn websocket(mut self, max_reassembly: Option<usize>) -> Self {
        self.websocket = Some((max_reassembly, true));
        self
    }

    /// Leave pings unanswered, the handler still sees [`ReplyKind::Ping`].
    pub fn manual_pong(mut self) -> Self {
        if let Some((_, auto_pong)) = &mut self.websocket {
            *auto_pong = false;
        }
        self
    }

    pub fn collect_body(mut self) -> Self {
        self.collect = true;
        self
    }

    pub fn context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn build(mut self, handler: impl ResponseHandler) -> Request {
        if !self.headers.contains(HOST) {
            self.headers.insert("Host", self.dest.addr.to_string());
        }

        let upgrade = self.websocket.map(|(max_reassembly, auto_pong)| Upgrade {
            accept: handshake::write_request_headers(&mut self.headers),
            max_reassembly,
            auto_pong,
        });

        let framing = match &self.body {
            Body::Full(body) => Framing::Length(body.len() as u64),
            Body::Streamed { .. } => Framing::Chunked,
            Body::Empty if [Method::POST, Method::PUT, Method::PATCH].contains(&self.method) => {
                Framing::Length(0)
            }
            Body::Empty => Framing::None,
        };

        let mut head = BytesMut::with_capacity(128);
        write_request_head(&mut head, &self.method, &self.target, self.version, &self.headers, framing);

        Request {
            dest: self.dest,
            head: head.freeze(),
            body: self.body,
            is_head: self.method == Method::HEAD,
            upgrade,
            collect: self.collect,
            context: self.context,
            handler: Arc::new(handler),
        }
    }
}

// ===== Record =====

/// A request queued on a connection.
pub(crate) struct Record {
    pub token: Token,
    pub request: Request,
    /// Head and available body written on the current socket.
    pub sent: bool,
    pub collected: BytesMut,
    /// Canceled after it went out, its response is read and dropped.
    pub canceled: bool,
}

impl Record {
    pub fn new(request: Request) -> Record {
        Record { token: Token::next(), request, sent: false, collected: BytesMut::new(), canceled: false }
    }

    /// Bytes to write for this request on a fresh socket.
    pub fn transmit(&mut self, out: &mut Vec<Bytes>) {
        out.push(self.request.head.clone());
        match &mut self.request.body {
            Body::Empty => {}
            Body::Full(body) => {
                if !body.is_empty() {
                    out.push(body.clone());
                }
            }
            Body::Streamed { chunks, written, done } => {
                let mut dst = BytesMut::new();
                for chunk in chunks.iter() {
                    encode_chunk(chunk, &mut dst);
                }
                if *done {
                    encode_last_chunk(&mut dst);
                }
                *written = chunks.len();
                if !dst.is_empty() {
                    out.push(dst.freeze());
                }
            }
        }
        self.sent = true;
    }

    /// Append a body chunk, returns bytes to write now if the request is already on the wire.
    pub fn push_chunk(&mut self, data: Bytes, done: bool) -> Result<Option<Bytes>, ()> {
        let Body::Streamed { chunks, written, done: finished } = &mut self.request.body else {
            return Err(());
        };
        if *finished {
            return Err(());
        }
        if !data.is_empty() {
            chunks.push(data);
        }
        *finished = done;

        if !self.sent {
            return Ok(None);
        }
        let mut dst = BytesMut::new();
        for chunk in &chunks[*written..] {
            encode_chunk(chunk, &mut dst);
        }
        if done {
            encode_last_chunk(&mut dst);
        }
        *written = chunks.len();
        Ok((!dst.is_empty()).then(|| dst.freeze()))
    }

    /// Streamed body still open, requests behind it must wait.
    pub fn is_blocking(&self) -> bool {
        matches!(self.request.body, Body::Streamed { done: false, .. })
    }

    /// Forget what was written, the request goes out again on a new socket.
    pub fn rewind(&mut self) {
        self.sent = false;
        self.collected.clear();
        if let Body::Streamed { written, .. } = &mut self.request.body {
            *written = 0;
        }
    }

    pub fn reply(&self, kind: ReplyKind, head: Option<Arc<MessageHead>>, body: Bytes) -> Reply {
        Reply {
            token: self.token,
            kind,
            head,
            body,
            context: self.request.context.clone(),
            truncated: false,
        }
    }
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("token", &self.token)
            .field("sent", &self.sent)
            .finish_non_exhaustive()
    }
}
