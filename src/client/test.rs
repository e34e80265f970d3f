use bytes::Bytes;
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use super::*;
use crate::{
    Config, Error,
    http::Method,
    ws::{DataType, Fragment, MessageStatus, handshake},
};

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

/// Runs a pool the way an I/O loop would, recording what it asked for.
struct Harness {
    pool: PoolManager,
    replies: Arc<Mutex<Vec<Reply>>>,
    connects: Vec<(SocketId, Destination)>,
    sent: Vec<(SocketId, Bytes)>,
    disconnects: Vec<SocketId>,
    wakes: usize,
    now: Instant,
}

impl Harness {
    fn new(config: Config) -> Self {
        Self {
            pool: PoolManager::new(config),
            replies: Arc::default(),
            connects: Vec::new(),
            sent: Vec::new(),
            disconnects: Vec::new(),
            wakes: 0,
            now: Instant::now(),
        }
    }

    fn handler(&self) -> impl Fn(Reply) + Send + Sync + 'static + use<> {
        let replies = self.replies.clone();
        move |reply| replies.lock().unwrap().push(reply)
    }

    fn get(&self, dest: &str, target: &'static str) -> Request {
        Request::builder(Destination::plain(addr(dest)))
            .target(target)
            .build(self.handler())
    }

    fn run(&mut self, mut out: Vec<Action>) {
        self.pool.drain_backlog(&mut out);
        for action in out {
            match action {
                Action::Connect { socket, dest } => self.connects.push((socket, dest)),
                Action::Send { socket, data } => self.sent.push((socket, data)),
                Action::Disconnect { socket } => self.disconnects.push(socket),
                Action::Wake => self.wakes += 1,
                deliver => assert!(deliver.deliver().is_none()),
            }
        }
    }

    fn submit(&mut self, request: Request) -> Token {
        let mut out = Vec::new();
        let token = self.pool.submit(request, &mut out).unwrap();
        self.run(out);
        token
    }

    fn connected(&mut self, socket: SocketId, ok: bool) {
        let mut out = Vec::new();
        self.pool.on_connected(socket, ok, self.now, &mut out);
        self.run(out);
    }

    fn data(&mut self, socket: SocketId, data: &[u8]) {
        let mut out = Vec::new();
        self.pool.on_data(socket, data, self.now, &mut out);
        self.run(out);
    }

    fn closed(&mut self, socket: SocketId) {
        let mut out = Vec::new();
        self.pool.on_closed(socket, &mut out);
        self.run(out);
    }

    fn advance(&mut self, by: Duration) {
        self.now += by;
        let mut out = Vec::new();
        self.pool.on_timer(self.now, &mut out);
        self.run(out);
    }

    fn cancel(&mut self, token: Token) -> bool {
        let mut out = Vec::new();
        let found = self.pool.cancel(token, self.now, &mut out);
        self.run(out);
        found
    }

    fn last_socket(&self) -> SocketId {
        self.connects.last().expect("a connect").0
    }

    fn take_sent(&mut self) -> Vec<Bytes> {
        self.sent.drain(..).map(|(_, data)| data).collect()
    }

    fn take_replies(&self) -> Vec<Reply> {
        std::mem::take(&mut *self.replies.lock().unwrap())
    }
}

fn kinds(replies: &[Reply]) -> Vec<ReplyKind> {
    replies.iter().map(|r| r.kind.clone()).collect()
}

const OK2: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";

// ===== Pipelining =====

#[test]
fn test_pipelining() {
    let mut h = Harness::new(Config::default());
    let a = h.submit(h.get("10.0.0.1:80", "/a"));
    let b = h.submit(h.get("10.0.0.1:80", "/b"));
    let c = h.submit(h.get("10.0.0.1:80", "/c"));
    assert_eq!(h.connects.len(), 1);
    assert_eq!(h.pool.pending_requests(addr("10.0.0.1:80")), 3);

    let socket = h.last_socket();
    h.connected(socket, true);
    let sent = h.take_sent();
    assert_eq!(sent.len(), 1, "only the head request before pipelining is known");
    assert!(sent[0].starts_with(b"GET /a HTTP/1.1\r\n"));

    h.data(socket, OK2);
    assert_eq!(h.pool.pipeline(addr("10.0.0.1:80"), 0), Some(Pipeline::Supported));
    let sent = h.take_sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].starts_with(b"GET /b "));
    assert!(sent[1].starts_with(b"GET /c "));

    // both responses in a single receive
    h.data(socket, b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nbHTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nc");

    let replies = h.take_replies();
    let order: Vec<Token> = replies.iter().map(|r| r.token).collect();
    assert_eq!(order, [a, b, c]);
    assert_eq!(&replies[0].body[..], b"ok");
    assert_eq!(&replies[2].body[..], b"c");
    assert!(replies.iter().all(|r| r.kind == ReplyKind::Complete));

    assert_eq!(h.pool.pending_requests(addr("10.0.0.1:80")), 0);
    assert_eq!(h.pool.next_deadline(), Some(h.now + Duration::from_secs(10)));
}

#[test]
fn test_partial_body() {
    let mut h = Harness::new(Config::default());
    h.submit(h.get("10.0.0.1:80", "/"));
    let socket = h.last_socket();
    h.connected(socket, true);

    h.data(socket, b"HTTP/1.1 200 OK\r\nContent-Length: 6\r\n\r\nabc");
    h.data(socket, b"def");
    let replies = h.take_replies();
    assert_eq!(kinds(&replies), [ReplyKind::Partial, ReplyKind::Complete]);
    assert_eq!(&replies[0].body[..], b"abc");
    assert_eq!(&replies[1].body[..], b"def");
    assert_eq!(replies[1].head.as_ref().unwrap().status().unwrap().as_u16(), 200);
}

#[test]
fn test_buffer_reallocated_mid_head() {
    let mut h = Harness::new(Config::default());
    let token = h.submit(h.get("10.0.0.1:80", "/"));
    let socket = h.last_socket();
    h.connected(socket, true);

    h.data(socket, b"HTTP/1.1 200 OK\r\nContent-Le");
    h.pool.on_buffer_reallocated(socket, 4096);
    h.pool.on_buffer_reallocated(socket, -4096);
    h.data(socket, b"ngth: 3\r\nX-After: moved\r\n\r\nabc");

    let replies = h.take_replies();
    assert_eq!(kinds(&replies), [ReplyKind::Complete]);
    assert_eq!(replies[0].token, token);
    assert_eq!(&replies[0].body[..], b"abc");
    let head = replies[0].head.as_ref().unwrap();
    assert_eq!(head.content_length(), Some(Ok(3)));
    assert_eq!(head.headers.get("X-After"), Some(&b"moved"[..]));
}

#[test]
fn test_collect_body() {
    let mut h = Harness::new(Config::default());
    let request = Request::builder(Destination::plain(addr("10.0.0.1:80")))
        .collect_body()
        .build(h.handler());
    h.submit(request);
    let socket = h.last_socket();
    h.connected(socket, true);

    h.data(socket, b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n");
    h.data(socket, b"2\r\nde\r\n0\r\n\r\n");
    let replies = h.take_replies();
    assert_eq!(kinds(&replies), [ReplyKind::Complete]);
    assert_eq!(&replies[0].body[..], b"abcde");
}

#[test]
fn test_head_request_is_bodiless() {
    let mut h = Harness::new(Config::default());
    let request = Request::builder(Destination::plain(addr("10.0.0.1:80")))
        .method(Method::HEAD)
        .build(h.handler());
    h.submit(request);
    let socket = h.last_socket();
    h.connected(socket, true);

    h.data(socket, b"HTTP/1.1 200 OK\r\nContent-Length: 500\r\n\r\n");
    let replies = h.take_replies();
    assert_eq!(kinds(&replies), [ReplyKind::Complete]);
    assert!(replies[0].body.is_empty());
}

#[test]
fn test_until_close() {
    let mut h = Harness::new(Config::default());
    let request = Request::builder(Destination::plain(addr("10.0.0.1:80")))
        .collect_body()
        .build(h.handler());
    h.submit(request);
    let socket = h.last_socket();
    h.connected(socket, true);

    h.data(socket, b"HTTP/1.0 200 OK\r\n\r\nhello ");
    h.data(socket, b"world");
    assert!(h.take_replies().is_empty());

    h.closed(socket);
    let replies = h.take_replies();
    assert_eq!(kinds(&replies), [ReplyKind::Complete]);
    assert_eq!(&replies[0].body[..], b"hello world");
    assert!(!replies[0].truncated);
    assert_eq!(h.pool.idle_count(), 1);
}

#[test]
fn test_truncated_body() {
    let mut h = Harness::new(Config::default());
    h.submit(h.get("10.0.0.1:80", "/"));
    let socket = h.last_socket();
    h.connected(socket, true);

    h.data(socket, b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc");
    h.closed(socket);
    let replies = h.take_replies();
    assert_eq!(kinds(&replies), [ReplyKind::Partial, ReplyKind::Complete]);
    assert!(replies[1].truncated);
}

#[test]
fn test_connection_close_waits_for_reconnect() {
    let mut h = Harness::new(Config::default());
    h.submit(h.get("10.0.0.1:80", "/a"));
    h.submit(h.get("10.0.0.1:80", "/b"));
    let first = h.last_socket();
    h.connected(first, true);
    h.take_sent();

    h.data(first, b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 2\r\n\r\nok");
    assert!(h.take_sent().is_empty(), "no pipelining on a closing connection");

    h.closed(first);
    assert_eq!(h.connects.len(), 2);
    let second = h.last_socket();
    assert_eq!(second.index(), first.index());
    assert!(second.generation() > first.generation());

    h.connected(second, true);
    let sent = h.take_sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].starts_with(b"GET /b "));
}

// ===== Failures =====

#[test]
fn test_no_response() {
    let mut h = Harness::new(Config::default());
    let a = h.submit(h.get("10.0.0.1:80", "/a"));
    h.submit(h.get("10.0.0.1:80", "/b"));
    let socket = h.last_socket();
    h.connected(socket, true);

    h.closed(socket);
    let replies = h.take_replies();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].token, a);
    assert_eq!(replies[0].failure(), Some(&Failure::NoResponse));

    // the other request is retried on a new socket
    assert_eq!(h.connects.len(), 2);
    assert_eq!(h.pool.pending_requests(addr("10.0.0.1:80")), 1);
}

#[test]
fn test_malformed_response() {
    let mut h = Harness::new(Config::default());
    h.submit(h.get("10.0.0.1:80", "/"));
    let socket = h.last_socket();
    h.connected(socket, true);

    h.data(socket, b"HTTP/1.1 abc\r\n\r\n");
    let replies = h.take_replies();
    assert!(matches!(replies[0].failure(), Some(Failure::Protocol(_))));
    assert_eq!(h.disconnects, [socket]);
}

#[test]
fn test_connect_retry() {
    let config = Config::builder()
        .connect_retries(1)
        .retry_backoff(Duration::from_millis(100))
        .build()
        .unwrap();
    let mut h = Harness::new(config);
    h.submit(h.get("10.0.0.1:80", "/"));

    h.connected(h.last_socket(), false);
    assert!(h.take_replies().is_empty());
    assert_eq!(h.pool.next_deadline(), Some(h.now + Duration::from_millis(100)));
    assert_eq!(h.pool.live_sockets(), 0);

    h.advance(Duration::from_millis(100));
    assert_eq!(h.connects.len(), 2);

    h.connected(h.last_socket(), false);
    let replies = h.take_replies();
    assert_eq!(replies[0].failure(), Some(&Failure::ConnectFailed));
    assert!(!h.pool.has_connection(addr("10.0.0.1:80")));
}

#[test]
fn test_stale_socket_events() {
    let mut h = Harness::new(Config::default());
    h.submit(h.get("10.0.0.1:80", "/a"));
    h.submit(h.get("10.0.0.1:80", "/b"));
    let first = h.last_socket();
    h.connected(first, true);
    h.closed(first);

    let second = h.last_socket();
    assert_eq!(second.index(), first.index());
    h.connected(second, true);
    h.take_replies();

    // late events of the old binding
    h.data(first, OK2);
    h.closed(first);
    assert!(h.take_replies().is_empty());
    assert_eq!(h.pool.active_connection_count(), 1);
    assert_eq!(h.pool.pending_requests(addr("10.0.0.1:80")), 1);
}

// ===== Cancel, delete, shutdown =====

#[test]
fn test_cancel_queued() {
    let mut h = Harness::new(Config::default());
    h.submit(h.get("10.0.0.1:80", "/a"));
    let b = h.submit(h.get("10.0.0.1:80", "/b"));
    h.connected(h.last_socket(), true);

    assert!(h.cancel(b));
    assert!(!h.cancel(b));
    let replies = h.take_replies();
    assert_eq!(replies[0].failure(), Some(&Failure::Canceled));
    assert!(h.disconnects.is_empty());
    assert_eq!(h.pool.pending_requests(addr("10.0.0.1:80")), 1);
}

#[test]
fn test_cancel_in_flight() {
    let mut h = Harness::new(Config::default());
    let a = h.submit(h.get("10.0.0.1:80", "/a"));
    h.submit(h.get("10.0.0.1:80", "/b"));
    let first = h.last_socket();
    h.connected(first, true);
    h.take_sent();

    assert!(h.cancel(a));
    assert_eq!(h.disconnects, [first]);
    assert_eq!(h.take_replies()[0].failure(), Some(&Failure::Canceled));

    // the late response of /a must not reach /b
    h.closed(first);
    assert!(h.take_replies().is_empty());
    let second = h.last_socket();
    assert_ne!(second, first);
    h.connected(second, true);
    assert!(h.take_sent()[0].starts_with(b"GET /b "));
}

#[test]
fn test_cancel_pipelined() {
    let mut h = Harness::new(Config::default());
    h.submit(h.get("10.0.0.1:80", "/a"));
    let b = h.submit(h.get("10.0.0.1:80", "/b"));
    let c = h.submit(h.get("10.0.0.1:80", "/c"));
    let d = h.submit(h.get("10.0.0.1:80", "/d"));
    let socket = h.last_socket();
    h.connected(socket, true);
    h.data(socket, OK2);
    assert_eq!(h.take_sent().len(), 4, "/b, /c and /d are on the wire");
    h.take_replies();

    assert!(h.cancel(c));
    assert!(!h.cancel(c));
    assert!(h.disconnects.is_empty());
    assert_eq!(h.take_replies()[0].failure(), Some(&Failure::Canceled));
    assert_eq!(h.pool.pending_requests(addr("10.0.0.1:80")), 2);

    h.data(socket, b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nb");
    h.data(socket, b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nc");
    h.data(socket, b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nd");

    let replies = h.take_replies();
    let order: Vec<(Token, &[u8])> = replies.iter().map(|r| (r.token, &r.body[..])).collect();
    assert_eq!(order, [(b, &b"b"[..]), (d, &b"d"[..])]);
    assert_eq!(h.pool.pending_requests(addr("10.0.0.1:80")), 0);
}

#[test]
fn test_cancel_pipelined_then_closed() {
    let mut h = Harness::new(Config::default());
    h.submit(h.get("10.0.0.1:80", "/a"));
    h.submit(h.get("10.0.0.1:80", "/b"));
    let c = h.submit(h.get("10.0.0.1:80", "/c"));
    let first = h.last_socket();
    h.connected(first, true);
    h.data(first, OK2);
    h.take_sent();
    h.take_replies();

    assert!(h.cancel(c));
    h.take_replies();
    h.data(first, b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nb");
    h.take_replies();

    // the canceled request is not sent again
    h.closed(first);
    assert!(h.take_replies().is_empty());
    assert_eq!(h.connects.len(), 1);
    assert_eq!(h.pool.pending_requests(addr("10.0.0.1:80")), 0);
}

#[test]
fn test_delete_requests() {
    let mut h = Harness::new(Config::default());
    for _ in 0..3 {
        h.submit(h.get("10.0.0.5:443", "/"));
    }
    h.submit(h.get("10.0.0.6:443", "/"));
    let socket = h.connects[0].0;

    let mut out = Vec::new();
    assert_eq!(h.pool.delete_requests(addr("10.0.0.5:443"), &mut out), 3);
    h.run(out);

    let replies = h.take_replies();
    assert_eq!(replies.len(), 3);
    assert!(replies.iter().all(|r| r.failure() == Some(&Failure::Deleted)));
    assert_eq!(h.disconnects, [socket]);
    assert!(!h.pool.has_connection(addr("10.0.0.5:443")));
    assert_eq!(h.pool.pending_requests(addr("10.0.0.6:443")), 1);

    // the close of the deleted socket is expected
    h.closed(socket);
    assert!(h.take_replies().is_empty());
}

#[test]
fn test_shutdown() {
    let mut h = Harness::new(Config::default());
    h.submit(h.get("10.0.0.1:80", "/"));
    h.submit(h.get("10.0.0.2:80", "/"));

    let mut out = Vec::new();
    h.pool.shutdown(&mut out);
    h.run(out);
    let replies = h.take_replies();
    assert_eq!(replies.len(), 2);
    assert!(replies.iter().all(|r| r.failure() == Some(&Failure::Destroyed)));

    let mut out = Vec::new();
    let request = h.get("10.0.0.1:80", "/");
    assert!(matches!(h.pool.submit(request, &mut out), Err(Error::Shutdown)));
}

#[test]
fn test_reset_context() {
    let mut h = Harness::new(Config::default());
    let token = h.submit(h.get("10.0.0.1:80", "/"));
    assert!(h.pool.reset_context(token, Context::new().with_first(7u32)));
    h.connected(h.last_socket(), true);
    h.data(h.last_socket(), OK2);

    let replies = h.take_replies();
    assert_eq!(replies[0].context.first::<u32>(), Some(&7));
}

// ===== Slots and idle set =====

#[test]
fn test_backlog_bounded_by_pool_size() {
    let config = Config::builder().pool_size(2).build().unwrap();
    let mut h = Harness::new(config);
    h.submit(h.get("10.0.0.1:80", "/"));
    h.submit(h.get("10.0.0.2:80", "/"));
    h.submit(h.get("10.0.0.3:80", "/"));
    assert_eq!(h.connects.len(), 2);
    assert_eq!(h.pool.backlog_len(), 1);

    let first = h.connects[0].0;
    h.connected(first, true);
    h.data(first, OK2);
    h.advance(Duration::from_secs(10));
    assert_eq!(h.disconnects, [first]);
    assert_eq!(h.connects.len(), 2, "slot is busy until the close is reported");

    h.closed(first);
    h.run(Vec::new());
    assert_eq!(h.connects.len(), 3);
    assert_eq!(h.connects[2].1.addr, addr("10.0.0.3:80"));
}

#[test]
fn test_least_queue_selection() {
    let config = Config::builder().max_connections_per_destination(2).build().unwrap();
    let mut h = Harness::new(config);
    let target = addr("10.0.0.1:80");
    h.submit(h.get("10.0.0.1:80", "/a"));
    h.submit(h.get("10.0.0.1:80", "/b"));
    assert_eq!(h.connects.len(), 2);
    assert!(h.pool.pipeline(target, 1).is_some());

    h.submit(h.get("10.0.0.1:80", "/c"));
    assert_eq!(h.connects.len(), 2);
    assert_eq!(h.pool.pending_requests(target), 3);

    // an idle connection is preferred over the shortest queue
    let second = h.connects[1].0;
    h.connected(second, true);
    h.data(second, OK2);
    h.take_sent();
    h.submit(h.get("10.0.0.1:80", "/d"));
    let sent = h.take_sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].starts_with(b"GET /d "));
}

#[test]
fn test_idle_timeout() {
    let mut h = Harness::new(Config::default());
    h.submit(h.get("10.0.0.1:80", "/"));
    let socket = h.last_socket();
    h.connected(socket, true);
    h.data(socket, OK2);
    assert_eq!(h.pool.active_connection_count(), 1);

    h.advance(Duration::from_secs(9));
    assert!(h.disconnects.is_empty());
    h.advance(Duration::from_secs(1));
    assert_eq!(h.disconnects, [socket]);
    assert_eq!(h.pool.active_connection_count(), 0);
    assert_eq!(h.pool.idle_count(), 1);

    h.closed(socket);
    assert_eq!(h.pool.live_sockets(), 0);
    assert!(h.take_replies().len() == 1);

    // reused from the idle set
    h.submit(h.get("10.0.0.1:80", "/"));
    assert_eq!(h.pool.idle_count(), 0);
    assert_eq!(h.connects.len(), 2);
}

#[test]
fn test_idle_eviction() {
    let config = Config::builder().idle_capacity(1).build().unwrap();
    let mut h = Harness::new(config);
    for dest in ["10.0.0.1:80", "10.0.0.2:80"] {
        h.submit(h.get(dest, "/"));
        let socket = h.last_socket();
        h.connected(socket, true);
        h.data(socket, OK2);
        h.closed(socket);
    }
    assert_eq!(h.pool.idle_count(), 1);
    assert!(!h.pool.has_connection(addr("10.0.0.1:80")));
    assert!(h.pool.has_connection(addr("10.0.0.2:80")));
}

// ===== Streaming =====

#[test]
fn test_streamed_body() {
    let mut h = Harness::new(Config::default());
    let request = Request::builder(Destination::plain(addr("10.0.0.1:80")))
        .method(Method::POST)
        .streamed()
        .build(h.handler());
    let token = h.submit(request);

    let mut out = Vec::new();
    h.pool.stream_body(token, Bytes::from_static(b"early"), false, &mut out).unwrap();
    h.run(out);
    assert!(h.sent.is_empty());

    h.connected(h.last_socket(), true);
    let sent = h.take_sent();
    assert!(sent[0].ends_with(b"Transfer-Encoding: chunked\r\n\r\n"));
    assert_eq!(&sent[1][..], b"5\r\nearly\r\n");

    let mut out = Vec::new();
    h.pool.stream_body(token, Bytes::from_static(b"0123456789"), true, &mut out).unwrap();
    h.run(out);
    assert_eq!(&h.take_sent()[0][..], b"A\r\n0123456789\r\n0\r\n\r\n");

    let mut out = Vec::new();
    let err = h.pool.stream_body(token, Bytes::from_static(b"late"), true, &mut out);
    assert!(matches!(err, Err(Error::NotStreaming)));
}

// ===== WebSocket =====

fn upgrade(h: &mut Harness) -> (Token, SocketId) {
    let request = Request::builder(Destination::plain(addr("10.0.0.1:80")))
        .target("/chat")
        .websocket(None)
        .build(h.handler());
    let token = h.submit(request);
    let socket = h.last_socket();
    h.connected(socket, true);

    let sent = h.take_sent();
    let head = std::str::from_utf8(&sent[0]).unwrap();
    let key = head
        .lines()
        .find_map(|line| line.strip_prefix("Sec-WebSocket-Key: "))
        .unwrap();
    let accept = handshake::derive_accept(key.as_bytes());
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n\r\n"
    );
    h.data(socket, response.as_bytes());
    assert_eq!(kinds(&h.take_replies()), [ReplyKind::Upgraded]);
    (token, socket)
}

#[test]
fn test_websocket() {
    let mut h = Harness::new(Config::default());
    let (token, socket) = upgrade(&mut h);

    let mut out = Vec::new();
    h.pool.ws_send(token, DataType::Text, b"hi", Fragment::Complete, &mut out).unwrap();
    h.run(out);
    let frame = &h.take_sent()[0];
    assert_eq!(frame[0], 0x81);
    assert_eq!(frame[1], 0x80 | 2, "client frames are masked");
    assert_eq!(frame.len(), 2 + 4 + 2);

    h.data(socket, &[0x81, 0x02, b'y', b'o']);
    let replies = h.take_replies();
    assert_eq!(
        replies[0].kind,
        ReplyKind::Message { data_type: DataType::Text, status: MessageStatus::Complete }
    );
    assert_eq!(&replies[0].body[..], b"yo");

    // ping is answered and reported
    h.data(socket, &[0x89, 0x01, b'p']);
    assert_eq!(kinds(&h.take_replies()), [ReplyKind::Ping]);
    let pong = &h.take_sent()[0];
    assert_eq!(pong[0], 0x8A);
    assert_eq!(pong[1], 0x80 | 1);

    let mut out = Vec::new();
    h.pool.ws_close(token, &mut out).unwrap();
    h.pool.ws_close(token, &mut out).unwrap();
    h.run(out);
    let sent = h.take_sent();
    assert_eq!(sent.len(), 1, "close is sent once");
    assert_eq!(sent[0][0], 0x88);

    h.data(socket, &[0x88, 0x02, 0x03, 0xE8]);
    assert_eq!(h.disconnects, [socket]);
    h.closed(socket);
    assert_eq!(kinds(&h.take_replies()), [ReplyKind::Disconnected]);
}

#[test]
fn test_websocket_rejected() {
    let mut h = Harness::new(Config::default());
    let request = Request::builder(Destination::plain(addr("10.0.0.1:80")))
        .websocket(None)
        .build(h.handler());
    let token = h.submit(request);
    let socket = h.last_socket();
    h.connected(socket, true);

    h.data(socket, b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nSec-WebSocket-Accept: bogus\r\n\r\n");
    let replies = h.take_replies();
    assert!(matches!(replies[0].failure(), Some(Failure::WebSocket(_))));
    assert_eq!(h.disconnects, [socket]);

    let mut out = Vec::new();
    assert!(h.pool.ws_send(token, DataType::Binary, b"x", Fragment::Complete, &mut out).is_err());
}

#[test]
fn test_ws_on_plain_request() {
    let mut h = Harness::new(Config::default());
    let token = h.submit(h.get("10.0.0.1:80", "/"));
    let mut out = Vec::new();
    let result = h.pool.ws_send(token, DataType::Text, b"x", Fragment::Complete, &mut out);
    assert!(matches!(result, Err(Error::NotUpgraded)));
}

#[test]
fn test_delete_while_connecting() {
    let mut h = Harness::new(Config::builder().pool_size(1).build().unwrap());
    h.submit(h.get("10.0.0.1:80", "/"));
    let socket = h.last_socket();

    let mut out = Vec::new();
    h.pool.delete_requests(addr("10.0.0.1:80"), &mut out);
    h.run(out);
    assert_eq!(h.pool.live_sockets(), 1);

    h.connected(socket, false);
    assert_eq!(h.pool.live_sockets(), 0);
    h.submit(h.get("10.0.0.2:80", "/"));
    assert_eq!(h.connects.len(), 2);
}
