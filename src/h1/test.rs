use bytes::{Bytes, BytesMut};

use super::*;
use crate::common::ParseResult;
use crate::http::{Method, StatusCode, Version};

const MAX_HEAD: usize = 8 * 1024;

macro_rules! ready {
    ($e:expr) => {
        match $e {
            ParseResult::Ok(ok) => ok,
            ParseResult::Err(err) => panic!("unexpected `ParseResult::Err`: {err:?}"),
            ParseResult::Pending => panic!("unexpected `ParseResult::Pending`"),
        }
    };
}

/// Feed `segments` one receive at a time, collecting body bytes and completions.
fn drive(framer: &mut Framer, segments: &[&[u8]]) -> (Vec<u8>, usize) {
    let mut buf = BytesMut::new();
    let mut body = Vec::new();
    let mut completes = 0;
    for segment in segments {
        buf.extend_from_slice(segment);
        loop {
            match framer.decode(&mut buf).expect("valid framing") {
                Outcome::NeedMoreData => break,
                Outcome::Head(_) | Outcome::Informational(_) => {}
                Outcome::Upgrade(head) => panic!("unexpected upgrade: {head:?}"),
                Outcome::Partial(data) => body.extend_from_slice(&data),
                Outcome::Complete(data) => {
                    body.extend_from_slice(&data);
                    completes += 1;
                }
            }
        }
    }
    (body, completes)
}

/// Split `input` into pieces of the given sizes, cycling through them.
fn segments<'a>(input: &'a [u8], sizes: &[usize]) -> Vec<&'a [u8]> {
    let mut out = Vec::new();
    let mut rest = input;
    let mut i = 0;
    while !rest.is_empty() {
        let n = sizes[i % sizes.len()].min(rest.len()).max(1);
        let (head, tail) = rest.split_at(n);
        out.push(head);
        rest = tail;
        i += 1;
    }
    out
}

// ===== Head =====

#[test]
fn test_parse_head() {
    let mut buf = BytesMut::from(&b"GET /index.html?q=1 HTTP/1.1\r\nHost: example.com\r\nX-A:  b \r\n\r\nrest"[..]);
    let head = ready!(parse_head(&mut buf, HeadKind::Request, MAX_HEAD));
    assert_eq!(head.method(), Some(&Method::GET));
    assert_eq!(head.target(), Some(&b"/index.html?q=1"[..]));
    assert_eq!(head.path(), Some(&b"/index.html"[..]));
    assert_eq!(head.version(), Version::HTTP_11);
    assert_eq!(head.headers.get("host"), Some(&b"example.com"[..]));
    assert_eq!(head.headers.get("x-a"), Some(&b"b"[..]));
    assert_eq!(&buf[..], b"rest");

    let mut buf = BytesMut::from(&b"\r\nHTTP/1.0 404 Not Found\nServer: x\n folded\n\n"[..]);
    let head = ready!(parse_head(&mut buf, HeadKind::Response, MAX_HEAD));
    assert_eq!(head.status(), Some(StatusCode::NOT_FOUND));
    assert_eq!(head.version(), Version::HTTP_10);
    assert_eq!(head.headers.get("server"), Some(&b"x folded"[..]));
    assert!(buf.is_empty());

    let mut buf = BytesMut::from(&b"HTTP/1.1 204\r\n\r\n"[..]);
    let head = ready!(parse_head(&mut buf, HeadKind::Response, MAX_HEAD));
    assert_eq!(head.status(), Some(StatusCode::NO_CONTENT));
}

#[test]
fn test_parse_head_pending_and_errors() {
    let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\nHost: a\r\n"[..]);
    assert!(parse_head(&mut buf, HeadKind::Request, MAX_HEAD).is_pending());
    assert_eq!(buf.len(), 25, "pending must not consume");

    macro_rules! error {
        ($kind:ident, $input:literal => $err:ident) => {
            let mut buf = BytesMut::from(&$input[..]);
            match parse_head(&mut buf, HeadKind::$kind, MAX_HEAD) {
                ParseResult::Err(err) => assert_eq!(err, ProtoError::$err),
                other => panic!("expected `Err`, got {other:?}"),
            }
        };
    }

    error!(Request, b"GET / HTTP/2.0\r\n\r\n" => UnsupportedVersion);
    error!(Request, b"GET /\r\n\r\n" => InvalidStartLine);
    error!(Request, b"GET / HTTP/1.1\r\nBad Name: x\r\n\r\n" => InvalidHeader);
    error!(Request, b"GET / HTTP/1.1\r\nNoColon\r\n\r\n" => InvalidHeader);
    error!(Response, b"HTTP/1.1 20 OK\r\n\r\n" => InvalidStartLine);
    error!(Response, b"ICY 200 OK\r\n\r\n" => InvalidStartLine);

    let mut buf = BytesMut::from(&[b'a'; 64][..]);
    match parse_head(&mut buf, HeadKind::Request, 32) {
        ParseResult::Err(ProtoError::HeaderTooLarge) => {}
        other => panic!("expected header overflow, got {other:?}"),
    }
}

// ===== Chunked =====

#[test]
fn test_chunked_any_segmentation() {
    let message = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
        5\r\nhello\r\n\
        1;name=value\r\n \r\n\
        A \r\n0123456789\r\n\
        0\r\nTrailer: yes\r\n\r\n";
    let expected = b"hello 0123456789";

    for sizes in [&[1][..], &[2], &[3, 1], &[7], &[13, 2, 5], &[message.len()]] {
        let mut framer = Framer::response(MAX_HEAD);
        let (body, completes) = drive(&mut framer, &segments(message, sizes));
        assert_eq!(body, expected, "sizes {sizes:?}");
        assert_eq!(completes, 1, "sizes {sizes:?}");
        assert!(framer.is_idle());
    }
}

#[test]
fn test_chunked_decoder_errors() {
    let mut decoder = ChunkedDecoder::new(MAX_HEAD);
    let mut buf = BytesMut::from(&b"zz\r\n"[..]);
    assert_eq!(decoder.decode(&mut buf), Err(ProtoError::InvalidChunked));

    let mut decoder = ChunkedDecoder::new(MAX_HEAD);
    let mut buf = BytesMut::from(&b"\r\n"[..]);
    assert_eq!(decoder.decode(&mut buf), Err(ProtoError::InvalidChunked));

    let mut decoder = ChunkedDecoder::new(MAX_HEAD);
    let mut buf = BytesMut::from(&b"2\r\nabX"[..]);
    assert_eq!(decoder.decode(&mut buf), Ok(Chunk::Data(BytesMut::from(&b"ab"[..]))));
    assert_eq!(decoder.decode(&mut buf), Err(ProtoError::InvalidChunked));

    let mut decoder = ChunkedDecoder::new(MAX_HEAD);
    let mut buf = BytesMut::from(&b"fffffffffffffffff\r\n"[..]);
    assert_eq!(decoder.decode(&mut buf), Err(ProtoError::InvalidChunked));
}

#[test]
fn test_chunked_line_limit() {
    // unterminated trailer after the last chunk
    let mut decoder = ChunkedDecoder::new(MAX_HEAD);
    let mut buf = BytesMut::from(&b"0\r\nX-Pad: "[..]);
    assert_eq!(decoder.decode(&mut buf), Ok(Chunk::Pending));
    buf.extend_from_slice(&vec![b'a'; 4 * 1024 * 1024]);
    assert_eq!(decoder.decode(&mut buf), Err(ProtoError::HeaderTooLarge));

    // many short trailer lines add up
    let mut decoder = ChunkedDecoder::new(64);
    let mut buf = BytesMut::from(&b"0\r\n"[..]);
    for _ in 0..8 {
        buf.extend_from_slice(b"X-Pad: aaaaaaaa\r\n");
    }
    assert_eq!(decoder.decode(&mut buf), Err(ProtoError::HeaderTooLarge));

    // size line that never ends
    let mut decoder = ChunkedDecoder::new(MAX_HEAD);
    let mut buf = BytesMut::from(&b"5;ext="[..]);
    buf.extend_from_slice(&vec![b'x'; MAX_HEAD]);
    assert_eq!(decoder.decode(&mut buf), Err(ProtoError::InvalidChunked));

    // a trailer within the limit still completes
    let mut decoder = ChunkedDecoder::new(64);
    let mut buf = BytesMut::from(&b"0\r\nX-Pad: aaaaaaaa\r\n\r\n"[..]);
    assert_eq!(decoder.decode(&mut buf), Ok(Chunk::End));
    assert!(buf.is_empty());
}

#[test]
fn test_chunk_encoder() {
    let mut dst = BytesMut::new();
    encode_chunk(b"0123456789abcdef!", &mut dst);
    encode_chunk(b"", &mut dst);
    encode_last_chunk(&mut dst);
    assert_eq!(&dst[..], b"11\r\n0123456789abcdef!\r\n0\r\n\r\n");

    let mut decoder = ChunkedDecoder::new(MAX_HEAD);
    assert_eq!(decoder.decode(&mut dst), Ok(Chunk::Data(BytesMut::from(&b"0123456789abcdef!"[..]))));
    assert_eq!(decoder.decode(&mut dst), Ok(Chunk::End));
    assert!(decoder.is_done());
}

// ===== Fixed length =====

#[test]
fn test_content_length_any_segmentation() {
    let body: Vec<u8> = (0..200u8).collect();
    let mut message = b"HTTP/1.1 200 OK\r\nContent-Length: 200\r\n\r\n".to_vec();
    message.extend_from_slice(&body);

    for sizes in [&[1][..], &[16], &[41, 1, 100], &[message.len()]] {
        let mut framer = Framer::response(MAX_HEAD);
        let (got, completes) = drive(&mut framer, &segments(&message, sizes));
        assert_eq!(got, body, "sizes {sizes:?}");
        assert_eq!(completes, 1);
    }
}

#[test]
fn test_pipelined_responses() {
    let mut framer = Framer::response(MAX_HEAD);
    let mut buf = BytesMut::from(
        &b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nabcHTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nde"[..],
    );
    assert!(matches!(framer.decode(&mut buf), Ok(Outcome::Head(_))));
    assert_eq!(framer.decode(&mut buf), Ok(Outcome::Complete(Bytes::from_static(b"abc"))));
    assert!(matches!(framer.decode(&mut buf), Ok(Outcome::Head(_))));
    assert_eq!(framer.decode(&mut buf), Ok(Outcome::Complete(Bytes::from_static(b"de"))));
    assert_eq!(framer.decode(&mut buf), Ok(Outcome::NeedMoreData));
}

// ===== Classification =====

#[test]
fn test_body_classification() {
    macro_rules! test {
        ($input:literal, bodiless: $bodiless:literal => complete) => {
            let mut framer = Framer::response(MAX_HEAD);
            framer.expect_bodiless($bodiless);
            let mut buf = BytesMut::from(&$input[..]);
            assert_eq!(framer.decode(&mut buf), Ok(Outcome::Complete(Bytes::new())), "{:?}", $input);
        };
        ($input:literal => until_close) => {
            let mut framer = Framer::response(MAX_HEAD);
            let mut buf = BytesMut::from(&$input[..]);
            assert!(matches!(framer.decode(&mut buf), Ok(Outcome::Head(_))));
            assert!(framer.is_until_close());
        };
    }

    test!(b"HTTP/1.1 204 No Content\r\nContent-Length: 10\r\n\r\n", bodiless: false => complete);
    test!(b"HTTP/1.1 304 Not Modified\r\nTransfer-Encoding: chunked\r\n\r\n", bodiless: false => complete);
    test!(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n", bodiless: true => complete);
    test!(b"HTTP/1.1 200 OK\r\n\r\n", bodiless: false => complete);
    test!(b"HTTP/1.0 200 OK\r\n\r\n" => until_close);
    test!(b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n" => until_close);

    // chunked takes precedence over content-length
    let mut framer = Framer::response(MAX_HEAD);
    let (body, completes) = drive(
        &mut framer,
        &[b"HTTP/1.1 200 OK\r\nContent-Length: 99\r\nTransfer-Encoding: chunked\r\n\r\n1\r\nx\r\n0\r\n\r\n"],
    );
    assert_eq!((body.as_slice(), completes), (&b"x"[..], 1));

    let mut framer = Framer::response(MAX_HEAD);
    let mut buf = BytesMut::from(&b"HTTP/1.1 200 OK\r\nContent-Length: 1, 2\r\n\r\n"[..]);
    assert_eq!(framer.decode(&mut buf), Err(ProtoError::InvalidContentLength));
}

#[test]
fn test_read_until_close() {
    let mut framer = Framer::response(MAX_HEAD);
    let mut buf = BytesMut::from(&b"HTTP/1.0 200 OK\r\n\r\nfirst"[..]);
    assert!(matches!(framer.decode(&mut buf), Ok(Outcome::Head(_))));
    assert_eq!(framer.decode(&mut buf), Ok(Outcome::Partial(Bytes::from_static(b"first"))));
    assert_eq!(framer.decode(&mut buf), Ok(Outcome::NeedMoreData));

    buf.extend_from_slice(b"second");
    assert_eq!(framer.decode_eof(&mut buf), Some(Bytes::from_static(b"second")));
    assert!(framer.is_idle());
    assert_eq!(framer.decode_eof(&mut buf), None);
}

#[test]
fn test_informational_and_upgrade() {
    let mut framer = Framer::response(MAX_HEAD);
    let mut buf = BytesMut::from(
        &b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok"[..],
    );
    assert!(matches!(framer.decode(&mut buf), Ok(Outcome::Informational(head)) if head.status() == Some(StatusCode::CONTINUE)));
    assert!(framer.is_idle());
    assert!(matches!(framer.decode(&mut buf), Ok(Outcome::Head(_))));
    assert_eq!(framer.decode(&mut buf), Ok(Outcome::Complete(Bytes::from_static(b"ok"))));
    assert_eq!(framer.head().and_then(|h| h.status()), Some(StatusCode::OK));

    let mut framer = Framer::response(MAX_HEAD);
    let mut buf = BytesMut::from(&b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\n\x81\x00"[..]);
    assert!(matches!(framer.decode(&mut buf), Ok(Outcome::Upgrade(_))));
    assert_eq!(&buf[..], b"\x81\x00");
}

#[test]
fn test_request_framing() {
    let mut framer = Framer::request(MAX_HEAD);
    let (body, completes) = drive(
        &mut framer,
        &[b"POST /a HTTP/1.1\r\nHost: x\r\nContent-Length: 4\r\n\r\nbo", b"dyGET /b HTTP/1.1\r\nHost: x\r\n\r\n"],
    );
    assert_eq!((body.as_slice(), completes), (&b"body"[..], 2));

    let mut framer = Framer::request(MAX_HEAD);
    let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\n\r\n"[..]);
    assert_eq!(framer.decode(&mut buf), Err(ProtoError::MissingHost));

    let mut framer = Framer::request(MAX_HEAD);
    let mut buf = BytesMut::from(&b"GET / HTTP/1.0\r\n\r\n"[..]);
    assert_eq!(framer.decode(&mut buf), Ok(Outcome::Complete(Bytes::new())));
}

#[test]
fn test_write_heads() {
    use crate::http::Headers;

    let mut headers = Headers::new();
    headers.append("Host", "example.com");
    headers.append("Content-Length", "999");

    let mut dst = BytesMut::new();
    encode::write_request_head(&mut dst, &Method::POST, b"/x", Version::HTTP_11, &headers, Framing::Length(3));
    assert_eq!(&dst[..], b"POST /x HTTP/1.1\r\nHost: example.com\r\nContent-Length: 3\r\n\r\n");

    let mut dst = BytesMut::new();
    encode::write_response_head(&mut dst, Version::HTTP_11, StatusCode::NOT_FOUND, &Headers::new(), Framing::Chunked);
    assert_eq!(&dst[..], b"HTTP/1.1 404 Not Found\r\nTransfer-Encoding: chunked\r\n\r\n");
}
