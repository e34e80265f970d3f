use bytes::Bytes;

use super::{
    Headers, Method, StatusCode, Version,
    headers::standard::{CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING},
};

/// Parsed message head: start line and header fields.
///
/// Every field is a [`Bytes`] handle into the received buffer, so a head stays valid no matter
/// how the receive buffer is grown or moved afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageHead {
    pub line: StartLine,
    pub headers: Headers,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartLine {
    Request(RequestLine),
    Response(StatusLine),
}

/// `GET /index.html HTTP/1.1`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Method,
    pub target: Bytes,
    pub version: Version,
}

/// `HTTP/1.1 200 OK`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusLine {
    pub version: Version,
    pub status: StatusCode,
    pub reason: Bytes,
}

impl MessageHead {
    pub fn version(&self) -> Version {
        match &self.line {
            StartLine::Request(line) => line.version,
            StartLine::Response(line) => line.version,
        }
    }

    /// Returns the status code of a response head.
    pub fn status(&self) -> Option<StatusCode> {
        match &self.line {
            StartLine::Response(line) => Some(line.status),
            StartLine::Request(_) => None,
        }
    }

    /// Returns the method of a request head.
    pub fn method(&self) -> Option<&Method> {
        match &self.line {
            StartLine::Request(line) => Some(&line.method),
            StartLine::Response(_) => None,
        }
    }

    /// Returns the request target of a request head.
    pub fn target(&self) -> Option<&[u8]> {
        match &self.line {
            StartLine::Request(line) => Some(&line.target),
            StartLine::Response(_) => None,
        }
    }

    /// Returns the request target path without query.
    pub fn path(&self) -> Option<&[u8]> {
        self.target().map(|t| match t.iter().position(|&b| b == b'?') {
            Some(q) => &t[..q],
            None => t,
        })
    }

    /// Persistent connection policy of this message.
    ///
    /// `HTTP/1.1` persists by default, `HTTP/1.0` closes by default. A `close` token always
    /// wins over `keep-alive`.
    pub fn is_keep_alive(&self) -> bool {
        let mut keep_alive = self.version().is_persistent_default();
        for token in self.headers.tokens(CONNECTION) {
            if token.eq_ignore_ascii_case(b"close") {
                return false;
            }
            if token.eq_ignore_ascii_case(b"keep-alive") {
                keep_alive = true;
            }
        }
        keep_alive
    }

    /// Returns `true` if the message carries `Connection: close`.
    pub fn has_connection_close(&self) -> bool {
        self.headers.contains_token(CONNECTION, "close")
    }

    /// Returns `true` if `chunked` is the final transfer coding.
    pub fn is_chunked(&self) -> bool {
        self.headers
            .tokens(TRANSFER_ENCODING)
            .last()
            .is_some_and(|t| t.eq_ignore_ascii_case(b"chunked"))
    }

    /// Returns the content length, `Some(Err(()))` if it is malformed or repeated with
    /// different values.
    pub fn content_length(&self) -> Option<Result<u64, ()>> {
        let mut found: Option<u64> = None;
        for value in self.headers.get_all(CONTENT_LENGTH) {
            for item in value.split(|&b| b == b',') {
                let Some(len) = parse_decimal(item.trim_ascii()) else {
                    return Some(Err(()));
                };
                match found {
                    Some(prev) if prev != len => return Some(Err(())),
                    _ => found = Some(len),
                }
            }
        }
        found.map(Ok)
    }
}

pub(crate) fn parse_decimal(digits: &[u8]) -> Option<u64> {
    if digits.is_empty() {
        return None;
    }
    digits.iter().try_fold(0u64, |acc, &b| {
        if !b.is_ascii_digit() {
            return None;
        }
        acc.checked_mul(10)?.checked_add(u64::from(b - b'0'))
    })
}
