/// HTTP/1.x framing error.
///
/// Any of these leaves the byte stream in an unknown state, the connection must be dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtoError {
    /// Header section exceeds the configured maximum.
    HeaderTooLarge,
    /// Malformed request line or status line.
    InvalidStartLine,
    /// Malformed header field.
    InvalidHeader,
    /// Version other than `HTTP/1.0` or `HTTP/1.1`.
    UnsupportedVersion,
    /// `HTTP/1.1` request without `Host`.
    MissingHost,
    /// Invalid or conflicting `Content-Length` value.
    InvalidContentLength,
    /// Malformed chunk size line or missing chunk delimiter.
    InvalidChunked,
    /// Response arrived with no request waiting for it.
    UnexpectedResponse,
}

impl std::error::Error for ProtoError {}

impl std::fmt::Display for ProtoError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::HeaderTooLarge => f.write_str("header section too large"),
            Self::InvalidStartLine => f.write_str("invalid start line"),
            Self::InvalidHeader => f.write_str("invalid header field"),
            Self::UnsupportedVersion => f.write_str("unsupported http version"),
            Self::MissingHost => f.write_str("missing host header"),
            Self::InvalidContentLength => f.write_str("invalid content length"),
            Self::InvalidChunked => f.write_str("invalid chunked encoding"),
            Self::UnexpectedResponse => f.write_str("response without pending request"),
        }
    }
}
