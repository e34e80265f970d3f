//! HTTP semantic types shared by the client and the server.
mod version;
mod method;
mod status;
mod head;
pub mod headers;
pub mod range;

pub use version::Version;
pub use method::Method;
pub use status::StatusCode;
pub use headers::{Field, Headers};
pub use head::{MessageHead, RequestLine, StartLine, StatusLine};

pub(crate) use method::is_tchar;
