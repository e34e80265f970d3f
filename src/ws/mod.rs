//! WebSocket protocol.
//!
//! Frames are decoded only once fully buffered. Data frames go through the [`Reassembler`],
//! control frames are answered by [`WebSocket`] itself.
mod error;
pub mod frame;
mod assemble;
pub mod handshake;
mod socket;

pub use error::WsError;
pub use frame::{Frame, OpCode};
pub use assemble::{DataType, Message, MessageStatus, Reassembler};
pub use socket::{CLOSE_NORMAL, Event, Fragment, Role, WebSocket};
