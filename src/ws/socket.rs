use bytes::{Bytes, BytesMut};

use super::{
    DataType, Message, Reassembler, WsError,
    frame::{MAX_CONTROL_LEN, OpCode, decode_frame, encode_frame},
};
use crate::{crypto, log::debug};

/// Normal closure status code.
pub const CLOSE_NORMAL: u16 = 1000;

/// Which end of the connection this is, clients mask every frame they send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Whether an outgoing message is finished with this send.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Fragment {
    #[default]
    Complete,
    /// More of the same message follows.
    Incomplete,
}

/// Result of decoding incoming frames.
#[derive(Debug, PartialEq, Eq)]
pub enum Event {
    Message(Message),
    /// Ping received, its pong is already queued as [`Event::Send`] when auto pong is on.
    Ping(Bytes),
    Pong(Bytes),
    /// Bytes that must be written to the peer.
    Send(Bytes),
    /// Peer sent close, the connection should be torn down after pending sends.
    Closed(Option<u16>),
}

/// Per-connection websocket state after the upgrade.
#[derive(Debug)]
pub struct WebSocket {
    role: Role,
    reassembler: Reassembler,
    max_frame: usize,
    auto_pong: bool,
    /// An outgoing message was sent without FIN.
    fragmenting: bool,
    close_sent: bool,
    close_received: bool,
}

impl WebSocket {
    pub fn new(role: Role, max_reassembly: usize, max_frame: usize) -> Self {
        Self {
            role,
            reassembler: Reassembler::new(max_reassembly),
            max_frame: max_frame.max(1),
            auto_pong: true,
            fragmenting: false,
            close_sent: false,
            close_received: false,
        }
    }

    /// Disable the automatic pong answer to pings.
    pub fn set_auto_pong(&mut self, auto_pong: bool) {
        self.auto_pong = auto_pong;
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns `true` once a close frame was sent or received.
    pub fn is_closing(&self) -> bool {
        self.close_sent || self.close_received
    }

    /// Decode every complete frame in `buf`.
    ///
    /// Decoding stops after a close frame, anything behind it is left in `buf`.
    pub fn decode(&mut self, buf: &mut BytesMut, out: &mut Vec<Event>) -> Result<(), WsError> {
        let mut messages = Vec::new();
        while !self.close_received {
            let Some(frame) = decode_frame(buf)? else {
                break;
            };

            match frame.opcode {
                OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                    let data_type = match frame.opcode {
                        OpCode::Text => Some(DataType::Text),
                        OpCode::Binary => Some(DataType::Binary),
                        _ => None,
                    };
                    self.reassembler.push(frame.fin, data_type, frame.payload, &mut messages);
                    out.extend(messages.drain(..).map(Event::Message));
                }
                OpCode::Ping => {
                    let payload = frame.payload.freeze();
                    if self.auto_pong && !self.close_sent {
                        out.push(Event::Send(self.control(OpCode::Pong, &payload)));
                    }
                    out.push(Event::Ping(payload));
                }
                OpCode::Pong => out.push(Event::Pong(frame.payload.freeze())),
                OpCode::Close => {
                    if frame.payload.len() == 1 {
                        return Err(WsError::InvalidClosePayload);
                    }
                    self.close_received = true;
                    let code = frame.payload.first_chunk::<2>().map(|c| u16::from_be_bytes(*c));
                    debug!("websocket close received, code {code:?}");
                    if !self.close_sent {
                        self.close_sent = true;
                        let echo = &frame.payload[..frame.payload.len().min(2)];
                        out.push(Event::Send(self.control(OpCode::Close, echo)));
                    }
                    out.push(Event::Closed(code));
                }
            }
        }
        Ok(())
    }

    /// Encode an outgoing message, splitting it into frames of at most the max frame size.
    pub fn encode(&mut self, data_type: DataType, payload: &[u8], fragment: Fragment) -> Result<Bytes, WsError> {
        if self.close_sent {
            return Err(WsError::NotOpen);
        }

        let mut dst = BytesMut::with_capacity(payload.len() + 14);
        let mut pieces = payload.chunks(self.max_frame).peekable();
        let mut first = true;
        loop {
            let piece = pieces.next().unwrap_or_default();
            let last = pieces.peek().is_none();
            let fin = last && fragment == Fragment::Complete;
            let opcode = match (self.fragmenting, first) {
                (false, true) => match data_type {
                    DataType::Text => OpCode::Text,
                    DataType::Binary => OpCode::Binary,
                },
                _ => OpCode::Continuation,
            };
            encode_frame(&mut dst, fin, opcode, self.mask(), piece);
            self.fragmenting = !fin;
            first = false;
            if last {
                break;
            }
        }
        Ok(dst.freeze())
    }

    /// Encode a ping.
    pub fn ping(&mut self, payload: &[u8]) -> Result<Bytes, WsError> {
        if self.close_sent {
            return Err(WsError::NotOpen);
        }
        if payload.len() > MAX_CONTROL_LEN {
            return Err(WsError::InvalidControlFrame);
        }
        Ok(self.control(OpCode::Ping, payload))
    }

    /// Encode a close frame, only the first call returns one.
    pub fn close(&mut self, code: u16) -> Option<Bytes> {
        if std::mem::replace(&mut self.close_sent, true) {
            return None;
        }
        Some(self.control(OpCode::Close, &code.to_be_bytes()))
    }

    fn control(&self, opcode: OpCode, payload: &[u8]) -> Bytes {
        let mut dst = BytesMut::with_capacity(payload.len() + 6);
        encode_frame(&mut dst, true, opcode, self.mask(), payload);
        dst.freeze()
    }

    fn mask(&self) -> Option<[u8; 4]> {
        match self.role {
            Role::Client => Some(crypto::mask_key()),
            Role::Server => None,
        }
    }
}
