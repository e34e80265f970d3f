/// WebSocket protocol error, the connection is dropped after any of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsError {
    /// Payload length above `0x7FFF_FFFF`.
    LengthOverflow,
    /// Opcode outside the data and control sets.
    ReservedOpcode(u8),
    /// RSV bits set without a negotiated extension.
    ReservedBits,
    /// Control frame with payload above 125 bytes or without FIN.
    InvalidControlFrame,
    /// Close frame whose payload is a single byte, too short for a status code.
    InvalidClosePayload,
    /// `Sec-WebSocket-Accept` does not match the request key, or the handshake is incomplete.
    Handshake,
    /// Message operation before the upgrade or after close.
    NotOpen,
}

impl std::error::Error for WsError {}

impl std::fmt::Display for WsError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::LengthOverflow => f.write_str("frame length exceeds 31 bits"),
            Self::ReservedOpcode(op) => write!(f, "reserved opcode {op:#x}"),
            Self::ReservedBits => f.write_str("reserved bits set"),
            Self::InvalidControlFrame => f.write_str("fragmented or oversized control frame"),
            Self::InvalidClosePayload => f.write_str("close frame payload shorter than a status code"),
            Self::Handshake => f.write_str("websocket handshake mismatch"),
            Self::NotOpen => f.write_str("websocket is not open"),
        }
    }
}
