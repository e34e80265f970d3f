use bytes::{Bytes, BytesMut};

/// Initial size of the reassembly buffer, grown by doubling up to the configured maximum.
const INITIAL_CAPACITY: usize = 4096;

/// Logical type of a data message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DataType {
    Text,
    #[default]
    Binary,
}

/// How a delivery relates to its logical message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageStatus {
    /// The whole message.
    Complete,
    /// A piece of a message, more follows.
    Partial,
    /// The final piece of a message that was delivered in pieces.
    LastPartial,
}

/// Data delivered to the application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub data_type: DataType,
    pub status: MessageStatus,
    pub payload: Bytes,
}

/// Fragment reassembly.
///
/// With a maximum of 0 fragments pass through untouched. Otherwise fragments are collected
/// until FIN, and when the buffer is full at its maximum what is collected so far is flushed as
/// [`MessageStatus::Partial`], the message then ends with [`MessageStatus::LastPartial`]
/// instead of [`MessageStatus::Complete`].
#[derive(Debug)]
pub struct Reassembler {
    max: usize,
    capacity: usize,
    buffer: BytesMut,
    data_type: DataType,
    incomplete: bool,
}

impl Reassembler {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            capacity: INITIAL_CAPACITY.min(max),
            buffer: BytesMut::new(),
            data_type: DataType::Binary,
            incomplete: false,
        }
    }

    /// Type of the message in progress, or of the last one.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Push one data frame, `data_type` is `None` for continuation frames.
    pub fn push(&mut self, fin: bool, data_type: Option<DataType>, mut payload: BytesMut, out: &mut Vec<Message>) {
        if let Some(data_type) = data_type {
            self.data_type = data_type;
        }

        if self.max == 0 {
            let status = if fin { MessageStatus::LastPartial } else { MessageStatus::Partial };
            out.push(self.message(status, payload.freeze()));
            return;
        }

        if fin && self.buffer.is_empty() && !self.incomplete {
            out.push(self.message(MessageStatus::Complete, payload.freeze()));
            return;
        }

        loop {
            if self.buffer.len() + payload.len() <= self.capacity {
                self.buffer.extend_from_slice(&payload);
                break;
            }
            if self.capacity < self.max {
                self.capacity = self.capacity.saturating_mul(2).min(self.max);
                self.buffer.reserve(self.capacity - self.buffer.len());
                continue;
            }

            self.incomplete = true;
            if self.buffer.is_empty() {
                let piece = payload.split_to(self.max).freeze();
                out.push(self.message(MessageStatus::Partial, piece));
            } else {
                let flushed = self.buffer.split().freeze();
                out.push(self.message(MessageStatus::Partial, flushed));
            }
        }

        if fin {
            let status = if std::mem::take(&mut self.incomplete) {
                MessageStatus::LastPartial
            } else {
                MessageStatus::Complete
            };
            let payload = self.buffer.split().freeze();
            out.push(self.message(status, payload));
        }
    }

    fn message(&self, status: MessageStatus, payload: Bytes) -> Message {
        Message { data_type: self.data_type, status, payload }
    }
}
