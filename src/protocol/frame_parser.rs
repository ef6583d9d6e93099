//! Incremental NT3 message parser.
//!
//! NT3 has no length-prefixed framing: a message is a type byte followed by
//! fields whose size is only known while decoding them. Bytes arrive in
//! chunks of arbitrary size, so the parser keeps an explicit state machine:
//! - `AwaitingType`: between messages, next byte is a message type
//! - `InMessage`: mid-message, with an ordered cursor over the sub-field in
//!   progress and that field's own resumable state (see [`super::field`])
//!
//! Nothing is buffered beyond the field currently being decoded, and a given
//! byte stream always produces the same messages no matter how it is split
//! into chunks.
//!
//! # Example
//!
//! ```
//! use nt3_client::protocol::{FrameParser, Message};
//!
//! let mut parser = FrameParser::new();
//!
//! // ServerHello split across two reads
//! assert!(parser.push(&[0x04, 0x00]).unwrap().is_empty());
//! let messages = parser.push(&[0x01, b'A', 0x03]).unwrap();
//!
//! assert_eq!(
//!     messages,
//!     vec![
//!         Message::ServerHello { flags: 0, identity: "A".into() },
//!         Message::ServerHelloComplete,
//!     ]
//! );
//! ```

use std::mem;

use bytes::Buf;

use super::field::{BytesField, Field, FixedField, StringField, ValueField};
use super::message::{EntryAssignment, EntryType, EntryUpdate, Message};
use super::wire_format::message_type;
use crate::error::{Nt3Error, Result};

/// Outer parser state.
#[derive(Debug)]
enum State {
    /// Between messages.
    AwaitingType,
    /// Type byte consumed, fields in progress.
    InMessage(PartialMessage),
}

/// A message whose type is known but whose fields are incomplete.
#[derive(Debug)]
enum PartialMessage {
    ServerHello(ServerHelloStep),
    EntryAssignment(AssignmentStep),
    EntryUpdate(UpdateStep),
    EntryFlagsUpdate(FixedField<3>),
    EntryDelete(FixedField<2>),
    ClearAllEntries(FixedField<4>),
    RpcResponse(RpcResponseStep),
}

/// Result of reading a type byte.
enum Dispatch {
    /// Message has no payload.
    Complete(Message),
    /// Message has fields to read.
    Partial(PartialMessage),
}

#[derive(Debug)]
enum ServerHelloStep {
    Flags(FixedField<1>),
    Identity { flags: u8, identity: StringField },
}

#[derive(Debug)]
enum AssignmentStep {
    /// Entry name string.
    Name(StringField),
    /// type(1) id(2) seq(2) flags(1)
    Header { name: String, header: FixedField<6> },
    /// Typed value.
    Value {
        name: String,
        id: u16,
        seq: u16,
        flags: u8,
        value: ValueField,
    },
}

#[derive(Debug)]
enum UpdateStep {
    /// id(2) seq(2) type(1)
    Header(FixedField<5>),
    Value { id: u16, seq: u16, value: ValueField },
}

#[derive(Debug)]
enum RpcResponseStep {
    /// id(2) uid(2)
    Header(FixedField<4>),
    Result { id: u16, uid: u16, result: BytesField },
}

impl ServerHelloStep {
    fn poll(&mut self, input: &mut &[u8]) -> Result<Option<Message>> {
        loop {
            match self {
                ServerHelloStep::Flags(field) => match field.poll(input)? {
                    Some([flags]) => {
                        *self = ServerHelloStep::Identity {
                            flags,
                            identity: StringField::default(),
                        }
                    }
                    None => return Ok(None),
                },
                ServerHelloStep::Identity { flags, identity } => {
                    return Ok(identity.poll(input)?.map(|identity| Message::ServerHello {
                        flags: *flags,
                        identity,
                    }));
                }
            }
        }
    }
}

impl AssignmentStep {
    fn poll(&mut self, input: &mut &[u8]) -> Result<Option<Message>> {
        loop {
            match self {
                AssignmentStep::Name(field) => match field.poll(input)? {
                    Some(name) => {
                        *self = AssignmentStep::Header {
                            name,
                            header: FixedField::default(),
                        }
                    }
                    None => return Ok(None),
                },
                AssignmentStep::Header { name, header } => match header.poll(input)? {
                    Some(b) => {
                        let value = ValueField::new(EntryType::from_tag(b[0])?)?;
                        let name = mem::take(name);
                        *self = AssignmentStep::Value {
                            name,
                            id: u16::from_be_bytes([b[1], b[2]]),
                            seq: u16::from_be_bytes([b[3], b[4]]),
                            flags: b[5],
                            value,
                        };
                    }
                    None => return Ok(None),
                },
                AssignmentStep::Value {
                    name,
                    id,
                    seq,
                    flags,
                    value,
                } => {
                    return Ok(value.poll(input)?.map(|value| {
                        Message::EntryAssignment(EntryAssignment {
                            name: mem::take(name),
                            id: *id,
                            seq: *seq,
                            flags: *flags,
                            value,
                        })
                    }));
                }
            }
        }
    }
}

impl UpdateStep {
    fn poll(&mut self, input: &mut &[u8]) -> Result<Option<Message>> {
        loop {
            match self {
                UpdateStep::Header(header) => match header.poll(input)? {
                    Some(b) => {
                        *self = UpdateStep::Value {
                            id: u16::from_be_bytes([b[0], b[1]]),
                            seq: u16::from_be_bytes([b[2], b[3]]),
                            value: ValueField::new(EntryType::from_tag(b[4])?)?,
                        }
                    }
                    None => return Ok(None),
                },
                UpdateStep::Value { id, seq, value } => {
                    return Ok(value.poll(input)?.map(|value| {
                        Message::EntryUpdate(EntryUpdate {
                            id: *id,
                            seq: *seq,
                            value,
                        })
                    }));
                }
            }
        }
    }
}

impl RpcResponseStep {
    fn poll(&mut self, input: &mut &[u8]) -> Result<Option<Message>> {
        loop {
            match self {
                RpcResponseStep::Header(header) => match header.poll(input)? {
                    Some(b) => {
                        *self = RpcResponseStep::Result {
                            id: u16::from_be_bytes([b[0], b[1]]),
                            uid: u16::from_be_bytes([b[2], b[3]]),
                            result: BytesField::default(),
                        }
                    }
                    None => return Ok(None),
                },
                RpcResponseStep::Result { id, uid, result } => {
                    return Ok(result.poll(input)?.map(|result| Message::RpcResponse {
                        id: *id,
                        uid: *uid,
                        result,
                    }));
                }
            }
        }
    }
}

impl PartialMessage {
    fn poll(&mut self, input: &mut &[u8]) -> Result<Option<Message>> {
        match self {
            PartialMessage::ServerHello(step) => step.poll(input),
            PartialMessage::EntryAssignment(step) => step.poll(input),
            PartialMessage::EntryUpdate(step) => step.poll(input),
            PartialMessage::EntryFlagsUpdate(field) => Ok(field.poll(input)?.map(|b| {
                Message::EntryFlagsUpdate {
                    id: u16::from_be_bytes([b[0], b[1]]),
                    flags: b[2],
                }
            })),
            PartialMessage::EntryDelete(field) => Ok(field.poll(input)?.map(|b| {
                Message::EntryDelete {
                    id: u16::from_be_bytes(b),
                }
            })),
            PartialMessage::ClearAllEntries(field) => Ok(field.poll(input)?.map(|b| {
                Message::ClearAllEntries {
                    magic: u32::from_be_bytes(b),
                }
            })),
            PartialMessage::RpcResponse(step) => step.poll(input),
        }
    }
}

/// Map a type byte to the message it starts.
fn dispatch(ty: u8) -> Result<Dispatch> {
    use message_type::*;

    Ok(match ty {
        KEEP_ALIVE => Dispatch::Complete(Message::KeepAlive),
        SERVER_HELLO_COMPLETE => Dispatch::Complete(Message::ServerHelloComplete),
        SERVER_HELLO => Dispatch::Partial(PartialMessage::ServerHello(ServerHelloStep::Flags(
            FixedField::default(),
        ))),
        ENTRY_ASSIGNMENT => Dispatch::Partial(PartialMessage::EntryAssignment(
            AssignmentStep::Name(StringField::default()),
        )),
        ENTRY_UPDATE => Dispatch::Partial(PartialMessage::EntryUpdate(UpdateStep::Header(
            FixedField::default(),
        ))),
        ENTRY_FLAGS_UPDATE => Dispatch::Partial(PartialMessage::EntryFlagsUpdate(
            FixedField::default(),
        )),
        ENTRY_DELETE => Dispatch::Partial(PartialMessage::EntryDelete(FixedField::default())),
        CLEAR_ALL_ENTRIES => {
            Dispatch::Partial(PartialMessage::ClearAllEntries(FixedField::default()))
        }
        RPC_RESPONSE => Dispatch::Partial(PartialMessage::RpcResponse(RpcResponseStep::Header(
            FixedField::default(),
        ))),
        CLIENT_HELLO | PROTOCOL_VERSION_UNSUPPORTED | CLIENT_HELLO_COMPLETE | EXECUTE_RPC => {
            return Err(Nt3Error::UnexpectedMessage(ty))
        }
        other => return Err(Nt3Error::UnknownMessageType(other)),
    })
}

/// Resumable parser turning a chunked byte stream into [`Message`]s.
///
/// After an error the stream position is lost; call [`FrameParser::clear`]
/// (or use a fresh parser) before feeding a new connection.
#[derive(Debug)]
pub struct FrameParser {
    /// Current parsing state.
    state: State,
    /// Messages emitted since creation or the last clear.
    decoded: u64,
}

impl FrameParser {
    /// Create a parser waiting for a message type byte.
    pub fn new() -> Self {
        Self {
            state: State::AwaitingType,
            decoded: 0,
        }
    }

    /// Push bytes from the socket and extract all messages they complete.
    ///
    /// Returns the completed messages in stream order (may be empty if the
    /// chunk ends mid-message; the partial state is kept for the next push).
    ///
    /// # Errors
    ///
    /// Any malformed input: unknown or client-only message types, unknown
    /// entry type tags, varint overflow, invalid UTF-8. Messages completed
    /// earlier in the same chunk are dropped with the error; callers that
    /// must act on them use [`FrameParser::next_message`].
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Message>> {
        let mut input = data;
        let mut messages = Vec::new();

        while let Some(message) = self.next_message(&mut input)? {
            messages.push(message);
        }

        Ok(messages)
    }

    /// Try to complete a single message from `input`, advancing it past the
    /// consumed bytes.
    ///
    /// Returns:
    /// - `Ok(Some(message))` if a message was completed
    /// - `Ok(None)` if `input` is exhausted
    /// - `Err(...)` on a protocol violation
    pub fn next_message(&mut self, input: &mut &[u8]) -> Result<Option<Message>> {
        loop {
            match &mut self.state {
                State::AwaitingType => {
                    if !input.has_remaining() {
                        return Ok(None);
                    }
                    match dispatch(input.get_u8())? {
                        Dispatch::Complete(message) => return Ok(Some(self.emit(message))),
                        Dispatch::Partial(partial) => self.state = State::InMessage(partial),
                    }
                }
                State::InMessage(partial) => {
                    return match partial.poll(input)? {
                        Some(message) => {
                            self.state = State::AwaitingType;
                            Ok(Some(self.emit(message)))
                        }
                        None => Ok(None),
                    };
                }
            }
        }
    }

    fn emit(&mut self, message: Message) -> Message {
        self.decoded += 1;
        message
    }

    /// Whether the parser sits between messages.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::AwaitingType)
    }

    /// Number of messages decoded since creation or the last clear.
    pub fn decoded(&self) -> u64 {
        self.decoded
    }

    /// Drop any partial message and wait for a type byte.
    pub fn clear(&mut self) {
        self.state = State::AwaitingType;
        self.decoded = 0;
    }

    /// Get the current state for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::AwaitingType => "AwaitingType",
            State::InMessage(PartialMessage::ServerHello(_)) => "ServerHello",
            State::InMessage(PartialMessage::EntryAssignment(AssignmentStep::Name(_))) => {
                "EntryAssignment.Name"
            }
            State::InMessage(PartialMessage::EntryAssignment(AssignmentStep::Header { .. })) => {
                "EntryAssignment.Header"
            }
            State::InMessage(PartialMessage::EntryAssignment(AssignmentStep::Value { .. })) => {
                "EntryAssignment.Value"
            }
            State::InMessage(PartialMessage::EntryUpdate(_)) => "EntryUpdate",
            State::InMessage(PartialMessage::EntryFlagsUpdate(_)) => "EntryFlagsUpdate",
            State::InMessage(PartialMessage::EntryDelete(_)) => "EntryDelete",
            State::InMessage(PartialMessage::ClearAllEntries(_)) => "ClearAllEntries",
            State::InMessage(PartialMessage::RpcResponse(_)) => "RpcResponse",
        }
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}
