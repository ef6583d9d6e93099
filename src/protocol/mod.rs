//! Protocol module - wire format, field decoders, messages and parsing.
//!
//! This module implements the NT3 binary protocol as seen by a client:
//! - Primitive encodings (varint, Big Endian integers and doubles, strings)
//! - Resumable field decoders for chunked input
//! - Typed messages and entry values, with an encoder for test servers
//! - Incremental frame parser

mod field;
mod frame_parser;
mod message;
mod wire_format;

pub use field::MAX_LENGTH;
pub use frame_parser::FrameParser;
pub use message::{EntryAssignment, EntryType, EntryUpdate, EntryValue, Message};
pub use wire_format::{
    message_type, put_raw, put_string, put_varint, read_f64_be, read_raw, read_string,
    read_u16_be, read_varint, CLEAR_ALL_MAGIC, CLIENT_HELLO, CLIENT_HELLO_COMPLETE, DEFAULT_PORT,
    FLAG_PERSISTENT, KEEP_ALIVE, PROTOCOL_REVISION, SERVER_HELLO_CLIENT_SEEN,
};
