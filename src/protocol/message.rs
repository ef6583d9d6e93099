//! Decoded NT3 messages and entry values.
//!
//! Message layouts (after the type byte):
//! ```text
//! 0x00 KeepAlive
//! 0x03 ServerHelloComplete
//! 0x04 ServerHello         flags(1) identity(string)
//! 0x10 EntryAssignment     name(string) type(1) id(2) seq(2) flags(1) value
//! 0x11 EntryUpdate         id(2) seq(2) type(1) value
//! 0x12 EntryFlagsUpdate    id(2) flags(1)
//! 0x13 EntryDelete         id(2)
//! 0x14 ClearAllEntries     magic(4)
//! 0x21 RpcResponse         id(2) uid(2) result(raw)
//! ```

use bytes::BufMut;
use serde::Serialize;

use super::wire_format::{message_type, put_raw, put_string, put_varint, CLEAR_ALL_MAGIC};
use crate::error::{Nt3Error, Result};

/// Type of an entry value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntryType {
    /// One byte, non-zero = true.
    Bool,
    /// IEEE-754 double.
    Double,
    /// UTF-8 string.
    String,
    /// Opaque bytes.
    Raw,
    /// Array of bools.
    BoolArray,
    /// Array of doubles.
    DoubleArray,
    /// Array of strings.
    StringArray,
    /// Opaque RPC definition bytes.
    RpcDefinition,
    /// Synthetic type of tree placeholders; never on the wire.
    Unknown,
}

impl EntryType {
    /// Wire tag of this type. [`EntryType::Unknown`] maps to 0xFF.
    pub fn tag(self) -> u8 {
        match self {
            EntryType::Bool => 0x00,
            EntryType::Double => 0x01,
            EntryType::String => 0x02,
            EntryType::Raw => 0x03,
            EntryType::BoolArray => 0x10,
            EntryType::DoubleArray => 0x11,
            EntryType::StringArray => 0x12,
            EntryType::RpcDefinition => 0x20,
            EntryType::Unknown => 0xFF,
        }
    }

    /// Parse a wire tag.
    pub fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            0x00 => EntryType::Bool,
            0x01 => EntryType::Double,
            0x02 => EntryType::String,
            0x03 => EntryType::Raw,
            0x10 => EntryType::BoolArray,
            0x11 => EntryType::DoubleArray,
            0x12 => EntryType::StringArray,
            0x20 => EntryType::RpcDefinition,
            other => return Err(Nt3Error::UnknownEntryType(other)),
        })
    }
}

/// Value carried by an entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum EntryValue {
    Bool(bool),
    Double(f64),
    String(String),
    Raw(Vec<u8>),
    BoolArray(Vec<bool>),
    DoubleArray(Vec<f64>),
    StringArray(Vec<String>),
    RpcDefinition(Vec<u8>),
}

impl EntryValue {
    /// Type of this value.
    pub fn entry_type(&self) -> EntryType {
        match self {
            EntryValue::Bool(_) => EntryType::Bool,
            EntryValue::Double(_) => EntryType::Double,
            EntryValue::String(_) => EntryType::String,
            EntryValue::Raw(_) => EntryType::Raw,
            EntryValue::BoolArray(_) => EntryType::BoolArray,
            EntryValue::DoubleArray(_) => EntryType::DoubleArray,
            EntryValue::StringArray(_) => EntryType::StringArray,
            EntryValue::RpcDefinition(_) => EntryType::RpcDefinition,
        }
    }

    /// Encode the value (without its type tag).
    ///
    /// Arrays carry a one-byte count; elements past 255 are not encoded.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        match self {
            EntryValue::Bool(v) => buf.put_u8(u8::from(*v)),
            EntryValue::Double(v) => buf.put_f64(*v),
            EntryValue::String(v) => put_string(buf, v),
            EntryValue::Raw(v) | EntryValue::RpcDefinition(v) => put_raw(buf, v),
            EntryValue::BoolArray(items) => {
                let items = &items[..items.len().min(255)];
                buf.put_u8(items.len() as u8);
                for item in items {
                    buf.put_u8(u8::from(*item));
                }
            }
            EntryValue::DoubleArray(items) => {
                let items = &items[..items.len().min(255)];
                buf.put_u8(items.len() as u8);
                for item in items {
                    buf.put_f64(*item);
                }
            }
            EntryValue::StringArray(items) => {
                let items = &items[..items.len().min(255)];
                buf.put_u8(items.len() as u8);
                for item in items {
                    put_string(buf, item);
                }
            }
        }
    }
}

/// EntryAssignment payload.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryAssignment {
    /// Full entry name, expected to start with `/`.
    pub name: String,
    /// Entry id assigned by the server.
    pub id: u16,
    /// Sequence number.
    pub seq: u16,
    /// Entry flags.
    pub flags: u8,
    /// Initial value.
    pub value: EntryValue,
}

impl EntryAssignment {
    /// Type of the assigned value.
    #[inline]
    pub fn entry_type(&self) -> EntryType {
        self.value.entry_type()
    }
}

/// EntryUpdate payload.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryUpdate {
    /// Entry id.
    pub id: u16,
    /// Sequence number.
    pub seq: u16,
    /// New value.
    pub value: EntryValue,
}

impl EntryUpdate {
    /// Type announced by the update.
    #[inline]
    pub fn entry_type(&self) -> EntryType {
        self.value.entry_type()
    }
}

/// A complete server-to-client message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    KeepAlive,
    ServerHello {
        /// Bit 0: the server has seen this client before.
        flags: u8,
        /// Server identity string.
        identity: String,
    },
    ServerHelloComplete,
    EntryAssignment(EntryAssignment),
    EntryUpdate(EntryUpdate),
    EntryFlagsUpdate {
        id: u16,
        flags: u8,
    },
    EntryDelete {
        id: u16,
    },
    ClearAllEntries {
        /// Must equal [`CLEAR_ALL_MAGIC`] for the clear to take effect.
        magic: u32,
    },
    RpcResponse {
        /// RPC definition entry id.
        id: u16,
        /// Call unique id.
        uid: u16,
        /// Opaque result bytes.
        result: Vec<u8>,
    },
}

impl Message {
    /// Message type byte.
    pub fn message_type(&self) -> u8 {
        match self {
            Message::KeepAlive => message_type::KEEP_ALIVE,
            Message::ServerHello { .. } => message_type::SERVER_HELLO,
            Message::ServerHelloComplete => message_type::SERVER_HELLO_COMPLETE,
            Message::EntryAssignment(_) => message_type::ENTRY_ASSIGNMENT,
            Message::EntryUpdate(_) => message_type::ENTRY_UPDATE,
            Message::EntryFlagsUpdate { .. } => message_type::ENTRY_FLAGS_UPDATE,
            Message::EntryDelete { .. } => message_type::ENTRY_DELETE,
            Message::ClearAllEntries { .. } => message_type::CLEAR_ALL_ENTRIES,
            Message::RpcResponse { .. } => message_type::RPC_RESPONSE,
        }
    }

    /// Whether this message mutates the entry table.
    pub fn is_entry_message(&self) -> bool {
        matches!(
            self,
            Message::EntryAssignment(_)
                | Message::EntryUpdate(_)
                | Message::EntryFlagsUpdate { .. }
                | Message::EntryDelete { .. }
                | Message::ClearAllEntries { .. }
                | Message::RpcResponse { .. }
        )
    }

    /// A ClearAllEntries carrying the valid magic.
    pub fn clear_all() -> Self {
        Message::ClearAllEntries {
            magic: CLEAR_ALL_MAGIC,
        }
    }

    /// Encode the message as a server would send it.
    ///
    /// # Example
    ///
    /// ```
    /// use nt3_client::protocol::Message;
    ///
    /// let mut buf: Vec<u8> = Vec::new();
    /// Message::EntryDelete { id: 0x0102 }.encode(&mut buf);
    /// assert_eq!(buf, [0x13, 0x01, 0x02]);
    /// ```
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.message_type());
        match self {
            Message::KeepAlive | Message::ServerHelloComplete => {}
            Message::ServerHello { flags, identity } => {
                buf.put_u8(*flags);
                put_string(buf, identity);
            }
            Message::EntryAssignment(a) => {
                put_string(buf, &a.name);
                buf.put_u8(a.entry_type().tag());
                buf.put_u16(a.id);
                buf.put_u16(a.seq);
                buf.put_u8(a.flags);
                a.value.encode(buf);
            }
            Message::EntryUpdate(u) => {
                buf.put_u16(u.id);
                buf.put_u16(u.seq);
                buf.put_u8(u.entry_type().tag());
                u.value.encode(buf);
            }
            Message::EntryFlagsUpdate { id, flags } => {
                buf.put_u16(*id);
                buf.put_u8(*flags);
            }
            Message::EntryDelete { id } => buf.put_u16(*id),
            Message::ClearAllEntries { magic } => buf.put_u32(*magic),
            Message::RpcResponse { id, uid, result } => {
                buf.put_u16(*id);
                buf.put_u16(*uid);
                put_varint(buf, result.len() as u64);
                buf.put_slice(result);
            }
        }
    }

    /// Encode into a fresh `Vec`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }
}
