//! Wire format constants and one-shot primitive codecs.
//!
//! NT3 primitives:
//! ```text
//! varint   LEB128, 7 payload bits per byte, high bit = continuation
//! u16      2 bytes, Big Endian
//! double   8 bytes, IEEE-754 Big Endian
//! string   varint length + UTF-8 bytes
//! raw      varint length + opaque bytes
//! ```
//!
//! The `read_*` functions decode from a complete buffer and fail with
//! [`Nt3Error::Truncated`] when it runs short. The incremental parser uses the
//! resumable decoders in [`super::field`] instead; both share the same
//! accumulation logic.

use bytes::{Buf, BufMut};

use super::field::{BytesField, Field, StringField, VarintField};
use crate::error::{Nt3Error, Result};

/// Default NT3 server port.
pub const DEFAULT_PORT: u16 = 1735;

/// Protocol revision announced in the client hello (3.0).
pub const PROTOCOL_REVISION: u16 = 0x0300;

/// Magic that must accompany a ClearAllEntries message.
pub const CLEAR_ALL_MAGIC: u32 = 0xD06C_B27A;

/// Client hello: type, revision 0x0300, empty client identity.
pub const CLIENT_HELLO: [u8; 4] = [message_type::CLIENT_HELLO, 0x03, 0x00, 0x00];

/// Client hello complete.
pub const CLIENT_HELLO_COMPLETE: [u8; 1] = [message_type::CLIENT_HELLO_COMPLETE];

/// Keep alive.
pub const KEEP_ALIVE: [u8; 1] = [message_type::KEEP_ALIVE];

/// Entry flag: value survives a server restart.
pub const FLAG_PERSISTENT: u8 = 0x01;

/// Server hello flag: the server has seen this client before.
pub const SERVER_HELLO_CLIENT_SEEN: u8 = 0x01;

/// Message type bytes.
pub mod message_type {
    /// Keep alive (both directions).
    pub const KEEP_ALIVE: u8 = 0x00;
    /// Client hello (client to server).
    pub const CLIENT_HELLO: u8 = 0x01;
    /// Protocol version unsupported (server to client, not handled).
    pub const PROTOCOL_VERSION_UNSUPPORTED: u8 = 0x02;
    /// Server hello complete.
    pub const SERVER_HELLO_COMPLETE: u8 = 0x03;
    /// Server hello.
    pub const SERVER_HELLO: u8 = 0x04;
    /// Client hello complete (client to server).
    pub const CLIENT_HELLO_COMPLETE: u8 = 0x05;
    /// Entry assignment.
    pub const ENTRY_ASSIGNMENT: u8 = 0x10;
    /// Entry value update.
    pub const ENTRY_UPDATE: u8 = 0x11;
    /// Entry flags update.
    pub const ENTRY_FLAGS_UPDATE: u8 = 0x12;
    /// Entry delete.
    pub const ENTRY_DELETE: u8 = 0x13;
    /// Clear all entries.
    pub const CLEAR_ALL_ENTRIES: u8 = 0x14;
    /// Execute RPC (client to server).
    pub const EXECUTE_RPC: u8 = 0x20;
    /// RPC response.
    pub const RPC_RESPONSE: u8 = 0x21;
}

/// Decode a varint length.
///
/// Fails with [`Nt3Error::LengthOverflow`] when the value cannot be an
/// addressable length.
pub fn read_varint(buf: &mut &[u8]) -> Result<u64> {
    VarintField::default()
        .poll(buf)?
        .ok_or(Nt3Error::Truncated)
}

/// Decode a Big Endian u16.
pub fn read_u16_be(buf: &mut &[u8]) -> Result<u16> {
    if buf.remaining() < 2 {
        return Err(Nt3Error::Truncated);
    }
    Ok(buf.get_u16())
}

/// Decode a Big Endian IEEE-754 double.
pub fn read_f64_be(buf: &mut &[u8]) -> Result<f64> {
    if buf.remaining() < 8 {
        return Err(Nt3Error::Truncated);
    }
    Ok(buf.get_f64())
}

/// Decode a length-prefixed UTF-8 string.
pub fn read_string(buf: &mut &[u8]) -> Result<String> {
    StringField::default()
        .poll(buf)?
        .ok_or(Nt3Error::Truncated)
}

/// Decode a length-prefixed byte string.
pub fn read_raw(buf: &mut &[u8]) -> Result<Vec<u8>> {
    BytesField::default()
        .poll(buf)?
        .ok_or(Nt3Error::Truncated)
}

/// Encode a varint.
pub fn put_varint<B: BufMut>(buf: &mut B, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.put_u8(byte);
            return;
        }
        buf.put_u8(byte | 0x80);
    }
}

/// Encode a length-prefixed byte string.
pub fn put_raw<B: BufMut>(buf: &mut B, data: &[u8]) {
    put_varint(buf, data.len() as u64);
    buf.put_slice(data);
}

/// Encode a length-prefixed UTF-8 string.
pub fn put_string<B: BufMut>(buf: &mut B, value: &str) {
    put_raw(buf, value.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_varint_known_encodings() {
        let cases: &[(u64, &[u8])] = &[
            (0, &[0x00]),
            (1, &[0x01]),
            (127, &[0x7f]),
            (128, &[0x80, 0x01]),
            (300, &[0xac, 0x02]),
            (16384, &[0x80, 0x80, 0x01]),
        ];

        for (value, bytes) in cases {
            let mut encoded = BytesMut::new();
            put_varint(&mut encoded, *value);
            assert_eq!(&encoded[..], *bytes, "encoding {}", value);

            let mut input: &[u8] = bytes;
            assert_eq!(read_varint(&mut input).unwrap(), *value);
            assert!(input.is_empty());
        }
    }

    #[test]
    fn test_varint_truncated() {
        let mut input: &[u8] = &[0x80, 0x80];
        assert!(matches!(read_varint(&mut input), Err(Nt3Error::Truncated)));
    }

    #[test]
    fn test_varint_overflow() {
        // Eleven continuation bytes can never terminate inside 64 bits.
        let mut input: &[u8] = &[0xff; 11];
        assert!(matches!(
            read_varint(&mut input),
            Err(Nt3Error::LengthOverflow)
        ));

        // Ten bytes that set bit 63: above isize::MAX.
        let mut input: &[u8] = &[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01];
        assert!(matches!(
            read_varint(&mut input),
            Err(Nt3Error::LengthOverflow)
        ));
    }

    #[test]
    fn test_fixed_width_big_endian() {
        let mut input: &[u8] = &[0x12, 0x34];
        assert_eq!(read_u16_be(&mut input).unwrap(), 0x1234);

        let bytes = 3.14f64.to_be_bytes();
        let mut input: &[u8] = &bytes;
        assert_eq!(read_f64_be(&mut input).unwrap(), 3.14);

        let mut short: &[u8] = &[0x01];
        assert!(matches!(read_u16_be(&mut short), Err(Nt3Error::Truncated)));
    }

    #[test]
    fn test_string_and_raw() {
        let mut input: &[u8] = &[0x03, b'a', b'b', b'c', 0x02, 0xde, 0xad];
        assert_eq!(read_string(&mut input).unwrap(), "abc");
        assert_eq!(read_raw(&mut input).unwrap(), vec![0xde, 0xad]);
        assert!(input.is_empty());
    }

    #[test]
    fn test_string_invalid_utf8() {
        let mut input: &[u8] = &[0x02, 0xc3, 0x28];
        assert!(matches!(
            read_string(&mut input),
            Err(Nt3Error::InvalidEncoding(_))
        ));
    }

    #[test]
    fn test_control_sequences() {
        assert_eq!(CLIENT_HELLO, [0x01, 0x03, 0x00, 0x00]);
        assert_eq!(u16::from_be_bytes([CLIENT_HELLO[1], CLIENT_HELLO[2]]), PROTOCOL_REVISION);
        assert_eq!(CLIENT_HELLO_COMPLETE, [0x05]);
        assert_eq!(KEEP_ALIVE, [0x00]);
        assert_eq!(CLEAR_ALL_MAGIC.to_be_bytes(), [0xD0, 0x6C, 0xB2, 0x7A]);
    }
}
