//! Pure bit-field codec for the two IPbus v2.0 header words.
//!
//! Layout is fixed by the wire protocol; this module is the single
//! place bit positions appear. All operations here are total and
//! infallible — semantic validation (does this header make sense in
//! context) is the validator's job, not this one's.

use enum_primitive::FromPrimitive;

/// Protocol version carried by every header word.
pub const PROTOCOL_VERSION: u8 = 2;

/// Byte-order marker in the packet header; the target and we both
/// transmit little-endian words, so this nibble is always `0xF`.
const BYTE_ORDER_MARKER: u8 = 0xF;

enum_from_primitive! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum PacketType {
        Control = 0,
        Status = 1,
        Resend = 2,
    }
}

impl PacketType {
    fn code(self) -> u8 {
        self as u8
    }

    fn from_code(code: u8) -> Option<PacketType> {
        PacketType::from_u8(code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub version: u8,
    pub id: u16,
    pub packet_type: Option<PacketType>,
}

/// Encodes a packet header word: version (4 bits) | id (16 bits) |
/// byte-order marker (4 bits) | packet type (4 bits), most-significant
/// bits first.
pub fn encode_packet_header(packet_type: PacketType, id: u16) -> u32 {
    ((PROTOCOL_VERSION as u32) << 28)
        | (((id & 0xFFFF) as u32) << 8)
        | ((BYTE_ORDER_MARKER as u32) << 4)
        | (packet_type.code() as u32)
}

pub fn decode_packet_header(word: u32) -> PacketHeader {
    PacketHeader {
        version: ((word >> 28) & 0xF) as u8,
        id: ((word >> 8) & 0xFFFF) as u16,
        packet_type: PacketType::from_code((word & 0xF) as u8),
    }
}

enum_from_primitive! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum TransactionType {
        Read = 0,
        Write = 1,
        NonIncrementingRead = 2,
        NonIncrementingWrite = 3,
        RmwBits = 4,
        RmwSum = 5,
        ConfigurationRead = 6,
        ConfigurationWrite = 7,
    }
}

impl TransactionType {
    pub fn type_id(self) -> u8 {
        self as u8
    }

    pub fn from_type_id(id: u8) -> Option<TransactionType> {
        TransactionType::from_u8(id)
    }

    /// True for transaction types whose request carries a `payload.len()`
    /// sized read reservation rather than write data.
    pub fn is_read(self) -> bool {
        matches!(
            self,
            TransactionType::Read | TransactionType::NonIncrementingRead | TransactionType::ConfigurationRead
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionHeader {
    pub version: u8,
    pub id: u16,
    pub words: u8,
    pub ty: Option<TransactionType>,
    pub info: u8,
}

/// Encodes a transaction header word: version (4 bits) | transaction id
/// (12 bits) | word count (8 bits) | type id (4 bits) | info code (4
/// bits). Requests always carry info code `0`.
pub fn encode_transaction_header(ty: TransactionType, words: u8, id: u16) -> u32 {
    ((PROTOCOL_VERSION as u32) << 28)
        | (((id & 0x0FFF) as u32) << 16)
        | ((words as u32) << 8)
        | ((ty.type_id() as u32) << 4)
}

/// Encodes a response transaction header carrying a non-zero info code.
pub fn encode_transaction_header_with_info(ty: TransactionType, words: u8, id: u16, info: u8) -> u32 {
    encode_transaction_header(ty, words, id) | (info as u32 & 0xF)
}

pub fn decode_transaction_header(word: u32) -> TransactionHeader {
    TransactionHeader {
        version: ((word >> 28) & 0xF) as u8,
        id: ((word >> 16) & 0x0FFF) as u16,
        words: ((word >> 8) & 0xFF) as u8,
        ty: TransactionType::from_type_id(((word >> 4) & 0xF) as u8),
        info: (word & 0xF) as u8,
    }
}

/// Maps a response transaction's 4-bit info code to a diagnostic
/// string. `0` is success; every other value names a specific fault.
pub fn info_mnemonic(info: u8) -> &'static str {
    match info {
        0 => "success",
        1 => "bad header",
        2 => "bus error on read",
        3 => "bus error on write",
        4 => "bus timeout on read",
        5 => "bus timeout on write",
        6 => "request truncated",
        7 => "unsupported transaction type",
        _ => "unknown",
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn packet_header_round_trip() {
        let word = encode_packet_header(PacketType::Control, 0);
        assert_eq!(word, 0x2000_00F0);
        let decoded = decode_packet_header(word);
        assert_eq!(decoded.version, 2);
        assert_eq!(decoded.id, 0);
        assert_eq!(decoded.packet_type, Some(PacketType::Control));
    }

    #[test]
    fn status_header_matches_wire_constant() {
        assert_eq!(encode_packet_header(PacketType::Status, 0), 0x2000_00F1);
    }

    #[test]
    fn transaction_header_round_trip() {
        let word = encode_transaction_header(TransactionType::Read, 1, 0);
        assert_eq!(word, 0x2000_0100 | (TransactionType::Read.type_id() as u32) << 4);
        let decoded = decode_transaction_header(word);
        assert_eq!(decoded.id, 0);
        assert_eq!(decoded.words, 1);
        assert_eq!(decoded.ty, Some(TransactionType::Read));
        assert_eq!(decoded.info, 0);
    }

    #[test]
    fn unknown_type_id_decodes_to_none() {
        let word = 0x2000_0180 | (0xE << 4);
        assert_eq!(decode_transaction_header(word).ty, None);
    }

    #[test]
    fn info_mnemonic_success_is_distinct() {
        assert_eq!(info_mnemonic(0), "success");
        assert_ne!(info_mnemonic(2), info_mnemonic(3));
    }
}
