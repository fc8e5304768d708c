//! TCP header (RFC 793 / RFC 9293), without options.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          Source Port          |       Destination Port        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Data |       |C|E|U|A|P|R|S|F|                               |
//! | Offset| Rsrvd |W|C|R|C|S|S|Y|I|            Window             |
//! |       |       |R|E|G|K|H|T|N|N|                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           Checksum            |         Urgent Pointer        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use std::fmt;

use super::{ensure_len, get_u16, get_u32, put_u16, put_u32, Named, WireError};

pub const TCP_HEADER_LENGTH: usize = 20;

/// Byte offsets of the header fields.
pub mod field {
    pub const SRC_PORT: usize = 0;
    pub const DST_PORT: usize = 2;
    pub const SEQ_NUM: usize = 4;
    pub const ACK_NUM: usize = 8;
    pub const OFF_RSV: usize = 12;
    pub const FLAGS: usize = 13;
    pub const WIN_SIZE: usize = 14;
    pub const CHECKSUM: usize = 16;
    pub const URGENT: usize = 18;
}

named_codes! {
    /// A single bit of the TCP flag byte.
    pub enum TcpFlag : "TCP flag" {
        Fin = (1 << 0, "fin"),
        Syn = (1 << 1, "syn"),
        Rst = (1 << 2, "rst"),
        Psh = (1 << 3, "psh"),
        Ack = (1 << 4, "ack"),
        Urg = (1 << 5, "urg"),
        /// ECN-Echo (RFC 3168).
        Ece = (1 << 6, "ece"),
        /// Congestion Window Reduced (RFC 3168).
        Cwr = (1 << 7, "cwr"),
    }
}

/// The TCP flag byte, readable as a whole or bit by bit.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpFlags(u8);

impl TcpFlags {
    pub const fn from_bits(bits: u8) -> Self {
        TcpFlags(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, flag: TcpFlag) -> bool {
        self.0 & flag.code() != 0
    }

    pub fn set(&mut self, flag: TcpFlag, value: bool) {
        if value {
            self.0 |= flag.code();
        } else {
            self.0 &= !flag.code();
        }
    }

    pub fn with(mut self, flag: TcpFlag) -> Self {
        self.set(flag, true);
        self
    }
}

impl fmt::Debug for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        for flag in TcpFlag::ALL {
            if self.contains(*flag) {
                set.entry(&format_args!("{}", flag.name().to_ascii_uppercase()));
            }
        }
        set.finish()
    }
}

/// Represents the structure of a TCP header, fields in host order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpHeader {
    pub source_port: u16,
    pub destination_port: u16,
    pub sequence_number: u32,
    pub ack_number: u32,
    /// Data offset (high nibble) and reserved bits (low nibble).
    offset_reserved: u8,
    pub flags: TcpFlags,
    pub window: u16,
    pub checksum: u16,
    pub urgent_pointer: u16,
}

impl TcpHeader {
    /// A bare SYN segment: data offset 5, only the SYN bit set.
    pub fn syn(source_port: u16, destination_port: u16) -> Self {
        let mut header = TcpHeader {
            source_port,
            destination_port,
            flags: TcpFlags::default().with(TcpFlag::Syn),
            ..TcpHeader::default()
        };
        header.set_data_offset((TCP_HEADER_LENGTH / 4) as u8);
        header
    }

    /// Header length in 32-bit words (4 bits).
    pub fn data_offset(&self) -> u8 {
        self.offset_reserved >> 4
    }

    pub fn set_data_offset(&mut self, words: u8) {
        self.offset_reserved = (words << 4) | (self.offset_reserved & 0x0F);
    }

    /// Reserved bits (4 bits).
    pub fn reserved(&self) -> u8 {
        self.offset_reserved & 0x0F
    }

    pub fn set_reserved(&mut self, reserved: u8) {
        self.offset_reserved = (self.offset_reserved & 0xF0) | (reserved & 0x0F);
    }

    /// Serializes into `buffer[..TCP_HEADER_LENGTH]`, network byte order.
    pub fn write(&self, buffer: &mut [u8]) {
        put_u16(buffer, field::SRC_PORT, self.source_port);
        put_u16(buffer, field::DST_PORT, self.destination_port);
        put_u32(buffer, field::SEQ_NUM, self.sequence_number);
        put_u32(buffer, field::ACK_NUM, self.ack_number);
        buffer[field::OFF_RSV] = self.offset_reserved;
        buffer[field::FLAGS] = self.flags.bits();
        put_u16(buffer, field::WIN_SIZE, self.window);
        put_u16(buffer, field::CHECKSUM, self.checksum);
        put_u16(buffer, field::URGENT, self.urgent_pointer);
    }

    pub fn pack(&self) -> [u8; TCP_HEADER_LENGTH] {
        let mut buffer = [0u8; TCP_HEADER_LENGTH];
        self.write(&mut buffer);
        buffer
    }

    pub fn unpack(buffer: &[u8]) -> Result<Self, WireError> {
        ensure_len(buffer, TCP_HEADER_LENGTH)?;
        Ok(TcpHeader {
            source_port: get_u16(buffer, field::SRC_PORT),
            destination_port: get_u16(buffer, field::DST_PORT),
            sequence_number: get_u32(buffer, field::SEQ_NUM),
            ack_number: get_u32(buffer, field::ACK_NUM),
            offset_reserved: buffer[field::OFF_RSV],
            flags: TcpFlags::from_bits(buffer[field::FLAGS]),
            window: get_u16(buffer, field::WIN_SIZE),
            checksum: get_u16(buffer, field::CHECKSUM),
            urgent_pointer: get_u16(buffer, field::URGENT),
        })
    }
}

/// A TCP header read and written in place inside a serialized buffer.
#[derive(Debug)]
pub struct TcpView<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> TcpView<T> {
    pub fn new(buffer: T) -> Result<Self, WireError> {
        ensure_len(buffer.as_ref(), TCP_HEADER_LENGTH)?;
        Ok(TcpView { buffer })
    }

    /// Wraps a buffer already known to hold at least `TCP_HEADER_LENGTH` bytes.
    pub(crate) fn new_unchecked(buffer: T) -> Self {
        debug_assert!(buffer.as_ref().len() >= TCP_HEADER_LENGTH);
        TcpView { buffer }
    }

    pub fn source_port(&self) -> u16 {
        get_u16(self.buffer.as_ref(), field::SRC_PORT)
    }

    pub fn destination_port(&self) -> u16 {
        get_u16(self.buffer.as_ref(), field::DST_PORT)
    }

    pub fn sequence_number(&self) -> u32 {
        get_u32(self.buffer.as_ref(), field::SEQ_NUM)
    }

    pub fn flags(&self) -> TcpFlags {
        TcpFlags::from_bits(self.buffer.as_ref()[field::FLAGS])
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> TcpView<T> {
    #[inline(always)]
    pub fn set_source_port(&mut self, port: u16) {
        put_u16(self.buffer.as_mut(), field::SRC_PORT, port);
    }

    #[inline(always)]
    pub fn set_sequence_number(&mut self, sequence: u32) {
        put_u32(self.buffer.as_mut(), field::SEQ_NUM, sequence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_header_pack() {
        // Fixed part of a SYN as seen in Wireshark, options stripped:
        //   [0-1]   Source Port:       0xcf4a        (53066)
        //   [2-3]   Destination Port:  0x240d        (9229)
        //   [4-7]   Sequence Number:   0x0c08a8b4
        //   [8-11]  Ack Number:        0x00000000
        //   [12]    Data Offset:       5 (0x50)
        //   [13]    Flags:             0x02          (only SYN set)
        //   [14-15] Window:            0xffff
        //   [16-17] Checksum:          0xfe34
        //   [18-19] Urgent Pointer:    0x0000
        let expected: [u8; TCP_HEADER_LENGTH] = [
            0xcf, 0x4a, 0x24, 0x0d, 0x0c, 0x08, 0xa8, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x50, 0x02,
            0xff, 0xff, 0xfe, 0x34, 0x00, 0x00,
        ];

        let mut tcp_header = TcpHeader::syn(53066, 9229);
        tcp_header.sequence_number = 0x0c08a8b4;
        tcp_header.window = 65535;
        tcp_header.checksum = 0xfe34;

        assert_eq!(
            tcp_header.pack(),
            expected,
            "Packed TCP header did not match expected output"
        );
        assert_eq!(TcpHeader::unpack(&expected).unwrap(), tcp_header);
    }

    #[test]
    fn flag_byte_and_bits_agree() {
        let mut flags = TcpFlags::from_bits(0x12);
        assert!(flags.contains(TcpFlag::Syn));
        assert!(flags.contains(TcpFlag::Ack));
        assert!(!flags.contains(TcpFlag::Rst));

        flags.set(TcpFlag::Cwr, true);
        flags.set(TcpFlag::Syn, false);
        assert_eq!(flags.bits(), 0x90);
        assert_eq!(format!("{:?}", flags), "{ACK, CWR}");
    }

    #[test]
    fn offset_and_reserved_share_one_byte() {
        let mut header = TcpHeader::default();
        header.set_data_offset(15);
        header.set_reserved(0b1010);
        assert_eq!(header.pack()[field::OFF_RSV], 0xfa);
        header.set_data_offset(5);
        assert_eq!(header.reserved(), 0b1010);
        assert_eq!(header.data_offset(), 5);
    }

    #[test]
    fn view_rewrites_only_volatile_fields() {
        let header = TcpHeader::syn(1000, 80);
        let mut bytes = header.pack();
        let mut view = TcpView::new(&mut bytes[..]).unwrap();
        view.set_source_port(4242);
        view.set_sequence_number(0xdead_beef);
        assert_eq!(view.destination_port(), 80);
        assert!(view.flags().contains(TcpFlag::Syn));

        let rewritten = TcpHeader::unpack(&bytes).unwrap();
        assert_eq!(rewritten.source_port, 4242);
        assert_eq!(rewritten.sequence_number, 0xdead_beef);
        assert_eq!(
            TcpHeader {
                source_port: header.source_port,
                sequence_number: header.sequence_number,
                ..rewritten
            },
            header
        );
    }

    #[test]
    fn matches_independent_parser() {
        use pnet_packet::tcp::{TcpFlags as PnetFlags, TcpPacket};

        let mut header = TcpHeader::syn(53066, 443);
        header.ack_number = 7;
        header.flags.set(TcpFlag::Ece, true);
        header.window = 1024;
        header.urgent_pointer = 3;
        let bytes = header.pack();

        let parsed = TcpPacket::new(&bytes).unwrap();
        assert_eq!(parsed.get_source(), 53066);
        assert_eq!(parsed.get_destination(), 443);
        assert_eq!(parsed.get_acknowledgement(), 7);
        assert_eq!(parsed.get_data_offset(), 5);
        assert_eq!(u16::from(parsed.get_flags()), u16::from(PnetFlags::SYN | PnetFlags::ECE));
        assert_eq!(parsed.get_window(), 1024);
        assert_eq!(parsed.get_urgent_ptr(), 3);
    }
}
