//! IPv4 header (RFC 791), without options.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |Version|  IHL  |    DSCP   |ECN|          Total Length         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         Identification        |Flags|      Fragment Offset    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Time to Live |    Protocol   |         Header Checksum       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       Source Address                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Destination Address                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The second byte is either the legacy Type-of-Service (precedence plus
//! four flag bits and a must-be-zero bit) or DSCP+ECN. Both are views
//! over one stored byte, as are the 3 flag bits and the 13-bit fragment
//! offset over one stored `u16`. Bit numbering is always MSB-first.

use std::net::Ipv4Addr;

use super::{ensure_len, get_u16, get_u32, put_u16, put_u32, WireError};

pub const IP_HEADER_LENGTH: usize = 20;

/// Byte offsets of the header fields.
pub mod field {
    pub const VER_IHL: usize = 0;
    pub const TOS: usize = 1;
    pub const LENGTH: usize = 2;
    pub const IDENT: usize = 4;
    pub const FLG_OFF: usize = 6;
    pub const TTL: usize = 8;
    pub const PROTOCOL: usize = 9;
    pub const CHECKSUM: usize = 10;
    pub const SRC_ADDR: usize = 12;
    pub const DST_ADDR: usize = 16;
}

named_codes! {
    /// IANA protocol numbers we have names for.
    pub enum Protocol : "IP protocol" {
        Ip = (0, "ip"),
        Icmp = (1, "icmp"),
        Tcp = (6, "tcp"),
        Udp = (17, "udp"),
    }
}

named_codes! {
    /// RFC 791 precedence (top three bits of the ToS byte).
    pub enum Precedence : "IP precedence" {
        Routine = (0, "routine"),
        Priority = (1, "priority"),
        Immediate = (2, "immediate"),
        Flash = (3, "flash"),
        FlashOverride = (4, "override"),
        CriticEcp = (5, "critical"),
        InternetworkControl = (6, "internetwork"),
        NetworkControl = (7, "network"),
    }
}

named_codes! {
    /// Differentiated Services code points (RFC 2474, 2597, 3246, 5865, 8622).
    pub enum Dscp : "DSCP code point" {
        Df = (0, "df"),
        Cs0 = (0, "cs0"),
        Cs1 = (8, "cs1"),
        Cs2 = (16, "cs2"),
        Cs3 = (24, "cs3"),
        Cs4 = (32, "cs4"),
        Cs5 = (40, "cs5"),
        Cs6 = (48, "cs6"),
        Cs7 = (56, "cs7"),
        Af11 = (10, "af11"),
        Af12 = (12, "af12"),
        Af13 = (14, "af13"),
        Af21 = (18, "af21"),
        Af22 = (20, "af22"),
        Af23 = (22, "af23"),
        Af31 = (26, "af31"),
        Af32 = (28, "af32"),
        Af33 = (30, "af33"),
        Af41 = (34, "af41"),
        Af42 = (36, "af42"),
        Af43 = (38, "af43"),
        Ef = (46, "ef"),
        VoiceAdmit = (44, "va"),
        LowerEffort = (1, "le"),
    }
}

named_codes! {
    /// Explicit Congestion Notification codes (RFC 3168, RFC 8311).
    pub enum Ecn : "ECN code" {
        NotEct = (0, "not"),
        Ect1 = (1, "ect1"),
        Ect0 = (2, "ect0"),
        Ce = (3, "ce"),
    }
}

named_codes! {
    /// The three IPv4 flag bits, as a 3-bit value (evil bit is the MSB).
    pub enum IpFlag : "IP flag" {
        /// RFC 3514 reserved ("evil") bit.
        Evil = (0b100, "evil"),
        DontFragment = (0b010, "df"),
        MoreFragments = (0b001, "mf"),
    }
}

/// Legacy ToS flag bits, below the precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TosBit {
    LowDelay = 1 << 4,
    HighThroughput = 1 << 3,
    HighReliability = 1 << 2,
    LowCost = 1 << 1,
    MustBeZero = 1 << 0,
}

/// An IPv4 header with fields held in host order.
///
/// The ToS byte and the flags/fragment-offset word are stored once and
/// read through masking accessors, so writing DSCP changes the
/// precedence and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ipv4Header {
    version_ihl: u8,
    tos: u8,
    pub total_length: u16,
    pub identification: u16,
    flags_fragment: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub source_address: u32,
    pub destination_address: u32,
}

impl Ipv4Header {
    /// Version (4 bits).
    pub fn version(&self) -> u8 {
        self.version_ihl >> 4
    }

    /// Sets the version; only the low 4 bits of `version` are kept.
    pub fn set_version(&mut self, version: u8) {
        self.version_ihl = (version << 4) | (self.version_ihl & 0x0F);
    }

    /// Header length in 32-bit words (4 bits).
    pub fn ihl(&self) -> u8 {
        self.version_ihl & 0x0F
    }

    pub fn set_ihl(&mut self, ihl: u8) {
        self.version_ihl = (self.version_ihl & 0xF0) | (ihl & 0x0F);
    }

    /// The whole ToS / DSCP+ECN byte.
    pub fn tos(&self) -> u8 {
        self.tos
    }

    pub fn set_tos(&mut self, tos: u8) {
        self.tos = tos;
    }

    /// Precedence (3 bits).
    pub fn precedence(&self) -> u8 {
        self.tos >> 5
    }

    pub fn set_precedence(&mut self, precedence: u8) {
        self.tos = ((precedence & 0x07) << 5) | (self.tos & 0x1F);
    }

    pub fn tos_bit(&self, bit: TosBit) -> bool {
        self.tos & bit as u8 != 0
    }

    pub fn set_tos_bit(&mut self, bit: TosBit, value: bool) {
        if value {
            self.tos |= bit as u8;
        } else {
            self.tos &= !(bit as u8);
        }
    }

    /// DSCP (6 bits).
    pub fn dscp(&self) -> u8 {
        self.tos >> 2
    }

    pub fn set_dscp(&mut self, dscp: u8) {
        self.tos = ((dscp & 0x3F) << 2) | (self.tos & 0x03);
    }

    /// ECN (2 bits).
    pub fn ecn(&self) -> u8 {
        self.tos & 0x03
    }

    pub fn set_ecn(&mut self, ecn: u8) {
        self.tos = (self.tos & 0xFC) | (ecn & 0x03);
    }

    /// The three flag bits as one value (evil, DF, MF from MSB to LSB).
    pub fn flags(&self) -> u8 {
        (self.flags_fragment >> 13) as u8
    }

    pub fn set_flags(&mut self, flags: u8) {
        self.flags_fragment = (u16::from(flags & 0x07) << 13) | (self.flags_fragment & 0x1FFF);
    }

    pub fn flag(&self, flag: IpFlag) -> bool {
        use super::Named;
        self.flags() & flag.code() != 0
    }

    pub fn set_flag(&mut self, flag: IpFlag, value: bool) {
        use super::Named;
        let flags = if value {
            self.flags() | flag.code()
        } else {
            self.flags() & !flag.code()
        };
        self.set_flags(flags);
    }

    /// Fragment offset in 8-byte units (13 bits).
    pub fn fragment_offset(&self) -> u16 {
        self.flags_fragment & 0x1FFF
    }

    pub fn set_fragment_offset(&mut self, offset: u16) {
        self.flags_fragment = (self.flags_fragment & 0xE000) | (offset & 0x1FFF);
    }

    /// The raw 16-bit flags + fragment-offset word.
    pub fn flags_fragment(&self) -> u16 {
        self.flags_fragment
    }

    pub fn source(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.source_address)
    }

    pub fn destination(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.destination_address)
    }

    /// Serializes into `buffer[..IP_HEADER_LENGTH]`, network byte order.
    pub fn write(&self, buffer: &mut [u8]) {
        buffer[field::VER_IHL] = self.version_ihl;
        buffer[field::TOS] = self.tos;
        put_u16(buffer, field::LENGTH, self.total_length);
        put_u16(buffer, field::IDENT, self.identification);
        put_u16(buffer, field::FLG_OFF, self.flags_fragment);
        buffer[field::TTL] = self.ttl;
        buffer[field::PROTOCOL] = self.protocol;
        put_u16(buffer, field::CHECKSUM, self.checksum);
        put_u32(buffer, field::SRC_ADDR, self.source_address);
        put_u32(buffer, field::DST_ADDR, self.destination_address);
    }

    pub fn pack(&self) -> [u8; IP_HEADER_LENGTH] {
        let mut buffer = [0u8; IP_HEADER_LENGTH];
        self.write(&mut buffer);
        buffer
    }

    pub fn unpack(buffer: &[u8]) -> Result<Self, WireError> {
        ensure_len(buffer, IP_HEADER_LENGTH)?;
        Ok(Ipv4Header {
            version_ihl: buffer[field::VER_IHL],
            tos: buffer[field::TOS],
            total_length: get_u16(buffer, field::LENGTH),
            identification: get_u16(buffer, field::IDENT),
            flags_fragment: get_u16(buffer, field::FLG_OFF),
            ttl: buffer[field::TTL],
            protocol: buffer[field::PROTOCOL],
            checksum: get_u16(buffer, field::CHECKSUM),
            source_address: get_u32(buffer, field::SRC_ADDR),
            destination_address: get_u32(buffer, field::DST_ADDR),
        })
    }
}

/// An IPv4 header read and written in place inside a serialized buffer.
#[derive(Debug)]
pub struct Ipv4View<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Ipv4View<T> {
    pub fn new(buffer: T) -> Result<Self, WireError> {
        ensure_len(buffer.as_ref(), IP_HEADER_LENGTH)?;
        Ok(Ipv4View { buffer })
    }

    /// Wraps a buffer already known to hold at least `IP_HEADER_LENGTH` bytes.
    pub(crate) fn new_unchecked(buffer: T) -> Self {
        debug_assert!(buffer.as_ref().len() >= IP_HEADER_LENGTH);
        Ipv4View { buffer }
    }

    pub fn total_length(&self) -> u16 {
        get_u16(self.buffer.as_ref(), field::LENGTH)
    }

    pub fn checksum(&self) -> u16 {
        get_u16(self.buffer.as_ref(), field::CHECKSUM)
    }

    pub fn source_address(&self) -> u32 {
        get_u32(self.buffer.as_ref(), field::SRC_ADDR)
    }

    pub fn destination_address(&self) -> u32 {
        get_u32(self.buffer.as_ref(), field::DST_ADDR)
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Ipv4View<T> {
    #[inline(always)]
    pub fn set_source_address(&mut self, address: u32) {
        put_u32(self.buffer.as_mut(), field::SRC_ADDR, address);
    }
}
