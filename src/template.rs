//! Fully-populated default headers plus the record of which fields the
//! user pinned explicitly.

use std::net::Ipv4Addr;

use crate::error::FloodError;
use crate::net::ip::{IpFlag, Ipv4Header, Protocol, TosBit, IP_HEADER_LENGTH};
use crate::net::tcp::{TcpFlag, TcpFlags, TcpHeader, TCP_HEADER_LENGTH};
use crate::net::Named;

pub const DEFAULT_TTL: u8 = 128;
pub const PACKET_LENGTH: usize = IP_HEADER_LENGTH + TCP_HEADER_LENGTH;

/// Fields that were set explicitly and must never be randomized or
/// recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Overrides {
    pub source: bool,
    pub length: bool,
    pub checksum: bool,
    pub source_port: bool,
    pub sequence: bool,
}

/// One configured header field and its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    Source(Ipv4Addr),
    Destination(Ipv4Addr),
    Version(u8),
    Ihl(u8),
    Tos(u8),
    Precedence(u8),
    TosBit(TosBit, bool),
    Dscp(u8),
    Ecn(u8),
    TotalLength(u16),
    Identification(u16),
    Flags(u8),
    Flag(IpFlag, bool),
    FragmentOffset(u16),
    Ttl(u8),
    Protocol(u8),
    Checksum(u16),
    SourcePort(u16),
    DestinationPort(u16),
    Sequence(u32),
    Acknowledgment(u32),
    DataOffset(u8),
    Reserved(u8),
    TcpFlags(u8),
    TcpFlag(TcpFlag, bool),
    Window(u16),
    TcpChecksum(u16),
    UrgentPointer(u16),
}

/// The header pair every worker serializes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub ipv4: Ipv4Header,
    pub tcp: TcpHeader,
    pub overrides: Overrides,
}

impl Default for Template {
    fn default() -> Self {
        Template::build_default()
    }
}

fn check_range(field: &'static str, value: u32, max: u32) -> Result<(), FloodError> {
    if value > max {
        return Err(FloodError::OutOfRange { field, value, max });
    }
    Ok(())
}

impl Template {
    /// Version 4, five-word header, TTL 128, TCP, computed total length,
    /// zero addresses; a bare SYN with zero ports.
    pub fn build_default() -> Self {
        let mut ipv4 = Ipv4Header::default();
        ipv4.set_version(4);
        ipv4.set_ihl((IP_HEADER_LENGTH / 4) as u8);
        ipv4.ttl = DEFAULT_TTL;
        ipv4.protocol = Protocol::Tcp.code();
        ipv4.total_length = PACKET_LENGTH as u16;

        Template {
            ipv4,
            tcp: TcpHeader::syn(0, 0),
            overrides: Overrides::default(),
        }
    }

    /// Sets one field, marking its override flag where it has one.
    ///
    /// Values wider than their field are rejected here rather than
    /// truncated by the codec.
    pub fn apply_override(&mut self, setting: Setting) -> Result<(), FloodError> {
        match setting {
            Setting::Source(address) => {
                self.ipv4.source_address = u32::from(address);
                self.overrides.source = true;
            }
            Setting::Destination(address) => {
                self.ipv4.destination_address = u32::from(address);
            }
            Setting::Version(version) => {
                check_range("ver", version.into(), 15)?;
                self.ipv4.set_version(version);
            }
            Setting::Ihl(ihl) => {
                check_range("ihl", ihl.into(), 15)?;
                self.ipv4.set_ihl(ihl);
            }
            Setting::Tos(tos) => self.ipv4.set_tos(tos),
            Setting::Precedence(precedence) => {
                check_range("prec", precedence.into(), 7)?;
                self.ipv4.set_precedence(precedence);
            }
            Setting::TosBit(bit, value) => self.ipv4.set_tos_bit(bit, value),
            Setting::Dscp(dscp) => {
                check_range("dscp", dscp.into(), 63)?;
                self.ipv4.set_dscp(dscp);
            }
            Setting::Ecn(ecn) => {
                check_range("ecn", ecn.into(), 3)?;
                self.ipv4.set_ecn(ecn);
            }
            Setting::TotalLength(length) => {
                self.ipv4.total_length = length;
                self.overrides.length = true;
            }
            Setting::Identification(id) => self.ipv4.identification = id,
            Setting::Flags(flags) => {
                check_range("flags", flags.into(), 7)?;
                self.ipv4.set_flags(flags);
            }
            Setting::Flag(flag, value) => self.ipv4.set_flag(flag, value),
            Setting::FragmentOffset(offset) => {
                check_range("frag-ofs", offset.into(), 0x1FFF)?;
                self.ipv4.set_fragment_offset(offset);
            }
            Setting::Ttl(ttl) => self.ipv4.ttl = ttl,
            Setting::Protocol(protocol) => self.ipv4.protocol = protocol,
            Setting::Checksum(checksum) => {
                self.ipv4.checksum = checksum;
                self.overrides.checksum = true;
            }
            Setting::SourcePort(port) => {
                self.tcp.source_port = port;
                self.overrides.source_port = true;
            }
            Setting::DestinationPort(port) => self.tcp.destination_port = port,
            Setting::Sequence(sequence) => {
                self.tcp.sequence_number = sequence;
                self.overrides.sequence = true;
            }
            Setting::Acknowledgment(ack) => self.tcp.ack_number = ack,
            Setting::DataOffset(words) => {
                check_range("data-ofs", words.into(), 15)?;
                self.tcp.set_data_offset(words);
            }
            Setting::Reserved(reserved) => {
                check_range("reserved", reserved.into(), 15)?;
                self.tcp.set_reserved(reserved);
            }
            Setting::TcpFlags(bits) => self.tcp.flags = TcpFlags::from_bits(bits),
            Setting::TcpFlag(flag, value) => self.tcp.flags.set(flag, value),
            Setting::Window(window) => self.tcp.window = window,
            Setting::TcpChecksum(checksum) => self.tcp.checksum = checksum,
            Setting::UrgentPointer(pointer) => self.tcp.urgent_pointer = pointer,
        }
        Ok(())
    }

    /// Applies settings in order; later settings win.
    pub fn with_settings<I>(mut self, settings: I) -> Result<Self, FloodError>
    where
        I: IntoIterator<Item = Setting>,
    {
        for setting in settings {
            self.apply_override(setting)?;
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_template_values() {
        let template = Template::build_default();
        assert_eq!(template.ipv4.version(), 4);
        assert_eq!(template.ipv4.ihl(), 5);
        assert_eq!(template.ipv4.ttl, 128);
        assert_eq!(template.ipv4.protocol, 6);
        assert_eq!(template.ipv4.total_length, 40);
        assert_eq!(template.ipv4.source_address, 0);
        assert_eq!(template.ipv4.destination_address, 0);
        assert_eq!(template.ipv4.checksum, 0);
        assert_eq!(template.tcp.data_offset(), 5);
        assert_eq!(template.tcp.flags.bits(), TcpFlag::Syn.code());
        assert_eq!(template.overrides, Overrides::default());
    }

    #[test]
    fn overrides_are_marked() {
        let template = Template::build_default()
            .with_settings([
                Setting::Source(Ipv4Addr::new(10, 1, 1, 1)),
                Setting::TotalLength(60),
                Setting::Checksum(0xabcd),
                Setting::SourcePort(1234),
                Setting::Sequence(99),
            ])
            .unwrap();
        assert_eq!(
            template.overrides,
            Overrides {
                source: true,
                length: true,
                checksum: true,
                source_port: true,
                sequence: true,
            }
        );
        assert_eq!(template.ipv4.source(), Ipv4Addr::new(10, 1, 1, 1));
        assert_eq!(template.ipv4.total_length, 60);
    }

    #[test]
    fn plain_fields_carry_no_override() {
        let template = Template::build_default()
            .with_settings([
                Setting::Destination(Ipv4Addr::new(192, 0, 2, 1)),
                Setting::Ttl(64),
                Setting::Dscp(46),
                Setting::Flag(IpFlag::DontFragment, true),
                Setting::TcpFlag(TcpFlag::Ack, true),
                Setting::DestinationPort(443),
            ])
            .unwrap();
        assert_eq!(template.overrides, Overrides::default());
        assert_eq!(template.ipv4.dscp(), 46);
        assert!(template.ipv4.flag(IpFlag::DontFragment));
        assert_eq!(template.tcp.flags.bits(), 0x12);
        assert_eq!(template.tcp.destination_port, 443);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut template = Template::build_default();
        let err = template.apply_override(Setting::FragmentOffset(8192)).unwrap_err();
        assert!(matches!(
            err,
            FloodError::OutOfRange { field: "frag-ofs", value: 8192, max: 8191 }
        ));
        assert!(template.apply_override(Setting::Dscp(64)).is_err());
        assert!(template.apply_override(Setting::Version(16)).is_err());
        assert_eq!(template, Template::build_default());
    }
}
