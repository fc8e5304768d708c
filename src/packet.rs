//! The serialized IPv4+TCP packet each worker owns, and the per-batch
//! rewrite of its volatile fields.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::distributions::{Distribution, Uniform};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::config::SpoofRange;
use crate::net::ip::{Ipv4View, IP_HEADER_LENGTH};
use crate::net::tcp::TcpView;
use crate::template::{Template, PACKET_LENGTH};

/// One IPv4 header immediately followed by one TCP header, no options.
#[repr(C, align(4))]
#[derive(Clone, PartialEq, Eq)]
pub struct PacketBuffer {
    bytes: [u8; PACKET_LENGTH],
}

impl PacketBuffer {
    pub const LEN: usize = PACKET_LENGTH;

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn ipv4(&self) -> Ipv4View<&[u8]> {
        Ipv4View::new_unchecked(&self.bytes[..IP_HEADER_LENGTH])
    }

    pub fn tcp(&self) -> TcpView<&[u8]> {
        TcpView::new_unchecked(&self.bytes[IP_HEADER_LENGTH..])
    }

    fn ipv4_mut(&mut self) -> Ipv4View<&mut [u8]> {
        Ipv4View::new_unchecked(&mut self.bytes[..IP_HEADER_LENGTH])
    }

    fn tcp_mut(&mut self) -> TcpView<&mut [u8]> {
        TcpView::new_unchecked(&mut self.bytes[IP_HEADER_LENGTH..])
    }
}

impl std::fmt::Debug for PacketBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketBuffer")
            .field("bytes", &&self.bytes[..])
            .finish()
    }
}

/// Serializes `template` into a freshly allocated buffer.
///
/// The total length is the computed packet length unless it was pinned,
/// and the IPv4 checksum stays zero for the kernel to fill unless it was
/// pinned. Neither is touched again afterwards.
pub fn build(template: &Template) -> Box<PacketBuffer> {
    let mut ipv4 = template.ipv4;
    if !template.overrides.length {
        ipv4.total_length = PACKET_LENGTH as u16;
    }
    if !template.overrides.checksum {
        ipv4.checksum = 0;
    }

    let mut packet = Box::new(PacketBuffer {
        bytes: [0; PACKET_LENGTH],
    });
    ipv4.write(&mut packet.bytes[..IP_HEADER_LENGTH]);
    template.tcp.write(&mut packet.bytes[IP_HEADER_LENGTH..]);
    packet
}

/// Rewrites source address, source port and sequence number in place.
/// Fields pinned by the template are left alone.
#[derive(Debug, Clone)]
pub struct Mutator {
    rng: SmallRng,
    source: Option<Uniform<u32>>,
    source_port: bool,
    sequence: bool,
}

impl Mutator {
    /// Seeded from the wall clock; workers are not guaranteed distinct
    /// streams.
    pub fn new(template: &Template, spoof: Option<SpoofRange>) -> Self {
        Mutator::with_rng(template, spoof, SmallRng::seed_from_u64(clock_seed()))
    }

    pub fn with_rng(template: &Template, spoof: Option<SpoofRange>, rng: SmallRng) -> Self {
        let source = spoof
            .filter(|_| !template.overrides.source)
            .map(|range| Uniform::new_inclusive(range.start(), range.end()));
        Mutator {
            rng,
            source,
            source_port: !template.overrides.source_port,
            sequence: !template.overrides.sequence,
        }
    }

    #[inline]
    pub fn mutate(&mut self, packet: &mut PacketBuffer) {
        if let Some(source) = &self.source {
            let address = source.sample(&mut self.rng);
            packet.ipv4_mut().set_source_address(address);
        }
        if self.source_port {
            let port: u16 = self.rng.gen();
            packet.tcp_mut().set_source_port(port);
        }
        if self.sequence {
            let sequence: u32 = self.rng.gen();
            packet.tcp_mut().set_sequence_number(sequence);
        }
    }
}

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(0)
}

const CACHE_LINE: usize = 64;

/// Hints the CPU to pull every cache line of `value` into L1.
#[inline]
pub fn prefetch<T: ?Sized>(value: &T) {
    let start = value as *const T as *const u8;
    let len = std::mem::size_of_val(value);
    for offset in (0..len).step_by(CACHE_LINE) {
        prefetch_line(start.wrapping_add(offset));
    }
}

#[cfg(target_arch = "x86_64")]
#[inline(always)]
fn prefetch_line(ptr: *const u8) {
    use core::arch::x86_64::{_mm_prefetch, _MM_HINT_T0};
    // SAFETY: prefetch is a hint and never faults, even on a bad address.
    unsafe { _mm_prefetch::<_MM_HINT_T0>(ptr as *const i8) }
}

#[cfg(not(target_arch = "x86_64"))]
#[inline(always)]
fn prefetch_line(_ptr: *const u8) {}
