use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};

use crate::net::UnknownName;

/// Fatal errors; each one ends the run before or while the workers start.
#[derive(Debug, thiserror::Error)]
pub enum FloodError {
    #[error("invalid spoof range: start {start} is above end {end}")]
    InvalidSpoofRange { start: Ipv4Addr, end: Ipv4Addr },

    #[error("invalid source specification \"{0}\": expected an address, a CIDR block or start-end")]
    InvalidSource(String),

    #[error("value of \"--{field}\" must be in [0, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        max: u32,
    },

    #[error(transparent)]
    UnknownName(#[from] UnknownName),

    #[error("a spoof range was given but the template already pins the source address")]
    SpoofWithPinnedSource,

    #[error("no destination address configured")]
    MissingDestination,

    #[error("batch size must be in [1, {max}], got {got}")]
    BatchSize { got: usize, max: usize },

    #[error("raw socket setup failed: {0}")]
    Socket(#[source] io::Error),

    #[error("failed to lock memory pages (try --no-mem-lock or --bypass-checks): {0}")]
    MemoryLock(#[source] io::Error),

    #[error("failed to connect raw socket to {addr}: {source}")]
    Connect {
        addr: SocketAddrV4,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn worker thread #{index}: {source}")]
    Spawn {
        index: usize,
        #[source]
        source: io::Error,
    },

    #[error("worker thread #{0} panicked")]
    WorkerPanicked(usize),
}
