//! Raw-socket IPv4/TCP packet generator.
//!
//! A [`Template`] describes the packet; every worker serializes it once
//! into its own buffer, then loops rewriting the volatile fields and
//! submitting the same buffer many times per syscall.

pub mod cli;
pub mod config;
pub mod error;
pub mod flood;
pub mod hextools;
pub mod net;
pub mod packet;
pub mod runner;
pub mod socket;
pub mod template;

pub use config::{Config, LogSettings, SourceSpec, SpoofRange};
pub use error::FloodError;
pub use flood::{transmit_loop, Batch, Transmit, WorkerStats};
pub use packet::{build, Mutator, PacketBuffer};
pub use runner::{run, run_on, Host, MemoryLock, Os, StopFlag};
pub use template::{Overrides, Setting, Template};
