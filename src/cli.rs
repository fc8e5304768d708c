//! Command-line surface. Everything here turns text into a [`Config`];
//! nothing below this module parses strings except [`SourceSpec`].

use std::net::{Ipv4Addr, SocketAddrV4};

use clap::{Parser, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::config::{default_threads, Config, LogSettings, SourceSpec, DEFAULT_BATCH_SIZE};
use crate::error::FloodError;
use crate::net::ip::{Dscp, Ecn, IpFlag, Precedence, Protocol, TosBit};
use crate::net::tcp::TcpFlag;
use crate::net::{lookup, Listing, Named, UnknownName};
use crate::template::{Setting, Template};

/// Raw IPv4/TCP packet generator that floods one destination from a
/// pool of worker threads.
#[derive(Parser, Debug)]
#[command(name = "maja-flood", version, about)]
pub struct Cli {
    // General
    /// Worker threads; 0 transmits on the main thread [default: available cores]
    #[arg(short = '#', long)]
    pub num_threads: Option<usize>,

    /// Packets submitted per batch syscall (1-1024)
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub buffer_size: usize,

    /// Do not lock process memory against swapping
    #[arg(long)]
    pub no_mem_lock: bool,

    /// Do not prefetch the packet batch into cache
    #[arg(long)]
    pub no_cpu_prefetch: bool,

    /// Use a blocking socket
    #[arg(long)]
    pub no_async_sock: bool,

    /// Carry on when a startup check such as memory locking fails
    #[arg(long)]
    pub bypass_checks: bool,

    /// Stop the workers cleanly on SIGINT/SIGTERM
    #[arg(long)]
    pub graceful: bool,

    /// Log level: none, crit, error, warn, info, debug or -1..4
    #[arg(long, value_parser = parse_log_level, default_value = "info", allow_negative_numbers = true)]
    pub logger_level: LevelFilter,

    /// Only log errors
    #[arg(short = 'Q', long)]
    pub quiet: bool,

    /// Omit timestamps from log lines
    #[arg(long)]
    pub no_log_timestamp: bool,

    /// Print the names accepted by an option and exit
    #[arg(long, value_enum, value_name = "OPTION")]
    pub list: Option<ListKind>,

    // Endpoints
    /// Destination address
    #[arg(long)]
    pub dest_ip: Option<Ipv4Addr>,

    /// Destination port
    #[arg(long, default_value_t = 0)]
    pub dest_port: u16,

    /// Source address: a.b.c.d, a.b.c.d/n or a.b.c.d-e.f.g.h [default: kernel]
    #[arg(long)]
    pub src_ip: Option<SourceSpec>,

    // IPv4 header
    #[arg(long)]
    pub ver: Option<u8>,

    /// Header length in 32-bit words
    #[arg(long)]
    pub ihl: Option<u8>,

    /// Whole type-of-service byte
    #[arg(long)]
    pub tos: Option<u8>,

    #[arg(long, value_parser = named::<Precedence>)]
    pub prec: Option<u8>,

    #[arg(long)]
    pub min_delay: bool,

    #[arg(long)]
    pub max_tput: bool,

    #[arg(long)]
    pub max_rely: bool,

    #[arg(long)]
    pub min_cost: bool,

    #[arg(long)]
    pub mbz_one: bool,

    #[arg(long, value_parser = named::<Dscp>)]
    pub dscp: Option<u8>,

    #[arg(long, value_parser = named::<Ecn>)]
    pub ecn: Option<u8>,

    /// Total length; computed when omitted
    #[arg(long)]
    pub len: Option<u16>,

    #[arg(long)]
    pub ident: Option<u16>,

    /// All three flag bits at once (0-7)
    #[arg(long)]
    pub flags: Option<u8>,

    /// RFC 3514
    #[arg(long)]
    pub evil_bit: bool,

    #[arg(long)]
    pub dont_frag: bool,

    #[arg(long)]
    pub more_frag: bool,

    #[arg(long)]
    pub frag_ofs: Option<u16>,

    #[arg(long)]
    pub ttl: Option<u8>,

    #[arg(long, value_parser = named::<Protocol>)]
    pub proto: Option<u8>,

    /// Header checksum; left for the kernel when omitted
    #[arg(long)]
    pub chksum: Option<u16>,

    // TCP header
    /// Fixed source port; randomized per batch when omitted
    #[arg(long)]
    pub src_port: Option<u16>,

    /// Fixed sequence number; randomized per batch when omitted
    #[arg(long)]
    pub seq_num: Option<u32>,

    #[arg(long)]
    pub ack_num: Option<u32>,

    /// Data offset in 32-bit words
    #[arg(long)]
    pub data_ofs: Option<u8>,

    #[arg(long)]
    pub reserved: Option<u8>,

    /// Whole flags byte; replaces the default SYN
    #[arg(long)]
    pub tcp_flags: Option<u8>,

    #[arg(long)]
    pub cwr: bool,
    #[arg(long)]
    pub ece: bool,
    #[arg(long)]
    pub urg: bool,
    #[arg(long)]
    pub ack: bool,
    #[arg(long)]
    pub psh: bool,
    #[arg(long)]
    pub rst: bool,
    #[arg(long)]
    pub syn: bool,
    #[arg(long)]
    pub fin: bool,

    #[arg(long)]
    pub window: Option<u16>,

    #[arg(long)]
    pub tcp_chksum: Option<u16>,

    #[arg(long)]
    pub urg_ptr: Option<u16>,
}

/// Options whose values may be given by name.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Proto,
    Prec,
    Dscp,
    Ecn,
    TcpFlags,
}

impl ListKind {
    pub fn listing(self) -> String {
        match self {
            ListKind::Proto => Listing::<Protocol>::new().to_string(),
            ListKind::Prec => Listing::<Precedence>::new().to_string(),
            ListKind::Dscp => Listing::<Dscp>::new().to_string(),
            ListKind::Ecn => Listing::<Ecn>::new().to_string(),
            ListKind::TcpFlags => Listing::<TcpFlag>::new().to_string(),
        }
    }
}

/// A numeric code, or a case-insensitive name of `T`.
fn named<T: Named>(value: &str) -> Result<u8, UnknownName> {
    match value.trim().parse::<u8>() {
        Ok(code) => Ok(code),
        Err(_) => lookup::<T>(value.trim()).map(Named::code),
    }
}

fn switched_on<T, const N: usize>(switches: [(T, bool); N]) -> impl Iterator<Item = T> {
    switches.into_iter().filter(|(_, on)| *on).map(|(item, _)| item)
}

fn parse_log_level(value: &str) -> Result<LevelFilter, String> {
    let level = match value.trim().to_ascii_lowercase().as_str() {
        "-1" | "none" => LevelFilter::OFF,
        "0" | "crit" | "1" | "error" => LevelFilter::ERROR,
        "2" | "warn" => LevelFilter::WARN,
        "3" | "info" => LevelFilter::INFO,
        "4" | "debug" => LevelFilter::DEBUG,
        "trace" => LevelFilter::TRACE,
        _ => {
            return Err(format!(
                "\"{value}\" is not a log level; expected none, crit, error, warn, info, debug or -1..4"
            ))
        }
    };
    Ok(level)
}

impl Cli {
    pub fn log_settings(&self) -> LogSettings {
        LogSettings {
            level: if self.quiet {
                LevelFilter::ERROR
            } else {
                self.logger_level
            },
            timestamps: !self.no_log_timestamp,
        }
    }

    /// Header settings in application order: whole bytes before the
    /// bits they contain.
    fn settings(&self) -> Vec<Setting> {
        let mut settings = Vec::new();

        settings.extend(self.ver.map(Setting::Version));
        settings.extend(self.ihl.map(Setting::Ihl));
        settings.extend(self.tos.map(Setting::Tos));
        settings.extend(self.prec.map(Setting::Precedence));
        let tos_bits = [
            (TosBit::LowDelay, self.min_delay),
            (TosBit::HighThroughput, self.max_tput),
            (TosBit::HighReliability, self.max_rely),
            (TosBit::LowCost, self.min_cost),
            (TosBit::MustBeZero, self.mbz_one),
        ];
        settings.extend(switched_on(tos_bits).map(|bit| Setting::TosBit(bit, true)));
        settings.extend(self.dscp.map(Setting::Dscp));
        settings.extend(self.ecn.map(Setting::Ecn));
        settings.extend(self.len.map(Setting::TotalLength));
        settings.extend(self.ident.map(Setting::Identification));
        settings.extend(self.flags.map(Setting::Flags));
        let ip_flags = [
            (IpFlag::Evil, self.evil_bit),
            (IpFlag::DontFragment, self.dont_frag),
            (IpFlag::MoreFragments, self.more_frag),
        ];
        settings.extend(switched_on(ip_flags).map(|flag| Setting::Flag(flag, true)));
        settings.extend(self.frag_ofs.map(Setting::FragmentOffset));
        settings.extend(self.ttl.map(Setting::Ttl));
        settings.extend(self.proto.map(Setting::Protocol));
        settings.extend(self.chksum.map(Setting::Checksum));

        settings.extend(self.src_port.map(Setting::SourcePort));
        settings.extend(self.seq_num.map(Setting::Sequence));
        settings.extend(self.ack_num.map(Setting::Acknowledgment));
        settings.extend(self.data_ofs.map(Setting::DataOffset));
        settings.extend(self.reserved.map(Setting::Reserved));
        settings.extend(self.tcp_flags.map(Setting::TcpFlags));
        let tcp_flags = [
            (TcpFlag::Cwr, self.cwr),
            (TcpFlag::Ece, self.ece),
            (TcpFlag::Urg, self.urg),
            (TcpFlag::Ack, self.ack),
            (TcpFlag::Psh, self.psh),
            (TcpFlag::Rst, self.rst),
            (TcpFlag::Syn, self.syn),
            (TcpFlag::Fin, self.fin),
        ];
        settings.extend(switched_on(tcp_flags).map(|flag| Setting::TcpFlag(flag, true)));
        settings.extend(self.window.map(Setting::Window));
        settings.extend(self.tcp_chksum.map(Setting::TcpChecksum));
        settings.extend(self.urg_ptr.map(Setting::UrgentPointer));
        settings
    }

    /// Range-checks every value and assembles the run configuration.
    pub fn into_config(self) -> Result<Config, FloodError> {
        let destination = SocketAddrV4::new(
            self.dest_ip.unwrap_or(Ipv4Addr::UNSPECIFIED),
            self.dest_port,
        );
        let template = Template::build_default().with_settings(self.settings())?;

        let config = Config {
            threads: self.num_threads.unwrap_or_else(default_threads),
            mem_lock: !self.no_mem_lock,
            prefetch: !self.no_cpu_prefetch,
            batch_size: self.buffer_size,
            nonblocking: !self.no_async_sock,
            bypass_checks: self.bypass_checks,
            graceful: self.graceful,
            destination,
            source: self.src_ip.unwrap_or_default(),
            template,
            log: self.log_settings(),
        };
        config.validate()?;
        Ok(config)
    }
}
