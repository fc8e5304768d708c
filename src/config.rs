//! Validated run configuration, built once at startup and shared
//! read-only by every worker.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::str::FromStr;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::error::FloodError;
use crate::template::{Setting, Template};

/// Descriptors submitted per batch unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 37;
/// Linux `UIO_MAXIOV`.
pub const MAX_BATCH_SIZE: usize = 1024;

/// Inclusive range of source addresses, host byte order, `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpoofRange {
    start: u32,
    end: u32,
}

impl SpoofRange {
    pub fn new(start: Ipv4Addr, end: Ipv4Addr) -> Result<Self, FloodError> {
        let (start_bits, end_bits) = (u32::from(start), u32::from(end));
        if start_bits > end_bits {
            return Err(FloodError::InvalidSpoofRange { start, end });
        }
        Ok(SpoofRange {
            start: start_bits,
            end: end_bits,
        })
    }

    pub fn single(address: Ipv4Addr) -> Self {
        let bits = u32::from(address);
        SpoofRange {
            start: bits,
            end: bits,
        }
    }

    /// Every address of the block `address/prefix_len`, network and
    /// broadcast included.
    pub fn from_cidr(address: Ipv4Addr, prefix_len: u8) -> Result<Self, FloodError> {
        if prefix_len > 32 {
            return Err(FloodError::OutOfRange {
                field: "src-ip",
                value: prefix_len.into(),
                max: 32,
            });
        }
        let mask = u32::MAX.checked_shl(32 - u32::from(prefix_len)).unwrap_or(0);
        let bits = u32::from(address);
        Ok(SpoofRange {
            start: bits & mask,
            end: bits | !mask,
        })
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    /// Number of addresses in the range.
    pub fn len(&self) -> u64 {
        u64::from(self.end - self.start) + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, address: u32) -> bool {
        (self.start..=self.end).contains(&address)
    }
}

/// Where the IPv4 source address of each packet comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceSpec {
    /// Leave the field zero; the kernel substitutes the interface address.
    #[default]
    Kernel,
    /// One pinned address, never rewritten.
    Fixed(Ipv4Addr),
    /// A fresh address drawn from the range for every batch.
    Spoof(SpoofRange),
}

impl FromStr for SourceSpec {
    type Err = FloodError;

    /// Accepts `a.b.c.d`, `a.b.c.d/n` or `a.b.c.d-e.f.g.h`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || FloodError::InvalidSource(s.to_string());

        if let Some((address, prefix)) = s.split_once('/') {
            let address = address.trim().parse().map_err(|_| invalid())?;
            let prefix = prefix.trim().parse().map_err(|_| invalid())?;
            return SpoofRange::from_cidr(address, prefix).map(SourceSpec::Spoof);
        }
        if let Some((start, end)) = s.split_once('-') {
            let start = start.trim().parse().map_err(|_| invalid())?;
            let end = end.trim().parse().map_err(|_| invalid())?;
            return SpoofRange::new(start, end).map(SourceSpec::Spoof);
        }
        s.trim().parse().map(SourceSpec::Fixed).map_err(|_| invalid())
    }
}

/// Log level and format, consumed once when the subscriber is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    pub level: LevelFilter,
    pub timestamps: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        LogSettings {
            level: LevelFilter::INFO,
            timestamps: true,
        }
    }
}

impl LogSettings {
    /// Installs the process-wide `tracing` subscriber on stderr.
    /// `RUST_LOG`, when set, takes precedence over `level`.
    pub fn install(&self) {
        let filter = EnvFilter::builder()
            .with_default_directive(self.level.into())
            .from_env_lossy();
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false);
        if self.timestamps {
            builder.init();
        } else {
            builder.without_time().init();
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Worker threads; 0 runs the loop on the calling thread.
    pub threads: usize,
    pub mem_lock: bool,
    pub prefetch: bool,
    pub batch_size: usize,
    pub nonblocking: bool,
    /// Proceed when memory locking fails.
    pub bypass_checks: bool,
    /// Stop workers on SIGINT/SIGTERM instead of relying on process death.
    pub graceful: bool,
    pub destination: SocketAddrV4,
    pub source: SourceSpec,
    pub template: Template,
    pub log: LogSettings,
}

impl Config {
    pub fn new(destination: SocketAddrV4) -> Self {
        Config {
            threads: default_threads(),
            mem_lock: true,
            prefetch: true,
            batch_size: DEFAULT_BATCH_SIZE,
            nonblocking: true,
            bypass_checks: false,
            graceful: false,
            destination,
            source: SourceSpec::Kernel,
            template: Template::build_default(),
            log: LogSettings::default(),
        }
    }

    pub fn validate(&self) -> Result<(), FloodError> {
        if self.destination.ip().is_unspecified() {
            return Err(FloodError::MissingDestination);
        }
        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(FloodError::BatchSize {
                got: self.batch_size,
                max: MAX_BATCH_SIZE,
            });
        }
        if matches!(self.source, SourceSpec::Spoof(_)) && self.template.overrides.source {
            return Err(FloodError::SpoofWithPinnedSource);
        }
        Ok(())
    }

    /// The template with destination and source folded in.
    pub fn packet_template(&self) -> Result<Template, FloodError> {
        let mut template = self.template.clone();
        template.apply_override(Setting::Destination(*self.destination.ip()))?;
        template.apply_override(Setting::DestinationPort(self.destination.port()))?;
        if let SourceSpec::Fixed(address) = self.source {
            template.apply_override(Setting::Source(address))?;
        }
        Ok(template)
    }

    /// The range to draw sources from, if any.
    pub fn spoof_range(&self) -> Option<SpoofRange> {
        match self.source {
            SourceSpec::Spoof(range) => Some(range),
            _ => None,
        }
    }
}

/// One worker per available core, as the kernel reports it.
pub fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_source_forms() {
        assert_eq!(
            "10.0.0.7".parse::<SourceSpec>().unwrap(),
            SourceSpec::Fixed(Ipv4Addr::new(10, 0, 0, 7))
        );

        let SourceSpec::Spoof(cidr) = "10.0.0.77/24".parse().unwrap() else {
            panic!("expected a range");
        };
        assert_eq!(Ipv4Addr::from(cidr.start()), Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(Ipv4Addr::from(cidr.end()), Ipv4Addr::new(10, 0, 0, 255));
        assert_eq!(cidr.len(), 256);

        let SourceSpec::Spoof(range) = "10.0.0.1 - 10.0.1.0".parse().unwrap() else {
            panic!("expected a range");
        };
        assert_eq!(range.len(), 256);

        assert!(matches!(
            "10.0.0.300".parse::<SourceSpec>(),
            Err(FloodError::InvalidSource(_))
        ));
    }

    #[test]
    fn cidr_edges() {
        let all = SpoofRange::from_cidr(Ipv4Addr::new(1, 2, 3, 4), 0).unwrap();
        assert_eq!((all.start(), all.end()), (0, u32::MAX));
        assert_eq!(all.len(), 1 << 32);

        let host = SpoofRange::from_cidr(Ipv4Addr::new(1, 2, 3, 4), 32).unwrap();
        assert_eq!(host, SpoofRange::single(Ipv4Addr::new(1, 2, 3, 4)));

        assert!(SpoofRange::from_cidr(Ipv4Addr::new(1, 2, 3, 4), 33).is_err());
    }

    #[test]
    fn reversed_range_is_rejected() {
        let err = SpoofRange::new(Ipv4Addr::new(10, 0, 0, 9), Ipv4Addr::new(10, 0, 0, 1))
            .unwrap_err();
        assert!(matches!(err, FloodError::InvalidSpoofRange { .. }));
        assert!("10.0.0.9-10.0.0.1".parse::<SourceSpec>().is_err());
    }

    #[test]
    fn validate_checks_destination_and_batch() {
        let mut config = Config::new(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 80));
        assert!(matches!(config.validate(), Err(FloodError::MissingDestination)));

        config.destination = SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 1), 80);
        assert!(config.validate().is_ok());

        config.batch_size = 0;
        assert!(matches!(config.validate(), Err(FloodError::BatchSize { got: 0, .. })));
        config.batch_size = MAX_BATCH_SIZE + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn packet_template_folds_in_endpoints() {
        let mut config = Config::new(SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 1), 8080));
        config.source = SourceSpec::Fixed(Ipv4Addr::new(198, 51, 100, 2));
        let template = config.packet_template().unwrap();
        assert_eq!(template.ipv4.destination(), Ipv4Addr::new(192, 0, 2, 1));
        assert_eq!(template.tcp.destination_port, 8080);
        assert_eq!(template.ipv4.source(), Ipv4Addr::new(198, 51, 100, 2));
        assert!(template.overrides.source);
        assert_eq!(config.spoof_range(), None);
    }

    #[test]
    fn spoof_range_with_pinned_source_is_rejected() {
        let mut config = Config::new(SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 1), 80));
        let range = SpoofRange::from_cidr(Ipv4Addr::new(10, 0, 0, 0), 8).unwrap();
        config.source = SourceSpec::Spoof(range);
        assert!(config.validate().is_ok());
        assert_eq!(config.spoof_range(), Some(range));

        config
            .template
            .apply_override(Setting::Source(Ipv4Addr::new(10, 9, 9, 9)))
            .unwrap();
        assert!(matches!(
            config.validate(),
            Err(FloodError::SpoofWithPinnedSource)
        ));
    }
}
