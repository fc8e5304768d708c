use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::{error, info, warn};

use maja_flood::cli::Cli;
use maja_flood::config::default_threads;
use maja_flood::{run, socket, Config, LogSettings, StopFlag};

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Some(kind) = cli.list {
        print!("{}", kind.listing());
        return ExitCode::SUCCESS;
    }

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(err) => {
            // Nothing validated yet, so report with the default format.
            LogSettings::default().install();
            error!("invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };
    config.log.install();

    match flood(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn flood(config: &Config) -> anyhow::Result<()> {
    log_diagnostics(config);

    let stop = StopFlag::new();
    if config.graceful {
        for signal in [SIGINT, SIGTERM] {
            signal_hook::flag::register(signal, stop.as_atomic())
                .context("failed to install signal handler")?;
        }
        info!("SIGINT/SIGTERM will stop the workers");
    }

    let socket = socket::open(config.nonblocking)
        .context("failed to open raw socket (CAP_NET_RAW is required)")?;
    let result = run(config, &socket, &stop);
    socket::close(socket);

    let stats = result?;
    info!(
        batches = stats.batches,
        failed_batches = stats.failed_batches,
        packets = stats.packets,
        "all workers stopped"
    );
    Ok(())
}

fn log_diagnostics(config: &Config) {
    let endianness = if cfg!(target_endian = "little") {
        "little"
    } else {
        "big"
    };
    let cores = default_threads();
    info!(endianness, cores, "host");

    match config.threads {
        0 => info!("strategy: single-threaded, transmitting on the main thread"),
        n => info!(threads = n, "strategy: OS threads sharing one raw socket"),
    }
    if cores > 0 && config.threads > cores {
        warn!(
            threads = config.threads,
            cores, "more worker threads than cores, expect contention"
        );
    }
    info!(
        destination = %config.destination,
        source = ?config.source,
        batch_size = config.batch_size,
        "target"
    );
}
