//! Worker lifecycle: memory locking, thread spawn with rollback, join.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, Scope, ScopedJoinHandle};

use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::FloodError;
use crate::flood::{transmit_loop, Transmit, WorkerStats};

/// Shared stop request, polled once per batch.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        StopFlag::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline(always)]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// The underlying cell, for signal handlers that set it directly.
    pub fn as_atomic(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

/// Keeps every current and future page of the process resident until
/// dropped.
#[derive(Debug)]
pub struct MemoryLock(());

impl MemoryLock {
    pub fn acquire() -> io::Result<Self> {
        // SAFETY: mlockall takes no pointers.
        let rc = unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(MemoryLock(()))
    }
}

impl Drop for MemoryLock {
    fn drop(&mut self) {
        // SAFETY: as above.
        if unsafe { libc::munlockall() } != 0 {
            warn!(err = %io::Error::last_os_error(), "failed to unlock memory");
        } else {
            info!("memory unlocked");
        }
    }
}

/// The process-level resources `run` needs from the operating system.
pub trait Host {
    fn lock_memory(&self) -> io::Result<MemoryLock>;

    fn spawn<'scope, 'env, F, T>(
        &self,
        scope: &'scope Scope<'scope, 'env>,
        index: usize,
        f: F,
    ) -> io::Result<ScopedJoinHandle<'scope, T>>
    where
        F: FnOnce() -> T + Send + 'scope,
        T: Send + 'scope;
}

/// `mlockall` and named OS threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct Os;

impl Host for Os {
    fn lock_memory(&self) -> io::Result<MemoryLock> {
        MemoryLock::acquire()
    }

    fn spawn<'scope, 'env, F, T>(
        &self,
        scope: &'scope Scope<'scope, 'env>,
        index: usize,
        f: F,
    ) -> io::Result<ScopedJoinHandle<'scope, T>>
    where
        F: FnOnce() -> T + Send + 'scope,
        T: Send + 'scope,
    {
        thread::Builder::new()
            .name(format!("flood-{index}"))
            .spawn_scoped(scope, f)
    }
}

fn lock_memory<H: Host>(host: &H, config: &Config) -> Result<Option<MemoryLock>, FloodError> {
    if !config.mem_lock {
        return Ok(None);
    }
    match host.lock_memory() {
        Ok(lock) => {
            info!("memory locked");
            Ok(Some(lock))
        }
        Err(err) if config.bypass_checks => {
            warn!(%err, "failed to lock memory, continuing anyway");
            Ok(None)
        }
        Err(err) => Err(FloodError::MemoryLock(err)),
    }
}

/// Raises the stop flag if the owning worker unwinds.
struct RaiseOnPanic<'a>(&'a StopFlag);

impl Drop for RaiseOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.raise();
        }
    }
}

fn worker<S>(
    index: usize,
    config: &Config,
    socket: &S,
    stop: &StopFlag,
) -> Result<WorkerStats, FloodError>
where
    S: Transmit + ?Sized,
{
    let _guard = RaiseOnPanic(stop);
    let result = transmit_loop(index, config, socket, stop);
    if let Err(err) = &result {
        error!(worker = index, "{err}");
        stop.raise();
    }
    result
}

type Handle<'scope> = ScopedJoinHandle<'scope, Result<WorkerStats, FloodError>>;

fn join_all(handles: Vec<Handle<'_>>) -> Result<WorkerStats, FloodError> {
    let mut total = WorkerStats::default();
    let mut failure = None;
    for (index, handle) in handles.into_iter().enumerate() {
        match handle.join() {
            Ok(Ok(stats)) => total += stats,
            Ok(Err(err)) => {
                failure.get_or_insert(err);
            }
            Err(_) => {
                failure.get_or_insert(FloodError::WorkerPanicked(index));
            }
        }
    }
    match failure {
        Some(err) => Err(err),
        None => Ok(total),
    }
}

/// Runs `config.threads` workers against `socket` (or one inline when
/// the count is 0) and returns their combined stats once all have
/// stopped.
///
/// Without something raising `stop` the workers never return. A worker
/// that fails raises it for the rest; a failed spawn raises it and joins
/// the workers already running before reporting the error.
pub fn run<S>(config: &Config, socket: &S, stop: &StopFlag) -> Result<WorkerStats, FloodError>
where
    S: Transmit + ?Sized,
{
    run_on(&Os, config, socket, stop)
}

/// [`run`] against an explicit [`Host`].
pub fn run_on<H, S>(
    host: &H,
    config: &Config,
    socket: &S,
    stop: &StopFlag,
) -> Result<WorkerStats, FloodError>
where
    H: Host,
    S: Transmit + ?Sized,
{
    config.validate()?;
    let _memory = lock_memory(host, config)?;

    if config.threads == 0 {
        info!("no worker threads requested, transmitting on the main thread");
        return worker(0, config, socket, stop);
    }

    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(config.threads);
        for index in 0..config.threads {
            let spawned = host.spawn(scope, index, move || worker(index, config, socket, stop));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    stop.raise();
                    let _ = join_all(handles);
                    return Err(FloodError::Spawn { index, source });
                }
            }
        }
        info!(threads = handles.len(), "workers started");
        join_all(handles)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceSpec;
    use crate::flood::testing::RecordingSocket;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn config(threads: usize) -> Config {
        let mut config = Config::new(SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 1), 443));
        config.threads = threads;
        config.mem_lock = false;
        config.batch_size = 8;
        config.source = "172.16.0.0/12".parse::<SourceSpec>().unwrap();
        config
    }

    /// Fails the requested operations, otherwise behaves like [`Os`]
    /// without touching the real memory lock.
    #[derive(Default)]
    struct FaultyHost {
        lock_error: Option<i32>,
        spawn_error_at: Option<usize>,
    }

    impl Host for FaultyHost {
        fn lock_memory(&self) -> io::Result<MemoryLock> {
            match self.lock_error {
                Some(errno) => Err(io::Error::from_raw_os_error(errno)),
                None => Ok(MemoryLock(())),
            }
        }

        fn spawn<'scope, 'env, F, T>(
            &self,
            scope: &'scope Scope<'scope, 'env>,
            index: usize,
            f: F,
        ) -> io::Result<ScopedJoinHandle<'scope, T>>
        where
            F: FnOnce() -> T + Send + 'scope,
            T: Send + 'scope,
        {
            if self.spawn_error_at == Some(index) {
                return Err(io::Error::from_raw_os_error(libc::EAGAIN));
            }
            Os.spawn(scope, index, f)
        }
    }

    /// Drops the bytes the mutator is allowed to rewrite.
    fn fixed_part(packet: &[u8]) -> Vec<u8> {
        packet
            .iter()
            .enumerate()
            .filter(|(i, _)| !matches!(i, 12..=15 | 20..=21 | 24..=27))
            .map(|(_, b)| *b)
            .collect()
    }

    #[test]
    fn spawns_one_worker_per_thread() {
        let stop = StopFlag::new();
        let socket = RecordingSocket::new(&stop, 400);
        let stats = run(&config(4), &socket, &stop).unwrap();

        assert_eq!(socket.connects.lock().unwrap().len(), 4);
        assert!(stats.batches >= 400);
        assert_eq!(stats.packets, stats.batches * 8);

        let threads = socket.threads.lock().unwrap();
        assert!(!threads.contains(&thread::current().id()));
        // Each worker owns its own buffer.
        assert_eq!(socket.buffers.lock().unwrap().len(), threads.len());
    }

    #[test]
    fn zero_threads_runs_inline() {
        let stop = StopFlag::new();
        let socket = RecordingSocket::new(&stop, 10);
        let stats = run(&config(0), &socket, &stop).unwrap();

        assert_eq!(stats.batches, 10);
        let threads = socket.threads.lock().unwrap();
        assert_eq!(threads.len(), 1);
        assert!(threads.contains(&thread::current().id()));
    }

    #[test]
    fn inline_and_threaded_send_the_same_packets() {
        let collect = |threads| {
            let stop = StopFlag::new();
            let socket = RecordingSocket::new(&stop, 40);
            run(&config(threads), &socket, &stop).unwrap();
            let packets = socket.packets.lock().unwrap();
            packets
                .iter()
                .map(|p| fixed_part(p))
                .collect::<std::collections::HashSet<_>>()
        };

        let inline = collect(0);
        let threaded = collect(4);
        assert_eq!(inline.len(), 1);
        assert_eq!(inline, threaded);
    }

    #[test]
    fn worker_failure_stops_the_run() {
        let stop = StopFlag::new();
        let mut socket = RecordingSocket::new(&stop, u64::MAX);
        socket.refuse_connect = true;
        let err = run(&config(3), &socket, &stop).unwrap_err();
        assert!(matches!(err, FloodError::Connect { .. }));
        assert!(stop.is_raised());
    }

    #[test]
    fn invalid_config_touches_nothing() {
        let stop = StopFlag::new();
        let socket = RecordingSocket::new(&stop, 1);
        let mut config = config(2);
        config.batch_size = 0;
        assert!(matches!(
            run(&config, &socket, &stop),
            Err(FloodError::BatchSize { .. })
        ));
        assert!(socket.connects.lock().unwrap().is_empty());
    }

    #[test]
    fn spawn_failure_joins_earlier_workers() {
        let stop = StopFlag::new();
        let socket = RecordingSocket::new(&stop, u64::MAX);
        let host = FaultyHost {
            spawn_error_at: Some(2),
            ..FaultyHost::default()
        };
        let err = run_on(&host, &config(4), &socket, &stop).unwrap_err();

        assert!(matches!(err, FloodError::Spawn { index: 2, .. }));
        assert!(stop.is_raised());
        // workers 0 and 1 ran and were joined, no later worker started
        assert_eq!(socket.connects.lock().unwrap().len(), 2);
    }

    #[test]
    fn memory_lock_failure_aborts() {
        let stop = StopFlag::new();
        let socket = RecordingSocket::new(&stop, 1);
        let host = FaultyHost {
            lock_error: Some(libc::EPERM),
            ..FaultyHost::default()
        };
        let mut config = config(2);
        config.mem_lock = true;

        let err = run_on(&host, &config, &socket, &stop).unwrap_err();
        assert!(matches!(err, FloodError::MemoryLock(_)));
        assert!(socket.connects.lock().unwrap().is_empty());
    }

    #[test]
    fn memory_lock_failure_is_bypassable() {
        let stop = StopFlag::new();
        let socket = RecordingSocket::new(&stop, 5);
        let host = FaultyHost {
            lock_error: Some(libc::ENOMEM),
            ..FaultyHost::default()
        };
        let mut config = config(0);
        config.mem_lock = true;
        config.bypass_checks = true;

        let stats = run_on(&host, &config, &socket, &stop).unwrap();
        assert_eq!(stats.batches, 5);
    }

    #[test]
    fn stop_flag_is_shared_between_clones() {
        let stop = StopFlag::new();
        let handle = stop.clone();
        assert!(!stop.is_raised());
        handle.raise();
        assert!(stop.is_raised());
        assert!(stop.as_atomic().load(Ordering::Relaxed));
    }
}
