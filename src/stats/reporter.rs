// src/stats/reporter.rs
use crate::network::endpoint::ConnectionStatus;
use crate::types::AlgorithmType;
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use sysinfo::System;

/// Lock-free counters owned by one worker thread.
///
/// Workers bump these on their hot path; everything else only ever reads.
#[derive(Default)]
pub struct WorkerCounters {
    hashes: AtomicU64,
    shares: AtomicU64,
}

impl WorkerCounters {
    /// One hash attempt finished.
    #[inline]
    pub fn record_hash(&self) {
        self.hashes.fetch_add(1, Ordering::Relaxed);
    }

    /// One candidate below target found.
    #[inline]
    pub fn record_share(&self) {
        self.shares.fetch_add(1, Ordering::Relaxed);
    }

    /// Total hashes attempted.
    pub fn hashes(&self) -> u64 {
        self.hashes.load(Ordering::Relaxed)
    }

    /// Total shares found.
    pub fn shares(&self) -> u64 {
        self.shares.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of one worker's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    /// Worker index within the pool
    pub index: usize,
    /// Hashes attempted
    pub hashes: u64,
    /// Shares found
    pub shares: u64,
}

/// Read-only status surface for the CLI/console/remote layers.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    /// Algorithm the worker pool is currently built for
    pub algorithm: Option<AlgorithmType>,
    /// URL of the pool the connection manager is talking to
    pub pool: Option<String>,
    /// Connection state machine position
    pub connection: ConnectionStatus,
    /// Per-worker counters
    pub workers: Vec<WorkerStats>,
    /// Shares the pool accepted
    pub accepted: u64,
    /// Shares the pool rejected
    pub rejected: u64,
    /// Shares forwarded with the stale tag
    pub stale: u64,
    /// Total hashes attempted since start
    pub hashes_total: u64,
    /// Average hashrate since start, hashes per second
    pub avg_hashrate: f64,
}

/// Shared mining statistics hub.
///
/// Worker counter sets swap atomically on reconfiguration so a snapshot
/// never mixes generations; the low-rate fields (algorithm, pool,
/// connection) sit behind a plain mutex.
pub struct StatsRegistry {
    workers: ArcSwap<Vec<Arc<WorkerCounters>>>,
    accepted: AtomicU64,
    rejected: AtomicU64,
    stale: AtomicU64,
    retired_hashes: AtomicU64,
    start_time: Instant,
    state: Mutex<StateFields>,
}

#[derive(Default)]
struct StateFields {
    algorithm: Option<AlgorithmType>,
    pool: Option<String>,
    connection: ConnectionStatus,
}

impl StatsRegistry {
    /// Creates an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(StatsRegistry {
            workers: ArcSwap::from_pointee(Vec::new()),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            stale: AtomicU64::new(0),
            retired_hashes: AtomicU64::new(0),
            start_time: Instant::now(),
            state: Mutex::new(StateFields::default()),
        })
    }

    /// Installs a fresh counter set for `count` workers and returns the
    /// per-worker handles. Hash totals of the outgoing generation are
    /// folded into the running total first.
    pub fn attach_workers(&self, count: usize) -> Vec<Arc<WorkerCounters>> {
        let counters: Vec<Arc<WorkerCounters>> = (0..count)
            .map(|_| Arc::new(WorkerCounters::default()))
            .collect();
        self.retire_current();
        self.workers.store(Arc::new(counters.clone()));
        counters
    }

    /// Drops the current worker counter set (pool torn down).
    pub fn detach_workers(&self) {
        self.retire_current();
        self.workers.store(Arc::new(Vec::new()));
    }

    fn retire_current(&self) {
        let outgoing: u64 = self.workers.load().iter().map(|c| c.hashes()).sum();
        self.retired_hashes.fetch_add(outgoing, Ordering::Relaxed);
    }

    /// Pool accepted a share.
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Pool rejected a share.
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// A share went out flagged stale.
    pub fn record_stale(&self) {
        self.stale.fetch_add(1, Ordering::Relaxed);
    }

    /// Updates the algorithm shown in status output.
    pub fn set_algorithm(&self, algorithm: Option<AlgorithmType>) {
        self.state.lock().expect("stats state poisoned").algorithm = algorithm;
    }

    /// Updates the pool/connection fields shown in status output.
    pub fn set_connection(&self, pool: Option<String>, status: ConnectionStatus) {
        let mut state = self.state.lock().expect("stats state poisoned");
        state.pool = pool;
        state.connection = status;
    }

    /// Assembles the full status snapshot.
    pub fn snapshot(&self) -> StatusSnapshot {
        let workers: Vec<WorkerStats> = self
            .workers
            .load()
            .iter()
            .enumerate()
            .map(|(index, c)| WorkerStats {
                index,
                hashes: c.hashes(),
                shares: c.shares(),
            })
            .collect();

        let live: u64 = workers.iter().map(|w| w.hashes).sum();
        let hashes_total = live + self.retired_hashes.load(Ordering::Relaxed);
        let elapsed = self.start_time.elapsed().as_secs_f64().max(1.0);

        let state = self.state.lock().expect("stats state poisoned");
        StatusSnapshot {
            algorithm: state.algorithm,
            pool: state.pool.clone(),
            connection: state.connection,
            workers,
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            hashes_total,
            avg_hashrate: hashes_total as f64 / elapsed,
        }
    }
}

/// Periodic logger for the registry plus host readings via `sysinfo`.
pub struct StatsReporter {
    registry: Arc<StatsRegistry>,
    report_interval: Duration,
}

impl StatsReporter {
    /// Creates a reporter over a shared registry.
    pub fn new(registry: Arc<StatsRegistry>, report_interval: Duration) -> Self {
        StatsReporter {
            registry,
            report_interval,
        }
    }

    /// Spawns the background reporting thread.
    pub fn start_reporting(&self) {
        let registry = Arc::clone(&self.registry);
        let interval = self.report_interval;

        std::thread::spawn(move || {
            let mut system = System::new_all();
            let mut last_hashes = 0u64;
            let mut last_tick = Instant::now();

            loop {
                std::thread::sleep(interval);
                let snap = registry.snapshot();

                let window = last_tick.elapsed().as_secs_f64().max(0.001);
                let rate = snap.hashes_total.saturating_sub(last_hashes) as f64 / window;
                last_hashes = snap.hashes_total;
                last_tick = Instant::now();

                system.refresh_cpu_all();
                system.refresh_memory();
                let cpu_usage = if system.cpus().is_empty() {
                    0.0
                } else {
                    system.cpus().iter().map(|c| c.cpu_usage()).sum::<f32>()
                        / system.cpus().len() as f32
                };

                log::info!(
                    "{:.2} H/s | shares {}/{} ({} stale) | {} on {} | CPU {:.1}%",
                    rate,
                    snap.accepted,
                    snap.rejected,
                    snap.stale,
                    snap.algorithm
                        .map(|a| a.to_string())
                        .unwrap_or_else(|| "idle".into()),
                    snap.pool.as_deref().unwrap_or("no pool"),
                    cpu_usage,
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_worker() {
        let registry = StatsRegistry::new();
        let counters = registry.attach_workers(2);
        counters[0].record_hash();
        counters[0].record_hash();
        counters[1].record_share();

        let snap = registry.snapshot();
        assert_eq!(snap.workers.len(), 2);
        assert_eq!(snap.workers[0].hashes, 2);
        assert_eq!(snap.workers[1].shares, 1);
        assert_eq!(snap.hashes_total, 2);
    }

    #[test]
    fn reconfiguration_keeps_the_running_total() {
        let registry = StatsRegistry::new();
        let counters = registry.attach_workers(1);
        counters[0].record_hash();
        counters[0].record_hash();

        let counters = registry.attach_workers(4);
        counters[2].record_hash();

        let snap = registry.snapshot();
        assert_eq!(snap.workers.len(), 4);
        assert_eq!(snap.hashes_total, 3);

        registry.detach_workers();
        assert_eq!(registry.snapshot().hashes_total, 3);
        assert!(registry.snapshot().workers.is_empty());
    }

    #[test]
    fn share_outcomes_are_counted() {
        let registry = StatsRegistry::new();
        registry.record_accepted();
        registry.record_accepted();
        registry.record_rejected();
        registry.record_stale();

        let snap = registry.snapshot();
        assert_eq!(snap.accepted, 2);
        assert_eq!(snap.rejected, 1);
        assert_eq!(snap.stale, 1);
    }
}
