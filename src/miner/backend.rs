// src/miner/backend.rs
//! Worker pool backends
//!
//! [`Backend`] is the capability seam the controller drives: start a set
//! of descriptors, stop, drain shares. [`CpuBackend`] is the one concrete
//! implementation; it owns the worker threads for the active algorithm
//! and guarantees all-or-nothing startup and join-before-return teardown.

use crate::config::CpuConfig;
use crate::hw::{CpuBind, HardwareTopology};
use crate::miner::algorithm::AlgorithmFactory;
use crate::miner::autoconf::ThreadDescriptor;
use crate::miner::broadcast::{JobBroadcast, Share};
use crate::miner::memory::MemoryPool;
use crate::miner::worker::{self, WorkerContext};
use crate::stats::StatsRegistry;
use crate::types::{AlgorithmType, BackendKind};
use crate::utils::error::MinerError;
use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, error, info};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

/// Common surface of a mining backend.
///
/// One instance runs at most one worker generation at a time; `start`
/// after `stop` builds a fresh generation for a possibly different
/// algorithm.
pub trait Backend: Send {
    /// Which device family this backend drives.
    fn kind(&self) -> BackendKind;

    /// Spawns one worker per descriptor. All-or-nothing: any reservation
    /// or spawn failure stops whatever was already started and returns
    /// the error.
    fn start(
        &mut self,
        algorithm: AlgorithmType,
        descriptors: &[ThreadDescriptor],
    ) -> Result<(), MinerError>;

    /// Signals every worker and joins them. Returns only once no worker
    /// thread of this generation remains alive.
    fn stop(&mut self);

    /// All shares produced since the last drain, in per-worker production
    /// order, interleaved across workers by arrival.
    fn drain_shares(&mut self) -> Vec<Share>;

    /// Channel the controller can select on for share arrival.
    fn share_receiver(&self) -> Receiver<Share>;

    /// Workers currently running.
    fn worker_count(&self) -> usize;
}

/// CPU worker pool.
pub struct CpuBackend {
    cpu: CpuConfig,
    topology: HardwareTopology,
    factory: AlgorithmFactory,
    broadcast: Arc<JobBroadcast>,
    bind: Arc<dyn CpuBind>,
    stats: Arc<StatsRegistry>,
    share_tx: Sender<Share>,
    share_rx: Receiver<Share>,
    stop_flag: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl CpuBackend {
    /// Builds an idle backend; no threads run until `start`.
    pub fn new(
        cpu: CpuConfig,
        topology: HardwareTopology,
        factory: AlgorithmFactory,
        broadcast: Arc<JobBroadcast>,
        bind: Arc<dyn CpuBind>,
        stats: Arc<StatsRegistry>,
    ) -> Self {
        let (share_tx, share_rx) = unbounded();
        CpuBackend {
            cpu,
            topology,
            factory,
            broadcast,
            bind,
            stats,
            share_tx,
            share_rx,
            stop_flag: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        }
    }
}

impl Backend for CpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn start(
        &mut self,
        algorithm: AlgorithmType,
        descriptors: &[ThreadDescriptor],
    ) -> Result<(), MinerError> {
        if !self.handles.is_empty() {
            return Err(MinerError::ConfigError(
                "Worker pool already running; stop before start".into(),
            ));
        }
        if descriptors.is_empty() {
            return Ok(());
        }

        let algorithm = (self.factory)(algorithm, &self.cpu)?;

        // reserve every scratchpad slot before the first spawn so an
        // undersized pool fails the whole start, not worker k of n
        let memory = MemoryPool::new(&self.cpu, &self.topology, algorithm.algorithm_type());
        let slots = descriptors
            .iter()
            .map(|_| memory.reserve())
            .collect::<Result<Vec<_>, _>>()?;

        self.stop_flag = Arc::new(AtomicBool::new(false));
        let counters = self.stats.attach_workers(descriptors.len());

        for ((descriptor, slot), counter) in descriptors.iter().zip(slots).zip(counters) {
            let ctx = WorkerContext {
                descriptor: *descriptor,
                total_workers: descriptors.len(),
                algorithm: Arc::clone(&algorithm),
                broadcast: Arc::clone(&self.broadcast),
                shares: self.share_tx.clone(),
                stop: Arc::clone(&self.stop_flag),
                bind: Arc::clone(&self.bind),
                priority: self.cpu.priority,
                yield_between_passes: self.cpu.thread_yield,
                counters: counter,
                slot,
            };

            let spawned = std::thread::Builder::new()
                .name(format!("worker-{}", descriptor.index))
                .spawn(move || worker::run(ctx));

            match spawned {
                Ok(handle) => self.handles.push(handle),
                Err(e) => {
                    self.stop();
                    return Err(MinerError::IoError(e));
                }
            }
        }

        info!(
            "Started {} {} worker(s) for {}",
            self.handles.len(),
            self.kind(),
            algorithm.algorithm_type(),
        );
        Ok(())
    }

    fn stop(&mut self) {
        if self.handles.is_empty() {
            return;
        }

        self.stop_flag.store(true, Ordering::Release);
        for handle in self.handles.drain(..) {
            // a worker that never observes the flag is a bug, not a
            // condition to time out around
            if handle.join().is_err() {
                // workers are not supervised; a panic here is operator
                // visible and the process is expected to come down
                error!("Worker thread panicked during teardown");
            }
        }
        self.stats.detach_workers();
        debug!("All {} workers joined", self.kind());
    }

    fn drain_shares(&mut self) -> Vec<Share> {
        self.share_rx.try_iter().collect()
    }

    fn share_receiver(&self) -> Receiver<Share> {
        self.share_rx.clone()
    }

    fn worker_count(&self) -> usize {
        self.handles.len()
    }
}

impl Drop for CpuBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryPoolSetting;
    use crate::hw::NullBind;
    use crate::hw::topology::test_topology;
    use crate::miner::algorithm::testing::TestAlgo;
    use crate::miner::autoconf;
    use crate::miner::broadcast::test_template;
    use std::collections::HashSet;
    use std::time::Duration;

    fn test_factory() -> AlgorithmFactory {
        Arc::new(|algorithm, _cpu| Ok(Arc::new(TestAlgo(algorithm)) as _))
    }

    fn backend_with(cpu: CpuConfig, cores: usize, l3_mib: usize) -> (CpuBackend, Arc<JobBroadcast>) {
        let broadcast = Arc::new(JobBroadcast::new());
        let backend = CpuBackend::new(
            cpu,
            test_topology(cores, l3_mib),
            test_factory(),
            Arc::clone(&broadcast),
            Arc::new(NullBind),
            StatsRegistry::new(),
        );
        (backend, broadcast)
    }

    fn descriptors(cpu: &CpuConfig, cores: usize, l3_mib: usize) -> Vec<ThreadDescriptor> {
        autoconf::derive(
            AlgorithmType::RandomX,
            &test_topology(cores, l3_mib),
            cpu,
        )
        .unwrap()
    }

    #[test]
    fn start_then_stop_leaves_no_threads() {
        let cpu = CpuConfig::default();
        let (mut backend, _broadcast) = backend_with(cpu.clone(), 2, 8);
        let descriptors = descriptors(&cpu, 2, 8);

        backend.start(AlgorithmType::RandomX, &descriptors).unwrap();
        assert_eq!(backend.worker_count(), 2);

        backend.stop();
        assert_eq!(backend.worker_count(), 0);
    }

    #[test]
    fn undersized_memory_pool_aborts_startup_atomically() {
        let mut cpu = CpuConfig::default();
        cpu.memory_pool = MemoryPoolSetting::Slots(1);
        let (mut backend, _broadcast) = backend_with(cpu.clone(), 4, 64);
        let descriptors = descriptors(&cpu, 4, 64);
        assert!(descriptors.len() > 1);

        let err = backend
            .start(AlgorithmType::RandomX, &descriptors)
            .unwrap_err();
        assert!(matches!(err, MinerError::ResourceExhausted(_)));
        assert_eq!(backend.worker_count(), 0, "nothing may stay half-started");
    }

    #[test]
    fn double_start_is_rejected() {
        let cpu = CpuConfig::default();
        let (mut backend, _broadcast) = backend_with(cpu.clone(), 2, 8);
        let descriptors = descriptors(&cpu, 2, 8);

        backend.start(AlgorithmType::RandomX, &descriptors).unwrap();
        assert!(backend.start(AlgorithmType::RandomX, &descriptors).is_err());
        backend.stop();
    }

    #[test]
    fn workers_mine_disjoint_nonces_under_one_epoch() {
        let cpu = CpuConfig::default();
        let (mut backend, broadcast) = backend_with(cpu.clone(), 2, 8);
        let descriptors = descriptors(&cpu, 2, 8);
        let total = descriptors.len();

        backend.start(AlgorithmType::RandomX, &descriptors).unwrap();

        let mut template = test_template("job-1", AlgorithmType::RandomX);
        // accept roughly 1/64 of attempts to keep the share volume sane
        template.target = vec![0x02; 32];
        let epoch = broadcast.publish(template);

        std::thread::sleep(Duration::from_millis(50));
        broadcast.clear();
        backend.stop();

        let shares = backend.drain_shares();
        assert!(!shares.is_empty(), "workers should have found shares");

        let mut seen = HashSet::new();
        for share in &shares {
            assert_eq!(share.job_id, "job-1");
            assert_eq!(share.job_epoch, epoch);
            assert!(share.worker_index < total);
            assert!(
                seen.insert(share.nonce),
                "nonce {} was searched twice",
                share.nonce
            );
        }
    }

    #[test]
    fn no_shares_for_a_superseded_epoch_after_teardown() {
        let cpu = CpuConfig::default();
        let (mut backend, broadcast) = backend_with(cpu.clone(), 2, 8);
        let descriptors = descriptors(&cpu, 2, 8);

        backend.start(AlgorithmType::RandomX, &descriptors).unwrap();

        let mut template = test_template("old", AlgorithmType::RandomX);
        template.target = vec![0x02; 32];
        let old_epoch = broadcast.publish(template);
        std::thread::sleep(Duration::from_millis(20));

        // teardown: clear cancels in-flight passes, stop joins
        broadcast.clear();
        backend.stop();
        let _ = backend.drain_shares();

        // a fresh generation on a new job must never emit the old epoch
        let mut template = test_template("new", AlgorithmType::RandomX);
        template.target = vec![0x02; 32];
        broadcast.publish(template);
        backend.start(AlgorithmType::RandomX, &descriptors).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        broadcast.clear();
        backend.stop();

        for share in backend.drain_shares() {
            assert_ne!(share.job_epoch, old_epoch);
            assert_eq!(share.job_id, "new");
        }
    }

    #[test]
    fn empty_descriptor_set_is_a_noop() {
        let mut cpu = CpuConfig::default();
        cpu.enabled = false;
        let (mut backend, _broadcast) = backend_with(cpu.clone(), 2, 8);
        backend.start(AlgorithmType::RandomX, &[]).unwrap();
        assert_eq!(backend.worker_count(), 0);
    }
}
