// src/miner/controller.rs
//! Mining controller
//!
//! Single authority for "what job is current" and "what algorithm is
//! active". Everything reaches it as a [`ControlEvent`] on one channel and
//! is handled on one control thread: jobs from the pool connection
//! manager, shares from the worker pool, reconfiguration and shutdown
//! from the embedding process. Worker reconfiguration is synchronous;
//! the control thread blocks until every old worker has exited before a
//! new generation starts.

use crate::config::Config;
use crate::hw::{CpuBind, HardwareTopology, OsCpuBind};
use crate::miner::algorithm::{self, AlgorithmFactory};
use crate::miner::autoconf::{self, ThreadDescriptor};
use crate::miner::backend::{Backend, CpuBackend};
use crate::miner::broadcast::{JobBroadcast, JobTemplate, Share};
use crate::network::PoolConnectionManager;
use crate::stats::{StatsRegistry, StatusSnapshot};
use crate::types::{AlgorithmType, BackendKind};
use crate::utils::error::MinerError;
use crossbeam_channel::{Receiver, Sender, never, select, unbounded};
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::watch;

/// Commands and events consumed by the control thread.
///
/// A closed tagged set; the pool layer, the worker pool and the embedding
/// process all talk to the controller exclusively through these.
pub enum ControlEvent {
    /// A job-notify arrived from the active pool
    Job(JobTemplate),
    /// The active connection is gone; idle the workers until a job
    /// arrives from the next one
    PoolSwitch,
    /// Replace the whole configuration
    Reconfigure(Box<Config>),
    /// Stop workers and exit the control loop
    Shutdown,
}

/// The control-plane orchestrator.
pub struct MiningController {
    config: Config,
    topology: HardwareTopology,
    broadcast: Arc<JobBroadcast>,
    bind: Arc<dyn CpuBind>,
    factory: AlgorithmFactory,
    stats: Arc<StatsRegistry>,
    submit: Sender<Share>,
    backends: BTreeMap<BackendKind, Box<dyn Backend>>,
    shares: Receiver<Share>,
    active_algorithm: Option<AlgorithmType>,
    active_descriptors: Vec<ThreadDescriptor>,
}

impl MiningController {
    /// Builds the controller and its backend set. No worker runs until
    /// [`run`](Self::run) starts the initial algorithm.
    pub fn new(
        config: Config,
        topology: HardwareTopology,
        broadcast: Arc<JobBroadcast>,
        bind: Arc<dyn CpuBind>,
        factory: AlgorithmFactory,
        stats: Arc<StatsRegistry>,
        submit: Sender<Share>,
    ) -> Self {
        let mut controller = MiningController {
            config,
            topology,
            broadcast,
            bind,
            factory,
            stats,
            submit,
            backends: BTreeMap::new(),
            shares: never(),
            active_algorithm: None,
            active_descriptors: Vec::new(),
        };
        controller.install_cpu_backend();
        controller
    }

    /// Control loop. Returns once a [`ControlEvent::Shutdown`] arrives or
    /// every event sender is gone.
    pub fn run(mut self, events: Receiver<ControlEvent>) {
        match self.config.initial_algorithm() {
            Ok(algorithm) => {
                if let Err(e) = self.ensure_algorithm(algorithm) {
                    warn!("Initial worker start failed: {}", e);
                }
            }
            Err(e) => warn!("No usable initial algorithm: {}", e),
        }

        loop {
            let shares = self.shares.clone();
            select! {
                recv(events) -> event => match event {
                    Ok(ControlEvent::Job(template)) => self.on_job_received(template),
                    Ok(ControlEvent::PoolSwitch) => self.on_pool_switch(),
                    Ok(ControlEvent::Reconfigure(config)) => self.on_reconfigure(*config),
                    Ok(ControlEvent::Shutdown) | Err(_) => break,
                },
                recv(shares) -> share => {
                    if let Ok(share) = share {
                        self.on_share_ready(share);
                        // batch whatever else the workers queued meanwhile
                        for queued in self.drain_worker_shares() {
                            self.on_share_ready(queued);
                        }
                    }
                }
            }
        }

        self.shutdown();
    }

    /// Validates the job against the running worker pool and publishes
    /// it. An algorithm mismatch rebuilds the pool synchronously first.
    pub(crate) fn on_job_received(&mut self, template: JobTemplate) {
        if self.active_algorithm != Some(template.algorithm) {
            info!(
                "Job {} switches the active algorithm to {}",
                template.id, template.algorithm
            );
            if let Err(e) = self.ensure_algorithm(template.algorithm) {
                error!(
                    "Worker reconfiguration for {} failed ({}), job dropped",
                    template.algorithm, e
                );
                return;
            }
        }

        let epoch = self.broadcast.publish(template);
        debug!("Published job under epoch {}", epoch);
    }

    /// Tags shares whose job was superseded and forwards everything to
    /// the submission layer. Staleness is the pool's call to make, not
    /// ours; some accept shares within a grace window.
    pub(crate) fn on_share_ready(&mut self, mut share: Share) {
        if share.job_epoch != self.broadcast.epoch() {
            share.stale = true;
            self.stats.record_stale();
            debug!(
                "Share for job {} is stale (epoch {} vs {})",
                share.job_id,
                share.job_epoch,
                self.broadcast.epoch()
            );
        }

        if self.submit.send(share).is_err() {
            warn!("Share submission channel closed");
        }
    }

    /// Failover teardown: no job is current until the next connection
    /// produces one. Workers park instead of grinding a dead target.
    pub(crate) fn on_pool_switch(&mut self) {
        self.broadcast.clear();
        debug!("Job torn down for pool switch, workers idle");
    }

    /// Full reconfiguration with rollback to the previous running state
    /// when the new configuration cannot start.
    pub(crate) fn on_reconfigure(&mut self, config: Config) {
        if let Err(e) = config.validate() {
            error!("Rejecting reconfiguration: {}", e);
            return;
        }

        let prev_config = self.config.clone();
        let prev = self
            .active_algorithm
            .map(|a| (a, std::mem::take(&mut self.active_descriptors)));

        self.teardown_workers();
        self.active_algorithm = None;
        self.config = config;
        self.install_cpu_backend();

        let target = match prev {
            Some((algorithm, _)) => Ok(algorithm),
            None => self.config.initial_algorithm(),
        };

        match target.and_then(|algorithm| self.ensure_algorithm(algorithm)) {
            Ok(()) => info!("Reconfiguration applied"),
            Err(e) => {
                error!(
                    "Reconfiguration failed ({}), restoring previous configuration",
                    e
                );
                self.config = prev_config;
                self.install_cpu_backend();
                if let Some((algorithm, descriptors)) = prev {
                    if let Err(restore) = self.start_workers(algorithm, descriptors) {
                        error!("Restore failed, mining idle: {}", restore);
                    }
                }
            }
        }
    }

    /// Rebuilds the worker pool for `algorithm` unless it already runs.
    /// On failure the previous pool is restarted, so the system is never
    /// left half-started.
    fn ensure_algorithm(&mut self, algorithm: AlgorithmType) -> Result<(), MinerError> {
        let (descriptors, fell_back) =
            autoconf::derive_or_fallback(algorithm, &self.topology, &self.config.cpu);
        if fell_back {
            // regenerated list should reach the persisted config
            self.config.cpu.should_save = true;
        }

        if descriptors.is_empty() {
            self.teardown_workers();
            self.active_algorithm = None;
            self.active_descriptors.clear();
            self.stats.set_algorithm(None);
            return Ok(());
        }

        let prev = self
            .active_algorithm
            .map(|a| (a, self.active_descriptors.clone()));

        match self.start_workers(algorithm, descriptors) {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Some((prev_algorithm, prev_descriptors)) = prev {
                    warn!(
                        "Falling back to the previous {} worker pool",
                        prev_algorithm
                    );
                    if let Err(rollback) = self.start_workers(prev_algorithm, prev_descriptors) {
                        error!("Rollback failed, mining idle: {}", rollback);
                        self.active_algorithm = None;
                        self.active_descriptors.clear();
                        self.stats.set_algorithm(None);
                    }
                }
                Err(e)
            }
        }
    }

    /// Stops the old generation (joining every worker) and starts the new
    /// one. Bookkeeping only changes when the start succeeds.
    fn start_workers(
        &mut self,
        algorithm: AlgorithmType,
        descriptors: Vec<ThreadDescriptor>,
    ) -> Result<(), MinerError> {
        self.teardown_workers();

        let backend = self
            .backends
            .get_mut(&BackendKind::Cpu)
            .expect("cpu backend registered");
        backend.start(algorithm, &descriptors)?;

        self.active_algorithm = Some(algorithm);
        self.active_descriptors = descriptors;
        self.stats.set_algorithm(Some(algorithm));
        Ok(())
    }

    /// Clears the broadcast first so in-flight passes abandon, then stops
    /// and joins every backend. No worker of the old generation survives
    /// this call.
    fn teardown_workers(&mut self) {
        self.broadcast.clear();
        for backend in self.backends.values_mut() {
            backend.stop();
        }
    }

    fn drain_worker_shares(&mut self) -> Vec<Share> {
        self.backends
            .values_mut()
            .flat_map(|b| b.drain_shares())
            .collect()
    }

    fn install_cpu_backend(&mut self) {
        let backend = CpuBackend::new(
            self.config.cpu.clone(),
            self.topology.clone(),
            Arc::clone(&self.factory),
            Arc::clone(&self.broadcast),
            Arc::clone(&self.bind),
            Arc::clone(&self.stats),
        );
        self.shares = backend.share_receiver();
        self.backends.insert(BackendKind::Cpu, Box::new(backend));
    }

    pub(crate) fn shutdown(&mut self) {
        self.teardown_workers();
        self.active_algorithm = None;
        self.stats.set_algorithm(None);
        info!("Controller stopped");
    }

    #[cfg(test)]
    fn cpu_worker_count(&self) -> usize {
        self.backends
            .get(&BackendKind::Cpu)
            .map(|b| b.worker_count())
            .unwrap_or(0)
    }
}

/// Entry point tying the controller, worker pool and pool connection
/// manager together.
pub struct Miner;

impl Miner {
    /// Detects the hardware and starts mining with the production
    /// algorithm implementations and OS thread binding.
    pub fn start(config: Config) -> Result<MinerHandle, MinerError> {
        let topology = HardwareTopology::detect();
        info!(
            "Detected {} ({} cores, {} MiB L3{})",
            topology.cpu_brand,
            topology.logical_cores,
            topology.l3_bytes >> 20,
            if topology.has_aes { ", hw AES" } else { "" },
        );
        Self::start_with(
            config,
            topology,
            Arc::new(OsCpuBind),
            algorithm::default_factory(),
        )
    }

    /// Starts mining against an explicit topology, binding and algorithm
    /// factory. The seams exist for embedding and tests; production use
    /// goes through [`Miner::start`].
    pub fn start_with(
        config: Config,
        topology: HardwareTopology,
        bind: Arc<dyn CpuBind>,
        factory: AlgorithmFactory,
    ) -> Result<MinerHandle, MinerError> {
        config.validate()?;
        if !config.cpu.is_hw_aes(&topology) {
            warn!("Hardware AES unavailable or disabled, hashing takes the software path");
        }

        let stats = StatsRegistry::new();
        let broadcast = Arc::new(JobBroadcast::new());
        let (event_tx, event_rx) = unbounded();
        let (submit_tx, submit_rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let runtime = tokio::runtime::Runtime::new()?;
        let pools = config.pools.clone();
        let retry = config.retry.clone();
        let manager_events = event_tx.clone();
        let manager_stats = Arc::clone(&stats);
        let network = std::thread::Builder::new()
            .name("pool-net".into())
            .spawn(move || {
                runtime.block_on(async move {
                    let manager = PoolConnectionManager::new(
                        pools,
                        retry,
                        manager_events,
                        submit_rx,
                        manager_stats,
                        shutdown_rx,
                    );
                    manager.run().await;
                });
            })?;

        let controller = MiningController::new(
            config,
            topology,
            broadcast,
            bind,
            factory,
            Arc::clone(&stats),
            submit_tx,
        );
        let control = std::thread::Builder::new()
            .name("controller".into())
            .spawn(move || controller.run(event_rx))?;

        Ok(MinerHandle {
            events: event_tx,
            stats,
            shutdown: shutdown_tx,
            control: Some(control),
            network: Some(network),
        })
    }
}

/// Handle held by the embedding process: command channel in, status out.
pub struct MinerHandle {
    events: Sender<ControlEvent>,
    stats: Arc<StatsRegistry>,
    shutdown: watch::Sender<bool>,
    control: Option<JoinHandle<()>>,
    network: Option<JoinHandle<()>>,
}

impl MinerHandle {
    /// Read-only status snapshot: pool, algorithm, connection state and
    /// per-thread counters.
    pub fn status(&self) -> StatusSnapshot {
        self.stats.snapshot()
    }

    /// Shared statistics registry, e.g. for a periodic reporter.
    pub fn stats(&self) -> Arc<StatsRegistry> {
        Arc::clone(&self.stats)
    }

    /// Applies a new configuration; the controller validates and swaps
    /// worker pools, rolling back on failure.
    pub fn reconfigure(&self, config: Config) -> Result<(), MinerError> {
        config.validate()?;
        self.events.send(ControlEvent::Reconfigure(Box::new(config)))?;
        Ok(())
    }

    /// Stops mining and joins the control and network threads.
    pub fn stop(mut self) {
        let _ = self.shutdown.send(true);
        let _ = self.events.send(ControlEvent::Shutdown);
        if let Some(handle) = self.control.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.network.take() {
            let _ = handle.join();
        }
    }
}
