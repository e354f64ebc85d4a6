// src/miner/autoconf.rs
//! Thread auto-configuration
//!
//! Pure derivation from `(algorithm, topology, cpu config)` to a concrete
//! descriptor list. No side effects and no ambient lookups, which is what
//! makes the output reproducible for a given machine and config pair.

use crate::config::CpuConfig;
use crate::hw::HardwareTopology;
use crate::types::AlgorithmType;
use crate::utils::error::MinerError;
use log::warn;
use std::collections::HashSet;

/// Launch parameters for one worker thread.
///
/// Produced once per `(algorithm, hardware)` pair and immutable for the
/// lifetime of the worker pool built from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadDescriptor {
    /// Worker index, also the nonce-stride offset
    pub index: usize,
    /// Logical core to pin to, `None` = leave unpinned
    pub affinity: Option<usize>,
    /// Planned scratchpad slot
    pub memory_pool_slot: usize,
    /// Nonce batch multiplier
    pub intensity: u32,
}

/// Derives the descriptor list for an algorithm on a machine.
///
/// An explicit per-algorithm thread list wins and is used verbatim after
/// validation; otherwise the count comes from the core count bounded by
/// how many working sets fit in L3, capped by `max-threads-hint` and
/// `max-cpu-usage`. The result is never empty while the backend is
/// enabled and at least one core exists.
pub fn derive(
    algorithm: AlgorithmType,
    topo: &HardwareTopology,
    cpu: &CpuConfig,
) -> Result<Vec<ThreadDescriptor>, MinerError> {
    if !cpu.enabled {
        return Ok(Vec::new());
    }

    if let Some(entries) = cpu.explicit_threads(algorithm) {
        return from_explicit(entries, cpu, topo);
    }

    Ok(auto_derive(algorithm, topo, cpu))
}

/// Runtime variant: a broken explicit list falls back to auto-derivation
/// instead of failing the reconfiguration. Returns whether the fallback
/// fired so the caller can flag the config for persistence.
pub fn derive_or_fallback(
    algorithm: AlgorithmType,
    topo: &HardwareTopology,
    cpu: &CpuConfig,
) -> (Vec<ThreadDescriptor>, bool) {
    match derive(algorithm, topo, cpu) {
        Ok(descriptors) => (descriptors, false),
        Err(e) => {
            warn!(
                "Explicit thread list for {} rejected ({}), regenerating",
                algorithm, e
            );
            (auto_derive(algorithm, topo, cpu), true)
        }
    }
}

fn from_explicit(
    entries: &[crate::config::ThreadEntry],
    cpu: &CpuConfig,
    topo: &HardwareTopology,
) -> Result<Vec<ThreadDescriptor>, MinerError> {
    let mut seen = HashSet::new();
    for entry in entries {
        if entry.intensity == 0 {
            return Err(MinerError::ConfigError(
                "Thread intensity must be at least 1".into(),
            ));
        }
        if let Some(core) = entry.affinity {
            if core >= topo.logical_cores {
                return Err(MinerError::ConfigError(format!(
                    "Thread affinity {} exceeds core count {}",
                    core, topo.logical_cores
                )));
            }
            if !seen.insert(core) && !cpu.oversubscribe {
                return Err(MinerError::ConfigError(format!(
                    "Duplicate thread affinity {} without oversubscribe",
                    core
                )));
            }
        }
    }

    Ok(entries
        .iter()
        .enumerate()
        .map(|(index, entry)| ThreadDescriptor {
            index,
            affinity: entry.affinity,
            memory_pool_slot: index,
            intensity: entry.intensity,
        })
        .collect())
}

fn auto_derive(
    algorithm: AlgorithmType,
    topo: &HardwareTopology,
    cpu: &CpuConfig,
) -> Vec<ThreadDescriptor> {
    let cores = topo.logical_cores.max(1);

    // one working set per cache share; a bigger working set admits fewer
    // concurrent threads per cache domain
    let cache_limit = (topo.l3_bytes / algorithm.working_set_bytes()).max(1);
    let mut count = cores.min(cache_limit);

    if cpu.max_threads_hint < 100 {
        count = (count * cpu.max_threads_hint as usize / 100).max(1);
    }
    if cpu.max_cpu_usage >= 0 {
        count = count.min((cores * cpu.max_cpu_usage as usize / 100).max(1));
    }

    // slot ids are planned one-to-one; an undersized explicit memory-pool
    // surfaces as ResourceExhausted when the pool reserves at startup
    (0..count)
        .map(|index| ThreadDescriptor {
            index,
            affinity: Some(index % cores),
            memory_pool_slot: index,
            intensity: 1,
        })
        .collect()
}
