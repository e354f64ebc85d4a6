// src/miner/memory.rs
//! Scratchpad slot pool
//!
//! Bookkeeping for the per-worker scratchpad backing store. Slots are
//! reserved up front during worker-pool startup so that an undersized
//! pool fails the whole start atomically instead of leaving a subset of
//! workers running.

use crate::config::CpuConfig;
use crate::hw::HardwareTopology;
use crate::types::AlgorithmType;
use crate::utils::error::MinerError;
use log::{info, warn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Fixed set of scratchpad slots for one worker-pool generation.
///
/// A capacity of zero means pooling is disabled and every worker gets a
/// dedicated, uncounted reservation.
pub struct MemoryPool {
    slot_bytes: usize,
    capacity: usize,
    huge_pages: bool,
    free: Mutex<Vec<usize>>,
    next_dedicated: AtomicUsize,
}

/// A reserved slot. Returns itself to the pool on drop, which is what lets
/// a torn-down worker pool hand its memory to the next generation.
pub struct PoolSlot {
    id: usize,
    pool: Arc<MemoryPool>,
}

impl PoolSlot {
    /// Slot index within the pool.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Scratchpad size this slot stands for.
    pub fn bytes(&self) -> usize {
        self.pool.slot_bytes
    }
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        self.pool.release(self.id);
    }
}

impl MemoryPool {
    /// Sizes a pool for one algorithm on one machine.
    ///
    /// Huge-page backing is requested per config; when the free budget
    /// cannot cover the pool the request degrades to regular pages with a
    /// warning rather than failing, matching how miners behave on hosts
    /// without reserved huge pages.
    pub fn new(cpu: &CpuConfig, topo: &HardwareTopology, algorithm: AlgorithmType) -> Arc<Self> {
        let capacity = cpu.memory_pool_size(topo);
        let slot_bytes = algorithm.working_set_bytes();

        let mut huge_pages = cpu.huge_pages.is_enabled();
        if huge_pages && capacity > 0 && !topo.can_back_with_huge_pages(capacity * slot_bytes) {
            warn!(
                "Huge-page budget too small for {} x {} KiB, falling back to regular pages",
                capacity,
                slot_bytes / 1024
            );
            huge_pages = false;
        }

        if capacity > 0 {
            info!(
                "Memory pool: {} slots x {} KiB ({})",
                capacity,
                slot_bytes / 1024,
                if huge_pages { "huge pages" } else { "regular pages" }
            );
        }

        Arc::new(MemoryPool {
            slot_bytes,
            capacity,
            huge_pages,
            free: Mutex::new((0..capacity).rev().collect()),
            next_dedicated: AtomicUsize::new(0),
        })
    }

    /// Reserves one slot.
    ///
    /// With pooling enabled this is the point where an undersized
    /// `memory-pool` setting surfaces as `ResourceExhausted`.
    pub fn reserve(self: &Arc<Self>) -> Result<PoolSlot, MinerError> {
        if self.capacity == 0 {
            let id = self.next_dedicated.fetch_add(1, Ordering::Relaxed);
            return Ok(PoolSlot {
                id,
                pool: Arc::clone(self),
            });
        }

        let id = self
            .free
            .lock()
            .expect("memory pool free list poisoned")
            .pop()
            .ok_or_else(|| {
                MinerError::ResourceExhausted(format!(
                    "Memory pool exhausted: all {} slots reserved",
                    self.capacity
                ))
            })?;

        Ok(PoolSlot {
            id,
            pool: Arc::clone(self),
        })
    }

    fn release(&self, id: usize) {
        if self.capacity == 0 {
            return;
        }
        self.free
            .lock()
            .expect("memory pool free list poisoned")
            .push(id);
    }

    /// Configured slot count; 0 when pooling is disabled.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently unreserved.
    pub fn available(&self) -> usize {
        if self.capacity == 0 {
            return usize::MAX;
        }
        self.free
            .lock()
            .expect("memory pool free list poisoned")
            .len()
    }

    /// Whether the pool ended up on huge pages.
    pub fn uses_huge_pages(&self) -> bool {
        self.huge_pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryPoolSetting;
    use crate::hw::topology::test_topology;

    fn pool_with(slots: i64, cores: usize, l3_mib: usize) -> Arc<MemoryPool> {
        let mut cpu = CpuConfig::default();
        cpu.memory_pool = MemoryPoolSetting::Slots(slots);
        MemoryPool::new(&cpu, &test_topology(cores, l3_mib), AlgorithmType::RandomX)
    }

    #[test]
    fn auto_size_follows_cores_and_l3() {
        let pool = pool_with(-1, 8, 16);
        assert_eq!(pool.capacity(), 8);

        let pool = pool_with(-1, 4, 32);
        assert_eq!(pool.capacity(), 16);
    }

    #[test]
    fn exhaustion_is_an_error() {
        let pool = pool_with(2, 8, 16);
        let a = pool.reserve().unwrap();
        let _b = pool.reserve().unwrap();
        assert!(matches!(
            pool.reserve(),
            Err(MinerError::ResourceExhausted(_))
        ));

        // releasing a slot makes it reservable again
        drop(a);
        assert!(pool.reserve().is_ok());
    }

    #[test]
    fn disabled_pool_never_exhausts() {
        let pool = pool_with(0, 2, 4);
        assert_eq!(pool.capacity(), 0);
        for _ in 0..64 {
            // leak-free: slots drop immediately
            assert!(pool.reserve().is_ok());
        }
    }

    #[test]
    fn huge_pages_fall_back_when_budget_is_short() {
        let mut cpu = CpuConfig::default();
        cpu.memory_pool = MemoryPoolSetting::Slots(4);
        let mut topo = test_topology(4, 8);
        topo.huge_page_bytes = 2 * 1024 * 1024; // one slot worth
        let pool = MemoryPool::new(&cpu, &topo, AlgorithmType::RandomX);
        assert!(!pool.uses_huge_pages());

        topo.huge_page_bytes = 64 * 1024 * 1024;
        let pool = MemoryPool::new(&cpu, &topo, AlgorithmType::RandomX);
        assert!(pool.uses_huge_pages());
    }
}
