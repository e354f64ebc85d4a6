// src/miner/worker.rs
//! Worker thread loop
//!
//! Each worker owns one interleaved slice of the nonce space for the
//! current job: worker `i` of `n` tries `i`, `i + n`, `i + 2n`, ... so the
//! union over all workers partitions the space with no overlap. A pass
//! runs until the broadcast epoch moves or the pool is stopped; the only
//! shared reads on the hot path are the job handle and the epoch counter.

use crate::hw::CpuBind;
use crate::miner::algorithm::Algorithm;
use crate::miner::autoconf::ThreadDescriptor;
use crate::miner::broadcast::{JobBroadcast, Share};
use crate::miner::memory::PoolSlot;
use crate::stats::WorkerCounters;
use crossbeam_channel::Sender;
use log::error;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Nonces hashed between yield points, scaled by descriptor intensity.
const PASS_LEN: u64 = 4096;

/// How long an idle worker sleeps when no job is published.
const IDLE_WAIT: Duration = Duration::from_millis(50);

/// The nonce worker `index` of `total` tries on step `k`.
///
/// Deterministic and pairwise disjoint across workers for a fixed pool
/// size; this is the invariant that keeps workers from duplicating each
/// other's search space.
#[inline]
pub fn assigned_nonce(index: usize, total: usize, k: u64) -> u64 {
    index as u64 + k * total as u64
}

/// Everything one worker thread needs. Built by the pool at spawn time;
/// the memory slot reservation is held for the worker's whole life.
pub(crate) struct WorkerContext {
    pub descriptor: ThreadDescriptor,
    pub total_workers: usize,
    pub algorithm: Arc<dyn Algorithm + Send + Sync>,
    pub broadcast: Arc<JobBroadcast>,
    pub shares: Sender<Share>,
    pub stop: Arc<AtomicBool>,
    pub bind: Arc<dyn CpuBind>,
    pub priority: i32,
    pub yield_between_passes: bool,
    pub counters: Arc<WorkerCounters>,
    #[allow(dead_code)] // held so the slot returns to the pool on exit
    pub slot: PoolSlot,
}

/// Worker thread entry point.
pub(crate) fn run(ctx: WorkerContext) {
    if let Some(core) = ctx.descriptor.affinity {
        ctx.bind.set_affinity(core);
    }
    ctx.bind.set_priority(ctx.priority);

    let index = ctx.descriptor.index;
    let stride = ctx.total_workers.max(1);
    let pass_len = PASS_LEN * ctx.descriptor.intensity.max(1) as u64;

    'idle: while !ctx.stop.load(Ordering::Acquire) {
        let Some((job, epoch)) = ctx.broadcast.current() else {
            std::thread::sleep(IDLE_WAIT);
            continue;
        };

        let mut k: u64 = 0;
        loop {
            for _ in 0..pass_len {
                if ctx.broadcast.epoch() != epoch {
                    // job superseded mid-pass: abandon and re-read
                    continue 'idle;
                }

                let nonce = assigned_nonce(index, stride, k);
                k += 1;

                match ctx.algorithm.hash(&job.blob, nonce) {
                    Ok(digest) => {
                        ctx.counters.record_hash();
                        if digest.as_slice() < job.target.as_slice() {
                            ctx.counters.record_share();
                            let _ = ctx.shares.send(Share {
                                job_id: job.id.clone(),
                                job_epoch: epoch,
                                nonce,
                                result: digest,
                                worker_index: index,
                                stale: false,
                            });
                        }
                    }
                    Err(e) => error!("Worker {}: hashing failed: {}", index, e),
                }
            }

            if ctx.stop.load(Ordering::Acquire) {
                break 'idle;
            }
            if ctx.yield_between_passes {
                std::thread::yield_now();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn nonce_partition_is_disjoint() {
        let total = 4;
        let mut seen = HashSet::new();
        for index in 0..total {
            for k in 0..1000 {
                assert!(
                    seen.insert(assigned_nonce(index, total, k)),
                    "worker {} step {} duplicated a nonce",
                    index,
                    k
                );
            }
        }
        assert_eq!(seen.len(), total * 1000);
    }

    #[test]
    fn nonce_partition_is_deterministic() {
        for index in 0..8 {
            for k in [0u64, 1, 17, 1_000_003] {
                assert_eq!(
                    assigned_nonce(index, 8, k),
                    assigned_nonce(index, 8, k)
                );
                assert_eq!(assigned_nonce(index, 8, k), index as u64 + k * 8);
            }
        }
    }

    #[test]
    fn partition_covers_a_prefix_without_gaps() {
        // first total*k nonces are exactly 0..total*k
        let total = 3;
        let steps = 100;
        let mut all: Vec<u64> = (0..total)
            .flat_map(|i| (0..steps).map(move |k| assigned_nonce(i, total, k)))
            .collect();
        all.sort_unstable();
        let expected: Vec<u64> = (0..(total as u64 * steps)).collect();
        assert_eq!(all, expected);
    }
}
