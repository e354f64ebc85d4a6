// src/miner/broadcast.rs
//! Job types and the single-writer/multi-reader job hand-off
//!
//! Workers must not contend on a lock per nonce attempt, so the current
//! job travels through an atomically swapped `Arc` plus an epoch counter.
//! The controller is the only writer; workers only ever load.

use crate::types::AlgorithmType;
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A job as decoded from a pool notification, before the controller has
/// stamped an epoch on it.
#[derive(Debug, Clone)]
pub struct JobTemplate {
    /// Pool-assigned job identifier
    pub id: String,
    /// Algorithm the job must be hashed with
    pub algorithm: AlgorithmType,
    /// Opaque block data blob
    pub blob: Vec<u8>,
    /// Difficulty threshold; a hash below this is a share
    pub target: Vec<u8>,
    /// Block height, informational
    pub height: u64,
    /// Index of the endpoint the job arrived from
    pub pool_id: usize,
}

/// The published form of a job. Immutable once it leaves
/// [`JobBroadcast::publish`]; workers only read it.
#[derive(Debug, Clone)]
pub struct Job {
    /// Pool-assigned job identifier
    pub id: String,
    /// Algorithm the job must be hashed with
    pub algorithm: AlgorithmType,
    /// Opaque block data blob
    pub blob: Vec<u8>,
    /// Difficulty threshold
    pub target: Vec<u8>,
    /// Block height
    pub height: u64,
    /// Index of the endpoint the job arrived from
    pub pool_id: usize,
    /// Monotonic publication counter, strictly greater than every job
    /// published before it
    pub epoch: u64,
}

/// A candidate found by one worker.
#[derive(Debug, Clone)]
pub struct Share {
    /// Job this share was computed against
    pub job_id: String,
    /// Epoch the job carried when the worker read it
    pub job_epoch: u64,
    /// Nonce that produced the result
    pub nonce: u64,
    /// Resulting digest below the job target
    pub result: [u8; 32],
    /// Worker that found it
    pub worker_index: usize,
    /// Set by the controller when the job was superseded before the share
    /// was drained. Forwarded anyway; the pool decides what a grace window
    /// allows.
    pub stale: bool,
}

/// Lock-minimal hand-off slot for the current job.
///
/// `publish` swaps a fresh `Arc<Job>` in, so a reader mid-way through the
/// old value keeps a complete, untorn job and merely notices the epoch
/// moved on its next check. The epoch also advances on [`clear`], which is
/// how a pool switch cancels in-flight search passes.
///
/// [`clear`]: JobBroadcast::clear
pub struct JobBroadcast {
    slot: ArcSwapOption<Job>,
    epoch: AtomicU64,
}

impl JobBroadcast {
    /// Creates an empty broadcast; `current()` yields `None` until the
    /// first publish.
    pub fn new() -> Self {
        JobBroadcast {
            slot: ArcSwapOption::empty(),
            epoch: AtomicU64::new(0),
        }
    }

    /// Publishes a job under a freshly incremented epoch and returns that
    /// epoch. Single writer: only the controller calls this.
    pub fn publish(&self, template: JobTemplate) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let job = Job {
            id: template.id,
            algorithm: template.algorithm,
            blob: template.blob,
            target: template.target,
            height: template.height,
            pool_id: template.pool_id,
            epoch,
        };
        self.slot.store(Some(Arc::new(job)));
        epoch
    }

    /// Tears the current job down without publishing a successor. Workers
    /// observe `None` and park until the next publish. The epoch still
    /// advances so passes against the torn-down job abandon promptly.
    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.slot.store(None);
    }

    /// Non-blocking read of the current job and its epoch.
    pub fn current(&self) -> Option<(Arc<Job>, u64)> {
        let job = self.slot.load_full()?;
        let epoch = job.epoch;
        Some((job, epoch))
    }

    /// Latest epoch; cheap enough for per-nonce staleness checks.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }
}

impl Default for JobBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) fn test_template(id: &str, algorithm: AlgorithmType) -> JobTemplate {
    JobTemplate {
        id: id.into(),
        algorithm,
        blob: vec![0u8; 76],
        target: vec![0xff; 32],
        height: 1,
        pool_id: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_until_first_publish() {
        let bc = JobBroadcast::new();
        assert!(bc.current().is_none());
        assert_eq!(bc.epoch(), 0);
    }

    #[test]
    fn publish_is_strictly_monotonic() {
        let bc = JobBroadcast::new();
        let mut last = 0;
        for i in 0..100 {
            let epoch = bc.publish(test_template(&format!("job-{}", i), AlgorithmType::RandomX));
            assert!(epoch > last);
            last = epoch;
            let (job, seen) = bc.current().unwrap();
            assert_eq!(seen, epoch);
            assert_eq!(job.epoch, epoch);
        }
    }

    #[test]
    fn clear_advances_epoch_and_empties_slot() {
        let bc = JobBroadcast::new();
        let epoch = bc.publish(test_template("a", AlgorithmType::RandomX));
        bc.clear();
        assert!(bc.current().is_none());
        assert!(bc.epoch() > epoch);

        // the next publish is still strictly greater
        let next = bc.publish(test_template("b", AlgorithmType::RandomX));
        assert!(next > epoch + 1);
    }

    #[test]
    fn readers_keep_the_value_they_loaded() {
        let bc = JobBroadcast::new();
        bc.publish(test_template("old", AlgorithmType::RandomX));
        let (held, held_epoch) = bc.current().unwrap();

        bc.publish(test_template("new", AlgorithmType::RandomX));
        // the old Arc stays whole for the reader that already holds it
        assert_eq!(held.id, "old");
        assert_ne!(bc.epoch(), held_epoch);
        assert_eq!(bc.current().unwrap().0.id, "new");
    }
}
