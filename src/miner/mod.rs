// src/miner/mod.rs
//! Mining core
//!
//! Everything between a job-notify and a submitted share: thread
//! auto-configuration, the scratchpad slot pool, the lock-minimal job
//! broadcast, the CPU worker pool and the controller that orchestrates
//! them.

/// Hash algorithm trait and the external implementations behind it
pub mod algorithm;

/// Derivation of worker thread descriptors from hardware and config
pub mod autoconf;

/// CPU worker pool behind the backend capability trait
pub mod backend;

/// Job types and the single-writer/multi-reader job hand-off
pub mod broadcast;

/// Control-plane orchestrator and the process-facing handle
pub mod controller;

/// Scratchpad slot accounting
pub mod memory;

/// Worker thread loop and nonce partitioning
pub mod worker;

// Re-export main components for cleaner imports
pub use algorithm::Algorithm;
pub use autoconf::ThreadDescriptor;
pub use backend::{Backend, CpuBackend};
pub use broadcast::{Job, JobBroadcast, JobTemplate, Share};
pub use controller::{ControlEvent, Miner, MinerHandle, MiningController};
pub use memory::MemoryPool;
