//! hashforge - CPU proof-of-work mining core
//!
//! Distributes mining jobs from remote pools to hardware-aware worker
//! threads, collects the resulting shares and submits them back, with:
//! - per-algorithm, cache-aware thread auto-configuration
//! - a lock-minimal job broadcast between the control plane and workers
//! - pool failover with exponential backoff across an endpoint list
//! - atomic worker-pool reconfiguration on algorithm or config changes

#![warn(missing_docs)]
#![forbid(unsafe_code)]

/// Mining core: workers, scheduling, broadcast and the controller
pub mod miner;

/// Pool networking: endpoints, failover and the WebSocket session driver
pub mod network;

/// Statistics collection and the read-only status surface
pub mod stats;

/// Utility functions and error handling
pub mod utils;

/// Command-line interface definitions
pub mod cli;

/// Configuration management
pub mod config;

/// Hardware topology detection and thread binding
pub mod hw;

/// Shared type definitions
pub mod types;

// Core exports
pub use cli::Commands;
pub use config::Config;
pub use hw::HardwareTopology;
pub use miner::{Algorithm, Job, JobBroadcast, Miner, MinerHandle, Share, ThreadDescriptor};
pub use network::{PoolConnectionManager, PoolEndpoint};
pub use stats::{StatsRegistry, StatsReporter, StatusSnapshot};
pub use types::{AlgorithmType, BackendKind};
pub use utils::{MinerError, init_logging};
