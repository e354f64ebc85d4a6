// src/stats/mod.rs
//! Statistics collection and the read-only status surface
//!
//! [`StatsRegistry`] is the shared hub: workers bump lock-free counters,
//! the pool connection manager records accept/reject outcomes, and the
//! surrounding process reads [`StatusSnapshot`]s from it. [`StatsReporter`]
//! logs a periodic summary line.

/// Registry, counters and the periodic reporter
pub mod reporter;

pub use reporter::{StatsRegistry, StatsReporter, StatusSnapshot, WorkerCounters, WorkerStats};
