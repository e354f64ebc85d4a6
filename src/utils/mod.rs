// src/utils/mod.rs
//! Shared utilities
//!
//! Error taxonomy and logging setup used by every other module.

/// Error types and handling utilities
///
/// Contains the [`MinerError`] enum which defines all possible error
/// conditions for the mining application, along with conversions from the
/// transport and codec crates.
pub mod error;

/// Logging configuration helpers built on `env_logger`
pub mod logging;

// Re-export for easier access
pub use error::MinerError;
pub use logging::init_logging;
