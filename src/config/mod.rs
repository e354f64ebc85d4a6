// src/config/mod.rs
//! Configuration management
//!
//! TOML-backed configuration covering the CPU backend keys, the pool
//! endpoint list and retry tuning. Only the semantics of the thread and
//! memory keys live here; the file format itself is plain serde.

/// Core configuration implementation
pub mod config;

pub use config::{
    Config, CpuConfig, HugePagesSetting, MemoryPoolSetting, RetryConfig, ThreadEntry,
};

use crate::utils::error::MinerError;
use std::path::PathBuf;

/// Loads miner configuration from a TOML file.
pub fn load(path: impl Into<PathBuf>) -> Result<Config, MinerError> {
    Config::load(path)
}

/// Generates a commented configuration template.
pub fn generate_template() -> String {
    Config::generate_template()
}
