// src/config/config.rs
use crate::hw::HardwareTopology;
use crate::network::endpoint::PoolEndpoint;
use crate::types::AlgorithmType;
use crate::utils::error::MinerError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

/// Main configuration structure for the mining application.
///
/// Loaded once from a TOML file; the CPU section and the pool list are
/// read-only afterwards except for the `should_save` marker set when a
/// broken explicit thread list had to be replaced at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Algorithm mined until the first job dictates otherwise
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// CPU backend settings
    #[serde(default)]
    pub cpu: CpuConfig,

    /// Pool endpoints in failover priority order
    #[serde(default)]
    pub pools: Vec<PoolEndpoint>,

    /// Connection retry/backoff tuning
    #[serde(default)]
    pub retry: RetryConfig,
}

/// CPU backend configuration.
///
/// Key set and semantics follow the established miner config surface:
/// `huge-pages` accepts a bool or an explicit page size in KB,
/// `memory-pool` accepts a bool or a slot count where negative (or `true`)
/// means auto-sized, and `-1` leaves `priority`/`max-cpu-usage` unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CpuConfig {
    /// Master switch for the CPU backend
    pub enabled: bool,

    /// Huge-page backing for scratchpad memory
    pub huge_pages: HugePagesSetting,

    /// Huge pages for the JIT code region
    #[serde(rename = "huge-pages-JIT")]
    pub huge_pages_jit: bool,

    /// Hardware AES: `true`/`false` forced, absent = auto-detect
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hw_aes: Option<bool>,

    /// Percentage cap applied to the auto-derived thread count
    pub max_threads_hint: u32,

    /// Scratchpad slot pool sizing
    pub memory_pool: MemoryPoolSetting,

    /// OS scheduling priority for workers, -1 = unset
    pub priority: i32,

    /// Legacy percentage cap on total CPU usage, -1 = unset
    pub max_cpu_usage: i32,

    /// Yield between search passes instead of spinning straight through
    #[serde(rename = "yield")]
    pub thread_yield: bool,

    /// Discard persisted explicit thread lists and regenerate
    pub force_autoconfig: bool,

    /// Permit duplicate affinities in explicit thread lists
    pub oversubscribe: bool,

    /// Explicit per-algorithm thread lists, keyed by algorithm name.
    /// Empty means auto-derive.
    pub threads: HashMap<String, Vec<ThreadEntry>>,

    /// Set when a broken explicit list was replaced at runtime and the
    /// regenerated configuration is worth persisting. Never read from disk.
    #[serde(skip)]
    pub should_save: bool,
}

impl Default for CpuConfig {
    fn default() -> Self {
        CpuConfig {
            enabled: true,
            huge_pages: HugePagesSetting::default(),
            huge_pages_jit: false,
            hw_aes: None,
            max_threads_hint: 100,
            memory_pool: MemoryPoolSetting::default(),
            priority: -1,
            max_cpu_usage: -1,
            thread_yield: true,
            force_autoconfig: false,
            oversubscribe: false,
            threads: HashMap::new(),
            should_save: false,
        }
    }
}

impl CpuConfig {
    /// Effective hardware AES choice: forced value or the detected one.
    pub fn is_hw_aes(&self, topo: &HardwareTopology) -> bool {
        self.hw_aes.unwrap_or(topo.has_aes)
    }

    /// Explicit thread list for an algorithm, if one is configured and
    /// `force-autoconfig` has not discarded it.
    pub fn explicit_threads(&self, algorithm: AlgorithmType) -> Option<&[ThreadEntry]> {
        if self.force_autoconfig {
            return None;
        }
        self.threads
            .get(algorithm.config_key())
            .map(|v| v.as_slice())
            .filter(|v| !v.is_empty())
    }

    /// Scratchpad pool slot count for this machine.
    ///
    /// Auto sizing is one slot per 2 MiB of L3, floored at the core count.
    pub fn memory_pool_size(&self, topo: &HardwareTopology) -> usize {
        self.memory_pool.resolve(topo)
    }
}

/// `huge-pages`: bool toggle or an explicit page size in KB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HugePagesSetting {
    /// Plain on/off, default page size
    Enabled(bool),
    /// Explicit page size in KB
    SizeKb(u32),
}

impl Default for HugePagesSetting {
    fn default() -> Self {
        HugePagesSetting::Enabled(true)
    }
}

impl HugePagesSetting {
    /// Whether huge-page backing is requested at all.
    pub fn is_enabled(&self) -> bool {
        match *self {
            HugePagesSetting::Enabled(on) => on,
            HugePagesSetting::SizeKb(kb) => kb > 0,
        }
    }

    /// Requested page size in KB when enabled.
    pub fn size_kb(&self) -> Option<u32> {
        match *self {
            HugePagesSetting::Enabled(true) => {
                Some(crate::hw::topology::DEFAULT_HUGE_PAGE_SIZE_KB as u32)
            }
            HugePagesSetting::Enabled(false) => None,
            HugePagesSetting::SizeKb(0) => None,
            HugePagesSetting::SizeKb(kb) => Some(kb),
        }
    }
}

/// `memory-pool`: bool or slot count. `true` and negative numbers mean
/// auto-sized, `false`/`0` disables pooling, positive is an explicit count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MemoryPoolSetting {
    /// Auto (`true`) or disabled (`false`)
    Flag(bool),
    /// Explicit slot count, negative = auto
    Slots(i64),
}

impl Default for MemoryPoolSetting {
    fn default() -> Self {
        MemoryPoolSetting::Slots(-1)
    }
}

impl MemoryPoolSetting {
    /// Concrete slot count for a given machine.
    pub fn resolve(&self, topo: &HardwareTopology) -> usize {
        match *self {
            MemoryPoolSetting::Flag(true) => auto_pool_size(topo),
            MemoryPoolSetting::Flag(false) => 0,
            MemoryPoolSetting::Slots(n) if n < 0 => auto_pool_size(topo),
            MemoryPoolSetting::Slots(n) => n as usize,
        }
    }
}

fn auto_pool_size(topo: &HardwareTopology) -> usize {
    topo.logical_cores.max(topo.l3_bytes >> 21)
}

/// One entry of an explicit per-algorithm thread list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadEntry {
    /// Nonce batch multiplier for the worker
    pub intensity: u32,
    /// Logical core to pin to, absent = unpinned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affinity: Option<usize>,
}

impl Default for ThreadEntry {
    fn default() -> Self {
        ThreadEntry {
            intensity: 1,
            affinity: None,
        }
    }
}

/// Connection retry and protocol timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RetryConfig {
    /// First backoff delay after a failure, in milliseconds
    pub base_delay_ms: u64,
    /// Backoff ceiling in milliseconds
    pub max_delay_ms: u64,
    /// Keepalive interval on an active connection, in seconds
    pub keepalive_secs: u64,
    /// Drop an active connection that produced no job for this long
    pub idle_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            base_delay_ms: 1_000,
            max_delay_ms: 120_000,
            keepalive_secs: 30,
            idle_timeout_secs: 180,
        }
    }
}

fn default_algorithm() -> String {
    "randomx".into()
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, MinerError> {
        let path = path.into();
        let config_str = std::fs::read_to_string(&path).map_err(|e| {
            MinerError::ConfigError(format!(
                "Failed to read config at {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: Config = toml::from_str(&config_str)
            .map_err(|e| MinerError::ConfigError(format!("Invalid config format: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Startup validation. Contradictory settings are fatal here; the same
    /// problems found later at reconfigure time fall back to auto-derived
    /// threads instead.
    pub fn validate(&self) -> Result<(), MinerError> {
        AlgorithmType::from_str(&self.algorithm)
            .map_err(|e| MinerError::ConfigError(format!("Invalid algorithm: {}", e)))?;

        if self.pools.is_empty() {
            return Err(MinerError::ConfigError(
                "At least one pool endpoint is required".into(),
            ));
        }
        for pool in &self.pools {
            if pool.url.is_empty() {
                return Err(MinerError::ConfigError("Pool URL must not be empty".into()));
            }
        }

        if self.cpu.max_threads_hint == 0 || self.cpu.max_threads_hint > 100 {
            return Err(MinerError::ConfigError(format!(
                "max-threads-hint must be within 1..=100, got {}",
                self.cpu.max_threads_hint
            )));
        }
        if self.cpu.max_cpu_usage < -1 || self.cpu.max_cpu_usage > 100 {
            return Err(MinerError::ConfigError(format!(
                "max-cpu-usage must be -1 or within 0..=100, got {}",
                self.cpu.max_cpu_usage
            )));
        }
        if self.retry.base_delay_ms == 0 || self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(MinerError::ConfigError(
                "retry delays must satisfy 0 < base-delay-ms <= max-delay-ms".into(),
            ));
        }

        Ok(())
    }

    /// The algorithm mined before the first job arrives.
    pub fn initial_algorithm(&self) -> Result<AlgorithmType, MinerError> {
        AlgorithmType::from_str(&self.algorithm)
            .map_err(|e| MinerError::ConfigError(format!("Invalid algorithm: {}", e)))
    }

    /// Generates a commented TOML configuration template.
    pub fn generate_template() -> String {
        let mut template = String::new();
        template.push_str("# hashforge configuration\n\n");
        template.push_str("# Supported algorithms: randomx, cryptonight-v7, cryptonight-r\n");
        template.push_str("algorithm = \"randomx\"\n\n");
        template.push_str("[cpu]\n");
        template.push_str("enabled = true\n");
        template.push_str("# bool, or an explicit page size in KB\n");
        template.push_str("huge-pages = true\n");
        template.push_str("\"huge-pages-JIT\" = false\n");
        template.push_str("# percentage cap on auto-derived threads\n");
        template.push_str("max-threads-hint = 100\n");
        template.push_str("# true/negative = auto, false/0 = off, positive = slot count\n");
        template.push_str("memory-pool = -1\n");
        template.push_str("priority = -1\n");
        template.push_str("max-cpu-usage = -1\n");
        template.push_str("yield = true\n");
        template.push_str("force-autoconfig = false\n\n");
        template.push_str("# Explicit thread list example (omit for auto-configuration):\n");
        template.push_str("# [[cpu.threads.randomx]]\n");
        template.push_str("# intensity = 1\n");
        template.push_str("# affinity = 0\n\n");
        template.push_str("[[pools]]\n");
        template.push_str("url = \"wss://pool.example.com:3333\"\n");
        template.push_str("user = \"your_wallet_address\"\n");
        template.push_str("password = \"x\"\n");
        template.push_str("tls = true\n");
        template.push_str("priority = 0\n\n");
        template.push_str("[retry]\n");
        template.push_str("base-delay-ms = 1000\n");
        template.push_str("max-delay-ms = 120000\n");
        template
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::topology::test_topology;

    fn config_with_pool() -> Config {
        toml::from_str(
            r#"
            algorithm = "randomx"

            [[pools]]
            url = "wss://pool.example.com:3333"
            user = "wallet"
            password = "x"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn defaults_are_sane() {
        let cfg = config_with_pool();
        assert!(cfg.cpu.enabled);
        assert_eq!(cfg.cpu.max_threads_hint, 100);
        assert_eq!(cfg.cpu.priority, -1);
        assert!(cfg.cpu.thread_yield);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn memory_pool_auto_formula() {
        // 8 cores, 16 MiB L3: max(8, 16 MiB >> 21) = max(8, 8) = 8
        let topo = test_topology(8, 16);
        assert_eq!(MemoryPoolSetting::Slots(-1).resolve(&topo), 8);
        assert_eq!(MemoryPoolSetting::Flag(true).resolve(&topo), 8);

        // 4 cores, 32 MiB L3: the cache term wins
        let topo = test_topology(4, 32);
        assert_eq!(MemoryPoolSetting::Slots(-1).resolve(&topo), 16);

        assert_eq!(MemoryPoolSetting::Flag(false).resolve(&topo), 0);
        assert_eq!(MemoryPoolSetting::Slots(0).resolve(&topo), 0);
        assert_eq!(MemoryPoolSetting::Slots(6).resolve(&topo), 6);
    }

    #[test]
    fn huge_pages_accepts_bool_or_kb() {
        let cfg: CpuConfig = toml::from_str("huge-pages = true").unwrap();
        assert!(cfg.huge_pages.is_enabled());
        assert_eq!(cfg.huge_pages.size_kb(), Some(2048));

        let cfg: CpuConfig = toml::from_str("huge-pages = 1048576").unwrap();
        assert_eq!(cfg.huge_pages.size_kb(), Some(1048576));

        let cfg: CpuConfig = toml::from_str("huge-pages = false").unwrap();
        assert!(!cfg.huge_pages.is_enabled());
    }

    #[test]
    fn explicit_threads_respect_force_autoconfig() {
        let mut cfg = CpuConfig::default();
        cfg.threads.insert(
            "randomx".into(),
            vec![ThreadEntry {
                intensity: 1,
                affinity: Some(0),
            }],
        );
        assert!(cfg.explicit_threads(AlgorithmType::RandomX).is_some());
        assert!(cfg.explicit_threads(AlgorithmType::CryptoNightR).is_none());

        cfg.force_autoconfig = true;
        assert!(cfg.explicit_threads(AlgorithmType::RandomX).is_none());
    }

    #[test]
    fn validation_rejects_contradictions() {
        let mut cfg = config_with_pool();
        cfg.cpu.max_threads_hint = 0;
        assert!(matches!(
            cfg.validate(),
            Err(MinerError::ConfigError(_))
        ));

        let mut cfg = config_with_pool();
        cfg.pools.clear();
        assert!(cfg.validate().is_err());

        let mut cfg = config_with_pool();
        cfg.retry.max_delay_ms = 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn template_parses_back() {
        let cfg: Config = toml::from_str(&Config::generate_template()).unwrap();
        assert!(cfg.validate().is_ok());
    }
}
