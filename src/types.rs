// src/types.rs
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Proof-of-work algorithms this miner can schedule work for.
///
/// The hash functions themselves live behind the
/// [`Algorithm`](crate::miner::algorithm::Algorithm) trait; this enum is what
/// flows through configuration, job notifications and thread
/// auto-configuration.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
pub enum AlgorithmType {
    /// RandomX (CPU-optimized, ASIC-resistant)
    #[clap(name = "randomx")]
    #[serde(rename = "randomx")]
    RandomX,

    /// CryptoNight variant 7 (legacy)
    #[clap(name = "cryptonight-v7")]
    #[serde(rename = "cryptonight-v7")]
    CryptoNightV7,

    /// CryptoNight-R (legacy transition variant)
    #[clap(name = "cryptonight-r")]
    #[serde(rename = "cryptonight-r")]
    CryptoNightR,
}

impl AlgorithmType {
    /// Per-thread working-set size in bytes.
    ///
    /// Thread auto-configuration divides the L3 cache by this figure to
    /// bound how many workers can run without thrashing a cache domain.
    pub fn working_set_bytes(self) -> usize {
        match self {
            AlgorithmType::RandomX => 2 * 1024 * 1024,
            AlgorithmType::CryptoNightV7 => 2 * 1024 * 1024,
            AlgorithmType::CryptoNightR => 2 * 1024 * 1024,
        }
    }

    /// Key used for per-algorithm sections in the config file.
    pub fn config_key(self) -> &'static str {
        match self {
            AlgorithmType::RandomX => "randomx",
            AlgorithmType::CryptoNightV7 => "cryptonight-v7",
            AlgorithmType::CryptoNightR => "cryptonight-r",
        }
    }
}

impl fmt::Display for AlgorithmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_key())
    }
}

impl FromStr for AlgorithmType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rx" | "randomx" => Ok(AlgorithmType::RandomX),
            "cnv7" | "cryptonight-v7" => Ok(AlgorithmType::CryptoNightV7),
            "cnr" | "cryptonight-r" => Ok(AlgorithmType::CryptoNightR),
            _ => Err(format!("Unknown algorithm: {}", s)),
        }
    }
}

/// Mining backend kinds.
///
/// Closed set; the controller keys its backends by this value rather than
/// through a class hierarchy. Only the CPU backend exists here, the enum is
/// the seam a device backend would plug into.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendKind {
    /// Worker threads on the host CPU
    Cpu,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Cpu => write!(f, "cpu"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_round_trips_through_str() {
        for algo in [
            AlgorithmType::RandomX,
            AlgorithmType::CryptoNightV7,
            AlgorithmType::CryptoNightR,
        ] {
            assert_eq!(algo.to_string().parse::<AlgorithmType>(), Ok(algo));
        }
    }

    #[test]
    fn short_aliases_parse() {
        assert_eq!("rx".parse::<AlgorithmType>(), Ok(AlgorithmType::RandomX));
        assert_eq!(
            "cnv7".parse::<AlgorithmType>(),
            Ok(AlgorithmType::CryptoNightV7)
        );
    }

    #[test]
    fn working_sets_are_nonzero() {
        for algo in [
            AlgorithmType::RandomX,
            AlgorithmType::CryptoNightV7,
            AlgorithmType::CryptoNightR,
        ] {
            assert!(algo.working_set_bytes() >= 1 << 20);
        }
    }
}
