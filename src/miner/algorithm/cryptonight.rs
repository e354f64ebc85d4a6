// src/miner/algorithm/cryptonight.rs
//! CryptoNight adapter
//!
//! Covers the two legacy variants this miner schedules: V7 (variant 1)
//! and R (variant 4). Stateless apart from the variant number; the
//! scratchpad is managed inside the `cryptonight` library.

use crate::miner::algorithm::Algorithm;
use crate::types::AlgorithmType;
use crate::utils::error::MinerError;
use cryptonight::cryptonight;

/// CryptoNight V7 variant number.
pub const VARIANT_V7: i32 = 1;
/// CryptoNight R variant number.
pub const VARIANT_R: i32 = 4;

/// CryptoNight instance for one variant.
pub struct CryptoNight {
    variant: i32,
}

impl CryptoNight {
    /// Creates an instance for a supported variant number.
    pub fn new(variant: i32) -> Result<Self, MinerError> {
        match variant {
            VARIANT_V7 | VARIANT_R => Ok(Self { variant }),
            other => Err(MinerError::AlgorithmError(format!(
                "Unsupported CryptoNight variant {}",
                other
            ))),
        }
    }

    /// Convenience constructor from the algorithm enum.
    pub fn for_algorithm(algorithm: AlgorithmType) -> Result<Self, MinerError> {
        match algorithm {
            AlgorithmType::CryptoNightV7 => Self::new(VARIANT_V7),
            AlgorithmType::CryptoNightR => Self::new(VARIANT_R),
            AlgorithmType::RandomX => Err(MinerError::AlgorithmError(
                "RandomX is not a CryptoNight variant".into(),
            )),
        }
    }
}

impl Algorithm for CryptoNight {
    fn hash(&self, input: &[u8], nonce: u64) -> Result<[u8; 32], MinerError> {
        let mut data = input.to_vec();
        data.extend_from_slice(&nonce.to_le_bytes());

        let digest = cryptonight(&data, data.len(), self.variant);
        digest
            .try_into()
            .map_err(|_| MinerError::AlgorithmError("CryptoNight output is not 32 bytes".into()))
    }

    fn algorithm_type(&self) -> AlgorithmType {
        match self.variant {
            VARIANT_V7 => AlgorithmType::CryptoNightV7,
            _ => AlgorithmType::CryptoNightR,
        }
    }
}
