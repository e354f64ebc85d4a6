// src/miner/algorithm/mod.rs
//! Hash algorithm seam
//!
//! The miner core never computes a hash itself; it drives implementations
//! of [`Algorithm`] backed by the external RandomX and CryptoNight crates.
//! Everything above this module only cares that a blob and a nonce turn
//! into a 32-byte digest.

/// RandomX adapter
pub mod randomx;

/// CryptoNight variant adapters
pub mod cryptonight;

use crate::config::CpuConfig;
use crate::types::AlgorithmType;
use crate::utils::error::MinerError;
use std::sync::Arc;

/// Common interface for all mining algorithms.
pub trait Algorithm: Send + Sync {
    /// Computes the digest for `input` with `nonce` appended.
    fn hash(&self, input: &[u8], nonce: u64) -> Result<[u8; 32], MinerError>;

    /// Whether `(input, nonce)` hashes below `target`.
    fn verify(&self, input: &[u8], nonce: u64, target: &[u8]) -> Result<bool, MinerError> {
        let digest = self.hash(input, nonce)?;
        Ok(digest.as_slice() < target)
    }

    /// The algorithm variant this instance implements.
    fn algorithm_type(&self) -> AlgorithmType;
}

/// Constructor seam for algorithm instances.
///
/// The worker pool calls through this on every start, which is also what
/// lets tests run the full pool lifecycle against a cheap stand-in hash.
pub type AlgorithmFactory = Arc<
    dyn Fn(AlgorithmType, &CpuConfig) -> Result<Arc<dyn Algorithm + Send + Sync>, MinerError>
        + Send
        + Sync,
>;

/// Factory over the real implementations.
pub fn default_factory() -> AlgorithmFactory {
    Arc::new(|algorithm, cpu| match algorithm {
        AlgorithmType::RandomX => {
            if cpu.huge_pages_jit {
                log::debug!("Huge pages requested for the RandomX JIT region");
            }
            // the dataset key is a placeholder until job seeds flow
            let key = [0u8; 32];
            Ok(Arc::new(randomx::RandomX::new(true, &key)) as _)
        }
        AlgorithmType::CryptoNightV7 | AlgorithmType::CryptoNightR => Ok(Arc::new(
            cryptonight::CryptoNight::for_algorithm(algorithm)?,
        ) as _),
    })
}

#[cfg(test)]
pub(crate) mod testing {
    //! Cheap deterministic stand-in so pool and controller tests do not
    //! pay for real dataset initialization.

    use super::*;

    /// Deterministic toy hash: byte-mixes the nonce over the input length.
    /// With an all-0xFF target every nonce is a share; with an all-zero
    /// target none is.
    pub struct TestAlgo(pub AlgorithmType);

    impl Algorithm for TestAlgo {
        fn hash(&self, input: &[u8], nonce: u64) -> Result<[u8; 32], MinerError> {
            let mut digest = [0u8; 32];
            let seed = nonce
                .wrapping_mul(0x9E37_79B9_7F4A_7C15)
                .wrapping_add(input.len() as u64);
            for (i, byte) in digest.iter_mut().enumerate() {
                *byte = (seed.rotate_left(i as u32) & 0xFF) as u8;
            }
            // keep the first byte clear of 0xFF so an all-0xFF target
            // always accepts
            digest[0] &= 0x7F;
            Ok(digest)
        }

        fn algorithm_type(&self) -> AlgorithmType {
            self.0
        }
    }
}
