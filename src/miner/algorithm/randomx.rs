// src/miner/algorithm/randomx.rs
//! RandomX adapter
//!
//! Wraps the `rust-randomx` bindings. The dataset lives in a shared
//! [`Context`]; hashers are cheap and created per call so no lock guards
//! the hot path.

use crate::miner::algorithm::Algorithm;
use crate::types::AlgorithmType;
use crate::utils::error::MinerError;
use rust_randomx::{Context, Hasher};
use std::sync::Arc;

/// RandomX instance bound to one dataset key.
///
/// Fast mode trades ~2 GiB of dataset memory for hashing throughput;
/// light mode fits in ~256 MiB for verification-style workloads.
#[derive(Clone)]
pub struct RandomX {
    context: Arc<Context>,
}

impl RandomX {
    /// Initializes the dataset for `key`. Expensive: several seconds of
    /// dataset generation in fast mode.
    pub fn new(fast: bool, key: &[u8]) -> Self {
        Self {
            context: Arc::new(Context::new(key, fast)),
        }
    }
}

impl Algorithm for RandomX {
    fn hash(&self, input: &[u8], nonce: u64) -> Result<[u8; 32], MinerError> {
        let hasher = Hasher::new(Arc::clone(&self.context));
        let mut data = input.to_vec();
        data.extend_from_slice(&nonce.to_le_bytes());

        let output = hasher.hash(&data);
        output
            .as_ref()
            .try_into()
            .map_err(|_| MinerError::AlgorithmError("RandomX output is not 32 bytes".into()))
    }

    fn algorithm_type(&self) -> AlgorithmType {
        AlgorithmType::RandomX
    }
}
