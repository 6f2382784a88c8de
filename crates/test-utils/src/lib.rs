//! Shared test utilities for payment-processor integration tests.

use ethers::types::{Address, H256, U256};

/// Deterministic test payee address derived from a small integer seed, so
/// fixtures stay stable and readable across test runs.
pub fn test_address(seed: u64) -> Address {
    let mut bytes = [0u8; 20];
    bytes[12..].copy_from_slice(&seed.to_be_bytes());
    Address::from(bytes)
}

/// Deterministic test transaction hash derived from a small integer seed.
pub fn test_tx_hash(seed: u64) -> H256 {
    let mut bytes = [0u8; 32];
    bytes[24..].copy_from_slice(&seed.to_be_bytes());
    H256::from(bytes)
}

/// Converts a plain integer amount into a `U256`, for readable test
/// fixtures (`amount(100)` instead of spelling out a `U256` literal).
pub fn amount(value: u64) -> U256 {
    U256::from(value)
}
