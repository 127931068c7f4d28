//! Fixed-cost proof of work for V1 records.
//!
//! `SHA-256(name || hex(owner_key) || nonce || timestamp)` with nonce and
//! timestamp written in decimal. The target is a number of leading `'0'`
//! characters in the hex digest.

use super::{leading_zero_nibbles, DifficultyParams, PowError, PowStrategy};
use crate::crypto::hash::sha256;

/// Leading-zero nibbles required for a name of `len` characters.
pub fn required_nibbles(len: usize) -> u8 {
    match len {
        0..=3 => 6,
        4 => 5,
        5 => 4,
        6 => 3,
        _ => 2,
    }
}

/// The legacy SHA-256 construction. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedCostPow;

impl FixedCostPow {
    pub fn challenge(name: &str, owner_key: &[u8], nonce: u128, timestamp: u64) -> String {
        format!("{name}{}{nonce}{timestamp}", hex::encode(owner_key))
    }
}

impl PowStrategy for FixedCostPow {
    fn required_params(&self, name: &str) -> DifficultyParams {
        DifficultyParams::Fixed {
            leading_zero_nibbles: required_nibbles(name.chars().count()),
        }
    }

    fn compute_hash(
        &self,
        name: &str,
        owner_key: &[u8],
        nonce: u128,
        timestamp: u64,
        params: &DifficultyParams,
    ) -> Result<[u8; 32], PowError> {
        if !matches!(params, DifficultyParams::Fixed { .. }) {
            return Err(PowError::WrongVariant);
        }
        Ok(sha256(
            Self::challenge(name, owner_key, nonce, timestamp).as_bytes(),
        ))
    }

    fn meets_target(&self, hash: &[u8; 32], params: &DifficultyParams) -> bool {
        match params {
            DifficultyParams::Fixed {
                leading_zero_nibbles: n,
            } => leading_zero_nibbles(hash) >= u32::from(*n),
            DifficultyParams::MemoryHard { .. } => false,
        }
    }
}
