//! # Memory-Hard Proof of Work
//!
//! Used by V2 records. Each attempt is one Argon2id evaluation, so the cost
//! of a search is dominated by memory bandwidth rather than raw hashing
//! speed, which narrows the gap between commodity hardware and ASICs.
//!
//! ```text
//! salt     = SHA3-256(name || owner_key)
//! password = nonce (u64, BE) || timestamp_ms (u64, BE)
//! hash     = SHA3-256(Argon2id(password, salt, memory_kib, iterations, p=1, 32 bytes))
//! ```
//!
//! The nonce is encoded in eight bytes, so nonces above `u64::MAX` are not
//! representable and are rejected.

use argon2::{Algorithm, Argon2, Params, Version};

use super::{leading_zero_bits, DifficultyParams, PowError, PowStrategy};
use crate::config::Network;
use crate::crypto::hash::{sha3_256, sha3_256_multi};

const KIB_PER_MIB: u32 = 1024;
const KIB_PER_GIB: u32 = 1024 * 1024;

fn memory_hard(leading_zero_bits: u8, memory_kib: u32, iterations: u32) -> DifficultyParams {
    DifficultyParams::MemoryHard {
        leading_zero_bits,
        memory_kib,
        iterations,
    }
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// Name-length tiers for the memory-hard strategy.
///
/// Each tier covers names up to `max_len` characters (inclusive). Tiers are
/// ordered by `max_len`; the last one must cover every remaining length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryHardSchedule {
    tiers: Vec<(usize, DifficultyParams)>,
}

impl MemoryHardSchedule {
    /// Build a schedule. Tiers are sorted; the last tier is widened to
    /// cover all longer names.
    pub fn new(mut tiers: Vec<(usize, DifficultyParams)>) -> Self {
        tiers.sort_by_key(|(max_len, _)| *max_len);
        if let Some(last) = tiers.last_mut() {
            last.0 = usize::MAX;
        }
        Self { tiers }
    }

    /// One tier for every name. Mostly for tests and private networks.
    pub fn uniform(params: DifficultyParams) -> Self {
        Self::new(vec![(usize::MAX, params)])
    }

    /// 16 MiB for long names up to 8 GiB for three-letter names.
    pub fn mainnet() -> Self {
        Self::new(vec![
            (3, memory_hard(4, 8 * KIB_PER_GIB, 4)),
            (4, memory_hard(4, 2 * KIB_PER_GIB, 3)),
            (5, memory_hard(3, 512 * KIB_PER_MIB, 3)),
            (6, memory_hard(2, 128 * KIB_PER_MIB, 2)),
            (8, memory_hard(1, 64 * KIB_PER_MIB, 2)),
            (usize::MAX, memory_hard(1, 16 * KIB_PER_MIB, 1)),
        ])
    }

    /// Same shape as mainnet at a small fraction of the memory.
    pub fn devnet() -> Self {
        Self::new(vec![
            (3, memory_hard(4, 16 * KIB_PER_MIB, 2)),
            (4, memory_hard(3, 8 * KIB_PER_MIB, 2)),
            (5, memory_hard(3, 4 * KIB_PER_MIB, 1)),
            (6, memory_hard(2, 2 * KIB_PER_MIB, 1)),
            (8, memory_hard(1, KIB_PER_MIB, 1)),
            (usize::MAX, memory_hard(1, 512, 1)),
        ])
    }

    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Mainnet => Self::mainnet(),
            Network::Devnet => Self::devnet(),
        }
    }

    pub fn params_for_len(&self, len: usize) -> DifficultyParams {
        self.tiers
            .iter()
            .find(|(max_len, _)| len <= *max_len)
            .or_else(|| self.tiers.last())
            .map(|(_, p)| *p)
            .unwrap_or_else(|| memory_hard(0, 8, 1))
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// The Argon2id construction with a configurable tier schedule.
#[derive(Debug, Clone)]
pub struct MemoryHardPow {
    schedule: MemoryHardSchedule,
}

impl MemoryHardPow {
    pub fn new(schedule: MemoryHardSchedule) -> Self {
        Self { schedule }
    }

    pub fn for_network(network: Network) -> Self {
        Self::new(MemoryHardSchedule::for_network(network))
    }

    pub fn schedule(&self) -> &MemoryHardSchedule {
        &self.schedule
    }
}

impl PowStrategy for MemoryHardPow {
    fn required_params(&self, name: &str) -> DifficultyParams {
        self.schedule.params_for_len(name.chars().count())
    }

    fn compute_hash(
        &self,
        name: &str,
        owner_key: &[u8],
        nonce: u128,
        timestamp: u64,
        params: &DifficultyParams,
    ) -> Result<[u8; 32], PowError> {
        let DifficultyParams::MemoryHard {
            memory_kib,
            iterations,
            ..
        } = *params
        else {
            return Err(PowError::WrongVariant);
        };
        let nonce = u64::try_from(nonce).map_err(|_| PowError::NonceOutOfRange)?;

        let salt = sha3_256_multi(&[name.as_bytes(), owner_key]);
        let mut password = [0u8; 16];
        password[..8].copy_from_slice(&nonce.to_be_bytes());
        password[8..].copy_from_slice(&timestamp.to_be_bytes());

        let argon_params = Params::new(memory_kib, iterations, 1, Some(32))
            .map_err(|e| PowError::Hash(e.to_string()))?;
        let mut out = [0u8; 32];
        Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params)
            .hash_password_into(&password, &salt, &mut out)
            .map_err(|e| PowError::Hash(e.to_string()))?;

        Ok(sha3_256(&out))
    }

    fn meets_target(&self, hash: &[u8; 32], params: &DifficultyParams) -> bool {
        match params {
            DifficultyParams::MemoryHard {
                leading_zero_bits: bits,
                ..
            } => leading_zero_bits(hash) >= u32::from(*bits),
            DifficultyParams::Fixed { .. } => false,
        }
    }

    fn max_nonce(&self) -> u128 {
        u128::from(u64::MAX)
    }

    fn progress_interval(&self) -> u64 {
        1
    }
}
