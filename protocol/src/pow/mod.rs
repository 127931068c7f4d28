//! # Proof of Work
//!
//! Registering a name costs work, and shorter names cost more. Two
//! strategies exist, one per record version:
//!
//! | Strategy | Records | Hash | Target |
//! |---|---|---|---|
//! | [`FixedCostPow`] | V1 | SHA-256 over a decimal challenge string | leading `'0'` hex nibbles |
//! | [`MemoryHardPow`] | V2 | Argon2id then SHA3-256 | leading zero bits |
//!
//! Both share the search loop and the verification rules in
//! [`PowStrategy`]; a strategy only supplies its hash function, its target
//! predicate and its difficulty table.
//!
//! ## Verification rules
//!
//! A proof is accepted only if all of these hold:
//!
//! - its params are the strategy's variant and at least the required params
//!   for the name,
//! - its declared cost is exactly the required memory and passes (only the
//!   leading-zero target may exceed the minimum, up to the digest width),
//! - its timestamp is not before [`MIN_POW_TIMESTAMP_MS`], not older than
//!   [`POW_MAX_AGE`] and not more than [`MAX_CLOCK_SKEW`] ahead of the
//!   reference time,
//! - the recomputed hash equals the stored hash byte for byte,
//! - the hash meets the target of the proof's own params.

pub mod fixed;
pub mod memory_hard;
pub mod worker;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::{millis, unix_millis, MAX_CLOCK_SKEW, MIN_POW_TIMESTAMP_MS, POW_MAX_AGE};
use crate::error::ErrorClass;

pub use fixed::FixedCostPow;
pub use memory_hard::{MemoryHardPow, MemoryHardSchedule};
pub use worker::{mine_async, PowWorker};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PowError {
    #[error("proof-of-work params are for the wrong strategy")]
    WrongVariant,

    #[error("difficulty {actual} is below the required {required}")]
    BelowRequired {
        required: DifficultyParams,
        actual: DifficultyParams,
    },

    #[error("declared cost {actual} exceeds the allowed {required}")]
    AboveSchedule {
        required: DifficultyParams,
        actual: DifficultyParams,
    },

    #[error("proof-of-work timestamp predates the protocol epoch")]
    BeforeEpoch,

    #[error("proof-of-work expired: {age_ms} ms old")]
    Expired { age_ms: u64 },

    #[error("proof-of-work timestamp {ahead_ms} ms in the future")]
    FromFuture { ahead_ms: u64 },

    #[error("nonce is outside the strategy's nonce space")]
    NonceOutOfRange,

    #[error("stored hash does not match the recomputed hash")]
    HashMismatch,

    #[error("hash does not meet the difficulty target")]
    TargetNotMet,

    #[error("hash function failed: {0}")]
    Hash(String),

    /// The whole nonce space was searched without a solution. Fatal: the
    /// caller must change the timestamp or the params and start over.
    #[error("nonce space exhausted")]
    NonceSpaceExhausted,

    #[error("proof-of-work search cancelled")]
    Cancelled,

    #[error("proof-of-work worker failed: {0}")]
    Worker(String),
}

impl PowError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PowError::WrongVariant
            | PowError::AboveSchedule { .. }
            | PowError::NonceOutOfRange
            | PowError::Hash(_) => ErrorClass::MalformedInput,
            PowError::BelowRequired { .. }
            | PowError::HashMismatch
            | PowError::TargetNotMet
            | PowError::NonceSpaceExhausted
            | PowError::Worker(_) => ErrorClass::InsufficientWork,
            PowError::BeforeEpoch | PowError::Expired { .. } | PowError::FromFuture { .. } => {
                ErrorClass::ExpiredOrFuture
            }
            PowError::Cancelled => ErrorClass::Cancelled,
        }
    }
}

// ---------------------------------------------------------------------------
// Difficulty & proof
// ---------------------------------------------------------------------------

/// Hex digits in a 32-byte digest.
pub const MAX_LEADING_ZERO_NIBBLES: u8 = 64;

/// Difficulty of a proof. The variant also names the hash construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyParams {
    Fixed {
        leading_zero_nibbles: u8,
    },
    MemoryHard {
        leading_zero_bits: u8,
        memory_kib: u32,
        iterations: u32,
    },
}

impl DifficultyParams {
    pub fn same_variant(&self, other: &DifficultyParams) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Whether `self` is at least as hard as `required` in every dimension.
    pub fn meets(&self, required: &DifficultyParams) -> bool {
        match (self, required) {
            (
                DifficultyParams::Fixed {
                    leading_zero_nibbles: have,
                },
                DifficultyParams::Fixed {
                    leading_zero_nibbles: need,
                },
            ) => have >= need,
            (
                DifficultyParams::MemoryHard {
                    leading_zero_bits: bits,
                    memory_kib: mem,
                    iterations: it,
                },
                DifficultyParams::MemoryHard {
                    leading_zero_bits: need_bits,
                    memory_kib: need_mem,
                    iterations: need_it,
                },
            ) => bits >= need_bits && mem >= need_mem && it >= need_it,
            _ => false,
        }
    }

    /// Whether a verifier may evaluate `self` when `required` is the
    /// minimum. The memory-hard cost must equal the requirement; only the
    /// target may be raised, and never past the digest width. A `u8` bit
    /// count cannot exceed 256.
    pub fn within_cost_of(&self, required: &DifficultyParams) -> bool {
        match (self, required) {
            (
                DifficultyParams::Fixed {
                    leading_zero_nibbles: have,
                },
                DifficultyParams::Fixed { .. },
            ) => *have <= MAX_LEADING_ZERO_NIBBLES,
            (
                DifficultyParams::MemoryHard {
                    memory_kib: mem,
                    iterations: it,
                    ..
                },
                DifficultyParams::MemoryHard {
                    memory_kib: need_mem,
                    iterations: need_it,
                    ..
                },
            ) => mem == need_mem && it == need_it,
            _ => false,
        }
    }
}

impl fmt::Display for DifficultyParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DifficultyParams::Fixed {
                leading_zero_nibbles,
            } => write!(f, "fixed({leading_zero_nibbles} nibbles)"),
            DifficultyParams::MemoryHard {
                leading_zero_bits,
                memory_kib,
                iterations,
            } => write!(
                f,
                "memory-hard({leading_zero_bits} bits, {memory_kib} KiB, {iterations} passes)"
            ),
        }
    }
}

/// A solved proof of work, bound to a name and an owner key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOfWork {
    pub nonce: u128,
    /// Unix milliseconds. Part of the hashed challenge.
    pub timestamp: u64,
    pub hash: [u8; 32],
    pub params: DifficultyParams,
}

/// Number of leading `'0'` characters in the lowercase hex encoding.
pub fn leading_zero_nibbles(hash: &[u8]) -> u32 {
    let mut count = 0;
    for byte in hash {
        if *byte == 0 {
            count += 2;
            continue;
        }
        if byte >> 4 == 0 {
            count += 1;
        }
        break;
    }
    count
}

/// Number of leading zero bits, counting into the first non-zero byte.
pub fn leading_zero_bits(hash: &[u8]) -> u32 {
    let mut count = 0;
    for byte in hash {
        if *byte == 0 {
            count += 8;
            continue;
        }
        count += byte.leading_zeros();
        break;
    }
    count
}

// ---------------------------------------------------------------------------
// Search control
// ---------------------------------------------------------------------------

/// Shared cancellation flag for a running search.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Periodic report from a running search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowProgress {
    pub attempts: u64,
    pub current_nonce: u128,
    pub elapsed: Duration,
}

/// Knobs for a single search.
#[derive(Debug, Clone, Default)]
pub struct SearchControl {
    pub cancel: CancelToken,
    pub start_nonce: u128,
    /// Fix the challenge timestamp instead of reading the clock.
    pub timestamp_ms: Option<u64>,
    pub progress: Option<Sender<PowProgress>>,
}

impl SearchControl {
    pub fn with_cancel(cancel: CancelToken) -> Self {
        Self {
            cancel,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// A proof-of-work construction.
///
/// Implementors supply the hash, the target predicate and the difficulty
/// table. The search loop and the verification rules are shared.
pub trait PowStrategy: Send + Sync {
    /// Minimum difficulty for registering `name`.
    fn required_params(&self, name: &str) -> DifficultyParams;

    /// Hash one candidate.
    fn compute_hash(
        &self,
        name: &str,
        owner_key: &[u8],
        nonce: u128,
        timestamp: u64,
        params: &DifficultyParams,
    ) -> Result<[u8; 32], PowError>;

    /// Whether `hash` satisfies `params`.
    fn meets_target(&self, hash: &[u8; 32], params: &DifficultyParams) -> bool;

    /// Largest nonce this construction can encode.
    fn max_nonce(&self) -> u128 {
        u128::MAX
    }

    /// Attempts between progress reports.
    fn progress_interval(&self) -> u64 {
        10_000
    }

    /// Search for a proof, starting at `control.start_nonce`.
    fn generate(
        &self,
        name: &str,
        owner_key: &[u8],
        params: &DifficultyParams,
        control: &SearchControl,
    ) -> Result<ProofOfWork, PowError> {
        let timestamp = control.timestamp_ms.unwrap_or_else(unix_millis);
        let started = Instant::now();
        let interval = self.progress_interval().max(1);
        let mut nonce = control.start_nonce;
        let mut attempts: u64 = 0;

        if nonce > self.max_nonce() {
            return Err(PowError::NonceOutOfRange);
        }

        loop {
            if control.cancel.is_cancelled() {
                return Err(PowError::Cancelled);
            }

            let hash = self.compute_hash(name, owner_key, nonce, timestamp, params)?;
            attempts += 1;

            if self.meets_target(&hash, params) {
                tracing::debug!(name, attempts, nonce = %nonce, "proof of work found");
                return Ok(ProofOfWork {
                    nonce,
                    timestamp,
                    hash,
                    params: *params,
                });
            }

            if attempts % interval == 0 {
                if let Some(tx) = &control.progress {
                    // A dropped receiver just means nobody is watching.
                    let _ = tx.send(PowProgress {
                        attempts,
                        current_nonce: nonce,
                        elapsed: started.elapsed(),
                    });
                }
            }

            if nonce >= self.max_nonce() {
                return Err(PowError::NonceSpaceExhausted);
            }
            nonce += 1;
        }
    }

    /// Check a proof against `name`, `owner_key` and the reference time.
    fn verify(
        &self,
        name: &str,
        owner_key: &[u8],
        proof: &ProofOfWork,
        reference_ms: u64,
    ) -> Result<(), PowError> {
        let required = self.required_params(name);
        if !proof.params.same_variant(&required) {
            return Err(PowError::WrongVariant);
        }
        if !proof.params.meets(&required) {
            return Err(PowError::BelowRequired {
                required,
                actual: proof.params,
            });
        }
        if !proof.params.within_cost_of(&required) {
            return Err(PowError::AboveSchedule {
                required,
                actual: proof.params,
            });
        }

        if proof.timestamp < MIN_POW_TIMESTAMP_MS {
            return Err(PowError::BeforeEpoch);
        }
        if proof.timestamp > reference_ms.saturating_add(millis(MAX_CLOCK_SKEW)) {
            return Err(PowError::FromFuture {
                ahead_ms: proof.timestamp - reference_ms,
            });
        }
        let age_ms = reference_ms.saturating_sub(proof.timestamp);
        if age_ms > millis(POW_MAX_AGE) {
            return Err(PowError::Expired { age_ms });
        }

        if proof.nonce > self.max_nonce() {
            return Err(PowError::NonceOutOfRange);
        }

        let hash = self.compute_hash(name, owner_key, proof.nonce, proof.timestamp, &proof.params)?;
        if hash != proof.hash {
            return Err(PowError::HashMismatch);
        }
        if !self.meets_target(&hash, &proof.params) {
            return Err(PowError::TargetNotMet);
        }
        Ok(())
    }

    fn is_valid(&self, name: &str, owner_key: &[u8], proof: &ProofOfWork, reference_ms: u64) -> bool {
        self.verify(name, owner_key, proof, reference_ms).is_ok()
    }
}
