//! # Hashing Utilities
//!
//! Three digests, three jobs:
//!
//! - **SHA-256** -- the classical digest. Record hashes, the fixed-cost PoW,
//!   DID derivation and the Ed25519 half of a hybrid signature.
//! - **SHA3-256** -- the quantum-resistant digest. The second record hash on
//!   V2 records, the memory-hard PoW and the Dilithium half of a hybrid
//!   signature. Keccak shares no structure with SHA-2, so a break in one
//!   family does not carry over to the other.
//! - **BLAKE3** -- internal only: gossip deduplication and content
//!   identifiers for the in-memory store. Never part of a signed format.

use sha2::{Digest, Sha256};
use sha3::Sha3_256;

/// Compute the SHA-256 digest of `data`.
///
/// # Example
///
/// ```
/// use moniker_protocol::crypto::hash::sha256;
///
/// let digest = sha256(b"moniker");
/// assert_eq!(digest.len(), 32);
/// ```
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 over several slices without concatenating them first.
pub fn sha256_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Compute the SHA3-256 digest of `data`.
pub fn sha3_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA3-256 over several slices without concatenating them first.
pub fn sha3_256_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Compute the BLAKE3 digest of `data`.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}
