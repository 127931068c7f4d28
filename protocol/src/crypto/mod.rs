//! # Cryptographic Primitives
//!
//! Thin, typed wrappers around audited implementations:
//!
//! - **Ed25519** for legacy signatures and the classical half of hybrids.
//! - **Dilithium3** for the post-quantum half of hybrid signatures.
//! - **SHA-256 / SHA3-256** for record hashes and proof-of-work.
//! - **Argon2id + AES-256-GCM** for password-protected key files.
//!
//! Nothing in here is novel. Keep it that way.

pub mod encryption;
pub mod hash;
pub mod hybrid;
pub mod keys;
pub mod signatures;

pub use hash::{blake3_hash, sha256, sha3_256};
pub use hybrid::{HybridKeypair, HybridPublicKey, HybridSignature};
pub use keys::{ClassicalKeypair, ClassicalPublicKey, ClassicalSignature, KeyError};
pub use signatures::{sign, verify, Signature, SignatureError, SignaturePolicy};
