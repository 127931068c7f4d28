//! # Classical Keys
//!
//! Ed25519 keypairs, public keys and signatures. Every Moniker identity has
//! one of these, legacy or hybrid: the Ed25519 public key is what the DID is
//! derived from and what the proof-of-work is bound to.
//!
//! ## Security considerations
//!
//! - Secret keys are zeroized on drop (ed25519-dalek does this for us).
//! - Generation pulls from `OsRng`.
//! - Key bytes are never logged, and `Debug` only ever prints the public half.

use ed25519_dalek::{
    Signature as DalekSignature, Signer, SigningKey, VerifyingKey, SECRET_KEY_LENGTH,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;

use crate::config::{CLASSICAL_PUBLIC_KEY_LENGTH, CLASSICAL_SIGNATURE_LENGTH};
use crate::error::ErrorClass;

/// Errors that can occur while building or parsing keys.
///
/// Deliberately vague about *why* key bytes were rejected.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes")]
    InvalidSecretKey,

    #[error("invalid public key bytes")]
    InvalidPublicKey,

    #[error("invalid signature bytes")]
    InvalidSignature,

    /// The Dilithium backend has no seeded key generation, so a hybrid
    /// identity can only come from the OS RNG.
    #[error("hybrid identities cannot be generated from a seed")]
    SeededHybridUnsupported,
}

impl KeyError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::MalformedInput
    }
}

// ---------------------------------------------------------------------------
// ClassicalKeypair
// ---------------------------------------------------------------------------

/// An Ed25519 signing keypair.
///
/// Does not implement `Serialize`. Exporting secret material goes through
/// [`crate::identity::keyfile`], never through a stray `serde_json::to_string`.
///
/// # Examples
///
/// ```
/// use moniker_protocol::crypto::keys::ClassicalKeypair;
///
/// let kp = ClassicalKeypair::generate();
/// let sig = kp.sign(b"register alice");
/// assert!(kp.public_key().verify(b"register alice", &sig));
/// ```
pub struct ClassicalKeypair {
    signing_key: SigningKey,
}

impl ClassicalKeypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Deterministic keypair: the 32-byte seed *is* the Ed25519 secret key.
    pub fn from_seed(seed: &[u8; SECRET_KEY_LENGTH]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Rebuild from a secret key slice, checking the length.
    pub fn from_secret_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        let arr: [u8; SECRET_KEY_LENGTH] =
            bytes.try_into().map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_seed(&arr))
    }

    pub fn public_key(&self) -> ClassicalPublicKey {
        ClassicalPublicKey {
            bytes: self.signing_key.verifying_key().to_bytes(),
        }
    }

    /// Sign raw message bytes. Deterministic per (key, message).
    pub fn sign(&self, message: &[u8]) -> ClassicalSignature {
        ClassicalSignature {
            bytes: self.signing_key.sign(message).to_bytes().to_vec(),
        }
    }

    /// Raw secret key. Only the key-file exporter should need this.
    pub fn secret_key_bytes(&self) -> [u8; SECRET_KEY_LENGTH] {
        self.signing_key.to_bytes()
    }
}

impl Clone for ClassicalKeypair {
    fn clone(&self) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&self.signing_key.to_bytes()),
        }
    }
}

impl fmt::Debug for ClassicalKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Public half only. Never any part of the secret.
        write!(f, "ClassicalKeypair(pub={})", self.public_key().to_hex())
    }
}

impl PartialEq for ClassicalKeypair {
    fn eq(&self, other: &Self) -> bool {
        self.public_key() == other.public_key()
    }
}

impl Eq for ClassicalKeypair {}

// ---------------------------------------------------------------------------
// ClassicalPublicKey
// ---------------------------------------------------------------------------

/// The public half of an Ed25519 keypair.
///
/// Constructed from untrusted bytes only through [`try_from_slice`] or
/// [`from_hex`], both of which reject bytes that are not a curve point.
///
/// [`try_from_slice`]: ClassicalPublicKey::try_from_slice
/// [`from_hex`]: ClassicalPublicKey::from_hex
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassicalPublicKey {
    bytes: [u8; CLASSICAL_PUBLIC_KEY_LENGTH],
}

impl ClassicalPublicKey {
    pub fn try_from_slice(slice: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; CLASSICAL_PUBLIC_KEY_LENGTH] =
            slice.try_into().map_err(|_| KeyError::InvalidPublicKey)?;
        VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self { bytes })
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s).map_err(|_| KeyError::InvalidPublicKey)?;
        Self::try_from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CLASSICAL_PUBLIC_KEY_LENGTH] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Verify a signature. `false` for anything wrong, never a panic.
    pub fn verify(&self, message: &[u8], signature: &ClassicalSignature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.bytes) else {
            return false;
        };
        let Some(sig) = signature.to_dalek() else {
            return false;
        };
        verifying_key.verify_strict(message, &sig).is_ok()
    }
}

impl Hash for ClassicalPublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl fmt::Display for ClassicalPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ClassicalPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassicalPublicKey({})", &self.to_hex()[..16])
    }
}

// ---------------------------------------------------------------------------
// ClassicalSignature
// ---------------------------------------------------------------------------

/// A 64-byte Ed25519 signature.
///
/// Stored as a `Vec<u8>` so serde handles it without array gymnastics. A
/// signature of the wrong length is representable but never verifies.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassicalSignature {
    bytes: Vec<u8>,
}

impl ClassicalSignature {
    pub fn try_from_slice(slice: &[u8]) -> Result<Self, KeyError> {
        if slice.len() != CLASSICAL_SIGNATURE_LENGTH {
            return Err(KeyError::InvalidSignature);
        }
        Ok(Self {
            bytes: slice.to_vec(),
        })
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s).map_err(|_| KeyError::InvalidSignature)?;
        Self::try_from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    fn to_dalek(&self) -> Option<DalekSignature> {
        let arr: [u8; CLASSICAL_SIGNATURE_LENGTH] = self.bytes.as_slice().try_into().ok()?;
        Some(DalekSignature::from_bytes(&arr))
    }
}

impl fmt::Debug for ClassicalSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex_str = self.to_hex();
        if hex_str.len() >= 128 {
            write!(f, "ClassicalSignature({}...{})", &hex_str[..8], &hex_str[120..])
        } else {
            write!(f, "ClassicalSignature({hex_str})")
        }
    }
}
