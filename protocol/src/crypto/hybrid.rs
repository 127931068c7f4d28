//! # Hybrid Signatures
//!
//! Ed25519 paired with CRYSTALS-Dilithium3. A hybrid signature is valid only
//! if *both* halves verify, so forging one requires breaking both a
//! classical and a lattice scheme.
//!
//! ## Construction
//!
//! ```text
//! m'        = message || timestamp_ms (u64, big-endian)
//! ed25519   = Ed25519.sign(SHA-256(m'))
//! dilithium = Dilithium3.sign(SHA3-256(m'))
//! ```
//!
//! The timestamp is covered by both halves, and verification enforces an
//! age window against a caller-supplied reference time. After
//! [`LEGACY_CUTOVER_MS`] the Ed25519 half may be skipped once the Dilithium
//! half passes. The reverse never happens: Ed25519 alone never accepts.

use pqcrypto_dilithium::dilithium3;
use pqcrypto_traits::sign::{DetachedSignature as _, PublicKey as _, SecretKey as _};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::hash::{sha256, sha3_256};
use super::keys::{ClassicalKeypair, ClassicalPublicKey, ClassicalSignature, KeyError};
use super::signatures::{SignatureError, SignaturePolicy};

/// Length of a Dilithium3 public key in bytes.
pub fn dilithium_public_key_length() -> usize {
    dilithium3::public_key_bytes()
}

/// Length of a Dilithium3 detached signature in bytes.
pub fn dilithium_signature_length() -> usize {
    dilithium3::signature_bytes()
}

/// `message || timestamp_ms` as big-endian bytes.
fn bind_timestamp(message: &[u8], timestamp_ms: u64) -> Vec<u8> {
    let mut bound = Vec::with_capacity(message.len() + 8);
    bound.extend_from_slice(message);
    bound.extend_from_slice(&timestamp_ms.to_be_bytes());
    bound
}

// ---------------------------------------------------------------------------
// HybridKeypair
// ---------------------------------------------------------------------------

/// Ed25519 + Dilithium3 keypair for quantum-resistant identities.
#[derive(Clone)]
pub struct HybridKeypair {
    classical: ClassicalKeypair,
    pq_public: dilithium3::PublicKey,
    pq_secret: dilithium3::SecretKey,
}

impl HybridKeypair {
    /// Generate both halves from the OS RNG.
    pub fn generate() -> Self {
        let (pq_public, pq_secret) = dilithium3::keypair();
        Self {
            classical: ClassicalKeypair::generate(),
            pq_public,
            pq_secret,
        }
    }

    /// Reassemble a keypair from exported parts.
    ///
    /// The parts are checked against each other with a probe signature, so
    /// a key file with a swapped or truncated Dilithium secret is rejected
    /// here instead of producing unverifiable records later.
    pub fn from_parts(
        classical_secret: &[u8],
        pq_public: &[u8],
        pq_secret: &[u8],
    ) -> Result<Self, KeyError> {
        let classical = ClassicalKeypair::from_secret_slice(classical_secret)?;
        let pq_public =
            dilithium3::PublicKey::from_bytes(pq_public).map_err(|_| KeyError::InvalidPublicKey)?;
        let pq_secret =
            dilithium3::SecretKey::from_bytes(pq_secret).map_err(|_| KeyError::InvalidSecretKey)?;

        let probe = b"moniker-keypair-probe";
        let sig = dilithium3::detached_sign(probe, &pq_secret);
        dilithium3::verify_detached_signature(&sig, probe, &pq_public)
            .map_err(|_| KeyError::InvalidSecretKey)?;

        Ok(Self {
            classical,
            pq_public,
            pq_secret,
        })
    }

    pub fn classical(&self) -> &ClassicalKeypair {
        &self.classical
    }

    pub fn public_key(&self) -> HybridPublicKey {
        HybridPublicKey {
            classical: self.classical.public_key(),
            dilithium: self.pq_public.as_bytes().to_vec(),
        }
    }

    pub fn dilithium_secret_bytes(&self) -> &[u8] {
        self.pq_secret.as_bytes()
    }

    /// Sign `message` bound to `timestamp_ms`.
    pub fn sign(&self, message: &[u8], timestamp_ms: u64) -> HybridSignature {
        let bound = bind_timestamp(message, timestamp_ms);
        let classical = self.classical.sign(&sha256(&bound));
        let dilithium = dilithium3::detached_sign(&sha3_256(&bound), &self.pq_secret);
        HybridSignature {
            classical,
            dilithium: dilithium.as_bytes().to_vec(),
            timestamp: timestamp_ms,
        }
    }
}

impl fmt::Debug for HybridKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HybridKeypair(pub={})", self.classical.public_key().to_hex())
    }
}

// ---------------------------------------------------------------------------
// HybridPublicKey
// ---------------------------------------------------------------------------

/// Public half of a hybrid identity.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HybridPublicKey {
    pub classical: ClassicalPublicKey,
    pub dilithium: Vec<u8>,
}

impl HybridPublicKey {
    /// Build from untrusted parts. The Dilithium key must have the exact
    /// Dilithium3 length.
    pub fn new(classical: ClassicalPublicKey, dilithium: Vec<u8>) -> Result<Self, KeyError> {
        dilithium3::PublicKey::from_bytes(&dilithium).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self {
            classical,
            dilithium,
        })
    }

    /// Verify a hybrid signature, reporting the first failing rule.
    ///
    /// Window checks run before any cryptography, so a stale signature is
    /// rejected as stale even when both halves would verify.
    pub fn verify_detailed(
        &self,
        message: &[u8],
        signature: &HybridSignature,
        policy: &SignaturePolicy,
    ) -> Result<(), SignatureError> {
        policy.check_window(signature.timestamp)?;

        let bound = bind_timestamp(message, signature.timestamp);

        let pq_public = dilithium3::PublicKey::from_bytes(&self.dilithium)
            .map_err(|_| SignatureError::InvalidPublicKey)?;
        let pq_sig = dilithium3::DetachedSignature::from_bytes(&signature.dilithium)
            .map_err(|_| SignatureError::VerificationFailed)?;
        dilithium3::verify_detached_signature(&pq_sig, &sha3_256(&bound), &pq_public)
            .map_err(|_| SignatureError::VerificationFailed)?;

        if policy.classical_optional() {
            return Ok(());
        }

        if self
            .classical
            .verify(&sha256(&bound), &signature.classical)
        {
            Ok(())
        } else {
            Err(SignatureError::VerificationFailed)
        }
    }

    pub fn verify(&self, message: &[u8], signature: &HybridSignature, policy: &SignaturePolicy) -> bool {
        self.verify_detailed(message, signature, policy).is_ok()
    }
}

impl fmt::Debug for HybridPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HybridPublicKey({:?})", self.classical)
    }
}

// ---------------------------------------------------------------------------
// HybridSignature
// ---------------------------------------------------------------------------

/// Both signature halves plus the timestamp they are bound to.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HybridSignature {
    pub classical: ClassicalSignature,
    pub dilithium: Vec<u8>,
    /// Signing time, unix milliseconds.
    pub timestamp: u64,
}

impl fmt::Debug for HybridSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HybridSignature")
            .field("classical", &self.classical)
            .field("dilithium_len", &self.dilithium.len())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{millis, unix_millis, HYBRID_SIGNATURE_MAX_AGE, LEGACY_CUTOVER_MS};

    fn policy_at(reference_ms: u64) -> SignaturePolicy {
        SignaturePolicy::at(reference_ms)
    }

    #[test]
    fn hybrid_sign_verify_roundtrip() {
        let kp = HybridKeypair::generate();
        let now = unix_millis();
        let sig = kp.sign(b"alice", now);
        assert!(kp.public_key().verify(b"alice", &sig, &policy_at(now)));
    }

    #[test]
    fn two_hour_old_signature_is_rejected() {
        let kp = HybridKeypair::generate();
        let now = unix_millis();
        let two_hours_ago = now - 2 * 3600 * 1000;
        let sig = kp.sign(b"alice", two_hours_ago);
        let err = kp
            .public_key()
            .verify_detailed(b"alice", &sig, &policy_at(now))
            .unwrap_err();
        assert!(matches!(err, SignatureError::Expired { .. }));
    }

    #[test]
    fn exactly_max_age_is_still_valid() {
        let kp = HybridKeypair::generate();
        let now = unix_millis();
        let sig = kp.sign(b"alice", now - millis(HYBRID_SIGNATURE_MAX_AGE));
        assert!(kp.public_key().verify(b"alice", &sig, &policy_at(now)));
    }

    #[test]
    fn far_future_signature_is_rejected() {
        let kp = HybridKeypair::generate();
        let now = unix_millis();
        let sig = kp.sign(b"alice", now + 10 * 60 * 1000);
        let err = kp
            .public_key()
            .verify_detailed(b"alice", &sig, &policy_at(now))
            .unwrap_err();
        assert!(matches!(err, SignatureError::FromFuture { .. }));
    }

    #[test]
    fn tampered_timestamp_breaks_both_halves() {
        let kp = HybridKeypair::generate();
        let now = unix_millis();
        let mut sig = kp.sign(b"alice", now);
        sig.timestamp -= 1;
        assert!(!kp.public_key().verify(b"alice", &sig, &policy_at(now)));
    }

    #[test]
    fn corrupted_classical_half_fails_before_cutover() {
        let kp = HybridKeypair::generate();
        let now = unix_millis();
        let mut sig = kp.sign(b"alice", now);
        sig.classical = kp.classical().sign(b"something else");
        assert!(!kp.public_key().verify(b"alice", &sig, &policy_at(now)));
    }

    #[test]
    fn classical_half_skippable_after_cutover() {
        let kp = HybridKeypair::generate();
        let after = LEGACY_CUTOVER_MS + 1000;
        let mut sig = kp.sign(b"alice", after);
        sig.classical = kp.classical().sign(b"something else");
        assert!(kp.public_key().verify(b"alice", &sig, &policy_at(after)));
    }

    #[test]
    fn classical_half_alone_never_accepts() {
        let kp = HybridKeypair::generate();
        let after = LEGACY_CUTOVER_MS + 1000;
        let mut sig = kp.sign(b"alice", after);
        sig.dilithium[0] ^= 0xff;
        assert!(!kp.public_key().verify(b"alice", &sig, &policy_at(after)));
        assert!(!kp.public_key().verify(b"alice", &sig, &policy_at(after).strict()));
    }

    #[test]
    fn from_parts_roundtrip_and_mismatch() {
        let kp = HybridKeypair::generate();
        let other = HybridKeypair::generate();
        let pk = kp.public_key();

        let restored = HybridKeypair::from_parts(
            &kp.classical().secret_key_bytes(),
            &pk.dilithium,
            kp.dilithium_secret_bytes(),
        )
        .unwrap();
        assert_eq!(restored.public_key(), pk);

        let mismatched = HybridKeypair::from_parts(
            &kp.classical().secret_key_bytes(),
            &pk.dilithium,
            other.dilithium_secret_bytes(),
        );
        assert!(mismatched.is_err());
    }

    #[test]
    fn public_key_rejects_wrong_dilithium_length() {
        let kp = HybridKeypair::generate();
        let result = HybridPublicKey::new(kp.classical().public_key(), vec![0u8; 12]);
        assert!(result.is_err());
        assert_eq!(
            kp.public_key().dilithium.len(),
            dilithium_public_key_length()
        );
    }
}
