//! # Signatures
//!
//! One `sign` and one `verify` for both identity kinds. Legacy identities
//! produce a bare Ed25519 signature over the message; hybrid identities
//! produce a [`HybridSignature`] bound to a timestamp.
//!
//! Verification fails closed. A signature of the wrong kind for the public
//! identity, a malformed key, a stale timestamp: all of them are just `false`
//! from [`verify`]. Callers that need the reason use [`verify_detailed`].

use thiserror::Error;

use super::hybrid::HybridSignature;
use super::keys::ClassicalSignature;
use crate::config::{
    millis, HYBRID_SIGNATURE_MAX_AGE, LEGACY_CUTOVER_MS, MAX_CLOCK_SKEW,
};
use crate::error::ErrorClass;
use crate::identity::{Identity, PublicIdentity};

/// Why a signature was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature verification failed")]
    VerificationFailed,

    #[error("signature expired: {age_ms} ms old")]
    Expired { age_ms: u64 },

    #[error("signature timestamp {ahead_ms} ms in the future")]
    FromFuture { ahead_ms: u64 },

    #[error("signature kind does not match the signer identity")]
    KindMismatch,

    #[error("invalid public key")]
    InvalidPublicKey,
}

impl SignatureError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SignatureError::InvalidPublicKey => ErrorClass::MalformedInput,
            _ => ErrorClass::InvalidSignature,
        }
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Freshness and cutover rules for hybrid signature verification.
///
/// `reference_ms` is the instant the signature is judged against. For a
/// live submission that is "now"; for a record fetched later from the
/// network the verifier uses the record's registration time instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignaturePolicy {
    pub reference_ms: u64,
    pub max_age_ms: u64,
    pub max_skew_ms: u64,
    pub cutover_ms: u64,
    /// Never skip the Ed25519 half, even after the cutover.
    pub require_classical: bool,
}

impl SignaturePolicy {
    /// Protocol defaults at the given reference time.
    pub fn at(reference_ms: u64) -> Self {
        Self {
            reference_ms,
            max_age_ms: millis(HYBRID_SIGNATURE_MAX_AGE),
            max_skew_ms: millis(MAX_CLOCK_SKEW),
            cutover_ms: LEGACY_CUTOVER_MS,
            require_classical: false,
        }
    }

    /// Same policy, but both halves are always checked.
    pub fn strict(mut self) -> Self {
        self.require_classical = true;
        self
    }

    pub(crate) fn classical_optional(&self) -> bool {
        !self.require_classical && self.reference_ms >= self.cutover_ms
    }

    /// Reject timestamps older than `max_age_ms` or further than
    /// `max_skew_ms` ahead of the reference. Both bounds are inclusive.
    pub fn check_window(&self, timestamp_ms: u64) -> Result<(), SignatureError> {
        if timestamp_ms > self.reference_ms.saturating_add(self.max_skew_ms) {
            return Err(SignatureError::FromFuture {
                ahead_ms: timestamp_ms - self.reference_ms,
            });
        }
        let age_ms = self.reference_ms.saturating_sub(timestamp_ms);
        if age_ms > self.max_age_ms {
            return Err(SignatureError::Expired { age_ms });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// A signature produced by either identity kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signature {
    Classical(ClassicalSignature),
    Hybrid(HybridSignature),
}

/// Sign `message` with `identity`.
///
/// `timestamp_ms` is only used by hybrid identities and defaults to the
/// current time.
///
/// # Example
///
/// ```
/// use moniker_protocol::crypto::signatures::{sign, verify, SignaturePolicy};
/// use moniker_protocol::identity::{generate_keypair, KeyKind};
///
/// let identity = generate_keypair(KeyKind::Legacy, None).unwrap();
/// let sig = sign(b"alice", &identity, None);
/// let policy = SignaturePolicy::at(moniker_protocol::config::unix_millis());
/// assert!(verify(b"alice", &sig, &identity.public(), &policy));
/// ```
pub fn sign(message: &[u8], identity: &Identity, timestamp_ms: Option<u64>) -> Signature {
    match identity {
        Identity::Legacy(kp) => Signature::Classical(kp.sign(message)),
        Identity::Hybrid(kp) => {
            let ts = timestamp_ms.unwrap_or_else(crate::config::unix_millis);
            Signature::Hybrid(kp.sign(message, ts))
        }
    }
}

/// Verify and report the first failing rule.
pub fn verify_detailed(
    message: &[u8],
    signature: &Signature,
    public: &PublicIdentity,
    policy: &SignaturePolicy,
) -> Result<(), SignatureError> {
    match (public, signature) {
        (PublicIdentity::Legacy(pk), Signature::Classical(sig)) => {
            if pk.verify(message, sig) {
                Ok(())
            } else {
                Err(SignatureError::VerificationFailed)
            }
        }
        (PublicIdentity::Hybrid(pk), Signature::Hybrid(sig)) => {
            pk.verify_detailed(message, sig, policy)
        }
        _ => Err(SignatureError::KindMismatch),
    }
}

/// Boolean form of [`verify_detailed`].
pub fn verify(
    message: &[u8],
    signature: &Signature,
    public: &PublicIdentity,
    policy: &SignaturePolicy,
) -> bool {
    verify_detailed(message, signature, public, policy).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::unix_millis;
    use crate::identity::{generate_keypair, KeyKind};

    #[test]
    fn legacy_sign_and_verify() {
        let id = generate_keypair(KeyKind::Legacy, None).unwrap();
        let sig = sign(b"hello", &id, None);
        assert!(verify(b"hello", &sig, &id.public(), &SignaturePolicy::at(unix_millis())));
    }

    #[test]
    fn legacy_ignores_timestamp_window() {
        // Classical signatures carry no timestamp; the window does not apply.
        let id = generate_keypair(KeyKind::Legacy, Some([3u8; 32])).unwrap();
        let sig = sign(b"hello", &id, Some(0));
        assert!(verify(b"hello", &sig, &id.public(), &SignaturePolicy::at(u64::MAX / 2)));
    }

    #[test]
    fn hybrid_sign_and_verify() {
        let id = generate_keypair(KeyKind::Hybrid, None).unwrap();
        let now = unix_millis();
        let sig = sign(b"hello", &id, Some(now));
        assert!(verify(b"hello", &sig, &id.public(), &SignaturePolicy::at(now)));
    }

    #[test]
    fn flipped_message_byte_fails() {
        let id = generate_keypair(KeyKind::Hybrid, None).unwrap();
        let now = unix_millis();
        let sig = sign(b"hello", &id, Some(now));
        assert!(!verify(b"hellp", &sig, &id.public(), &SignaturePolicy::at(now)));
    }

    #[test]
    fn kind_mismatch_fails_closed() {
        let legacy = generate_keypair(KeyKind::Legacy, None).unwrap();
        let hybrid = generate_keypair(KeyKind::Hybrid, None).unwrap();
        let now = unix_millis();
        let sig = sign(b"hello", &legacy, None);
        assert_eq!(
            verify_detailed(b"hello", &sig, &hybrid.public(), &SignaturePolicy::at(now)),
            Err(SignatureError::KindMismatch)
        );
    }

    #[test]
    fn window_bounds() {
        let policy = SignaturePolicy::at(10_000_000);
        assert!(policy.check_window(10_000_000).is_ok());
        assert!(policy.check_window(10_000_000 + 300_000).is_ok());
        assert!(policy.check_window(10_000_000 + 300_001).is_err());
        assert!(policy.check_window(10_000_000 - 3_600_000).is_ok());
        assert!(policy.check_window(10_000_000 - 3_600_001).is_err());
    }

    #[test]
    fn error_classes() {
        assert_eq!(SignatureError::Expired { age_ms: 1 }.class(), ErrorClass::InvalidSignature);
        assert_eq!(SignatureError::InvalidPublicKey.class(), ErrorClass::MalformedInput);
    }
}
