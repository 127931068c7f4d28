//! # Zero-Trust Record Verification
//!
//! No record is trusted because of where it came from. A record submitted
//! over HTTP, one fetched from the DHT, one inside a peer's index snapshot:
//! each goes through the same [`RecordVerifier`], and only
//! [`RecordVerifier::admit`] can produce the [`VerifiedRecord`] that the
//! cache, the index and the database accept.
//!
//! Verification runs every check even after one has failed, so a rejection
//! reports all of its reasons at once.

pub mod verifier;

use std::ops::Deref;

use serde::Serialize;
use thiserror::Error;

use crate::crypto::signatures::SignatureError;
use crate::error::ErrorClass;
use crate::pow::PowError;
use crate::record::{CodecError, NameError, NameRecord};

pub use verifier::RecordVerifier;

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Which instant freshness windows are measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    /// A live submission. PoW and hybrid signature windows are measured
    /// against `now`.
    Submission,
    /// A record that arrived later through the DHT, a peer or a snapshot.
    /// Windows are measured against the record's own `registered` time,
    /// which still binds the work and the signature to that moment.
    /// `registered` itself may not lie beyond `now` plus the clock skew.
    Propagated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyContext {
    pub now_ms: u64,
    pub mode: VerifyMode,
}

impl VerifyContext {
    pub fn submission(now_ms: u64) -> Self {
        Self {
            now_ms,
            mode: VerifyMode::Submission,
        }
    }

    pub fn propagated(now_ms: u64) -> Self {
        Self {
            now_ms,
            mode: VerifyMode::Propagated,
        }
    }

    /// Reference instant for the record's time windows.
    pub fn reference_ms(&self, record: &NameRecord) -> u64 {
        match self.mode {
            VerifyMode::Submission => self.now_ms,
            VerifyMode::Propagated => record.registered(),
        }
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Failed,
    Skipped,
}

impl CheckStatus {
    /// Skipped counts as passing.
    pub fn ok(self) -> bool {
        self != CheckStatus::Failed
    }
}

/// Outcome of each individual check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VerificationChecks {
    pub version: CheckStatus,
    pub name: CheckStatus,
    pub expiry: CheckStatus,
    pub proof_of_work: CheckStatus,
    pub signature: CheckStatus,
    pub chain: CheckStatus,
    pub hash: CheckStatus,
}

impl VerificationChecks {
    pub fn all_ok(&self) -> bool {
        [
            self.version,
            self.name,
            self.expiry,
            self.proof_of_work,
            self.signature,
            self.chain,
            self.hash,
        ]
        .iter()
        .all(|c| c.ok())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub valid: bool,
    /// A valid V2 record.
    pub quantum_secure: bool,
    pub errors: Vec<VerificationError>,
    pub checks: VerificationChecks,
}

impl VerificationResult {
    /// The first failure, if any. Its class drives the HTTP status.
    pub fn first_error(&self) -> Option<&VerificationError> {
        self.errors.first()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("proof of work variant does not match record version {version}")]
    VersionMismatch { version: u8 },

    #[error(transparent)]
    Name(#[from] NameError),

    #[error("record expired at {expires} (now {now})")]
    Expired { expires: u64, now: u64 },

    #[error("record expires before it was registered")]
    ExpiresBeforeRegistered,

    #[error("record registered {ahead_ms} ms in the future")]
    RegisteredInFuture { ahead_ms: u64 },

    #[error("record registered {age_ms} ms ago, too old for a live submission")]
    RegisteredTooOld { age_ms: u64 },

    #[error("proof of work rejected: {0}")]
    Pow(#[from] PowError),

    #[error("signature rejected: {0}")]
    Signature(#[from] SignatureError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("declared {algorithm} hash does not match the canonical encoding")]
    HashMismatch { algorithm: &'static str },

    #[error("update carries no previous_hash")]
    MissingPreviousHash,

    #[error("previous_hash does not match the previous record")]
    PreviousHashMismatch,

    #[error("previous record is for '{previous}', not '{name}'")]
    PreviousNameMismatch { previous: String, name: String },

    #[error("revision {revision} does not follow previous revision {previous}")]
    StaleRevision { revision: u64, previous: u64 },

    #[error("update is signed by a different owner than the previous record")]
    OwnerChanged,

    #[error("revision {0} has no previous record to chain to")]
    OrphanUpdate(u64),

    #[error("verification task failed: {0}")]
    TaskFailed(String),
}

impl VerificationError {
    pub fn class(&self) -> ErrorClass {
        match self {
            VerificationError::VersionMismatch { .. } => ErrorClass::MalformedInput,
            VerificationError::Name(e) => e.class(),
            VerificationError::Expired { .. }
            | VerificationError::ExpiresBeforeRegistered
            | VerificationError::RegisteredInFuture { .. }
            | VerificationError::RegisteredTooOld { .. } => ErrorClass::ExpiredOrFuture,
            VerificationError::Pow(e) => e.class(),
            VerificationError::Signature(e) => e.class(),
            VerificationError::Codec(e) => e.class(),
            VerificationError::HashMismatch { .. } => ErrorClass::MalformedInput,
            VerificationError::OwnerChanged => ErrorClass::NameTaken,
            VerificationError::MissingPreviousHash
            | VerificationError::PreviousHashMismatch
            | VerificationError::PreviousNameMismatch { .. }
            | VerificationError::StaleRevision { .. }
            | VerificationError::OrphanUpdate(_) => ErrorClass::ChainMismatch,
            VerificationError::TaskFailed(_) => ErrorClass::Cancelled,
        }
    }
}

// ---------------------------------------------------------------------------
// VerifiedRecord
// ---------------------------------------------------------------------------

/// A record that passed every check. Only [`RecordVerifier::admit`]
/// constructs one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedRecord(NameRecord);

impl VerifiedRecord {
    fn admitted(record: NameRecord) -> Self {
        Self(record)
    }

    pub fn record(&self) -> &NameRecord {
        &self.0
    }

    pub fn into_record(self) -> NameRecord {
        self.0
    }

    /// Swap in a new provider list. Providers are outside the signed
    /// payload, so the record stays verified.
    pub fn with_providers(mut self, providers: Vec<String>) -> Self {
        self.0.set_providers(providers);
        self
    }
}

impl Deref for VerifiedRecord {
    type Target = NameRecord;

    fn deref(&self) -> &NameRecord {
        &self.0
    }
}

impl AsRef<NameRecord> for VerifiedRecord {
    fn as_ref(&self) -> &NameRecord {
        &self.0
    }
}
