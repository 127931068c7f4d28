//! Registrant-side record assembly.
//!
//! ```no_run
//! use moniker_protocol::identity::{generate_keypair, KeyKind};
//! use moniker_protocol::pow::{FixedCostPow, SearchControl};
//! use moniker_protocol::record::RecordBuilder;
//!
//! let identity = generate_keypair(KeyKind::Legacy, None).unwrap();
//! let record = RecordBuilder::new("alice", "bafybeigdyrzt")
//!     .build(&identity, &FixedCostPow, &SearchControl::default())
//!     .unwrap();
//! assert_eq!(record.name(), "alice");
//! ```

use std::time::Duration;

use thiserror::Error;

use super::codec::{canonical_bytes, record_hash, record_hash_sha3, CodecError};
use super::name::{fold_name, validate_name, NameError};
use super::{LegacyRecord, NameRecord, QuantumRecord};
use crate::config::{millis, unix_millis, CLASSICAL_SIGNATURE_LENGTH, DEFAULT_RECORD_LIFETIME};
use crate::crypto::hybrid::HybridSignature;
use crate::crypto::keys::ClassicalSignature;
use crate::error::ErrorClass;
use crate::identity::Identity;
use crate::pow::{DifficultyParams, PowError, PowStrategy, ProofOfWork, SearchControl};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Name(#[from] NameError),

    #[error(transparent)]
    Pow(#[from] PowError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("proof of work uses {0}, which does not match the identity kind")]
    ProofVariant(DifficultyParams),

    #[error("cannot update '{previous}' as '{name}'")]
    NameMismatch { previous: String, name: String },

    #[error("revision counter overflow")]
    RevisionOverflow,
}

impl BuildError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BuildError::Name(e) => e.class(),
            BuildError::Pow(e) => e.class(),
            BuildError::Codec(e) => e.class(),
            BuildError::ProofVariant(_) => ErrorClass::InsufficientWork,
            BuildError::NameMismatch { .. } | BuildError::RevisionOverflow => ErrorClass::ChainMismatch,
        }
    }
}

/// Collects record fields, mines, signs and hashes.
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    name: String,
    cid: String,
    pointer_key: String,
    revision: u64,
    previous_hash: Option<[u8; 32]>,
    providers: Vec<String>,
    registered: Option<u64>,
    lifetime: Duration,
    params: Option<DifficultyParams>,
}

impl RecordBuilder {
    /// A fresh registration (revision 0). The name is folded.
    pub fn new(name: impl AsRef<str>, cid: impl Into<String>) -> Self {
        Self {
            name: fold_name(name.as_ref()),
            cid: cid.into(),
            pointer_key: String::new(),
            revision: 0,
            previous_hash: None,
            providers: Vec::new(),
            registered: None,
            lifetime: DEFAULT_RECORD_LIFETIME,
            params: None,
        }
    }

    /// Make this record the next revision of `previous`.
    pub fn update_of(mut self, previous: &NameRecord) -> Result<Self, BuildError> {
        if previous.name() != self.name {
            return Err(BuildError::NameMismatch {
                previous: previous.name().to_string(),
                name: self.name,
            });
        }
        self.revision = previous
            .revision()
            .checked_add(1)
            .ok_or(BuildError::RevisionOverflow)?;
        self.previous_hash = Some(record_hash(previous)?);
        Ok(self)
    }

    pub fn pointer_key(mut self, key: impl Into<String>) -> Self {
        self.pointer_key = key.into();
        self
    }

    pub fn providers(mut self, providers: Vec<String>) -> Self {
        self.providers = providers;
        self
    }

    pub fn registered_at(mut self, ms: u64) -> Self {
        self.registered = Some(ms);
        self
    }

    pub fn lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Mine at these params instead of the strategy's minimum.
    pub fn params(mut self, params: DifficultyParams) -> Self {
        self.params = Some(params);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Difficulty the search will target.
    pub fn difficulty(&self, strategy: &dyn PowStrategy) -> DifficultyParams {
        self.params
            .unwrap_or_else(|| strategy.required_params(&self.name))
    }

    /// Mine a proof in the calling thread, then [`assemble`](Self::assemble).
    pub fn build(
        self,
        identity: &Identity,
        strategy: &dyn PowStrategy,
        control: &SearchControl,
    ) -> Result<NameRecord, BuildError> {
        validate_name(&self.name)?;
        let params = self.difficulty(strategy);
        let owner_key = identity.classical().public_key();
        let proof = strategy.generate(&self.name, owner_key.as_bytes(), &params, control)?;
        self.assemble(identity, proof)
    }

    /// Sign and hash a record around an already-mined proof.
    pub fn assemble(self, identity: &Identity, proof: ProofOfWork) -> Result<NameRecord, BuildError> {
        validate_name(&self.name)?;
        let registered = self.registered.unwrap_or_else(unix_millis);
        let expires = registered.saturating_add(millis(self.lifetime));
        let did = identity.did();
        let unsigned = ClassicalSignature::try_from_slice(&[0u8; CLASSICAL_SIGNATURE_LENGTH])
            .map_err(|e| CodecError::field("signature", e.to_string()))?;

        match identity {
            Identity::Legacy(kp) => {
                if !matches!(proof.params, DifficultyParams::Fixed { .. }) {
                    return Err(BuildError::ProofVariant(proof.params));
                }
                let mut record = NameRecord::V1(LegacyRecord {
                    name: self.name,
                    owner: kp.public_key(),
                    did,
                    cid: self.cid,
                    pointer_key: self.pointer_key,
                    revision: self.revision,
                    registered,
                    expires,
                    signature: unsigned,
                    proof,
                    previous_hash: self.previous_hash,
                    providers: self.providers,
                    hash: [0u8; 32],
                });
                let canonical = canonical_bytes(&record)?;
                let hash = record_hash(&record)?;
                if let NameRecord::V1(r) = &mut record {
                    r.signature = kp.sign(&canonical);
                    r.hash = hash;
                }
                Ok(record)
            }
            Identity::Hybrid(kp) => {
                if !matches!(proof.params, DifficultyParams::MemoryHard { .. }) {
                    return Err(BuildError::ProofVariant(proof.params));
                }
                let mut record = NameRecord::V2(QuantumRecord {
                    name: self.name,
                    owner: kp.public_key(),
                    did,
                    cid: self.cid,
                    pointer_key: self.pointer_key,
                    revision: self.revision,
                    registered,
                    expires,
                    signature: HybridSignature {
                        classical: unsigned,
                        dilithium: Vec::new(),
                        timestamp: registered,
                    },
                    proof,
                    previous_hash: self.previous_hash,
                    providers: self.providers,
                    hash: [0u8; 32],
                    hash_sha3: [0u8; 32],
                });
                let canonical = canonical_bytes(&record)?;
                let hash = record_hash(&record)?;
                let hash_sha3 = record_hash_sha3(&record)?;
                if let NameRecord::V2(r) = &mut record {
                    r.signature = kp.sign(&canonical, registered);
                    r.hash = hash;
                    r.hash_sha3 = hash_sha3;
                }
                Ok(record)
            }
        }
    }
}
