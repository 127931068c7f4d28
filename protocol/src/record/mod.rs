//! # Name Records
//!
//! A record maps a name to a content pointer and an owner. Two wire
//! versions exist and are decided once, at decode time:
//!
//! - [`LegacyRecord`] (V1): Ed25519 owner, one Ed25519 signature, fixed-cost
//!   proof of work, SHA-256 record hash.
//! - [`QuantumRecord`] (V2): hybrid owner, hybrid signature bound to a
//!   timestamp, memory-hard proof of work, SHA-256 *and* SHA3-256 record
//!   hashes, mandatory `previous_hash` on updates.
//!
//! Everything downstream matches on [`NameRecord`] exhaustively; there is
//! no "maybe has a Dilithium key" record.
//!
//! `registered` is the issue time of *this revision*, in unix milliseconds.
//! Last-write-wins decisions across the network compare it.

pub mod builder;
pub mod codec;
pub mod json;
pub mod name;

use serde::{Deserialize, Serialize};

use crate::config::{RECORD_VERSION_LEGACY, RECORD_VERSION_QUANTUM};
use crate::crypto::hybrid::{HybridPublicKey, HybridSignature};
use crate::crypto::keys::{ClassicalPublicKey, ClassicalSignature};
use crate::identity::{Did, PublicIdentity};
use crate::pow::ProofOfWork;

pub use builder::{BuildError, RecordBuilder};
pub use codec::{canonical_bytes, decode_full, encode_full, record_hash, CodecError};
pub use json::RecordJson;
pub use name::{fold_name, validate_name, NameError};

/// A V1 record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyRecord {
    pub name: String,
    pub owner: ClassicalPublicKey,
    pub did: Did,
    pub cid: String,
    /// Key of the owner's mutable pointer (IPNS-style), empty if unused.
    pub pointer_key: String,
    pub revision: u64,
    pub registered: u64,
    pub expires: u64,
    pub signature: ClassicalSignature,
    pub proof: ProofOfWork,
    pub previous_hash: Option<[u8; 32]>,
    /// Peers known to serve the content. Not signed.
    pub providers: Vec<String>,
    /// SHA-256 of the canonical encoding.
    pub hash: [u8; 32],
}

/// A V2 record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantumRecord {
    pub name: String,
    pub owner: HybridPublicKey,
    pub did: Did,
    pub cid: String,
    pub pointer_key: String,
    pub revision: u64,
    pub registered: u64,
    pub expires: u64,
    pub signature: HybridSignature,
    pub proof: ProofOfWork,
    pub previous_hash: Option<[u8; 32]>,
    pub providers: Vec<String>,
    /// SHA-256 of the canonical encoding.
    pub hash: [u8; 32],
    /// SHA3-256 of the canonical encoding.
    pub hash_sha3: [u8; 32],
}

/// Either record version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NameRecord {
    V1(LegacyRecord),
    V2(QuantumRecord),
}

impl NameRecord {
    pub fn version(&self) -> u8 {
        match self {
            NameRecord::V1(_) => RECORD_VERSION_LEGACY,
            NameRecord::V2(_) => RECORD_VERSION_QUANTUM,
        }
    }

    pub fn is_quantum(&self) -> bool {
        matches!(self, NameRecord::V2(_))
    }

    pub fn name(&self) -> &str {
        match self {
            NameRecord::V1(r) => &r.name,
            NameRecord::V2(r) => &r.name,
        }
    }

    /// The Ed25519 key both versions carry. Proof of work and the DID are
    /// bound to it.
    pub fn owner_key(&self) -> &ClassicalPublicKey {
        match self {
            NameRecord::V1(r) => &r.owner,
            NameRecord::V2(r) => &r.owner.classical,
        }
    }

    pub fn owner(&self) -> PublicIdentity {
        match self {
            NameRecord::V1(r) => PublicIdentity::Legacy(r.owner),
            NameRecord::V2(r) => PublicIdentity::Hybrid(r.owner.clone()),
        }
    }

    pub fn did(&self) -> &Did {
        match self {
            NameRecord::V1(r) => &r.did,
            NameRecord::V2(r) => &r.did,
        }
    }

    pub fn cid(&self) -> &str {
        match self {
            NameRecord::V1(r) => &r.cid,
            NameRecord::V2(r) => &r.cid,
        }
    }

    pub fn pointer_key(&self) -> &str {
        match self {
            NameRecord::V1(r) => &r.pointer_key,
            NameRecord::V2(r) => &r.pointer_key,
        }
    }

    pub fn revision(&self) -> u64 {
        match self {
            NameRecord::V1(r) => r.revision,
            NameRecord::V2(r) => r.revision,
        }
    }

    pub fn registered(&self) -> u64 {
        match self {
            NameRecord::V1(r) => r.registered,
            NameRecord::V2(r) => r.registered,
        }
    }

    pub fn expires(&self) -> u64 {
        match self {
            NameRecord::V1(r) => r.expires,
            NameRecord::V2(r) => r.expires,
        }
    }

    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.expires() <= now_ms
    }

    pub fn proof(&self) -> &ProofOfWork {
        match self {
            NameRecord::V1(r) => &r.proof,
            NameRecord::V2(r) => &r.proof,
        }
    }

    pub fn previous_hash(&self) -> Option<&[u8; 32]> {
        match self {
            NameRecord::V1(r) => r.previous_hash.as_ref(),
            NameRecord::V2(r) => r.previous_hash.as_ref(),
        }
    }

    pub fn providers(&self) -> &[String] {
        match self {
            NameRecord::V1(r) => &r.providers,
            NameRecord::V2(r) => &r.providers,
        }
    }

    /// Replace the provider list. Providers are not signed, so this never
    /// invalidates a record.
    pub fn set_providers(&mut self, providers: Vec<String>) {
        match self {
            NameRecord::V1(r) => r.providers = providers,
            NameRecord::V2(r) => r.providers = providers,
        }
    }

    /// The SHA-256 hash the record declares for itself.
    pub fn declared_hash(&self) -> &[u8; 32] {
        match self {
            NameRecord::V1(r) => &r.hash,
            NameRecord::V2(r) => &r.hash,
        }
    }
}
