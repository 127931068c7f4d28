//! # Record Codec
//!
//! Two binary encodings, both bincode with fixed-width integers:
//!
//! - **canonical** -- what gets signed and hashed. A fixed-order struct of
//!   version, name, key(s), CID, pointer key, revision, timestamps and
//!   previous hash. Signatures, hashes, proof and providers are excluded.
//! - **full** -- the whole tagged record, for storage and the content
//!   store. Decoding is strict: size-limited, no trailing bytes, and the
//!   decoded record is structurally checked before it is returned.

use bincode::Options;
use serde::Serialize;
use thiserror::Error;

use super::name::{validate_name, NameError};
use super::NameRecord;
use crate::config::CLASSICAL_SIGNATURE_LENGTH;
use crate::crypto::hash::{sha256, sha3_256};
use crate::crypto::hybrid::{dilithium_public_key_length, dilithium_signature_length};
use crate::error::ErrorClass;

/// Upper bound on an encoded record. A V2 record is a few KiB.
pub const MAX_RECORD_BYTES: u64 = 64 * 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("binary decode failed: {0}")]
    Binary(String),

    #[error("JSON decode failed: {0}")]
    Json(String),

    #[error("field '{field}': {reason}")]
    Field { field: &'static str, reason: String },

    #[error("proof nonce must be a decimal string, not a JSON number")]
    NumericNonce,

    #[error("record DID does not match its owner key")]
    DidMismatch,

    #[error("unknown record version {0}")]
    UnknownVersion(u64),

    #[error(transparent)]
    Name(#[from] NameError),
}

impl CodecError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::MalformedInput
    }

    pub(crate) fn field(field: &'static str, reason: impl Into<String>) -> Self {
        CodecError::Field {
            field,
            reason: reason.into(),
        }
    }
}

fn wire() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_RECORD_BYTES)
        .reject_trailing_bytes()
}

#[derive(Serialize)]
struct CanonicalRecord<'a> {
    version: u8,
    name: &'a str,
    owner_key: &'a [u8; 32],
    dilithium_key: Option<&'a [u8]>,
    cid: &'a str,
    pointer_key: &'a str,
    revision: u64,
    registered: u64,
    expires: u64,
    previous_hash: Option<&'a [u8; 32]>,
}

/// The signed and hashed byte form of a record.
pub fn canonical_bytes(record: &NameRecord) -> Result<Vec<u8>, CodecError> {
    let dilithium_key = match record {
        NameRecord::V1(_) => None,
        NameRecord::V2(r) => Some(r.owner.dilithium.as_slice()),
    };
    let canonical = CanonicalRecord {
        version: record.version(),
        name: record.name(),
        owner_key: record.owner_key().as_bytes(),
        dilithium_key,
        cid: record.cid(),
        pointer_key: record.pointer_key(),
        revision: record.revision(),
        registered: record.registered(),
        expires: record.expires(),
        previous_hash: record.previous_hash(),
    };
    wire()
        .serialize(&canonical)
        .map_err(|e| CodecError::Binary(e.to_string()))
}

/// SHA-256 of the canonical encoding. This is the hash chained through
/// `previous_hash`, for both versions.
pub fn record_hash(record: &NameRecord) -> Result<[u8; 32], CodecError> {
    Ok(sha256(&canonical_bytes(record)?))
}

/// SHA3-256 of the canonical encoding.
pub fn record_hash_sha3(record: &NameRecord) -> Result<[u8; 32], CodecError> {
    Ok(sha3_256(&canonical_bytes(record)?))
}

/// Encode the whole record.
pub fn encode_full(record: &NameRecord) -> Result<Vec<u8>, CodecError> {
    wire()
        .serialize(record)
        .map_err(|e| CodecError::Binary(e.to_string()))
}

/// Decode and structurally check a record produced by [`encode_full`].
pub fn decode_full(bytes: &[u8]) -> Result<NameRecord, CodecError> {
    let record: NameRecord = wire()
        .deserialize(bytes)
        .map_err(|e| CodecError::Binary(e.to_string()))?;
    check_structure(&record)?;
    Ok(record)
}

/// Structural checks every decoder applies: name syntax, DID derivation,
/// key and signature lengths. No cryptography beyond the DID hash.
pub fn check_structure(record: &NameRecord) -> Result<(), CodecError> {
    validate_name(record.name())?;
    record
        .did()
        .check_owner(record.owner_key())
        .map_err(|_| CodecError::DidMismatch)?;
    if record.cid().is_empty() {
        return Err(CodecError::field("cid", "must not be empty"));
    }

    match record {
        NameRecord::V1(r) => {
            if r.signature.as_bytes().len() != CLASSICAL_SIGNATURE_LENGTH {
                return Err(CodecError::field("signature", "wrong length"));
            }
        }
        NameRecord::V2(r) => {
            if r.owner.dilithium.len() != dilithium_public_key_length() {
                return Err(CodecError::field("dilithium_key", "wrong length"));
            }
            if r.signature.classical.as_bytes().len() != CLASSICAL_SIGNATURE_LENGTH {
                return Err(CodecError::field("signature.ed25519", "wrong length"));
            }
            if r.signature.dilithium.len() != dilithium_signature_length() {
                return Err(CodecError::field("signature.dilithium", "wrong length"));
            }
        }
    }
    Ok(())
}
