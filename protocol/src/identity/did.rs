//! # Decentralized Identifiers
//!
//! `did:moniker:<base58(SHA-256(ed25519_public_key))>`
//!
//! A DID is *derived*, never assigned. The only ways to get a [`Did`] are
//! [`Did::derive`] from a public key and [`Did::parse`] from a string, and
//! record ingestion always re-derives the DID from the record's key and
//! compares. A record cannot claim somebody else's DID.
//!
//! Hybrid identities use the same derivation over their Ed25519 half, so an
//! owner keeps their DID when upgrading a name from V1 to V2 records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::config::DID_PREFIX;
use crate::crypto::hash::sha256;
use crate::crypto::keys::ClassicalPublicKey;
use crate::error::ErrorClass;

use super::PublicIdentity;

const DID_CONTEXT: &str = "https://www.w3.org/ns/did/v1";
const ED25519_KEY_TYPE: &str = "Ed25519VerificationKey2020";
const DILITHIUM_KEY_TYPE: &str = "Dilithium3VerificationKey";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DidError {
    #[error("invalid DID format: {0}")]
    InvalidFormat(String),

    #[error("DID does not match the owner key")]
    Mismatch,
}

impl DidError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::MalformedInput
    }
}

/// A Moniker DID string, validated on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Did(String);

impl Did {
    /// Derive the DID owned by `public_key`.
    pub fn derive(public_key: &ClassicalPublicKey) -> Self {
        let digest = sha256(public_key.as_bytes());
        Did(format!("{DID_PREFIX}{}", bs58::encode(digest).into_string()))
    }

    /// Parse a DID string. Checks the prefix and that the identifier is a
    /// base58 encoding of exactly 32 bytes.
    pub fn parse(s: &str) -> Result<Self, DidError> {
        let ident = s
            .strip_prefix(DID_PREFIX)
            .ok_or_else(|| DidError::InvalidFormat(format!("missing '{DID_PREFIX}' prefix")))?;
        let bytes = bs58::decode(ident)
            .into_vec()
            .map_err(|e| DidError::InvalidFormat(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(DidError::InvalidFormat(format!(
                "identifier decodes to {} bytes, expected 32",
                bytes.len()
            )));
        }
        Ok(Did(s.to_string()))
    }

    /// `Ok` iff this DID is the one derived from `public_key`.
    pub fn check_owner(&self, public_key: &ClassicalPublicKey) -> Result<(), DidError> {
        if *self == Did::derive(public_key) {
            Ok(())
        } else {
            Err(DidError::Mismatch)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// W3C DID Document listing the identity's verification keys.
    pub fn document(&self, public: &PublicIdentity) -> DidDocument {
        let mut methods = vec![VerificationMethod {
            id: format!("{}#ed25519", self.0),
            type_: ED25519_KEY_TYPE.to_string(),
            controller: self.0.clone(),
            public_key_multibase: multibase(&[0xed, 0x01], public.classical().as_bytes()),
        }];
        if let PublicIdentity::Hybrid(pk) = public {
            methods.push(VerificationMethod {
                id: format!("{}#dilithium3", self.0),
                type_: DILITHIUM_KEY_TYPE.to_string(),
                controller: self.0.clone(),
                public_key_multibase: multibase(&[], &pk.dilithium),
            });
        }
        let refs: Vec<String> = methods.iter().map(|m| m.id.clone()).collect();

        DidDocument {
            context: vec![DID_CONTEXT.to_string()],
            id: self.0.clone(),
            verification_method: methods,
            authentication: refs.clone(),
            assertion_method: refs,
            created: Utc::now(),
        }
    }
}

/// Multibase base58btc (`z` prefix) over `codec || key`.
fn multibase(codec: &[u8], key: &[u8]) -> String {
    let mut bytes = codec.to_vec();
    bytes.extend_from_slice(key);
    format!("z{}", bs58::encode(bytes).into_string())
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Did {
    type Err = DidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Did::parse(s)
    }
}

impl TryFrom<String> for Did {
    type Error = DidError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Did::parse(&s)
    }
}

impl From<Did> for String {
    fn from(did: Did) -> String {
        did.0
    }
}

// ---------------------------------------------------------------------------
// DID Document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DidDocument {
    #[serde(rename = "@context")]
    pub context: Vec<String>,
    pub id: String,
    #[serde(rename = "verificationMethod")]
    pub verification_method: Vec<VerificationMethod>,
    pub authentication: Vec<String>,
    #[serde(rename = "assertionMethod")]
    pub assertion_method: Vec<String>,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub controller: String,
    #[serde(rename = "publicKeyMultibase")]
    pub public_key_multibase: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::ClassicalKeypair;
    use crate::identity::{generate_keypair, KeyKind};

    #[test]
    fn derived_did_has_prefix_and_parses() {
        let pk = ClassicalKeypair::generate().public_key();
        let did = Did::derive(&pk);
        assert!(did.as_str().starts_with("did:moniker:"));
        assert_eq!(Did::parse(did.as_str()).unwrap(), did);
    }

    #[test]
    fn derivation_is_deterministic() {
        let pk = ClassicalKeypair::from_seed(&[1u8; 32]).public_key();
        assert_eq!(Did::derive(&pk), Did::derive(&pk));
    }

    #[test]
    fn check_owner_rejects_foreign_key() {
        let a = ClassicalKeypair::generate().public_key();
        let b = ClassicalKeypair::generate().public_key();
        let did = Did::derive(&a);
        assert!(did.check_owner(&a).is_ok());
        assert_eq!(did.check_owner(&b), Err(DidError::Mismatch));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Did::parse("did:other:abc").is_err());
        assert!(Did::parse("did:moniker:0OIl").is_err());
        assert!(Did::parse("did:moniker:abc").is_err());
    }

    #[test]
    fn serde_goes_through_validation() {
        let did = Did::derive(&ClassicalKeypair::generate().public_key());
        let json = serde_json::to_string(&did).unwrap();
        assert_eq!(serde_json::from_str::<Did>(&json).unwrap(), did);
        assert!(serde_json::from_str::<Did>("\"did:moniker:xyz\"").is_err());
    }

    #[test]
    fn hybrid_document_lists_both_keys() {
        let id = generate_keypair(KeyKind::Hybrid, None).unwrap();
        let public = id.public();
        let doc = id.did().document(&public);
        assert_eq!(doc.verification_method.len(), 2);
        assert_eq!(doc.authentication.len(), 2);
        assert!(doc.verification_method[0].public_key_multibase.starts_with('z'));
    }
}
