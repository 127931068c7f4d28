//! # JSON Record Format
//!
//! The format peers and HTTP clients exchange. Binary fields are hex,
//! except the Dilithium key and signature which are base64 (they are
//! kilobytes long). The proof nonce is a **decimal string**: a `u128` does
//! not survive a round trip through an IEEE-754 double, so a JSON number
//! there is rejected outright instead of being silently rounded.
//!
//! Ingestion is strict. Unknown fields, fields from the other version,
//! wrong lengths and a DID that is not derived from the owner key all fail
//! before a [`NameRecord`] exists.

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::{Deserialize, Serialize};

use super::codec::{check_structure, CodecError};
use super::{LegacyRecord, NameRecord, QuantumRecord};
use crate::config::{RECORD_VERSION_LEGACY, RECORD_VERSION_QUANTUM};
use crate::crypto::hybrid::{HybridPublicKey, HybridSignature};
use crate::crypto::keys::{ClassicalPublicKey, ClassicalSignature};
use crate::identity::Did;
use crate::pow::{DifficultyParams, ProofOfWork};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordJson {
    pub version: u64,
    pub name: String,
    pub owner_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dilithium_key: Option<String>,
    pub did: String,
    pub cid: String,
    #[serde(default)]
    pub pointer_key: String,
    pub revision: u64,
    pub registered: u64,
    pub expires: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hybrid_signature: Option<HybridSignatureJson>,
    pub proof: ProofJson,
    #[serde(default)]
    pub previous_hash: Option<String>,
    #[serde(default)]
    pub providers: Vec<String>,
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_sha3: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HybridSignatureJson {
    pub ed25519: String,
    pub dilithium: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProofJson {
    /// Decimal string. Kept as a raw JSON value so a number can be told
    /// apart from a malformed string.
    pub nonce: serde_json::Value,
    pub timestamp: u64,
    pub hash: String,
    pub difficulty: DifficultyParams,
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn hex32(field: &'static str, s: &str) -> Result<[u8; 32], CodecError> {
    let bytes = hex::decode(s).map_err(|e| CodecError::field(field, e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| CodecError::field(field, "expected 32 bytes"))
}

fn b64(field: &'static str, s: &str) -> Result<Vec<u8>, CodecError> {
    B64.decode(s).map_err(|e| CodecError::field(field, e.to_string()))
}

fn parse_nonce(value: &serde_json::Value) -> Result<u128, CodecError> {
    match value {
        serde_json::Value::String(s) => {
            if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
                return Err(CodecError::field("proof.nonce", "not a decimal string"));
            }
            s.parse::<u128>()
                .map_err(|e| CodecError::field("proof.nonce", e.to_string()))
        }
        serde_json::Value::Number(_) => Err(CodecError::NumericNonce),
        _ => Err(CodecError::field("proof.nonce", "expected a decimal string")),
    }
}

fn reject_present<T>(field: &'static str, value: &Option<T>) -> Result<(), CodecError> {
    if value.is_some() {
        Err(CodecError::field(field, "not allowed for this record version"))
    } else {
        Ok(())
    }
}

fn required<T>(field: &'static str, value: Option<T>) -> Result<T, CodecError> {
    value.ok_or_else(|| CodecError::field(field, "required for this record version"))
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<&NameRecord> for RecordJson {
    fn from(record: &NameRecord) -> Self {
        let proof = record.proof();
        let proof = ProofJson {
            nonce: serde_json::Value::String(proof.nonce.to_string()),
            timestamp: proof.timestamp,
            hash: hex::encode(proof.hash),
            difficulty: proof.params,
        };
        let previous_hash = record.previous_hash().map(hex::encode);

        match record {
            NameRecord::V1(r) => RecordJson {
                version: u64::from(RECORD_VERSION_LEGACY),
                name: r.name.clone(),
                owner_key: r.owner.to_hex(),
                dilithium_key: None,
                did: r.did.to_string(),
                cid: r.cid.clone(),
                pointer_key: r.pointer_key.clone(),
                revision: r.revision,
                registered: r.registered,
                expires: r.expires,
                signature: Some(r.signature.to_hex()),
                hybrid_signature: None,
                proof,
                previous_hash,
                providers: r.providers.clone(),
                hash: hex::encode(r.hash),
                hash_sha3: None,
            },
            NameRecord::V2(r) => RecordJson {
                version: u64::from(RECORD_VERSION_QUANTUM),
                name: r.name.clone(),
                owner_key: r.owner.classical.to_hex(),
                dilithium_key: Some(B64.encode(&r.owner.dilithium)),
                did: r.did.to_string(),
                cid: r.cid.clone(),
                pointer_key: r.pointer_key.clone(),
                revision: r.revision,
                registered: r.registered,
                expires: r.expires,
                signature: None,
                hybrid_signature: Some(HybridSignatureJson {
                    ed25519: r.signature.classical.to_hex(),
                    dilithium: B64.encode(&r.signature.dilithium),
                    timestamp: r.signature.timestamp,
                }),
                proof,
                previous_hash,
                providers: r.providers.clone(),
                hash: hex::encode(r.hash),
                hash_sha3: Some(hex::encode(r.hash_sha3)),
            },
        }
    }
}

impl TryFrom<RecordJson> for NameRecord {
    type Error = CodecError;

    fn try_from(json: RecordJson) -> Result<Self, Self::Error> {
        let owner = ClassicalPublicKey::from_hex(&json.owner_key)
            .map_err(|e| CodecError::field("owner_key", e.to_string()))?;
        let did = Did::parse(&json.did).map_err(|e| CodecError::field("did", e.to_string()))?;
        let proof = ProofOfWork {
            nonce: parse_nonce(&json.proof.nonce)?,
            timestamp: json.proof.timestamp,
            hash: hex32("proof.hash", &json.proof.hash)?,
            params: json.proof.difficulty,
        };
        let previous_hash = json
            .previous_hash
            .as_deref()
            .map(|s| hex32("previous_hash", s))
            .transpose()?;
        let hash = hex32("hash", &json.hash)?;

        let record = match json.version {
            v if v == u64::from(RECORD_VERSION_LEGACY) => {
                reject_present("dilithium_key", &json.dilithium_key)?;
                reject_present("hybrid_signature", &json.hybrid_signature)?;
                reject_present("hash_sha3", &json.hash_sha3)?;
                let signature = ClassicalSignature::from_hex(&required("signature", json.signature)?)
                    .map_err(|e| CodecError::field("signature", e.to_string()))?;
                NameRecord::V1(LegacyRecord {
                    name: json.name,
                    owner,
                    did,
                    cid: json.cid,
                    pointer_key: json.pointer_key,
                    revision: json.revision,
                    registered: json.registered,
                    expires: json.expires,
                    signature,
                    proof,
                    previous_hash,
                    providers: json.providers,
                    hash,
                })
            }
            v if v == u64::from(RECORD_VERSION_QUANTUM) => {
                reject_present("signature", &json.signature)?;
                let dilithium = b64("dilithium_key", &required("dilithium_key", json.dilithium_key)?)?;
                let owner = HybridPublicKey::new(owner, dilithium)
                    .map_err(|e| CodecError::field("dilithium_key", e.to_string()))?;
                let sig = required("hybrid_signature", json.hybrid_signature)?;
                let signature = HybridSignature {
                    classical: ClassicalSignature::from_hex(&sig.ed25519)
                        .map_err(|e| CodecError::field("hybrid_signature.ed25519", e.to_string()))?,
                    dilithium: b64("hybrid_signature.dilithium", &sig.dilithium)?,
                    timestamp: sig.timestamp,
                };
                let hash_sha3 = hex32("hash_sha3", &required("hash_sha3", json.hash_sha3)?)?;
                NameRecord::V2(QuantumRecord {
                    name: json.name,
                    owner,
                    did,
                    cid: json.cid,
                    pointer_key: json.pointer_key,
                    revision: json.revision,
                    registered: json.registered,
                    expires: json.expires,
                    signature,
                    proof,
                    previous_hash,
                    providers: json.providers,
                    hash,
                    hash_sha3,
                })
            }
            other => return Err(CodecError::UnknownVersion(other)),
        };

        check_structure(&record)?;
        Ok(record)
    }
}

impl RecordJson {
    /// Parse and convert in one step.
    pub fn parse(text: &str) -> Result<NameRecord, CodecError> {
        let json: RecordJson =
            serde_json::from_str(text).map_err(|e| CodecError::Json(e.to_string()))?;
        NameRecord::try_from(json)
    }

    /// Convert an already-parsed JSON value (an HTTP body, a gossip payload).
    pub fn from_value(value: serde_json::Value) -> Result<NameRecord, CodecError> {
        let json: RecordJson =
            serde_json::from_value(value).map_err(|e| CodecError::Json(e.to_string()))?;
        NameRecord::try_from(json)
    }

    pub fn render(record: &NameRecord) -> Result<String, CodecError> {
        serde_json::to_string(&RecordJson::from(record)).map_err(|e| CodecError::Json(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::builder::tests::{legacy_record, quantum_record};

    #[test]
    fn json_roundtrip_both_versions() {
        for record in [legacy_record("json-legacy"), quantum_record("json-quantum")] {
            let text = RecordJson::render(&record).unwrap();
            assert_eq!(RecordJson::parse(&text).unwrap(), record);
        }
    }

    #[test]
    fn nonce_near_u128_max_survives() {
        let NameRecord::V1(mut r) = legacy_record("json-legacy") else {
            unreachable!()
        };
        r.proof.nonce = u128::MAX - 7;
        let record = NameRecord::V1(r);
        let text = RecordJson::render(&record).unwrap();
        assert!(text.contains(&format!("\"{}\"", u128::MAX - 7)));
        assert_eq!(RecordJson::parse(&text).unwrap().proof().nonce, u128::MAX - 7);
    }

    #[test]
    fn numeric_nonce_is_rejected() {
        let record = legacy_record("json-legacy");
        let mut value = serde_json::to_value(RecordJson::from(&record)).unwrap();
        value["proof"]["nonce"] = serde_json::json!(12345);
        assert_eq!(RecordJson::from_value(value), Err(CodecError::NumericNonce));
    }

    #[test]
    fn signed_or_padded_nonce_strings_are_rejected() {
        let record = legacy_record("json-legacy");
        for bad in ["+12", "-1", "", "0x10", " 7"] {
            let mut value = serde_json::to_value(RecordJson::from(&record)).unwrap();
            value["proof"]["nonce"] = serde_json::json!(bad);
            assert!(RecordJson::from_value(value).is_err(), "{bad:?} accepted");
        }
    }

    #[test]
    fn unknown_field_is_rejected() {
        let record = legacy_record("json-legacy");
        let mut value = serde_json::to_value(RecordJson::from(&record)).unwrap();
        value["admin"] = serde_json::json!(true);
        assert!(matches!(RecordJson::from_value(value), Err(CodecError::Json(_))));
    }

    #[test]
    fn cross_version_fields_are_rejected() {
        let v2 = quantum_record("json-quantum");
        let mut value = serde_json::to_value(RecordJson::from(&v2)).unwrap();
        value["version"] = serde_json::json!(1);
        assert!(RecordJson::from_value(value).is_err());
    }

    #[test]
    fn claimed_did_must_match_key() {
        let record = legacy_record("json-legacy");
        let other = legacy_record("json-other");
        let mut value = serde_json::to_value(RecordJson::from(&record)).unwrap();
        value["did"] = serde_json::json!(other.did().to_string());
        assert_eq!(RecordJson::from_value(value), Err(CodecError::DidMismatch));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let record = legacy_record("json-legacy");
        let mut value = serde_json::to_value(RecordJson::from(&record)).unwrap();
        value["version"] = serde_json::json!(3);
        value["signature"] = serde_json::Value::Null;
        assert!(RecordJson::from_value(value).is_err());
    }

    #[test]
    fn short_hash_is_rejected() {
        let record = legacy_record("json-legacy");
        let mut value = serde_json::to_value(RecordJson::from(&record)).unwrap();
        value["hash"] = serde_json::json!("abcd");
        assert!(matches!(
            RecordJson::from_value(value),
            Err(CodecError::Field { field: "hash", .. })
        ));
    }
}
