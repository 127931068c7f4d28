//! # Key Files
//!
//! JSON export/import of identities. The public section is always readable;
//! the secret section is either plain or sealed with a password
//! (Argon2id-derived key, AES-256-GCM, random salt stored in the file).
//!
//! ```json
//! {
//!   "format": 1,
//!   "kind": "hybrid",
//!   "did": "did:moniker:...",
//!   "public": { "ed25519": "<hex>", "dilithium": "<base64>" },
//!   "secret": { "sealed": { "memory_kib": 65536, "iterations": 3,
//!               "salt": "<hex>", "nonce": "<hex>", "ciphertext": "<base64>" } }
//! }
//! ```
//!
//! The key kind is mixed into the AEAD associated data, so flipping
//! `"kind"` in a sealed file breaks decryption instead of misreading the
//! secret bytes.

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use super::{Did, Identity, KeyKind};
use crate::crypto::encryption::{self, EncryptionError, KdfParams, SealedBox};
use crate::crypto::hybrid::HybridKeypair;
use crate::crypto::keys::{ClassicalKeypair, KeyError};
use crate::error::ErrorClass;

const KEYFILE_FORMAT: u8 = 1;

#[derive(Debug, Error)]
pub enum KeyFileError {
    #[error("key file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported key file format {0}")]
    UnsupportedFormat(u8),

    #[error("malformed key file field '{0}'")]
    Encoding(&'static str),

    #[error("key file is encrypted; a password is required")]
    PasswordRequired,

    #[error("could not decrypt key file -- wrong password or corrupted file")]
    Decrypt,

    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("key material rejected: {0}")]
    Key(#[from] KeyError),

    #[error("key file DID does not match its keys")]
    DidMismatch,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl KeyFileError {
    pub fn class(&self) -> ErrorClass {
        match self {
            KeyFileError::Io(_) => ErrorClass::Storage,
            _ => ErrorClass::MalformedInput,
        }
    }
}

impl From<EncryptionError> for KeyFileError {
    fn from(e: EncryptionError) -> Self {
        match e {
            EncryptionError::Kdf(msg) => KeyFileError::Kdf(msg),
            EncryptionError::InvalidLength { field } => KeyFileError::Encoding(field),
            EncryptionError::EncryptFailed | EncryptionError::DecryptFailed => KeyFileError::Decrypt,
        }
    }
}

// ---------------------------------------------------------------------------
// On-disk shape
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct KeyFile {
    format: u8,
    kind: KeyKind,
    did: Did,
    public: PublicSection,
    secret: SecretSection,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct PublicSection {
    ed25519: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dilithium: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum SecretSection {
    Plain(SecretMaterial),
    Sealed(SealedSection),
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SecretMaterial {
    ed25519: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dilithium: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SealedSection {
    memory_kib: u32,
    iterations: u32,
    salt: String,
    nonce: String,
    ciphertext: String,
}

fn aad_for(kind: KeyKind) -> Vec<u8> {
    format!("moniker-keyfile:{kind}").into_bytes()
}

// ---------------------------------------------------------------------------
// Export / import
// ---------------------------------------------------------------------------

/// Export with the default Argon2id cost.
pub fn export_identity(identity: &Identity, password: Option<&str>) -> Result<Vec<u8>, KeyFileError> {
    export_identity_with(identity, password, KdfParams::default())
}

/// Export with an explicit KDF cost.
pub fn export_identity_with(
    identity: &Identity,
    password: Option<&str>,
    kdf: KdfParams,
) -> Result<Vec<u8>, KeyFileError> {
    let kind = identity.kind();
    let (public, material) = match identity {
        Identity::Legacy(kp) => (
            PublicSection {
                ed25519: kp.public_key().to_hex(),
                dilithium: None,
            },
            SecretMaterial {
                ed25519: hex::encode(kp.secret_key_bytes()),
                dilithium: None,
            },
        ),
        Identity::Hybrid(kp) => (
            PublicSection {
                ed25519: kp.classical().public_key().to_hex(),
                dilithium: Some(B64.encode(&kp.public_key().dilithium)),
            },
            SecretMaterial {
                ed25519: hex::encode(kp.classical().secret_key_bytes()),
                dilithium: Some(B64.encode(kp.dilithium_secret_bytes())),
            },
        ),
    };

    let secret = match password {
        None => SecretSection::Plain(material),
        Some(pw) => {
            let plaintext = serde_json::to_vec(&material)?;
            let sealed = encryption::seal(pw, &plaintext, &aad_for(kind), kdf)?;
            SecretSection::Sealed(SealedSection {
                memory_kib: sealed.kdf.memory_kib,
                iterations: sealed.kdf.iterations,
                salt: hex::encode(&sealed.salt),
                nonce: hex::encode(&sealed.nonce),
                ciphertext: B64.encode(&sealed.ciphertext),
            })
        }
    };

    let file = KeyFile {
        format: KEYFILE_FORMAT,
        kind,
        did: identity.did(),
        public,
        secret,
    };
    Ok(serde_json::to_vec_pretty(&file)?)
}

/// Import a key file produced by [`export_identity`].
///
/// A wrong password is always [`KeyFileError::Decrypt`]. The rebuilt keys
/// are checked against the public section and the DID before returning.
pub fn import_identity(bytes: &[u8], password: Option<&str>) -> Result<Identity, KeyFileError> {
    let file: KeyFile = serde_json::from_slice(bytes)?;
    if file.format != KEYFILE_FORMAT {
        return Err(KeyFileError::UnsupportedFormat(file.format));
    }

    let material = match file.secret {
        SecretSection::Plain(m) => m,
        SecretSection::Sealed(s) => {
            let pw = password.ok_or(KeyFileError::PasswordRequired)?;
            let sealed = SealedBox {
                kdf: KdfParams {
                    memory_kib: s.memory_kib,
                    iterations: s.iterations,
                },
                salt: hex::decode(&s.salt).map_err(|_| KeyFileError::Encoding("salt"))?,
                nonce: hex::decode(&s.nonce).map_err(|_| KeyFileError::Encoding("nonce"))?,
                ciphertext: B64
                    .decode(&s.ciphertext)
                    .map_err(|_| KeyFileError::Encoding("ciphertext"))?,
            };
            let plaintext = encryption::open(pw, &sealed, &aad_for(file.kind))?;
            serde_json::from_slice(&plaintext).map_err(|_| KeyFileError::Decrypt)?
        }
    };

    let classical_secret =
        hex::decode(&material.ed25519).map_err(|_| KeyFileError::Encoding("ed25519"))?;

    let identity = match file.kind {
        KeyKind::Legacy => Identity::Legacy(ClassicalKeypair::from_secret_slice(&classical_secret)?),
        KeyKind::Hybrid => {
            let pq_public = file
                .public
                .dilithium
                .as_deref()
                .ok_or(KeyFileError::Encoding("public.dilithium"))
                .and_then(|s| B64.decode(s).map_err(|_| KeyFileError::Encoding("public.dilithium")))?;
            let pq_secret = material
                .dilithium
                .as_deref()
                .ok_or(KeyFileError::Encoding("secret.dilithium"))
                .and_then(|s| B64.decode(s).map_err(|_| KeyFileError::Encoding("secret.dilithium")))?;
            Identity::Hybrid(HybridKeypair::from_parts(
                &classical_secret,
                &pq_public,
                &pq_secret,
            )?)
        }
    };

    if identity.classical().public_key().to_hex() != file.public.ed25519.to_ascii_lowercase() {
        return Err(KeyFileError::DidMismatch);
    }
    if identity.did() != file.did {
        return Err(KeyFileError::DidMismatch);
    }
    Ok(identity)
}

/// Write a key file to disk.
pub fn write_key_file(
    path: &Path,
    identity: &Identity,
    password: Option<&str>,
) -> Result<(), KeyFileError> {
    let bytes = export_identity(identity, password)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Read a key file from disk.
pub fn read_key_file(path: &Path, password: Option<&str>) -> Result<Identity, KeyFileError> {
    let bytes = std::fs::read(path)?;
    import_identity(&bytes, password)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::generate_keypair;

    const FAST: KdfParams = KdfParams {
        memory_kib: 64,
        iterations: 1,
    };

    #[test]
    fn plain_legacy_roundtrip() {
        let id = generate_keypair(KeyKind::Legacy, None).unwrap();
        let bytes = export_identity_with(&id, None, FAST).unwrap();
        let back = import_identity(&bytes, None).unwrap();
        assert_eq!(back.public(), id.public());
    }

    #[test]
    fn sealed_hybrid_roundtrip() {
        let id = generate_keypair(KeyKind::Hybrid, None).unwrap();
        let bytes = export_identity_with(&id, Some("correct horse"), FAST).unwrap();
        let back = import_identity(&bytes, Some("correct horse")).unwrap();
        assert_eq!(back.public(), id.public());
        assert_eq!(back.kind(), KeyKind::Hybrid);
    }

    #[test]
    fn wrong_password_is_decrypt_error() {
        let id = generate_keypair(KeyKind::Legacy, None).unwrap();
        let bytes = export_identity_with(&id, Some("right"), FAST).unwrap();
        assert!(matches!(
            import_identity(&bytes, Some("wrong")),
            Err(KeyFileError::Decrypt)
        ));
    }

    #[test]
    fn sealed_file_needs_password() {
        let id = generate_keypair(KeyKind::Legacy, None).unwrap();
        let bytes = export_identity_with(&id, Some("pw"), FAST).unwrap();
        assert!(matches!(
            import_identity(&bytes, None),
            Err(KeyFileError::PasswordRequired)
        ));
    }

    #[test]
    fn sealed_file_has_no_plaintext_secret() {
        let id = generate_keypair(KeyKind::Legacy, Some([0x42; 32])).unwrap();
        let bytes = export_identity_with(&id, Some("pw"), FAST).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains(&hex::encode([0x42u8; 32])));
    }

    #[test]
    fn tampered_did_is_rejected() {
        let id = generate_keypair(KeyKind::Legacy, None).unwrap();
        let other = generate_keypair(KeyKind::Legacy, None).unwrap();
        let bytes = export_identity_with(&id, None, FAST).unwrap();
        let mut json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        json["did"] = serde_json::Value::String(other.did().to_string());
        let tampered = serde_json::to_vec(&json).unwrap();
        assert!(matches!(
            import_identity(&tampered, None),
            Err(KeyFileError::DidMismatch)
        ));
    }

    #[test]
    fn file_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id.json");
        let id = generate_keypair(KeyKind::Legacy, None).unwrap();
        write_key_file(&path, &id, None).unwrap();
        assert_eq!(read_key_file(&path, None).unwrap().did(), id.did());
    }
}
