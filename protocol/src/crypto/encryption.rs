//! # Password-Based Sealing
//!
//! AES-256-GCM under a key stretched from a password with Argon2id. This is
//! what protects the secret half of an exported identity at rest.
//!
//! ## Wire format
//!
//! [`seal`] returns a [`SealedBox`] holding the random 16-byte salt, the
//! random 12-byte GCM nonce, the KDF parameters and `ciphertext || tag`.
//! Everything needed to open the box except the password travels with it.
//!
//! Nonces are random. With a fresh salt per box every box also has a fresh
//! key, so the GCM birthday bound never comes into play.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{
    AES_KEY_LENGTH, AES_NONCE_LENGTH, KEYFILE_KDF_ITERATIONS, KEYFILE_KDF_MEMORY_KIB,
    KEYFILE_SALT_LENGTH,
};

/// Errors that can occur during sealing/opening.
///
/// Wrong password and corrupted ciphertext are the same error on purpose.
#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed -- wrong password or corrupted ciphertext")]
    DecryptFailed,

    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("invalid {field} length")]
    InvalidLength { field: &'static str },
}

/// Argon2id cost parameters, stored alongside the ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: KEYFILE_KDF_MEMORY_KIB,
            iterations: KEYFILE_KDF_ITERATIONS,
        }
    }
}

/// Stretch `password` into an AES-256 key.
pub fn derive_key(
    password: &str,
    salt: &[u8],
    params: KdfParams,
) -> Result<[u8; AES_KEY_LENGTH], EncryptionError> {
    let argon_params = Params::new(params.memory_kib, params.iterations, 1, Some(AES_KEY_LENGTH))
        .map_err(|e| EncryptionError::Kdf(e.to_string()))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut key = [0u8; AES_KEY_LENGTH];
    argon
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| EncryptionError::Kdf(e.to_string()))?;
    Ok(key)
}

/// Encrypt with AAD under a raw key. Returns `(nonce, ciphertext || tag)`.
pub fn encrypt_with_aad(
    key: &[u8; AES_KEY_LENGTH],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<([u8; AES_NONCE_LENGTH], Vec<u8>), EncryptionError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::EncryptFailed)?;

    let mut nonce_bytes = [0u8; AES_NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| EncryptionError::EncryptFailed)?;

    Ok((nonce_bytes, ciphertext))
}

/// Inverse of [`encrypt_with_aad`]. Nonce and AAD must match exactly.
pub fn decrypt_with_aad(
    key: &[u8; AES_KEY_LENGTH],
    nonce: &[u8; AES_NONCE_LENGTH],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::DecryptFailed)?;
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| EncryptionError::DecryptFailed)
}

// ---------------------------------------------------------------------------
// SealedBox
// ---------------------------------------------------------------------------

/// Password-sealed payload with everything but the password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBox {
    pub kdf: KdfParams,
    pub salt: Vec<u8>,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Seal `plaintext` under `password`. `aad` is authenticated, not stored.
pub fn seal(
    password: &str,
    plaintext: &[u8],
    aad: &[u8],
    kdf: KdfParams,
) -> Result<SealedBox, EncryptionError> {
    let mut salt = [0u8; KEYFILE_SALT_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut salt);

    let key = derive_key(password, &salt, kdf)?;
    let (nonce, ciphertext) = encrypt_with_aad(&key, plaintext, aad)?;

    Ok(SealedBox {
        kdf,
        salt: salt.to_vec(),
        nonce: nonce.to_vec(),
        ciphertext,
    })
}

/// Open a [`SealedBox`].
pub fn open(password: &str, sealed: &SealedBox, aad: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    if sealed.salt.len() != KEYFILE_SALT_LENGTH {
        return Err(EncryptionError::InvalidLength { field: "salt" });
    }
    let nonce: &[u8; AES_NONCE_LENGTH] = sealed
        .nonce
        .as_slice()
        .try_into()
        .map_err(|_| EncryptionError::InvalidLength { field: "nonce" })?;

    let key = derive_key(password, &sealed.salt, sealed.kdf)?;
    decrypt_with_aad(&key, nonce, &sealed.ciphertext, aad)
}
