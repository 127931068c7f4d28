//! # Identity
//!
//! Who owns a name. Two kinds exist:
//!
//! 1. **Legacy** -- a single Ed25519 keypair. Signs V1 records.
//! 2. **Hybrid** -- Ed25519 plus Dilithium3. Signs V2 records with a
//!    timestamp-bound [`HybridSignature`](crate::crypto::HybridSignature).
//!
//! Both kinds derive their [`Did`] from the Ed25519 public key, and
//! [`keyfile`] moves either kind to and from disk.

pub mod did;
pub mod keyfile;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::crypto::hybrid::{HybridKeypair, HybridPublicKey};
use crate::crypto::keys::{ClassicalKeypair, ClassicalPublicKey, KeyError};

pub use did::{Did, DidDocument, DidError};
pub use keyfile::{export_identity, import_identity, KeyFileError};

/// Which kind of identity to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    Legacy,
    Hybrid,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyKind::Legacy => f.write_str("legacy"),
            KeyKind::Hybrid => f.write_str("hybrid"),
        }
    }
}

impl FromStr for KeyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "legacy" | "v1" => Ok(KeyKind::Legacy),
            "hybrid" | "v2" => Ok(KeyKind::Hybrid),
            other => Err(format!("unknown key kind '{other}'")),
        }
    }
}

/// A signing identity, secret material included.
#[derive(Clone, Debug)]
pub enum Identity {
    Legacy(ClassicalKeypair),
    Hybrid(HybridKeypair),
}

impl Identity {
    pub fn kind(&self) -> KeyKind {
        match self {
            Identity::Legacy(_) => KeyKind::Legacy,
            Identity::Hybrid(_) => KeyKind::Hybrid,
        }
    }

    /// The Ed25519 keypair present in both kinds.
    pub fn classical(&self) -> &ClassicalKeypair {
        match self {
            Identity::Legacy(kp) => kp,
            Identity::Hybrid(kp) => kp.classical(),
        }
    }

    pub fn public(&self) -> PublicIdentity {
        match self {
            Identity::Legacy(kp) => PublicIdentity::Legacy(kp.public_key()),
            Identity::Hybrid(kp) => PublicIdentity::Hybrid(kp.public_key()),
        }
    }

    pub fn did(&self) -> Did {
        Did::derive(&self.classical().public_key())
    }
}

/// The shareable half of an [`Identity`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PublicIdentity {
    Legacy(ClassicalPublicKey),
    Hybrid(HybridPublicKey),
}

impl PublicIdentity {
    pub fn kind(&self) -> KeyKind {
        match self {
            PublicIdentity::Legacy(_) => KeyKind::Legacy,
            PublicIdentity::Hybrid(_) => KeyKind::Hybrid,
        }
    }

    pub fn classical(&self) -> &ClassicalPublicKey {
        match self {
            PublicIdentity::Legacy(pk) => pk,
            PublicIdentity::Hybrid(pk) => &pk.classical,
        }
    }

    pub fn did(&self) -> Did {
        Did::derive(self.classical())
    }
}

/// Generate a new identity.
///
/// A seed is only honoured for legacy identities, where it becomes the
/// Ed25519 secret key. The Dilithium backend has no seeded key generation,
/// so asking for a seeded hybrid identity is an error rather than a silent
/// fallback to random keys.
pub fn generate_keypair(kind: KeyKind, seed: Option<[u8; 32]>) -> Result<Identity, KeyError> {
    match (kind, seed) {
        (KeyKind::Legacy, Some(seed)) => Ok(Identity::Legacy(ClassicalKeypair::from_seed(&seed))),
        (KeyKind::Legacy, None) => Ok(Identity::Legacy(ClassicalKeypair::generate())),
        (KeyKind::Hybrid, None) => Ok(Identity::Hybrid(HybridKeypair::generate())),
        (KeyKind::Hybrid, Some(_)) => Err(KeyError::SeededHybridUnsupported),
    }
}
