//! # Protocol Configuration & Constants
//!
//! Every magic number in Moniker lives here. Verifiers on different nodes
//! must agree on all of these, so changing one is a protocol change, not a
//! tuning decision. Node-local knobs (ports, intervals, TTLs) have defaults
//! here too, but the node binary lets operators override them.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Crate/protocol version string reported by nodes.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Wire tag for legacy (Ed25519-only, fixed-cost PoW) records.
pub const RECORD_VERSION_LEGACY: u8 = 1;

/// Wire tag for quantum-resistant (hybrid signature, memory-hard PoW) records.
pub const RECORD_VERSION_QUANTUM: u8 = 2;

/// Prefix of every decentralized identifier minted by this protocol.
pub const DID_PREFIX: &str = "did:moniker:";

// ---------------------------------------------------------------------------
// Names
// ---------------------------------------------------------------------------

/// Shortest registrable name. One- and two-letter names are reserved.
pub const MIN_NAME_LENGTH: usize = 3;

/// Longest registrable name (a DNS label's worth).
pub const MAX_NAME_LENGTH: usize = 63;

/// Default lifetime of a fresh registration: one year.
pub const DEFAULT_RECORD_LIFETIME: Duration = Duration::from_secs(365 * 24 * 3600);

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// Ed25519 public key length.
pub const CLASSICAL_PUBLIC_KEY_LENGTH: usize = 32;

/// Ed25519 signature length.
pub const CLASSICAL_SIGNATURE_LENGTH: usize = 64;

/// Digest length for SHA-256, SHA3-256 and BLAKE3 alike.
pub const HASH_OUTPUT_LENGTH: usize = 32;

/// AES-256-GCM key length used for encrypted key files.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-256-GCM nonce length. Twelve bytes, always.
pub const AES_NONCE_LENGTH: usize = 12;

/// Salt length for the Argon2id key-file KDF.
pub const KEYFILE_SALT_LENGTH: usize = 16;

/// Argon2id memory cost (KiB) for deriving key-file encryption keys.
pub const KEYFILE_KDF_MEMORY_KIB: u32 = 64 * 1024;

/// Argon2id pass count for key-file encryption keys.
pub const KEYFILE_KDF_ITERATIONS: u32 = 3;

// ---------------------------------------------------------------------------
// Timing Windows
// ---------------------------------------------------------------------------

/// Hybrid signatures older than this (relative to the verification reference
/// time) are rejected outright.
pub const HYBRID_SIGNATURE_MAX_AGE: Duration = Duration::from_secs(3600);

/// Proofs of work older than this are rejected.
pub const POW_MAX_AGE: Duration = Duration::from_secs(3600);

/// Earliest acceptable proof-of-work timestamp (2025-01-01T00:00:00Z, in ms).
/// Anything older was precomputed before the protocol existed.
pub const MIN_POW_TIMESTAMP_MS: u64 = 1_735_689_600_000;

/// Tolerated clock drift for timestamps that appear to be in the future.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// After this instant (2030-01-01T00:00:00Z, in ms) verifiers may skip the
/// Ed25519 half of a hybrid signature once the Dilithium half has passed.
pub const LEGACY_CUTOVER_MS: u64 = 1_893_456_000_000;

/// Nonces are garbage-collected this long after issuance, used or not.
pub const NONCE_EXPIRY: Duration = Duration::from_secs(3600);

/// How often the nonce ledger sweeps expired entries.
pub const NONCE_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// Resolution & Propagation
// ---------------------------------------------------------------------------

/// Lifetime of an entry in the hot cache tier.
pub const HOT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Lifetime of an entry in the warm cache tier.
pub const WARM_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Upper bound on a single DHT get/put.
pub const DHT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on a single bootstrap-peer HTTP call.
pub const BOOTSTRAP_PEER_TIMEOUT: Duration = Duration::from_secs(4);

/// How often a bootstrap node publishes its full index snapshot.
pub const INDEX_PUBLISH_INTERVAL: Duration = Duration::from_secs(600);

/// How long `sync_on_startup` waits for snapshot announcements.
pub const STARTUP_SYNC_WINDOW: Duration = Duration::from_secs(5);

/// DHT keys for name records are `DHT_KEY_PREFIX || sha256(name)` in hex.
pub const DHT_KEY_PREFIX: &str = "/moniker/names/";

/// Gossip topic for legacy record announcements.
pub const TOPIC_RECORDS_V1: &str = "moniker/records/v1";

/// Gossip topic for quantum-resistant record announcements.
pub const TOPIC_RECORDS_V2: &str = "moniker/records/v2";

/// Gossip topic for index-snapshot announcements.
pub const TOPIC_INDEX: &str = "moniker/index";

/// Gossip topic for start-up sync requests and responses.
pub const TOPIC_SYNC: &str = "moniker/sync";

/// Hops a gossip message may travel before it is dropped.
pub const GOSSIP_MESSAGE_TTL: u8 = 6;

/// Bound on the gossip deduplication cache.
pub const GOSSIP_SEEN_CACHE_SIZE: usize = 50_000;

// ---------------------------------------------------------------------------
// Node Defaults
// ---------------------------------------------------------------------------

/// Default HTTP API port of a bootstrap node.
pub const DEFAULT_API_PORT: u16 = 7070;

/// Default Prometheus metrics port.
pub const DEFAULT_METRICS_PORT: u16 = 7071;

// ---------------------------------------------------------------------------
// Networks
// ---------------------------------------------------------------------------

/// Which network a node participates in.
///
/// The network selects the memory-hard proof-of-work schedule. Mainnet uses
/// the full 16 MiB to 8 GiB range; devnet shrinks memory costs so a laptop
/// can register a name in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    #[default]
    Devnet,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Devnet => write!(f, "devnet"),
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "devnet" => Ok(Network::Devnet),
            other => Err(format!("unknown network '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Utility
// ---------------------------------------------------------------------------

/// Current wall-clock time in unix milliseconds.
pub fn unix_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Duration helper for millisecond arithmetic on `u64` timestamps.
pub fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}
