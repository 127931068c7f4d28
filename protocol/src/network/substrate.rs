//! # Substrate Abstractions
//!
//! Moniker does not ship a storage or transport network of its own. It
//! talks to one through three narrow traits:
//!
//! - [`ContentStore`] -- content-addressed blobs (`add`, `get`, `pin`),
//! - [`PubSub`] -- topic broadcast with per-subscriber channels,
//! - [`Dht`] -- a key/value routing table.
//!
//! The in-memory implementations back tests and single-process
//! deployments. Several nodes can share one [`MemoryPubSub`] (and one
//! [`MemoryContentStore`] / [`MemoryDht`]) to simulate a network.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

use crate::config::DHT_KEY_PREFIX;
use crate::crypto::hash::sha256;
use crate::error::ErrorClass;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubstrateError {
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("content {0} is not available")]
    Unavailable(Cid),

    #[error("subscription to '{0}' is closed")]
    Closed(String),

    #[error("substrate backend failed: {0}")]
    Backend(String),
}

impl SubstrateError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Unreachable
    }
}

pub type SubstrateResult<T> = Result<T, SubstrateError>;

// ---------------------------------------------------------------------------
// Cid
// ---------------------------------------------------------------------------

/// Content identifier. Derived identifiers use the CIDv0 layout: base58 of
/// the sha2-256 multihash (`0x12 0x20 || digest`).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cid(String);

impl Cid {
    /// Wrap an identifier produced elsewhere.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn for_bytes(bytes: &[u8]) -> Self {
        let mut multihash = Vec::with_capacity(34);
        multihash.extend_from_slice(&[0x12, 0x20]);
        multihash.extend_from_slice(&sha256(bytes));
        Self(bs58::encode(multihash).into_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({})", self.0)
    }
}

/// DHT key under which `name`'s record CID is published.
pub fn dht_key(name: &str) -> String {
    format!("{DHT_KEY_PREFIX}{}", hex::encode(sha256(name.as_bytes())))
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn add(&self, bytes: Vec<u8>) -> SubstrateResult<Cid>;

    /// `Ok(None)` when the content is simply not known here.
    async fn get(&self, cid: &Cid) -> SubstrateResult<Option<Vec<u8>>>;

    async fn pin(&self, cid: &Cid) -> SubstrateResult<()>;
}

/// A message delivered to a topic subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    pub topic: String,
    pub data: Vec<u8>,
}

#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, topic: &str, data: Vec<u8>) -> SubstrateResult<()>;

    async fn subscribe(&self, topic: &str) -> SubstrateResult<mpsc::Receiver<PubSubMessage>>;
}

#[async_trait]
pub trait Dht: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>) -> SubstrateResult<()>;

    async fn get(&self, key: &str) -> SubstrateResult<Option<Vec<u8>>>;
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryContentStore {
    blobs: DashMap<Cid, Vec<u8>>,
    pinned: DashMap<Cid, ()>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn is_pinned(&self, cid: &Cid) -> bool {
        self.pinned.contains_key(cid)
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn add(&self, bytes: Vec<u8>) -> SubstrateResult<Cid> {
        let cid = Cid::for_bytes(&bytes);
        self.blobs.insert(cid.clone(), bytes);
        Ok(cid)
    }

    async fn get(&self, cid: &Cid) -> SubstrateResult<Option<Vec<u8>>> {
        Ok(self.blobs.get(cid).map(|b| b.value().clone()))
    }

    async fn pin(&self, cid: &Cid) -> SubstrateResult<()> {
        if !self.blobs.contains_key(cid) {
            return Err(SubstrateError::Unavailable(cid.clone()));
        }
        self.pinned.insert(cid.clone(), ());
        Ok(())
    }
}

/// Broadcast to every live subscriber of a topic. Full or closed
/// subscriber channels are skipped; closed ones are pruned.
#[derive(Debug)]
pub struct MemoryPubSub {
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<PubSubMessage>>>>,
    capacity: usize,
}

impl Default for MemoryPubSub {
    fn default() -> Self {
        Self::with_capacity(1024)
    }
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-subscriber channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers.lock().get(topic).map(Vec::len).unwrap_or(0)
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn publish(&self, topic: &str, data: Vec<u8>) -> SubstrateResult<()> {
        let mut subscribers = self.subscribers.lock();
        if let Some(senders) = subscribers.get_mut(topic) {
            senders.retain(|tx| !tx.is_closed());
            for tx in senders.iter() {
                let message = PubSubMessage {
                    topic: topic.to_string(),
                    data: data.clone(),
                };
                if tx.try_send(message).is_err() {
                    trace!(topic, "subscriber lagging, message dropped");
                }
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> SubstrateResult<mpsc::Receiver<PubSubMessage>> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

#[derive(Debug, Default)]
pub struct MemoryDht {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryDht {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Dht for MemoryDht {
    async fn put(&self, key: &str, value: Vec<u8>) -> SubstrateResult<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> SubstrateResult<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }
}
