//! # Gossip Protocol
//!
//! Epidemic propagation of records and index announcements between
//! bootstrap nodes over the [`PubSub`](super::substrate::PubSub) substrate.
//!
//! ## Deduplication
//!
//! Every message is identified by the BLAKE3 hash of its JSON encoding with
//! the TTL zeroed, so a forwarded copy hashes the same as the original.
//! Nodes keep a bounded map of recently seen hashes; a message already in
//! it is dropped instead of being processed or forwarded again.
//!
//! ## TTL (Time-to-Live)
//!
//! Each message carries a hop counter that decrements on every forward.
//! A message arriving with TTL zero is dropped; one arriving with TTL one
//! is processed but not forwarded.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;
use uuid::Uuid;

use crate::config::{
    unix_millis, GOSSIP_MESSAGE_TTL, GOSSIP_SEEN_CACHE_SIZE, RECORD_VERSION_QUANTUM, TOPIC_INDEX,
    TOPIC_RECORDS_V1, TOPIC_RECORDS_V2, TOPIC_SYNC,
};
use crate::error::ErrorClass;
use crate::record::RecordJson;

#[derive(Debug, Error)]
pub enum GossipError {
    #[error("gossip message decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}

impl GossipError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::MalformedInput
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipConfig {
    /// Hops a message we originate may travel.
    pub message_ttl: u8,
    /// Maximum number of message hashes kept for deduplication.
    pub seen_cache_size: usize,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            message_ttl: GOSSIP_MESSAGE_TTL,
            seen_cache_size: GOSSIP_SEEN_CACHE_SIZE,
        }
    }
}

// ---------------------------------------------------------------------------
// Gossip Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GossipMessage {
    /// A newly accepted record.
    RecordAnnouncement {
        record: RecordJson,
        origin: String,
        ttl: u8,
    },
    /// A node published a fresh index snapshot.
    IndexAnnouncement {
        cid: String,
        origin: String,
        entries: usize,
        published_at: u64,
        ttl: u8,
    },
    /// A starting node asks peers for their latest snapshot.
    SyncRequest {
        request_id: Uuid,
        origin: String,
        ttl: u8,
    },
    SyncResponse {
        request_id: Uuid,
        origin: String,
        cid: String,
        ttl: u8,
    },
}

impl GossipMessage {
    pub fn ttl(&self) -> u8 {
        match self {
            Self::RecordAnnouncement { ttl, .. }
            | Self::IndexAnnouncement { ttl, .. }
            | Self::SyncRequest { ttl, .. }
            | Self::SyncResponse { ttl, .. } => *ttl,
        }
    }

    fn ttl_mut(&mut self) -> &mut u8 {
        match self {
            Self::RecordAnnouncement { ttl, .. }
            | Self::IndexAnnouncement { ttl, .. }
            | Self::SyncRequest { ttl, .. }
            | Self::SyncResponse { ttl, .. } => ttl,
        }
    }

    pub fn origin(&self) -> &str {
        match self {
            Self::RecordAnnouncement { origin, .. }
            | Self::IndexAnnouncement { origin, .. }
            | Self::SyncRequest { origin, .. }
            | Self::SyncResponse { origin, .. } => origin,
        }
    }

    /// Decrements the TTL. Returns `None` if the message must not travel
    /// further.
    pub fn decrement_ttl(mut self) -> Option<Self> {
        let ttl = self.ttl_mut();
        if *ttl <= 1 {
            return None;
        }
        *ttl -= 1;
        Some(self)
    }

    /// The topic this message travels on.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::RecordAnnouncement { record, .. } => {
                if record.version == u64::from(RECORD_VERSION_QUANTUM) {
                    TOPIC_RECORDS_V2
                } else {
                    TOPIC_RECORDS_V1
                }
            }
            Self::IndexAnnouncement { .. } => TOPIC_INDEX,
            Self::SyncRequest { .. } | Self::SyncResponse { .. } => TOPIC_SYNC,
        }
    }

    /// BLAKE3 hash of the message with its TTL zeroed.
    pub fn content_hash(&self) -> [u8; 32] {
        let mut normalized = self.clone();
        *normalized.ttl_mut() = 0;
        let serialized = serde_json::to_vec(&normalized).unwrap_or_default();
        *blake3::hash(&serialized).as_bytes()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GossipError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

// ---------------------------------------------------------------------------
// Gossip Actions
// ---------------------------------------------------------------------------

/// What the node runtime should do with an incoming message.
#[derive(Debug, Clone, PartialEq)]
pub enum GossipAction {
    /// Hand the message to the node for processing.
    Deliver(GossipMessage),
    /// Re-publish the message (TTL already decremented) on its topic.
    Forward(GossipMessage),
    /// Duplicate or expired.
    Drop,
}

// ---------------------------------------------------------------------------
// Gossip Protocol
// ---------------------------------------------------------------------------

/// Deduplication and TTL enforcement. Performs no I/O; the node executes
/// the returned [`GossipAction`]s.
#[derive(Debug)]
pub struct GossipProtocol {
    config: GossipConfig,
    seen_messages: DashMap<[u8; 32], u64>,
}

impl Default for GossipProtocol {
    fn default() -> Self {
        Self::new(GossipConfig::default())
    }
}

impl GossipProtocol {
    pub fn new(config: GossipConfig) -> Self {
        Self {
            config,
            seen_messages: DashMap::new(),
        }
    }

    pub fn message_ttl(&self) -> u8 {
        self.config.message_ttl
    }

    /// Mark a message we originate as seen, so our own copy coming back
    /// from the substrate is dropped.
    pub fn originate(&self, message: &GossipMessage) {
        self.seen_messages.insert(message.content_hash(), unix_millis());
        self.maybe_evict_seen_cache();
    }

    pub fn handle_message(&self, message: GossipMessage) -> Vec<GossipAction> {
        if message.ttl() == 0 {
            trace!(origin = message.origin(), "dropping expired gossip message (TTL=0)");
            return vec![GossipAction::Drop];
        }

        let hash = message.content_hash();
        // Check-and-insert in one step: of two concurrent copies only one
        // is delivered.
        if self.seen_messages.insert(hash, unix_millis()).is_some() {
            trace!(origin = message.origin(), "dropping duplicate gossip message");
            return vec![GossipAction::Drop];
        }
        self.maybe_evict_seen_cache();

        let mut actions = vec![GossipAction::Deliver(message.clone())];
        if let Some(forwarded) = message.decrement_ttl() {
            actions.push(GossipAction::Forward(forwarded));
        }
        actions
    }

    pub fn seen_count(&self) -> usize {
        self.seen_messages.len()
    }

    /// Evicts the oldest entries down to 75% once the cache is over
    /// capacity.
    fn maybe_evict_seen_cache(&self) {
        if self.seen_messages.len() <= self.config.seen_cache_size {
            return;
        }

        let target = self.config.seen_cache_size * 3 / 4;
        let mut entries: Vec<([u8; 32], u64)> = self
            .seen_messages
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();

        entries.sort_by_key(|(_, ts)| *ts);

        let to_remove = entries.len().saturating_sub(target);
        for (hash, _) in entries.iter().take(to_remove) {
            self.seen_messages.remove(hash);
        }
    }
}
