//! # Resolver
//!
//! Name resolution walks a fixed chain of sources and stops at the first
//! one that yields a record passing verification:
//!
//! ```text
//! hot cache -> warm cache -> DHT -> bootstrap peers (fan-out) -> index snapshot
//! ```
//!
//! Cache hits are already verified. Everything else is verified in
//! `Propagated` mode before it is cached or returned; a source that times
//! out, errors or returns a bad record is logged and skipped. Only when
//! every source is exhausted does [`Resolver::resolve`] fail.
//!
//! Registration is the reverse trip: verify, store, publish to the DHT,
//! gossip, push to every bootstrap peer, cache.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::cache::TwoTierCache;
use super::client::{BootstrapClient, SubmitRequest};
use super::gossip::GossipMessage;
use super::index::IndexSnapshot;
use super::substrate::{dht_key, Cid, ContentStore, Dht, PubSub, SubstrateError};
use crate::config::{
    unix_millis, BOOTSTRAP_PEER_TIMEOUT, DHT_TIMEOUT, GOSSIP_MESSAGE_TTL, HOT_CACHE_TTL,
    WARM_CACHE_TTL,
};
use crate::error::ErrorClass;
use crate::record::{
    decode_full, encode_full, fold_name, record_hash, validate_name, CodecError, NameError,
    NameRecord, RecordJson,
};
use crate::verify::{RecordVerifier, VerificationError, VerifiedRecord, VerifyContext};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    InvalidName(#[from] NameError),

    #[error("'{0}' not found in any source")]
    NotFound(String),
}

impl ResolveError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ResolveError::InvalidName(e) => e.class(),
            ResolveError::NotFound(_) => ErrorClass::Unreachable,
        }
    }
}

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error(transparent)]
    Rejected(#[from] VerificationError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Substrate(#[from] SubstrateError),
}

impl RegisterError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RegisterError::Rejected(e) => e.class(),
            RegisterError::Codec(e) => e.class(),
            RegisterError::Substrate(e) => e.class(),
        }
    }
}

/// Where a resolution was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    Cache,
    /// The local bootstrap index (node API only).
    Index,
    Dht,
    Bootstrap,
    Snapshot,
}

impl fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResolutionSource::Cache => "cache",
            ResolutionSource::Index => "index",
            ResolutionSource::Dht => "dht",
            ResolutionSource::Bootstrap => "bootstrap",
            ResolutionSource::Snapshot => "snapshot",
        })
    }
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub record: VerifiedRecord,
    pub source: ResolutionSource,
    pub latency: Duration,
}

/// What a registration reached. Only verification and the content-store
/// write are fatal; the rest is best effort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationReceipt {
    pub name: String,
    pub cid: Cid,
    pub hash: [u8; 32],
    pub dht_published: bool,
    pub gossiped: bool,
    pub peers_accepted: usize,
    pub peers_failed: usize,
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub hot_ttl: Duration,
    pub warm_ttl: Duration,
    pub dht_timeout: Duration,
    pub peer_timeout: Duration,
    /// Origin label on gossip this resolver publishes.
    pub origin: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            hot_ttl: HOT_CACHE_TTL,
            warm_ttl: WARM_CACHE_TTL,
            dht_timeout: DHT_TIMEOUT,
            peer_timeout: BOOTSTRAP_PEER_TIMEOUT,
            origin: "resolver".to_string(),
        }
    }
}

pub struct Resolver {
    config: ResolverConfig,
    verifier: Arc<RecordVerifier>,
    cache: TwoTierCache,
    content: Arc<dyn ContentStore>,
    dht: Arc<dyn Dht>,
    pubsub: Arc<dyn PubSub>,
    peers: RwLock<Vec<Arc<dyn BootstrapClient>>>,
    latest_snapshot: RwLock<Option<Cid>>,
}

impl Resolver {
    pub fn new(
        config: ResolverConfig,
        verifier: Arc<RecordVerifier>,
        content: Arc<dyn ContentStore>,
        dht: Arc<dyn Dht>,
        pubsub: Arc<dyn PubSub>,
    ) -> Self {
        Self {
            cache: TwoTierCache::new(config.hot_ttl, config.warm_ttl),
            config,
            verifier,
            content,
            dht,
            pubsub,
            peers: RwLock::new(Vec::new()),
            latest_snapshot: RwLock::new(None),
        }
    }

    pub fn cache(&self) -> &TwoTierCache {
        &self.cache
    }

    pub fn add_peer(&self, peer: Arc<dyn BootstrapClient>) {
        self.peers.write().push(peer);
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    pub fn peers(&self) -> Vec<Arc<dyn BootstrapClient>> {
        self.peers.read().clone()
    }

    pub fn set_latest_snapshot(&self, cid: Cid) {
        *self.latest_snapshot.write() = Some(cid);
    }

    pub fn latest_snapshot(&self) -> Option<Cid> {
        self.latest_snapshot.read().clone()
    }

    // -- Resolution ---------------------------------------------------------

    pub async fn resolve(&self, name: &str) -> Result<Resolution, ResolveError> {
        let started = Instant::now();
        let name = fold_name(name);
        validate_name(&name)?;

        let found = |record: VerifiedRecord, source: ResolutionSource| {
            let latency = started.elapsed();
            debug!(name = %record.name(), %source, ?latency, "resolved");
            Resolution {
                record,
                source,
                latency,
            }
        };

        if let Some((record, _tier)) = self.cache.get(&name) {
            return Ok(found(record, ResolutionSource::Cache));
        }

        if let Some(record) = self.from_dht(&name).await {
            self.cache.insert(record.clone());
            return Ok(found(record, ResolutionSource::Dht));
        }

        if let Some(record) = self.from_peers(&name).await {
            self.cache.insert(record.clone());
            return Ok(found(record, ResolutionSource::Bootstrap));
        }

        if let Some(record) = self.from_snapshot(&name).await {
            self.cache.insert(record.clone());
            return Ok(found(record, ResolutionSource::Snapshot));
        }

        debug!(%name, "every source exhausted");
        Err(ResolveError::NotFound(name))
    }

    async fn admit(&self, record: NameRecord, source: ResolutionSource) -> Option<VerifiedRecord> {
        match self
            .verifier
            .admit_blocking(record, None, VerifyContext::propagated(unix_millis()))
            .await
        {
            Ok(record) => Some(record),
            Err(e) => {
                debug!(%source, error = %e, "record from source failed verification");
                None
            }
        }
    }

    /// Fetch and decode the record stored under `cid`.
    pub async fn fetch_record(&self, cid: &Cid) -> Result<Option<NameRecord>, RegisterError> {
        let bytes = timeout(self.config.dht_timeout, self.content.get(cid))
            .await
            .map_err(|_| SubstrateError::Timeout {
                operation: "content get",
            })??;
        match bytes {
            Some(bytes) => Ok(Some(decode_full(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn from_dht(&self, name: &str) -> Option<VerifiedRecord> {
        let key = dht_key(name);
        let value = match timeout(self.config.dht_timeout, self.dht.get(&key)).await {
            Ok(Ok(Some(value))) => value,
            Ok(Ok(None)) => {
                debug!(name, "dht miss");
                return None;
            }
            Ok(Err(e)) => {
                debug!(name, error = %e, "dht lookup failed");
                return None;
            }
            Err(_) => {
                debug!(name, "dht lookup timed out");
                return None;
            }
        };

        let cid = Cid::new(String::from_utf8_lossy(&value).into_owned());
        match self.fetch_record(&cid).await {
            Ok(Some(record)) if record.name() == name => {
                self.admit(record, ResolutionSource::Dht).await
            }
            Ok(Some(_)) => {
                debug!(name, %cid, "dht pointed at a record for another name");
                None
            }
            Ok(None) => {
                debug!(name, %cid, "dht pointed at missing content");
                None
            }
            Err(e) => {
                debug!(name, %cid, error = %e, "dht content unusable");
                None
            }
        }
    }

    /// Ask every peer at once; the first verified answer wins and the rest
    /// are dropped.
    async fn from_peers(&self, name: &str) -> Option<VerifiedRecord> {
        let peers = self.peers.read().clone();
        if peers.is_empty() {
            return None;
        }

        let per_peer = self.config.peer_timeout;
        let mut pending: FuturesUnordered<_> = peers
            .iter()
            .map(|peer| {
                let peer = Arc::clone(peer);
                async move {
                    let answer = timeout(per_peer, peer.resolve(name)).await;
                    (peer, answer)
                }
            })
            .collect();

        while let Some((peer, answer)) = pending.next().await {
            match answer {
                Ok(Ok(Some(record))) if record.name() == name => {
                    if let Some(record) = self.admit(record, ResolutionSource::Bootstrap).await {
                        return Some(record);
                    }
                }
                Ok(Ok(Some(_))) => debug!(peer = peer.peer_id(), name, "peer answered for another name"),
                Ok(Ok(None)) => debug!(peer = peer.peer_id(), name, "peer miss"),
                Ok(Err(e)) => debug!(peer = peer.peer_id(), error = %e, "peer lookup failed"),
                Err(_) => debug!(peer = peer.peer_id(), "peer lookup timed out"),
            }
        }
        None
    }

    async fn from_snapshot(&self, name: &str) -> Option<VerifiedRecord> {
        let cid = self.latest_snapshot()?;
        let bytes = match timeout(self.config.dht_timeout, self.content.get(&cid)).await {
            Ok(Ok(Some(bytes))) => bytes,
            _ => {
                debug!(%cid, "snapshot unavailable");
                return None;
            }
        };
        let snapshot = match IndexSnapshot::from_bytes(&bytes) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!(%cid, error = %e, "snapshot undecodable");
                return None;
            }
        };
        let json = snapshot.records.into_iter().find(|r| r.name == name)?;
        let record = NameRecord::try_from(json).ok()?;
        self.admit(record, ResolutionSource::Snapshot).await
    }

    // -- Registration -------------------------------------------------------

    /// Verify a freshly built record as a live submission and publish it
    /// everywhere.
    pub async fn register(&self, record: NameRecord) -> Result<RegistrationReceipt, RegisterError> {
        let verified = self
            .verifier
            .admit_blocking(record, None, VerifyContext::submission(unix_millis()))
            .await?;
        let hash = record_hash(&verified)?;
        let (cid, dht_published) = self.publish(&verified).await?;

        let gossiped = self.gossip(&verified).await;
        let (peers_accepted, peers_failed) = self.push_to_peers(&verified).await;

        self.cache.insert(verified.clone());
        info!(
            name = verified.name(),
            %cid,
            dht_published,
            peers_accepted,
            peers_failed,
            "registered"
        );

        Ok(RegistrationReceipt {
            name: verified.name().to_string(),
            cid,
            hash,
            dht_published,
            gossiped,
            peers_accepted,
            peers_failed,
        })
    }

    /// Store the record in the content store and point the DHT at it.
    /// Returns the CID and whether the DHT write went through; only a
    /// content-store failure is an error.
    pub async fn publish(&self, record: &VerifiedRecord) -> Result<(Cid, bool), RegisterError> {
        let bytes = encode_full(record)?;
        let cid = timeout(self.config.dht_timeout, self.content.add(bytes))
            .await
            .map_err(|_| SubstrateError::Timeout {
                operation: "content add",
            })??;

        let key = dht_key(record.name());
        let dht_published = match timeout(
            self.config.dht_timeout,
            self.dht.put(&key, cid.as_str().as_bytes().to_vec()),
        )
        .await
        {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(name = record.name(), error = %e, "dht put failed");
                false
            }
            Err(_) => {
                warn!(name = record.name(), "dht put timed out");
                false
            }
        };
        Ok((cid, dht_published))
    }

    async fn gossip(&self, record: &VerifiedRecord) -> bool {
        let message = GossipMessage::RecordAnnouncement {
            record: RecordJson::from(record.record()),
            origin: self.config.origin.clone(),
            ttl: GOSSIP_MESSAGE_TTL,
        };
        match self.pubsub.publish(message.topic(), message.to_bytes()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(name = record.name(), error = %e, "gossip publish failed");
                false
            }
        }
    }

    async fn push_to_peers(&self, record: &VerifiedRecord) -> (usize, usize) {
        let peers = self.peers.read().clone();
        let request = SubmitRequest::new(record);
        let per_peer = self.config.peer_timeout;

        let results = futures::future::join_all(peers.iter().map(|peer| {
            let request = &request;
            async move {
                match timeout(per_peer, peer.submit(request)).await {
                    Ok(Ok(response)) if response.accepted => true,
                    Ok(Ok(response)) => {
                        warn!(peer = peer.peer_id(), reason = ?response.reason, "peer rejected record");
                        false
                    }
                    Ok(Err(e)) => {
                        warn!(peer = peer.peer_id(), error = %e, "push to peer failed");
                        false
                    }
                    Err(_) => {
                        warn!(peer = peer.peer_id(), "push to peer timed out");
                        false
                    }
                }
            }
        }))
        .await;

        let accepted = results.iter().filter(|ok| **ok).count();
        (accepted, results.len() - accepted)
    }
}
