//! # Bootstrap Node
//!
//! `BootstrapNode` is the service context of one bootstrap index node. It
//! owns everything a node needs and nothing is global:
//!
//! - the [`RecordVerifier`] and the submission [`NonceLedger`]
//! - the in-memory [`BootstrapIndex`], mirrored to an optional [`IndexDb`]
//! - a [`Resolver`] sharing the node's substrate handles and cache
//! - the [`GossipProtocol`] dedup state
//!
//! Lifecycle:
//!
//! ```text
//! new() -> sync_on_startup() -> start() -> [serving] -> shutdown()
//! ```
//!
//! `start` subscribes to the four gossip topics and spawns one listener per
//! topic, the periodic index publisher and the nonce sweeper. Every task
//! watches the node's shutdown channel; `shutdown` flips it, waits for the
//! tasks and flushes the database. Background tasks hold only a weak
//! reference to the node.
//!
//! ## Ownership
//!
//! The index itself is last-write-wins. Ownership is enforced here: while a
//! name's entry is unexpired, a record for it is accepted only from the DID
//! that holds it, and only as a correctly chained update. Submissions,
//! gossip, peer listings and snapshot merges all go through this rule.
//!
//! ## Gossip
//!
//! A received message is forwarded only after it has been accepted
//! locally, so a node never relays a record it rejected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::client::{submission_message, NonceResponse, SubmitRequest, SubmitResponse};
use super::gossip::{GossipAction, GossipConfig, GossipError, GossipMessage, GossipProtocol};
use super::index::{BootstrapIndex, IndexSnapshot, MergeReport, UpsertOutcome};
use super::resolver::{Resolution, ResolveError, ResolutionSource, Resolver, ResolverConfig};
use super::substrate::{
    Cid, ContentStore, Dht, MemoryContentStore, MemoryDht, MemoryPubSub, PubSub, PubSubMessage,
    SubstrateError,
};
use crate::config::{
    millis, unix_millis, Network, INDEX_PUBLISH_INTERVAL, NONCE_EXPIRY, NONCE_SWEEP_INTERVAL,
    STARTUP_SYNC_WINDOW, TOPIC_INDEX, TOPIC_RECORDS_V1, TOPIC_RECORDS_V2, TOPIC_SYNC,
};
use crate::crypto::keys::ClassicalPublicKey;
use crate::error::ErrorClass;
use crate::identity::Did;
use crate::nonce::{NonceError, NonceLedger};
use crate::record::{record_hash, CodecError, NameRecord, RecordJson};
use crate::storage::{DbError, IndexDb};
use crate::task::BackgroundTask;
use crate::verify::{RecordVerifier, VerificationError, VerifiedRecord, VerifyContext};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("version {got} record posted to the v{expected} endpoint")]
    WrongVersion { expected: u8, got: u8 },

    #[error("this node requires a submission nonce")]
    NonceRequired,

    #[error("nonce signature missing or invalid")]
    NonceSignature,

    #[error(transparent)]
    Nonce(#[from] NonceError),

    #[error("'{name}' is held by {holder}")]
    NameTaken { name: String, holder: Did },

    #[error(transparent)]
    Rejected(#[from] VerificationError),

    #[error(transparent)]
    Storage(#[from] DbError),
}

impl SubmitError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SubmitError::Codec(e) => e.class(),
            SubmitError::WrongVersion { .. } | SubmitError::NonceRequired => {
                ErrorClass::MalformedInput
            }
            SubmitError::NonceSignature => ErrorClass::InvalidSignature,
            SubmitError::Nonce(e) => e.class(),
            SubmitError::NameTaken { .. } => ErrorClass::NameTaken,
            SubmitError::Rejected(e) => e.class(),
            SubmitError::Storage(e) => e.class(),
        }
    }
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Substrate(#[from] SubstrateError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("node already started")]
    AlreadyStarted,
}

impl NodeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            NodeError::Db(e) => e.class(),
            NodeError::Substrate(e) => e.class(),
            NodeError::Codec(e) => e.class(),
            NodeError::AlreadyStarted => ErrorClass::MalformedInput,
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub node_id: String,
    pub network: Network,
    /// Reject submissions that carry no nonce.
    pub require_nonce: bool,
    pub nonce_expiry: Duration,
    pub publish_interval: Duration,
    pub sweep_interval: Duration,
    /// How long start-up sync waits for peers.
    pub sync_window: Duration,
    pub resolver: ResolverConfig,
    pub gossip: GossipConfig,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            node_id: "moniker-node".to_string(),
            network: Network::default(),
            require_nonce: false,
            nonce_expiry: NONCE_EXPIRY,
            publish_interval: INDEX_PUBLISH_INTERVAL,
            sweep_interval: NONCE_SWEEP_INTERVAL,
            sync_window: STARTUP_SYNC_WINDOW,
            resolver: ResolverConfig::default(),
            gossip: GossipConfig::default(),
        }
    }
}

/// Handles to the content-addressed network the node runs on.
#[derive(Clone)]
pub struct Substrate {
    pub content: Arc<dyn ContentStore>,
    pub pubsub: Arc<dyn PubSub>,
    pub dht: Arc<dyn Dht>,
}

impl Substrate {
    /// A fresh in-process substrate. Clone it to put several nodes on the
    /// same network.
    pub fn in_memory() -> Self {
        Self {
            content: Arc::new(MemoryContentStore::new()),
            pubsub: Arc::new(MemoryPubSub::new()),
            dht: Arc::new(MemoryDht::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub record: VerifiedRecord,
    pub index: UpsertOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Records restored from the local database.
    pub restored: usize,
    /// Records pulled from peers that changed the index.
    pub pulled: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeStats {
    pub node_id: String,
    pub network: Network,
    pub running: bool,
    pub index_entries: usize,
    pub peers: usize,
    pub cache_hot: usize,
    pub cache_warm: usize,
    pub outstanding_nonces: usize,
    pub replay_attempts: u64,
    pub gossip_seen: usize,
    pub latest_snapshot: Option<Cid>,
}

// ---------------------------------------------------------------------------
// Bootstrap Node
// ---------------------------------------------------------------------------

pub struct BootstrapNode {
    config: BootstrapConfig,
    verifier: Arc<RecordVerifier>,
    ledger: Arc<NonceLedger>,
    index: BootstrapIndex,
    resolver: Resolver,
    substrate: Substrate,
    gossip: GossipProtocol,
    db: Option<IndexDb>,
    tasks: Mutex<Vec<BackgroundTask>>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    started: AtomicBool,
}

impl BootstrapNode {
    pub fn new(
        config: BootstrapConfig,
        verifier: RecordVerifier,
        substrate: Substrate,
        db: Option<IndexDb>,
    ) -> Self {
        let verifier = Arc::new(verifier);
        let resolver = Resolver::new(
            ResolverConfig {
                origin: config.node_id.clone(),
                ..config.resolver.clone()
            },
            Arc::clone(&verifier),
            Arc::clone(&substrate.content),
            Arc::clone(&substrate.dht),
            Arc::clone(&substrate.pubsub),
        );
        let (shutdown_tx, _) = watch::channel(false);

        info!(node_id = %config.node_id, network = %config.network, "creating bootstrap node");

        Self {
            ledger: Arc::new(NonceLedger::new(config.nonce_expiry)),
            gossip: GossipProtocol::new(config.gossip.clone()),
            index: BootstrapIndex::new(),
            config,
            verifier,
            resolver,
            substrate,
            db,
            tasks: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            shutdown_tx,
            started: AtomicBool::new(false),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    pub fn index(&self) -> &BootstrapIndex {
        &self.index
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn ledger(&self) -> &NonceLedger {
        &self.ledger
    }

    pub fn verifier(&self) -> &RecordVerifier {
        &self.verifier
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !*self.shutdown_tx.borrow()
    }

    pub fn stats(&self) -> NodeStats {
        NodeStats {
            node_id: self.config.node_id.clone(),
            network: self.config.network,
            running: self.is_running(),
            index_entries: self.index.len(),
            peers: self.resolver.peer_count(),
            cache_hot: self.resolver.cache().hot_len(),
            cache_warm: self.resolver.cache().warm_len(),
            outstanding_nonces: self.ledger.len(),
            replay_attempts: self.ledger.replay_attempts(),
            gossip_seen: self.gossip.seen_count(),
            latest_snapshot: self.resolver.latest_snapshot(),
        }
    }

    // -- Lookup -------------------------------------------------------------

    /// The unexpired index entry for `name`, if any.
    pub fn lookup(&self, name: &str) -> Option<VerifiedRecord> {
        let now = unix_millis();
        self.index
            .get(name)
            .map(|entry| entry.record)
            .filter(|record| !record.is_expired_at(now))
    }

    /// Local index first, then the full resolver chain.
    pub async fn resolve(&self, name: &str) -> Result<Resolution, ResolveError> {
        let started = std::time::Instant::now();
        if let Some(record) = self.lookup(name) {
            return Ok(Resolution {
                record,
                source: ResolutionSource::Index,
                latency: started.elapsed(),
            });
        }
        self.resolver.resolve(name).await
    }

    pub fn issue_nonce(&self, owner_key: &ClassicalPublicKey) -> NonceResponse {
        let now = unix_millis();
        NonceResponse {
            nonce: self.ledger.issue_at(owner_key.as_bytes(), now),
            expires_at: now + millis(self.config.nonce_expiry),
        }
    }

    // -- Submission ---------------------------------------------------------

    /// Admit a client submission. `route_version` is the record version the
    /// endpoint accepts, when the caller pins one.
    pub async fn submit(
        &self,
        request: SubmitRequest,
        route_version: Option<u8>,
    ) -> Result<SubmitOutcome, SubmitError> {
        let nonce = request.nonce.clone();
        let nonce_signature = request.parsed_nonce_signature().transpose()?;
        let record = NameRecord::try_from(request.record)?;

        if let Some(expected) = route_version {
            if record.version() != expected {
                return Err(SubmitError::WrongVersion {
                    expected,
                    got: record.version(),
                });
            }
        }

        match (nonce, nonce_signature) {
            (Some(nonce), Some(signature)) => {
                let message = submission_message(&nonce, &record_hash(&record)?);
                // Checked before redemption, so a forged signature cannot
                // burn someone else's nonce.
                if !record.owner_key().verify(&message, &signature) {
                    warn!(
                        target: "moniker::security",
                        name = record.name(),
                        owner = %record.owner_key(),
                        "submission nonce signature invalid"
                    );
                    return Err(SubmitError::NonceSignature);
                }
                self.ledger
                    .try_redeem(record.owner_key().as_bytes(), &nonce)?;
            }
            (Some(_), None) => return Err(SubmitError::NonceSignature),
            (None, _) if self.config.require_nonce => return Err(SubmitError::NonceRequired),
            (None, _) => {}
        }

        let now = unix_millis();
        let existing = self.index.get(record.name()).filter(|e| !e.record.is_expired_at(now));
        if let Some(existing) = &existing {
            if existing.record.record() == &record {
                debug!(name = record.name(), "resubmission of the current record");
                return Ok(SubmitOutcome {
                    record: existing.record.clone(),
                    index: UpsertOutcome::Kept,
                });
            }
            if &existing.did != record.did() {
                warn!(name = record.name(), holder = %existing.did, "submission for a held name");
                return Err(SubmitError::NameTaken {
                    name: record.name().to_string(),
                    holder: existing.did.clone(),
                });
            }
        }

        let previous = existing.map(|e| e.record.into_record());
        let verified = self
            .verifier
            .admit_blocking(record, previous, VerifyContext::submission(now))
            .await?;
        let outcome = self.accept(verified.clone())?;

        if outcome.changed() {
            if let Err(e) = self.resolver.publish(&verified).await {
                warn!(name = verified.name(), error = %e, "content publish failed");
            }
            self.broadcast(GossipMessage::RecordAnnouncement {
                record: RecordJson::from(verified.record()),
                origin: self.config.node_id.clone(),
                ttl: self.gossip.message_ttl(),
            })
            .await;
        }

        info!(
            name = verified.name(),
            revision = verified.revision(),
            quantum = verified.is_quantum(),
            ?outcome,
            "record accepted"
        );
        Ok(SubmitOutcome {
            record: verified,
            index: outcome,
        })
    }

    /// [`submit`](Self::submit) folded into the wire response.
    pub async fn submit_response(&self, request: SubmitRequest) -> SubmitResponse {
        let name = request.record.name.clone();
        match self.submit(request, None).await {
            Ok(outcome) => submit_accepted(&outcome),
            Err(e) => submit_rejected(name, &e),
        }
    }

    /// Upsert into the index and mirror changes to the database and cache.
    fn accept(&self, record: VerifiedRecord) -> Result<UpsertOutcome, DbError> {
        let outcome = self.index.upsert(record.clone());
        if outcome.changed() {
            if let Some(db) = &self.db {
                db.put_record(&record)?;
            }
            self.resolver.cache().insert(record);
        }
        Ok(outcome)
    }

    /// Verify a record that arrived from another node and apply it under
    /// the ownership rule.
    async fn ingest_propagated(&self, record: NameRecord) -> Result<UpsertOutcome, SubmitError> {
        let now = unix_millis();
        let existing = self.index.get(record.name()).filter(|e| !e.record.is_expired_at(now));
        if let Some(existing) = &existing {
            if existing.record.record() == &record {
                return Ok(UpsertOutcome::Kept);
            }
            if &existing.did != record.did() {
                return Err(SubmitError::NameTaken {
                    name: record.name().to_string(),
                    holder: existing.did.clone(),
                });
            }
        }

        // Only a record that claims our current entry as its predecessor is
        // checked against it; anything else is a link we cannot see.
        let previous = match existing {
            Some(existing) => {
                let current = record_hash(&existing.record)?;
                (record.previous_hash() == Some(&current)).then(|| existing.record.into_record())
            }
            None => None,
        };
        let verified = self
            .verifier
            .admit_blocking(record, previous, VerifyContext::propagated(now))
            .await?;
        Ok(self.accept(verified)?)
    }

    // -- Gossip -------------------------------------------------------------

    async fn broadcast(&self, message: GossipMessage) {
        self.gossip.originate(&message);
        if let Err(e) = self
            .substrate
            .pubsub
            .publish(message.topic(), message.to_bytes())
            .await
        {
            warn!(topic = message.topic(), error = %e, "gossip publish failed");
        }
    }

    /// Process one raw gossip payload: deliver it locally and, if it was
    /// accepted, forward it while its TTL lasts.
    pub async fn handle_gossip(&self, data: &[u8]) -> Result<(), GossipError> {
        let message = GossipMessage::from_bytes(data)?;
        let mut accepted = false;
        // Deliver always precedes Forward.
        for action in self.gossip.handle_message(message) {
            match action {
                GossipAction::Deliver(message) => accepted = self.deliver(message).await,
                GossipAction::Forward(message) if accepted => {
                    if let Err(e) = self
                        .substrate
                        .pubsub
                        .publish(message.topic(), message.to_bytes())
                        .await
                    {
                        debug!(error = %e, "gossip forward failed");
                    }
                }
                GossipAction::Forward(message) => {
                    debug!(
                        topic = message.topic(),
                        origin = message.origin(),
                        "rejected gossip not forwarded"
                    );
                }
                GossipAction::Drop => {}
            }
        }
        Ok(())
    }

    /// Apply one message. Returns whether it was accepted and may travel on.
    async fn deliver(&self, message: GossipMessage) -> bool {
        if message.origin() == self.config.node_id {
            return false;
        }

        match message {
            GossipMessage::RecordAnnouncement { record, origin, .. } => {
                let name = record.name.clone();
                let result = match NameRecord::try_from(record) {
                    Ok(record) => self.ingest_propagated(record).await,
                    Err(e) => Err(e.into()),
                };
                match result {
                    Ok(outcome) => {
                        debug!(%name, %origin, ?outcome, "gossiped record applied");
                        true
                    }
                    Err(e) => {
                        debug!(%name, %origin, error = %e, "gossiped record dropped");
                        false
                    }
                }
            }
            GossipMessage::IndexAnnouncement { cid, origin, .. } => {
                let cid = Cid::new(cid);
                match self.merge_snapshot_at(&cid).await {
                    Ok(report) if report.usable() => {
                        self.resolver.set_latest_snapshot(cid.clone());
                        debug!(%origin, %cid, ?report, "announced snapshot merged");
                        true
                    }
                    Ok(report) => {
                        debug!(%origin, %cid, ?report, "announced snapshot held no valid record");
                        false
                    }
                    Err(e) => {
                        debug!(%origin, %cid, error = %e, "announced snapshot unusable");
                        false
                    }
                }
            }
            GossipMessage::SyncRequest {
                request_id, origin, ..
            } => {
                match self.publish_index().await {
                    Ok(cid) => {
                        debug!(%origin, %request_id, "answering sync request");
                        self.broadcast(GossipMessage::SyncResponse {
                            request_id,
                            origin: self.config.node_id.clone(),
                            cid: cid.to_string(),
                            ttl: self.gossip.message_ttl(),
                        })
                        .await;
                    }
                    Err(e) => warn!(error = %e, "could not publish index for sync request"),
                }
                true
            }
            GossipMessage::SyncResponse { cid, origin, .. } => {
                let cid = Cid::new(cid);
                match self.merge_snapshot_at(&cid).await {
                    Ok(report) => {
                        debug!(%origin, %cid, ?report, "sync snapshot merged");
                        report.usable()
                    }
                    Err(e) => {
                        debug!(%origin, %cid, error = %e, "sync snapshot unusable");
                        false
                    }
                }
            }
        }
    }

    /// Fetch the snapshot stored under `cid` and merge it into the index.
    pub async fn merge_snapshot_at(&self, cid: &Cid) -> Result<MergeReport, NodeError> {
        let bytes = timeout(
            self.config.resolver.dht_timeout,
            self.substrate.content.get(cid),
        )
        .await
        .map_err(|_| SubstrateError::Timeout {
            operation: "snapshot fetch",
        })??
        .ok_or_else(|| SubstrateError::Unavailable(cid.clone()))?;
        let snapshot = IndexSnapshot::from_bytes(&bytes)?;
        Ok(self.merge_snapshot(&snapshot).await)
    }

    /// Verify every snapshot record as propagated and apply the ones that
    /// pass, under the same ownership rule as gossip. Bad records are
    /// counted, never fatal.
    pub async fn merge_snapshot(&self, snapshot: &IndexSnapshot) -> MergeReport {
        let mut report = MergeReport::default();
        for json in &snapshot.records {
            let result = match NameRecord::try_from(json.clone()) {
                Ok(record) => self.ingest_propagated(record).await,
                Err(e) => Err(e.into()),
            };
            match result {
                Ok(outcome) if outcome.changed() => report.applied += 1,
                Ok(_) => report.unchanged += 1,
                Err(e) => {
                    let from = &snapshot.node_id;
                    if e.class() == ErrorClass::Storage {
                        warn!(%from, name = %json.name, error = %e, "snapshot record not stored");
                    } else {
                        debug!(%from, name = %json.name, error = %e, "snapshot record rejected");
                    }
                    report.rejected += 1;
                }
            }
        }
        report
    }

    /// Publish the live part of the index to the content store and
    /// announce it.
    pub async fn publish_index(&self) -> Result<Cid, NodeError> {
        let now = unix_millis();
        let snapshot = self.index.snapshot(&self.config.node_id, now);
        let entries = snapshot.records.len();

        let cid = self.substrate.content.add(snapshot.to_bytes()?).await?;
        self.substrate.content.pin(&cid).await?;
        self.resolver.set_latest_snapshot(cid.clone());
        if let Some(db) = &self.db {
            db.set_latest_snapshot(&cid)?;
        }

        self.broadcast(GossipMessage::IndexAnnouncement {
            cid: cid.to_string(),
            origin: self.config.node_id.clone(),
            entries,
            published_at: now,
            ttl: self.gossip.message_ttl(),
        })
        .await;
        info!(%cid, entries, "index snapshot published");
        Ok(cid)
    }

    // -- Lifecycle ----------------------------------------------------------

    /// Rebuild the index from the local database, pull peers' listings and
    /// ask the network for fresh snapshots.
    pub async fn sync_on_startup(&self) -> Result<SyncReport, NodeError> {
        let mut report = SyncReport::default();

        if let Some(db) = &self.db {
            let ctx = VerifyContext::propagated(unix_millis());
            for record in db.load_records()? {
                let name = record.name().to_string();
                match self.verifier.admit_blocking(record, None, ctx).await {
                    Ok(record) => {
                        self.index.upsert(record);
                        report.restored += 1;
                    }
                    Err(e) => {
                        warn!(%name, error = %e, "stored record failed re-verification");
                        db.remove_record(&name)?;
                        report.rejected += 1;
                    }
                }
            }
            if let Some(cid) = db.latest_snapshot()? {
                self.resolver.set_latest_snapshot(cid);
            }
        }

        let window = self.config.sync_window;
        let listings = futures::future::join_all(self.resolver.peers().into_iter().map(
            |peer| async move {
                let listing = timeout(window, peer.names()).await;
                (peer, listing)
            },
        ))
        .await;

        for (peer, listing) in listings {
            let records = match listing {
                Ok(Ok(records)) => records,
                Ok(Err(e)) => {
                    warn!(peer = peer.peer_id(), error = %e, "peer listing failed");
                    continue;
                }
                Err(_) => {
                    warn!(peer = peer.peer_id(), "peer listing timed out");
                    continue;
                }
            };
            for record in records {
                match self.ingest_propagated(record).await {
                    Ok(outcome) if outcome.changed() => report.pulled += 1,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(peer = peer.peer_id(), error = %e, "peer record rejected");
                        report.rejected += 1;
                    }
                }
            }
        }

        self.broadcast(GossipMessage::SyncRequest {
            request_id: Uuid::new_v4(),
            origin: self.config.node_id.clone(),
            ttl: self.gossip.message_ttl(),
        })
        .await;

        info!(
            restored = report.restored,
            pulled = report.pulled,
            rejected = report.rejected,
            entries = self.index.len(),
            "start-up sync finished"
        );
        Ok(report)
    }

    /// Subscribe to the gossip topics and spawn the background tasks.
    pub async fn start(self: &Arc<Self>) -> Result<(), NodeError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(NodeError::AlreadyStarted);
        }

        for topic in [TOPIC_RECORDS_V1, TOPIC_RECORDS_V2, TOPIC_INDEX, TOPIC_SYNC] {
            let rx = self.substrate.pubsub.subscribe(topic).await?;
            let handle = tokio::spawn(listen(
                Arc::downgrade(self),
                topic,
                rx,
                self.shutdown_tx.subscribe(),
            ));
            self.listeners.lock().push(handle);
        }

        let node = Arc::downgrade(self);
        let publisher =
            BackgroundTask::spawn_periodic("index-publisher", self.config.publish_interval, move || {
                let node = node.clone();
                async move {
                    if let Some(node) = node.upgrade() {
                        if let Err(e) = node.publish_index().await {
                            warn!(error = %e, "periodic index publish failed");
                        }
                    }
                }
            });
        let sweeper = self.ledger.spawn_sweeper(self.config.sweep_interval);
        self.tasks.lock().extend([publisher, sweeper]);

        info!(node_id = %self.config.node_id, "bootstrap node started");
        Ok(())
    }

    /// Stop every task and flush the database. Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }
        info!(node_id = %self.config.node_id, "stopping bootstrap node");

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in &tasks {
            task.shutdown().await;
        }
        let listeners = std::mem::take(&mut *self.listeners.lock());
        for listener in listeners {
            let _ = listener.await;
        }

        if let Some(db) = &self.db {
            if let Err(e) = db.flush() {
                warn!(error = %e, "database flush on shutdown failed");
            }
        }
        info!(node_id = %self.config.node_id, "bootstrap node stopped");
    }
}

async fn listen(
    node: Weak<BootstrapNode>,
    topic: &'static str,
    mut rx: mpsc::Receiver<PubSubMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            message = rx.recv() => {
                let Some(message) = message else { break };
                let Some(node) = node.upgrade() else { break };
                if let Err(e) = node.handle_gossip(&message.data).await {
                    debug!(topic, error = %e, "undecodable gossip dropped");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!(topic, "gossip listener stopped");
}

pub fn submit_accepted(outcome: &SubmitOutcome) -> SubmitResponse {
    let record = &outcome.record;
    SubmitResponse {
        accepted: true,
        name: record.name().to_string(),
        hash: Some(hex::encode(record.declared_hash())),
        revision: Some(record.revision()),
        quantum_secure: record.is_quantum(),
        class: None,
        reason: None,
    }
}

pub fn submit_rejected(name: String, error: &SubmitError) -> SubmitResponse {
    SubmitResponse {
        accepted: false,
        name,
        hash: None,
        revision: None,
        quantum_secure: false,
        class: Some(error.class()),
        reason: Some(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{generate_keypair, Identity, KeyKind};
    use crate::pow::{FixedCostPow, SearchControl};
    use crate::record::builder::tests::{
        legacy_record, legacy_with, quantum_record, tiny_memory_hard,
    };
    use crate::record::RecordBuilder;
    use crate::verify::verifier::tests::{test_verifier, verified};

    const HOUR_MS: u64 = 3_600_000;

    fn node_with(config: BootstrapConfig, db: Option<IndexDb>) -> BootstrapNode {
        BootstrapNode::new(config, test_verifier(), Substrate::in_memory(), db)
    }

    fn node() -> BootstrapNode {
        node_with(BootstrapConfig::default(), None)
    }

    fn record_at(id: &Identity, name: &str, cid: &str, at_ms: u64) -> VerifiedRecord {
        let control = SearchControl {
            timestamp_ms: Some(at_ms),
            ..SearchControl::default()
        };
        let builder = RecordBuilder::new(name, cid).registered_at(at_ms);
        let record = match id {
            Identity::Legacy(_) => builder.build(id, &FixedCostPow, &control),
            Identity::Hybrid(_) => builder.build(id, &tiny_memory_hard(), &control),
        };
        verified(record.unwrap())
    }

    fn announce(record: &NameRecord) -> GossipMessage {
        GossipMessage::RecordAnnouncement {
            record: RecordJson::from(record),
            origin: "elsewhere".into(),
            ttl: 3,
        }
    }

    #[tokio::test]
    async fn accepts_and_indexes_submission() {
        let db = IndexDb::open_temporary().unwrap();
        let node = node_with(BootstrapConfig::default(), Some(db.clone()));
        let record = legacy_record("submit-test");

        let outcome = node.submit(SubmitRequest::new(&record), Some(1)).await.unwrap();
        assert_eq!(outcome.index, UpsertOutcome::Inserted);
        assert_eq!(node.lookup("submit-test").unwrap().record(), &record);
        assert_eq!(db.get_record("submit-test").unwrap(), Some(record));
        assert_eq!(node.resolver().cache().hot_len(), 1);
    }

    #[tokio::test]
    async fn endpoint_version_is_enforced() {
        let node = node();
        let err = node
            .submit(SubmitRequest::new(&quantum_record("route-test")), Some(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::WrongVersion { expected: 1, got: 2 }));
        assert_eq!(err.class(), ErrorClass::MalformedInput);
    }

    #[tokio::test]
    async fn forged_record_is_rejected() {
        let node = node();
        let NameRecord::V1(mut r) = legacy_record("forged-sub") else {
            unreachable!()
        };
        r.cid = "bafy-evil".into();
        let response = node.submit_response(SubmitRequest::new(&NameRecord::V1(r))).await;
        assert!(!response.accepted);
        assert_eq!(response.class, Some(ErrorClass::InvalidSignature));
        assert!(node.index().is_empty());
    }

    #[tokio::test]
    async fn nonce_is_single_use() {
        let node = node_with(
            BootstrapConfig {
                require_nonce: true,
                ..BootstrapConfig::default()
            },
            None,
        );
        let identity = generate_keypair(KeyKind::Legacy, None).unwrap();
        let record = legacy_with(&identity, "nonce-sub");

        let err = node.submit(SubmitRequest::new(&record), None).await.unwrap_err();
        assert!(matches!(err, SubmitError::NonceRequired));

        let nonce = node.issue_nonce(&identity.classical().public_key()).nonce;
        let request = SubmitRequest::new(&record)
            .with_nonce(&record, identity.classical(), nonce)
            .unwrap();
        node.submit(request.clone(), None).await.unwrap();

        let replay = node.submit(request, None).await.unwrap_err();
        assert_eq!(replay.class(), ErrorClass::ReplayDetected);
        assert_eq!(node.ledger().replay_attempts(), 1);
    }

    #[tokio::test]
    async fn forged_nonce_signature_keeps_nonce_unused() {
        let node = node();
        let identity = generate_keypair(KeyKind::Legacy, None).unwrap();
        let attacker = generate_keypair(KeyKind::Legacy, None).unwrap();
        let record = legacy_with(&identity, "nonce-forge");
        let owner_key = identity.classical().public_key();

        let nonce = node.issue_nonce(&owner_key).nonce;
        let forged = SubmitRequest::new(&record)
            .with_nonce(&record, attacker.classical(), nonce.clone())
            .unwrap();
        let err = node.submit(forged, None).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::InvalidSignature);

        let genuine = SubmitRequest::new(&record)
            .with_nonce(&record, identity.classical(), nonce)
            .unwrap();
        assert!(node.submit(genuine, None).await.is_ok());
    }

    #[tokio::test]
    async fn held_name_is_taken() {
        let node = node();
        node.submit(SubmitRequest::new(&legacy_record("taken-name")), None)
            .await
            .unwrap();
        let err = node
            .submit(SubmitRequest::new(&legacy_record("taken-name")), None)
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::NameTaken);
    }

    #[tokio::test]
    async fn owner_updates_through_the_chain() {
        let node = node();
        let identity = generate_keypair(KeyKind::Legacy, None).unwrap();
        let first = legacy_with(&identity, "chain-sub");
        node.submit(SubmitRequest::new(&first), None).await.unwrap();

        // A fresh revision 0 does not link to the entry it would replace.
        let unlinked = RecordBuilder::new("chain-sub", "bafy-unlinked")
            .build(&identity, &FixedCostPow, &SearchControl::default())
            .unwrap();
        let err = node.submit(SubmitRequest::new(&unlinked), None).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::ChainMismatch);

        let update = RecordBuilder::new("chain-sub", "bafy-v2")
            .update_of(&first)
            .unwrap()
            .build(&identity, &FixedCostPow, &SearchControl::default())
            .unwrap();
        let outcome = node.submit(SubmitRequest::new(&update), None).await.unwrap();
        assert_eq!(outcome.record.revision(), 1);
        assert_eq!(node.lookup("chain-sub").unwrap().cid(), "bafy-v2");
    }

    #[tokio::test]
    async fn resubmission_is_idempotent() {
        let node = node();
        let record = legacy_record("again-sub");
        node.submit(SubmitRequest::new(&record), None).await.unwrap();
        let again = node.submit(SubmitRequest::new(&record), None).await.unwrap();
        assert_eq!(again.index, UpsertOutcome::Kept);
    }

    #[tokio::test]
    async fn gossiped_record_is_ingested_once() {
        let node = node();
        let message = GossipMessage::RecordAnnouncement {
            record: RecordJson::from(&legacy_record("gossip-sub")),
            origin: "elsewhere".into(),
            ttl: 3,
        };
        node.handle_gossip(&message.to_bytes()).await.unwrap();
        node.handle_gossip(&message.to_bytes()).await.unwrap();
        assert_eq!(node.index().len(), 1);
        assert_eq!(node.stats().gossip_seen, 1);
    }

    #[tokio::test]
    async fn gossip_cannot_steal_a_held_name() {
        let node = node();
        let original = legacy_record("steal-sub");
        node.submit(SubmitRequest::new(&original), None).await.unwrap();
        let message = GossipMessage::RecordAnnouncement {
            record: RecordJson::from(&legacy_record("steal-sub")),
            origin: "elsewhere".into(),
            ttl: 3,
        };
        node.handle_gossip(&message.to_bytes()).await.unwrap();
        assert_eq!(node.lookup("steal-sub").unwrap().record(), &original);
    }

    #[tokio::test]
    async fn rejected_gossip_is_not_forwarded() {
        let substrate = Substrate::in_memory();
        let node = BootstrapNode::new(
            BootstrapConfig::default(),
            test_verifier(),
            substrate.clone(),
            None,
        );
        let mut rx = substrate.pubsub.subscribe(TOPIC_RECORDS_V1).await.unwrap();

        let NameRecord::V1(mut forged) = legacy_record("relay-sub") else {
            unreachable!()
        };
        forged.cid = "bafy-evil".into();
        node.handle_gossip(&announce(&NameRecord::V1(forged)).to_bytes())
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
        assert!(node.index().is_empty());

        node.handle_gossip(&announce(&legacy_record("relay-sub")).to_bytes())
            .await
            .unwrap();
        let forwarded = GossipMessage::from_bytes(&rx.try_recv().unwrap().data).unwrap();
        assert_eq!(forwarded.ttl(), 2);
        assert_eq!(node.index().len(), 1);
    }

    #[tokio::test]
    async fn snapshot_pointer_moves_only_after_a_good_merge() {
        let substrate = Substrate::in_memory();
        let node = BootstrapNode::new(
            BootstrapConfig::default(),
            test_verifier(),
            substrate.clone(),
            None,
        );
        let mut rx = substrate.pubsub.subscribe(TOPIC_INDEX).await.unwrap();
        let index_announcement = |cid: String| GossipMessage::IndexAnnouncement {
            cid,
            origin: "elsewhere".into(),
            entries: 1,
            published_at: unix_millis(),
            ttl: 3,
        };

        let junk = substrate.content.add(b"not a snapshot".to_vec()).await.unwrap();
        let remote = BootstrapIndex::new();
        let NameRecord::V1(mut forged) = legacy_record("pointer-sub") else {
            unreachable!()
        };
        forged.cid = "bafy-evil".into();
        let mut bad_snapshot = remote.snapshot("elsewhere", unix_millis());
        bad_snapshot.records.push(RecordJson::from(&NameRecord::V1(forged)));
        let all_forged = substrate
            .content
            .add(bad_snapshot.to_bytes().unwrap())
            .await
            .unwrap();

        for cid in [junk.to_string(), all_forged.to_string(), "bafy-missing".to_string()] {
            node.handle_gossip(&index_announcement(cid).to_bytes())
                .await
                .unwrap();
        }
        assert_eq!(node.resolver().latest_snapshot(), None);
        assert!(rx.try_recv().is_err());
        assert!(node.index().is_empty());

        remote.upsert(verified(legacy_record("pointer-sub")));
        let good = substrate
            .content
            .add(remote.snapshot("elsewhere", unix_millis()).to_bytes().unwrap())
            .await
            .unwrap();
        node.handle_gossip(&index_announcement(good.to_string()).to_bytes())
            .await
            .unwrap();
        assert_eq!(node.resolver().latest_snapshot(), Some(good));
        assert!(rx.try_recv().is_ok());
        assert!(node.lookup("pointer-sub").is_some());
    }

    #[tokio::test]
    async fn snapshot_merge_is_last_write_wins() {
        // Three-letter names are expensive under the fixed-cost tiers, so
        // this uses V2 records mined at the test schedule.
        let id = generate_keypair(KeyKind::Hybrid, None).unwrap();
        let now = unix_millis();

        let node = node();
        node.index()
            .upsert(record_at(&id, "bob", "bafy-local", now - 60_000));
        node.index()
            .upsert(record_at(&id, "carol-idx", "bafy-carol-local", now));

        let remote = BootstrapIndex::new();
        remote.upsert(record_at(&id, "bob", "bafy-remote", now));
        remote.upsert(record_at(&id, "carol-idx", "bafy-carol-old", now - 60_000));

        let report = node.merge_snapshot(&remote.snapshot("remote", now)).await;
        assert_eq!(report, MergeReport { applied: 1, unchanged: 1, rejected: 0 });
        assert_eq!(node.lookup("bob").unwrap().cid(), "bafy-remote");
        assert_eq!(node.lookup("carol-idx").unwrap().cid(), "bafy-carol-local");
    }

    #[tokio::test]
    async fn snapshot_with_tampered_record_counts_rejection() {
        let remote = BootstrapIndex::new();
        remote.upsert(verified(legacy_record("tamper-idx")));
        let mut snapshot = remote.snapshot("remote", unix_millis());
        snapshot.records[0].cid = "bafy-evil".into();

        let node = node();
        let report = node.merge_snapshot(&snapshot).await;
        assert_eq!(report.rejected, 1);
        assert!(!report.usable());
        assert!(node.index().is_empty());
    }

    #[tokio::test]
    async fn snapshot_cannot_steal_a_held_name() {
        let node = node();
        let original = legacy_record("held-snap");
        node.submit(SubmitRequest::new(&original), None).await.unwrap();

        // Newer than the held entry, so last-write-wins alone would take it.
        let thief = generate_keypair(KeyKind::Legacy, None).unwrap();
        let rival = BootstrapIndex::new();
        rival.upsert(record_at(&thief, "held-snap", "bafy-stolen", unix_millis() + 1_000));

        let report = node
            .merge_snapshot(&rival.snapshot("rival", unix_millis()))
            .await;
        assert_eq!(report, MergeReport { applied: 0, unchanged: 0, rejected: 1 });
        assert_eq!(node.lookup("held-snap").unwrap().record(), &original);
    }

    #[tokio::test]
    async fn published_snapshot_skips_expired_entries_without_dropping_them() {
        let node = node();
        let id = generate_keypair(KeyKind::Legacy, None).unwrap();
        let registered = unix_millis() - 2 * HOUR_MS;
        let control = SearchControl {
            timestamp_ms: Some(registered),
            ..SearchControl::default()
        };
        let lapsed = RecordBuilder::new("lapsed-sub", "bafy-lapsed")
            .registered_at(registered)
            .lifetime(Duration::from_millis(HOUR_MS))
            .build(&id, &FixedCostPow, &control)
            .unwrap();
        let lapsed = test_verifier()
            .admit(lapsed, None, &VerifyContext::propagated(registered + 60_000))
            .unwrap();
        node.index().upsert(lapsed);
        node.submit(SubmitRequest::new(&legacy_record("live-sub")), None)
            .await
            .unwrap();

        let cid = node.publish_index().await.unwrap();
        let bytes = node.substrate.content.get(&cid).await.unwrap().unwrap();
        let snapshot = IndexSnapshot::from_bytes(&bytes).unwrap();
        let names: Vec<&str> = snapshot.records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["live-sub"]);
        assert_eq!(node.index().len(), 2);
        assert!(node.lookup("lapsed-sub").is_none());
    }

    #[tokio::test]
    async fn published_index_merges_into_another_node() {
        let substrate = Substrate::in_memory();
        let a = BootstrapNode::new(
            BootstrapConfig {
                node_id: "a".into(),
                ..BootstrapConfig::default()
            },
            test_verifier(),
            substrate.clone(),
            None,
        );
        let b = BootstrapNode::new(
            BootstrapConfig {
                node_id: "b".into(),
                ..BootstrapConfig::default()
            },
            test_verifier(),
            substrate,
            None,
        );
        a.submit(SubmitRequest::new(&legacy_record("merge-sub")), None)
            .await
            .unwrap();

        let cid = a.publish_index().await.unwrap();
        let report = b.merge_snapshot_at(&cid).await.unwrap();
        assert_eq!(report.applied, 1);
        assert!(b.lookup("merge-sub").is_some());
    }

    #[tokio::test]
    async fn startup_sync_reverifies_stored_records() {
        let db = IndexDb::open_temporary().unwrap();
        let first = node_with(BootstrapConfig::default(), Some(db.clone()));
        first
            .submit(SubmitRequest::new(&legacy_record("stored-sub")), None)
            .await
            .unwrap();

        let restarted = node_with(BootstrapConfig::default(), Some(db));
        let report = restarted.sync_on_startup().await.unwrap();
        assert_eq!(report.restored, 1);
        assert!(restarted.lookup("stored-sub").is_some());
    }

    #[tokio::test]
    async fn start_twice_fails_and_shutdown_is_idempotent() {
        let node = Arc::new(node());
        node.start().await.unwrap();
        assert!(node.is_running());
        assert!(matches!(node.start().await, Err(NodeError::AlreadyStarted)));

        node.shutdown().await;
        node.shutdown().await;
        assert!(!node.is_running());
    }

    #[tokio::test]
    async fn resolve_prefers_local_index() {
        let node = node();
        node.submit(SubmitRequest::new(&legacy_record("local-sub")), None)
            .await
            .unwrap();
        let resolution = node.resolve("local-sub").await.unwrap();
        assert_eq!(resolution.source, ResolutionSource::Index);
    }
}
