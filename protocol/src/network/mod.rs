//! # Network Module
//!
//! Resolution, propagation and the bootstrap index service.
//!
//! ## Architecture
//!
//! ```text
//! substrate.rs  -- content store / pubsub / DHT traits and in-memory backends
//! cache.rs      -- two-tier (hot/warm) verified-record cache
//! index.rs      -- last-write-wins bootstrap index and its snapshots
//! gossip.rs     -- gossip messages, TTL and BLAKE3 dedup
//! client.rs     -- bootstrap client trait, HTTP client, wire types
//! resolver.rs   -- fallback resolution chain and registration fan-out
//! service.rs    -- BootstrapNode: submit, gossip handling, lifecycle
//! ```
//!
//! ## Design Decisions
//!
//! - Nothing that arrives over the network is trusted. The resolver, the
//!   index merge and the node all go through the same verifier, and only a
//!   `VerifiedRecord` can enter the cache, the index or the database.
//! - The substrate is a trait seam. Tests and single-process setups use the
//!   in-memory backends; several nodes share one by cloning its handles.
//! - Every network call is bounded by `tokio::time::timeout`. A failing
//!   source is logged and skipped, never fatal to a resolution.

pub mod cache;
pub mod client;
pub mod gossip;
pub mod index;
pub mod resolver;
pub mod service;
pub mod substrate;

pub use cache::{CacheTier, TwoTierCache};
pub use client::{
    BootstrapClient, BootstrapError, HttpBootstrapClient, LocalBootstrapClient, NamesResponse,
    NonceRequest, NonceResponse, ResolveResponse, SubmitRequest, SubmitResponse,
};
pub use gossip::{GossipAction, GossipConfig, GossipError, GossipMessage, GossipProtocol};
pub use index::{BootstrapIndex, IndexEntry, IndexSnapshot, MergeReport, UpsertOutcome};
pub use resolver::{
    RegisterError, RegistrationReceipt, Resolution, ResolutionSource, ResolveError, Resolver,
    ResolverConfig,
};
pub use service::{
    BootstrapConfig, BootstrapNode, NodeError, NodeStats, SubmitError, SubmitOutcome, Substrate,
    SyncReport,
};
pub use substrate::{
    dht_key, Cid, ContentStore, Dht, MemoryContentStore, MemoryDht, MemoryPubSub, PubSub,
    PubSubMessage, SubstrateError,
};
