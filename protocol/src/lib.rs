// Copyright (c) 2026 Moniker Contributors. MIT License.
// See LICENSE for details.

//! # Moniker Protocol -- Core Library
//!
//! Moniker is a decentralized naming protocol. A name is claimed by
//! publishing a signed record that carries a proof of work, and it resolves
//! through a chain of caches, the DHT, federated bootstrap index nodes and
//! published index snapshots. No node is trusted: every record is verified
//! wherever it lands.
//!
//! ## Architecture
//!
//! - **config** -- Protocol constants and network parameters.
//! - **error** -- The shared failure classes every module error maps to.
//! - **crypto** -- Ed25519, Dilithium3 hybrids, hashing, key-file sealing.
//! - **identity** -- Legacy and hybrid identities, `did:moniker:` DIDs.
//! - **pow** -- Fixed-cost and memory-hard proof of work, cancellable miner.
//! - **nonce** -- Single-use submission nonces with replay telemetry.
//! - **record** -- Name rules, V1/V2 records, canonical codec, JSON form.
//! - **verify** -- The zero-trust verifier that gates every record.
//! - **network** -- Substrate seam, cache, gossip, resolver, bootstrap node.
//! - **storage** -- sled persistence for the bootstrap index.
//! - **task** -- Periodic background tasks with stop handles.
//!
//! ## Record Versions
//!
//! Version 1 records are signed with Ed25519 and carry the fixed-cost,
//! length-tiered SHA-256 proof. Version 2 records add a Dilithium3
//! signature alongside Ed25519 and use the memory-hard Argon2id proof.
//! Both versions coexist on the network and travel on separate gossip
//! topics.

pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod network;
pub mod nonce;
pub mod pow;
pub mod record;
pub mod storage;
pub mod task;
pub mod verify;

pub use error::ErrorClass;
