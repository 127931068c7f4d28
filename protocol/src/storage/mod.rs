//! # Storage Module
//!
//! Local persistence for a bootstrap node: the name index mirrored to sled,
//! plus the CID of the last index snapshot the node published.
//!
//! Records are stored in the full binary encoding (bincode), the same bytes
//! that go into the content store. JSON is for APIs and gossip; bincode is
//! for storage.

pub mod db;

pub use db::{DbError, DbResult, IndexDb};
