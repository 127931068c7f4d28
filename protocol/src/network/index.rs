//! # Bootstrap Index
//!
//! The authoritative name table of one bootstrap node, keyed by folded name.
//! There is no consensus: conflicts resolve last-write-wins on the record's
//! `registered` timestamp, and a tie keeps the entry already present. The
//! compare and the write happen under the entry's shard lock, so two
//! concurrent upserts for one name cannot both win.
//!
//! Snapshots of the unexpired part of the index are published to the
//! content store. Peers merge them through the node, which adds the
//! ownership rule on top of last-write-wins.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::crypto::keys::{ClassicalPublicKey, ClassicalSignature};
use crate::identity::Did;
use crate::record::{CodecError, NameRecord, RecordJson};
use crate::verify::VerifiedRecord;

/// One row of the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub did: Did,
    pub owner_key: ClassicalPublicKey,
    pub cid: String,
    pub timestamp: u64,
    /// Ed25519 signature (the classical half for V2 records).
    pub signature: ClassicalSignature,
    pub record: VerifiedRecord,
}

impl From<VerifiedRecord> for IndexEntry {
    fn from(record: VerifiedRecord) -> Self {
        let signature = match record.record() {
            NameRecord::V1(r) => r.signature.clone(),
            NameRecord::V2(r) => r.signature.classical.clone(),
        };
        Self {
            did: record.did().clone(),
            owner_key: *record.owner_key(),
            cid: record.cid().to_string(),
            timestamp: record.registered(),
            signature,
            record,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
    /// The existing entry is at least as new.
    Kept,
}

impl UpsertOutcome {
    pub fn changed(self) -> bool {
        self != UpsertOutcome::Kept
    }
}

/// Portable dump of an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexSnapshot {
    pub node_id: String,
    pub created_at: u64,
    pub records: Vec<RecordJson>,
}

impl IndexSnapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(|e| CodecError::Json(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Json(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub applied: usize,
    pub unchanged: usize,
    pub rejected: usize,
}

impl MergeReport {
    /// At least one record verified, or there was nothing to verify.
    pub fn usable(&self) -> bool {
        self.rejected == 0 || self.applied + self.unchanged > 0
    }
}

#[derive(Debug, Default)]
pub struct BootstrapIndex {
    entries: DashMap<String, IndexEntry>,
}

impl BootstrapIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `record` unless an entry at least as new exists.
    pub fn upsert(&self, record: VerifiedRecord) -> UpsertOutcome {
        let entry = IndexEntry::from(record);
        match self.entries.entry(entry.record.name().to_string()) {
            Entry::Occupied(mut existing) => {
                if entry.timestamp > existing.get().timestamp {
                    existing.insert(entry);
                    UpsertOutcome::Replaced
                } else {
                    UpsertOutcome::Kept
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
                UpsertOutcome::Inserted
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<IndexEntry> {
        self.entries
            .get(&crate::record::fold_name(name))
            .map(|e| e.value().clone())
    }

    pub fn remove(&self, name: &str) -> Option<IndexEntry> {
        self.entries
            .remove(&crate::record::fold_name(name))
            .map(|(_, e)| e)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All records, sorted by name.
    pub fn records(&self) -> Vec<VerifiedRecord> {
        let mut records: Vec<VerifiedRecord> =
            self.entries.iter().map(|e| e.record.clone()).collect();
        records.sort_by(|a, b| a.name().cmp(b.name()));
        records
    }

    /// The entries still live at `now_ms`. Expired entries stay in the
    /// index; they are only left out of what is published.
    pub fn snapshot(&self, node_id: &str, now_ms: u64) -> IndexSnapshot {
        IndexSnapshot {
            node_id: node_id.to_string(),
            created_at: now_ms,
            records: self
                .records()
                .iter()
                .filter(|r| !r.is_expired_at(now_ms))
                .map(|r| RecordJson::from(r.record()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::unix_millis;
    use crate::identity::{generate_keypair, Identity, KeyKind};
    use crate::pow::{FixedCostPow, SearchControl};
    use crate::record::builder::tests::{legacy_record, tiny_memory_hard};
    use crate::record::RecordBuilder;
    use crate::verify::verifier::tests::verified;

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

    #[test]
    fn last_write_wins_and_ties_keep_existing() {
        let index = BootstrapIndex::new();
        let id = generate_keypair(KeyKind::Legacy, None).unwrap();
        let now = unix_millis();
        let old = record_at(&id, "bob-index", "bafy-old", now - 10_000);
        let new = record_at(&id, "bob-index", "bafy-new", now);
        let tie = record_at(&id, "bob-index", "bafy-tie", now);

        assert_eq!(index.upsert(old.clone()), UpsertOutcome::Inserted);
        assert_eq!(index.upsert(new), UpsertOutcome::Replaced);
        assert_eq!(index.upsert(old), UpsertOutcome::Kept);
        assert_eq!(index.upsert(tie), UpsertOutcome::Kept);
        assert_eq!(index.get("bob-index").unwrap().cid, "bafy-new");
    }

    #[test]
    fn snapshot_bytes_roundtrip() {
        let index = BootstrapIndex::new();
        index.upsert(verified(legacy_record("snap-idx")));
        let snapshot = index.snapshot("n1", 42);
        let bytes = snapshot.to_bytes().unwrap();
        assert_eq!(IndexSnapshot::from_bytes(&bytes).unwrap(), snapshot);
    }

    #[test]
    fn entry_mirrors_record() {
        let index = BootstrapIndex::new();
        let record = verified(legacy_record("entry-idx"));
        index.upsert(record.clone());
        let entry = index.get("ENTRY-idx").unwrap();
        assert_eq!(&entry.did, record.did());
        assert_eq!(entry.timestamp, record.registered());
        assert_eq!(entry.record, record);
    }

    #[test]
    fn snapshot_leaves_out_expired_entries() {
        let index = BootstrapIndex::new();
        let record = verified(legacy_record("expiring-idx"));
        let expires = record.expires();
        index.upsert(record);
        assert_eq!(index.snapshot("n1", expires - 1).records.len(), 1);
        assert!(index.snapshot("n1", expires).records.is_empty());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn merge_report_usability() {
        let all_bad = MergeReport {
            rejected: 3,
            ..MergeReport::default()
        };
        let mixed = MergeReport {
            unchanged: 1,
            rejected: 1,
            ..MergeReport::default()
        };
        assert!(!all_bad.usable());
        assert!(mixed.usable());
        assert!(MergeReport::default().usable());
    }
}
