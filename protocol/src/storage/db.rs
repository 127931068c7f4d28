//! # IndexDb -- Persistent Bootstrap Index
//!
//! A bootstrap node keeps its index in memory and mirrors it to sled so a
//! restart does not need a full resync from peers.
//!
//! ## Tree Layout
//!
//! | Tree       | Key                      | Value                        |
//! |------------|--------------------------|------------------------------|
//! | `records`  | folded name (UTF-8)      | full binary record           |
//! | `metadata` | key (UTF-8)              | value (bytes)                |
//!
//! The database is not trusted either. [`IndexDb::load_records`] hands back
//! plain [`NameRecord`]s; the node re-verifies every one before it enters
//! the index. Only a [`VerifiedRecord`] can be written.

use sled::{Db, Tree};
use std::path::Path;

use crate::error::ErrorClass;
use crate::network::substrate::Cid;
use crate::record::{decode_full, encode_full, fold_name, NameRecord};
use crate::verify::VerifiedRecord;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl DbError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Storage
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// Key in `metadata` holding the CID of the last published snapshot.
const META_LATEST_SNAPSHOT: &[u8] = b"latest_snapshot_cid";

// ---------------------------------------------------------------------------
// IndexDb
// ---------------------------------------------------------------------------

/// sled-backed mirror of the bootstrap index. Cheap to clone; clones share
/// the same database.
#[derive(Debug, Clone)]
pub struct IndexDb {
    db: Db,
    records: Tree,
    metadata: Tree,
}

impl IndexDb {
    /// Open or create a database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory database, removed on drop.
    pub fn open_temporary() -> DbResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let records = db.open_tree("records")?;
        let metadata = db.open_tree("metadata")?;
        Ok(Self {
            db,
            records,
            metadata,
        })
    }

    // -- Records ------------------------------------------------------------

    pub fn put_record(&self, record: &VerifiedRecord) -> DbResult<()> {
        let bytes = encode_full(record).map_err(|e| DbError::Serialization(e.to_string()))?;
        self.records.insert(record.name().as_bytes(), bytes)?;
        Ok(())
    }

    /// The stored record for `name`, unverified.
    pub fn get_record(&self, name: &str) -> DbResult<Option<NameRecord>> {
        match self.records.get(fold_name(name).as_bytes())? {
            Some(bytes) => decode_full(&bytes)
                .map(Some)
                .map_err(|e| DbError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    pub fn remove_record(&self, name: &str) -> DbResult<bool> {
        Ok(self.records.remove(fold_name(name).as_bytes())?.is_some())
    }

    /// Every stored record, unverified. A corrupt entry fails the whole
    /// load.
    pub fn load_records(&self) -> DbResult<Vec<NameRecord>> {
        let mut out = Vec::with_capacity(self.records.len());
        for entry in self.records.iter() {
            let (key, value) = entry?;
            let record = decode_full(&value).map_err(|e| {
                DbError::Serialization(format!("{}: {e}", String::from_utf8_lossy(&key)))
            })?;
            out.push(record);
        }
        Ok(out)
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    // -- Metadata -----------------------------------------------------------

    pub fn set_latest_snapshot(&self, cid: &Cid) -> DbResult<()> {
        self.metadata.insert(META_LATEST_SNAPSHOT, cid.as_str().as_bytes())?;
        Ok(())
    }

    pub fn latest_snapshot(&self) -> DbResult<Option<Cid>> {
        match self.metadata.get(META_LATEST_SNAPSHOT)? {
            Some(bytes) => {
                let s = std::str::from_utf8(&bytes)
                    .map_err(|e| DbError::Serialization(e.to_string()))?;
                Ok(Some(Cid::new(s)))
            }
            None => Ok(None),
        }
    }

    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::builder::tests::{legacy_record, quantum_record};
    use crate::verify::verifier::tests::verified;

    #[test]
    fn open_temporary_database() {
        let db = IndexDb::open_temporary().expect("should create temp db");
        assert_eq!(db.record_count(), 0);
        assert!(db.latest_snapshot().unwrap().is_none());
    }

    #[test]
    fn store_and_load_records() {
        let db = IndexDb::open_temporary().unwrap();
        let v1 = verified(legacy_record("stored-legacy"));
        let v2 = verified(quantum_record("stored-quantum"));
        db.put_record(&v1).unwrap();
        db.put_record(&v2).unwrap();

        assert_eq!(db.get_record("Stored-Legacy").unwrap().as_ref(), Some(v1.record()));
        let mut all = db.load_records().unwrap();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        assert_eq!(all, vec![v1.into_record(), v2.into_record()]);
    }

    #[test]
    fn corrupt_bytes_fail_with_serialization_error() {
        let db = IndexDb::open_temporary().unwrap();
        db.records.insert(b"broken", b"not a record".to_vec()).unwrap();
        assert!(matches!(db.get_record("broken"), Err(DbError::Serialization(_))));
        assert!(matches!(db.load_records(), Err(DbError::Serialization(_))));
    }

    #[test]
    fn snapshot_cid_roundtrip() {
        let db = IndexDb::open_temporary().unwrap();
        let cid = Cid::for_bytes(b"snapshot");
        db.set_latest_snapshot(&cid).unwrap();
        assert_eq!(db.latest_snapshot().unwrap(), Some(cid));
    }

    #[test]
    fn reopen_keeps_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let record = verified(legacy_record("persisted"));
        {
            let db = IndexDb::open(dir.path()).unwrap();
            db.put_record(&record).unwrap();
            db.flush().unwrap();
        }
        let db = IndexDb::open(dir.path()).unwrap();
        assert_eq!(db.get_record("persisted").unwrap().as_ref(), Some(record.record()));
    }

    #[test]
    fn remove_record() {
        let db = IndexDb::open_temporary().unwrap();
        db.put_record(&verified(legacy_record("removable"))).unwrap();
        assert!(db.remove_record("removable").unwrap());
        assert!(!db.remove_record("removable").unwrap());
    }
}
