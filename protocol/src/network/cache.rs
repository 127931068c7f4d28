//! Two-tier record cache.
//!
//! Every insert lands in both tiers. The hot tier expires quickly
//! ([`HOT_CACHE_TTL`]); the warm tier keeps the record longer
//! ([`WARM_CACHE_TTL`]) and a warm hit promotes the record back into hot.
//! Records are never demoted.
//!
//! Within a tier, an insert replaces the existing entry only when its
//! `registered` timestamp is at least as new. The comparison and the write
//! happen under the entry's shard lock.
//!
//! Every method has an `_at` twin taking an explicit clock for tests.

use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use crate::config::{millis, unix_millis, HOT_CACHE_TTL, WARM_CACHE_TTL};
use crate::record::fold_name;
use crate::verify::VerifiedRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Hot,
    Warm,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    record: VerifiedRecord,
    inserted_at: u64,
}

impl CacheEntry {
    fn fresh(&self, now_ms: u64, ttl_ms: u64) -> bool {
        now_ms.saturating_sub(self.inserted_at) < ttl_ms && !self.record.is_expired_at(now_ms)
    }
}

#[derive(Debug)]
pub struct TwoTierCache {
    hot: DashMap<String, CacheEntry>,
    warm: DashMap<String, CacheEntry>,
    hot_ttl_ms: u64,
    warm_ttl_ms: u64,
}

impl Default for TwoTierCache {
    fn default() -> Self {
        Self::new(HOT_CACHE_TTL, WARM_CACHE_TTL)
    }
}

impl TwoTierCache {
    pub fn new(hot_ttl: Duration, warm_ttl: Duration) -> Self {
        Self {
            hot: DashMap::new(),
            warm: DashMap::new(),
            hot_ttl_ms: millis(hot_ttl),
            warm_ttl_ms: millis(warm_ttl),
        }
    }

    pub fn insert(&self, record: VerifiedRecord) {
        self.insert_at(record, unix_millis());
    }

    pub fn insert_at(&self, record: VerifiedRecord, now_ms: u64) {
        let key = record.name().to_string();
        Self::upsert(&self.warm, key.clone(), record.clone(), now_ms);
        Self::upsert(&self.hot, key, record, now_ms);
    }

    fn upsert(tier: &DashMap<String, CacheEntry>, key: String, record: VerifiedRecord, now_ms: u64) {
        let entry = CacheEntry {
            record,
            inserted_at: now_ms,
        };
        match tier.entry(key) {
            Entry::Occupied(mut existing) => {
                if entry.record.registered() >= existing.get().record.registered() {
                    existing.insert(entry);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<(VerifiedRecord, CacheTier)> {
        self.get_at(name, unix_millis())
    }

    /// Look `name` up, hot tier first. Stale entries found on the way are
    /// removed.
    pub fn get_at(&self, name: &str, now_ms: u64) -> Option<(VerifiedRecord, CacheTier)> {
        let key = fold_name(name);

        if let Some(record) = Self::lookup(&self.hot, &key, now_ms, self.hot_ttl_ms) {
            return Some((record, CacheTier::Hot));
        }

        let record = Self::lookup(&self.warm, &key, now_ms, self.warm_ttl_ms)?;
        Self::upsert(&self.hot, key, record.clone(), now_ms);
        Some((record, CacheTier::Warm))
    }

    fn lookup(
        tier: &DashMap<String, CacheEntry>,
        key: &str,
        now_ms: u64,
        ttl_ms: u64,
    ) -> Option<VerifiedRecord> {
        if let Some(entry) = tier.get(key) {
            if entry.fresh(now_ms, ttl_ms) {
                return Some(entry.record.clone());
            }
        }
        tier.remove_if(key, |_, entry| !entry.fresh(now_ms, ttl_ms));
        None
    }

    pub fn remove(&self, name: &str) {
        let key = fold_name(name);
        self.hot.remove(&key);
        self.warm.remove(&key);
    }

    /// Drop every stale entry from both tiers. Returns how many went.
    pub fn evict_expired_at(&self, now_ms: u64) -> usize {
        let before = self.hot.len() + self.warm.len();
        self.hot.retain(|_, e| e.fresh(now_ms, self.hot_ttl_ms));
        self.warm.retain(|_, e| e.fresh(now_ms, self.warm_ttl_ms));
        before - (self.hot.len() + self.warm.len())
    }

    pub fn hot_len(&self) -> usize {
        self.hot.len()
    }

    pub fn warm_len(&self) -> usize {
        self.warm.len()
    }

    pub fn clear(&self) {
        self.hot.clear();
        self.warm.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{generate_keypair, KeyKind};
    use crate::record::builder::tests::{legacy_record, legacy_with};
    use crate::record::RecordBuilder;
    use crate::pow::{FixedCostPow, SearchControl};
    use crate::verify::verifier::tests::verified;

    const SEC: u64 = 1000;

    #[test]
    fn hot_ttl_boundary() {
        let cache = TwoTierCache::default();
        let record = verified(legacy_record("cache-test"));
        let t0 = unix_millis();
        cache.insert_at(record.clone(), t0);

        let (hit, tier) = cache.get_at("cache-test", t0 + 299 * SEC).unwrap();
        assert_eq!(tier, CacheTier::Hot);
        assert_eq!(hit, record);

        // Past the hot TTL the hot entry is gone; the warm tier still has it.
        let (_, tier) = cache.get_at("cache-test", t0 + 301 * SEC).unwrap();
        assert_eq!(tier, CacheTier::Warm);
    }

    #[test]
    fn warm_hit_is_promoted() {
        let cache = TwoTierCache::default();
        let t0 = unix_millis();
        cache.insert_at(verified(legacy_record("cache-test")), t0);

        let later = t0 + 400 * SEC;
        assert_eq!(cache.get_at("cache-test", later).unwrap().1, CacheTier::Warm);
        assert_eq!(cache.get_at("cache-test", later + SEC).unwrap().1, CacheTier::Hot);
    }

    #[test]
    fn warm_ttl_is_a_full_miss() {
        let cache = TwoTierCache::default();
        let t0 = unix_millis();
        cache.insert_at(verified(legacy_record("cache-test")), t0);
        assert!(cache.get_at("cache-test", t0 + 3601 * SEC).is_none());
        assert_eq!(cache.hot_len() + cache.warm_len(), 0);
    }

    #[test]
    fn older_record_does_not_replace_newer() {
        let cache = TwoTierCache::default();
        let id = generate_keypair(KeyKind::Legacy, None).unwrap();
        let now = unix_millis();
        let newer = verified(legacy_with(&id, "cache-test"));
        let older = verified(
            RecordBuilder::new("cache-test", "bafy-older")
                .registered_at(now - 60 * SEC)
                .build(
                    &id,
                    &FixedCostPow,
                    &SearchControl {
                        timestamp_ms: Some(now - 60 * SEC),
                        ..SearchControl::default()
                    },
                )
                .unwrap(),
        );

        cache.insert_at(newer.clone(), now);
        cache.insert_at(older, now);
        assert_eq!(cache.get_at("cache-test", now).unwrap().0, newer);
    }

    #[test]
    fn lookup_folds_name() {
        let cache = TwoTierCache::default();
        let t0 = unix_millis();
        cache.insert_at(verified(legacy_record("cache-test")), t0);
        assert!(cache.get_at("  CACHE-Test ", t0).is_some());
    }

    #[test]
    fn evict_expired_counts_both_tiers() {
        let cache = TwoTierCache::default();
        let t0 = unix_millis();
        cache.insert_at(verified(legacy_record("cache-one")), t0);
        cache.insert_at(verified(legacy_record("cache-two")), t0);
        assert_eq!(cache.evict_expired_at(t0 + 301 * SEC), 2);
        assert_eq!(cache.warm_len(), 2);
        assert_eq!(cache.evict_expired_at(t0 + 3601 * SEC), 2);
    }
}
