//! # Nonce Ledger
//!
//! Single-use challenges for submissions. A bootstrap node issues a nonce
//! to an owner key, the owner signs it into their submission, and the node
//! redeems it exactly once.
//!
//! ## Guarantees
//!
//! - A nonce is scoped to the owner key it was issued for. Redeeming it
//!   under another key is `Unknown`.
//! - `unused -> used` is the only transition and happens at most once.
//!   Every later attempt fails with `ReplayDetected`, is counted and is
//!   logged on the `moniker::security` target.
//! - The check-and-flip in [`NonceLedger::try_redeem_at`] holds the entry's
//!   shard lock, and [`NonceLedger::sweep`] takes the same locks, so a sweep
//!   never interleaves with a redemption.
//! - Entries are dropped one hour after issuance, used or not.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{millis, unix_millis, NONCE_EXPIRY};
use crate::error::ErrorClass;
use crate::task::BackgroundTask;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NonceError {
    #[error("nonce already redeemed")]
    ReplayDetected,

    #[error("nonce was never issued to this owner")]
    Unknown,

    #[error("nonce expired")]
    Expired,
}

impl NonceError {
    pub fn class(&self) -> ErrorClass {
        match self {
            NonceError::ReplayDetected => ErrorClass::ReplayDetected,
            NonceError::Unknown => ErrorClass::MalformedInput,
            NonceError::Expired => ErrorClass::ExpiredOrFuture,
        }
    }
}

/// Ledger entry for one issued nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceRecord {
    pub issued_at: u64,
    pub used: bool,
}

type LedgerKey = ([u8; 32], String);

/// Concurrent issue/redeem ledger.
#[derive(Debug)]
pub struct NonceLedger {
    entries: DashMap<LedgerKey, NonceRecord>,
    expiry_ms: u64,
    replays: AtomicU64,
}

impl Default for NonceLedger {
    fn default() -> Self {
        Self::new(NONCE_EXPIRY)
    }
}

impl NonceLedger {
    pub fn new(expiry: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            expiry_ms: millis(expiry),
            replays: AtomicU64::new(0),
        }
    }

    /// Issue a fresh nonce (32 random bytes, hex) for `owner_key`.
    pub fn issue(&self, owner_key: &[u8; 32]) -> String {
        self.issue_at(owner_key, unix_millis())
    }

    pub fn issue_at(&self, owner_key: &[u8; 32], now_ms: u64) -> String {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let nonce = hex::encode(bytes);
        self.entries.insert(
            (*owner_key, nonce.clone()),
            NonceRecord {
                issued_at: now_ms,
                used: false,
            },
        );
        nonce
    }

    /// `true` exactly once per issued nonce.
    pub fn redeem(&self, owner_key: &[u8; 32], nonce: &str) -> bool {
        self.try_redeem(owner_key, nonce).is_ok()
    }

    pub fn try_redeem(&self, owner_key: &[u8; 32], nonce: &str) -> Result<(), NonceError> {
        self.try_redeem_at(owner_key, nonce, unix_millis())
    }

    /// Consume a nonce, reporting why it could not be consumed.
    pub fn try_redeem_at(
        &self,
        owner_key: &[u8; 32],
        nonce: &str,
        now_ms: u64,
    ) -> Result<(), NonceError> {
        let key = (*owner_key, nonce.to_string());
        let Some(mut entry) = self.entries.get_mut(&key) else {
            warn!(
                target: "moniker::security",
                owner = %hex::encode(owner_key),
                "redemption of unknown nonce"
            );
            return Err(NonceError::Unknown);
        };

        if entry.used {
            self.replays.fetch_add(1, Ordering::Relaxed);
            warn!(
                target: "moniker::security",
                owner = %hex::encode(owner_key),
                nonce,
                "nonce replay detected"
            );
            return Err(NonceError::ReplayDetected);
        }
        if now_ms.saturating_sub(entry.issued_at) > self.expiry_ms {
            return Err(NonceError::Expired);
        }

        entry.used = true;
        Ok(())
    }

    /// Look at an entry without consuming it.
    pub fn peek(&self, owner_key: &[u8; 32], nonce: &str) -> Option<NonceRecord> {
        self.entries
            .get(&(*owner_key, nonce.to_string()))
            .map(|e| *e.value())
    }

    /// Drop every entry issued more than the expiry ago. Returns how many
    /// were removed.
    pub fn sweep(&self, now_ms: u64) -> usize {
        let before = self.entries.len();
        let expiry = self.expiry_ms;
        self.entries
            .retain(|_, rec| now_ms.saturating_sub(rec.issued_at) <= expiry);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, "swept expired nonces");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replays detected since start-up.
    pub fn replay_attempts(&self) -> u64 {
        self.replays.load(Ordering::Relaxed)
    }

    /// Sweep every `interval` until the returned task is shut down.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> BackgroundTask {
        let ledger = Arc::clone(self);
        BackgroundTask::spawn_periodic("nonce-sweeper", interval, move || {
            let ledger = Arc::clone(&ledger);
            async move {
                ledger.sweep(unix_millis());
            }
        })
    }
}
