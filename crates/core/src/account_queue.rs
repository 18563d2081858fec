//! Per-sender transaction queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::Address;
use parking_lot::RwLock;

use crate::entry::CachedTransaction;
use crate::error::CacheError;
use crate::nonce_set::NonceSet;

/// Interior state guarded by the queue lock.
///
/// Invariant: `entries` and `nonces` cover the same key set at all times.
#[derive(Debug, Default)]
struct QueueInner {
    entries: HashMap<u64, Arc<CachedTransaction>>,
    nonces: NonceSet,
    /// Last on-chain nonce observed by the polling driver. Advisory only;
    /// admission never consults it.
    current_nonce: Option<u64>,
}

/// Holder for one sender's cached transactions, keyed by nonce.
///
/// All operations take the queue's own lock; callers must not hold it while
/// acquiring the manager-level map.
#[derive(Debug)]
pub struct AccountQueue {
    sender: Address,
    inner: RwLock<QueueInner>,
}

impl AccountQueue {
    /// Create an empty queue owned by `sender`.
    pub fn new(sender: Address) -> Self {
        Self {
            sender,
            inner: RwLock::new(QueueInner::default()),
        }
    }

    /// The owning sender.
    pub fn sender(&self) -> Address {
        self.sender
    }

    /// Insert `entry`, or replace an existing same-nonce entry when the new
    /// effective gas price clears the configured bump.
    ///
    /// Replacement succeeds iff `new ≥ old × (100 + percent) / 100`; an
    /// equal-priced duplicate therefore rejects. On rejection the queue is
    /// unchanged. On replacement the ordered set is unchanged.
    pub fn add(
        &self,
        entry: Arc<CachedTransaction>,
        replacement_percent: u64,
    ) -> Result<(), CacheError> {
        debug_assert_eq!(entry.sender, self.sender);
        let mut inner = self.inner.write();

        if let Some(old) = inner.entries.get(&entry.nonce) {
            let observed = entry.effective_gas_price();
            let required = required_replacement_price(old.effective_gas_price(), replacement_percent);
            if observed < required {
                return Err(CacheError::ReplacementRejected { observed, required });
            }
            inner.entries.insert(entry.nonce, entry);
            return Ok(());
        }

        inner.nonces.add(entry.nonce);
        inner.entries.insert(entry.nonce, entry);
        Ok(())
    }

    /// Remove and return the entry at `nonce`.
    pub fn remove(&self, nonce: u64) -> Option<Arc<CachedTransaction>> {
        let mut inner = self.inner.write();
        let entry = inner.entries.remove(&nonce)?;
        inner.nonces.remove(nonce);
        Some(entry)
    }

    /// Remove each of `entries` by its nonce.
    pub fn remove_many(&self, entries: &[Arc<CachedTransaction>]) {
        let mut inner = self.inner.write();
        for entry in entries {
            inner.entries.remove(&entry.nonce);
            inner.nonces.remove(entry.nonce);
        }
    }

    /// Remove every entry with nonce ≤ `max_inclusive`; returns the count.
    ///
    /// Used by the polling driver to purge transactions the chain already
    /// executed.
    pub fn remove_up_to(&self, max_inclusive: u64) -> usize {
        let mut inner = self.inner.write();
        let executed: Vec<u64> = inner
            .nonces
            .range_from(0)
            .take_while(|nonce| *nonce <= max_inclusive)
            .collect();
        for nonce in &executed {
            inner.entries.remove(nonce);
            inner.nonces.remove(*nonce);
        }
        executed.len()
    }

    /// The maximal run of entries at `start, start+1, …`, ascending.
    /// Stops at the first gap. Read-only.
    pub fn find_consecutive(&self, start: u64) -> Vec<Arc<CachedTransaction>> {
        let inner = self.inner.read();
        let mut run = Vec::new();
        let mut expected = start;
        for nonce in inner.nonces.range_from(start) {
            if nonce != expected {
                break;
            }
            match inner.entries.get(&nonce) {
                Some(entry) => run.push(entry.clone()),
                None => break,
            }
            expected += 1;
        }
        run
    }

    /// Look up the entry at `nonce`.
    pub fn get(&self, nonce: u64) -> Option<Arc<CachedTransaction>> {
        self.inner.read().entries.get(&nonce).cloned()
    }

    /// Number of cached entries.
    pub fn size(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Whether the queue holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// All entries, unordered snapshot.
    pub fn all(&self) -> Vec<Arc<CachedTransaction>> {
        self.inner.read().entries.values().cloned().collect()
    }

    /// Entries older than `timeout` as of now.
    pub fn get_expired(&self, timeout: Duration) -> Vec<Arc<CachedTransaction>> {
        let now = Instant::now();
        self.inner
            .read()
            .entries
            .values()
            .filter(|entry| entry.age(now) > timeout)
            .cloned()
            .collect()
    }

    /// Record the last on-chain nonce seen for this sender.
    pub fn set_current_nonce(&self, nonce: u64) {
        self.inner.write().current_nonce = Some(nonce);
    }

    /// Last recorded on-chain nonce, if any.
    pub fn current_nonce(&self) -> Option<u64> {
        self.inner.read().current_nonce
    }
}

/// Minimum effective gas price a replacement must post against `old`.
fn required_replacement_price(old: u128, percent: u64) -> u128 {
    old.saturating_mul(100 + percent as u128) / 100
}
