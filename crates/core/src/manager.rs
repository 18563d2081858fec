//! Cache manager: admission, release, introspection, worker lifecycle.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::{Address, Bytes, B256};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use txcache_chain::ChainClient;

use crate::account_queue::AccountQueue;
use crate::config::CacheConfig;
use crate::entry::CachedTransaction;
use crate::error::CacheError;
use crate::health::{self, HealthReport};
use crate::maintenance::MaintenanceWorker;
use crate::metrics::{CacheMetrics, MetricsRecord};
use crate::poller::NoncePoller;

/// Deadline for workers to finish on shutdown before giving up on them.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period for the polling driver to flush ready runs before workers
/// are told to stop.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(2);

/// Per-account transaction cache sitting in front of the node's RPC
/// submission path.
///
/// Admission, limits and metrics live here; per-sender ordering lives in
/// [`AccountQueue`]. Background behavior (nonce polling, expiry, memory
/// enforcement, metrics emission) runs in workers spawned by [`start`].
///
/// Lock discipline: the sender → queue map is the outer tier, each queue's
/// lock the inner one. Enumeration copies queue handles out of the map
/// before touching any queue lock, and no queue lock is ever held while
/// the map is re-entered.
///
/// [`start`]: TxCacheManager::start
pub struct TxCacheManager {
    config: CacheConfig,
    /// Sender → queue.
    queues: DashMap<Address, Arc<AccountQueue>>,
    /// Counter record behind its own lock; snapshots are value copies.
    metrics: RwLock<MetricsRecord>,
    enabled: AtomicBool,
    /// Broadcast/nonce-read collaborator. `None` runs the cache in test
    /// mode: releases still remove entries and count as processed, and the
    /// polling driver is not started.
    chain: Option<Arc<dyn ChainClient>>,
    shutdown: CancellationToken,
    workers: TaskTracker,
}

impl TxCacheManager {
    /// Create a manager. Workers are not started until [`start`] is called
    /// on the `Arc`-wrapped instance.
    ///
    /// [`start`]: TxCacheManager::start
    pub fn new(config: CacheConfig, chain: Option<Arc<dyn ChainClient>>) -> Self {
        let enabled = config.enable;
        Self {
            config,
            queues: DashMap::new(),
            metrics: RwLock::new(MetricsRecord::new()),
            enabled: AtomicBool::new(enabled),
            chain,
            shutdown: CancellationToken::new(),
            workers: TaskTracker::new(),
        }
    }

    /// Spawn the nonce-polling driver and the maintenance workers.
    pub fn start(self: &Arc<Self>) {
        if !self.is_enabled() {
            info!("Transaction cache disabled, workers not started");
            self.workers.close();
            return;
        }

        if let Some(chain) = self.chain.clone() {
            let poller = NoncePoller::new(
                self.clone(),
                chain,
                self.config.nonce_polling_interval(),
                self.shutdown.clone(),
            );
            self.workers.spawn(poller.run());
        }

        let maintenance = MaintenanceWorker::new(self.clone(), self.shutdown.clone());
        self.workers.spawn(maintenance.clone().run_expiry());
        self.workers.spawn(maintenance.clone().run_memory());
        self.workers.spawn(maintenance.run_metrics());
        self.workers.close();

        info!(
            global_max_tx = self.config.global_max_tx,
            max_tx_per_account = self.config.max_tx_per_account,
            poll_interval_ms = self.config.nonce_polling_interval_ms,
            "Transaction cache started"
        );
    }

    /// Whether the cache currently admits transactions.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Admit a raw transaction for `sender` at `nonce`.
    ///
    /// Returns the decoded transaction hash on success. All rejection
    /// reasons are synchronous; once this returns `Ok`, later failures are
    /// only visible through logs and metrics.
    pub fn submit(&self, raw: Bytes, sender: Address, nonce: u64) -> Result<B256, CacheError> {
        if !self.is_enabled() {
            return Err(CacheError::Disabled);
        }

        let entry = Arc::new(CachedTransaction::decode(raw, sender, nonce)?);

        let cached = self.cached_count();
        if cached >= self.config.global_max_tx {
            return Err(CacheError::GlobalLimit {
                limit: self.config.global_max_tx,
            });
        }

        let queue = self
            .queues
            .entry(sender)
            .or_insert_with(|| Arc::new(AccountQueue::new(sender)))
            .value()
            .clone();

        if queue.size() >= self.config.max_tx_per_account {
            return Err(CacheError::AccountLimit {
                limit: self.config.max_tx_per_account,
            });
        }

        let hash = entry.hash;
        queue.add(entry, self.config.replacement_percent())?;
        // Recount rather than assume +1: a replacement leaves the gauge flat.
        self.observe_peaks();

        debug!(sender = %sender, nonce = nonce, hash = %hash, "Transaction cached");
        Ok(hash)
    }

    /// Remove `entries` from `queue`, then hand each to the broadcast
    /// collaborator.
    ///
    /// Entries leave the cache before the first RPC call, so a concurrent
    /// resubmission of the same nonce cannot double-release. A failed
    /// broadcast only bumps the entry's retry counter; the entry stays
    /// removed.
    pub async fn release_and_broadcast(
        &self,
        entries: &[Arc<CachedTransaction>],
        queue: &AccountQueue,
    ) {
        if entries.is_empty() {
            return;
        }

        queue.remove_many(entries);

        if let Some(chain) = &self.chain {
            for entry in entries {
                match chain.broadcast(&entry.raw).await {
                    Ok(hash) => {
                        debug!(
                            sender = %entry.sender,
                            nonce = entry.nonce,
                            hash = %hash,
                            "Cached transaction broadcast"
                        );
                    }
                    Err(err) => {
                        let retries = entry.record_retry();
                        if retries < self.config.max_retries {
                            error!(
                                sender = %entry.sender,
                                nonce = entry.nonce,
                                hash = %entry.hash,
                                retries = retries,
                                error = %err,
                                "Broadcast failed"
                            );
                        } else {
                            error!(
                                sender = %entry.sender,
                                nonce = entry.nonce,
                                hash = %entry.hash,
                                retries = retries,
                                error = %err,
                                "Broadcast failed, retry budget exhausted"
                            );
                        }
                    }
                }
            }
        }

        self.metrics.write().processed_count += entries.len() as u64;
    }

    /// Snapshot of senders with a cached queue.
    pub fn accounts_with_cache(&self) -> Vec<Address> {
        self.queues.iter().map(|entry| *entry.key()).collect()
    }

    /// Total cached transactions across all senders.
    pub fn cached_count(&self) -> usize {
        self.queue_handles().iter().map(|queue| queue.size()).sum()
    }

    /// Point-in-time metrics snapshot.
    pub fn metrics(&self) -> CacheMetrics {
        let queues = self.queue_handles();
        let cached_count = queues.iter().map(|queue| queue.size()).sum();
        let record = self.metrics.read();
        CacheMetrics {
            cached_count,
            accounts_with_cache: queues.len(),
            processed_count: record.processed_count,
            expired_count: record.expired_count,
            peak_cached_count: record.peak_cached_count,
            peak_accounts: record.peak_accounts,
            start_time: record.start_time,
            last_cleanup_time: record.last_cleanup_time,
        }
    }

    /// Health snapshot with operator warnings.
    pub fn health(&self) -> HealthReport {
        let metrics = self.metrics();
        let memory_bytes = health::process_memory_bytes();
        let largest_queue = self
            .queue_handles()
            .iter()
            .map(|queue| queue.size())
            .max()
            .unwrap_or(0);
        let warnings = health::collect_warnings(&metrics, &self.config, memory_bytes, largest_queue);
        let uptime = Utc::now()
            .signed_duration_since(metrics.start_time)
            .to_std()
            .unwrap_or_default();

        HealthReport {
            enabled: self.is_enabled(),
            cached_count: metrics.cached_count,
            accounts_with_cache: metrics.accounts_with_cache,
            processed_count: metrics.processed_count,
            expired_count: metrics.expired_count,
            uptime,
            memory_bytes,
            warnings,
        }
    }

    /// Text record of one sender's queued transactions, ascending by nonce.
    pub fn account_snapshot(&self, sender: &Address) -> Option<String> {
        let queue = self.queue_of(sender)?;
        let mut entries = queue.all();
        entries.sort_by_key(|entry| entry.nonce);

        let now = Instant::now();
        let mut report = format!("account {} ({} cached)", sender, entries.len());
        for entry in entries {
            let _ = write!(
                report,
                "\n  nonce={} hash={} age={}s retries={}",
                entry.nonce,
                entry.hash,
                entry.age(now).as_secs(),
                entry.retries(),
            );
        }
        Some(report)
    }

    /// Graceful shutdown: block admissions, give the polling driver a
    /// moment to flush ready runs, then stop and join all workers under the
    /// deadline.
    pub async fn stop(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }

        self.enabled.store(false, Ordering::Relaxed);
        if self.chain.is_some() && self.cached_count() > 0 {
            info!("Transaction cache draining before shutdown");
            tokio::time::sleep(SHUTDOWN_DRAIN).await;
        }

        self.shutdown.cancel();
        self.workers.close();
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.workers.wait())
            .await
            .is_err()
        {
            warn!(
                timeout = ?SHUTDOWN_TIMEOUT,
                "Workers did not stop within the deadline, forcing shutdown"
            );
        }
        info!("Transaction cache stopped");
    }

    // Crate-internal surface for the workers

    pub(crate) fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub(crate) fn chain(&self) -> Option<&Arc<dyn ChainClient>> {
        self.chain.as_ref()
    }

    /// The queue for `sender`, if one exists.
    pub(crate) fn queue_of(&self, sender: &Address) -> Option<Arc<AccountQueue>> {
        self.queues.get(sender).map(|entry| entry.value().clone())
    }

    /// Copy out all queue handles. Holds the map only for the copy, per the
    /// lock discipline.
    pub(crate) fn queue_handles(&self) -> Vec<Arc<AccountQueue>> {
        self.queues
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Drop the sender's queue if it is observed empty. Returns whether a
    /// queue was removed.
    pub(crate) fn remove_queue_if_empty(&self, sender: &Address) -> bool {
        self.queues
            .remove_if(sender, |_, queue| queue.is_empty())
            .is_some()
    }

    /// Fold an expiry sweep into the counters and stamp its completion.
    pub(crate) fn record_cleanup(&self, expired: u64) {
        let mut record = self.metrics.write();
        record.expired_count += expired;
        record.last_cleanup_time = Some(Utc::now());
    }

    /// Raise the peak gauges to the current cache shape.
    pub(crate) fn observe_peaks(&self) {
        let queues = self.queue_handles();
        let cached = queues.iter().map(|queue| queue.size()).sum();
        self.metrics.write().observe(cached, queues.len());
    }
}
