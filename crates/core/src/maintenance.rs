//! Expiry, memory-limit, and metrics-emission workers.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use futures::FutureExt;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::manager::TxCacheManager;

/// Period of the memory-limit enforcement pass.
const MEMORY_ENFORCE_PERIOD: Duration = Duration::from_secs(30);

/// Period of the metrics log line.
const METRICS_REPORT_PERIOD: Duration = Duration::from_secs(5 * 60);

/// Background maintenance over the cache: expiry sweeps on the configured
/// interval, memory-limit enforcement every 30 s, and a metrics log line
/// every 5 min. Each loop body is panic-isolated so one bad pass cannot
/// take a worker down.
#[derive(Clone)]
pub(crate) struct MaintenanceWorker {
    cache: Arc<TxCacheManager>,
    shutdown: CancellationToken,
}

impl MaintenanceWorker {
    pub(crate) fn new(cache: Arc<TxCacheManager>, shutdown: CancellationToken) -> Self {
        Self { cache, shutdown }
    }

    pub(crate) async fn run_expiry(self) {
        let mut ticker = interval(self.cache.config().cleanup_interval());
        info!(
            period_s = self.cache.config().cleanup_interval_secs,
            "Expiry worker started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(panic) = AssertUnwindSafe(self.expiry_pass()).catch_unwind().await {
                        error!(panic = %panic_message(panic), "Expiry pass panicked");
                    }
                }
            }
        }

        info!("Expiry worker stopped");
    }

    pub(crate) async fn run_memory(self) {
        let mut ticker = interval(MEMORY_ENFORCE_PERIOD);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let pass = std::panic::catch_unwind(AssertUnwindSafe(|| self.memory_pass()));
                    if let Err(panic) = pass {
                        error!(panic = %panic_message(panic), "Memory enforcement pass panicked");
                    }
                }
            }
        }

        info!("Memory enforcement worker stopped");
    }

    pub(crate) async fn run_metrics(self) {
        let mut ticker = interval(METRICS_REPORT_PERIOD);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let pass = std::panic::catch_unwind(AssertUnwindSafe(|| self.metrics_pass()));
                    if let Err(panic) = pass {
                        error!(panic = %panic_message(panic), "Metrics pass panicked");
                    }
                }
            }
        }

        info!("Metrics worker stopped");
    }

    /// One expiry sweep: backup on-chain purge where a chain client exists,
    /// then removal of entries past `tx_timeout`, then cleanup of drained
    /// queues.
    pub(crate) async fn expiry_pass(&self) {
        let timeout = self.cache.config().tx_timeout();
        let mut expired_total = 0usize;
        let mut drained: Vec<Address> = Vec::new();

        for queue in self.cache.queue_handles() {
            // Backup purge against the chain; tolerated missing in test
            // mode, and a read failure just skips the purge.
            if let Some(chain) = self.cache.chain() {
                match chain.nonce_at_latest(queue.sender()).await {
                    Ok(chain_nonce) if chain_nonce > 0 => {
                        queue.remove_up_to(chain_nonce - 1);
                    }
                    Ok(_) => {}
                    Err(err) => {
                        debug!(sender = %queue.sender(), error = %err, "Backup purge skipped");
                    }
                }
            }

            let expired = queue.get_expired(timeout);
            if !expired.is_empty() {
                queue.remove_many(&expired);
                expired_total += expired.len();
                for entry in &expired {
                    debug!(
                        sender = %entry.sender,
                        nonce = entry.nonce,
                        hash = %entry.hash,
                        "Cached transaction expired"
                    );
                }
            }

            if queue.is_empty() {
                drained.push(queue.sender());
            }
        }

        for sender in drained {
            self.cache.remove_queue_if_empty(&sender);
        }
        self.cache.record_cleanup(expired_total as u64);

        if expired_total > 0 {
            info!(expired = expired_total, "Expiry sweep complete");
        }
    }

    /// One memory-limit pass: record the peaks, evict the oldest entries
    /// globally down to `global_max_tx`, trim each queue to
    /// `max_tx_per_account`, drop drained queues.
    ///
    /// Eviction order is ascending by insertion time; the sort is stable so
    /// ties keep their collection order within a pass.
    pub(crate) fn memory_pass(&self) {
        self.cache.observe_peaks();

        let global_max = self.cache.config().global_max_tx;
        let per_account_max = self.cache.config().max_tx_per_account;
        let queues = self.cache.queue_handles();

        let total: usize = queues.iter().map(|queue| queue.size()).sum();
        if total > global_max {
            let excess = total - global_max;
            let mut candidates = Vec::with_capacity(total);
            for queue in &queues {
                for entry in queue.all() {
                    candidates.push((entry.inserted_at, queue.clone(), entry.nonce));
                }
            }
            candidates.sort_by_key(|(inserted_at, _, _)| *inserted_at);

            for (_, queue, nonce) in candidates.into_iter().take(excess) {
                queue.remove(nonce);
            }
            warn!(
                total = total,
                global_max = global_max,
                evicted = excess,
                "Global cache limit enforced"
            );
        }

        for queue in &queues {
            let size = queue.size();
            if size > per_account_max {
                let excess = size - per_account_max;
                let mut entries = queue.all();
                entries.sort_by_key(|entry| entry.inserted_at);

                for entry in entries.into_iter().take(excess) {
                    queue.remove(entry.nonce);
                }
                warn!(
                    sender = %queue.sender(),
                    size = size,
                    per_account_max = per_account_max,
                    evicted = excess,
                    "Account cache limit enforced"
                );
            }
        }

        for queue in &queues {
            if queue.is_empty() {
                self.cache.remove_queue_if_empty(&queue.sender());
            }
        }
    }

    /// Emit one structured metrics line.
    pub(crate) fn metrics_pass(&self) {
        let metrics = self.cache.metrics();
        let sizes: Vec<usize> = self
            .cache
            .queue_handles()
            .iter()
            .map(|queue| queue.size())
            .collect();
        let largest_queue = sizes.iter().copied().max().unwrap_or(0);
        let smallest_queue = sizes.iter().copied().min().unwrap_or(0);

        info!(
            cached = metrics.cached_count,
            accounts = metrics.accounts_with_cache,
            processed = metrics.processed_count,
            expired = metrics.expired_count,
            peak_cached = metrics.peak_cached_count,
            peak_accounts = metrics.peak_accounts,
            largest_queue = largest_queue,
            smallest_queue = smallest_queue,
            "Cache metrics"
        );
    }
}

/// Best-effort text out of a worker panic payload.
pub(crate) fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::manager::TxCacheManager;
    use crate::test_utils::legacy_tx;
    use alloy::primitives::Address;

    fn worker(config: CacheConfig) -> (Arc<TxCacheManager>, MaintenanceWorker) {
        let cache = Arc::new(TxCacheManager::new(config, None));
        let worker = MaintenanceWorker::new(cache.clone(), CancellationToken::new());
        (cache, worker)
    }

    #[tokio::test]
    async fn test_expiry_removes_aged_entries() {
        let config = CacheConfig {
            tx_timeout_secs: 0,
            ..CacheConfig::default()
        };
        let (cache, worker) = worker(config);
        let sender = Address::repeat_byte(9);
        cache.submit(legacy_tx(9, 100), sender, 9).unwrap();

        // Zero timeout: any measurable age is past it.
        tokio::time::sleep(Duration::from_millis(20)).await;
        worker.expiry_pass().await;

        assert!(cache.queue_of(&sender).is_none());
        let metrics = cache.metrics();
        assert_eq!(metrics.expired_count, 1);
        assert!(metrics.last_cleanup_time.is_some());
    }

    #[tokio::test]
    async fn test_expiry_keeps_fresh_entries() {
        let (cache, worker) = worker(CacheConfig::default());
        let sender = Address::repeat_byte(9);
        cache.submit(legacy_tx(9, 100), sender, 9).unwrap();

        worker.expiry_pass().await;

        assert_eq!(cache.queue_of(&sender).unwrap().size(), 1);
        assert_eq!(cache.metrics().expired_count, 0);
        assert!(cache.metrics().last_cleanup_time.is_some());
    }

    #[test]
    fn test_global_eviction_drops_oldest() {
        let config = CacheConfig {
            global_max_tx: 10,
            ..CacheConfig::default()
        };
        let (cache, worker) = worker(config);

        // 12 entries over 4 senders, admitted in a known order so the two
        // oldest are sender 1's nonces 0 and 1. Staggered to keep the
        // insertion timestamps distinct.
        for byte in 1..=4u8 {
            let sender = Address::repeat_byte(byte);
            for nonce in 0..3u64 {
                cache.submit(legacy_tx(nonce, 100), sender, nonce).unwrap();
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        assert_eq!(cache.cached_count(), 12);

        worker.memory_pass();

        assert_eq!(cache.cached_count(), 10);
        let first = cache.queue_of(&Address::repeat_byte(1)).unwrap();
        assert!(first.get(0).is_none());
        assert!(first.get(1).is_none());
        assert!(first.get(2).is_some());
    }

    #[test]
    fn test_per_account_eviction_drops_oldest() {
        let config = CacheConfig {
            max_tx_per_account: 3,
            ..CacheConfig::default()
        };
        let (cache, worker) = worker(config);
        let sender = Address::repeat_byte(1);

        for nonce in 100..103u64 {
            cache.submit(legacy_tx(nonce, 100), sender, nonce).unwrap();
            std::thread::sleep(Duration::from_millis(1));
        }
        // Slip a fourth entry in under the queue directly, as a race past
        // the admission check would.
        let queue = cache.queue_of(&sender).unwrap();
        queue
            .add(
                crate::test_utils::legacy_entry(sender, 103, 100),
                10,
            )
            .unwrap();
        assert_eq!(queue.size(), 4);

        worker.memory_pass();

        assert_eq!(queue.size(), 3);
        assert!(queue.get(100).is_none());
        assert!(queue.get(103).is_some());
    }

    #[test]
    fn test_memory_pass_removes_drained_queues_and_tracks_peaks() {
        let (cache, worker) = worker(CacheConfig::default());
        let sender = Address::repeat_byte(1);
        cache.submit(legacy_tx(0, 100), sender, 0).unwrap();

        // Drain the queue out-of-band; the pass should reap the empty shell.
        cache.queue_of(&sender).unwrap().remove(0);
        assert_eq!(cache.accounts_with_cache().len(), 1);

        worker.memory_pass();

        assert!(cache.accounts_with_cache().is_empty());
        assert_eq!(cache.metrics().peak_cached_count, 1);
    }

    #[test]
    fn test_metrics_pass_does_not_disturb_state() {
        let (cache, worker) = worker(CacheConfig::default());
        cache
            .submit(legacy_tx(0, 100), Address::repeat_byte(1), 0)
            .unwrap();

        worker.metrics_pass();
        assert_eq!(cache.cached_count(), 1);
    }

    #[test]
    fn test_panic_message_formats() {
        let panic: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(panic), "boom");

        let panic: Box<dyn std::any::Any + Send> = Box::new(String::from("kaboom"));
        assert_eq!(panic_message(panic), "kaboom");

        let panic: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(panic), "unknown panic");
    }
}
