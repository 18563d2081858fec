//! Nonce-polling driver.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use futures::FutureExt;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use txcache_chain::ChainClient;

use crate::maintenance::panic_message;
use crate::manager::TxCacheManager;

/// Periodic driver that advances each sender's queue against the chain.
///
/// Each tick snapshots the cached senders and, per sender, reads the
/// on-chain nonce, purges entries the chain already executed, and releases
/// the maximal contiguous run starting at that nonce. Per sender, broadcast
/// order is strictly ascending and each nonce is attempted at most once per
/// tick; a failed nonce read skips that sender until the next tick.
pub(crate) struct NoncePoller {
    cache: Arc<TxCacheManager>,
    chain: Arc<dyn ChainClient>,
    period: Duration,
    shutdown: CancellationToken,
    /// Last on-chain nonce seen per sender. Advisory; used for logs only.
    last_seen: HashMap<Address, u64>,
}

impl NoncePoller {
    pub(crate) fn new(
        cache: Arc<TxCacheManager>,
        chain: Arc<dyn ChainClient>,
        period: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            cache,
            chain,
            period,
            shutdown,
            last_seen: HashMap::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        let mut ticker = interval(self.period);
        let shutdown = self.shutdown.clone();
        info!(period_ms = self.period.as_millis() as u64, "Nonce poller started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(panic) = AssertUnwindSafe(self.tick()).catch_unwind().await {
                        error!(panic = %panic_message(panic), "Nonce poller tick panicked");
                    }
                }
            }
        }

        info!("Nonce poller stopped");
    }

    async fn tick(&mut self) {
        for sender in self.cache.accounts_with_cache() {
            let Some(queue) = self.cache.queue_of(&sender) else {
                continue;
            };

            let chain_nonce = match self.chain.nonce_at_latest(sender).await {
                Ok(nonce) => nonce,
                Err(err) => {
                    debug!(
                        sender = %sender,
                        error = %err,
                        "Nonce read failed, skipping sender this tick"
                    );
                    continue;
                }
            };

            // Entries below the on-chain nonce were already executed.
            if chain_nonce > 0 {
                let purged = queue.remove_up_to(chain_nonce - 1);
                if purged > 0 {
                    debug!(
                        sender = %sender,
                        chain_nonce = chain_nonce,
                        purged = purged,
                        "Purged executed transactions"
                    );
                }
            }
            queue.set_current_nonce(chain_nonce);

            let ready = queue.find_consecutive(chain_nonce);
            if !ready.is_empty() {
                info!(
                    sender = %sender,
                    start_nonce = chain_nonce,
                    count = ready.len(),
                    "Releasing contiguous run"
                );
                self.cache.release_and_broadcast(&ready, &queue).await;
            }

            if let Some(prev) = self.last_seen.insert(sender, chain_nonce) {
                if prev != chain_nonce {
                    debug!(sender = %sender, prev = prev, chain_nonce = chain_nonce, "On-chain nonce advanced");
                }
            }

            if queue.is_empty() {
                self.cache.remove_queue_if_empty(&sender);
                self.last_seen.remove(&sender);
                debug!(sender = %sender, "Account queue drained");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::test_utils::{legacy_tx, MockChain};

    fn poller_for(
        cache: &Arc<TxCacheManager>,
        chain: &Arc<MockChain>,
    ) -> NoncePoller {
        NoncePoller::new(
            cache.clone(),
            chain.clone() as Arc<dyn ChainClient>,
            Duration::from_secs(1),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_gap_then_fill() {
        let chain = Arc::new(MockChain::new());
        let cache = Arc::new(TxCacheManager::new(
            CacheConfig::default(),
            Some(chain.clone() as Arc<dyn ChainClient>),
        ));
        let sender = Address::repeat_byte(0xa1);
        let mut poller = poller_for(&cache, &chain);

        // Cached: 2, 3, 5. On-chain nonce 2 releases [2, 3] and keeps 5.
        for nonce in [2u64, 3, 5] {
            cache.submit(legacy_tx(nonce, 100), sender, nonce).unwrap();
        }
        chain.set_nonce(sender, 2);
        poller.tick().await;

        assert_eq!(chain.broadcast_nonces(), vec![2, 3]);
        let queue = cache.queue_of(&sender).unwrap();
        assert_eq!(queue.size(), 1);
        assert!(queue.get(5).is_some());

        // Nonce advances to 4 off-cache: the purge is a no-op and nothing
        // is released across the gap at 4.
        chain.set_nonce(sender, 4);
        poller.tick().await;
        assert_eq!(chain.broadcast_nonces(), vec![2, 3]);
        assert_eq!(queue.size(), 1);
        assert_eq!(queue.current_nonce(), Some(4));

        // Filling the gap releases [4, 5] and drains the queue.
        cache.submit(legacy_tx(4, 100), sender, 4).unwrap();
        poller.tick().await;

        assert_eq!(chain.broadcast_nonces(), vec![2, 3, 4, 5]);
        assert!(cache.queue_of(&sender).is_none());
        assert!(poller.last_seen.is_empty());
        assert_eq!(cache.metrics().processed_count, 4);
    }

    #[tokio::test]
    async fn test_purges_executed_entries_without_release() {
        let chain = Arc::new(MockChain::new());
        let cache = Arc::new(TxCacheManager::new(
            CacheConfig::default(),
            Some(chain.clone() as Arc<dyn ChainClient>),
        ));
        let sender = Address::repeat_byte(0xa2);
        let mut poller = poller_for(&cache, &chain);

        // Everything below the on-chain nonce is stale, and nonce 7 is not
        // cached, so nothing broadcasts.
        for nonce in [1u64, 2, 8] {
            cache.submit(legacy_tx(nonce, 100), sender, nonce).unwrap();
        }
        chain.set_nonce(sender, 7);
        poller.tick().await;

        assert!(chain.broadcast_nonces().is_empty());
        let queue = cache.queue_of(&sender).unwrap();
        assert_eq!(queue.size(), 1);
        assert!(queue.get(8).is_some());
    }

    #[tokio::test]
    async fn test_chain_error_skips_sender_for_one_tick() {
        let chain = Arc::new(MockChain::new());
        let cache = Arc::new(TxCacheManager::new(
            CacheConfig::default(),
            Some(chain.clone() as Arc<dyn ChainClient>),
        ));
        let sender = Address::repeat_byte(0xa3);
        let mut poller = poller_for(&cache, &chain);

        cache.submit(legacy_tx(0, 100), sender, 0).unwrap();
        chain.set_nonce(sender, 0);
        chain.fail_next_reads(sender, 1);

        // Failed read: queue untouched, nothing broadcast, no counters moved.
        poller.tick().await;
        assert!(chain.broadcast_nonces().is_empty());
        assert_eq!(cache.queue_of(&sender).unwrap().size(), 1);
        assert_eq!(cache.metrics().processed_count, 0);

        // Next tick succeeds and releases the ready run.
        poller.tick().await;
        assert_eq!(chain.broadcast_nonces(), vec![0]);
        assert!(cache.queue_of(&sender).is_none());
        assert_eq!(cache.metrics().processed_count, 1);
    }

    #[tokio::test]
    async fn test_independent_senders_one_failing() {
        let chain = Arc::new(MockChain::new());
        let cache = Arc::new(TxCacheManager::new(
            CacheConfig::default(),
            Some(chain.clone() as Arc<dyn ChainClient>),
        ));
        let healthy = Address::repeat_byte(0xa4);
        let failing = Address::repeat_byte(0xa5);
        let mut poller = poller_for(&cache, &chain);

        cache.submit(legacy_tx(0, 100), healthy, 0).unwrap();
        cache.submit(legacy_tx(0, 100), failing, 0).unwrap();
        chain.fail_next_reads(failing, 1);

        poller.tick().await;

        // The failing sender is skipped; the healthy one still releases.
        assert_eq!(chain.broadcast_nonces(), vec![0]);
        assert!(cache.queue_of(&healthy).is_none());
        assert_eq!(cache.queue_of(&failing).unwrap().size(), 1);
    }
}
