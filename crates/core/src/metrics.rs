//! Cache counters and the operator-facing snapshot.

use std::fmt;

use chrono::{DateTime, Utc};

/// Mutation-side counter record.
///
/// Guarded by the manager's dedicated metrics lock; gauges (cached count,
/// account count) are computed from the queues at snapshot time instead of
/// being tracked here.
#[derive(Debug)]
pub(crate) struct MetricsRecord {
    pub processed_count: u64,
    pub expired_count: u64,
    pub peak_cached_count: usize,
    pub peak_accounts: usize,
    pub start_time: DateTime<Utc>,
    pub last_cleanup_time: Option<DateTime<Utc>>,
}

impl MetricsRecord {
    pub fn new() -> Self {
        Self {
            processed_count: 0,
            expired_count: 0,
            peak_cached_count: 0,
            peak_accounts: 0,
            start_time: Utc::now(),
            last_cleanup_time: None,
        }
    }

    /// Raise the peak gauges to at least the observed values.
    pub fn observe(&mut self, cached: usize, accounts: usize) {
        self.peak_cached_count = self.peak_cached_count.max(cached);
        self.peak_accounts = self.peak_accounts.max(accounts);
    }
}

/// Point-in-time metrics snapshot. Value copy, safe to hold across awaits.
#[derive(Debug, Clone)]
pub struct CacheMetrics {
    /// Currently cached transactions across all senders.
    pub cached_count: usize,
    /// Senders with a non-empty queue.
    pub accounts_with_cache: usize,
    /// Transactions released to the broadcast collaborator.
    pub processed_count: u64,
    /// Transactions removed by the expiry sweep.
    pub expired_count: u64,
    /// Highest cached count observed.
    pub peak_cached_count: usize,
    /// Highest account count observed.
    pub peak_accounts: usize,
    /// Manager construction time.
    pub start_time: DateTime<Utc>,
    /// Completion time of the most recent expiry sweep.
    pub last_cleanup_time: Option<DateTime<Utc>>,
}

impl fmt::Display for CacheMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cached={} accounts={} processed={} expired={} peak_cached={} peak_accounts={} started={} last_cleanup={}",
            self.cached_count,
            self.accounts_with_cache,
            self.processed_count,
            self.expired_count,
            self.peak_cached_count,
            self.peak_accounts,
            self.start_time.format("%Y-%m-%dT%H:%M:%SZ"),
            match self.last_cleanup_time {
                Some(at) => at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                None => "never".to_string(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peaks_only_rise() {
        let mut record = MetricsRecord::new();
        record.observe(10, 3);
        record.observe(4, 1);
        assert_eq!(record.peak_cached_count, 10);
        assert_eq!(record.peak_accounts, 3);

        record.observe(12, 2);
        assert_eq!(record.peak_cached_count, 12);
        assert_eq!(record.peak_accounts, 3);
    }

    #[test]
    fn test_display_is_single_line() {
        let metrics = CacheMetrics {
            cached_count: 2,
            accounts_with_cache: 1,
            processed_count: 5,
            expired_count: 1,
            peak_cached_count: 4,
            peak_accounts: 2,
            start_time: Utc::now(),
            last_cleanup_time: None,
        };
        let line = metrics.to_string();
        assert!(line.contains("cached=2"));
        assert!(line.contains("last_cleanup=never"));
        assert!(!line.contains('\n'));
    }
}
