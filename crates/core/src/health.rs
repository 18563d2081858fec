//! Health snapshot and warning rules.

use std::fmt;
use std::time::Duration;

use crate::config::CacheConfig;
use crate::metrics::CacheMetrics;

/// Soft ceiling on process resident memory before health flags it.
pub(crate) const MEMORY_SOFT_LIMIT_BYTES: u64 = 1 << 30;

/// Operator-facing health snapshot.
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Whether the cache currently admits transactions.
    pub enabled: bool,
    pub cached_count: usize,
    pub accounts_with_cache: usize,
    pub processed_count: u64,
    pub expired_count: u64,
    /// Time since the manager was constructed.
    pub uptime: Duration,
    /// Process resident memory, 0 where the platform offers no cheap probe.
    pub memory_bytes: u64,
    /// Conditions an operator should look at. Empty when healthy.
    pub warnings: Vec<String>,
}

impl HealthReport {
    /// Whether no warning condition is active.
    pub fn is_healthy(&self) -> bool {
        self.warnings.is_empty()
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "enabled={} cached={} accounts={} processed={} expired={} uptime={}s memory={}MiB",
            self.enabled,
            self.cached_count,
            self.accounts_with_cache,
            self.processed_count,
            self.expired_count,
            self.uptime.as_secs(),
            self.memory_bytes >> 20,
        )?;
        for warning in &self.warnings {
            write!(f, "\n  warning: {warning}")?;
        }
        Ok(())
    }
}

/// Evaluate the warning rules against a metrics snapshot.
pub(crate) fn collect_warnings(
    metrics: &CacheMetrics,
    config: &CacheConfig,
    memory_bytes: u64,
    largest_queue: usize,
) -> Vec<String> {
    let mut warnings = Vec::new();

    if memory_bytes > MEMORY_SOFT_LIMIT_BYTES {
        warnings.push(format!(
            "process memory {}MiB above the {}MiB soft ceiling",
            memory_bytes >> 20,
            MEMORY_SOFT_LIMIT_BYTES >> 20,
        ));
    }
    if metrics.cached_count * 100 > config.global_max_tx * 80 {
        warnings.push(format!(
            "cached count {} above 80% of the global limit {}",
            metrics.cached_count, config.global_max_tx,
        ));
    }
    if largest_queue * 100 > config.max_tx_per_account * 80 {
        warnings.push(format!(
            "largest account queue {} above 80% of the per-account limit {}",
            largest_queue, config.max_tx_per_account,
        ));
    }
    let attempts = metrics.expired_count + metrics.processed_count;
    if attempts > 0 && metrics.expired_count * 10 > attempts {
        warnings.push(format!(
            "{} of {} cache exits were expiries (>10%)",
            metrics.expired_count, attempts,
        ));
    }

    warnings
}

/// Resident set size of the current process.
///
/// Reads `/proc/self/statm` on Linux; other platforms report 0 and skip the
/// memory warning.
pub(crate) fn process_memory_bytes() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(statm) = std::fs::read_to_string("/proc/self/statm") {
            if let Some(resident_pages) = statm
                .split_whitespace()
                .nth(1)
                .and_then(|field| field.parse::<u64>().ok())
            {
                return resident_pages * 4096;
            }
        }
    }
    0
}
