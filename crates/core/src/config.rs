//! Cache configuration.
//!
//! Every option is serde-loadable from TOML with a sensible default, in the
//! shape the rest of the deployment's configs use. Validation warns about
//! out-of-range settings but never rejects them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Transaction cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Master switch. When false, `submit` rejects and workers do not start.
    #[serde(default = "default_enable")]
    pub enable: bool,

    /// Admission cap per sender.
    #[serde(default = "default_max_tx_per_account")]
    pub max_tx_per_account: usize,

    /// Admission cap across all senders; also the target for global
    /// eviction under memory pressure.
    #[serde(default = "default_global_max_tx")]
    pub global_max_tx: usize,

    /// Maximum entry age before the expiry sweep removes it (seconds).
    #[serde(default = "default_tx_timeout")]
    pub tx_timeout_secs: u64,

    /// Expiry worker period (seconds).
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Nonce-polling driver period (milliseconds).
    #[serde(default = "default_nonce_polling_interval")]
    pub nonce_polling_interval_ms: u64,

    /// Intended spacing between broadcast retries (seconds). Bookkeeping
    /// only; no re-enqueue path exists.
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,

    /// Retry budget per entry on failed broadcast.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Minimum gas-price increase for same-nonce replacement (percent).
    /// Values below 1 are treated as 1.
    #[serde(default = "default_replacement_gas_percent")]
    pub replacement_gas_percent: u64,
}

fn default_enable() -> bool {
    true
}
fn default_max_tx_per_account() -> usize {
    100
}
fn default_global_max_tx() -> usize {
    10_000
}
fn default_tx_timeout() -> u64 {
    600
}
fn default_cleanup_interval() -> u64 {
    60
}
fn default_nonce_polling_interval() -> u64 {
    1000
}
fn default_retry_interval() -> u64 {
    15
}
fn default_max_retries() -> u32 {
    3
}
fn default_replacement_gas_percent() -> u64 {
    10
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable: default_enable(),
            max_tx_per_account: default_max_tx_per_account(),
            global_max_tx: default_global_max_tx(),
            tx_timeout_secs: default_tx_timeout(),
            cleanup_interval_secs: default_cleanup_interval(),
            nonce_polling_interval_ms: default_nonce_polling_interval(),
            retry_interval_secs: default_retry_interval(),
            max_retries: default_max_retries(),
            replacement_gas_percent: default_replacement_gas_percent(),
        }
    }
}

impl CacheConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// A profile with the cache switched off.
    pub fn disabled() -> Self {
        Self {
            enable: false,
            ..Self::default()
        }
    }

    pub fn tx_timeout(&self) -> Duration {
        Duration::from_secs(self.tx_timeout_secs)
    }
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
    pub fn nonce_polling_interval(&self) -> Duration {
        Duration::from_millis(self.nonce_polling_interval_ms)
    }
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    /// Replacement percent with the ≥ 1 floor applied.
    pub fn replacement_percent(&self) -> u64 {
        self.replacement_gas_percent.max(1)
    }

    /// Check settings against reasonable operating ranges.
    ///
    /// Returns warnings only; an out-of-range value is the operator's call.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.max_tx_per_account > 2000 {
            warnings.push(format!(
                "max_tx_per_account {} is above 2000; a single account can pin a lot of memory",
                self.max_tx_per_account
            ));
        }
        if self.global_max_tx > 100_000 {
            warnings.push(format!(
                "global_max_tx {} is above 100000",
                self.global_max_tx
            ));
        }
        if self.tx_timeout_secs < 30 || self.tx_timeout_secs > 30 * 60 {
            warnings.push(format!(
                "tx_timeout {}s is outside the 30s..30min range",
                self.tx_timeout_secs
            ));
        }
        if self.cleanup_interval_secs < 10 || self.cleanup_interval_secs > 5 * 60 {
            warnings.push(format!(
                "cleanup_interval {}s is outside the 10s..5min range",
                self.cleanup_interval_secs
            ));
        }
        if self.replacement_gas_percent < 1 {
            warnings.push(format!(
                "replacement_gas_percent {} is below 1; the minimum bump of 1% applies",
                self.replacement_gas_percent
            ));
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert!(config.enable);
        assert_eq!(config.max_tx_per_account, 100);
        assert_eq!(config.global_max_tx, 10_000);
        assert_eq!(config.nonce_polling_interval(), Duration::from_secs(1));
        assert_eq!(config.replacement_percent(), 10);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_validate_warns_without_rejecting() {
        let config = CacheConfig {
            max_tx_per_account: 5000,
            global_max_tx: 200_000,
            tx_timeout_secs: 5,
            cleanup_interval_secs: 3600,
            replacement_gas_percent: 0,
            ..CacheConfig::default()
        };

        let warnings = config.validate();
        assert_eq!(warnings.len(), 5);
        // The floor still applies even though the setting is kept.
        assert_eq!(config.replacement_percent(), 1);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = CacheConfig::disabled();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("enable = false"));

        let parsed: CacheConfig = toml::from_str(&toml_str).unwrap();
        assert!(!parsed.enable);
        assert_eq!(parsed.global_max_tx, config.global_max_tx);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: CacheConfig = toml::from_str("max_tx_per_account = 16").unwrap();
        assert_eq!(parsed.max_tx_per_account, 16);
        assert!(parsed.enable);
        assert_eq!(parsed.global_max_tx, 10_000);
    }
}
