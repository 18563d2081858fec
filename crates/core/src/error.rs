//! Admission errors surfaced to the submitter.

use thiserror::Error;

/// Errors returned synchronously from the submission path.
///
/// Everything that happens after admission (broadcast failures, chain read
/// failures) is logged and reflected in metrics only; by then the submitter
/// already holds the transaction hash.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache is disabled by configuration or shutting down.
    #[error("transaction cache is disabled")]
    Disabled,

    /// Raw bytes could not be decoded as a signed transaction.
    #[error("failed to decode raw transaction: {0}")]
    DecodeFailed(String),

    /// Total cached count reached the global cap.
    #[error("global cache limit of {limit} transactions reached")]
    GlobalLimit { limit: usize },

    /// The sender's queue reached the per-account cap.
    #[error("account cache limit of {limit} transactions reached")]
    AccountLimit { limit: usize },

    /// A same-nonce entry exists and the new gas price does not clear the bar.
    /// Also covers exact duplicates, which carry an equal price.
    #[error("replacement rejected: gas price {observed} below required {required}")]
    ReplacementRejected { observed: u128, required: u128 },
}
