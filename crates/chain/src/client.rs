//! Chain collaborator boundary.

use alloy::primitives::{Address, B256};
use anyhow::Result;
use async_trait::async_trait;

/// The read-and-broadcast capability the cache needs from a node.
///
/// Implementations carry their own timeout discipline. The cache treats
/// every call as an opaque blocking operation and holds no locks across it,
/// so a slow RPC stalls at most the calling worker's current tick.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// The sender's next expected nonce at the latest committed block.
    ///
    /// Equivalently, the count of already-executed transactions from
    /// `sender`.
    async fn nonce_at_latest(&self, sender: Address) -> Result<u64>;

    /// Submit a signed raw transaction. Returns the node-reported hash.
    ///
    /// Idempotent submission is not assumed; callers must not resubmit a
    /// payload they already handed over.
    async fn broadcast(&self, raw: &[u8]) -> Result<B256>;
}
