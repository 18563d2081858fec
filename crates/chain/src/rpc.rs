//! Alloy-backed chain client.
//! Uses Alloy providers for type-safe RPC interactions.

use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder};
use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::client::ChainClient;

/// JSON-RPC chain client over HTTP.
pub struct RpcChainClient {
    /// RPC URL for nonce reads and raw submissions
    rpc_url: String,
}

impl RpcChainClient {
    /// Create a client and verify the endpoint responds.
    pub async fn new(rpc_url: &str) -> Result<Self> {
        // Test connection
        let provider = ProviderBuilder::new().on_http(rpc_url.parse()?);
        let block = provider.get_block_number().await?;
        info!(rpc = rpc_url, block = block, "Chain client connection verified");

        Ok(Self {
            rpc_url: rpc_url.to_string(),
        })
    }

    /// Get the RPC URL.
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn nonce_at_latest(&self, sender: Address) -> Result<u64> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        let nonce = provider.get_transaction_count(sender).await?;
        debug!(sender = %sender, nonce = nonce, "Fetched on-chain nonce");
        Ok(nonce)
    }

    async fn broadcast(&self, raw: &[u8]) -> Result<B256> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        let pending = provider.send_raw_transaction(raw).await?;
        let tx_hash = *pending.tx_hash();
        debug!(tx_hash = %tx_hash, "Raw transaction submitted");
        Ok(tx_hash)
    }
}
