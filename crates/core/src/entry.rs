//! Cached transaction entry.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use alloy::consensus::{Transaction, TxEnvelope};
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::{Address, Bytes, B256};

use crate::error::CacheError;

/// A signed transaction held until the sender's on-chain nonce reaches it.
///
/// Immutable after insertion except for `retries`, which counts failed
/// broadcast attempts.
#[derive(Debug)]
pub struct CachedTransaction {
    /// Serialized signed transaction; the broadcast payload.
    pub raw: Bytes,
    /// Decoded transaction, carrying the gas-price fields and hash.
    pub decoded: TxEnvelope,
    /// Sender address as reported by the RPC layer.
    pub sender: Address,
    /// Per-sender sequence number; unique key within the account queue.
    pub nonce: u64,
    /// Transaction hash.
    pub hash: B256,
    /// Admission time. Drives expiry and oldest-first eviction only, never
    /// ordering within a sender.
    pub inserted_at: Instant,
    /// Failed broadcast attempts.
    pub retries: AtomicU32,
}

impl CachedTransaction {
    /// Decode `raw` and build an entry for `sender` at `nonce`.
    pub fn decode(raw: Bytes, sender: Address, nonce: u64) -> Result<Self, CacheError> {
        let decoded = TxEnvelope::decode_2718(&mut raw.as_ref())
            .map_err(|e| CacheError::DecodeFailed(e.to_string()))?;
        let hash = *decoded.tx_hash();

        Ok(Self {
            raw,
            decoded,
            sender,
            nonce,
            hash,
            inserted_at: Instant::now(),
            retries: AtomicU32::new(0),
        })
    }

    /// Effective gas price used by the replacement rule: the posted gas
    /// price for legacy transactions, max-fee-per-gas otherwise.
    pub fn effective_gas_price(&self) -> u128 {
        match self.decoded.gas_price() {
            Some(gas_price) => gas_price,
            None => self.decoded.max_fee_per_gas(),
        }
    }

    /// Entry age as of `now`.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.inserted_at)
    }

    /// Failed broadcast attempts so far.
    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Record a failed broadcast attempt; returns the updated count.
    pub fn record_retry(&self) -> u32 {
        self.retries.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{eip1559_tx, legacy_tx};

    #[test]
    fn test_decode_legacy() {
        let sender = Address::repeat_byte(1);
        let raw = legacy_tx(7, 100);

        let entry = CachedTransaction::decode(raw.clone(), sender, 7).unwrap();
        assert_eq!(entry.sender, sender);
        assert_eq!(entry.nonce, 7);
        assert_eq!(entry.raw, raw);
        assert_eq!(entry.effective_gas_price(), 100);
        assert_eq!(entry.retries(), 0);
    }

    #[test]
    fn test_decode_eip1559_uses_max_fee() {
        let entry =
            CachedTransaction::decode(eip1559_tx(3, 2_000_000_000), Address::repeat_byte(2), 3)
                .unwrap();
        assert_eq!(entry.effective_gas_price(), 2_000_000_000);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = CachedTransaction::decode(
            Bytes::from_static(&[0x00, 0x01, 0x02]),
            Address::repeat_byte(3),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, CacheError::DecodeFailed(_)));
    }

    #[test]
    fn test_retry_counter() {
        let entry = CachedTransaction::decode(legacy_tx(1, 10), Address::repeat_byte(4), 1).unwrap();
        assert_eq!(entry.record_retry(), 1);
        assert_eq!(entry.record_retry(), 2);
        assert_eq!(entry.retries(), 2);
    }
}
