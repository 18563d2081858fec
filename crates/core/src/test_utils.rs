//! Test fixtures: signed transaction builders and a scriptable chain client.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::{Decodable2718, Encodable2718};
use alloy::primitives::{keccak256, Address, Bytes, PrimitiveSignature, TxKind, B256, U256};
use async_trait::async_trait;
use parking_lot::Mutex;

use txcache_chain::ChainClient;

use crate::entry::CachedTransaction;

/// Throwaway signature; the cache never verifies it.
fn dummy_signature() -> PrimitiveSignature {
    PrimitiveSignature::new(U256::from(1), U256::from(1), false)
}

/// Encoded signed legacy transaction with the given nonce and gas price.
pub(crate) fn legacy_tx(nonce: u64, gas_price: u128) -> Bytes {
    let tx = TxLegacy {
        chain_id: Some(1),
        nonce,
        gas_price,
        gas_limit: 21_000,
        to: TxKind::Call(Address::repeat_byte(0x42)),
        value: U256::from(1u64),
        input: Bytes::new(),
    };
    let signed = tx.into_signed(dummy_signature());
    Bytes::from(TxEnvelope::from(signed).encoded_2718())
}

/// Encoded signed EIP-1559 transaction with the given nonce and max fee.
pub(crate) fn eip1559_tx(nonce: u64, max_fee_per_gas: u128) -> Bytes {
    let tx = TxEip1559 {
        chain_id: 1,
        nonce,
        gas_limit: 21_000,
        max_fee_per_gas,
        max_priority_fee_per_gas: max_fee_per_gas / 10,
        to: TxKind::Call(Address::repeat_byte(0x42)),
        value: U256::from(1u64),
        access_list: Default::default(),
        input: Bytes::new(),
    };
    let signed = tx.into_signed(dummy_signature());
    Bytes::from(TxEnvelope::from(signed).encoded_2718())
}

/// Ready-to-insert legacy entry for `sender`.
pub(crate) fn legacy_entry(sender: Address, nonce: u64, gas_price: u128) -> Arc<CachedTransaction> {
    Arc::new(CachedTransaction::decode(legacy_tx(nonce, gas_price), sender, nonce).unwrap())
}

/// Legacy entry with a backdated insertion time.
pub(crate) fn entry_at(
    sender: Address,
    nonce: u64,
    gas_price: u128,
    inserted_at: Instant,
) -> Arc<CachedTransaction> {
    let mut entry = CachedTransaction::decode(legacy_tx(nonce, gas_price), sender, nonce).unwrap();
    entry.inserted_at = inserted_at;
    Arc::new(entry)
}

/// Chain client with scriptable nonces, injectable failures, and a record
/// of everything broadcast through it.
pub(crate) struct MockChain {
    nonces: Mutex<HashMap<Address, u64>>,
    /// Per-sender count of nonce reads that should fail before succeeding.
    read_failures: Mutex<HashMap<Address, usize>>,
    /// Broadcasts that should fail before the mock starts accepting.
    broadcast_failures: Mutex<usize>,
    broadcasts: Mutex<Vec<Bytes>>,
}

impl MockChain {
    pub(crate) fn new() -> Self {
        Self {
            nonces: Mutex::new(HashMap::new()),
            read_failures: Mutex::new(HashMap::new()),
            broadcast_failures: Mutex::new(0),
            broadcasts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_nonce(&self, sender: Address, nonce: u64) {
        self.nonces.lock().insert(sender, nonce);
    }

    pub(crate) fn fail_next_reads(&self, sender: Address, count: usize) {
        self.read_failures.lock().insert(sender, count);
    }

    pub(crate) fn fail_broadcasts(&self, count: usize) {
        *self.broadcast_failures.lock() = count;
    }

    /// Raw payloads accepted so far, in submission order.
    pub(crate) fn broadcast_log(&self) -> Vec<Bytes> {
        self.broadcasts.lock().clone()
    }

    /// Nonces of accepted payloads, in submission order.
    pub(crate) fn broadcast_nonces(&self) -> Vec<u64> {
        use alloy::consensus::Transaction;
        self.broadcast_log()
            .iter()
            .map(|raw| {
                TxEnvelope::decode_2718(&mut raw.as_ref())
                    .expect("mock received undecodable payload")
                    .nonce()
            })
            .collect()
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn nonce_at_latest(&self, sender: Address) -> anyhow::Result<u64> {
        {
            let mut failures = self.read_failures.lock();
            if let Some(remaining) = failures.get_mut(&sender) {
                if *remaining > 0 {
                    *remaining -= 1;
                    anyhow::bail!("nonce read unavailable");
                }
            }
        }
        Ok(self.nonces.lock().get(&sender).copied().unwrap_or(0))
    }

    async fn broadcast(&self, raw: &[u8]) -> anyhow::Result<B256> {
        {
            let mut failures = self.broadcast_failures.lock();
            if *failures > 0 {
                *failures -= 1;
                anyhow::bail!("broadcast refused");
            }
        }
        self.broadcasts.lock().push(Bytes::copy_from_slice(raw));
        Ok(keccak256(raw))
    }
}
