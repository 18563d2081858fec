//! Chain interaction layer for the transaction cache.
//!
//! This crate provides:
//! - The `ChainClient` boundary the cache polls and broadcasts through
//! - An Alloy-backed JSON-RPC implementation over HTTP

mod client;
mod rpc;

pub use client::ChainClient;
pub use rpc::RpcChainClient;
