//! Durable [`ChainStore`](ledger_core::ChainStore) backends.
//!
//! Both backends rewrite the whole block sequence on every save; neither
//! appends incrementally.
pub mod json_store;
pub mod sled_store;

pub use json_store::JsonFileStore;
pub use sled_store::SledStore;

/// File name of the JSON chain inside a node's data directory.
pub const DEFAULT_CHAIN_FILE: &str = "blockchain.json";
