//! HTTP node around a single [`ledger_core::Ledger`].
pub mod api;
pub mod config;

pub use api::{router, SharedLedger};
pub use config::{open_store, Args, NodeConfig, StoreKind};
