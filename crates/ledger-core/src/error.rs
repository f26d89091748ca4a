//! Error taxonomy for ledger operations.

use std::time::Duration;

use thiserror::Error;

use crate::chain::ChainViolation;

#[derive(Error, Debug)]
pub enum LedgerError {
    /// Blank transaction, blank search query, or an unreachable difficulty.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no pending transactions to mine")]
    NothingToMine,

    /// The nonce search ran past its bound. Pending transactions were restored.
    #[error("mining timed out after {} ms (last nonce {last_nonce})", .timeout.as_millis())]
    MiningTimeout { timeout: Duration, last_nonce: u64 },

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("stored chain is corrupt: {0}")]
    CorruptChain(#[from] ChainViolation),
}

impl LedgerError {
    pub(crate) fn persistence(err: anyhow::Error) -> Self {
        LedgerError::Persistence(format!("{err:#}"))
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
