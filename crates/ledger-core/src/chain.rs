use crate::{merkle_root, pow::meets_difficulty, Block};
use anyhow::Result;
use parking_lot::Mutex;
use thiserror::Error;

/// Trait the storage backends implement for the ledger to load and persist
/// its block sequence. It lives in `ledger-core` to avoid a circular
/// dependency.
pub trait ChainStore: Send + Sync {
    /// The stored chain, or `None` when no store exists yet.
    fn load(&self) -> Result<Option<Vec<Block>>>;

    /// Replace the stored chain with `blocks` in full.
    fn save(&self, blocks: &[Block]) -> Result<()>;
}

/// Volatile store, used by tests and `--store memory`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blocks: Mutex<Option<Vec<Block>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blocks(blocks: Vec<Block>) -> Self {
        Self {
            blocks: Mutex::new(Some(blocks)),
        }
    }

    pub fn snapshot(&self) -> Option<Vec<Block>> {
        self.blocks.lock().clone()
    }
}

impl ChainStore for MemoryStore {
    fn load(&self) -> Result<Option<Vec<Block>>> {
        Ok(self.blocks.lock().clone())
    }

    fn save(&self, blocks: &[Block]) -> Result<()> {
        *self.blocks.lock() = Some(blocks.to_vec());
        Ok(())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainViolation {
    #[error("chain has no blocks")]
    Empty,

    #[error("genesis must have index 0 and an empty prev_hash (found index {index})")]
    BadGenesis { index: u64 },

    #[error("expected block index {expected}, found {found}")]
    IndexGap { expected: u64, found: u64 },

    #[error("block {index}: no block can follow it without overflowing the index")]
    IndexOverflow { index: u64 },

    #[error("block {index}: prev_hash does not match the previous block's hash")]
    BrokenLink { index: u64 },

    #[error("block {index}: stored hash does not match its header")]
    HashMismatch { index: u64 },

    #[error("block {index}: hash does not meet difficulty {difficulty}")]
    InsufficientWork { index: u64, difficulty: u32 },

    #[error("block {index}: merkle root does not match its transactions")]
    MerkleMismatch { index: u64 },

    #[error("block {index}: non-genesis block carries no transactions")]
    NoTransactions { index: u64 },
}

/// Check one block against its predecessor (`None` for the first block).
pub fn verify_block(block: &Block, prev: Option<&Block>) -> Result<(), ChainViolation> {
    let index = block.index;
    match prev {
        None => {
            if index != 0 || !block.prev_hash.is_empty() {
                return Err(ChainViolation::BadGenesis { index });
            }
        }
        Some(prev) => {
            let Some(expected) = prev.index.checked_add(1) else {
                return Err(ChainViolation::IndexOverflow { index: prev.index });
            };
            if index != expected {
                return Err(ChainViolation::IndexGap { expected, found: index });
            }
            if block.prev_hash != prev.hash {
                return Err(ChainViolation::BrokenLink { index });
            }
            if block.transactions.is_empty() {
                return Err(ChainViolation::NoTransactions { index });
            }
        }
    }
    if block.hash != block.compute_hash() {
        return Err(ChainViolation::HashMismatch { index });
    }
    if !meets_difficulty(&block.hash, block.difficulty) {
        return Err(ChainViolation::InsufficientWork {
            index,
            difficulty: block.difficulty,
        });
    }
    if block.merkle_root != merkle_root(&block.transactions) {
        return Err(ChainViolation::MerkleMismatch { index });
    }
    Ok(())
}

/// Walk the chain from genesis and report the first violated invariant.
///
/// Blocks are checked one link at a time, so a passing chain also passes
/// for every one of its prefixes.
pub fn verify_chain(blocks: &[Block]) -> Result<(), ChainViolation> {
    if blocks.is_empty() {
        return Err(ChainViolation::Empty);
    }
    let mut prev: Option<&Block> = None;
    for block in blocks {
        verify_block(block, prev)?;
        prev = Some(block);
    }
    Ok(())
}
