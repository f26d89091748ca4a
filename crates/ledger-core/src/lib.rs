//! Ledger engine: block hashing, Merkle roots, proof of work and the
//! [`Ledger`] that appends mined blocks under a lock.
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod chain;
pub mod constants;
pub mod error;
pub mod ledger;
pub mod mine;

pub use chain::{verify_chain, ChainStore, ChainViolation, MemoryStore};
pub use error::{LedgerError, LedgerResult};
pub use ledger::{ChainInfo, Commit, Ledger, LedgerConfig, SearchHit};

/// SHA-256 of `bytes`, rendered as 64 lowercase hex characters.
pub fn sha256_hex(bytes: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(bytes.as_ref()))
}

/// Hash preimage of a block header.
///
/// Fields are written in a fixed order with integers in base-10 ASCII and no
/// delimiter. Changing either breaks hash compatibility with stored chains.
pub fn header_bytes(
    index: u64,
    timestamp: u64,
    prev_hash: &str,
    merkle_root: &str,
    nonce: u64,
    difficulty: u32,
) -> Vec<u8> {
    format!("{index}{timestamp}{prev_hash}{merkle_root}{nonce}{difficulty}").into_bytes()
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: u64,
    pub transactions: Vec<String>,
    pub merkle_root: String,
    pub prev_hash: String,
    pub hash: String,
    pub nonce: u64,
    pub difficulty: u32,
}

impl Block {
    pub fn hash_bytes(&self) -> Vec<u8> {
        header_bytes(
            self.index,
            self.timestamp,
            &self.prev_hash,
            &self.merkle_root,
            self.nonce,
            self.difficulty,
        )
    }

    /// Recomputes the header hash; the stored `hash` field is not consulted.
    pub fn compute_hash(&self) -> String {
        sha256_hex(self.hash_bytes())
    }
}

/// A block whose header is assembled but which has not been mined yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockTemplate {
    pub index: u64,
    pub timestamp: u64,
    pub transactions: Vec<String>,
    pub merkle_root: String,
    pub prev_hash: String,
    pub difficulty: u32,
}

impl BlockTemplate {
    pub fn new(index: u64, prev_hash: String, transactions: Vec<String>, difficulty: u32) -> Self {
        let merkle_root = merkle_root(&transactions);
        Self {
            index,
            timestamp: unix_now(),
            transactions,
            merkle_root,
            prev_hash,
            difficulty,
        }
    }

    pub fn genesis(seed_tx: &str, difficulty: u32) -> Self {
        Self::new(0, String::new(), vec![seed_tx.to_string()], difficulty)
    }

    /// Template extending `tip` with `transactions`, or `None` when `tip`
    /// already holds the largest index.
    pub fn next(tip: &Block, transactions: Vec<String>, difficulty: u32) -> Option<Self> {
        let index = tip.index.checked_add(1)?;
        Some(Self::new(index, tip.hash.clone(), transactions, difficulty))
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn hash_bytes(&self, nonce: u64) -> Vec<u8> {
        header_bytes(
            self.index,
            self.timestamp,
            &self.prev_hash,
            &self.merkle_root,
            nonce,
            self.difficulty,
        )
    }

    pub fn hash_with_nonce(&self, nonce: u64) -> String {
        sha256_hex(self.hash_bytes(nonce))
    }

    /// Completes the block with a winning nonce and its hash.
    pub fn seal(&self, nonce: u64, hash: String) -> Block {
        Block {
            index: self.index,
            timestamp: self.timestamp,
            transactions: self.transactions.clone(),
            merkle_root: self.merkle_root.clone(),
            prev_hash: self.prev_hash.clone(),
            hash,
            nonce,
            difficulty: self.difficulty,
        }
    }
}

/// Order-sensitive Merkle root over transaction strings.
///
/// Parents hash the concatenated hex digests of their children; an odd node
/// at the end of a layer is paired with itself. An empty list hashes to
/// `sha256_hex("")`.
pub fn merkle_root<S: AsRef<str>>(txs: &[S]) -> String {
    if txs.is_empty() {
        return sha256_hex("");
    }
    let mut level: Vec<String> = txs.iter().map(|t| sha256_hex(t.as_ref())).collect();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let (a, b) = if pair.len() == 2 {
                (&pair[0], &pair[1])
            } else {
                (&pair[0], &pair[0])
            };
            let mut combined = String::with_capacity(a.len() + b.len());
            combined.push_str(a);
            combined.push_str(b);
            next.push(sha256_hex(combined));
        }
        level = next;
    }
    level.swap_remove(0)
}

pub mod pow {
    use super::{Block, BlockTemplate};
    use crate::constants::HASH_HEX_SIZE;
    use crate::error::LedgerError;
    use std::time::{Duration, Instant};
    use tracing::info;

    /// True when the first `difficulty` characters of `hash` are all `'0'`.
    pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
        let wanted = difficulty as usize;
        hash.len() >= wanted && hash.bytes().take(wanted).all(|b| b == b'0')
    }

    pub fn check_difficulty(difficulty: u32) -> Result<(), LedgerError> {
        if difficulty as usize > HASH_HEX_SIZE {
            return Err(LedgerError::InvalidInput(format!(
                "difficulty {difficulty} exceeds the {HASH_HEX_SIZE} hex characters of a hash"
            )));
        }
        Ok(())
    }

    /// Mine the template by trying nonces 0, 1, 2, ... until the header hash
    /// starts with `difficulty` zero characters.
    ///
    /// With `timeout` set, gives up once the elapsed time exceeds it and
    /// reports the last nonce tried. Without it, the search is unbounded.
    pub fn mine_block(
        template: &BlockTemplate,
        timeout: Option<Duration>,
    ) -> Result<Block, LedgerError> {
        check_difficulty(template.difficulty)?;
        let started = Instant::now();
        let mut nonce = 0u64;
        loop {
            let hash = template.hash_with_nonce(nonce);
            if meets_difficulty(&hash, template.difficulty) {
                info!(
                    index = template.index,
                    nonce,
                    hash = %hash,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "mined block"
                );
                return Ok(template.seal(nonce, hash));
            }
            if let Some(limit) = timeout {
                if started.elapsed() > limit {
                    return Err(LedgerError::MiningTimeout {
                        timeout: limit,
                        last_nonce: nonce,
                    });
                }
            }
            nonce = nonce.wrapping_add(1);
        }
    }
}
