//! The ledger: committed blocks plus the pending pool, behind one lock.
//!
//! The state lock only covers the snapshot and append transitions of a
//! commit. The nonce search itself runs on a private [`BlockTemplate`] with
//! the lock released, so reads and submissions keep flowing while a block is
//! being mined. A separate commit guard orders whole `mine_and_commit` calls,
//! which keeps two miners from extending the same tip.

use crate::{
    chain::{verify_chain, ChainStore, ChainViolation},
    constants::{DEFAULT_CHAIN_NAME, DEFAULT_DIFFICULTY, DEFAULT_GENESIS_TX},
    error::{LedgerError, LedgerResult},
    mine::mine_with,
    pow::check_difficulty,
    Block, BlockTemplate,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub name: String,
    /// Used for genesis and for mines that don't name a difficulty.
    pub default_difficulty: u32,
    pub genesis_tx: String,
    /// Applied when a mine request carries no timeout. `None` means unbounded.
    pub default_timeout: Option<Duration>,
    pub parallel_mining: bool,
    /// Run [`verify_chain`] over a chain loaded from the store.
    pub verify_on_load: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_CHAIN_NAME.to_string(),
            default_difficulty: DEFAULT_DIFFICULTY,
            genesis_tx: DEFAULT_GENESIS_TX.to_string(),
            default_timeout: None,
            parallel_mining: false,
            verify_on_load: false,
        }
    }
}

/// Outcome of a successful mine.
///
/// The block is committed in memory either way; `persist_error` is set when
/// the durable copy could not be rewritten.
#[derive(Debug, Clone)]
pub struct Commit {
    pub block: Block,
    pub persist_error: Option<String>,
}

impl Commit {
    pub fn is_durable(&self) -> bool {
        self.persist_error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub block_index: u64,
    pub transaction: String,
    pub block_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
    pub name: String,
    pub height: u64,
    pub pending: usize,
    pub difficulty: u32,
}

#[derive(Debug)]
struct LedgerState {
    /// Never empty once the ledger is open.
    blocks: Vec<Block>,
    pending: Vec<String>,
}

pub struct Ledger<S: ChainStore + ?Sized> {
    state: Mutex<LedgerState>,
    commit_guard: Mutex<()>,
    store: Arc<S>,
    config: LedgerConfig,
}

impl<S: ChainStore + ?Sized> Ledger<S> {
    /// Load the chain from `store`, or mine and persist a genesis block when
    /// the store is empty. Any failure here leaves no usable chain state.
    pub fn open(store: Arc<S>, config: LedgerConfig) -> LedgerResult<Self> {
        let blocks = match store.load().map_err(LedgerError::persistence)? {
            Some(blocks) => {
                if blocks.is_empty() {
                    return Err(ChainViolation::Empty.into());
                }
                if config.verify_on_load {
                    verify_chain(&blocks)?;
                    debug!(blocks = blocks.len(), "stored chain verified");
                }
                info!(height = blocks.len() - 1, "loaded chain from store");
                blocks
            }
            None => {
                let template =
                    BlockTemplate::genesis(&config.genesis_tx, config.default_difficulty);
                let genesis = mine_with(config.parallel_mining, &template, None)?;
                let blocks = vec![genesis];
                store.save(&blocks).map_err(LedgerError::persistence)?;
                info!(hash = %blocks[0].hash, "bootstrapped new chain with genesis block");
                blocks
            }
        };

        Ok(Self {
            state: Mutex::new(LedgerState {
                blocks,
                pending: Vec::new(),
            }),
            commit_guard: Mutex::new(()),
            store,
            config,
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Queue a transaction and return the pool as it stands afterwards.
    pub fn submit(&self, tx: impl Into<String>) -> LedgerResult<Vec<String>> {
        let tx = tx.into();
        if tx.trim().is_empty() {
            return Err(LedgerError::InvalidInput(
                "transaction data must not be blank".to_string(),
            ));
        }
        let mut state = self.state.lock();
        state.pending.push(tx);
        debug!(pending = state.pending.len(), "transaction queued");
        Ok(state.pending.clone())
    }

    /// Mine every pending transaction into a new block and append it.
    ///
    /// `difficulty` falls back to the configured default, `timeout` to the
    /// configured default timeout. On timeout the drained transactions are put
    /// back at the front of the pool, ahead of anything submitted meanwhile.
    pub fn mine_and_commit(
        &self,
        difficulty: Option<u32>,
        timeout: Option<Duration>,
    ) -> LedgerResult<Commit> {
        let _commit = self.commit_guard.lock();
        let difficulty = difficulty.unwrap_or(self.config.default_difficulty);
        check_difficulty(difficulty)?;
        let timeout = timeout.or(self.config.default_timeout);

        let template = {
            let mut state = self.state.lock();
            if state.pending.is_empty() {
                return Err(LedgerError::NothingToMine);
            }
            let Some(tip) = state.blocks.last() else {
                return Err(ChainViolation::Empty.into());
            };
            let Some(index) = tip.index.checked_add(1) else {
                return Err(ChainViolation::IndexOverflow { index: tip.index }.into());
            };
            let tip_hash = tip.hash.clone();
            let txs = std::mem::take(&mut state.pending);
            BlockTemplate::new(index, tip_hash, txs, difficulty)
        };
        debug!(
            index = template.index,
            txs = template.transactions.len(),
            difficulty,
            timeout = ?timeout,
            "mining block"
        );

        match mine_with(self.config.parallel_mining, &template, timeout) {
            Ok(block) => {
                let mut state = self.state.lock();
                state.blocks.push(block.clone());
                let persist_error = match self.store.save(&state.blocks) {
                    Ok(()) => None,
                    Err(err) => {
                        let msg = format!("{err:#}");
                        error!(index = block.index, error = %msg, "block committed in memory but not persisted");
                        Some(msg)
                    }
                };
                info!(index = block.index, hash = %block.hash, txs = block.transactions.len(), "block committed");
                Ok(Commit {
                    block,
                    persist_error,
                })
            }
            Err(err) => {
                let mut state = self.state.lock();
                let arrived = std::mem::replace(&mut state.pending, template.transactions);
                state.pending.extend(arrived);
                warn!(index = template.index, error = %err, pending = state.pending.len(), "mining failed, transactions returned to pool");
                Err(err)
            }
        }
    }

    /// Committed blocks, oldest first.
    pub fn blocks(&self) -> Vec<Block> {
        self.state.lock().blocks.clone()
    }

    /// Pending transactions in submission order.
    pub fn pending(&self) -> Vec<String> {
        self.state.lock().pending.clone()
    }

    pub fn tip(&self) -> Option<Block> {
        self.state.lock().blocks.last().cloned()
    }

    pub fn height(&self) -> u64 {
        self.state
            .lock()
            .blocks
            .last()
            .map(|b| b.index)
            .unwrap_or_default()
    }

    pub fn info(&self) -> ChainInfo {
        let state = self.state.lock();
        ChainInfo {
            name: self.config.name.clone(),
            height: state.blocks.last().map(|b| b.index).unwrap_or_default(),
            pending: state.pending.len(),
            difficulty: self.config.default_difficulty,
        }
    }

    /// Case-insensitive substring search over committed transactions.
    pub fn search(&self, query: &str) -> LedgerResult<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Err(LedgerError::InvalidInput(
                "search query must not be blank".to_string(),
            ));
        }
        let needle = query.to_lowercase();
        let state = self.state.lock();
        let hits = state
            .blocks
            .iter()
            .flat_map(|block| {
                block
                    .transactions
                    .iter()
                    .filter(|tx| tx.to_lowercase().contains(&needle))
                    .map(|tx| SearchHit {
                        block_index: block.index,
                        transaction: tx.clone(),
                        block_hash: block.hash.clone(),
                    })
            })
            .collect();
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{chain::MemoryStore, merkle_root, pow::meets_difficulty};
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        thread,
        time::Instant,
    };

    fn quick_config() -> LedgerConfig {
        LedgerConfig {
            default_difficulty: 1,
            genesis_tx: "seed".to_string(),
            ..LedgerConfig::default()
        }
    }

    fn open_memory(config: LedgerConfig) -> (Arc<MemoryStore>, Ledger<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::open(store.clone(), config).unwrap();
        (store, ledger)
    }

    /// Accepts the genesis write, then fails writes while `failing` is set.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        failing: AtomicBool,
    }

    impl ChainStore for FlakyStore {
        fn load(&self) -> anyhow::Result<Option<Vec<Block>>> {
            self.inner.load()
        }

        fn save(&self, blocks: &[Block]) -> anyhow::Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                anyhow::bail!("disk full");
            }
            self.inner.save(blocks)
        }
    }

    struct UnreadableStore;

    impl ChainStore for UnreadableStore {
        fn load(&self) -> anyhow::Result<Option<Vec<Block>>> {
            anyhow::bail!("permission denied")
        }

        fn save(&self, _blocks: &[Block]) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn bootstrap_creates_and_persists_genesis() {
        let (store, ledger) = open_memory(LedgerConfig::default());
        let blocks = ledger.blocks();
        assert_eq!(blocks.len(), 1);
        let genesis = &blocks[0];
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.prev_hash, "");
        assert_eq!(genesis.transactions, vec![DEFAULT_GENESIS_TX.to_string()]);
        assert_eq!(genesis.difficulty, DEFAULT_DIFFICULTY);
        assert!(genesis.hash.starts_with("0000"));
        assert_eq!(genesis.hash, genesis.compute_hash());
        assert_eq!(store.snapshot(), Some(blocks));
    }

    #[test]
    fn mine_without_pending_is_nothing_to_mine() {
        let (store, ledger) = open_memory(quick_config());
        let before = store.snapshot();
        assert!(matches!(
            ledger.mine_and_commit(None, None),
            Err(LedgerError::NothingToMine)
        ));
        assert_eq!(ledger.blocks().len(), 1);
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn max_index_tip_fails_without_losing_transactions() {
        let template = BlockTemplate::new(u64::MAX, String::new(), vec!["seed".to_string()], 1);
        let tip = crate::pow::mine_block(&template, None).unwrap();
        let store = Arc::new(MemoryStore::with_blocks(vec![tip.clone()]));
        let ledger = Ledger::open(store.clone(), quick_config()).unwrap();

        ledger.submit("alice->bob:5").unwrap();
        assert!(matches!(
            ledger.mine_and_commit(None, None),
            Err(LedgerError::CorruptChain(ChainViolation::IndexOverflow { index: u64::MAX }))
        ));
        assert_eq!(ledger.pending(), vec!["alice->bob:5".to_string()]);
        assert_eq!(ledger.blocks(), vec![tip.clone()]);
        assert_eq!(store.snapshot(), Some(vec![tip]));
    }

    #[test]
    fn submit_rejects_blank_transactions() {
        let (_store, ledger) = open_memory(quick_config());
        for blank in ["", "   ", "\n\t"] {
            assert!(matches!(
                ledger.submit(blank),
                Err(LedgerError::InvalidInput(_))
            ));
        }
        assert!(ledger.pending().is_empty());
    }

    #[test]
    fn submit_returns_updated_pool() {
        let (_store, ledger) = open_memory(quick_config());
        assert_eq!(ledger.submit("a").unwrap(), vec!["a".to_string()]);
        assert_eq!(
            ledger.submit(" b ").unwrap(),
            vec!["a".to_string(), " b ".to_string()]
        );
    }

    #[test]
    fn submit_then_mine_commits_block() {
        let (store, ledger) = open_memory(quick_config());
        ledger.submit("alice->bob:5").unwrap();
        ledger.submit("bob->carol:2").unwrap();
        let genesis = ledger.tip().unwrap();

        let commit = ledger.mine_and_commit(Some(2), None).unwrap();
        assert!(commit.is_durable());
        let block = commit.block;

        assert!(ledger.pending().is_empty());
        assert_eq!(block.index, 1);
        assert_eq!(block.prev_hash, genesis.hash);
        assert_eq!(block.merkle_root, merkle_root(&["alice->bob:5", "bob->carol:2"]));
        assert!(block.hash.starts_with("00"));
        assert_eq!(block.hash, block.compute_hash());
        assert_eq!(block.difficulty, 2);
        assert_eq!(ledger.height(), 1);
        assert_eq!(store.snapshot().unwrap(), ledger.blocks());
        verify_chain(&ledger.blocks()).unwrap();
    }

    #[test]
    fn mine_uses_default_difficulty() {
        let (_store, ledger) = open_memory(quick_config());
        ledger.submit("x").unwrap();
        let block = ledger.mine_and_commit(None, None).unwrap().block;
        assert_eq!(block.difficulty, 1);
        assert!(meets_difficulty(&block.hash, 1));
    }

    #[test]
    fn unreachable_difficulty_leaves_pool_untouched() {
        let (_store, ledger) = open_memory(quick_config());
        ledger.submit("x").unwrap();
        assert!(matches!(
            ledger.mine_and_commit(Some(65), None),
            Err(LedgerError::InvalidInput(_))
        ));
        assert_eq!(ledger.pending(), vec!["x".to_string()]);
    }

    #[test]
    fn timeout_restores_pending_pool() {
        let (store, ledger) = open_memory(quick_config());
        ledger.submit("alice->bob:5").unwrap();
        ledger.submit("bob->carol:2").unwrap();
        let before = ledger.pending();
        let stored = store.snapshot();

        let err = ledger
            .mine_and_commit(Some(8), Some(Duration::from_millis(1)))
            .unwrap_err();
        assert!(matches!(err, LedgerError::MiningTimeout { .. }));
        assert_eq!(ledger.pending(), before);
        assert_eq!(ledger.blocks().len(), 1);
        assert_eq!(store.snapshot(), stored);
    }

    #[test]
    fn configured_timeout_applies_when_request_has_none() {
        let config = LedgerConfig {
            default_timeout: Some(Duration::from_millis(1)),
            ..quick_config()
        };
        let (_store, ledger) = open_memory(config);
        ledger.submit("x").unwrap();
        assert!(matches!(
            ledger.mine_and_commit(Some(8), None),
            Err(LedgerError::MiningTimeout { .. })
        ));
        assert_eq!(ledger.pending(), vec!["x".to_string()]);
    }

    #[test]
    fn search_is_case_insensitive_across_blocks() {
        let (_store, ledger) = open_memory(quick_config());
        ledger.submit("alice->BOB:5").unwrap();
        ledger.submit("carol->dave:1").unwrap();
        let first = ledger.mine_and_commit(None, None).unwrap().block;
        ledger.submit("Bob->erin:3").unwrap();
        let second = ledger.mine_and_commit(None, None).unwrap().block;

        let hits = ledger.search("bob").unwrap();
        assert_eq!(
            hits,
            vec![
                SearchHit {
                    block_index: 1,
                    transaction: "alice->BOB:5".to_string(),
                    block_hash: first.hash.clone(),
                },
                SearchHit {
                    block_index: 2,
                    transaction: "Bob->erin:3".to_string(),
                    block_hash: second.hash.clone(),
                },
            ]
        );
        assert!(ledger.search("zed").unwrap().is_empty());
        assert!(matches!(ledger.search("  "), Err(LedgerError::InvalidInput(_))));
    }

    #[test]
    fn every_prefix_satisfies_invariants() {
        let (_store, ledger) = open_memory(quick_config());
        for round in 0..5 {
            for i in 0..=round {
                ledger.submit(format!("r{round}-tx{i}")).unwrap();
            }
            ledger.mine_and_commit(None, None).unwrap();
        }
        let blocks = ledger.blocks();
        assert_eq!(blocks.len(), 6);
        for end in 1..=blocks.len() {
            verify_chain(&blocks[..end]).unwrap();
        }
    }

    #[test]
    fn persistence_failure_keeps_commit_in_memory() {
        let store = Arc::new(FlakyStore::default());
        let ledger = Ledger::open(store.clone(), quick_config()).unwrap();
        store.failing.store(true, Ordering::SeqCst);

        ledger.submit("x").unwrap();
        let commit = ledger.mine_and_commit(None, None).unwrap();
        assert!(!commit.is_durable());
        assert!(commit.persist_error.as_deref().unwrap().contains("disk full"));
        assert_eq!(ledger.blocks().len(), 2);
        assert_eq!(store.inner.snapshot().unwrap().len(), 1);

        // The next successful write catches the durable copy up in full.
        store.failing.store(false, Ordering::SeqCst);
        ledger.submit("y").unwrap();
        assert!(ledger.mine_and_commit(None, None).unwrap().is_durable());
        assert_eq!(store.inner.snapshot().unwrap(), ledger.blocks());
    }

    #[test]
    fn unreadable_store_is_fatal() {
        let result = Ledger::open(Arc::new(UnreadableStore), quick_config());
        assert!(matches!(result, Err(LedgerError::Persistence(msg)) if msg.contains("permission denied")));
    }

    #[test]
    fn existing_store_is_loaded_verbatim() {
        let (store, ledger) = open_memory(quick_config());
        ledger.submit("x").unwrap();
        ledger.mine_and_commit(None, None).unwrap();
        let saved = store.snapshot().unwrap();

        let reopened = Ledger::open(store.clone(), quick_config()).unwrap();
        assert_eq!(reopened.blocks(), saved);
        assert!(reopened.pending().is_empty());
    }

    #[test]
    fn empty_or_corrupt_store_is_rejected_on_load() {
        let empty = Arc::new(MemoryStore::with_blocks(vec![]));
        assert!(matches!(
            Ledger::open(empty, quick_config()),
            Err(LedgerError::CorruptChain(ChainViolation::Empty))
        ));

        let (store, ledger) = open_memory(quick_config());
        ledger.submit("x").unwrap();
        ledger.mine_and_commit(None, None).unwrap();
        let mut blocks = store.snapshot().unwrap();
        blocks[1].transactions[0] = "forged".to_string();
        let tampered = Arc::new(MemoryStore::with_blocks(blocks));

        // Without verification the chain is taken as stored.
        assert!(Ledger::open(tampered.clone(), quick_config()).is_ok());
        let strict = LedgerConfig {
            verify_on_load: true,
            ..quick_config()
        };
        assert!(matches!(
            Ledger::open(tampered, strict),
            Err(LedgerError::CorruptChain(ChainViolation::MerkleMismatch { index: 1 }))
        ));
    }

    #[test]
    fn readers_and_submitters_progress_during_mining() {
        let (_store, ledger) = open_memory(quick_config());
        let ledger = Arc::new(ledger);
        ledger.submit("first").unwrap();

        let miner = {
            let ledger = ledger.clone();
            thread::spawn(move || ledger.mine_and_commit(Some(12), Some(Duration::from_millis(800))))
        };

        // Wait until the miner has drained the pool.
        let waited = Instant::now();
        while !ledger.pending().is_empty() {
            assert!(waited.elapsed() < Duration::from_secs(5), "miner never started");
            thread::sleep(Duration::from_millis(1));
        }

        let started = Instant::now();
        assert_eq!(ledger.blocks().len(), 1);
        assert_eq!(ledger.submit("second").unwrap(), vec!["second".to_string()]);
        assert!(ledger.search("first").unwrap().is_empty());
        assert!(started.elapsed() < Duration::from_millis(400));

        let result = miner.join().unwrap();
        assert!(matches!(result, Err(LedgerError::MiningTimeout { .. })));
        assert_eq!(
            ledger.pending(),
            vec!["first".to_string(), "second".to_string()]
        );
    }

    #[test]
    fn concurrent_mines_extend_one_chain() {
        let (store, ledger) = open_memory(quick_config());
        let ledger = Arc::new(ledger);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ledger = ledger.clone();
                thread::spawn(move || {
                    ledger.submit(format!("tx-{i}")).unwrap();
                    match ledger.mine_and_commit(None, None) {
                        Ok(_) | Err(LedgerError::NothingToMine) => {}
                        Err(other) => panic!("unexpected error {other:?}"),
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let blocks = ledger.blocks();
        verify_chain(&blocks).unwrap();
        let mut committed: Vec<String> = blocks[1..]
            .iter()
            .flat_map(|b| b.transactions.clone())
            .collect();
        committed.sort();
        let mut expected: Vec<String> = (0..8).map(|i| format!("tx-{i}")).collect();
        expected.sort();
        assert_eq!(committed, expected);
        assert!(ledger.pending().is_empty());
        assert_eq!(store.snapshot().unwrap(), blocks);
    }

    #[test]
    fn info_reports_height_and_pool() {
        let (_store, ledger) = open_memory(quick_config());
        ledger.submit("x").unwrap();
        let info = ledger.info();
        assert_eq!(info.name, DEFAULT_CHAIN_NAME);
        assert_eq!(info.height, 0);
        assert_eq!(info.pending, 1);
        assert_eq!(info.difficulty, 1);
    }
}
