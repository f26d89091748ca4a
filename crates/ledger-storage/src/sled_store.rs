use anyhow::{Context, Result};
use ledger_core::{Block, ChainStore};
use sled::{Batch, Db, Tree};
use std::path::Path;
use tracing::{debug, info};

const TREE_BLOCKS: &str = "blocks";
const KEY_SAVED: &[u8] = b"chain_saved";

/// Blocks in a sled tree keyed by big-endian index, values bincode-encoded.
#[derive(Clone)]
pub struct SledStore {
    db: Db,
    blocks: Tree,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path).with_context(|| format!("open sled at {}", path.display()))?;
        let blocks = db.open_tree(TREE_BLOCKS).context("open blocks tree")?;
        info!(path = %path.display(), "sled store opened");
        Ok(Self { db, blocks })
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Flush outstanding writes to disk.
    pub fn close(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl ChainStore for SledStore {
    fn load(&self) -> Result<Option<Vec<Block>>> {
        if self.blocks.is_empty() {
            // A tree emptied by a save is a stored zero-block chain, not a fresh store.
            return Ok(self.db.contains_key(KEY_SAVED)?.then(Vec::new));
        }
        let mut out = Vec::with_capacity(self.blocks.len());
        for entry in self.blocks.iter() {
            let (key, value) = entry?;
            let block: Block = bincode::deserialize(&value)
                .with_context(|| format!("decode block under key {key:?}"))?;
            out.push(block);
        }
        debug!(blocks = out.len(), "sled chain loaded");
        Ok(Some(out))
    }

    fn save(&self, blocks: &[Block]) -> Result<()> {
        // One atomic batch: drop every stored block, then write the full chain.
        let mut batch = Batch::default();
        for key in self.blocks.iter().keys() {
            batch.remove(key?);
        }
        for block in blocks {
            let bytes = bincode::serialize(block)?;
            batch.insert(block.index.to_be_bytes().to_vec(), bytes);
        }
        self.blocks.apply_batch(batch)?;
        self.db.insert(KEY_SAVED, vec![1u8])?;
        self.db.flush()?;
        debug!(blocks = blocks.len(), "sled chain saved");
        Ok(())
    }
}
