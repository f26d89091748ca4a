use anyhow::{Context, Result};
use ledger_core::{Block, ChainStore};
use std::{
    ffi::OsString,
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

use crate::DEFAULT_CHAIN_FILE;

/// The chain as a pretty-printed JSON array of block records.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<dir>/blockchain.json`, creating `dir` if needed.
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("create data directory {}", dir.display()))?;
        let store = Self::new(dir.join(DEFAULT_CHAIN_FILE));
        info!(path = %store.path.display(), "json chain store opened");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut tmp: OsString = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }
}

impl ChainStore for JsonFileStore {
    fn load(&self) -> Result<Option<Vec<Block>>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("read {}", self.path.display()));
            }
        };
        let blocks: Vec<Block> = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse {}", self.path.display()))?;
        debug!(blocks = blocks.len(), "json chain loaded");
        Ok(Some(blocks))
    }

    fn save(&self, blocks: &[Block]) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(blocks).context("serialize chain")?;
        // Write beside the target and rename over it, so readers never see a
        // partially written file.
        let tmp = self.temp_path();
        fs::write(&tmp, &bytes).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace {}", self.path.display()))?;
        debug!(blocks = blocks.len(), bytes = bytes.len(), "json chain saved");
        Ok(())
    }
}
