#![allow(dead_code)]

use std::fs;

use ledger_core::{pow::mine_block, Block, BlockTemplate};
use ledger_storage::{JsonFileStore, SledStore};
use tempfile::{tempdir, TempDir};

pub fn create_temp_sled() -> (TempDir, SledStore) {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let store = SledStore::open(temp_dir.path()).expect("Failed to open SledStore");
    (temp_dir, store)
}

pub fn create_temp_json() -> (TempDir, JsonFileStore) {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let store = JsonFileStore::in_dir(temp_dir.path()).expect("Failed to open JsonFileStore");
    (temp_dir, store)
}

pub fn teardown(temp_dir: TempDir) {
    let path = temp_dir.path().to_path_buf();
    temp_dir.close().expect("Failed to delete temp dir");
    let _ = fs::remove_dir_all(&path);
    assert!(!path.exists(), "Store directory should be removed");
}

/// A valid chain of `len` blocks mined at difficulty 1.
pub fn build_chain(len: usize) -> Vec<Block> {
    let mut blocks = vec![mine_block(&BlockTemplate::genesis("seed", 1), None).unwrap()];
    for i in 1..len {
        let txs = (0..=i % 3).map(|j| format!("user{i}->user{j}:{}", i * 10 + j)).collect();
        let template = BlockTemplate::next(blocks.last().unwrap(), txs, 1).unwrap();
        blocks.push(mine_block(&template, None).unwrap());
    }
    blocks
}
