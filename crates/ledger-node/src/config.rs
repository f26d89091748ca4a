use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use ledger_core::{
    constants::{DEFAULT_CHAIN_NAME, DEFAULT_DIFFICULTY, DEFAULT_GENESIS_TX, HASH_HEX_SIZE},
    ChainStore, LedgerConfig, MemoryStore,
};
use ledger_storage::{JsonFileStore, SledStore};
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// `blockchain.json` in the data directory
    Json,
    /// sled database in the data directory
    Sled,
    /// nothing survives a restart
    Memory,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "ledger-node")]
#[command(about = "Proof-of-work ledger node with an HTTP API")]
pub struct Args {
    /// Address to listen on, e.g. 127.0.0.1:8080
    #[arg(long, env = "LEDGER_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: String,

    /// Data directory for the chain store
    #[arg(long, env = "LEDGER_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    #[arg(long, env = "LEDGER_STORE", value_enum, default_value_t = StoreKind::Json)]
    pub store: StoreKind,

    /// Leading zero hex characters required when a mine request names none
    #[arg(long, env = "LEDGER_DIFFICULTY", default_value_t = DEFAULT_DIFFICULTY)]
    pub difficulty: u32,

    /// Mining time limit when a request names none; 0 or unset means unbounded
    #[arg(long, env = "LEDGER_MINE_TIMEOUT_MS")]
    pub mine_timeout_ms: Option<u64>,

    #[arg(long, env = "LEDGER_CHAIN_NAME", default_value = DEFAULT_CHAIN_NAME)]
    pub chain_name: String,

    /// Seed transaction of a freshly bootstrapped genesis block
    #[arg(long, env = "LEDGER_GENESIS_TX", default_value = DEFAULT_GENESIS_TX)]
    pub genesis_tx: String,

    /// Search nonces on all cores
    #[arg(long, env = "LEDGER_PARALLEL_MINING")]
    pub parallel_mining: bool,

    /// Check every invariant of the stored chain before serving it
    #[arg(long, env = "LEDGER_VERIFY_ON_LOAD")]
    pub verify_on_load: bool,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub listen: SocketAddr,
    pub data_dir: PathBuf,
    pub store: StoreKind,
    pub ledger: LedgerConfig,
}

impl Args {
    pub fn into_config(self) -> Result<NodeConfig> {
        let listen: SocketAddr = self
            .listen
            .parse()
            .with_context(|| format!("invalid listen address {:?}", self.listen))?;
        if self.difficulty as usize > HASH_HEX_SIZE {
            bail!(
                "difficulty {} exceeds the {HASH_HEX_SIZE} hex characters of a hash",
                self.difficulty
            );
        }
        if self.genesis_tx.trim().is_empty() {
            bail!("genesis transaction must not be blank");
        }
        Ok(NodeConfig {
            listen,
            data_dir: self.data_dir,
            store: self.store,
            ledger: LedgerConfig {
                name: self.chain_name,
                default_difficulty: self.difficulty,
                genesis_tx: self.genesis_tx,
                default_timeout: self
                    .mine_timeout_ms
                    .filter(|ms| *ms > 0)
                    .map(Duration::from_millis),
                parallel_mining: self.parallel_mining,
                verify_on_load: self.verify_on_load,
            },
        })
    }
}

pub fn open_store(kind: StoreKind, data_dir: &std::path::Path) -> Result<Arc<dyn ChainStore>> {
    let store: Arc<dyn ChainStore> = match kind {
        StoreKind::Json => Arc::new(JsonFileStore::in_dir(data_dir)?),
        StoreKind::Sled => Arc::new(SledStore::open(data_dir.join("sled"))?),
        StoreKind::Memory => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}
