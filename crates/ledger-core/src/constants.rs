pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
pub const DEFAULT_DIFFICULTY: u32 = 4;
pub const DEFAULT_GENESIS_TX: &str = "genesis";
pub const DEFAULT_CHAIN_NAME: &str = "ledger";
/// Nonces handed to the rayon pool per window by the parallel miner.
pub const NONCES_PER_WINDOW: u64 = 1 << 14;
