use crate::{
    constants::NONCES_PER_WINDOW,
    error::LedgerError,
    pow::{check_difficulty, meets_difficulty},
    Block, BlockTemplate,
};
use rayon::prelude::*;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Mines a block by searching nonces in parallel.
///
/// The nonce space is walked in ascending windows of [`NONCES_PER_WINDOW`];
/// rayon splits each window across threads and `find_first` keeps the lowest
/// match, so the result is the same block the sequential
/// [`crate::pow::mine_block`] finds. `timeout` is checked between windows.
pub fn mine_block_parallel(
    template: &BlockTemplate,
    timeout: Option<Duration>,
) -> Result<Block, LedgerError> {
    check_difficulty(template.difficulty)?;
    let started = Instant::now();
    let mut window_start = 0u64;

    loop {
        let window_end = window_start.saturating_add(NONCES_PER_WINDOW);
        let found = (window_start..window_end)
            .into_par_iter()
            .find_first(|nonce| {
                meets_difficulty(&template.hash_with_nonce(*nonce), template.difficulty)
            });

        if let Some(nonce) = found {
            let hash = template.hash_with_nonce(nonce);
            info!(
                index = template.index,
                nonce,
                hash = %hash,
                elapsed_ms = started.elapsed().as_millis() as u64,
                threads = rayon::current_num_threads(),
                "mined block"
            );
            return Ok(template.seal(nonce, hash));
        }

        let last_nonce = window_end - 1;
        if let Some(limit) = timeout {
            if started.elapsed() > limit {
                return Err(LedgerError::MiningTimeout {
                    timeout: limit,
                    last_nonce,
                });
            }
        }
        if window_end == u64::MAX {
            // Exhausted: start over, as the sequential miner wraps around.
            window_start = 0;
        } else {
            window_start = window_end;
        }
        debug!(index = template.index, last_nonce, "window exhausted");
    }
}

/// Sequential or parallel search, picked by configuration.
pub fn mine_with(
    parallel: bool,
    template: &BlockTemplate,
    timeout: Option<Duration>,
) -> Result<Block, LedgerError> {
    if parallel {
        mine_block_parallel(template, timeout)
    } else {
        crate::pow::mine_block(template, timeout)
    }
}
