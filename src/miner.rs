//! Proof-of-work: difficulty predicate, nonce search and the mining task.

use crate::blockchain::{AdmitOutcome, Block, Blockchain, HashPreimage, Sha256Hash};
use crate::config::{MiningConfig, NonceStrategy};
use crate::crypto::Address;
use crate::error::ChainError;
use crate::node::Node;
use crate::transaction::Transaction;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Highest difficulty a node accepts; genesis is mined without a budget, so
/// this keeps start-up within a few million hashes.
pub const MAX_DIFFICULTY: u32 = 6;

/// Largest hash accepted at `difficulty`: the max digest shifted right by
/// `difficulty * 4` bits, i.e. `difficulty` leading zero nibbles.
pub fn difficulty_target(difficulty: u32) -> Sha256Hash {
    let mut target = [0xFF; 32];
    let zero_bits = difficulty.saturating_mul(4);
    let leading_zeros = zero_bits / 8;
    let partial_bits = zero_bits % 8;

    for item in target.iter_mut().take(leading_zeros as usize) {
        *item = 0;
    }

    if leading_zeros < 32 && partial_bits > 0 {
        target[leading_zeros as usize] = 0xFF >> partial_bits;
    }
    target
}

/// Big-endian comparison against [`difficulty_target`].
pub fn meets_difficulty(hash: &Sha256Hash, difficulty: u32) -> bool {
    *hash <= difficulty_target(difficulty)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinerState {
    Idle,
    Searching,
    Found,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    Found {
        nonce: u64,
        hash: Sha256Hash,
        attempts: u64,
    },
    Exhausted {
        attempts: u64,
    },
}

/// First nonce tried by a sequential search of `preimage`. Derived from the
/// template itself, so different templates walk different ranges.
pub fn sequential_start(preimage: &HashPreimage) -> u64 {
    let digest = preimage.hash(0);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// Try at most `budget` nonces. Nonces already in `used` are skipped and still
/// count as attempts.
pub fn search_nonce(
    preimage: &HashPreimage,
    difficulty: u32,
    budget: u64,
    strategy: NonceStrategy,
    used: &HashSet<u64>,
) -> SearchOutcome {
    let target = difficulty_target(difficulty);
    let start = match strategy {
        NonceStrategy::Sequential => sequential_start(preimage),
        NonceStrategy::Random => 0,
    };
    let mut attempts = 0;
    while attempts < budget {
        let nonce = match strategy {
            NonceStrategy::Sequential => start.wrapping_add(attempts),
            NonceStrategy::Random => rand::random::<u64>(),
        };
        attempts += 1;
        if used.contains(&nonce) {
            continue;
        }
        let hash = preimage.hash(nonce);
        if hash <= target {
            return SearchOutcome::Found {
                nonce,
                hash,
                attempts,
            };
        }
    }
    SearchOutcome::Exhausted { attempts }
}

/// Unbounded sequential search. Used where the result must be reproducible,
/// such as the genesis block.
pub fn mine_block(mut block: Block, difficulty: u32, used: &HashSet<u64>) -> Block {
    let preimage = block.preimage();
    let target = difficulty_target(difficulty);
    if let Some(nonce) =
        (0..=u64::MAX).find(|nonce| !used.contains(nonce) && preimage.hash(*nonce) <= target)
    {
        block.nonce = nonce;
    }
    block.hash = block.calculate_hash();
    block
}

/// Everything the search needs, detached from the node lock.
#[derive(Debug, Clone)]
pub struct MiningJob {
    pub block: Block,
    pub difficulty: u32,
    pub used_nonces: HashSet<u64>,
}

/// Assemble the next block on top of `chain`: the coinbase first, then pool
/// transactions in order until the block holds `limit` transactions.
///
/// Candidates are replayed over a pending overlay; any that fail are left out
/// and contract transactions carry their pre-execution result.
pub fn build_template(
    chain: &Blockchain,
    candidates: &[Transaction],
    beneficiary: &str,
    limit: usize,
    timestamp: u64,
) -> Result<Block, ChainError> {
    let tip = chain.tip();
    let mut pending = chain.state().pending();

    let coinbase = Transaction::coinbase(beneficiary, chain.params.block_reward, timestamp);
    coinbase.execute(&mut pending)?;
    let mut transactions = vec![coinbase];

    for tx in candidates {
        if transactions.len() >= limit {
            break;
        }
        let executed = tx
            .validate_structure(chain.params.verify_signatures)
            .and_then(|_| tx.execute(&mut pending));
        match executed {
            Ok(execution) => transactions.push(tx.with_execution(execution)),
            Err(e) => {
                debug!(tx = %tx.hash_str(), error = %e, "skipping transaction in block template");
            }
        }
    }

    Ok(Block::new(tip.height + 1, tip.hash, transactions, timestamp))
}

pub fn prepare_job(
    chain: &Blockchain,
    candidates: &[Transaction],
    beneficiary: &str,
    limit: usize,
    timestamp: u64,
) -> Result<MiningJob, ChainError> {
    Ok(MiningJob {
        block: build_template(chain, candidates, beneficiary, limit, timestamp)?,
        difficulty: chain.params.difficulty,
        used_nonces: chain.mined_nonces().clone(),
    })
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// The long-running mining task. Each cycle re-reads the tip and the pool,
/// searches within the attempt budget and submits whatever it finds.
pub struct Miner {
    node: Node,
    beneficiary: Address,
    block_transaction_limit: usize,
    attempt_budget: u64,
    strategy: NonceStrategy,
    interval: Duration,
    state: MinerState,
    blocks_mined: u64,
}

impl Miner {
    pub fn new(node: Node, beneficiary: Address, config: &MiningConfig) -> Result<Self, ChainError> {
        Ok(Miner {
            node,
            beneficiary,
            block_transaction_limit: config.block_transaction_limit,
            attempt_budget: config.attempt_budget,
            strategy: config.nonce_strategy,
            interval: config.interval()?,
            state: MinerState::Idle,
            blocks_mined: 0,
        })
    }

    pub fn state(&self) -> MinerState {
        self.state
    }

    pub fn blocks_mined(&self) -> u64 {
        self.blocks_mined
    }

    /// Mine until `shutdown` flips to `true`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            beneficiary = %self.beneficiary,
            attempt_budget = self.attempt_budget,
            strategy = ?self.strategy,
            "miner started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.mine_once().await {
                warn!(error = %e, "mining cycle failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        self.state = MinerState::Idle;
        info!(blocks_mined = self.blocks_mined, "miner stopped");
    }

    /// One Idle -> Searching -> Found/Exhausted cycle.
    pub async fn mine_once(&mut self) -> Result<Option<AdmitOutcome>, ChainError> {
        let job = self
            .node
            .mining_job(&self.beneficiary, self.block_transaction_limit, now_millis())
            .await?;

        self.state = MinerState::Searching;
        let started = Instant::now();
        let budget = self.attempt_budget;
        let strategy = self.strategy;
        let MiningJob {
            mut block,
            difficulty,
            used_nonces,
        } = job;
        let preimage = block.preimage();
        let outcome = tokio::task::spawn_blocking(move || {
            search_nonce(&preimage, difficulty, budget, strategy, &used_nonces)
        })
        .await
        .map_err(|e| ChainError::IoError(format!("nonce search task failed: {}", e)))?;

        match outcome {
            SearchOutcome::Exhausted { attempts } => {
                self.state = MinerState::Exhausted;
                debug!(
                    height = block.height,
                    attempts,
                    elapsed = ?started.elapsed(),
                    "attempt budget exhausted, retrying with a fresh template"
                );
                Ok(None)
            }
            SearchOutcome::Found {
                nonce,
                hash,
                attempts,
            } => {
                self.state = MinerState::Found;
                block.nonce = nonce;
                block.hash = hash;
                info!(
                    height = block.height,
                    nonce,
                    attempts,
                    hash = %block.hash_str(),
                    elapsed = ?started.elapsed(),
                    "mined block"
                );
                let outcome = self.node.submit_block(block).await?;
                self.blocks_mined += 1;
                Ok(Some(outcome))
            }
        }
    }
}
