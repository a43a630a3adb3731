//! Block Validator and Fork Resolver.

use crate::error::ChainError;
use crate::miner::meets_difficulty;
use tracing::{info, warn};

use super::chain::{Block, Blockchain};
use super::state::StateChanges;

/// How a block that passed validation relates to the local chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// `height == tip.height + 1` and `previous_hash == tip.hash`.
    ExtendsTip,
    /// Anything else; admitted only if taller than the tip.
    ForkCandidate,
    /// Already part of the local chain.
    Known,
}

#[derive(Debug)]
pub struct ValidatedBlock {
    pub placement: Placement,
    pub changes: StateChanges,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitOutcome {
    Extended { height: u64 },
    ForkAdopted { height: u64, replaced_tip_height: u64 },
}

impl AdmitOutcome {
    pub fn height(&self) -> u64 {
        match self {
            AdmitOutcome::Extended { height } | AdmitOutcome::ForkAdopted { height, .. } => *height,
        }
    }
}

impl Blockchain {
    /// Check `block` against the current chain without changing anything.
    ///
    /// Transactions are replayed in order over a pending overlay, so each one
    /// sees the effects of those before it. The returned changes are what
    /// [`Blockchain::admit_block`] commits.
    pub fn validate_block(&self, block: &Block) -> Result<ValidatedBlock, ChainError> {
        let calculated = block.calculate_hash();
        if calculated != block.hash {
            return Err(ChainError::Consensus(format!(
                "Block hash mismatch: declared {}, calculated {}",
                block.hash_str(),
                hex::encode(calculated)
            )));
        }
        if !meets_difficulty(&block.hash, self.params.difficulty) {
            return Err(ChainError::Consensus(format!(
                "Block hash {} does not meet difficulty {}",
                block.hash_str(),
                self.params.difficulty
            )));
        }

        if self.contains_block(&block.hash) {
            return Ok(ValidatedBlock {
                placement: Placement::Known,
                changes: StateChanges::default(),
            });
        }
        if self.mined_nonces.contains(&block.nonce) {
            return Err(ChainError::DuplicateNonce(block.nonce));
        }

        let tip = self.tip();
        let placement = if block.height == tip.height + 1 && block.previous_hash == tip.hash {
            Placement::ExtendsTip
        } else {
            Placement::ForkCandidate
        };

        let mut pending = self.state.pending();
        for (index, tx) in block.transactions.iter().enumerate() {
            if tx.is_coinbase() {
                if index != 0 {
                    return Err(ChainError::Consensus(format!(
                        "Coinbase transaction at index {}; only the first transaction may issue rewards",
                        index
                    )));
                }
                if let crate::transaction::Payload::Transfer { value, .. } = &tx.payload {
                    if *value != self.params.block_reward {
                        return Err(ChainError::Consensus(format!(
                            "Coinbase pays {}, block reward is {}",
                            value, self.params.block_reward
                        )));
                    }
                }
            }

            let invalid = |e: ChainError| {
                ChainError::Consensus(format!("Invalid transaction at index {}: {}", index, e))
            };
            tx.validate_structure(self.params.verify_signatures)
                .map_err(invalid)?;
            let execution = tx.execute(&mut pending).map_err(invalid)?;
            tx.verify_execution(&execution)?;
        }

        Ok(ValidatedBlock {
            placement,
            changes: pending.into_changes(),
        })
    }

    /// Validate, apply the fork rule, then append and commit as one unit.
    pub fn admit_block(&mut self, block: Block) -> Result<AdmitOutcome, ChainError> {
        let validated = self.validate_block(&block)?;
        let tip_height = self.height();

        let outcome = match validated.placement {
            Placement::Known => return Err(ChainError::BlockAlreadyExists),
            Placement::ExtendsTip => AdmitOutcome::Extended {
                height: block.height,
            },
            Placement::ForkCandidate => {
                warn!(
                    fork_height = block.height,
                    tip_height,
                    previous_hash = %hex::encode(block.previous_hash),
                    "fork detected"
                );
                if block.height <= tip_height {
                    warn!(tip_height, "fork resolution: keeping current chain");
                    return Err(ChainError::Consensus(format!(
                        "Fork block at height {} does not exceed tip height {}",
                        block.height, tip_height
                    )));
                }
                warn!(
                    new_height = block.height,
                    tip_height, "fork resolution: switching to taller chain"
                );
                AdmitOutcome::ForkAdopted {
                    height: block.height,
                    replaced_tip_height: tip_height,
                }
            }
        };

        let tx_count = block.transactions.len();
        let hash = block.hash_str();
        self.push_block(block);
        self.state.commit(validated.changes);
        info!(
            height = outcome.height(),
            hash = %hash,
            transactions = tx_count,
            chain_length = self.len(),
            "block admitted"
        );
        Ok(outcome)
    }
}
