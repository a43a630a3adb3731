use crate::contract::ContractStore;
use crate::crypto::canonical_json;
use crate::error::ChainError;
use crate::miner::{mine_block, MAX_DIFFICULTY};
use crate::transaction::{Payload, Transaction};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

use super::state::{AccountLedger, LedgerState};

pub type Sha256Hash = [u8; 32];

/// Fixed so that nodes with the same difficulty agree on the genesis block.
pub const GENESIS_TIMESTAMP: u64 = 1_672_531_200_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
    #[serde(with = "hex::serde")]
    pub previous_hash: Sha256Hash,
    pub nonce: u64,
    #[serde(with = "hex::serde")]
    pub hash: Sha256Hash,
}

/// Canonical encoding of a block minus its hash, split around the nonce so the
/// miner can vary it without re-encoding the transactions.
#[derive(Debug, Clone)]
pub struct HashPreimage {
    prefix: String,
    suffix: String,
}

impl HashPreimage {
    pub fn hash(&self, nonce: u64) -> Sha256Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.prefix.as_bytes());
        hasher.update(nonce.to_string().as_bytes());
        hasher.update(self.suffix.as_bytes());
        hasher.finalize().into()
    }
}

impl Block {
    /// An unmined block: nonce 0 and a zero hash.
    pub fn new(
        height: u64,
        previous_hash: Sha256Hash,
        transactions: Vec<Transaction>,
        timestamp: u64,
    ) -> Self {
        Block {
            height,
            timestamp,
            transactions,
            previous_hash,
            nonce: 0,
            hash: [0u8; 32],
        }
    }

    /// Parse a block received from a peer. Any shape problem is structural.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ChainError> {
        serde_json::from_value(value)
            .map_err(|e| ChainError::Structural(format!("Malformed block: {}", e)))
    }

    /// Sorted-key JSON of every field except `hash`. Keys sort as height,
    /// nonce, previous_hash, timestamp, transactions.
    pub fn preimage(&self) -> HashPreimage {
        let rest = canonical_json(&serde_json::json!({
            "previous_hash": hex::encode(self.previous_hash),
            "timestamp": self.timestamp,
            "transactions": self
                .transactions
                .iter()
                .map(Transaction::to_json)
                .collect::<Vec<_>>(),
        }));
        HashPreimage {
            prefix: format!("{{\"height\":{},\"nonce\":", self.height),
            suffix: format!(",{}", rest.strip_prefix('{').unwrap_or(&rest)),
        }
    }

    pub fn calculate_hash(&self) -> Sha256Hash {
        self.preimage().hash(self.nonce)
    }

    pub fn hash_str(&self) -> String {
        hex::encode(self.hash)
    }
}

/// Consensus knobs fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsensusParams {
    pub difficulty: u32,
    pub block_reward: u64,
    pub verify_signatures: bool,
    pub gas_limit: u64,
}

impl ConsensusParams {
    pub fn from_config(config: &crate::config::Config) -> Self {
        ConsensusParams {
            difficulty: config.mining.difficulty,
            block_reward: config.mining.reward,
            verify_signatures: config.consensus.verify_signatures,
            gas_limit: config.contracts.gas_limit,
        }
    }
}

/// The Ledger: canonical chain, world state and the mined-nonce set.
#[derive(Debug)]
pub struct Blockchain {
    pub params: ConsensusParams,
    pub(crate) blocks: Vec<Block>,
    pub(crate) state: LedgerState,
    pub(crate) mined_nonces: HashSet<u64>,
    block_index: HashMap<Sha256Hash, usize>,
}

impl Blockchain {
    /// Create a chain holding only the deterministic genesis block.
    pub fn new(params: ConsensusParams) -> Result<Self, ChainError> {
        if params.difficulty > MAX_DIFFICULTY {
            return Err(ChainError::ConfigError(format!(
                "difficulty {} exceeds the maximum of {}",
                params.difficulty, MAX_DIFFICULTY
            )));
        }
        let genesis = Self::create_genesis_block(params.difficulty);
        let mut chain = Blockchain {
            params,
            blocks: Vec::new(),
            state: LedgerState::new(params.gas_limit),
            mined_nonces: HashSet::new(),
            block_index: HashMap::new(),
        };
        chain.push_block(genesis);
        Ok(chain)
    }

    /// Rebuild a chain from persisted parts.
    pub fn from_parts(
        params: ConsensusParams,
        blocks: Vec<Block>,
        accounts: AccountLedger,
        contracts: ContractStore,
        mined_nonces: impl IntoIterator<Item = u64>,
    ) -> Result<Self, ChainError> {
        if blocks.is_empty() {
            return Err(ChainError::DatabaseError(
                "Snapshot contains no blocks".to_string(),
            ));
        }
        for block in &blocks {
            if block.calculate_hash() != block.hash {
                return Err(ChainError::DatabaseError(format!(
                    "Stored block {} fails hash verification",
                    block.height
                )));
            }
        }

        let mut state = LedgerState::new(params.gas_limit);
        state.accounts = accounts;
        state.contracts = crate::contract::ContractEngine::with_store(contracts, params.gas_limit);

        let block_index = blocks
            .iter()
            .enumerate()
            .map(|(i, block)| (block.hash, i))
            .collect();
        let mut mined_nonces: HashSet<u64> = mined_nonces.into_iter().collect();
        mined_nonces.extend(blocks.iter().map(|b| b.nonce));

        Ok(Blockchain {
            params,
            blocks,
            state,
            mined_nonces,
            block_index,
        })
    }

    fn create_genesis_block(difficulty: u32) -> Block {
        let genesis = Block::new(0, [0u8; 32], Vec::new(), GENESIS_TIMESTAMP);
        mine_block(genesis, difficulty, &HashSet::new())
    }

    pub(crate) fn push_block(&mut self, block: Block) {
        self.mined_nonces.insert(block.nonce);
        self.block_index.insert(block.hash, self.blocks.len());
        self.blocks.push(block);
    }

    pub fn tip(&self) -> &Block {
        // Never empty: both constructors guarantee at least the genesis block.
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn height(&self) -> u64 {
        self.tip().height
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    pub fn mined_nonces(&self) -> &HashSet<u64> {
        &self.mined_nonces
    }

    pub fn contains_block(&self, hash: &Sha256Hash) -> bool {
        self.block_index.contains_key(hash)
    }

    pub fn balance(&self, address: &str) -> u64 {
        self.state.accounts.get_balance(address).unwrap_or(0)
    }

    pub fn total_transactions(&self) -> usize {
        self.blocks.iter().map(|b| b.transactions.len()).sum()
    }

    /// Height of the block whose deployment created `contract_id`.
    pub fn find_contract_block(&self, contract_id: &str) -> Option<u64> {
        self.blocks.iter().find_map(|block| {
            block
                .transactions
                .iter()
                .any(|tx| {
                    matches!(
                        &tx.payload,
                        Payload::DeployContract { contract_id: Some(id), .. } if id == contract_id
                    )
                })
                .then_some(block.height)
        })
    }

    /// Top up an account outside of any block (genesis allocation, dev faucet).
    pub fn credit_account(&mut self, address: &str, amount: u64) -> Result<u64, ChainError> {
        self.state.accounts.credit(address, amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::Value;
    use crate::miner::meets_difficulty;
    use std::collections::BTreeMap;

    pub(crate) fn params(difficulty: u32) -> ConsensusParams {
        ConsensusParams {
            difficulty,
            block_reward: 100,
            verify_signatures: false,
            gas_limit: 100_000,
        }
    }

    #[test]
    fn test_hash_covers_canonical_encoding() {
        let mut args = BTreeMap::new();
        args.insert("amount".to_string(), Value::Int(3));
        let block = Block::new(
            4,
            [7u8; 32],
            vec![
                Transaction::coinbase("miner", 100, 10),
                Transaction::call("alice", "abcd", "deposit", args, 11),
            ],
            12,
        );

        let mut body = serde_json::to_value(&block).unwrap();
        body.as_object_mut().unwrap().remove("hash");
        let expected: Sha256Hash = Sha256::digest(canonical_json(&body).as_bytes()).into();
        assert_eq!(block.calculate_hash(), expected);

        let mut moved = block.clone();
        moved.nonce = 99;
        assert_ne!(moved.calculate_hash(), block.calculate_hash());
    }

    #[test]
    fn test_json_round_trip_keeps_hash() {
        let mut block = Block::new(1, [1u8; 32], vec![Transaction::coinbase("m", 100, 1)], 2);
        block.hash = block.calculate_hash();
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["previous_hash"], serde_json::json!(hex::encode([1u8; 32])));
        let parsed = Block::from_json(json).unwrap();
        assert_eq!(parsed.calculate_hash(), block.hash);
    }

    #[test]
    fn test_malformed_block_is_structural() {
        let err = Block::from_json(serde_json::json!({"height": 1})).unwrap_err();
        assert_eq!(err.reason_code(), "structural_error");
    }

    #[test]
    fn test_genesis_is_deterministic() {
        let a = Blockchain::new(params(2)).unwrap();
        let b = Blockchain::new(params(2)).unwrap();
        assert_eq!(a.tip().hash, b.tip().hash);
        assert_eq!(a.height(), 0);
        assert!(meets_difficulty(&a.tip().hash, 2));
        assert!(a.mined_nonces().contains(&a.tip().nonce));
    }

    #[test]
    fn test_unminable_difficulty_is_refused() {
        let err = Blockchain::new(params(MAX_DIFFICULTY + 1)).unwrap_err();
        assert_eq!(err.reason_code(), "config_error");
        let err = Blockchain::new(params(64)).unwrap_err();
        assert!(err.to_string().contains("exceeds the maximum"));
    }

    #[test]
    fn test_from_parts_rejects_tampered_blocks() {
        let chain = Blockchain::new(params(1)).unwrap();
        let mut blocks = chain.blocks().to_vec();
        blocks[0].timestamp += 1;
        let result = Blockchain::from_parts(
            params(1),
            blocks,
            AccountLedger::new(),
            ContractStore::new(),
            Vec::new(),
        );
        assert!(result.is_err());
    }
}
