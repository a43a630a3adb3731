use crate::blockchain::{AdmitOutcome, Block, Blockchain, ConsensusParams};
use crate::config::Config;
use crate::contract::{samples, ContractError};
use crate::crypto::Address;
use crate::error::ChainError;
use crate::mempool::Mempool;
use crate::miner::{now_millis, prepare_job, MiningJob};
use crate::network::{Broadcaster, HttpBroadcaster, NoopBroadcaster, PeerList};
use crate::persistence::{Database, InMemoryPersistence, NodeSnapshot, Persistence};
use crate::transaction::{Payload, Transaction, TxResult};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const CHAIN_WINDOW: usize = 10;
const STATS_WINDOW: usize = 5;
pub const DATABASE_FILE: &str = "forge.db";

/// Everything guarded by the node lock. One writer at a time, so a block's
/// admission and the mempool pruning that follows are seen together.
#[derive(Debug)]
pub struct NodeCore {
    pub chain: Blockchain,
    pub mempool: Mempool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TxResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainSummary {
    pub chain: Vec<Block>,
    pub length: usize,
    pub total_blocks: usize,
    pub min_height: u64,
    pub max_height: u64,
    pub total_transactions: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractInfo {
    pub contract_id: String,
    pub owner: Address,
    pub deployed_in_block: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockSummary {
    pub height: u64,
    pub hash: String,
    pub timestamp: u64,
    pub transactions: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountBalance {
    pub address: Address,
    pub balance: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeStats {
    pub node_id: String,
    pub chain_length: usize,
    pub latest_height: u64,
    pub difficulty: u32,
    pub total_transactions: usize,
    pub pending_transactions: usize,
    pub accounts: usize,
    pub total_balance: u128,
    pub mined_nonces: usize,
    pub contracts: usize,
    pub peers: usize,
    pub recent_blocks: Vec<BlockSummary>,
    pub top_accounts: Vec<AccountBalance>,
}

/// The single coordinating service. Cloning shares the same state.
#[derive(Clone)]
pub struct Node {
    core: Arc<RwLock<NodeCore>>,
    config: Arc<Config>,
    address: Address,
    persistence: Option<Arc<dyn Persistence>>,
    broadcaster: Arc<dyn Broadcaster>,
    peers: PeerList,
}

impl Node {
    /// Open the node's SQLite store under `data_dir` and broadcast over HTTP to
    /// the configured peers. Falls back to in-memory persistence.
    pub fn open(config: Config, address: Address) -> Result<Self, ChainError> {
        let persistence: Arc<dyn Persistence> = match open_database(&config.node.data_dir) {
            Ok(db) => Arc::new(db),
            Err(e) => {
                warn!(
                    data_dir = %config.node.data_dir,
                    error = %e,
                    "failed to open database, falling back to in-memory persistence"
                );
                Arc::new(InMemoryPersistence::new())
            }
        };
        let peers = PeerList::new(config.node.peers.clone());
        let broadcaster = Arc::new(HttpBroadcaster::new(peers.clone()));
        Self::assemble(config, address, Some(persistence), broadcaster, peers)
    }

    pub fn new(
        config: Config,
        address: Address,
        persistence: Option<Arc<dyn Persistence>>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Result<Self, ChainError> {
        let peers = PeerList::new(config.node.peers.clone());
        Self::assemble(config, address, persistence, broadcaster, peers)
    }

    /// In-memory node without peers.
    pub fn ephemeral(config: Config, address: Address) -> Result<Self, ChainError> {
        Self::new(config, address, None, Arc::new(NoopBroadcaster))
    }

    fn assemble(
        config: Config,
        address: Address,
        persistence: Option<Arc<dyn Persistence>>,
        broadcaster: Arc<dyn Broadcaster>,
        peers: PeerList,
    ) -> Result<Self, ChainError> {
        config.validate()?;
        let params = ConsensusParams::from_config(&config);

        let restored = match &persistence {
            Some(store) => store.load_snapshot(&config.node.node_id)?,
            None => None,
        };
        let chain = match restored {
            Some(snapshot) => {
                let chain = snapshot.restore(params)?;
                info!(
                    node_id = %config.node.node_id,
                    height = chain.height(),
                    blocks = chain.len(),
                    "restored chain from snapshot"
                );
                chain
            }
            None => {
                let mut chain = Blockchain::new(params)?;
                if config.node.genesis_balance > 0 {
                    chain.credit_account(&address, config.node.genesis_balance)?;
                }
                info!(
                    node_id = %config.node.node_id,
                    genesis = %chain.tip().hash_str(),
                    difficulty = params.difficulty,
                    "created new chain"
                );
                chain
            }
        };

        let mempool = Mempool::new(config.mempool.max_size);
        Ok(Node {
            core: Arc::new(RwLock::new(NodeCore { chain, mempool })),
            config: Arc::new(config),
            address,
            persistence,
            broadcaster,
            peers,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The node's own account: genesis allocation and default mining beneficiary.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn peers(&self) -> &PeerList {
        &self.peers
    }

    /// Validate against committed state and pool the transaction.
    ///
    /// Contract transactions are pre-executed; the pooled copy carries the
    /// result and, for deployments, the assigned contract id.
    pub async fn submit_transaction(&self, tx: Transaction) -> Result<SubmitReceipt, ChainError> {
        if tx.is_coinbase() {
            return Err(ChainError::Structural(
                "Coinbase transactions are only created by miners".to_string(),
            ));
        }

        let executed = {
            let core = self.core.read().await;
            validate_against(&core.chain, &tx)
        };
        let pooled = match executed {
            Ok(pooled) => pooled,
            Err(e) => {
                warn!(
                    kind = tx.type_name(),
                    from = %tx.from,
                    reason = e.reason_code(),
                    error = %e,
                    "rejected transaction"
                );
                return Err(e);
            }
        };
        // Duplicates are caught here; a block admitted in between is handled
        // by the eviction pass that follows it.
        self.core.write().await.mempool.add_transaction(pooled.clone())?;

        let receipt = SubmitReceipt {
            hash: pooled.hash_str(),
            contract_id: match &pooled.payload {
                Payload::DeployContract { contract_id, .. } => contract_id.clone(),
                Payload::CallContract { contract_id, .. } => Some(contract_id.clone()),
                Payload::Transfer { .. } => None,
            },
            result: pooled.result.clone(),
        };
        match &pooled.payload {
            Payload::Transfer { to, value } => {
                debug!(from = %pooled.from, to = %to, value, "transfer pooled")
            }
            Payload::DeployContract { .. } => {
                info!(from = %pooled.from, contract_id = ?receipt.contract_id, "contract deployment pooled")
            }
            Payload::CallContract { function, .. } => {
                info!(from = %pooled.from, contract_id = ?receipt.contract_id, function = %function, "contract call pooled")
            }
        }
        self.broadcaster.broadcast_transaction(&pooled);
        Ok(receipt)
    }

    /// Admit a block, prune the pool and persist, all under the node lock.
    pub async fn submit_block(&self, block: Block) -> Result<AdmitOutcome, ChainError> {
        let height = block.height;
        let hash = block.hash_str();
        let committed = block.transactions.clone();
        let announced = block.clone();

        let mut core = self.core.write().await;
        let outcome = match core.chain.admit_block(block) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(height, hash = %hash, reason = e.reason_code(), error = %e, "rejected block");
                return Err(e);
            }
        };
        core.mempool.remove_committed(&committed);
        let NodeCore { chain, mempool } = &mut *core;
        let evicted = mempool.evict_invalid(|tx| validate_against(chain, tx).is_ok());
        if evicted > 0 {
            debug!(evicted, height, "dropped pending transactions invalidated by block");
        }
        self.persist(&core.chain);
        drop(core);

        self.broadcaster.broadcast_block(&announced);
        Ok(outcome)
    }

    fn persist(&self, chain: &Blockchain) {
        if let Some(store) = &self.persistence {
            let snapshot = NodeSnapshot::capture(chain);
            if let Err(e) = store.save_snapshot(&self.config.node.node_id, &snapshot) {
                warn!(error = %e, "failed to persist snapshot");
            }
        }
    }

    pub async fn balance(&self, address: &str) -> u64 {
        self.core.read().await.chain.balance(address)
    }

    pub async fn chain_summary(&self) -> ChainSummary {
        let core = self.core.read().await;
        let blocks = core.chain.blocks();
        let start = blocks.len().saturating_sub(CHAIN_WINDOW);
        ChainSummary {
            chain: blocks[start..].to_vec(),
            length: blocks.len(),
            total_blocks: blocks.len(),
            min_height: blocks.iter().map(|b| b.height).min().unwrap_or(0),
            max_height: blocks.iter().map(|b| b.height).max().unwrap_or(0),
            total_transactions: core.chain.total_transactions(),
        }
    }

    pub async fn contract_info(&self, contract_id: &str) -> Result<ContractInfo, ChainError> {
        let core = self.core.read().await;
        let record = core
            .chain
            .state()
            .contracts
            .store()
            .contract(contract_id)
            .ok_or_else(|| ContractError::ContractNotFound(contract_id.to_string()))?;
        Ok(ContractInfo {
            contract_id: contract_id.to_string(),
            owner: record.owner.clone(),
            deployed_in_block: core.chain.find_contract_block(contract_id),
        })
    }

    pub async fn stats(&self) -> NodeStats {
        let core = self.core.read().await;
        let chain = &core.chain;
        let accounts = &chain.state().accounts;
        NodeStats {
            node_id: self.config.node.node_id.clone(),
            chain_length: chain.len(),
            latest_height: chain.height(),
            difficulty: chain.params.difficulty,
            total_transactions: chain.total_transactions(),
            pending_transactions: core.mempool.len(),
            accounts: accounts.len(),
            total_balance: accounts.total_balance(),
            mined_nonces: chain.mined_nonces().len(),
            contracts: chain.state().contracts.store().len(),
            peers: self.peers.len(),
            recent_blocks: chain
                .blocks()
                .iter()
                .rev()
                .take(STATS_WINDOW)
                .map(|b| BlockSummary {
                    height: b.height,
                    hash: b.hash_str(),
                    timestamp: b.timestamp,
                    transactions: b.transactions.len(),
                })
                .collect(),
            top_accounts: accounts
                .richest(STATS_WINDOW)
                .into_iter()
                .map(|(address, balance)| AccountBalance { address, balance })
                .collect(),
        }
    }

    /// Development faucet: create or top up an account outside of any block.
    pub async fn credit_account(&self, address: &str, amount: u64) -> Result<u64, ChainError> {
        if !self.config.node.faucet_enabled {
            return Err(ChainError::Structural("Account faucet is disabled".to_string()));
        }
        if address.is_empty() {
            return Err(ChainError::Structural("Address is required".to_string()));
        }
        let mut core = self.core.write().await;
        let balance = core.chain.credit_account(address, amount)?;
        self.persist(&core.chain);
        info!(address = %address, amount, balance, "account credited");
        Ok(balance)
    }

    pub fn register_peers(&self, peers: Vec<String>) -> usize {
        let added = self.peers.register(peers);
        if added > 0 {
            info!(added, total = self.peers.len(), "registered peers");
        }
        added
    }

    pub async fn pending_transactions(&self) -> Vec<Transaction> {
        self.core.read().await.mempool.transactions().to_vec()
    }

    pub async fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot::capture(&self.core.read().await.chain)
    }

    /// Block template for the miner, built under a read lock.
    pub async fn mining_job(
        &self,
        beneficiary: &str,
        limit: usize,
        timestamp: u64,
    ) -> Result<MiningJob, ChainError> {
        let core = self.core.read().await;
        prepare_job(
            &core.chain,
            core.mempool.transactions(),
            beneficiary,
            limit,
            timestamp,
        )
    }

    /// Submit deployments of the bundled contracts that this node has not
    /// deployed yet, from the node's own account.
    pub async fn deploy_sample_contracts(&self) -> Vec<(&'static str, Result<SubmitReceipt, ChainError>)> {
        let mut results = Vec::new();
        for (name, code) in samples::all() {
            let already = {
                let core = self.core.read().await;
                let deployed = core
                    .chain
                    .state()
                    .contracts
                    .store()
                    .contracts()
                    .any(|(_, record)| record.owner == self.address && record.source == code);
                let pending = core.mempool.transactions().iter().any(|tx| {
                    tx.from == self.address
                        && matches!(&tx.payload, Payload::DeployContract { code: c, .. } if c == code)
                });
                deployed || pending
            };
            if already {
                debug!(contract = name, "sample contract already deployed");
                continue;
            }
            let result = self
                .submit_transaction(Transaction::deploy(&self.address, code, now_millis()))
                .await;
            match &result {
                Ok(receipt) => {
                    info!(contract = name, contract_id = ?receipt.contract_id, "sample contract submitted")
                }
                Err(e) => warn!(contract = name, error = %e, "sample contract rejected"),
            }
            results.push((name, result));
        }
        results
    }
}

/// Stateless checks plus execution on a throwaway overlay.
fn validate_against(chain: &Blockchain, tx: &Transaction) -> Result<Transaction, ChainError> {
    tx.validate_structure(chain.params.verify_signatures)?;
    let mut pending = chain.state().pending();
    let execution = tx.execute(&mut pending)?;
    Ok(tx.with_execution(execution))
}

fn open_database(data_dir: &str) -> Result<Database, ChainError> {
    let dir = Path::new(data_dir);
    std::fs::create_dir_all(dir)?;
    Database::open(dir.join(DATABASE_FILE))
}
