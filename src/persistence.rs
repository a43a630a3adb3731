//! Snapshot persistence for ForgeLedger nodes

use crate::blockchain::{AccountLedger, Block, Blockchain, ConsensusParams};
use crate::contract::ContractStore;
use crate::error::ChainError;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// Everything needed to restart a node where it stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub blocks: Vec<Block>,
    pub accounts: AccountLedger,
    pub mined_nonces: Vec<u64>,
    /// Deployed contracts and their state partitions.
    pub contracts: ContractStore,
}

impl NodeSnapshot {
    pub fn capture(chain: &Blockchain) -> Self {
        let mut mined_nonces: Vec<u64> = chain.mined_nonces().iter().copied().collect();
        mined_nonces.sort_unstable();
        NodeSnapshot {
            blocks: chain.blocks().to_vec(),
            accounts: chain.state().accounts.clone(),
            mined_nonces,
            contracts: chain.state().contracts.store().clone(),
        }
    }

    pub fn height(&self) -> u64 {
        self.blocks.last().map(|b| b.height).unwrap_or(0)
    }

    pub fn restore(self, params: ConsensusParams) -> Result<Blockchain, ChainError> {
        Blockchain::from_parts(
            params,
            self.blocks,
            self.accounts,
            self.contracts,
            self.mined_nonces,
        )
    }
}

/// Abstraction for persistence backends. Saving replaces the previous
/// snapshot of the same node atomically.
pub trait Persistence: Send + Sync {
    fn save_snapshot(&self, node_id: &str, snapshot: &NodeSnapshot) -> Result<(), ChainError>;
    fn load_snapshot(&self, node_id: &str) -> Result<Option<NodeSnapshot>, ChainError>;
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ChainError> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| ChainError::DatabaseError(format!("Failed to open database: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS node_snapshots (
                node_id TEXT PRIMARY KEY,
                height INTEGER NOT NULL,
                saved_at INTEGER NOT NULL,
                snapshot TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| {
            ChainError::DatabaseError(format!("Failed to create node_snapshots table: {}", e))
        })?;

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, ChainError> {
        Self::open(":memory:")
    }

    fn connection(&self) -> Result<std::sync::MutexGuard<'_, Connection>, ChainError> {
        self.conn
            .lock()
            .map_err(|_| ChainError::DatabaseError("Mutex poisoned".to_string()))
    }

    /// Node ids with a stored snapshot, with the height they were saved at.
    pub fn list_snapshots(&self) -> Result<Vec<(String, u64)>, ChainError> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare("SELECT node_id, height FROM node_snapshots ORDER BY node_id ASC")
            .map_err(|e| ChainError::DatabaseError(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map([], |row| {
                let node_id: String = row.get(0)?;
                let height: i64 = row.get(1)?;
                Ok((node_id, height as u64))
            })
            .map_err(|e| ChainError::DatabaseError(format!("Failed to query snapshots: {}", e)))?;

        let mut snapshots = Vec::new();
        for row in rows {
            snapshots.push(
                row.map_err(|e| ChainError::DatabaseError(format!("Failed to read row: {}", e)))?,
            );
        }
        Ok(snapshots)
    }
}

impl Persistence for Database {
    fn save_snapshot(&self, node_id: &str, snapshot: &NodeSnapshot) -> Result<(), ChainError> {
        let json = serde_json::to_string(snapshot).map_err(|e| {
            ChainError::DatabaseError(format!("Failed to serialize snapshot: {}", e))
        })?;

        let conn = self.connection()?;
        conn.execute(
            "INSERT OR REPLACE INTO node_snapshots (node_id, height, saved_at, snapshot)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                node_id,
                snapshot.height() as i64,
                chrono::Utc::now().timestamp(),
                json,
            ],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to save snapshot: {}", e)))?;
        Ok(())
    }

    fn load_snapshot(&self, node_id: &str) -> Result<Option<NodeSnapshot>, ChainError> {
        let conn = self.connection()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT snapshot FROM node_snapshots WHERE node_id = ?1",
                params![node_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| ChainError::DatabaseError(format!("Failed to load snapshot: {}", e)))?;

        json.map(|json| {
            serde_json::from_str(&json).map_err(|e| {
                ChainError::DatabaseError(format!("Failed to deserialize snapshot: {}", e))
            })
        })
        .transpose()
    }
}

/// Simple in-memory persistence implementation useful for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryPersistence {
    snapshots: Mutex<HashMap<String, NodeSnapshot>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persistence for InMemoryPersistence {
    fn save_snapshot(&self, node_id: &str, snapshot: &NodeSnapshot) -> Result<(), ChainError> {
        let mut snapshots = self
            .snapshots
            .lock()
            .map_err(|_| ChainError::DatabaseError("Mutex poisoned".to_string()))?;
        snapshots.insert(node_id.to_string(), snapshot.clone());
        Ok(())
    }

    fn load_snapshot(&self, node_id: &str) -> Result<Option<NodeSnapshot>, ChainError> {
        let snapshots = self
            .snapshots
            .lock()
            .map_err(|_| ChainError::DatabaseError("Mutex poisoned".to_string()))?;
        Ok(snapshots.get(node_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::samples;
    use crate::miner::mine_block;
    use crate::transaction::Transaction;

    fn params() -> ConsensusParams {
        ConsensusParams {
            difficulty: 1,
            block_reward: 100,
            verify_signatures: false,
            gas_limit: 100_000,
        }
    }

    fn chain_with_contract() -> Blockchain {
        let mut chain = Blockchain::new(params()).unwrap();
        chain.credit_account("alice", 100).unwrap();
        let tip = chain.tip().clone();
        let block = Block::new(
            1,
            tip.hash,
            vec![
                Transaction::coinbase("miner", 100, 1),
                Transaction::deploy("alice", samples::TRANSFER_CONTRACT, 2),
            ],
            tip.timestamp + 1,
        );
        let block = mine_block(block, 1, chain.mined_nonces());
        chain.admit_block(block).unwrap();
        chain
    }

    #[test]
    fn test_database_open() {
        let db = Database::in_memory().unwrap();
        assert!(db.conn.lock().unwrap().is_autocommit());
        assert!(db.load_snapshot("node-1").unwrap().is_none());
    }

    #[test]
    fn test_snapshot_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forge.db");
        let chain = chain_with_contract();
        let snapshot = NodeSnapshot::capture(&chain);

        {
            let db = Database::open(&path).unwrap();
            db.save_snapshot("node-1", &snapshot).unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert_eq!(db.list_snapshots().unwrap(), vec![("node-1".to_string(), 1)]);
        let loaded = db.load_snapshot("node-1").unwrap().unwrap();
        assert_eq!(loaded, snapshot);

        let restored = loaded.restore(params()).unwrap();
        assert_eq!(restored.tip().hash, chain.tip().hash);
        assert_eq!(restored.balance("miner"), 100);
        assert_eq!(restored.state().contracts.store().len(), 1);
        assert_eq!(restored.mined_nonces(), chain.mined_nonces());
    }

    #[test]
    fn test_snapshots_are_keyed_by_node() {
        let store = InMemoryPersistence::new();
        let chain = chain_with_contract();
        store
            .save_snapshot("node-1", &NodeSnapshot::capture(&chain))
            .unwrap();
        assert!(store.load_snapshot("node-1").unwrap().is_some());
        assert!(store.load_snapshot("node-2").unwrap().is_none());
    }
}
