//! Pending transaction pool.
//!
//! Insertion order is the order the miner fills blocks in. Entries leave the
//! pool when an equivalent transaction (same [`MatchKey`]) is committed, or
//! when they stop validating against the committed state.

use crate::blockchain::Sha256Hash;
use crate::error::ChainError;
use crate::transaction::{MatchKey, Transaction};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Mempool {
    transactions: Vec<Transaction>,
    hashes: HashSet<Sha256Hash>,
    max_size: usize,
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new(1_000)
    }
}

impl Mempool {
    pub fn new(max_size: usize) -> Self {
        Self {
            transactions: Vec::new(),
            hashes: HashSet::new(),
            max_size,
        }
    }

    pub fn add_transaction(&mut self, tx: Transaction) -> Result<(), ChainError> {
        let hash = tx.hash();
        if self.hashes.contains(&hash) {
            return Err(ChainError::DuplicateTransaction(hex::encode(hash)));
        }
        if self.transactions.len() >= self.max_size {
            return Err(ChainError::MempoolFull);
        }
        debug!(
            tx = %hex::encode(hash),
            kind = tx.type_name(),
            pool_size = self.transactions.len() + 1,
            "transaction pooled"
        );
        self.hashes.insert(hash);
        self.transactions.push(tx);
        Ok(())
    }

    /// Drop every pending transaction whose match key appears in `committed`.
    pub fn remove_committed(&mut self, committed: &[Transaction]) -> usize {
        let keys: HashSet<MatchKey> = committed
            .iter()
            .filter(|tx| !tx.is_coinbase())
            .map(Transaction::match_key)
            .collect();
        if keys.is_empty() {
            return 0;
        }

        let before = self.transactions.len();
        let hashes = &mut self.hashes;
        self.transactions.retain(|tx| {
            if keys.contains(&tx.match_key()) {
                hashes.remove(&tx.hash());
                false
            } else {
                true
            }
        });
        let removed = before - self.transactions.len();
        if removed > 0 {
            debug!(removed, pool_size = self.transactions.len(), "pruned committed transactions");
        }
        removed
    }

    /// Drop every pending transaction for which `still_valid` returns false.
    pub fn evict_invalid<F>(&mut self, mut still_valid: F) -> usize
    where
        F: FnMut(&Transaction) -> bool,
    {
        let before = self.transactions.len();
        let hashes = &mut self.hashes;
        self.transactions.retain(|tx| {
            if still_valid(tx) {
                true
            } else {
                hashes.remove(&tx.hash());
                false
            }
        });
        let evicted = before - self.transactions.len();
        if evicted > 0 {
            debug!(evicted, pool_size = self.transactions.len(), "evicted stale transactions");
        }
        evicted
    }

    pub fn contains(&self, hash: &Sha256Hash) -> bool {
        self.hashes.contains(hash)
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn clear(&mut self) {
        self.transactions.clear();
        self.hashes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_order_and_duplicates() {
        let mut pool = Mempool::new(10);
        let a = Transaction::transfer("alice", "bob", 1, 1);
        let b = Transaction::transfer("alice", "carol", 2, 2);
        pool.add_transaction(a.clone()).unwrap();
        pool.add_transaction(b.clone()).unwrap();
        assert_eq!(pool.transactions(), &[a.clone(), b]);

        let err = pool.add_transaction(a.clone()).unwrap_err();
        assert_eq!(err.reason_code(), "duplicate_transaction");
        assert!(pool.contains(&a.hash()));
    }

    #[test]
    fn test_capacity() {
        let mut pool = Mempool::new(1);
        pool.add_transaction(Transaction::transfer("a", "b", 1, 1)).unwrap();
        assert_eq!(
            pool.add_transaction(Transaction::transfer("a", "b", 1, 2)),
            Err(ChainError::MempoolFull)
        );
    }

    #[test]
    fn test_remove_by_match_key() {
        let mut pool = Mempool::new(10);
        pool.add_transaction(Transaction::transfer("alice", "bob", 5, 1)).unwrap();
        pool.add_transaction(Transaction::transfer("alice", "bob", 5, 2)).unwrap();
        pool.add_transaction(Transaction::transfer("alice", "bob", 6, 3)).unwrap();

        // Different timestamp, same (from, to, value).
        let committed = vec![
            Transaction::coinbase("miner", 100, 9),
            Transaction::transfer("alice", "bob", 5, 7),
        ];
        assert_eq!(pool.remove_committed(&committed), 2);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.transactions()[0].timestamp, 3);

        // A removed entry can be pooled again.
        pool.add_transaction(Transaction::transfer("alice", "bob", 5, 1)).unwrap();
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_evict_frees_capacity() {
        let mut pool = Mempool::new(2);
        let dead = Transaction::transfer("alice", "bob", 600, 1);
        let live = Transaction::transfer("alice", "carol", 10, 2);
        pool.add_transaction(dead.clone()).unwrap();
        pool.add_transaction(live.clone()).unwrap();

        assert_eq!(pool.evict_invalid(|tx| tx.timestamp != 1), 1);
        assert_eq!(pool.transactions(), &[live]);
        assert!(!pool.contains(&dead.hash()));
        pool.add_transaction(Transaction::transfer("alice", "dave", 1, 3))
            .unwrap();
        assert_eq!(pool.evict_invalid(|_| true), 0);
    }
}
