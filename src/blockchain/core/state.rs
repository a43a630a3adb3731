use crate::contract::{
    ContractChanges, ContractEngine, ContractHost, ContractId, ContractRecord, Value,
};
use crate::crypto::Address;
use crate::error::ChainError;
use std::collections::{BTreeMap, HashMap};

/// Account balances. An address exists once it has been credited, even with 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AccountLedger {
    balances: HashMap<Address, u64>,
}

impl AccountLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_balance(&self, address: &str) -> Option<u64> {
        self.balances.get(address).copied()
    }

    pub fn exists(&self, address: &str) -> bool {
        self.balances.contains_key(address)
    }

    /// Credit `amount`, creating the account if needed. Returns the new balance.
    pub fn credit(&mut self, address: &str, amount: u64) -> Result<u64, ChainError> {
        let balance = self.balances.entry(address.to_string()).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| ChainError::Economic(format!("Balance overflow for {}", address)))?;
        Ok(*balance)
    }

    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }

    pub fn total_balance(&self) -> u128 {
        self.balances.values().map(|b| *b as u128).sum()
    }

    /// The `n` largest balances, ties broken by address.
    pub fn richest(&self, n: usize) -> Vec<(Address, u64)> {
        let mut accounts: Vec<_> = self
            .balances
            .iter()
            .map(|(address, balance)| (address.clone(), *balance))
            .collect();
        accounts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        accounts.truncate(n);
        accounts
    }

    fn apply(&mut self, balances: HashMap<Address, u64>) {
        self.balances.extend(balances);
    }
}

/// Owned result of validating a batch of transactions, ready to be committed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateChanges {
    pub balances: HashMap<Address, u64>,
    pub contracts: ContractChanges,
}

/// The durable world state: account table plus the contract engine and its store.
#[derive(Debug)]
pub struct LedgerState {
    pub accounts: AccountLedger,
    pub contracts: ContractEngine,
}

impl LedgerState {
    pub fn new(gas_limit: u64) -> Self {
        Self {
            accounts: AccountLedger::new(),
            contracts: ContractEngine::new(gas_limit),
        }
    }

    /// Start an overlay for validating transactions against this state.
    pub fn pending(&self) -> PendingState<'_> {
        PendingState {
            accounts: &self.accounts,
            engine: &self.contracts,
            balances: HashMap::new(),
            changes: ContractChanges::default(),
        }
    }

    /// Make validated changes durable. The caller holds the node lock, so no
    /// reader observes a half-applied batch.
    pub fn commit(&mut self, changes: StateChanges) {
        self.accounts.apply(changes.balances);
        self.contracts.commit(changes.contracts);
    }
}

/// Copy-on-write view over [`LedgerState`]. Committed state is only borrowed;
/// balances and contract effects of the transactions validated so far live in
/// the overlay until [`PendingState::into_changes`] hands them to a commit.
pub struct PendingState<'a> {
    accounts: &'a AccountLedger,
    engine: &'a ContractEngine,
    balances: HashMap<Address, u64>,
    changes: ContractChanges,
}

impl<'a> PendingState<'a> {
    pub fn engine(&self) -> &'a ContractEngine {
        self.engine
    }

    pub fn balance(&self, address: &str) -> Option<u64> {
        self.balances
            .get(address)
            .copied()
            .or_else(|| self.accounts.get_balance(address))
    }

    /// Move `amount` from an existing account to `to`, creating the receiver.
    /// Either both balances change or neither does.
    pub fn transfer(&mut self, from: &str, to: &str, amount: u64) -> Result<(), ChainError> {
        let balance = self.balance(from).ok_or_else(|| {
            ChainError::Economic(format!("Sender account {} does not exist", from))
        })?;
        let remaining = balance.checked_sub(amount).ok_or_else(|| {
            ChainError::Economic(format!(
                "Insufficient balance: {} has {}, needs {}",
                from, balance, amount
            ))
        })?;
        if from == to {
            return Ok(());
        }
        let received = self
            .balance(to)
            .unwrap_or(0)
            .checked_add(amount)
            .ok_or_else(|| ChainError::Economic(format!("Balance overflow for {}", to)))?;
        self.balances.insert(from.to_string(), remaining);
        self.balances.insert(to.to_string(), received);
        Ok(())
    }

    /// Issue new coins to `address` (block reward).
    pub fn credit(&mut self, address: &str, amount: u64) -> Result<(), ChainError> {
        let balance = self.balance(address).unwrap_or(0);
        let updated = balance
            .checked_add(amount)
            .ok_or_else(|| ChainError::Economic(format!("Balance overflow for {}", address)))?;
        self.balances.insert(address.to_string(), updated);
        Ok(())
    }

    pub fn record_deployment(&mut self, id: ContractId, record: ContractRecord) {
        self.changes.deployed.insert(id, record);
    }

    pub fn record_writes(&mut self, id: &str, writes: BTreeMap<String, Value>) {
        if writes.is_empty() {
            return;
        }
        self.changes
            .writes
            .entry(id.to_string())
            .or_default()
            .extend(writes);
    }

    pub fn into_changes(self) -> StateChanges {
        StateChanges {
            balances: self.balances,
            contracts: self.changes,
        }
    }
}

impl ContractHost for PendingState<'_> {
    fn contract(&self, id: &str) -> Option<&ContractRecord> {
        self.changes
            .deployed
            .get(id)
            .or_else(|| self.engine.store().contract(id))
    }

    fn read_state(&self, id: &str, key: &str) -> Option<Value> {
        self.changes
            .writes
            .get(id)
            .and_then(|partition| partition.get(key))
            .or_else(|| self.engine.store().read(id, key))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_does_not_touch_committed_state() {
        let mut state = LedgerState::new(1_000);
        state.accounts.credit("alice", 100).unwrap();

        let mut pending = state.pending();
        pending.transfer("alice", "bob", 60).unwrap();
        assert_eq!(pending.balance("alice"), Some(40));
        assert_eq!(pending.balance("bob"), Some(60));
        assert_eq!(state.accounts.get_balance("alice"), Some(100));
        assert!(!state.accounts.exists("bob"));

        let changes = pending.into_changes();
        state.commit(changes);
        assert_eq!(state.accounts.get_balance("alice"), Some(40));
        assert_eq!(state.accounts.get_balance("bob"), Some(60));
    }

    #[test]
    fn test_transfer_rules() {
        let mut state = LedgerState::new(1_000);
        state.accounts.credit("alice", 100).unwrap();
        state.accounts.credit("whale", u64::MAX).unwrap();
        let mut pending = state.pending();

        let err = pending.transfer("carol", "bob", 1).unwrap_err();
        assert_eq!(err.reason_code(), "economic_error");
        pending.transfer("alice", "bob", 60).unwrap();
        let err = pending.transfer("alice", "bob", 60).unwrap_err();
        assert!(err.to_string().contains("Insufficient balance"));
        assert_eq!(pending.balance("alice"), Some(40));

        assert!(pending.transfer("alice", "whale", 1).is_err());
        assert_eq!(pending.balance("alice"), Some(40));
    }

    #[test]
    fn test_overlay_contract_view() {
        let state = LedgerState::new(1_000);
        let mut pending = state.pending();
        pending.record_deployment(
            "c1".into(),
            ContractRecord {
                source: "fn f() {}".into(),
                owner: "alice".into(),
            },
        );
        pending.record_writes("c1", BTreeMap::from([("k".to_string(), Value::Int(1))]));

        assert!(pending.contract("c1").is_some());
        assert_eq!(pending.read_state("c1", "k"), Some(Value::Int(1)));
        assert!(state.contracts.store().contract("c1").is_none());
    }

    #[test]
    fn test_richest_accounts() {
        let mut ledger = AccountLedger::new();
        ledger.credit("a", 5).unwrap();
        ledger.credit("b", 50).unwrap();
        ledger.credit("c", 50).unwrap();
        ledger.credit("a", 1).unwrap();
        assert_eq!(
            ledger.richest(2),
            vec![("b".to_string(), 50), ("c".to_string(), 50)]
        );
        assert_eq!(ledger.total_balance(), 106);
    }
}
