//! Durable contract registry and per-contract state partitions.

use super::engine::ContractHost;
use super::value::Value;
use crate::crypto::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type ContractId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRecord {
    pub source: String,
    pub owner: Address,
}

/// Everything a commit needs to make contract effects durable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractChanges {
    pub deployed: BTreeMap<ContractId, ContractRecord>,
    pub writes: BTreeMap<ContractId, BTreeMap<String, Value>>,
}

impl ContractChanges {
    pub fn is_empty(&self) -> bool {
        self.deployed.is_empty() && self.writes.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractStore {
    contracts: BTreeMap<ContractId, ContractRecord>,
    state: BTreeMap<ContractId, BTreeMap<String, Value>>,
}

impl ContractStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contract(&self, id: &str) -> Option<&ContractRecord> {
        self.contracts.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.contracts.contains_key(id)
    }

    pub fn read(&self, id: &str, key: &str) -> Option<&Value> {
        self.state.get(id).and_then(|partition| partition.get(key))
    }

    pub fn state_of(&self, id: &str) -> Option<&BTreeMap<String, Value>> {
        self.state.get(id)
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    pub fn contracts(&self) -> impl Iterator<Item = (&ContractId, &ContractRecord)> {
        self.contracts.iter()
    }

    /// Apply a validated batch. Ids are never reassigned once recorded.
    pub fn apply(&mut self, changes: ContractChanges) {
        for (id, record) in changes.deployed {
            self.contracts.entry(id.clone()).or_insert(record);
            self.state.entry(id).or_default();
        }
        for (id, writes) in changes.writes {
            self.state.entry(id).or_default().extend(writes);
        }
    }
}

impl ContractHost for ContractStore {
    fn contract(&self, id: &str) -> Option<&ContractRecord> {
        ContractStore::contract(self, id)
    }

    fn read_state(&self, id: &str, key: &str) -> Option<Value> {
        self.read(id, key).cloned()
    }
}
