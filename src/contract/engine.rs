//! Contract Execution Engine: deployment, invocation and commit of contract effects.

use super::ast::Program;
use super::interpreter::{Environment, Interpreter, StateView};
use super::parser::parse;
use super::store::{ContractChanges, ContractId, ContractRecord, ContractStore};
use super::value::Value;
use super::ContractError;
use crate::crypto::sha256_hex;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

const PROGRAM_CACHE_SIZE: usize = 64;
const CONTRACT_ID_LEN: usize = 16;

/// Read access to contracts and their state, as seen by one execution.
///
/// The committed [`ContractStore`] implements this, and so does the pending
/// overlay used while a block or transaction is validated.
pub trait ContractHost {
    fn contract(&self, id: &str) -> Option<&ContractRecord>;
    fn read_state(&self, id: &str, key: &str) -> Option<Value>;
}

/// Restricts a host to the state partition of a single contract.
struct ScopedState<'a> {
    host: &'a dyn ContractHost,
    contract_id: &'a str,
}

impl StateView for ScopedState<'_> {
    fn read(&self, key: &str) -> Option<Value> {
        self.host.read_state(self.contract_id, key)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Deployment {
    pub contract_id: ContractId,
    pub record: ContractRecord,
    pub output: Value,
}

#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub contract_id: &'a str,
    pub caller: &'a str,
    pub function: &'a str,
    pub args: &'a BTreeMap<String, Value>,
    /// Milliseconds, from the invoking transaction.
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallReceipt {
    pub output: Value,
    pub state_changes: BTreeMap<String, Value>,
    pub gas_used: u64,
}

pub struct ContractEngine {
    store: ContractStore,
    gas_limit: u64,
    programs: Mutex<LruCache<String, Arc<Program>>>,
}

impl fmt::Debug for ContractEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContractEngine")
            .field("contracts", &self.store.len())
            .field("gas_limit", &self.gas_limit)
            .finish()
    }
}

impl ContractEngine {
    pub fn new(gas_limit: u64) -> Self {
        Self::with_store(ContractStore::new(), gas_limit)
    }

    pub fn with_store(store: ContractStore, gas_limit: u64) -> Self {
        let capacity = NonZeroUsize::new(PROGRAM_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            gas_limit,
            programs: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn store(&self) -> &ContractStore {
        &self.store
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    /// Parse `source`, reusing a cached program when the same code was seen before.
    pub fn compile(&self, source: &str) -> Result<Arc<Program>, ContractError> {
        let key = sha256_hex(source.as_bytes());
        if let Some(program) = self.programs.lock().get(&key) {
            return Ok(Arc::clone(program));
        }
        let program = Arc::new(parse(source)?);
        self.programs.lock().put(key, Arc::clone(&program));
        Ok(program)
    }

    /// Check that `code` compiles and assign it a fresh id unused by `host`.
    /// Nothing is recorded; the caller commits the returned [`Deployment`].
    pub fn deploy(
        &self,
        host: &dyn ContractHost,
        code: &str,
        owner: &str,
        timestamp: u64,
    ) -> Result<Deployment, ContractError> {
        let program = self.compile(code)?;
        let contract_id = derive_contract_id(host, owner, code, timestamp);
        debug!(
            contract_id = %contract_id,
            owner = %owner,
            functions = program.functions.len(),
            "contract deployment prepared"
        );
        Ok(Deployment {
            contract_id,
            record: ContractRecord {
                source: code.to_string(),
                owner: owner.to_string(),
            },
            output: Value::from("Success"),
        })
    }

    /// Execute one contract function. Writes are reported, never applied.
    pub fn call(
        &self,
        host: &dyn ContractHost,
        invocation: &Invocation<'_>,
    ) -> Result<CallReceipt, ContractError> {
        let record = host
            .contract(invocation.contract_id)
            .ok_or_else(|| ContractError::ContractNotFound(invocation.contract_id.to_string()))?;
        let program = self.compile(&record.source)?;

        let env = Environment {
            contract_id: invocation.contract_id,
            caller: invocation.caller,
            args: invocation.args,
            now: (invocation.timestamp / 1000) as i64,
        };
        let state = ScopedState {
            host,
            contract_id: invocation.contract_id,
        };
        let outcome = Interpreter::new(&program, env, &state, self.gas_limit)
            .invoke(invocation.function)?;

        debug!(
            contract_id = %invocation.contract_id,
            function = %invocation.function,
            gas_used = outcome.gas_used,
            writes = outcome.writes.len(),
            "contract call executed"
        );
        Ok(CallReceipt {
            output: outcome.output,
            state_changes: outcome.writes,
            gas_used: outcome.gas_used,
        })
    }

    /// Make a validated batch of contract effects durable.
    pub fn commit(&mut self, changes: ContractChanges) {
        self.store.apply(changes);
    }
}

/// `hex(sha256(owner ‖ code ‖ timestamp ‖ n))[..16]` for the smallest unused `n`.
fn derive_contract_id(host: &dyn ContractHost, owner: &str, code: &str, timestamp: u64) -> ContractId {
    let mut counter: u64 = 0;
    loop {
        let digest = sha256_hex(format!("{}{}{}{}", owner, code, timestamp, counter).as_bytes());
        let id = digest[..CONTRACT_ID_LEN].to_string();
        if host.contract(&id).is_none() {
            return id;
        }
        counter += 1;
    }
}
