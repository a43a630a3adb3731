/// Validation logic for transactions separated from type definitions
use crate::blockchain::PendingState;
use crate::contract::{ContractId, Invocation};
use crate::crypto::{address_from_public_key, verify_hex_signature};
use crate::error::ChainError;
use crate::transaction::types::{Payload, Transaction, TxResult, COINBASE};
use tracing::debug;

/// What pre-execution of one transaction produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub result: Option<TxResult>,
    pub contract_id: Option<ContractId>,
}

impl Execution {
    fn transfer() -> Self {
        Execution {
            result: None,
            contract_id: None,
        }
    }
}

impl Transaction {
    /// Stateless checks: size, addressing and, when enabled, the signature.
    pub fn validate_structure(&self, verify_signatures: bool) -> Result<(), ChainError> {
        self.validate_size()?;
        if self.from.is_empty() {
            return Err(ChainError::Structural("Sender address is empty".to_string()));
        }
        match &self.payload {
            Payload::Transfer { to, .. } if to.is_empty() => {
                return Err(ChainError::Structural("Receiver address is empty".to_string()))
            }
            Payload::DeployContract { code, .. } if code.trim().is_empty() => {
                return Err(ChainError::Structural("Contract code is empty".to_string()))
            }
            Payload::CallContract {
                contract_id,
                function,
                ..
            } if contract_id.is_empty() || function.is_empty() => {
                return Err(ChainError::Structural(
                    "Contract id and function are required".to_string(),
                ))
            }
            _ => {}
        }
        if verify_signatures && !self.is_coinbase() {
            self.validate_signature()?;
        }
        Ok(())
    }

    /// Check that `signature` was produced by the key behind `from`.
    pub fn validate_signature(&self) -> Result<(), ChainError> {
        let public_key = self.public_key.as_deref().ok_or_else(|| {
            ChainError::CryptoError("Transaction carries no public key".to_string())
        })?;
        let key_bytes = hex::decode(public_key)
            .map_err(|e| ChainError::CryptoError(format!("Invalid hex public key: {}", e)))?;
        if address_from_public_key(&key_bytes) != self.from {
            return Err(ChainError::CryptoError(format!(
                "Public key does not belong to sender {}",
                self.from
            )));
        }
        verify_hex_signature(public_key, &self.signable_message(), &self.signature)
    }

    /// Validate against `pending` and fold the transaction's effects into it.
    ///
    /// Contract transactions are pre-executed here; the returned [`Execution`]
    /// carries the output to record on, or compare with, the transaction.
    pub fn execute(&self, pending: &mut PendingState<'_>) -> Result<Execution, ChainError> {
        match &self.payload {
            Payload::Transfer { to, value } => {
                if self.from == COINBASE {
                    pending.credit(to, *value)?;
                } else {
                    pending.transfer(&self.from, to, *value)?;
                }
                Ok(Execution::transfer())
            }
            Payload::DeployContract { code, .. } => {
                self.require_sender(pending)?;
                let engine = pending.engine();
                let deployment = engine.deploy(&*pending, code, &self.from, self.timestamp)?;
                debug!(contract_id = %deployment.contract_id, from = %self.from, "deploy pre-executed");

                let contract_id = deployment.contract_id.clone();
                pending.record_deployment(deployment.contract_id, deployment.record);
                Ok(Execution {
                    result: Some(TxResult {
                        output: deployment.output,
                        state_changes: Default::default(),
                    }),
                    contract_id: Some(contract_id),
                })
            }
            Payload::CallContract {
                contract_id,
                function,
                args,
            } => {
                self.require_sender(pending)?;
                let engine = pending.engine();
                let receipt = engine.call(
                    &*pending,
                    &Invocation {
                        contract_id,
                        caller: &self.from,
                        function,
                        args,
                        timestamp: self.timestamp,
                    },
                )?;
                pending.record_writes(contract_id, receipt.state_changes.clone());
                Ok(Execution {
                    result: Some(TxResult {
                        output: receipt.output,
                        state_changes: receipt.state_changes,
                    }),
                    contract_id: None,
                })
            }
        }
    }

    /// A copy of this transaction carrying the pre-execution output.
    pub fn with_execution(&self, execution: Execution) -> Transaction {
        let mut tx = self.clone();
        if execution.result.is_some() {
            tx.result = execution.result;
        }
        if let (Payload::DeployContract { contract_id, .. }, Some(id)) =
            (&mut tx.payload, execution.contract_id)
        {
            *contract_id = Some(id);
        }
        tx
    }

    /// Compare a fresh execution with what the transaction recorded, if anything.
    pub fn verify_execution(&self, execution: &Execution) -> Result<(), ChainError> {
        if let Some(recorded) = &self.result {
            if execution.result.as_ref() != Some(recorded) {
                return Err(ChainError::Consensus(format!(
                    "Contract result mismatch for transaction {}",
                    self.hash_str()
                )));
            }
        }
        if let Payload::DeployContract {
            contract_id: Some(recorded),
            ..
        } = &self.payload
        {
            if execution.contract_id.as_ref() != Some(recorded) {
                return Err(ChainError::Consensus(format!(
                    "Contract id mismatch for transaction {}: recorded {}",
                    self.hash_str(),
                    recorded
                )));
            }
        }
        Ok(())
    }

    fn require_sender(&self, pending: &PendingState<'_>) -> Result<(), ChainError> {
        if pending.balance(&self.from).is_none() {
            return Err(ChainError::Economic(format!(
                "Sender account {} does not exist",
                self.from
            )));
        }
        Ok(())
    }
}
