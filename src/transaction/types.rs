/// Transaction types for ForgeLedger
use crate::blockchain::Sha256Hash;
use crate::contract::{ContractId, Value};
use crate::crypto::{canonical_json, Address, KeyPair};
use crate::error::ChainError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Maximum transaction size in bytes (100KB) to prevent DoS
pub const MAX_TRANSACTION_SIZE: usize = 100_000;

/// Sender of block-reward issuance. Exempt from balance checks.
pub const COINBASE: &str = "COINBASE";

pub const TRANSFER: &str = "transfer";
pub const DEPLOY_CONTRACT: &str = "deploy_contract";
pub const CALL_CONTRACT: &str = "call_contract";

/// Output recorded by pre-execution of a contract transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxResult {
    pub output: Value,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub state_changes: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Transfer {
        to: Address,
        value: u64,
    },
    DeployContract {
        code: String,
        /// Assigned by pre-execution.
        contract_id: Option<ContractId>,
    },
    CallContract {
        contract_id: ContractId,
        function: String,
        args: BTreeMap<String, Value>,
    },
}

/// Fields that identify "the same" transaction once it has been committed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MatchKey {
    Transfer {
        from: Address,
        to: Address,
        value: u64,
    },
    Deploy {
        from: Address,
        code: String,
    },
    Call {
        from: Address,
        contract_id: ContractId,
        function: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTransaction", into = "RawTransaction")]
pub struct Transaction {
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub from: Address,
    pub signature: String,
    /// Hex compressed secp256k1 key, needed only when signatures are verified.
    pub public_key: Option<String>,
    pub payload: Payload,
    pub result: Option<TxResult>,
}

impl Transaction {
    fn unsigned(from: &str, payload: Payload, timestamp: u64) -> Self {
        Transaction {
            timestamp,
            from: from.to_string(),
            signature: String::new(),
            public_key: None,
            payload,
            result: None,
        }
    }

    pub fn transfer(from: &str, to: &str, value: u64, timestamp: u64) -> Self {
        Self::unsigned(
            from,
            Payload::Transfer {
                to: to.to_string(),
                value,
            },
            timestamp,
        )
    }

    pub fn coinbase(beneficiary: &str, reward: u64, timestamp: u64) -> Self {
        let mut tx = Self::transfer(COINBASE, beneficiary, reward, timestamp);
        tx.signature = COINBASE.to_string();
        tx
    }

    pub fn deploy(from: &str, code: &str, timestamp: u64) -> Self {
        Self::unsigned(
            from,
            Payload::DeployContract {
                code: code.to_string(),
                contract_id: None,
            },
            timestamp,
        )
    }

    pub fn call(
        from: &str,
        contract_id: &str,
        function: &str,
        args: BTreeMap<String, Value>,
        timestamp: u64,
    ) -> Self {
        Self::unsigned(
            from,
            Payload::CallContract {
                contract_id: contract_id.to_string(),
                function: function.to_string(),
                args,
            },
            timestamp,
        )
    }

    /// Parse a transaction received from a client or peer.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ChainError> {
        let raw: RawTransaction = serde_json::from_value(value)
            .map_err(|e| ChainError::Structural(format!("Malformed transaction: {}", e)))?;
        Transaction::try_from(raw)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::from(RawTransaction::from(self.clone()))
    }

    pub fn type_name(&self) -> &'static str {
        match self.payload {
            Payload::Transfer { .. } => TRANSFER,
            Payload::DeployContract { .. } => DEPLOY_CONTRACT,
            Payload::CallContract { .. } => CALL_CONTRACT,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.from == COINBASE && matches!(self.payload, Payload::Transfer { .. })
    }

    pub fn is_contract(&self) -> bool {
        !matches!(self.payload, Payload::Transfer { .. })
    }

    pub fn match_key(&self) -> MatchKey {
        let from = self.from.clone();
        match &self.payload {
            Payload::Transfer { to, value } => MatchKey::Transfer {
                from,
                to: to.clone(),
                value: *value,
            },
            Payload::DeployContract { code, .. } => MatchKey::Deploy {
                from,
                code: code.clone(),
            },
            Payload::CallContract {
                contract_id,
                function,
                ..
            } => MatchKey::Call {
                from,
                contract_id: contract_id.clone(),
                function: function.clone(),
            },
        }
    }

    /// The content a client signs: every field except the signature itself and
    /// what pre-execution attaches.
    pub fn signable_message(&self) -> Vec<u8> {
        let mut raw = RawTransaction::from(self.clone());
        raw.signature = None;
        raw.public_key = None;
        raw.result = None;
        if matches!(self.payload, Payload::DeployContract { .. }) {
            raw.contract_id = None;
        }
        canonical_json(&serde_json::Value::from(raw)).into_bytes()
    }

    /// Identity of the transaction, independent of pre-execution output.
    pub fn hash(&self) -> Sha256Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.signable_message());
        hasher.update(self.signature.as_bytes());
        hasher.finalize().into()
    }

    pub fn hash_str(&self) -> String {
        hex::encode(self.hash())
    }

    pub fn sign(&mut self, keypair: &KeyPair) -> Result<(), ChainError> {
        self.signature = keypair.sign_hex(&self.signable_message())?;
        self.public_key = Some(keypair.public_key_hex());
        Ok(())
    }

    /// Validate transaction size to prevent DoS attacks
    pub fn validate_size(&self) -> Result<(), ChainError> {
        let serialized = bincode::serialize(self)
            .map_err(|e| ChainError::Structural(format!("Serialization failed: {}", e)))?;

        if serialized.len() > MAX_TRANSACTION_SIZE {
            return Err(ChainError::Structural(format!(
                "Transaction too large: {} bytes (max: {})",
                serialized.len(),
                MAX_TRANSACTION_SIZE
            )));
        }
        Ok(())
    }
}

/// Wire form: a flat JSON object discriminated by `type`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawTransaction {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    contract_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    args: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<TxResult>,
}

impl From<RawTransaction> for serde_json::Value {
    fn from(raw: RawTransaction) -> Self {
        serde_json::to_value(raw).unwrap_or(serde_json::Value::Null)
    }
}

impl TryFrom<RawTransaction> for Transaction {
    type Error = ChainError;

    fn try_from(raw: RawTransaction) -> Result<Self, Self::Error> {
        let kind = raw.kind.as_deref().unwrap_or(TRANSFER);

        let mut missing = Vec::new();
        let mut require = |present: bool, name: &'static str| {
            if !present {
                missing.push(name);
            }
        };
        require(raw.timestamp.is_some(), "timestamp");
        require(raw.from.is_some(), "from");
        match kind {
            TRANSFER => {
                require(raw.to.is_some(), "to");
                require(raw.value.is_some(), "value");
            }
            DEPLOY_CONTRACT => require(raw.code.is_some(), "code"),
            CALL_CONTRACT => {
                require(raw.contract_id.is_some(), "contract_id");
                require(raw.function.is_some(), "function");
            }
            other => {
                return Err(ChainError::Structural(format!(
                    "Unknown transaction type: {}",
                    other
                )))
            }
        }
        require(raw.signature.is_some(), "signature");
        if !missing.is_empty() {
            return Err(ChainError::Structural(format!(
                "Missing required fields for {}: {}",
                kind,
                missing.join(", ")
            )));
        }

        let payload = match kind {
            TRANSFER => Payload::Transfer {
                to: raw.to.unwrap_or_default(),
                value: raw.value.unwrap_or_default(),
            },
            DEPLOY_CONTRACT => Payload::DeployContract {
                code: raw.code.unwrap_or_default(),
                contract_id: raw.contract_id,
            },
            _ => Payload::CallContract {
                contract_id: raw.contract_id.unwrap_or_default(),
                function: raw.function.unwrap_or_default(),
                args: raw.args.unwrap_or_default(),
            },
        };

        Ok(Transaction {
            timestamp: raw.timestamp.unwrap_or_default(),
            from: raw.from.unwrap_or_default(),
            signature: raw.signature.unwrap_or_default(),
            public_key: raw.public_key,
            payload,
            result: raw.result,
        })
    }
}

impl From<Transaction> for RawTransaction {
    fn from(tx: Transaction) -> Self {
        let mut raw = RawTransaction {
            kind: Some(tx.type_name().to_string()),
            timestamp: Some(tx.timestamp),
            from: Some(tx.from),
            signature: Some(tx.signature),
            public_key: tx.public_key,
            result: tx.result,
            ..RawTransaction::default()
        };
        match tx.payload {
            Payload::Transfer { to, value } => {
                raw.to = Some(to);
                raw.value = Some(value);
            }
            Payload::DeployContract { code, contract_id } => {
                raw.code = Some(code);
                raw.contract_id = contract_id;
            }
            Payload::CallContract {
                contract_id,
                function,
                args,
            } => {
                raw.contract_id = Some(contract_id);
                raw.function = Some(function);
                raw.args = Some(args);
            }
        }
        raw
    }
}
