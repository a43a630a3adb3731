//! Error types for ForgeLedger

use crate::contract::ContractError;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ChainError {
    /// Missing or malformed fields.
    Structural(String),
    /// Unknown sender account or insufficient balance.
    Economic(String),
    /// Bad hash, difficulty, previous hash, height or fork rejection.
    Consensus(String),
    Contract(ContractError),
    DuplicateNonce(u64),
    CryptoError(String),
    MempoolFull,
    DuplicateTransaction(String),
    BlockAlreadyExists,
    DatabaseError(String),
    IoError(String),
    SerializationError(String),
    ConfigError(String),
    NetworkError(String),
}

impl ChainError {
    /// Stable machine-readable code for the transport layer.
    pub fn reason_code(&self) -> &'static str {
        match self {
            ChainError::Structural(_) => "structural_error",
            ChainError::Economic(_) => "economic_error",
            ChainError::Consensus(_) => "consensus_error",
            ChainError::Contract(_) => "contract_error",
            ChainError::DuplicateNonce(_) => "duplicate_nonce",
            ChainError::CryptoError(_) => "crypto_error",
            ChainError::MempoolFull => "mempool_full",
            ChainError::DuplicateTransaction(_) => "duplicate_transaction",
            ChainError::BlockAlreadyExists => "block_already_exists",
            ChainError::DatabaseError(_) => "database_error",
            ChainError::IoError(_) => "io_error",
            ChainError::SerializationError(_) => "serialization_error",
            ChainError::ConfigError(_) => "config_error",
            ChainError::NetworkError(_) => "network_error",
        }
    }
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChainError::Structural(msg) => write!(f, "Structural error: {}", msg),
            ChainError::Economic(msg) => write!(f, "Economic error: {}", msg),
            ChainError::Consensus(msg) => write!(f, "Consensus error: {}", msg),
            ChainError::Contract(err) => write!(f, "Contract error: {}", err),
            ChainError::DuplicateNonce(nonce) => write!(f, "Nonce {} already used by a previous block", nonce),
            ChainError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            ChainError::MempoolFull => write!(f, "Mempool is full"),
            ChainError::DuplicateTransaction(hash) => write!(f, "Transaction {} is already pending", hash),
            ChainError::BlockAlreadyExists => write!(f, "Block already exists"),
            ChainError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            ChainError::IoError(msg) => write!(f, "IO error: {}", msg),
            ChainError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            ChainError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            ChainError::NetworkError(msg) => write!(f, "Network error: {}", msg),
        }
    }
}

impl std::error::Error for ChainError {}

impl From<ContractError> for ChainError {
    fn from(err: ContractError) -> Self {
        ChainError::Contract(err)
    }
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for ChainError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        ChainError::SerializationError(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::SerializationError(err.to_string())
    }
}

impl From<rusqlite::Error> for ChainError {
    fn from(err: rusqlite::Error) -> Self {
        ChainError::DatabaseError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_are_stable() {
        assert_eq!(ChainError::Structural("x".into()).reason_code(), "structural_error");
        assert_eq!(ChainError::DuplicateNonce(7).reason_code(), "duplicate_nonce");
        assert_eq!(
            ChainError::Contract(ContractError::FunctionNotFound("f".into())).reason_code(),
            "contract_error"
        );
    }

    #[test]
    fn test_contract_error_display_keeps_message() {
        let err: ChainError = ContractError::Execution("Insufficient balance".into()).into();
        assert!(err.to_string().contains("Insufficient balance"));
    }
}
