//! ForgeLedger - a minimal proof-of-work ledger with a contract engine
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Ledger
//! - [`blockchain`] - Block model, account ledger and block admission
//! - [`transaction`] - Transfers, deployments and contract calls
//! - [`mempool`] - Pending transaction pool
//!
//! ## Consensus & Mining
//! - [`miner`] - Difficulty targets, nonce search and the mining loop
//!
//! ## Contracts
//! - [`contract`] - Contract language, gas metering and per-contract storage
//!
//! ## Cryptography
//! - [`crypto`] - Hashing, canonical JSON and secp256k1 signatures
//!
//! ## Node Services
//! - [`node`] - Shared node state and the operations the API exposes
//! - [`persistence`] - SQLite snapshots
//! - [`network`] - Peer list and broadcasting
//! - `api` - HTTP routes (feature `api`)
//!
//! ## Configuration & Utilities
//! - [`config`] - TOML configuration with environment overrides
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod blockchain;
pub mod mempool;
pub mod transaction;

// ============================================================================
// Consensus & Mining
// ============================================================================
pub mod miner;

// ============================================================================
// Contracts
// ============================================================================
pub mod contract;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;

// ============================================================================
// Node Services
// ============================================================================
#[cfg(feature = "api")]
pub mod api;
pub mod network;
pub mod node;
pub mod persistence;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
