//! Embedded contract language and its execution engine.
//!
//! Contract source is parsed into a [`Program`](ast::Program) and executed by a
//! gas-metered tree-walking interpreter. Contract code can only reach the
//! capabilities the interpreter exposes: its caller, its arguments, its own
//! state partition and the transaction clock.

pub mod ast;
pub mod engine;
pub mod gas;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod samples;
pub mod store;
pub mod value;

pub use engine::{CallReceipt, ContractEngine, ContractHost, Deployment, Invocation};
pub use store::{ContractChanges, ContractId, ContractRecord, ContractStore};
pub use value::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractError {
    #[error("compile error on line {line}: {message}")]
    Compile { line: usize, message: String },
    #[error("contract {0} not found")]
    ContractNotFound(String),
    #[error("function {0} not found")]
    FunctionNotFound(String),
    #[error("execution failed: {0}")]
    Execution(String),
}
