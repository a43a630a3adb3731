//! Ledger, block model and block admission.

pub mod core;
pub use core::*;
