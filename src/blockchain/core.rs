// Block model and hashing, world state, block validation and fork resolution.
pub mod chain;
pub mod state;
pub mod validation;

pub use chain::*;
pub use state::*;
pub use validation::*;
