use super::ContractError;

/// Gas costs for interpreter operations.
pub const GAS_STEP: u64 = 1;
pub const GAS_CALL: u64 = 5;
pub const GAS_STATE_READ: u64 = 10;
pub const GAS_STATE_WRITE: u64 = 20;
/// Extra charge per this many units of value weight built or written.
pub const GAS_WEIGHT_UNIT: usize = 32;

/// Gas charged for producing a value of the given weight.
#[must_use]
pub fn weight_cost(weight: usize) -> u64 {
    (weight / GAS_WEIGHT_UNIT) as u64
}

/// Basic gas meter for tracking consumption.
#[derive(Debug, Clone)]
pub struct GasMeter {
    limit: u64,
    used: u64,
}

impl GasMeter {
    pub fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    /// Charge some amount of gas.
    pub fn charge(&mut self, amount: u64) -> Result<(), ContractError> {
        match self.used.checked_add(amount) {
            Some(new) if new <= self.limit => {
                self.used = new;
                Ok(())
            }
            _ => {
                self.used = self.limit;
                Err(ContractError::Execution("out of gas".to_string()))
            }
        }
    }

    #[must_use]
    pub fn used(&self) -> u64 {
        self.used
    }

    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.limit - self.used
    }
}
