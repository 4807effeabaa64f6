//! Validation for administrative add/remove amounts.
//!
//! Amounts arrive signed from the command collaborator; anything that is not
//! strictly positive is rejected here, before any ledger is touched.

/// Rejected administrative adjustment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdjustmentError {
    /// Add/remove amounts must be > 0.
    NonPositiveAmount { amount: i64 },
}

impl std::fmt::Display for AdjustmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonPositiveAmount { amount } => {
                write!(f, "invalid adjustment: amount must be > 0, got {amount}")
            }
        }
    }
}

impl std::error::Error for AdjustmentError {}

/// Accept a strictly positive amount.
pub fn positive_amount(amount: i64) -> Result<i64, AdjustmentError> {
    if amount <= 0 {
        return Err(AdjustmentError::NonPositiveAmount { amount });
    }
    Ok(amount)
}
