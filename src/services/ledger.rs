//! Stock arithmetic shared by every movement operation.
//!
//! Each mutation is expressed as "take back `revert`, then apply `apply`",
//! both signed deltas. Creating a movement reverts nothing, deleting one applies
//! nothing, and an update does both.

use thiserror::Error;

use crate::entities::MovementKind;
use crate::errors::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("available stock {available} cannot cover a decrease of {decrease}")]
    Insufficient { available: i32, decrease: i64 },
    #[error("stock quantity would exceed the supported maximum of {}", i32::MAX)]
    Overflow,
}

impl From<LedgerError> for ServiceError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Insufficient { .. } => ServiceError::InsufficientStock(err.to_string()),
            LedgerError::Overflow => ServiceError::ValidationError(err.to_string()),
        }
    }
}

/// Quantity after reverting `revert` and applying `apply` to `current`.
///
/// Never returns a negative quantity; the product's stock is left untouched by
/// the caller when this fails.
pub fn rebalance(current: i32, revert: i64, apply: i64) -> Result<i32, LedgerError> {
    let net = apply - revert;
    let next = i64::from(current) + net;

    if next < 0 {
        return Err(LedgerError::Insufficient {
            available: current,
            decrease: -net,
        });
    }

    i32::try_from(next).map_err(|_| LedgerError::Overflow)
}

/// Quantity after recording a new movement.
pub fn apply(current: i32, kind: MovementKind, quantity: i32) -> Result<i32, LedgerError> {
    rebalance(current, 0, kind.delta(quantity))
}

/// Quantity after removing a previously recorded movement.
pub fn revert(current: i32, kind: MovementKind, quantity: i32) -> Result<i32, LedgerError> {
    rebalance(current, kind.delta(quantity), 0)
}
